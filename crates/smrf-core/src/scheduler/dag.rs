//! Dependency ordering of stages.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use tracing::debug;

use super::Stage;
use crate::error::{Result, SmrfError};

/// Stages in an order where every input is produced by an earlier stage.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    /// Field name to the index of its producing stage in `stages`.
    producers: BTreeMap<String, usize>,
}

impl Pipeline {
    /// Order `stages` by their declared fields. Ties keep the order given,
    /// so the result is deterministic.
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Result<Self> {
        let mut producer_of: BTreeMap<String, usize> = BTreeMap::new();
        for (i, stage) in stages.iter().enumerate() {
            for out in stage.outputs() {
                if let Some(prev) = producer_of.insert(out.clone(), i) {
                    return Err(SmrfError::config(format!(
                        "field {out} is produced by both {} and {}",
                        stages[prev].name(),
                        stage.name()
                    )));
                }
            }
        }

        let mut graph: DiGraph<usize, String> = DiGraph::new();
        let nodes: Vec<NodeIndex> = (0..stages.len()).map(|i| graph.add_node(i)).collect();
        for (i, stage) in stages.iter().enumerate() {
            for input in stage.inputs() {
                let &p = producer_of.get(&input).ok_or_else(|| {
                    SmrfError::config(format!("{} needs {input}, which no stage produces", stage.name()))
                })?;
                graph.update_edge(nodes[p], nodes[i], input);
            }
        }
        if is_cyclic_directed(&graph) {
            return Err(SmrfError::config("stage dependencies form a cycle"));
        }

        // Kahn's algorithm, always taking the earliest-registered ready stage.
        let mut indegree: Vec<usize> = nodes
            .iter()
            .map(|&n| graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();
        let mut ready: BinaryHeap<Reverse<usize>> =
            (0..stages.len()).filter(|&i| indegree[i] == 0).map(Reverse).collect();
        let mut order = Vec::with_capacity(stages.len());
        while let Some(Reverse(i)) = ready.pop() {
            order.push(i);
            for next in graph.neighbors_directed(nodes[i], Direction::Outgoing) {
                let j = graph[next];
                indegree[j] -= 1;
                if indegree[j] == 0 {
                    ready.push(Reverse(j));
                }
            }
        }

        let mut slots: Vec<Option<Box<dyn Stage>>> = stages.into_iter().map(Some).collect();
        let stages: Vec<Box<dyn Stage>> = order.iter().filter_map(|&i| slots[i].take()).collect();
        let producers = stages
            .iter()
            .enumerate()
            .flat_map(|(i, s)| s.outputs().into_iter().map(move |o| (o, i)))
            .collect();

        let pipeline = Self { stages, producers };
        debug!(order = ?pipeline.order(), "stage order");
        Ok(pipeline)
    }

    /// Stage names in execution order.
    pub fn order(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Every field published by the pipeline, in execution order.
    pub fn fields(&self) -> Vec<String> {
        self.stages.iter().flat_map(|s| s.outputs()).collect()
    }

    /// Index of the stage producing `field`.
    pub fn producer(&self, field: &str) -> Option<usize> {
        self.producers.get(field).copied()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub(crate) fn stages_mut(&mut self) -> &mut [Box<dyn Stage>] {
        &mut self.stages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::testing::stage;
    use crate::scheduler::Field;

    fn constant(name: &str, inputs: &[&str]) -> Box<dyn Stage> {
        stage(name, inputs, |_, _| Ok(Field::Scalar(0.0)))
    }

    #[test]
    fn orders_by_dependency() {
        let p = Pipeline::new(vec![
            constant("thermal", &["air_temp", "vapor_pressure", "cloud_factor"]),
            constant("vapor_pressure", &["air_temp"]),
            constant("air_temp", &[]),
            constant("cloud_factor", &[]),
        ])
        .unwrap();
        assert_eq!(p.order(), vec!["air_temp", "vapor_pressure", "cloud_factor", "thermal"]);
        assert_eq!(p.producer("thermal"), Some(3));
    }

    #[test]
    fn independent_stages_keep_registration_order() {
        let p = Pipeline::new(vec![constant("b", &[]), constant("a", &[]), constant("c", &["a"])]).unwrap();
        assert_eq!(p.order(), vec!["b", "a", "c"]);
    }

    #[test]
    fn missing_producer_is_config_error() {
        let err = Pipeline::new(vec![constant("thermal", &["air_temp"])]).err().unwrap();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn cycle_is_config_error() {
        let err = Pipeline::new(vec![constant("a", &["b"]), constant("b", &["a"])]).err().unwrap();
        assert!(err.to_string().contains("cycle"), "{err}");
    }

    #[test]
    fn duplicate_producer_is_config_error() {
        let err = Pipeline::new(vec![constant("a", &[]), constant("a", &[])]).err().unwrap();
        assert_eq!(err.kind(), "config");
    }
}
