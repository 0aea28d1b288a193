//! Time-keyed queue between one producer stage and its consumers.
//!
//! Values are keyed by step index. `get` does not remove a value, so any
//! number of consumers can read the same step; the cleaner removes it once
//! everyone has finished. `put` blocks while the queue holds `max_len`
//! values.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::trace;

use super::{Field, Step};
use crate::error::{Result, SmrfError};

#[derive(Debug, Default)]
struct State {
    items: BTreeMap<usize, Field>,
    closed: bool,
}

#[derive(Debug)]
pub struct DateQueue {
    name: String,
    state: Mutex<State>,
    changed: Condvar,
    max_len: usize,
    timeout: Option<Duration>,
}

impl DateQueue {
    /// A queue holding at most `max_len` steps; `timeout` of `None` waits
    /// forever.
    pub fn new(name: impl Into<String>, max_len: usize, timeout: Option<Duration>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State::default()),
            changed: Condvar::new(),
            max_len: max_len.max(1),
            timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait while `blocked` holds. Fails once the queue closes or the timeout passes.
    fn wait_while<'a>(
        &self,
        mut state: MutexGuard<'a, State>,
        step: &Step,
        blocked: impl Fn(&State) -> bool,
    ) -> Result<MutexGuard<'a, State>> {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        while blocked(&state) {
            if state.closed {
                return Err(SmrfError::Cancelled);
            }
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut state, deadline).timed_out() && blocked(&state) {
                        if state.closed {
                            return Err(SmrfError::Cancelled);
                        }
                        return Err(SmrfError::Timeout {
                            queue: self.name.clone(),
                            time: step.label(),
                        });
                    }
                }
                None => self.changed.wait(&mut state),
            }
        }
        if state.closed {
            return Err(SmrfError::Cancelled);
        }
        Ok(state)
    }

    pub fn put(&self, step: &Step, field: Field) -> Result<()> {
        let state = self.state.lock();
        let max_len = self.max_len;
        let mut state = self.wait_while(state, step, |s| s.items.len() >= max_len)?;
        state.items.insert(step.index, field);
        trace!(queue = %self.name, step = step.index, "put");
        drop(state);
        self.changed.notify_all();
        Ok(())
    }

    pub fn get(&self, step: &Step) -> Result<Field> {
        let state = self.state.lock();
        let state = self.wait_while(state, step, |s| !s.items.contains_key(&step.index))?;
        state
            .items
            .get(&step.index)
            .cloned()
            .ok_or(SmrfError::Cancelled)
    }

    /// Drop the value for a finished step.
    pub fn clean(&self, index: usize) {
        self.state.lock().items.remove(&index);
        self.changed.notify_all();
    }

    /// Wake every waiter with [`SmrfError::Cancelled`].
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;
    use std::thread;

    fn step(index: usize) -> Step {
        Step {
            index,
            time: chrono_tz::UTC.with_ymd_and_hms(2020, 1, 1, index as u32, 0, 0).unwrap(),
            dt_days: 1.0 / 24.0,
        }
    }

    #[test]
    fn get_does_not_consume() {
        let q = DateQueue::new("air_temp", 2, None);
        q.put(&step(0), Field::Scalar(1.0)).unwrap();
        assert_eq!(q.get(&step(0)).unwrap(), Field::Scalar(1.0));
        assert_eq!(q.get(&step(0)).unwrap(), Field::Scalar(1.0));
        q.clean(0);
        assert!(q.is_empty());
    }

    #[test]
    fn get_waits_for_producer() {
        let q = Arc::new(DateQueue::new("air_temp", 1, Some(Duration::from_secs(5))));
        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                q.put(&step(3), Field::Scalar(2.5)).unwrap();
            })
        };
        assert_eq!(q.get(&step(3)).unwrap(), Field::Scalar(2.5));
        producer.join().unwrap();
    }

    #[test]
    fn get_times_out() {
        let q = DateQueue::new("vapor_pressure", 1, Some(Duration::from_millis(10)));
        match q.get(&step(0)) {
            Err(SmrfError::Timeout { queue, .. }) => assert_eq!(queue, "vapor_pressure"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    /// A full queue blocks the producer until the step is cleaned.
    #[test]
    fn put_blocks_when_full() {
        let q = Arc::new(DateQueue::new("wind_speed", 1, Some(Duration::from_secs(5))));
        q.put(&step(0), Field::Empty).unwrap();
        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.put(&step(1), Field::Empty))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(q.len(), 1, "second put must wait");
        q.clean(0);
        producer.join().unwrap().unwrap();
        assert!(q.get(&step(1)).is_ok());
    }

    #[test]
    fn close_cancels_waiters() {
        let q = Arc::new(DateQueue::new("precip", 1, None));
        let waiter = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.get(&step(0)))
        };
        thread::sleep(Duration::from_millis(20));
        q.close();
        assert!(matches!(waiter.join().unwrap(), Err(SmrfError::Cancelled)));
    }
}
