//! One JSON Lines file per output variable.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use chrono::DateTime;
use chrono_tz::Tz;
use serde::Serialize;
use tracing::debug;

use smrf_core::{OutputSink, Raster, Result};

#[derive(Serialize)]
struct Line<'a> {
    time: String,
    ny: usize,
    nx: usize,
    data: &'a [f64],
}

pub struct JsonLinesSink {
    dir: PathBuf,
    files: BTreeMap<String, BufWriter<File>>,
}

impl JsonLinesSink {
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            files: BTreeMap::new(),
        })
    }

    fn file(&mut self, variable: &str) -> Result<&mut BufWriter<File>> {
        if !self.files.contains_key(variable) {
            let path = self.dir.join(format!("{variable}.jsonl"));
            debug!(path = %path.display(), "opening output");
            self.files.insert(variable.to_string(), BufWriter::new(File::create(path)?));
        }
        self.files
            .get_mut(variable)
            .ok_or_else(|| smrf_core::SmrfError::config(format!("no output file for {variable}")))
    }
}

impl OutputSink for JsonLinesSink {
    fn write(&mut self, variable: &str, field: &Raster, time: &DateTime<Tz>) -> Result<()> {
        let line = Line {
            time: time.to_rfc3339(),
            ny: field.ny,
            nx: field.nx,
            data: &field.data,
        };
        let text = serde_json::to_string(&line)?;
        writeln!(self.file(variable)?, "{text}")?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        for f in self.files.values_mut() {
            f.flush()?;
        }
        Ok(())
    }
}
