use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use crate::api::result_dto::ResultRecord;
use crate::error::Result;

/// Emits result records as JSON lines. Every record goes to each sink and is flushed right away,
/// so an interrupted grid keeps every record written so far.
pub struct RecordWriter {
    sinks: Vec<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for RecordWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordWriter").field("sinks", &self.sinks.len()).finish()
    }
}

impl RecordWriter {
    pub fn new(sinks: Vec<Box<dyn Write + Send>>) -> Self {
        RecordWriter { sinks }
    }

    /// stdout, plus the file at `output` opened for appending when given.
    pub fn stdout_and_file(output: Option<&Path>) -> Result<Self> {
        let mut sinks: Vec<Box<dyn Write + Send>> = vec![Box::new(io::stdout())];
        if let Some(path) = output {
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            sinks.push(Box::new(OpenOptions::new().create(true).append(true).open(path)?));
        }
        Ok(RecordWriter::new(sinks))
    }

    pub fn write(&mut self, record: &ResultRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        for sink in &mut self.sinks {
            writeln!(sink, "{}", line)?;
            sink.flush()?;
        }
        Ok(())
    }
}
