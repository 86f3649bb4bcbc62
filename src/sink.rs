use log::{debug, warn};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::measurement::{FlattenSample, Sample};

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Cannot open file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Writing CSV failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("Writing CSV failed: {0}")]
    Io(#[from] io::Error),
    #[error("CSV file is closed")]
    Closed,
}

/// Appends readings to a CSV file (`date,time,mode,reading,units`).
///
/// The header is only written to new or empty files. Every row is
/// flushed right away. After a failed write the file is closed and
/// further writes return [`SinkError::Closed`].
pub struct CsvSink {
    path: PathBuf,
    writer: Option<csv::Writer<File>>,
    rows: u64,
}

impl CsvSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let needs_header = fs::metadata(&path).map_or(true, |meta| meta.len() == 0);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| SinkError::Open {
                path: path.clone(),
                source,
            })?;

        let writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);

        debug!("Logging to {}", path.display());
        Ok(Self {
            path,
            writer: Some(writer),
            rows: 0,
        })
    }

    pub fn write(&mut self, sample: &Sample) -> Result<(), SinkError> {
        let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;
        let result = writer
            .serialize(FlattenSample::from(sample))
            .map_err(SinkError::from)
            .and_then(|_| writer.flush().map_err(SinkError::from));

        match result {
            Ok(()) => {
                self.rows += 1;
                Ok(())
            }
            Err(err) => {
                warn!("Closing {} after write error: {}", self.path.display(), err);
                self.writer = None;
                Err(err)
            }
        }
    }

    pub fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(err) = writer.flush() {
                warn!("Flushing {} failed: {}", self.path.display(), err);
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Rows written since `open`
    pub fn row_count(&self) -> u64 {
        self.rows
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CsvSink {
    fn drop(&mut self) {
        self.close();
    }
}
