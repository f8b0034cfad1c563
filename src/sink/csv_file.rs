//! Rotating CSV sink.
//!
//! Files are named `<prefix>_YYYY_MM_DD_HH_MM_SS.csv` and carry the header
//! `table,tsp,variable,value`. A file is written as `<name>.part` and renamed
//! to `<name>.csv` when it is finished, so readers never pick up a file that
//! is still growing. A new file is started after `max_rows_per_file` rows or
//! `max_time_per_file_secs` seconds, whichever comes first.
//!
//! The sink is row oriented: the worker hands it flattened rows and never
//! whole trees. A tree passed in directly is flattened with the sink's own
//! [`Flattener`].

use super::Sink;
use crate::config::CsvSinkConfig;
use crate::error::{Result, ResultExt, UaTreeError};
use crate::tree::{Flattener, PopulatedTree};
use crate::types::FlatRow;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const CSV_HEADER: [&str; 4] = ["table", "tsp", "variable", "value"];

const PART_EXTENSION: &str = "part";

struct OpenFile {
    writer: csv::Writer<BufWriter<File>>,
    part_path: PathBuf,
    final_path: PathBuf,
    rows: u64,
    opened_at: Instant,
    last_flush: Instant,
}

pub struct CsvFileSink {
    directory: PathBuf,
    file_prefix: String,
    max_rows: u64,
    max_age: Duration,
    flush_interval: Duration,
    flattener: Flattener,
    current: Option<OpenFile>,
    finished_files: Vec<PathBuf>,
}

impl CsvFileSink {
    /// Create the output directory; the first file is opened on the first row
    pub fn new(config: &CsvSinkConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.directory)
            .map_err(UaTreeError::from)
            .with_context(|| format!("Failed to create CSV directory {:?}", config.directory))?;
        tracing::info!("Writing CSV files to {:?}", config.directory);
        Ok(Self {
            directory: config.directory.clone(),
            file_prefix: config.file_prefix.clone(),
            max_rows: config.max_rows_per_file.max(1),
            max_age: Duration::from_secs(config.max_time_per_file_secs.max(1)),
            flush_interval: Duration::from_secs(config.flush_interval_secs),
            flattener: Flattener::new(),
            current: None,
            finished_files: Vec::new(),
        })
    }

    /// Flattener used for trees published directly to this sink
    pub fn with_flattener(mut self, flattener: Flattener) -> Self {
        self.flattener = flattener;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Files closed and renamed so far, oldest first
    pub fn finished_files(&self) -> &[PathBuf] {
        &self.finished_files
    }

    /// Path of the file currently being written, if any
    pub fn current_file(&self) -> Option<&Path> {
        self.current.as_ref().map(|f| f.part_path.as_path())
    }

    fn open_file(&mut self) -> Result<&mut OpenFile> {
        if self.current.is_none() {
            let stamp = chrono::Local::now().format("%Y_%m_%d_%H_%M_%S").to_string();
            let (part_path, final_path) = self.unused_paths(&stamp);
            let file = File::create(&part_path)
                .map_err(UaTreeError::from)
                .with_context(|| format!("Failed to create {:?}", part_path))?;
            let mut writer = csv::Writer::from_writer(BufWriter::new(file));
            writer.write_record(CSV_HEADER)?;
            tracing::info!("CSV sink opened file: {:?}", final_path);
            let now = Instant::now();
            self.current = Some(OpenFile {
                writer,
                part_path,
                final_path,
                rows: 0,
                opened_at: now,
                last_flush: now,
            });
        }
        self.current
            .as_mut()
            .ok_or_else(|| UaTreeError::Sink("CSV file not open".to_string()))
    }

    /// Several files may start within the same second
    fn unused_paths(&self, stamp: &str) -> (PathBuf, PathBuf) {
        let mut suffix = 0;
        loop {
            let stem = if suffix == 0 {
                format!("{}_{}", self.file_prefix, stamp)
            } else {
                format!("{}_{}_{}", self.file_prefix, stamp, suffix)
            };
            let final_path = self.directory.join(format!("{}.csv", stem));
            let part_path = self.directory.join(format!("{}.{}", stem, PART_EXTENSION));
            let taken = final_path.exists()
                || part_path.exists()
                || self.finished_files.contains(&final_path);
            if !taken {
                return (part_path, final_path);
            }
            suffix += 1;
        }
    }

    fn finish_file(&mut self) -> Result<()> {
        let Some(mut open) = self.current.take() else {
            return Ok(());
        };
        open.writer.flush()?;
        drop(open.writer);
        std::fs::rename(&open.part_path, &open.final_path)
            .map_err(UaTreeError::from)
            .with_context(|| format!("Failed to finish {:?}", open.final_path))?;
        tracing::info!(
            "CSV file {:?} finished after {} rows",
            open.final_path,
            open.rows
        );
        self.finished_files.push(open.final_path);
        Ok(())
    }

    fn rotation_due(&self, now: Instant) -> bool {
        self.current.as_ref().is_some_and(|open| {
            open.rows >= self.max_rows || now.duration_since(open.opened_at) >= self.max_age
        })
    }

    fn write_row(&mut self, table: &str, row: &FlatRow) -> Result<()> {
        let flush_interval = self.flush_interval;
        let value = row.value.to_string();
        let open = self.open_file()?;
        open.writer
            .write_record([table, row.tsp.as_str(), row.variable.as_str(), value.as_str()])?;
        open.rows += 1;

        let now = Instant::now();
        if now.duration_since(open.last_flush) >= flush_interval {
            open.writer.flush()?;
            open.last_flush = now;
        }
        if self.rotation_due(now) {
            self.finish_file()?;
        }
        Ok(())
    }
}

impl Sink for CsvFileSink {
    fn publish_row(&mut self, table: &str, _keys: &[String], row: &FlatRow) -> Result<()> {
        self.write_row(table, row)
    }

    fn publish_tree(&mut self, table: &str, _keys: &[String], tree: &PopulatedTree) -> Result<()> {
        for row in self.flattener.flatten(tree) {
            self.write_row(table, &row)?;
        }
        Ok(())
    }

    fn accepts_trees(&self) -> bool {
        false
    }

    fn flush(&mut self) -> Result<()> {
        if self.rotation_due(Instant::now()) {
            return self.finish_file();
        }
        if let Some(open) = self.current.as_mut() {
            open.writer.flush()?;
            open.last_flush = Instant::now();
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.finish_file()
    }
}

impl Drop for CsvFileSink {
    fn drop(&mut self) {
        if let Err(e) = self.finish_file() {
            tracing::error!("Failed to finish CSV file: {}", e);
        }
    }
}
