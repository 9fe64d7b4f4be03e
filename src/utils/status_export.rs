//! CSV log of MainController status snapshots.
//!
//! One row per snapshot, appended to a persistent file so several runs can
//! share it. The header is written only when the file is new.

use std::{
    fs::{create_dir_all, OpenOptions},
    io::BufWriter,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use csv::{Writer, WriterBuilder};
use serde::Serialize;

use crate::ipc::messages::CcStatus;

#[derive(Debug, Serialize)]
struct StatusRow {
    ts_epoch_ms: u64,
    mode: String,
    detect_thresh: f64,
    simpfilter_thresh: i32,
    adaptfilter_thresh: f64,
    adaptfilter_radius: i32,
    filter_mode: String,
    ips: f64,
    dc_call_ms: f64,
    img_age_ms: f64,
    dc_y_mm: Option<f64>,
    target: String,
}

impl From<&CcStatus> for StatusRow {
    fn from(s: &CcStatus) -> Self {
        Self {
            ts_epoch_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            mode: s.mode.to_string(),
            detect_thresh: s.detect_thresh,
            simpfilter_thresh: s.simpfilter_thresh,
            adaptfilter_thresh: s.adaptfilter_thresh,
            adaptfilter_radius: s.adaptfilter_radius,
            filter_mode: s.filter_mode.to_string(),
            ips: s.ips,
            dc_call_ms: s.dc_call_ms,
            img_age_ms: s.img_age_ms,
            dc_y_mm: s.dc_y_mm,
            target: s.target.clone(),
        }
    }
}

pub struct StatusCsv {
    wtr: Writer<BufWriter<std::fs::File>>,
}

impl StatusCsv {
    /// Open `path` for appending, creating parent directories as needed.
    pub fn open(path: &Path) -> Result<Self, csv::Error> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            create_dir_all(dir)?;
        }
        let is_new = !path.exists();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let wtr = WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(BufWriter::new(file));
        Ok(Self { wtr })
    }

    /// Append one snapshot and flush it to disk.
    pub fn append(&mut self, status: &CcStatus) -> Result<(), csv::Error> {
        self.wtr.serialize(StatusRow::from(status))?;
        self.wtr.flush()?;
        Ok(())
    }
}
