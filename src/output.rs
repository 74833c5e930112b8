//! Record printing for the CLI: plain text, JSON lines, or CSV.

use chrono::{DateTime, Local};
use dirwatch_core::ChangeRecord;
use serde::Serialize;
use std::io::{self, Stdout, Write};

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Csv,
}

/// One printed line, whatever the format.
#[derive(Serialize, Debug, PartialEq)]
pub struct Row {
    pub timestamp: String,
    pub kind: &'static str,
    pub path: String,
}

impl Row {
    pub fn new(record: &ChangeRecord, at: DateTime<Local>) -> Self {
        Self {
            timestamp: at.format("%Y-%m-%dT%H:%M:%S%.3f%:z").to_string(),
            kind: record.kind.as_str(),
            path: record.path_lossy(),
        }
    }

    pub fn to_text(&self) -> String {
        format!("{} {:<8} {}", self.timestamp, self.kind, self.path)
    }
}

pub enum Output<W: Write> {
    Text(W),
    Json(W),
    Csv(csv::Writer<W>),
}

impl Output<Stdout> {
    pub fn stdout(format: OutputFormat) -> Self {
        Self::new(format, io::stdout())
    }
}

impl<W: Write> Output<W> {
    pub fn new(format: OutputFormat, writer: W) -> Self {
        match format {
            OutputFormat::Text => Output::Text(writer),
            OutputFormat::Json => Output::Json(writer),
            OutputFormat::Csv => Output::Csv(csv::Writer::from_writer(writer)),
        }
    }

    pub fn write(&mut self, record: &ChangeRecord) -> anyhow::Result<()> {
        self.write_at(record, Local::now())
    }

    pub fn write_at(&mut self, record: &ChangeRecord, at: DateTime<Local>) -> anyhow::Result<()> {
        let row = Row::new(record, at);
        match self {
            Output::Text(w) => {
                writeln!(w, "{}", row.to_text())?;
                w.flush()?;
            }
            Output::Json(w) => {
                serde_json::to_writer(&mut *w, &row)?;
                writeln!(w)?;
                w.flush()?;
            }
            Output::Csv(w) => {
                w.serialize(&row)?;
                w.flush()?;
            }
        }
        Ok(())
    }

    pub fn finish(&mut self) -> anyhow::Result<()> {
        match self {
            Output::Text(w) | Output::Json(w) => w.flush()?,
            Output::Csv(w) => w.flush()?,
        }
        Ok(())
    }
}
