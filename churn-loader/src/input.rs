//! Delimited-text input.
//!
//! The file is read whole into a [`RawTable`]: header names plus untyped string records. All
//! typing happens later in [`crate::validation`].

use csv::{ReaderBuilder, StringRecord, Trim};
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

use crate::errors::{Error, Result};

/// One data record as read
#[derive(Debug, Clone)]
pub struct RawRow {
    fields: StringRecord,
}

impl RawRow {
    /// Field at `index`, `None` for short (ragged) records
    pub fn get(&self, index: usize) -> Option<&str> {
        self.fields.get(index)
    }
}

/// Header and records of an input file.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    headers: Vec<String>,
    rows: Vec<RawRow>,
}

impl RawTable {
    /// Read a delimited file with a header row.
    pub fn from_path(path: &Path, delimiter: u8) -> Result<Self> {
        info!(path = %path.display(), "Loading data");

        let reader = builder(delimiter).from_path(path).map_err(|source| Error::Input {
            path: path.to_path_buf(),
            source,
        })?;
        Self::read(reader).map_err(|source| Error::Input {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read delimited text with a header row from any reader.
    pub fn from_reader<R: Read>(reader: R, delimiter: u8) -> std::result::Result<Self, csv::Error> {
        Self::read(builder(delimiter).from_reader(reader))
    }

    fn read<R: Read>(mut reader: csv::Reader<R>) -> std::result::Result<Self, csv::Error> {
        let headers = reader.headers()?.iter().map(str::to_string).collect::<Vec<_>>();

        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(RawRow { fields: record? });
        }

        debug!(columns = headers.len(), rows = rows.len(), "Input read");
        Ok(Self { headers, rows })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Position of the first column with this exact name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn rows(&self) -> &[RawRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn builder(delimiter: u8) -> ReaderBuilder {
    let mut builder = ReaderBuilder::new();
    // Ragged rows are read as-is; missing trailing fields become nulls during validation
    builder.delimiter(delimiter).has_headers(true).flexible(true).trim(Trim::All);
    builder
}
