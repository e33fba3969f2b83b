//! Row sources feeding the table builders
//!
//! A row source only has to answer "what text is in (row, column)". Sheets
//! are read from CSV files; raw numeric tables from tab-separated text.

mod range;

pub use range::{column_number, parse_coordinates, parse_range, CellRange};

use std::fs;
use std::io::Read;
use std::path::Path;

use crate::error::Result;

/// Random access to cell text; empty or missing cells read as `None`
pub trait RowSource: Sync {
    fn read_cell(&self, row: u32, column: u32) -> Option<&str>;
}

/// An in-memory grid of cells, 1-based on both axes
#[derive(Debug, Clone, Default)]
pub struct Sheet {
    rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    /// Build from string slices; convenient for fixtures
    pub fn from_rows(rows: &[&[&str]]) -> Self {
        Self {
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        }
    }

    /// Load a sheet from a headerless CSV file
    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = fs::File::open(path)?;
        Self::from_csv_reader(file)
    }

    /// Load a sheet from any reader producing headerless CSV
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(Self { rows })
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

impl RowSource for Sheet {
    fn read_cell(&self, row: u32, column: u32) -> Option<&str> {
        if row == 0 || column == 0 {
            return None;
        }
        let cell = self
            .rows
            .get(row as usize - 1)?
            .get(column as usize - 1)?
            .trim();
        (!cell.is_empty()).then_some(cell)
    }
}

/// Read a text table, one entry per line.
///
/// Only `\n` separates lines, so carriage-return artifacts stay inside the
/// line for the table builder to detect.
pub fn read_table_lines<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)?;
    Ok(split_table_lines(&text))
}

pub fn split_table_lines(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();
    if lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}
