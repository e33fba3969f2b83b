//! Spreadsheet-style range notation
//!
//! Accepts `A1:Z10` (corner cells) as well as the four-token form
//! `1:10:A:Z` (row start, row end, column start, column end).

use crate::error::{PipelineError, Result};

/// Rectangular, inclusive, 1-based cell region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    pub row_start: u32,
    pub row_end: u32,
    pub col_start: u32,
    pub col_end: u32,
}

impl CellRange {
    pub fn row_count(&self) -> u32 {
        self.row_end - self.row_start + 1
    }

    /// `[row_start, row_end, col_start, col_end]`
    pub fn bounds(&self) -> [u32; 4] {
        [self.row_start, self.row_end, self.col_start, self.col_end]
    }
}

/// Convert column letters to a 1-based index (`A` = 1, `Z` = 26, `AA` = 27)
pub fn column_number(letters: &str) -> Option<u32> {
    if letters.is_empty() {
        return None;
    }
    letters.chars().try_fold(0u32, |acc, c| {
        let c = c.to_ascii_uppercase();
        if !c.is_ascii_uppercase() {
            return None;
        }
        acc.checked_mul(26)?.checked_add(c as u32 - 'A' as u32 + 1)
    })
}

/// Split a cell reference like `AB12` into (column, row)
fn parse_cell(cell: &str) -> Option<(u32, u32)> {
    let split = cell.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = cell.split_at(split);
    let col = column_number(letters)?;
    let row = digits.parse::<u32>().ok()?;
    Some((col, row))
}

/// Numeric tokens are taken as-is, alphabetic tokens as column letters
fn parse_token(token: &str) -> Option<u32> {
    if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
        token.parse().ok()
    } else {
        column_number(token)
    }
}

/// Parse a range in either notation into a [`CellRange`]
pub fn parse_range(input: &str) -> Result<CellRange> {
    let invalid = || PipelineError::InvalidRange(input.to_string());
    let tokens: Vec<&str> = input.trim().split(':').collect();

    let range = match tokens.as_slice() {
        [from, to] => {
            let (col_start, row_start) = parse_cell(from).ok_or_else(invalid)?;
            let (col_end, row_end) = parse_cell(to).ok_or_else(invalid)?;
            CellRange { row_start, row_end, col_start, col_end }
        }
        [rs, re, cs, ce] => CellRange {
            row_start: parse_token(rs).ok_or_else(invalid)?,
            row_end: parse_token(re).ok_or_else(invalid)?,
            col_start: parse_token(cs).ok_or_else(invalid)?,
            col_end: parse_token(ce).ok_or_else(invalid)?,
        },
        _ => return Err(invalid()),
    };

    if range.row_start == 0
        || range.col_start == 0
        || range.row_end < range.row_start
        || range.col_end < range.col_start
    {
        return Err(invalid());
    }
    Ok(range)
}

/// Parse a `:`-separated coordinate list such as `1:2:14` or `0:C:5`
pub fn parse_coordinates(input: &str) -> Result<Vec<u32>> {
    input
        .split(':')
        .map(|t| parse_token(t.trim()).ok_or_else(|| PipelineError::InvalidRange(input.to_string())))
        .collect()
}
