//! Declarative column layouts for the sheet-driven builders
//!
//! Each kind describes its layout as an ordered list of [`FieldSpec`]s, a
//! column (or column span) paired with a setter. Builders only decide what
//! the key column and the row-opening column are; everything else is a
//! table lookup.

use std::collections::BTreeMap;

use crate::error::{PipelineError, Result};

/// Column or inclusive column span a field occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Columns {
    At(u32),
    Span(u32, u32),
}

impl Columns {
    /// Offset of `column` inside this span, if it falls within it
    pub fn offset(&self, column: u32) -> Option<usize> {
        match *self {
            Columns::At(c) if c == column => Some(0),
            Columns::Span(lo, hi) if (lo..=hi).contains(&column) => Some((column - lo) as usize),
            _ => None,
        }
    }
}

/// One incoming cell, positioned relative to the field that claimed it
#[derive(Debug, Clone, Copy)]
pub struct CellValue<'a> {
    pub column: u32,
    pub offset: usize,
    pub text: &'a str,
}

impl CellValue<'_> {
    pub fn int(&self) -> Result<i32> {
        parse_int(self.text, self.column)
    }

    pub fn float(&self) -> Result<f64> {
        parse_float(self.text, self.column)
    }

    pub fn string(&self) -> String {
        self.text.to_string()
    }
}

pub type Setter<R> = fn(&mut R, &CellValue<'_>) -> Result<()>;

/// A named field bound to its column position
pub struct FieldSpec<R: 'static> {
    pub name: &'static str,
    pub columns: Columns,
    pub set: Setter<R>,
}

/// Find the field claiming `column`
pub fn find_field<R>(
    fields: &'static [FieldSpec<R>],
    column: u32,
) -> Option<(&'static FieldSpec<R>, usize)> {
    fields
        .iter()
        .find_map(|f| f.columns.offset(column).map(|offset| (f, offset)))
}

/// Layout of a table whose rows are grouped in lists under a key column
pub struct RowListSchema<R: 'static> {
    pub key_column: u32,
    /// Column whose arrival starts a new row under the current key
    pub open_column: u32,
    pub fields: &'static [FieldSpec<R>],
}

impl<R: Default> RowListSchema<R> {
    /// Apply one cell to the row lists.
    ///
    /// The key column only updates `key`; the opening column appends a fresh
    /// row; other known columns fill in the newest row of the current key.
    /// Unknown columns are ignored.
    pub fn consume<K: Ord>(
        &self,
        rows: &mut BTreeMap<K, Vec<R>>,
        key: &mut String,
        column: u32,
        text: &str,
        parse_key: fn(&str, u32) -> Result<K>,
    ) -> Result<()> {
        if column == self.key_column {
            *key = text.to_string();
            return Ok(());
        }
        let Some((field, offset)) = find_field(self.fields, column) else {
            return Ok(());
        };

        let list = rows.entry(parse_key(key, self.key_column)?).or_default();
        if column == self.open_column {
            list.push(R::default());
        }
        let row = list
            .last_mut()
            .ok_or(PipelineError::FieldBeforeRow { column })?;
        (field.set)(row, &CellValue { column, offset, text })
    }
}

/// Concatenate keyed row lists, source rows after target rows
pub fn append_rows<K: Ord, R>(target: &mut BTreeMap<K, Vec<R>>, source: BTreeMap<K, Vec<R>>) {
    for (key, rows) in source {
        target.entry(key).or_default().extend(rows);
    }
}

/// Parse an integer cell. Whole-valued decimals such as `12.000000` are
/// accepted since numeric sheet cells often arrive in float form.
pub fn parse_int(text: &str, column: u32) -> Result<i32> {
    let text = text.trim();
    if let Ok(v) = text.parse::<i32>() {
        return Ok(v);
    }
    match text.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 && v.abs() <= i32::MAX as f64 => Ok(v as i32),
        _ => Err(PipelineError::Parse {
            column,
            value: text.to_string(),
            expected: "integer",
        }),
    }
}

pub fn parse_float(text: &str, column: u32) -> Result<f64> {
    let text = text.trim();
    text.parse::<f64>().map_err(|_| PipelineError::Parse {
        column,
        value: text.to_string(),
        expected: "number",
    })
}

/// Key parser for tables keyed by integer product codes
pub fn int_key(key: &str, column: u32) -> Result<i32> {
    parse_int(key, column)
}

/// Key parser for tables keyed by name
pub fn text_key(key: &str, _column: u32) -> Result<String> {
    Ok(key.to_string())
}
