//! Raw numeric tables read from tab-separated text

use std::collections::BTreeMap;
use std::io::{self, Write};

use super::schema::parse_float;
use super::{Field, TableBuilder, TableContext, TableKind};
use crate::error::{PipelineError, Result};
use crate::registry::Registry;

/// Rows of integers grouped by the key the lines were read under
pub type RawTableContext = BTreeMap<String, Vec<Vec<i64>>>;

/// Split one text line into integers.
///
/// A token carrying a carriage return, or an empty token, ends the row.
/// Numbers may be written with a fraction; they are truncated.
pub fn parse_table_line(line: &str) -> Result<Vec<i64>> {
    let mut numbers = Vec::new();
    for (i, token) in line.split('\t').enumerate() {
        if token.contains('\r') || token.trim().is_empty() {
            break;
        }
        numbers.push(parse_float(token, i as u32 + 1)?.trunc() as i64);
    }
    Ok(numbers)
}

pub struct RawTableBuilder;

impl TableBuilder for RawTableBuilder {
    fn kind(&self) -> TableKind {
        TableKind::Table
    }

    fn create_context(&self) -> TableContext {
        TableContext::Table(RawTableContext::new())
    }

    fn consume(
        &self,
        _registry: &Registry,
        context: &mut TableContext,
        field: &Field,
        key: &mut String,
    ) -> Result<()> {
        let tables = context.as_table_mut()?;
        let Field::Line(line) = field else {
            return Err(PipelineError::UnexpectedField {
                kind: TableKind::Table.as_str(),
                field: field.label(),
            });
        };
        let row = parse_table_line(line)?;
        tables.entry(key.clone()).or_default().push(row);
        Ok(())
    }

    fn merge(
        &self,
        _registry: &Registry,
        target: &mut TableContext,
        source: TableContext,
    ) -> Result<()> {
        super::schema::append_rows(target.as_table_mut()?, source.into_table()?);
        Ok(())
    }

    fn render(&self, context: &TableContext, out: &mut dyn Write) -> io::Result<()> {
        let Ok(tables) = context.as_table() else {
            return writeln!(out, "<not a Table context>");
        };
        for (key, rows) in tables {
            writeln!(out, "Key: {}", key)?;
            for row in rows {
                let cells: Vec<String> = row.iter().map(i64::to_string).collect();
                writeln!(out, "{}", cells.join(" "))?;
            }
        }
        Ok(())
    }
}
