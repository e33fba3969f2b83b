//! Lapse rates by policy duration and premium payment period
//!
//! Each sheet row is keyed by duration (column 2) and carries one rate per
//! payment period 10..=30 in columns 3..=23.

use std::collections::BTreeMap;
use std::io::{self, Write};

use serde::Serialize;

use super::schema::{find_field, int_key, CellValue, Columns, FieldSpec};
use super::{expect_cell, Field, TableBuilder, TableContext, TableKind};
use crate::error::{PipelineError, Result};
use crate::registry::Registry;

pub const FIRST_PERIOD: u32 = 10;
pub const LAST_PERIOD: u32 = 30;
const PERIODS: usize = (LAST_PERIOD - FIRST_PERIOD + 1) as usize;

const KEY_COLUMN: u32 = 2;

pub type TerminationContext = BTreeMap<i32, TerminationRow>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TerminationRow {
    /// Rate for payment period `FIRST_PERIOD + i`
    pub rates: [f64; PERIODS],
}

impl TerminationRow {
    /// Rate for `payment_period`, clamped into the tabulated periods
    pub fn rate(&self, payment_period: u32) -> f64 {
        let period = payment_period.clamp(FIRST_PERIOD, LAST_PERIOD);
        self.rates[(period - FIRST_PERIOD) as usize]
    }
}

/// Lapse rate lookup `(payment period, duration)`; missing durations read as 0
pub fn lapse_rate(table: &TerminationContext, payment_period: u32, duration: u32) -> f64 {
    table
        .get(&(duration as i32))
        .map(|row| row.rate(payment_period))
        .unwrap_or(0.0)
}

static TERMINATION_FIELDS: [FieldSpec<TerminationRow>; 1] = [FieldSpec {
    name: "rates",
    columns: Columns::Span(3, 23),
    set: |row, cell| {
        row.rates[cell.offset] = cell.float()?;
        Ok(())
    },
}];

pub struct TerminationBuilder;

impl TableBuilder for TerminationBuilder {
    fn kind(&self) -> TableKind {
        TableKind::Termination
    }

    fn create_context(&self) -> TableContext {
        TableContext::Termination(TerminationContext::new())
    }

    fn consume(
        &self,
        _registry: &Registry,
        context: &mut TableContext,
        field: &Field,
        key: &mut String,
    ) -> Result<()> {
        let table = context.as_termination_mut()?;
        let (column, text) = expect_cell(TableKind::Termination, field)?;

        if column == KEY_COLUMN {
            let duration = int_key(text, column)?;
            *key = text.to_string();
            table.insert(duration, TerminationRow::default());
            return Ok(());
        }
        let Some((spec, offset)) = find_field(&TERMINATION_FIELDS, column) else {
            return Ok(());
        };
        let row = table
            .get_mut(&int_key(key, KEY_COLUMN)?)
            .ok_or(PipelineError::FieldBeforeRow { column })?;
        (spec.set)(row, &CellValue { column, offset, text })
    }

    fn merge(
        &self,
        _registry: &Registry,
        target: &mut TableContext,
        source: TableContext,
    ) -> Result<()> {
        target.as_termination_mut()?.extend(source.into_termination()?);
        Ok(())
    }

    fn render(&self, context: &TableContext, out: &mut dyn Write) -> io::Result<()> {
        let Ok(table) = context.as_termination() else {
            return writeln!(out, "<not a Termination context>");
        };
        for (duration, row) in table {
            writeln!(out, "Termination index : {}", duration)?;
            let rates: Vec<String> = row
                .rates
                .iter()
                .enumerate()
                .map(|(i, r)| format!("{}: {:.6}", FIRST_PERIOD as usize + i, r))
                .collect();
            writeln!(out, "  {}", rates.join(" "))?;
        }
        Ok(())
    }
}
