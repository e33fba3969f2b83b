//! Expense loadings flattened to a (dnum, payment period) lookup
//!
//! When a product schedules the same payment period twice, the first row
//! wins.

use std::collections::BTreeMap;
use std::io::{self, Write};

use super::{names, ExpenseContext, ExpenseLoading, Field, TableBuilder, TableContext, TableKind};
use crate::error::{PipelineError, Result};
use crate::registry::Registry;

pub type ExpenseOutputContext = BTreeMap<(i32, i32), ExpenseLoading>;

pub fn flatten_schedules(schedules: &ExpenseContext) -> ExpenseOutputContext {
    let mut lookup = ExpenseOutputContext::new();
    for (dnum, rows) in schedules {
        for row in rows {
            lookup.entry((*dnum, row.payment_period)).or_insert(row.loading);
        }
    }
    lookup
}

pub struct ExpenseOutputBuilder;

impl TableBuilder for ExpenseOutputBuilder {
    fn kind(&self) -> TableKind {
        TableKind::ExpenseOutput
    }

    fn create_context(&self) -> TableContext {
        TableContext::ExpenseOutput(ExpenseOutputContext::new())
    }

    fn consume(
        &self,
        registry: &Registry,
        context: &mut TableContext,
        field: &Field,
        _key: &mut String,
    ) -> Result<()> {
        let lookup = context.as_expense_output_mut()?;
        if !matches!(field, Field::Build) {
            return Err(PipelineError::UnexpectedField {
                kind: TableKind::ExpenseOutput.as_str(),
                field: field.label(),
            });
        }

        let expense = registry.require_context(names::EXPENSE)?;
        let expense = expense.read();
        *lookup = flatten_schedules(expense.as_expense()?);
        Ok(())
    }

    fn merge(
        &self,
        _registry: &Registry,
        target: &mut TableContext,
        source: TableContext,
    ) -> Result<()> {
        target.as_expense_output_mut()?.extend(source.into_expense_output()?);
        Ok(())
    }

    fn render(&self, context: &TableContext, out: &mut dyn Write) -> io::Result<()> {
        let Ok(lookup) = context.as_expense_output() else {
            return writeln!(out, "<not an ExpenseOutput context>");
        };
        if lookup.is_empty() {
            return writeln!(out, "ExpenseOutput: context is empty.");
        }
        writeln!(out, "=== Expense Output ===")?;
        for ((dnum, mm), l) in lookup {
            writeln!(
                out,
                "Index [{}][{}]: alp_in={:.6}, beta1_in={:.6}, beta2_in={:.6}, beta3_in={:.6}, gamma_in={:.6}",
                dnum, mm, l.alpha, l.beta1, l.beta2, l.beta3, l.gamma
            )?;
        }
        Ok(())
    }
}
