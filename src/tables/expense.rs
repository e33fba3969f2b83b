//! Expense loadings by product code and payment period

use std::collections::BTreeMap;
use std::io::{self, Write};

use serde::Serialize;

use super::schema::{append_rows, int_key, Columns, FieldSpec, RowListSchema};
use super::{expect_cell, Field, TableBuilder, TableContext, TableKind};
use crate::error::Result;
use crate::registry::Registry;

pub type ExpenseContext = BTreeMap<i32, Vec<ExpenseRow>>;

/// The five loading coefficients of one schedule row
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ExpenseLoading {
    pub alpha: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub beta3: f64,
    pub gamma: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExpenseRow {
    pub payment_period: i32,
    pub loading: ExpenseLoading,
}

static EXPENSE_FIELDS: [FieldSpec<ExpenseRow>; 6] = [
    FieldSpec {
        name: "payment_period",
        columns: Columns::At(2),
        set: |r, c| {
            r.payment_period = c.int()?;
            Ok(())
        },
    },
    FieldSpec {
        name: "alpha",
        columns: Columns::At(3),
        set: |r, c| {
            r.loading.alpha = c.float()?;
            Ok(())
        },
    },
    FieldSpec {
        name: "beta1",
        columns: Columns::At(4),
        set: |r, c| {
            r.loading.beta1 = c.float()?;
            Ok(())
        },
    },
    FieldSpec {
        name: "beta2",
        columns: Columns::At(5),
        set: |r, c| {
            r.loading.beta2 = c.float()?;
            Ok(())
        },
    },
    FieldSpec {
        name: "beta3",
        columns: Columns::At(6),
        set: |r, c| {
            r.loading.beta3 = c.float()?;
            Ok(())
        },
    },
    FieldSpec {
        name: "gamma",
        columns: Columns::At(7),
        set: |r, c| {
            r.loading.gamma = c.float()?;
            Ok(())
        },
    },
];

static EXPENSE_SCHEMA: RowListSchema<ExpenseRow> = RowListSchema {
    key_column: 1,
    open_column: 2,
    fields: &EXPENSE_FIELDS,
};

pub struct ExpenseBuilder;

impl TableBuilder for ExpenseBuilder {
    fn kind(&self) -> TableKind {
        TableKind::Expense
    }

    fn create_context(&self) -> TableContext {
        TableContext::Expense(ExpenseContext::new())
    }

    fn consume(
        &self,
        _registry: &Registry,
        context: &mut TableContext,
        field: &Field,
        key: &mut String,
    ) -> Result<()> {
        let schedules = context.as_expense_mut()?;
        let (column, text) = expect_cell(TableKind::Expense, field)?;
        EXPENSE_SCHEMA.consume(schedules, key, column, text, int_key)
    }

    fn merge(
        &self,
        _registry: &Registry,
        target: &mut TableContext,
        source: TableContext,
    ) -> Result<()> {
        append_rows(target.as_expense_mut()?, source.into_expense()?);
        Ok(())
    }

    fn render(&self, context: &TableContext, out: &mut dyn Write) -> io::Result<()> {
        let Ok(schedules) = context.as_expense() else {
            return writeln!(out, "<not an Expense context>");
        };
        for (product, rows) in schedules {
            writeln!(out, "Expense index: {}", product)?;
            for r in rows {
                let l = &r.loading;
                writeln!(
                    out,
                    "  mm: {} alpha: {:.6} beta1: {:.6} beta2: {:.6} beta3: {:.6} gamma: {:.6}",
                    r.payment_period, l.alpha, l.beta1, l.beta2, l.beta3, l.gamma
                )?;
            }
        }
        Ok(())
    }
}
