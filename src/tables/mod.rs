//! Table kinds, their contexts, and the builders that fill them
//!
//! Every registry entry pairs a stateless [`TableBuilder`] with a
//! [`TableContext`]. The kind set is closed, so contexts are a plain enum and
//! each builder checks it was handed the variant it owns.

mod code;
mod expense;
mod expense_output;
mod mortality;
mod output;
mod policy;
mod raw;
pub mod schema;
mod sratio;
mod termination;

pub use code::{CodeBuilder, CodeContext, CodeRecord, SubCode, AGE_LIMIT};
pub use expense::{ExpenseBuilder, ExpenseContext, ExpenseLoading, ExpenseRow};
pub use expense_output::{ExpenseOutputBuilder, ExpenseOutputContext};
pub use mortality::{mortality_table_name, QxBuilder, QxContext, QxRow};
pub use output::{InputBinding, InsuranceOutput, InsuranceOutputBuilder, OutputIndex};
pub use policy::{InsuranceResultBuilder, PolicyIndex, PolicyRecord, GP_DIM};
pub use raw::{parse_table_line, RawTableBuilder, RawTableContext};
pub use sratio::{SRatioBuilder, SRatioContext, SRatioRow};
pub use termination::{
    lapse_rate, TerminationBuilder, TerminationContext, TerminationRow, FIRST_PERIOD, LAST_PERIOD,
};

use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{PipelineError, Result};
use crate::registry::Registry;

/// Registry names that downstream builders look up directly
pub mod names {
    pub const CODE: &str = "Code";
    pub const EXPENSE: &str = "Expense";
    pub const EXPENSE_OUTPUT: &str = "ExpenseOutput";
    pub const INSURANCE_RESULT: &str = "InsuranceResult";
    pub const INSURANCE_OUTPUT: &str = "InsuranceOutput";
    pub const TERMINATION: &str = "Termination";
}

/// The closed set of table kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TableKind {
    /// Mortality (or lapse) rates by risk class and age
    Qx,
    /// Lapse rates by duration and payment period
    Termination,
    /// Product codes with nested sub-tables and mortality lookups
    Code,
    /// Expense loadings by product and payment period
    Expense,
    /// Pricing ratios
    SRatio,
    /// Raw numeric rows from tab-separated text
    Table,
    /// Policy parameters joined from a raw table and the code table
    InsuranceResult,
    /// Expense loadings indexed by (product, payment period)
    ExpenseOutput,
    /// Per-policy output aggregates
    InsuranceOutput,
}

impl TableKind {
    pub const ALL: [TableKind; 9] = [
        TableKind::Qx,
        TableKind::Termination,
        TableKind::Code,
        TableKind::Expense,
        TableKind::SRatio,
        TableKind::Table,
        TableKind::InsuranceResult,
        TableKind::ExpenseOutput,
        TableKind::InsuranceOutput,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Qx => "Qx",
            TableKind::Termination => "Termination",
            TableKind::Code => "Code",
            TableKind::Expense => "Expense",
            TableKind::SRatio => "SRatio",
            TableKind::Table => "Table",
            TableKind::InsuranceResult => "InsuranceResult",
            TableKind::ExpenseOutput => "ExpenseOutput",
            TableKind::InsuranceOutput => "InsuranceOutput",
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        TableKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| PipelineError::UnknownKind(s.to_string()))
    }
}

/// One unit of input handed to a builder
#[derive(Debug, Clone)]
pub enum Field {
    /// A sheet cell (1-based column)
    Cell { column: u32, value: String },
    /// A line of tab-separated numbers
    Line(String),
    /// Column bindings for the policy-parameter join
    PolicyIndex(PolicyIndex),
    /// Column bindings for output assembly
    OutputIndex(OutputIndex),
    /// Build from other registry entries, no payload
    Build,
}

impl Field {
    pub fn cell(column: u32, value: impl Into<String>) -> Self {
        Field::Cell { column, value: value.into() }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Field::Cell { .. } => "cell",
            Field::Line(_) => "line",
            Field::PolicyIndex(_) => "policy index",
            Field::OutputIndex(_) => "output index",
            Field::Build => "build",
        }
    }
}

/// Accumulated data of one registry entry
#[derive(Debug, Clone)]
pub enum TableContext {
    Qx(QxContext),
    Termination(TerminationContext),
    Code(CodeContext),
    Expense(ExpenseContext),
    SRatio(SRatioContext),
    Table(RawTableContext),
    InsuranceResult(Vec<PolicyRecord>),
    ExpenseOutput(ExpenseOutputContext),
    InsuranceOutput(Vec<InsuranceOutput>),
}

macro_rules! context_accessors {
    ($($variant:ident => $get:ident, $get_mut:ident, $into:ident : $ty:ty;)*) => {
        impl TableContext {
            $(
                pub fn $get(&self) -> Result<&$ty> {
                    match self {
                        TableContext::$variant(inner) => Ok(inner),
                        other => Err(other.mismatch(TableKind::$variant)),
                    }
                }

                pub fn $get_mut(&mut self) -> Result<&mut $ty> {
                    match self {
                        TableContext::$variant(inner) => Ok(inner),
                        other => Err(other.mismatch(TableKind::$variant)),
                    }
                }

                pub fn $into(self) -> Result<$ty> {
                    match self {
                        TableContext::$variant(inner) => Ok(inner),
                        other => Err(other.mismatch(TableKind::$variant)),
                    }
                }
            )*
        }
    };
}

context_accessors! {
    Qx => as_qx, as_qx_mut, into_qx: QxContext;
    Termination => as_termination, as_termination_mut, into_termination: TerminationContext;
    Code => as_code, as_code_mut, into_code: CodeContext;
    Expense => as_expense, as_expense_mut, into_expense: ExpenseContext;
    SRatio => as_sratio, as_sratio_mut, into_sratio: SRatioContext;
    Table => as_table, as_table_mut, into_table: RawTableContext;
    InsuranceResult => as_policies, as_policies_mut, into_policies: Vec<PolicyRecord>;
    ExpenseOutput => as_expense_output, as_expense_output_mut, into_expense_output: ExpenseOutputContext;
    InsuranceOutput => as_outputs, as_outputs_mut, into_outputs: Vec<InsuranceOutput>;
}

impl TableContext {
    pub fn kind(&self) -> TableKind {
        match self {
            TableContext::Qx(_) => TableKind::Qx,
            TableContext::Termination(_) => TableKind::Termination,
            TableContext::Code(_) => TableKind::Code,
            TableContext::Expense(_) => TableKind::Expense,
            TableContext::SRatio(_) => TableKind::SRatio,
            TableContext::Table(_) => TableKind::Table,
            TableContext::InsuranceResult(_) => TableKind::InsuranceResult,
            TableContext::ExpenseOutput(_) => TableKind::ExpenseOutput,
            TableContext::InsuranceOutput(_) => TableKind::InsuranceOutput,
        }
    }

    fn mismatch(&self, expected: TableKind) -> PipelineError {
        PipelineError::ContextMismatch {
            expected: expected.as_str(),
            found: self.kind().as_str(),
        }
    }
}

/// Strategy object for one table kind.
///
/// Builders hold no per-table state, so one cached instance serves every
/// registry entry of its kind and may run concurrently on distinct contexts.
pub trait TableBuilder: Send + Sync {
    fn kind(&self) -> TableKind;

    fn create_context(&self) -> TableContext;

    /// Fold one field into `context`.
    ///
    /// `key` is the running key of the current logical row; builders driven
    /// by a key column update it when that column arrives.
    fn consume(
        &self,
        registry: &Registry,
        context: &mut TableContext,
        field: &Field,
        key: &mut String,
    ) -> Result<()>;

    /// Fold a worker-local context into `target`. Contexts arrive in worker
    /// order, so `target` already holds everything from earlier rows.
    fn merge(
        &self,
        registry: &Registry,
        target: &mut TableContext,
        source: TableContext,
    ) -> Result<()>;

    /// Human-readable dump for the diagnostic sink
    fn render(&self, context: &TableContext, out: &mut dyn Write) -> io::Result<()>;
}

/// Construct the builder for `kind`
pub fn builder_for(kind: TableKind) -> Arc<dyn TableBuilder> {
    match kind {
        TableKind::Qx => Arc::new(QxBuilder),
        TableKind::Termination => Arc::new(TerminationBuilder),
        TableKind::Code => Arc::new(CodeBuilder),
        TableKind::Expense => Arc::new(ExpenseBuilder),
        TableKind::SRatio => Arc::new(SRatioBuilder),
        TableKind::Table => Arc::new(RawTableBuilder),
        TableKind::InsuranceResult => Arc::new(InsuranceResultBuilder),
        TableKind::ExpenseOutput => Arc::new(ExpenseOutputBuilder),
        TableKind::InsuranceOutput => Arc::new(InsuranceOutputBuilder),
    }
}

/// Unpack a sheet cell, rejecting other field shapes
pub(crate) fn expect_cell(kind: TableKind, field: &Field) -> Result<(u32, &str)> {
    match field {
        Field::Cell { column, value } => Ok((*column, value.as_str())),
        other => Err(PipelineError::UnexpectedField {
            kind: kind.as_str(),
            field: other.label(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in TableKind::ALL {
            assert_eq!(kind.as_str().parse::<TableKind>().unwrap(), kind);
            assert_eq!(builder_for(kind).kind(), kind);
            assert_eq!(builder_for(kind).create_context().kind(), kind);
        }
        assert!(matches!(
            "Spreadsheet".parse::<TableKind>(),
            Err(PipelineError::UnknownKind(_))
        ));
    }

    #[test]
    fn test_accessor_reports_mismatch() {
        let ctx = TableContext::Expense(ExpenseContext::default());
        assert!(ctx.as_expense().is_ok());
        match ctx.as_qx() {
            Err(PipelineError::ContextMismatch { expected, found }) => {
                assert_eq!(expected, "Qx");
                assert_eq!(found, "Expense");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_builders_reject_foreign_contexts() {
        let registry = Registry::new();
        let builder = builder_for(TableKind::Qx);
        let mut ctx = TableContext::Expense(ExpenseContext::default());
        let mut key = String::new();
        let err = builder
            .consume(&registry, &mut ctx, &Field::cell(1, "Qx"), &mut key)
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
