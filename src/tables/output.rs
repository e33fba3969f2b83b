//! Per-policy output assembly
//!
//! For every policy record this gathers the reserve inputs from the bound
//! raw tables, the product's expense loadings and its mortality matrix, and
//! optionally a monthly term premium per sex.

use std::collections::BTreeMap;
use std::io::{self, Write};

use log::debug;
use serde::Serialize;

use super::expense_output::flatten_schedules;
use super::{
    mortality_table_name, names, CodeRecord, ExpenseLoading, ExpenseOutputContext, Field,
    PolicyRecord, TableBuilder, TableContext, TableKind,
};
use crate::commutation::{compute_term_premium, distribute_mortality_table, DiscountCurve, Sex};
use crate::error::{PipelineError, Result};
use crate::registry::Registry;

/// Years of expense loading applied at most
const MAX_LOADING_YEARS: i32 = 20;

/// A raw table plus the value columns read from it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputBinding {
    pub table: String,
    pub columns: Vec<usize>,
}

impl InputBinding {
    /// Parse `table:…:column` strings. The first token names the table and
    /// the last one the column; all strings must name the same table.
    pub fn parse<S: AsRef<str>>(inputs: &[S]) -> Result<Self> {
        let mut binding = InputBinding::default();
        for input in inputs {
            let input = input.as_ref();
            let tokens: Vec<&str> = input.split(':').collect();
            let (Some(table), Some(column)) = (tokens.first(), tokens.last()) else {
                return Err(PipelineError::Config(format!("empty input binding {:?}", input)));
            };
            if tokens.len() < 2 {
                return Err(PipelineError::Config(format!(
                    "input binding {:?} has no column",
                    input
                )));
            }
            let column = column.trim().parse::<usize>().map_err(|_| {
                PipelineError::Config(format!("input binding {:?} has a bad column", input))
            })?;
            if binding.table.is_empty() {
                binding.table = table.to_string();
            } else if binding.table != *table {
                return Err(PipelineError::Config(format!(
                    "input binding {:?} mixes tables {} and {}",
                    input, binding.table, table
                )));
            }
            binding.columns.push(column);
        }
        Ok(binding)
    }

    fn column(&self, i: usize) -> Option<usize> {
        self.columns.get(i).copied()
    }

    fn is_bound(&self) -> bool {
        !self.table.is_empty() && !self.columns.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputIndex {
    pub tvn: InputBinding,
    pub alpha_ald: InputBinding,
    pub np_beta: InputBinding,
    pub std_np: InputBinding,
    /// Annual rate for the term premium; no premium when absent
    pub interest_rate: Option<f64>,
}

impl OutputIndex {
    /// Bindings whose tables are read row by row. Alpha and NP-beta only
    /// contribute column numbers into the tVn rows.
    fn row_sources(&self) -> [&InputBinding; 2] {
        [&self.tvn, &self.std_np]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsuranceOutput {
    pub product_code: i32,
    pub dnum: i32,
    pub entry_age: i32,
    pub term: i32,
    pub payment_period: i32,
    pub loading: ExpenseLoading,
    pub am: i32,
    /// Two reserve series, one per tVn column
    pub reserves: [Vec<f64>; 2],
    pub alpha_ald: Vec<f64>,
    pub np_beta: Vec<f64>,
    pub std_np: Vec<f64>,
    /// `mortality[sex][table][age]`
    pub mortality: [Vec<Vec<f64>>; 2],
    /// Monthly term premium, male then female
    pub term_premium: Option<[f64; 2]>,
}

type RawRows = BTreeMap<String, Vec<Vec<i64>>>;

fn value(row: &[i64], column: Option<usize>) -> f64 {
    column
        .and_then(|c| row.get(c))
        .map_or(0.0, |v| *v as f64)
}

/// Copy the rows of each bound row source; a missing table is fatal
fn load_bound_rows(registry: &Registry, index: &OutputIndex) -> Result<RawRows> {
    let mut rows = RawRows::new();
    for binding in index.row_sources().into_iter().filter(|b| b.is_bound()) {
        if rows.contains_key(&binding.table) {
            continue;
        }
        let shared = registry.require_context(&binding.table)?;
        let guard = shared.read_recursive();
        let table = guard
            .as_table()?
            .get(&binding.table)
            .cloned()
            .ok_or_else(|| PipelineError::MissingKey {
                table: binding.table.clone(),
                key: binding.table.clone(),
            })?;
        rows.insert(binding.table.clone(), table);
    }
    Ok(rows)
}

/// Loadings keyed by (dnum, payment period), from the flattened lookup when
/// it has been built and from the raw schedule otherwise. Both resolve
/// duplicates the same way.
fn load_loadings(registry: &Registry) -> Result<ExpenseOutputContext> {
    if let Some(shared) = registry.context(names::EXPENSE_OUTPUT) {
        return Ok(shared.read_recursive().as_expense_output()?.clone());
    }
    let shared = registry.require_context(names::EXPENSE)?;
    let guard = shared.read_recursive();
    Ok(flatten_schedules(guard.as_expense()?))
}

struct Assembly<'a> {
    registry: &'a Registry,
    index: &'a OutputIndex,
    rows: &'a RawRows,
    loadings: &'a ExpenseOutputContext,
}

impl Assembly<'_> {
    fn rows_of(&self, binding: &InputBinding) -> &[Vec<i64>] {
        self.rows.get(&binding.table).map_or(&[], Vec::as_slice)
    }

    fn assemble(&self, policy: &PolicyRecord, code: &CodeRecord) -> Result<InsuranceOutput> {
        let index = self.index;
        let term = policy.term.max(0) as usize;
        let tvn_rows = self.rows_of(&index.tvn);
        let std_rows = self.rows_of(&index.std_np);
        let tvn = [index.tvn.column(0), index.tvn.column(1)];

        let mut reserves = [Vec::new(), Vec::new()];
        let mut alpha_ald = Vec::new();
        let mut np_beta = Vec::new();
        let mut std_np = Vec::new();

        for kk in 0..term {
            let Some(row) = tvn_rows.get(kk) else {
                continue;
            };
            if tvn[0].is_some() {
                reserves[0].push(value(row, tvn[0]));
                reserves[1].push(value(row, tvn[1]));
            }
            // Alpha and NP-beta columns are read off the first tVn row
            if kk == 0 {
                for (binding, out) in [(&index.alpha_ald, &mut alpha_ald), (&index.np_beta, &mut np_beta)] {
                    if binding.column(0).is_some() {
                        out.push(value(row, binding.column(0)));
                        out.push(value(row, binding.column(1)));
                    }
                }
            }
            if let (Some(std_row), Some(_)) = (std_rows.get(kk), index.std_np.column(0)) {
                std_np.push(value(std_row, index.std_np.column(0)));
                std_np.push(value(std_row, index.std_np.column(1)));
            }
            if kk == term - 1 && tvn[0].is_some() {
                reserves[0].push(value(row, tvn[0].map(|c| c + 1)));
                reserves[1].push(value(row, tvn[1].map(|c| c + 1)));
            }
        }

        let loading = *self
            .loadings
            .get(&(policy.dnum, policy.payment_period))
            .ok_or_else(|| PipelineError::MissingKey {
                table: names::EXPENSE.to_string(),
                key: format!("dnum {} mm {}", policy.dnum, policy.payment_period),
            })?;

        let table_count = code.m_count.max(0) as usize;
        let lookup = |_: i32, slot: usize, sex: Sex, age: u32| code.mortality_rate(slot, sex, age);
        let mortality = Sex::ALL.map(|sex| distribute_mortality_table(table_count, lookup, policy.dnum, sex));

        self.check_mortality_key(policy, code)?;

        Ok(InsuranceOutput {
            product_code: policy.product_code,
            dnum: policy.dnum,
            entry_age: policy.entry_age,
            term: policy.term,
            payment_period: policy.payment_period,
            loading,
            am: policy.term.min(MAX_LOADING_YEARS),
            reserves,
            alpha_ald,
            np_beta,
            std_np,
            mortality,
            // Optional: absent without a rate, and for degenerate discounting
            term_premium: self.term_premium(policy, code),
        })
    }

    /// The product's first sub-table key has to exist in its mortality table
    fn check_mortality_key(&self, policy: &PolicyRecord, code: &CodeRecord) -> Result<()> {
        let table = mortality_table_name(code.qx_ku);
        let qx_key = code.first_sub_code().ok_or_else(|| PipelineError::MissingKey {
            table: names::CODE.to_string(),
            key: format!("sub-table of product {}", policy.product_code),
        })?;
        let shared = self.registry.require_context(&table)?;
        let guard = shared.read_recursive();
        if !guard.as_qx()?.contains_key(qx_key) {
            return Err(PipelineError::MissingKey {
                table,
                key: qx_key.to_string(),
            });
        }
        debug!("product {} uses {} from {}", policy.product_code, qx_key, table);
        Ok(())
    }

    /// Monthly term premium per sex, or `None` when no rate is configured,
    /// the policy has no payment years, or the commutation denominator
    /// degenerates to a non-finite premium.
    fn term_premium(&self, policy: &PolicyRecord, code: &CodeRecord) -> Option<[f64; 2]> {
        let rate = self.index.interest_rate?;
        if policy.payment_period <= 0 || policy.term <= 0 || policy.entry_age < 0 {
            return None;
        }
        let curve = DiscountCurve::single_rate(rate);
        let premiums = Sex::ALL.map(|sex| {
            compute_term_premium(
                policy.entry_age as u32,
                policy.term as u32,
                policy.payment_period as u32,
                policy.face_amount as f64,
                sex,
                |s, age| code.mortality_rate(0, s, age),
                |t| curve.v0(t),
                |t| curve.v1(t),
            )
        });
        if premiums.iter().all(|p| p.is_finite()) {
            Some(premiums)
        } else {
            debug!(
                "term premium for product {} is not finite at rate {}",
                policy.product_code, rate
            );
            None
        }
    }
}

pub struct InsuranceOutputBuilder;

impl TableBuilder for InsuranceOutputBuilder {
    fn kind(&self) -> TableKind {
        TableKind::InsuranceOutput
    }

    fn create_context(&self) -> TableContext {
        TableContext::InsuranceOutput(Vec::new())
    }

    fn consume(
        &self,
        registry: &Registry,
        context: &mut TableContext,
        field: &Field,
        key: &mut String,
    ) -> Result<()> {
        let outputs = context.as_outputs_mut()?;
        let Field::OutputIndex(index) = field else {
            return Err(PipelineError::UnexpectedField {
                kind: TableKind::InsuranceOutput.as_str(),
                field: field.label(),
            });
        };

        // The file being assembled must have been read
        registry.require_context(key)?;
        let rows = load_bound_rows(registry, index)?;
        let loadings = load_loadings(registry)?;
        let policies = registry.require_context(names::INSURANCE_RESULT)?;
        let code = registry.require_context(names::CODE)?;
        let policies = policies.read_recursive();
        let code = code.read_recursive();
        let code = code.as_code()?;

        let assembly = Assembly {
            registry,
            index,
            rows: &rows,
            loadings: &loadings,
        };
        let mut assembled = Vec::new();
        for policy in policies.as_policies()? {
            let record = code
                .records
                .get(&policy.product_code)
                .ok_or_else(|| PipelineError::MissingKey {
                    table: names::CODE.to_string(),
                    key: policy.product_code.to_string(),
                })?;
            assembled.push(assembly.assemble(policy, record)?);
        }
        debug!("assembled {} outputs for {}", assembled.len(), key);
        outputs.extend(assembled);
        Ok(())
    }

    fn merge(
        &self,
        _registry: &Registry,
        target: &mut TableContext,
        source: TableContext,
    ) -> Result<()> {
        target.as_outputs_mut()?.extend(source.into_outputs()?);
        Ok(())
    }

    fn render(&self, context: &TableContext, out: &mut dyn Write) -> io::Result<()> {
        let Ok(outputs) = context.as_outputs() else {
            return writeln!(out, "<not an InsuranceOutput context>");
        };
        if outputs.is_empty() {
            return writeln!(out, "InsuranceOutput is empty.");
        }
        let series = |values: &[f64]| {
            values
                .iter()
                .map(|v| format!("{:.2}", v))
                .collect::<Vec<_>>()
                .join(" ")
        };
        for o in outputs {
            writeln!(
                out,
                "product: {} dnum: {} x: {} nn: {} mm: {}",
                o.product_code, o.dnum, o.entry_age, o.term, o.payment_period
            )?;
            let l = &o.loading;
            writeln!(out, "  alp: {:.2}", l.alpha)?;
            writeln!(out, "  beta1: {:.2}", l.beta1)?;
            writeln!(out, "  beta2: {:.2}", l.beta2)?;
            writeln!(out, "  beta3: {:.2}", l.beta3)?;
            writeln!(out, "  gamma: {:.2}", l.gamma)?;
            writeln!(out, "  am: {}", o.am)?;
            writeln!(out, "  tVn (row 0): {}", series(&o.reserves[0]))?;
            writeln!(out, "  tVn (row 1): {}", series(&o.reserves[1]))?;
            writeln!(out, "  Alpha_ALD: {}", series(&o.alpha_ald))?;
            writeln!(out, "  NP_beta: {}", series(&o.np_beta))?;
            writeln!(out, "  STD_NP: {}", series(&o.std_np))?;
            if let Some([male, female]) = o.term_premium {
                writeln!(out, "  term premium: male {:.0} female {:.0}", male, female)?;
            }
        }
        Ok(())
    }
}
