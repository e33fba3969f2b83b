//! Policy parameters joined from a raw numeric table and the code table

use std::io::{self, Write};

use serde::Serialize;

use super::{names, CodeContext, Field, TableBuilder, TableContext, TableKind};
use crate::error::{PipelineError, Result};
use crate::registry::Registry;

/// Side length of the generic-premium matrix
pub const GP_DIM: usize = 10;

/// Which raw-table columns feed each policy parameter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyIndex {
    pub product_code: usize,
    pub term: usize,
    pub payment_period: usize,
    pub entry_age: usize,
    pub face_amount: usize,
    /// `[row, column, source column]` placements into the premium matrix
    pub generic_premium: Vec<[usize; 3]>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyRecord {
    pub product_code: i32,
    pub dnum: i32,
    pub term: i32,
    pub payment_period: i32,
    pub entry_age: i32,
    pub face_amount: i64,
    pub generic_premium: [[i64; GP_DIM]; GP_DIM],
}

impl PolicyIndex {
    /// Build one record from a raw row. Unknown product codes get dnum 0.
    pub fn apply(&self, row: &[i64], code: &CodeContext) -> Result<PolicyRecord> {
        let at = |column: usize| {
            row.get(column)
                .copied()
                .ok_or(PipelineError::ShortRow { column, len: row.len() })
        };

        let product_code = at(self.product_code)? as i32;
        let mut generic_premium = [[0; GP_DIM]; GP_DIM];
        for &[r, c, source] in &self.generic_premium {
            if r < GP_DIM && c < GP_DIM {
                if let Some(value) = row.get(source) {
                    generic_premium[r][c] = *value;
                }
            }
        }

        Ok(PolicyRecord {
            product_code,
            dnum: code.records.get(&product_code).map_or(0, |r| r.dnum),
            term: at(self.term)? as i32,
            payment_period: at(self.payment_period)? as i32,
            entry_age: at(self.entry_age)? as i32,
            face_amount: at(self.face_amount)?,
            generic_premium,
        })
    }
}

pub struct InsuranceResultBuilder;

impl TableBuilder for InsuranceResultBuilder {
    fn kind(&self) -> TableKind {
        TableKind::InsuranceResult
    }

    fn create_context(&self) -> TableContext {
        TableContext::InsuranceResult(Vec::new())
    }

    /// Join every row of the raw table named by `key` with the code table
    fn consume(
        &self,
        registry: &Registry,
        context: &mut TableContext,
        field: &Field,
        key: &mut String,
    ) -> Result<()> {
        let records = context.as_policies_mut()?;
        let Field::PolicyIndex(index) = field else {
            return Err(PipelineError::UnexpectedField {
                kind: TableKind::InsuranceResult.as_str(),
                field: field.label(),
            });
        };

        let raw = registry.require_context(key)?;
        let code = registry.require_context(names::CODE)?;
        let raw = raw.read();
        let code = code.read();
        let rows = raw
            .as_table()?
            .get(key.as_str())
            .ok_or_else(|| PipelineError::MissingKey {
                table: key.clone(),
                key: key.clone(),
            })?;
        let code = code.as_code()?;

        let joined = rows
            .iter()
            .map(|row| index.apply(row, code))
            .collect::<Result<Vec<_>>>()?;
        records.extend(joined);
        Ok(())
    }

    fn merge(
        &self,
        _registry: &Registry,
        target: &mut TableContext,
        source: TableContext,
    ) -> Result<()> {
        target.as_policies_mut()?.extend(source.into_policies()?);
        Ok(())
    }

    fn render(&self, context: &TableContext, out: &mut dyn Write) -> io::Result<()> {
        let Ok(records) = context.as_policies() else {
            return writeln!(out, "<not an InsuranceResult context>");
        };
        for r in records {
            writeln!(
                out,
                "InsuranceResult: bojong: {}, dnum: {}, nn: {}, mm: {}, x: {}, AMT: {}",
                r.product_code, r.dnum, r.term, r.payment_period, r.entry_age, r.face_amount
            )?;
            for (i, row) in r.generic_premium.iter().enumerate() {
                for (j, value) in row.iter().enumerate().filter(|(_, v)| **v != 0) {
                    writeln!(out, "GP_Input[{}][{}]: {}", i, j, value)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::CodeRecord;

    fn index() -> PolicyIndex {
        PolicyIndex {
            product_code: 0,
            term: 1,
            payment_period: 2,
            entry_age: 3,
            face_amount: 4,
            generic_premium: vec![[0, 1, 5], [9, 9, 0], [10, 0, 5], [2, 2, 40]],
        }
    }

    fn code_with(product: i32, dnum: i32) -> CodeContext {
        let mut code = CodeContext::default();
        code.records.insert(product, CodeRecord { dnum, ..Default::default() });
        code
    }

    #[test]
    fn test_apply_maps_columns() {
        let code = code_with(1001, 4);
        let record = index().apply(&[1001, 20, 10, 35, 50_000_000, 777], &code).unwrap();

        assert_eq!(record.dnum, 4);
        assert_eq!(record.term, 20);
        assert_eq!(record.payment_period, 10);
        assert_eq!(record.entry_age, 35);
        assert_eq!(record.face_amount, 50_000_000);
        assert_eq!(record.generic_premium[0][1], 777);
        assert_eq!(record.generic_premium[9][9], 1001);
        // Out-of-bounds placements are dropped
        assert_eq!(record.generic_premium[2][2], 0);
    }

    #[test]
    fn test_unknown_product_gets_zero_dnum() {
        let record = index().apply(&[9, 1, 1, 1, 1], &code_with(1001, 4)).unwrap();
        assert_eq!(record.dnum, 0);
    }

    #[test]
    fn test_short_row_is_an_error() {
        let err = index().apply(&[1001, 20], &CodeContext::default()).unwrap_err();
        assert!(matches!(err, PipelineError::ShortRow { column: 2, len: 2 }));
    }

    #[test]
    fn test_join_requires_code_table() {
        let registry = Registry::new();
        let mut key = "policies.tbl".to_string();
        registry
            .execute("policies.tbl", "Table", &mut key, &Field::Line("1\t2\t3\t4\t5".into()), None)
            .unwrap();

        let mut ctx = InsuranceResultBuilder.create_context();
        let err = InsuranceResultBuilder
            .consume(&registry, &mut ctx, &Field::PolicyIndex(index()), &mut key)
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingEntry { ref name } if name == "Code"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_join_builds_one_record_per_row() {
        let registry = Registry::new();
        let mut code_key = String::new();
        for (col, text) in [(1, "1001"), (2, "4")] {
            registry
                .execute(names::CODE, "Code", &mut code_key, &Field::cell(col, text), None)
                .unwrap();
        }
        let mut key = "policies.tbl".to_string();
        for line in ["1001\t20\t10\t35\t1000", "2002\t10\t5\t40\t2000"] {
            registry
                .execute("policies.tbl", "Table", &mut key, &Field::Line(line.into()), None)
                .unwrap();
        }

        let mut ctx = InsuranceResultBuilder.create_context();
        InsuranceResultBuilder
            .consume(&registry, &mut ctx, &Field::PolicyIndex(index()), &mut key)
            .unwrap();
        let records = ctx.as_policies().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].dnum, 4);
        assert_eq!(records[1].dnum, 0);
        assert_eq!(records[1].face_amount, 2000);
    }
}
