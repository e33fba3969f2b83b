//! Product code table
//!
//! One record per product code. Besides the product metadata a row carries
//! up to 30 sub-table key names (columns 12..=41) and, from column 42 on,
//! `(pay, fst, snd)` loading triples for each of those slots. Whenever a
//! triple value arrives, the product's mortality table is consulted and the
//! rates for that slot's key are copied into a dense age-indexed lookup.
//!
//! Key names are sheet-wide: a triple resolves against the last key name
//! seen for its slot in any earlier row. A worker context only sees its own
//! chunk, so values whose slot has no key name yet are held back and
//! resolved against the keys of earlier chunks when the context is merged.

use std::collections::BTreeMap;
use std::io::{self, Write};

use log::warn;
use serde::Serialize;

use super::mortality::mortality_table_name;
use super::schema::{find_field, int_key, parse_float, CellValue, Columns, FieldSpec};
use super::{expect_cell, Field, TableBuilder, TableContext, TableKind};
use crate::commutation::Sex;
use crate::error::{PipelineError, Result};
use crate::registry::Registry;

/// Ages held in each mortality lookup series
pub const AGE_LIMIT: usize = 120;

const KEY_COLUMN: u32 = 1;
const QX_KEY_FIRST: u32 = 12;
const QX_KEY_LAST: u32 = 41;
const TRIPLE_FIRST: u32 = 42;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CodeContext {
    pub records: BTreeMap<i32, CodeRecord>,
    /// Sub-table key name per slot, shared by every record of the sheet
    pub qx_keys: BTreeMap<usize, String>,
    /// Triple values seen before any key name for their slot
    #[serde(skip)]
    pending: Vec<PendingValue>,
}

#[derive(Debug, Clone)]
struct PendingValue {
    product: i32,
    column: u32,
    text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubCode {
    pub pay: f64,
    pub fst: f64,
    pub snd: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CodeRecord {
    pub dnum: i32,
    pub name: String,
    /// Selects the mortality table, see [`mortality_table_name`]
    pub qx_ku: i32,
    pub mhj: i32,
    pub re: i32,
    pub m_count: i32,
    pub sub_codes: BTreeMap<String, SubCode>,
    /// `mortality[slot][sex][age]`
    pub mortality: BTreeMap<usize, [Vec<f64>; 2]>,
}

impl CodeRecord {
    /// Rate for `slot`, `sex` and `age`; anything not loaded reads as 0
    pub fn mortality_rate(&self, slot: usize, sex: Sex, age: u32) -> f64 {
        self.mortality
            .get(&slot)
            .and_then(|series| series[sex.index()].get(age as usize))
            .copied()
            .unwrap_or(0.0)
    }

    /// Key of the first sub-table, in key order
    pub fn first_sub_code(&self) -> Option<&str> {
        self.sub_codes.keys().next().map(String::as_str)
    }
}

static CODE_FIELDS: [FieldSpec<CodeRecord>; 6] = [
    FieldSpec {
        name: "dnum",
        columns: Columns::At(2),
        set: |r, c| {
            r.dnum = c.int()?;
            Ok(())
        },
    },
    FieldSpec {
        name: "name",
        columns: Columns::At(3),
        set: |r, c| {
            r.name = c.string();
            Ok(())
        },
    },
    FieldSpec {
        name: "qx_ku",
        columns: Columns::At(4),
        set: |r, c| {
            r.qx_ku = c.int()?;
            Ok(())
        },
    },
    FieldSpec {
        name: "mhj",
        columns: Columns::At(5),
        set: |r, c| {
            r.mhj = c.int()?;
            Ok(())
        },
    },
    FieldSpec {
        name: "re",
        columns: Columns::At(6),
        set: |r, c| {
            r.re = c.int()?;
            Ok(())
        },
    },
    FieldSpec {
        name: "m_count",
        columns: Columns::At(11),
        set: |r, c| {
            r.m_count = c.int()?;
            Ok(())
        },
    },
];

pub struct CodeBuilder;

impl TableBuilder for CodeBuilder {
    fn kind(&self) -> TableKind {
        TableKind::Code
    }

    fn create_context(&self) -> TableContext {
        TableContext::Code(CodeContext::default())
    }

    fn consume(
        &self,
        registry: &Registry,
        context: &mut TableContext,
        field: &Field,
        key: &mut String,
    ) -> Result<()> {
        let code = context.as_code_mut()?;
        let (column, text) = expect_cell(TableKind::Code, field)?;

        if column == KEY_COLUMN {
            let product = int_key(text, column)?;
            *key = text.to_string();
            code.records.insert(product, CodeRecord::default());
            code.pending.retain(|p| p.product != product);
            return Ok(());
        }

        let product = int_key(key, KEY_COLUMN)?;
        let record = code
            .records
            .get_mut(&product)
            .ok_or(PipelineError::FieldBeforeRow { column })?;

        if let Some((spec, offset)) = find_field(&CODE_FIELDS, column) {
            return (spec.set)(record, &CellValue { column, offset, text });
        }
        match column {
            QX_KEY_FIRST..=QX_KEY_LAST => {
                if !text.is_empty() {
                    let slot = (column - QX_KEY_FIRST) as usize;
                    code.qx_keys.insert(slot, text.to_string());
                }
                Ok(())
            }
            c if c >= TRIPLE_FIRST && !text.is_empty() => {
                if let Some(qx_key) = code.qx_keys.get(&triple_slot(c)) {
                    return fill_sub_code(registry, record, qx_key, column, text);
                }
                code.pending.push(PendingValue {
                    product,
                    column,
                    text: text.to_string(),
                });
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn merge(
        &self,
        registry: &Registry,
        target: &mut TableContext,
        source: TableContext,
    ) -> Result<()> {
        let target = target.as_code_mut()?;
        let mut source = source.into_code()?;

        // Held-back values take the key names of everything merged so far;
        // values with no key there either are dropped, as in a single pass.
        for value in std::mem::take(&mut source.pending) {
            let Some(qx_key) = target.qx_keys.get(&triple_slot(value.column)) else {
                continue;
            };
            if let Some(record) = source.records.get_mut(&value.product) {
                fill_sub_code(registry, record, qx_key, value.column, &value.text)?;
            }
        }

        target.records.extend(source.records);
        target.qx_keys.extend(source.qx_keys);
        Ok(())
    }

    fn render(&self, context: &TableContext, out: &mut dyn Write) -> io::Result<()> {
        let Ok(code) = context.as_code() else {
            return writeln!(out, "<not a Code context>");
        };
        for (product, r) in &code.records {
            writeln!(out, "Code Index: {}", product)?;
            writeln!(out, "  dnum: {}", r.dnum)?;
            writeln!(out, "  name: {}", r.name)?;
            writeln!(out, "  qx_ku: {}", r.qx_ku)?;
            writeln!(out, "  mhj: {}", r.mhj)?;
            writeln!(out, "  re: {}", r.re)?;
            writeln!(out, "  m_count: {}", r.m_count)?;
            writeln!(out, "  sub_code_table:")?;
            for (qx_key, sub) in &r.sub_codes {
                writeln!(
                    out,
                    "    qx_key={}: pay={:.2}, fst={:.2}, snd={:.2}",
                    qx_key, sub.pay, sub.fst, sub.snd
                )?;
            }
            writeln!(out, "-----------------------------------")?;
        }
        Ok(())
    }
}

fn triple_slot(column: u32) -> usize {
    (column - TRIPLE_FIRST) as usize / 3
}

/// Apply one non-empty `(pay, fst, snd)` triple value under `qx_key` and
/// load that slot's mortality.
fn fill_sub_code(
    registry: &Registry,
    record: &mut CodeRecord,
    qx_key: &str,
    column: u32,
    text: &str,
) -> Result<()> {
    let offset = (column - TRIPLE_FIRST) as usize;
    let slot = offset / 3;

    let table_name = mortality_table_name(record.qx_ku);
    match registry.context(&table_name) {
        Some(shared) => {
            let guard = shared.read();
            if let Some(rows) = guard.as_qx()?.get(qx_key) {
                let series = record
                    .mortality
                    .entry(slot)
                    .or_insert_with(|| [vec![0.0; AGE_LIMIT], vec![0.0; AGE_LIMIT]]);
                for row in rows.iter().filter(|r| (0..AGE_LIMIT as i32).contains(&r.age)) {
                    series[Sex::Male.index()][row.age as usize] = row.male;
                    series[Sex::Female.index()][row.age as usize] = row.female;
                }
            }
        }
        None => warn!("mortality table {} not found for qx_key {}", table_name, qx_key),
    }

    let value = parse_float(text, column)?;
    let sub = record.sub_codes.entry(qx_key.to_string()).or_default();
    match offset % 3 {
        0 => sub.pay = value,
        1 => sub.fst = value,
        _ => sub.snd = value,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(registry: &Registry, ctx: &mut TableContext, rows: &[&[(u32, &str)]]) -> Result<()> {
        for row in rows {
            let mut key = String::new();
            for (col, text) in row.iter() {
                CodeBuilder.consume(registry, ctx, &Field::cell(*col, *text), &mut key)?;
            }
        }
        Ok(())
    }

    fn load_qx(registry: &Registry, name: &str, rows: &[&[(u32, &str)]]) {
        for row in rows {
            let mut key = String::new();
            for (col, text) in row.iter() {
                registry
                    .execute(name, "Qx", &mut key, &Field::cell(*col, *text), None)
                    .unwrap();
            }
        }
    }

    #[test]
    fn test_metadata_and_sub_codes() {
        let registry = Registry::new();
        load_qx(
            &registry,
            "Qx",
            &[
                &[(1, "QM01"), (2, "1"), (8, "40"), (9, "0.0012"), (10, "0.0008")],
                &[(1, "QM01"), (2, "1"), (8, "41"), (9, "0.0013"), (10, "0.0009")],
            ],
        );

        let mut ctx = CodeBuilder.create_context();
        feed(
            &registry,
            &mut ctx,
            &[&[
                (1, "1001"),
                (2, "3"),
                (3, "term life"),
                (4, "0"),
                (11, "1"),
                (12, "QM01"),
                (42, "0.5"),
                (43, "0.25"),
                (44, "0.125"),
            ]],
        )
        .unwrap();

        let code = ctx.as_code().unwrap();
        let record = &code.records[&1001];
        assert_eq!(record.dnum, 3);
        assert_eq!(record.name, "term life");
        assert_eq!(record.m_count, 1);
        assert_eq!(record.first_sub_code(), Some("QM01"));
        assert_eq!(
            record.sub_codes["QM01"],
            SubCode { pay: 0.5, fst: 0.25, snd: 0.125 }
        );
        assert_eq!(record.mortality_rate(0, Sex::Male, 40), 0.0012);
        assert_eq!(record.mortality_rate(0, Sex::Female, 41), 0.0009);
        assert_eq!(record.mortality_rate(0, Sex::Male, 39), 0.0);
        assert_eq!(record.mortality_rate(3, Sex::Male, 40), 0.0);
    }

    #[test]
    fn test_missing_mortality_table_is_skipped() {
        let registry = Registry::new();
        let mut ctx = CodeBuilder.create_context();
        feed(
            &registry,
            &mut ctx,
            &[&[(1, "7"), (4, "2"), (12, "QX9"), (42, "1.5")]],
        )
        .unwrap();

        let record = &ctx.as_code().unwrap().records[&7];
        assert_eq!(record.sub_codes["QX9"].pay, 1.5);
        assert!(record.mortality.is_empty());
    }

    #[test]
    fn test_triple_without_slot_key_is_ignored() {
        let registry = Registry::new();
        let mut ctx = CodeBuilder.create_context();
        feed(&registry, &mut ctx, &[&[(1, "7"), (45, "2.0"), (30, "")]]).unwrap();

        let code = ctx.as_code().unwrap();
        assert!(code.records[&7].sub_codes.is_empty());
        assert!(code.qx_keys.is_empty());
    }

    #[test]
    fn test_merge_unions_records() {
        let registry = Registry::new();
        let mut a = CodeBuilder.create_context();
        let mut b = CodeBuilder.create_context();
        feed(&registry, &mut a, &[&[(1, "1"), (2, "10")]]).unwrap();
        feed(&registry, &mut b, &[&[(1, "2"), (2, "20"), (12, "K")]]).unwrap();
        CodeBuilder.merge(&registry, &mut a, b).unwrap();

        let code = a.as_code().unwrap();
        assert_eq!(code.records.len(), 2);
        assert_eq!(code.records[&2].dnum, 20);
        assert_eq!(code.qx_keys[&0], "K");
    }

    #[test]
    fn test_merge_resolves_values_against_earlier_key_names() {
        let registry = Registry::new();
        load_qx(
            &registry,
            "Qx",
            &[
                &[(1, "QM01"), (2, "1"), (8, "40"), (9, "0.0012"), (10, "0.0008")],
                &[(1, "QM02"), (2, "1"), (8, "40"), (9, "0.0030"), (10, "0.0020")],
            ],
        );
        let first: &[&[(u32, &str)]] = &[&[(1, "1"), (4, "0"), (12, "QM01"), (42, "0.5")]];
        let second: &[&[(u32, &str)]] = &[
            &[(1, "2"), (4, "0"), (42, "0.7")],
            &[(1, "3"), (4, "0"), (12, "QM02"), (42, "0.9")],
        ];

        let mut single = CodeBuilder.create_context();
        feed(&registry, &mut single, first).unwrap();
        feed(&registry, &mut single, second).unwrap();

        let mut merged = CodeBuilder.create_context();
        let mut a = CodeBuilder.create_context();
        let mut b = CodeBuilder.create_context();
        feed(&registry, &mut a, first).unwrap();
        feed(&registry, &mut b, second).unwrap();
        // Product 2 has no key name inside its own chunk
        assert!(b.as_code().unwrap().records[&2].sub_codes.is_empty());
        CodeBuilder.merge(&registry, &mut merged, a).unwrap();
        CodeBuilder.merge(&registry, &mut merged, b).unwrap();

        let single = single.as_code().unwrap();
        let merged = merged.as_code().unwrap();
        for product in [1, 2, 3] {
            let (s, m) = (&single.records[&product], &merged.records[&product]);
            assert_eq!(m.sub_codes, s.sub_codes, "product {}", product);
            assert_eq!(m.mortality, s.mortality, "product {}", product);
        }
        assert_eq!(merged.records[&2].sub_codes["QM01"].pay, 0.7);
        assert_eq!(merged.records[&2].mortality_rate(0, Sex::Male, 40), 0.0012);
        assert_eq!(merged.records[&3].first_sub_code(), Some("QM02"));
        assert_eq!(merged.qx_keys[&0], "QM02");
    }

    #[test]
    fn test_merge_drops_values_without_any_key_name() {
        let registry = Registry::new();
        let mut target = CodeBuilder.create_context();
        let mut worker = CodeBuilder.create_context();
        feed(&registry, &mut worker, &[&[(1, "5"), (42, "1.0")]]).unwrap();
        CodeBuilder.merge(&registry, &mut target, worker).unwrap();

        let code = target.as_code().unwrap();
        assert!(code.records[&5].sub_codes.is_empty());
        assert!(code.pending.is_empty());
    }
}
