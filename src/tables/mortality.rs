//! Mortality / lapse rate tables keyed by table name

use std::collections::BTreeMap;
use std::io::{self, Write};

use serde::Serialize;

use super::schema::{append_rows, text_key, Columns, FieldSpec, RowListSchema};
use super::{expect_cell, Field, TableBuilder, TableContext, TableKind};
use crate::commutation::Sex;
use crate::error::Result;
use crate::registry::Registry;

/// Rows grouped by table key, in arrival order
pub type QxContext = BTreeMap<String, Vec<QxRow>>;

/// One risk-class row of a rate table
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QxRow {
    pub risk_class: i32,
    pub driver: i32,
    /// Demographic sub-keys
    pub sub: [i32; 4],
    pub age: i32,
    pub male: f64,
    pub female: f64,
    pub label: String,
}

impl QxRow {
    pub fn rate(&self, sex: Sex) -> f64 {
        match sex {
            Sex::Male => self.male,
            Sex::Female => self.female,
        }
    }
}

/// Registry name of the mortality table selected by a product's `qx_ku`
pub fn mortality_table_name(qx_ku: i32) -> String {
    if qx_ku == 0 {
        "Qx".to_string()
    } else {
        format!("Qx{}", qx_ku)
    }
}

static QX_FIELDS: [FieldSpec<QxRow>; 7] = [
    FieldSpec {
        name: "risk_class",
        columns: Columns::At(2),
        set: |row, cell| {
            row.risk_class = cell.int()?;
            Ok(())
        },
    },
    FieldSpec {
        name: "driver",
        columns: Columns::At(3),
        set: |row, cell| {
            row.driver = cell.int()?;
            Ok(())
        },
    },
    FieldSpec {
        name: "sub",
        columns: Columns::Span(4, 7),
        set: |row, cell| {
            row.sub[cell.offset] = cell.int()?;
            Ok(())
        },
    },
    FieldSpec {
        name: "age",
        columns: Columns::At(8),
        set: |row, cell| {
            row.age = cell.int()?;
            Ok(())
        },
    },
    FieldSpec {
        name: "male",
        columns: Columns::At(9),
        set: |row, cell| {
            row.male = cell.float()?;
            Ok(())
        },
    },
    FieldSpec {
        name: "female",
        columns: Columns::At(10),
        set: |row, cell| {
            row.female = cell.float()?;
            Ok(())
        },
    },
    FieldSpec {
        name: "label",
        columns: Columns::At(11),
        set: |row, cell| {
            row.label = cell.string();
            Ok(())
        },
    },
];

static QX_SCHEMA: RowListSchema<QxRow> = RowListSchema {
    key_column: 1,
    open_column: 2,
    fields: &QX_FIELDS,
};

pub struct QxBuilder;

impl TableBuilder for QxBuilder {
    fn kind(&self) -> TableKind {
        TableKind::Qx
    }

    fn create_context(&self) -> TableContext {
        TableContext::Qx(QxContext::new())
    }

    fn consume(
        &self,
        _registry: &Registry,
        context: &mut TableContext,
        field: &Field,
        key: &mut String,
    ) -> Result<()> {
        let tables = context.as_qx_mut()?;
        let (column, text) = expect_cell(TableKind::Qx, field)?;
        QX_SCHEMA.consume(tables, key, column, text, text_key)
    }

    fn merge(
        &self,
        _registry: &Registry,
        target: &mut TableContext,
        source: TableContext,
    ) -> Result<()> {
        append_rows(target.as_qx_mut()?, source.into_qx()?);
        Ok(())
    }

    fn render(&self, context: &TableContext, out: &mut dyn Write) -> io::Result<()> {
        let Ok(tables) = context.as_qx() else {
            return writeln!(out, "<not a Qx context>");
        };
        for (name, rows) in tables {
            writeln!(out, "Qx name: {}", name)?;
            for r in rows {
                writeln!(
                    out,
                    "  risk_class: {} driver: {} sub: {:?} age: {} male: {:.6} female: {:.6} label: {}",
                    r.risk_class, r.driver, r.sub, r.age, r.male, r.female, r.label
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(ctx: &mut TableContext, rows: &[&[(u32, &str)]]) -> Result<()> {
        let registry = Registry::new();
        for row in rows {
            let mut key = String::new();
            for (col, text) in row.iter() {
                QxBuilder.consume(&registry, ctx, &Field::cell(*col, *text), &mut key)?;
            }
        }
        Ok(())
    }

    #[test]
    fn test_rows_collect_under_table_key() {
        let mut ctx = QxBuilder.create_context();
        feed(
            &mut ctx,
            &[
                &[(1, "QM01"), (2, "1"), (4, "2"), (7, "5"), (8, "40"), (9, "0.0012"), (10, "0.0008"), (11, "std")],
                &[(1, "QM01"), (2, "1"), (8, "41"), (9, "0.0013"), (10, "0.0009")],
                &[(1, "QF02"), (2, "3"), (8, "40"), (9, "0.002")],
            ],
        )
        .unwrap();

        let tables = ctx.as_qx().unwrap();
        assert_eq!(tables.len(), 2);
        let qm = &tables["QM01"];
        assert_eq!(qm.len(), 2);
        assert_eq!(qm[0].sub, [2, 0, 0, 5]);
        assert_eq!(qm[0].label, "std");
        assert_eq!(qm[1].age, 41);
        assert_eq!(qm[1].rate(Sex::Female), 0.0009);
        assert_eq!(tables["QF02"][0].risk_class, 3);
    }

    #[test]
    fn test_bad_rate_is_a_parse_error() {
        let mut ctx = QxBuilder.create_context();
        let err = feed(&mut ctx, &[&[(1, "QM01"), (2, "1"), (9, "n/a")]]).unwrap_err();
        assert!(matches!(err, crate::PipelineError::Parse { column: 9, .. }));
    }

    #[test]
    fn test_merge_appends_per_key() {
        let mut a = QxBuilder.create_context();
        let mut b = QxBuilder.create_context();
        feed(&mut a, &[&[(1, "QM01"), (2, "1"), (8, "40")]]).unwrap();
        feed(&mut b, &[&[(1, "QM01"), (2, "1"), (8, "41")], &[(1, "QF02"), (2, "1")]]).unwrap();

        QxBuilder.merge(&Registry::new(), &mut a, b).unwrap();
        let tables = a.as_qx().unwrap();
        let ages: Vec<i32> = tables["QM01"].iter().map(|r| r.age).collect();
        assert_eq!(ages, vec![40, 41]);
        assert!(tables.contains_key("QF02"));
    }

    #[test]
    fn test_table_name_for_selector() {
        assert_eq!(mortality_table_name(0), "Qx");
        assert_eq!(mortality_table_name(2), "Qx2");
    }
}
