//! Pricing-ratio table

use std::collections::BTreeMap;
use std::io::{self, Write};

use serde::Serialize;

use super::schema::{append_rows, int_key, Columns, FieldSpec, RowListSchema};
use super::{expect_cell, Field, TableBuilder, TableContext, TableKind};
use crate::error::Result;
use crate::registry::Registry;

/// Text in the reverse column that marks a row as not reversed
const NOT_EXCEEDED: &str = "미초과";

pub type SRatioContext = BTreeMap<i32, Vec<SRatioRow>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SRatioRow {
    pub name: String,
    pub standard_price: f64,
    pub renewal: i32,
    pub sex: i32,
    pub age: i32,
    pub category: i32,
    pub real_category: i32,
    pub due: i32,
    pub real_due: i32,
    pub adjust: f64,
    pub regular: f64,
    pub sratio: f64,
    pub min_s: f64,
    pub apply_alpha: f64,
    pub standard_alpha: f64,
    pub reverse: bool,
}

macro_rules! int_field {
    ($name:literal, $col:expr, $f:ident) => {
        FieldSpec {
            name: $name,
            columns: Columns::At($col),
            set: |r, c| {
                r.$f = c.int()?;
                Ok(())
            },
        }
    };
}

macro_rules! float_field {
    ($name:literal, $col:expr, $f:ident) => {
        FieldSpec {
            name: $name,
            columns: Columns::At($col),
            set: |r, c| {
                r.$f = c.float()?;
                Ok(())
            },
        }
    };
}

static SRATIO_FIELDS: [FieldSpec<SRatioRow>; 16] = [
    FieldSpec {
        name: "name",
        columns: Columns::At(2),
        set: |r, c| {
            r.name = c.string();
            Ok(())
        },
    },
    float_field!("standard_price", 3, standard_price),
    int_field!("renewal", 6, renewal),
    int_field!("sex", 7, sex),
    int_field!("age", 8, age),
    int_field!("category", 11, category),
    int_field!("real_category", 12, real_category),
    int_field!("due", 13, due),
    int_field!("real_due", 14, real_due),
    float_field!("adjust", 15, adjust),
    float_field!("regular", 16, regular),
    float_field!("sratio", 17, sratio),
    float_field!("min_s", 18, min_s),
    float_field!("apply_alpha", 19, apply_alpha),
    float_field!("standard_alpha", 20, standard_alpha),
    FieldSpec {
        name: "reverse",
        columns: Columns::At(21),
        set: |r, c| {
            r.reverse = c.text != NOT_EXCEEDED;
            Ok(())
        },
    },
];

static SRATIO_SCHEMA: RowListSchema<SRatioRow> = RowListSchema {
    key_column: 1,
    open_column: 2,
    fields: &SRATIO_FIELDS,
};

pub struct SRatioBuilder;

impl TableBuilder for SRatioBuilder {
    fn kind(&self) -> TableKind {
        TableKind::SRatio
    }

    fn create_context(&self) -> TableContext {
        TableContext::SRatio(SRatioContext::new())
    }

    fn consume(
        &self,
        _registry: &Registry,
        context: &mut TableContext,
        field: &Field,
        key: &mut String,
    ) -> Result<()> {
        let ratios = context.as_sratio_mut()?;
        let (column, text) = expect_cell(TableKind::SRatio, field)?;
        SRATIO_SCHEMA.consume(ratios, key, column, text, int_key)
    }

    fn merge(
        &self,
        _registry: &Registry,
        target: &mut TableContext,
        source: TableContext,
    ) -> Result<()> {
        append_rows(target.as_sratio_mut()?, source.into_sratio()?);
        Ok(())
    }

    fn render(&self, context: &TableContext, out: &mut dyn Write) -> io::Result<()> {
        let Ok(ratios) = context.as_sratio() else {
            return writeln!(out, "<not an SRatio context>");
        };
        for (dnum, rows) in ratios {
            writeln!(out, "sratio dnum: {}", dnum)?;
            for r in rows {
                writeln!(
                    out,
                    "  name: {} standard_price: {:.6} renewal: {} sex: {} age: {} category: {} \
                     real_category: {} due: {} real_due: {} adjust: {:.6} regular: {:.6} \
                     sratio: {:.6} min_s: {:.6} apply_alpha: {:.6} standard_alpha: {:.6} reverse: {}",
                    r.name,
                    r.standard_price,
                    r.renewal,
                    r.sex,
                    r.age,
                    r.category,
                    r.real_category,
                    r.due,
                    r.real_due,
                    r.adjust,
                    r.regular,
                    r.sratio,
                    r.min_s,
                    r.apply_alpha,
                    r.standard_alpha,
                    r.reverse
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
                SRatioBuilder.consume(&registry, ctx, &Field::cell(*col, *text), &mut key)?;
            }
        }
        Ok(())
    }

    #[test]
    fn test_row_fields_and_reverse_flag() {
        let mut ctx = SRatioBuilder.create_context();
        feed(
            &mut ctx,
            &[
                &[(1, "5"), (2, "basic"), (3, "1200.5"), (7, "1"), (8, "45"), (17, "0.85"), (21, "미초과")],
                &[(1, "5"), (2, "rider"), (21, "초과")],
            ],
        )
        .unwrap();

        let rows = &ctx.as_sratio().unwrap()[&5];
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "basic");
        assert_eq!(rows[0].standard_price, 1200.5);
        assert_eq!(rows[0].sex, 1);
        assert_eq!(rows[0].age, 45);
        assert_eq!(rows[0].sratio, 0.85);
        assert!(!rows[0].reverse);
        assert!(rows[1].reverse);
    }

    #[test]
    fn test_unlisted_columns_are_ignored() {
        let mut ctx = SRatioBuilder.create_context();
        feed(&mut ctx, &[&[(1, "5"), (2, "basic"), (4, "junk"), (9, "junk"), (30, "junk")]]).unwrap();
        assert_eq!(ctx.as_sratio().unwrap()[&5].len(), 1);
    }
}
