//! Row ingestion into registry tables
//!
//! In multi-threaded mode the declared rows are cut into contiguous chunks,
//! one per worker. Each worker fills a private context from its chunk and
//! the contexts are merged into the shared entry in worker order once every
//! chunk is done, so nothing is locked per record. The single-threaded path
//! feeds the shared context directly.

use std::ops::Range;
use std::time::{Duration, Instant};

use log::{debug, error, info};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::config::{ExecutionMode, PipelineConfig};
use crate::error::Result;
use crate::registry::Registry;
use crate::source::{CellRange, RowSource};
use crate::tables::{Field, TableContext, TableKind};

/// What one ingestion pass did
#[derive(Debug, Clone)]
pub struct IngestSummary {
    pub name: String,
    pub kind: TableKind,
    pub rows: u32,
    /// Non-empty fields handed to the builder
    pub fields: usize,
    pub workers: usize,
    pub elapsed: Duration,
}

/// Split rows `start..=end` into at most `workers` contiguous chunks.
///
/// Every chunk gets `rows / workers` rows and the first `rows % workers`
/// chunks one more. Empty chunks are dropped.
pub fn partition_rows(start: u32, end: u32, workers: usize) -> Vec<Range<u32>> {
    if end < start {
        return Vec::new();
    }
    let rows = (end - start + 1) as usize;
    let workers = workers.max(1);
    let base = rows / workers;
    let extra = rows % workers;

    let mut chunks = Vec::with_capacity(workers.min(rows));
    let mut next = start;
    for w in 0..workers {
        let len = (base + usize::from(w < extra)) as u32;
        if len == 0 {
            break;
        }
        chunks.push(next..next + len);
        next += len;
    }
    chunks
}

pub struct IngestEngine {
    pool: ThreadPool,
    workers: usize,
}

impl IngestEngine {
    pub fn new(workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("ingest-{}", i))
            .build()?;
        Ok(Self { pool, workers })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Self::new(config.workers)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Feed every non-empty cell of `range` to the table `name`.
    ///
    /// Cells reach the builder row by row, left to right, and the running
    /// key starts empty on each row. The first failing row aborts the batch;
    /// in multi-threaded mode the shared context is then left untouched.
    pub fn ingest_sheet<S: RowSource + ?Sized>(
        &self,
        registry: &Registry,
        name: &str,
        kind: TableKind,
        source: &S,
        range: &CellRange,
        mode: ExecutionMode,
    ) -> Result<IngestSummary> {
        let columns = range.col_start..=range.col_end;
        self.drive(
            registry,
            name,
            kind,
            range.row_start..range.row_end + 1,
            mode,
            "",
            |row, key, mut context| {
                let mut fields = 0;
                for column in columns.clone() {
                    let Some(text) = source.read_cell(row, column) else {
                        continue;
                    };
                    let field = Field::cell(column, text);
                    if let Err(e) = registry.execute_kind(name, kind, key, &field, context.as_deref_mut()) {
                        error!("{} row {} column {} ({:?}): {}", name, row, column, text, e);
                        return Err(e);
                    }
                    fields += 1;
                }
                Ok(fields)
            },
        )
    }

    /// Feed text lines to the raw table `name`, keyed by `name` itself
    pub fn ingest_lines(
        &self,
        registry: &Registry,
        name: &str,
        lines: &[String],
        mode: ExecutionMode,
    ) -> Result<IngestSummary> {
        self.drive(
            registry,
            name,
            TableKind::Table,
            1..lines.len() as u32 + 1,
            mode,
            name,
            |row, key, context| {
                let line = &lines[row as usize - 1];
                let field = Field::Line(line.clone());
                if let Err(e) = registry.execute_kind(name, TableKind::Table, key, &field, context) {
                    error!("{} line {}: {}", name, row, e);
                    return Err(e);
                }
                Ok(1)
            },
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn drive<F>(
        &self,
        registry: &Registry,
        name: &str,
        kind: TableKind,
        rows: Range<u32>,
        mode: ExecutionMode,
        initial_key: &str,
        feed: F,
    ) -> Result<IngestSummary>
    where
        F: Fn(u32, &mut String, Option<&mut TableContext>) -> Result<usize> + Sync,
    {
        let start = Instant::now();
        let row_count = rows.len() as u32;

        let run_chunk = |chunk: Range<u32>, mut context: Option<&mut TableContext>| -> Result<usize> {
            let mut fields = 0;
            for row in chunk {
                let mut key = initial_key.to_string();
                fields += feed(row, &mut key, context.as_deref_mut()).map_err(|e| e.at_row(name, row))?;
            }
            Ok(fields)
        };

        let (fields, workers) = match mode {
            ExecutionMode::SingleThread => {
                registry.entry_or_create(name, kind)?;
                (run_chunk(rows, None)?, 1)
            }
            ExecutionMode::MultiThread => {
                let builder = registry.register(name, kind)?;
                let chunks = partition_rows(rows.start, rows.end.saturating_sub(1), self.workers);
                let workers = chunks.len();
                debug!("{}: {} rows over {} workers", name, row_count, workers);

                let results: Vec<_> = self.pool.install(|| {
                    chunks
                        .into_par_iter()
                        .map(|chunk| -> Result<(TableContext, usize)> {
                            let mut context = builder.create_context();
                            let fields = run_chunk(chunk, Some(&mut context))?;
                            Ok((context, fields))
                        })
                        .collect()
                });

                let mut contexts = Vec::with_capacity(results.len());
                let mut fields = 0;
                for result in results {
                    let (context, n) = result?;
                    contexts.push(context);
                    fields += n;
                }
                registry.merge_contexts(name, contexts)?;
                (fields, workers)
            }
        };

        let summary = IngestSummary {
            name: name.to_string(),
            kind,
            rows: row_count,
            fields,
            workers,
            elapsed: start.elapsed(),
        };
        info!(
            "{} ({}): {} rows, {} fields, {} workers in {:?}",
            summary.name, summary.kind, summary.rows, summary.fields, summary.workers, summary.elapsed
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commutation::Sex;
    use crate::source::{parse_range, Sheet};
    use crate::PipelineError;

    fn render(registry: &Registry, name: &str) -> String {
        let entry = registry.entry(name).unwrap();
        let mut out = Vec::new();
        entry.builder.render(&entry.context.read(), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn qx_sheet() -> Sheet {
        let mut rows: Vec<Vec<String>> = vec![vec!["table".into(), "class".into()]];
        for i in 0..23 {
            let key = if i % 3 == 0 { "QF01" } else { "QM01" };
            rows.push(vec![
                key.to_string(),
                (i % 4 + 1).to_string(),
                String::new(),
                String::new(),
                String::new(),
                String::new(),
                String::new(),
                (20 + i).to_string(),
                format!("0.00{}", i + 1),
                format!("0.000{}", i + 1),
            ]);
        }
        Sheet::new(rows)
    }

    /// Six products; only the first row names the sub-tables
    fn code_sheet() -> Sheet {
        let mut rows: Vec<Vec<String>> = vec![vec!["code".into()]];
        for i in 0..6 {
            let mut row = vec![String::new(); 45];
            row[0] = (1001 + i).to_string();
            row[1] = (i + 1).to_string();
            row[3] = "0".into();
            if i == 0 {
                row[11] = "QM01".into();
                row[12] = "QF01".into();
            }
            row[41] = format!("0.{}", i + 1);
            row[44] = "1.5".into();
            rows.push(row);
        }
        Sheet::new(rows)
    }

    fn load(registry: &Registry, workers: usize, mode: ExecutionMode) {
        let engine = IngestEngine::new(workers).unwrap();
        let qx_range = parse_range("A2:J24").unwrap();
        engine
            .ingest_sheet(registry, "Qx", TableKind::Qx, &qx_sheet(), &qx_range, mode)
            .unwrap();
        let code_range = parse_range("A2:AS7").unwrap();
        engine
            .ingest_sheet(registry, "Code", TableKind::Code, &code_sheet(), &code_range, mode)
            .unwrap();
    }

    #[test]
    fn test_partition_gives_remainder_to_first_workers() {
        let sizes: Vec<usize> = partition_rows(1, 10, 3).iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![4, 3, 3]);
        assert_eq!(partition_rows(5, 14, 3)[0], 5..9);
        assert_eq!(partition_rows(5, 14, 3)[2], 12..15);

        // More workers than rows
        assert_eq!(partition_rows(1, 2, 8), vec![1..2, 2..3]);
        assert!(partition_rows(3, 2, 4).is_empty());
        assert_eq!(partition_rows(1, 4, 0), vec![1..5]);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let sheet = qx_sheet();
        let range = parse_range("A2:J24").unwrap();

        let sequential = Registry::new();
        IngestEngine::new(1)
            .unwrap()
            .ingest_sheet(&sequential, "Qx", TableKind::Qx, &sheet, &range, ExecutionMode::SingleThread)
            .unwrap();

        for workers in [2, 3, 5, 8, 40] {
            let parallel = Registry::new();
            let summary = IngestEngine::new(workers)
                .unwrap()
                .ingest_sheet(&parallel, "Qx", TableKind::Qx, &sheet, &range, ExecutionMode::MultiThread)
                .unwrap();
            assert_eq!(summary.rows, 23);
            assert_eq!(summary.workers, workers.min(23));
            assert_eq!(render(&parallel, "Qx"), render(&sequential, "Qx"), "workers = {}", workers);
        }

        let context = sequential.require_context("Qx").unwrap();
        let guard = context.read();
        let tables = guard.as_qx().unwrap();
        assert_eq!(tables["QF01"].len(), 8);
        assert_eq!(tables["QM01"].len(), 15);
    }

    #[test]
    fn test_parallel_code_matches_sequential() {
        let sequential = Registry::new();
        load(&sequential, 1, ExecutionMode::SingleThread);
        let expected = sequential.require_context("Code").unwrap();
        let expected = expected.read();
        let expected = expected.as_code().unwrap();
        assert_eq!(expected.records.len(), 6);
        for record in expected.records.values() {
            assert_eq!(record.sub_codes.len(), 2);
            assert_eq!(record.first_sub_code(), Some("QF01"));
            assert!(record.mortality_rate(0, Sex::Male, 21) > 0.0);
        }

        for workers in [2, 3, 5, 8] {
            let parallel = Registry::new();
            load(&parallel, workers, ExecutionMode::MultiThread);
            assert_eq!(render(&parallel, "Code"), render(&sequential, "Code"), "workers = {}", workers);

            let actual = parallel.require_context("Code").unwrap();
            let actual = actual.read();
            let actual = actual.as_code().unwrap();
            for (product, record) in &expected.records {
                let other = &actual.records[product];
                assert_eq!(other.sub_codes, record.sub_codes, "workers = {}", workers);
                assert_eq!(other.mortality, record.mortality, "workers = {}", workers);
            }
        }
    }

    #[test]
    fn test_bad_cell_aborts_parallel_batch() {
        let sheet = Sheet::from_rows(&[
            &["1", "10", "0.1"],
            &["1", "20", "0.2"],
            &["2", "10", "zero"],
            &["2", "20", "0.4"],
        ]);
        let range = parse_range("A1:C4").unwrap();
        let registry = Registry::new();
        let err = IngestEngine::new(2)
            .unwrap()
            .ingest_sheet(&registry, "Expense", TableKind::Expense, &sheet, &range, ExecutionMode::MultiThread)
            .unwrap_err();

        match err {
            PipelineError::Ingest { table, row, source } => {
                assert_eq!(table, "Expense");
                assert_eq!(row, 3);
                assert!(matches!(*source, PipelineError::Parse { column: 3, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(registry.context("Expense").is_none());
    }

    #[test]
    fn test_sequential_keeps_rows_before_failure() {
        let sheet = Sheet::from_rows(&[&["1", "10", "0.1"], &["2", "20", "x"], &["3", "30", "0.3"]]);
        let range = parse_range("A1:C3").unwrap();
        let registry = Registry::new();
        let err = IngestEngine::new(1)
            .unwrap()
            .ingest_sheet(&registry, "Expense", TableKind::Expense, &sheet, &range, ExecutionMode::SingleThread)
            .unwrap_err();
        assert!(!err.is_fatal());

        let context = registry.require_context("Expense").unwrap();
        let guard = context.read();
        let schedules = guard.as_expense().unwrap();
        assert_eq!(schedules[&1].len(), 1);
        assert_eq!(schedules[&1][0].loading.alpha, 0.1);
        assert!(!schedules.contains_key(&3));
    }

    #[test]
    fn test_lines_land_under_file_key() {
        let lines: Vec<String> = ["1\t2\t3", "4\t5\r", "6"].iter().map(|s| s.to_string()).collect();
        for mode in [ExecutionMode::SingleThread, ExecutionMode::MultiThread] {
            let registry = Registry::new();
            let summary = IngestEngine::new(2)
                .unwrap()
                .ingest_lines(&registry, "a.tbl", &lines, mode)
                .unwrap();
            assert_eq!(summary.rows, 3);

            let context = registry.require_context("a.tbl").unwrap();
            let guard = context.read();
            assert_eq!(guard.as_table().unwrap()["a.tbl"], vec![vec![1, 2, 3], vec![4], vec![6]]);
        }
    }

    #[test]
    fn test_empty_range_still_creates_context() {
        let sheet = Sheet::default();
        let range = CellRange { row_start: 1, row_end: 0, col_start: 1, col_end: 3 };
        let registry = Registry::new();
        let summary = IngestEngine::new(4)
            .unwrap()
            .ingest_sheet(&registry, "Code", TableKind::Code, &sheet, &range, ExecutionMode::MultiThread)
            .unwrap();
        assert_eq!(summary.rows, 0);
        assert!(registry.context("Code").is_some());
    }
}
