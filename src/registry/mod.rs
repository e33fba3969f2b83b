//! Process-wide store of named tables
//!
//! The registry maps a table name to the builder of its kind and to its
//! accumulated context. All of that lives in one immutable [`Snapshot`]
//! behind an [`ArcSwap`]. Writers never mutate a published snapshot: when a
//! name or kind is missing they clone the current one, add what is missing
//! and try to swap the clone in, retrying from a fresh load if another
//! writer got there first. Once a name is present every later call takes
//! the fast path and only touches that name's context lock.

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::Local;
use log::{debug, error, warn};
use parking_lot::RwLock;

use crate::config::DEFAULT_DIAGNOSTICS_DIR;
use crate::error::{PipelineError, Result};
use crate::tables::{builder_for, Field, TableBuilder, TableContext, TableKind};

/// A context shared between snapshot generations
pub type SharedContext = Arc<RwLock<TableContext>>;

/// Builder and context registered under one name
#[derive(Clone)]
pub struct RegistryEntry {
    pub builder: Arc<dyn TableBuilder>,
    pub context: SharedContext,
}

#[derive(Clone, Default)]
struct Snapshot {
    builders: HashMap<String, Arc<dyn TableBuilder>>,
    contexts: HashMap<String, SharedContext>,
    /// One builder per kind, shared by every name of that kind
    kind_cache: HashMap<TableKind, Arc<dyn TableBuilder>>,
}

pub struct Registry {
    snapshot: ArcSwap<Snapshot>,
    diagnostics_dir: PathBuf,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_diagnostics_dir(DEFAULT_DIAGNOSTICS_DIR)
    }

    pub fn with_diagnostics_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
            diagnostics_dir: dir.into(),
        }
    }

    pub fn diagnostics_dir(&self) -> &Path {
        &self.diagnostics_dir
    }

    /// Optimistic copy-on-write registration of `name`.
    ///
    /// Returns the builder and, when `with_context` is set, the shared
    /// context. A name already bound to another kind is never replaced.
    fn ensure(
        &self,
        name: &str,
        kind: TableKind,
        with_context: bool,
    ) -> Result<(Arc<dyn TableBuilder>, Option<SharedContext>)> {
        loop {
            let cur = self.snapshot.load_full();

            if let Some(builder) = cur.builders.get(name) {
                if builder.kind() != kind {
                    return Err(PipelineError::ContextMismatch {
                        expected: kind.as_str(),
                        found: builder.kind().as_str(),
                    });
                }
                match cur.contexts.get(name) {
                    Some(context) => return Ok((builder.clone(), Some(context.clone()))),
                    None if !with_context => return Ok((builder.clone(), None)),
                    None => {}
                }
            }

            let mut next = (*cur).clone();
            let builder = next
                .kind_cache
                .entry(kind)
                .or_insert_with(|| builder_for(kind))
                .clone();
            next.builders
                .entry(name.to_string())
                .or_insert_with(|| builder.clone());
            let context = with_context.then(|| {
                next.contexts
                    .entry(name.to_string())
                    .or_insert_with(|| Arc::new(RwLock::new(builder.create_context())))
                    .clone()
            });

            let prev = self.snapshot.compare_and_swap(&cur, Arc::new(next));
            if Arc::ptr_eq(&prev, &cur) {
                debug!("registered {} as {}", name, kind);
                return Ok((builder, context));
            }
        }
    }

    /// Builder and shared context of `name`, creating whichever is missing
    pub fn entry_or_create(&self, name: &str, kind: TableKind) -> Result<RegistryEntry> {
        let (builder, context) = self.ensure(name, kind, true)?;
        let context = context.ok_or_else(|| PipelineError::MissingEntry {
            name: name.to_string(),
        })?;
        Ok(RegistryEntry { builder, context })
    }

    /// Register `name` as `kind` without creating its context
    pub fn register(&self, name: &str, kind: TableKind) -> Result<Arc<dyn TableBuilder>> {
        self.ensure(name, kind, false).map(|(builder, _)| builder)
    }

    /// Builder for `kind`, registered under `name`.
    ///
    /// Unknown kinds, and names already bound to a different kind, are
    /// logged and yield `None`.
    pub fn get_or_register(&self, name: &str, kind: &str) -> Option<Arc<dyn TableBuilder>> {
        let kind = match kind.parse::<TableKind>() {
            Ok(kind) => kind,
            Err(e) => {
                warn!("{}: {}", name, e);
                return None;
            }
        };
        match self.register(name, kind) {
            Ok(builder) => Some(builder),
            Err(e) => {
                error!("{}: {}", name, e);
                None
            }
        }
    }

    /// Feed one field to the table `name`.
    ///
    /// An unknown kind is logged and leaves the registry untouched.
    pub fn execute(
        &self,
        name: &str,
        kind: &str,
        key: &mut String,
        field: &Field,
        external: Option<&mut TableContext>,
    ) -> Result<()> {
        match kind.parse::<TableKind>() {
            Ok(kind) => self.execute_kind(name, kind, key, field, external),
            Err(e) => {
                error!("{}: {}", name, e);
                Ok(())
            }
        }
    }

    /// Like [`Registry::execute`] with the kind already resolved.
    ///
    /// With an `external` context (a worker's private copy) the shared
    /// context is left alone; only the builder is registered.
    pub fn execute_kind(
        &self,
        name: &str,
        kind: TableKind,
        key: &mut String,
        field: &Field,
        external: Option<&mut TableContext>,
    ) -> Result<()> {
        match external {
            Some(context) => {
                let builder = self.register(name, kind)?;
                builder.consume(self, context, field, key)
            }
            None => {
                let entry = self.entry_or_create(name, kind)?;
                let mut context = entry.context.write();
                entry.builder.consume(self, &mut context, field, key)
            }
        }
    }

    /// Fold worker-local contexts into the shared context of `name`, in
    /// list order
    pub fn merge_contexts(&self, name: &str, contexts: Vec<TableContext>) -> Result<()> {
        let builder = self.builder(name).ok_or_else(|| PipelineError::MissingEntry {
            name: name.to_string(),
        })?;
        let entry = self.entry_or_create(name, builder.kind())?;
        let mut target = entry.context.write();
        for context in contexts {
            entry.builder.merge(self, &mut target, context)?;
        }
        Ok(())
    }

    pub fn context(&self, name: &str) -> Option<SharedContext> {
        self.snapshot.load().contexts.get(name).cloned()
    }

    /// Context of an entry a computation depends on; absence is fatal
    pub fn require_context(&self, name: &str) -> Result<SharedContext> {
        self.context(name).ok_or_else(|| PipelineError::MissingEntry {
            name: name.to_string(),
        })
    }

    pub fn builder(&self, name: &str) -> Option<Arc<dyn TableBuilder>> {
        self.snapshot.load().builders.get(name).cloned()
    }

    pub fn entry(&self, name: &str) -> Option<RegistryEntry> {
        let snapshot = self.snapshot.load();
        Some(RegistryEntry {
            builder: snapshot.builders.get(name)?.clone(),
            context: snapshot.contexts.get(name)?.clone(),
        })
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.snapshot.load().builders.keys().cloned().collect();
        names.sort();
        names
    }

    /// Write a rendering of `name` to `<diagnostics_dir>/<name>.log`.
    ///
    /// Unknown names are a no-op.
    pub fn print(&self, name: &str) -> io::Result<()> {
        let Some(entry) = self.entry(name) else {
            debug!("print: {} is not registered", name);
            return Ok(());
        };

        fs::create_dir_all(&self.diagnostics_dir)?;
        let path = self.diagnostics_path(name);
        let mut out = BufWriter::new(fs::File::create(&path)?);
        writeln!(
            out,
            "# {} ({}) {}",
            name,
            entry.builder.kind(),
            Local::now().format("%Y-%m-%d %H:%M:%S")
        )?;
        entry.builder.render(&entry.context.read(), &mut out)?;
        out.flush()?;
        debug!("printed {} to {}", name, path.display());
        Ok(())
    }

    pub fn diagnostics_path(&self, name: &str) -> PathBuf {
        let file: String = name
            .chars()
            .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
            .collect();
        self.diagnostics_dir.join(format!("{}.log", file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_concurrent_registration_shares_one_builder() {
        let registry = Registry::new();
        let builders: Vec<Arc<dyn TableBuilder>> = thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|i| {
                    let registry = &registry;
                    s.spawn(move || {
                        registry
                            .get_or_register(&format!("Qx{}", i % 4), "Qx")
                            .expect("known kind")
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(builders.iter().all(|b| Arc::ptr_eq(b, &builders[0])));
        assert_eq!(registry.names(), vec!["Qx0", "Qx1", "Qx2", "Qx3"]);
        // Registering a builder does not create a context
        assert!(registry.context("Qx0").is_none());
    }

    #[test]
    fn test_unknown_kind_is_a_no_op() {
        let registry = Registry::new();
        assert!(registry.get_or_register("Sheet1", "Pivot").is_none());

        let mut key = String::new();
        registry
            .execute("Sheet1", "Pivot", &mut key, &Field::cell(1, "x"), None)
            .unwrap();
        assert!(registry.names().is_empty());
        assert!(registry.entry("Sheet1").is_none());
    }

    #[test]
    fn test_name_is_never_rebound_to_another_kind() {
        let registry = Registry::new();
        let mut key = String::new();
        registry
            .execute("Rates", "Qx", &mut key, &Field::cell(1, "QM01"), None)
            .unwrap();
        let err = registry
            .execute("Rates", "Expense", &mut key, &Field::cell(1, "3"), None)
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(registry.get_or_register("Rates", "Expense").is_none());
        assert_eq!(registry.builder("Rates").unwrap().kind(), TableKind::Qx);
    }

    #[test]
    fn test_concurrent_execute_loses_no_rows() {
        let registry = Registry::new();
        thread::scope(|s| {
            for t in 0..8 {
                let registry = &registry;
                s.spawn(move || {
                    let name = format!("Expense{}", t % 2);
                    let mut key = String::new();
                    registry
                        .execute(&name, "Expense", &mut key, &Field::cell(1, "7"), None)
                        .unwrap();
                    for _ in 0..50 {
                        registry
                            .execute(&name, "Expense", &mut key, &Field::cell(2, "10"), None)
                            .unwrap();
                    }
                });
            }
        });

        for name in ["Expense0", "Expense1"] {
            let context = registry.require_context(name).unwrap();
            let guard = context.read();
            assert_eq!(guard.as_expense().unwrap()[&7].len(), 4 * 50);
        }
    }

    #[test]
    fn test_external_context_leaves_shared_untouched() {
        let registry = Registry::new();
        let builder = registry.get_or_register("Expense", "Expense").unwrap();
        let mut local = builder.create_context();
        let mut key = String::new();
        for (col, text) in [(1, "3"), (2, "10")] {
            registry
                .execute("Expense", "Expense", &mut key, &Field::cell(col, text), Some(&mut local))
                .unwrap();
        }
        assert!(registry.context("Expense").is_none());

        registry.merge_contexts("Expense", vec![local]).unwrap();
        let shared = registry.require_context("Expense").unwrap();
        assert_eq!(shared.read().as_expense().unwrap()[&3].len(), 1);
    }

    #[test]
    fn test_merge_requires_registration() {
        let registry = Registry::new();
        let err = registry
            .merge_contexts("Nowhere", vec![TableContext::Qx(Default::default())])
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingEntry { .. }));
    }

    #[test]
    fn test_print_writes_diagnostic_file() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::with_diagnostics_dir(dir.path().join("diag"));
        let mut key = String::new();
        for (col, text) in [(1, "QM01"), (2, "1"), (8, "40"), (9, "0.0012")] {
            registry
                .execute("Qx/male", "Qx", &mut key, &Field::cell(col, text), None)
                .unwrap();
        }

        registry.print("Qx/male").unwrap();
        let text = fs::read_to_string(dir.path().join("diag").join("Qx_male.log")).unwrap();
        assert!(text.starts_with("# Qx/male (Qx)"));
        assert!(text.contains("Qx name: QM01"));

        // Unknown names do nothing
        registry.print("missing").unwrap();
        assert!(!dir.path().join("diag").join("missing.log").exists());
    }
}
