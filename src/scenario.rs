//! Scenario runner for batch table builds
//!
//! A scenario is a JSON file with an optional `environment` block and an
//! ordered list of commands. Each command reads sheets or text tables into
//! the registry, or builds a derived table from what is already there.
//! Relative paths are resolved against the scenario file's directory.

use std::fs;
use std::path::{Path, PathBuf};

use log::{error, info, warn};
use serde::Deserialize;

use crate::config::{ExecutionMode, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::ingest::IngestEngine;
use crate::registry::Registry;
use crate::source::{parse_coordinates, parse_range, read_table_lines, Sheet};
use crate::tables::{names, Field, InputBinding, OutputIndex, PolicyIndex, TableKind};

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub environment: Option<EnvironmentBlock>,
    #[serde(default)]
    pub scenario: Vec<Command>,
}

/// Settings applied before the first command
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvironmentBlock {
    /// `"single"` or `"multi"`
    pub core_type: Option<String>,
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Change an environment value for the commands that follow
    Environments { name: String, value: String },
    ReadSheets { sheets: Vec<SheetSpec> },
    /// Read a tab-separated file into a raw table of the same name
    ReadTbl { name: String },
    CalcInsuranceExpense {
        name: String,
        #[serde(default)]
        variables: Vec<Variable>,
    },
    CalcExpenseOutput,
    CalcInsuranceOutput {
        files: Vec<OutputFile>,
        #[serde(default)]
        interest_rate: Option<f64>,
    },
}

impl Command {
    pub fn label(&self) -> &'static str {
        match self {
            Command::Environments { .. } => "environments",
            Command::ReadSheets { .. } => "read_sheets",
            Command::ReadTbl { .. } => "read_tbl",
            Command::CalcInsuranceExpense { .. } => "calc_insurance_expense",
            Command::CalcExpenseOutput => "calc_expense_output",
            Command::CalcInsuranceOutput { .. } => "calc_insurance_output",
        }
    }
}

/// A CSV file standing in for one worksheet
#[derive(Debug, Clone, Deserialize)]
pub struct SheetSpec {
    pub path: PathBuf,
    pub name: String,
    pub range: String,
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputFile {
    pub name: String,
    #[serde(default)]
    pub variables: Vec<Variable>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Variable {
    pub name: String,
    pub index: VariableIndex,
}

/// A column number, or one or more binding strings
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum VariableIndex {
    Column(usize),
    One(String),
    Many(Vec<String>),
}

impl VariableIndex {
    fn column(&self, variable: &str) -> Result<usize> {
        let bad = || PipelineError::Config(format!("variable {} needs a column index", variable));
        match self {
            VariableIndex::Column(c) => Ok(*c),
            VariableIndex::One(text) => text.trim().parse().map_err(|_| bad()),
            VariableIndex::Many(_) => Err(bad()),
        }
    }

    fn texts(&self) -> Vec<String> {
        match self {
            VariableIndex::Column(c) => vec![c.to_string()],
            VariableIndex::One(text) => vec![text.clone()],
            VariableIndex::Many(texts) => texts.clone(),
        }
    }
}

impl Scenario {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = fs::File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Column bindings for the policy-parameter join
pub fn policy_index(variables: &[Variable]) -> Result<PolicyIndex> {
    let mut columns: [Option<usize>; 5] = [None; 5];
    let mut generic_premium = Vec::new();

    for v in variables {
        let slot = match v.name.as_str() {
            "bojong" => 0,
            "nn" => 1,
            "mm" => 2,
            "x" => 3,
            "AMT" => 4,
            "GP_Input" => {
                for text in v.index.texts() {
                    let coords = parse_coordinates(&text)?;
                    let [r, c, source] = coords.as_slice() else {
                        return Err(PipelineError::Config(format!(
                            "GP_Input {:?} is not row:column:index",
                            text
                        )));
                    };
                    generic_premium.push([*r as usize, *c as usize, *source as usize]);
                }
                continue;
            }
            other => {
                warn!("ignoring unknown policy variable {}", other);
                continue;
            }
        };
        columns[slot] = Some(v.index.column(&v.name)?);
    }

    let require = |slot: usize, name: &str| {
        columns[slot].ok_or_else(|| PipelineError::Config(format!("policy variable {} is not bound", name)))
    };
    Ok(PolicyIndex {
        product_code: require(0, "bojong")?,
        term: require(1, "nn")?,
        payment_period: require(2, "mm")?,
        entry_age: require(3, "x")?,
        face_amount: require(4, "AMT")?,
        generic_premium,
    })
}

/// Raw-table bindings for output assembly
pub fn output_index(variables: &[Variable], interest_rate: Option<f64>) -> Result<OutputIndex> {
    let mut index = OutputIndex {
        interest_rate,
        ..Default::default()
    };
    for v in variables {
        let binding = match v.name.as_str() {
            "tVn_Input" => &mut index.tvn,
            "Alpha_ALD_Input" => &mut index.alpha_ald,
            "NP_beta_Input" => &mut index.np_beta,
            "STD_NP_Input" => &mut index.std_np,
            other => {
                warn!("ignoring unknown output variable {}", other);
                continue;
            }
        };
        *binding = InputBinding::parse(&v.index.texts())?;
    }
    Ok(index)
}

/// Outcome of a scenario run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub commands: usize,
    /// Commands whose batch was aborted by a non-fatal error
    pub failed: usize,
}

/// Runs scenario commands against one registry.
///
/// # Example
/// ```ignore
/// let scenario = Scenario::from_path("scenario.json")?;
/// let mut runner = ScenarioRunner::new(PipelineConfig::default())?.with_base_dir(".");
/// runner.run(&scenario)?;
/// let outputs = runner.registry().require_context(names::INSURANCE_OUTPUT)?;
/// ```
pub struct ScenarioRunner {
    registry: Registry,
    config: PipelineConfig,
    engine: IngestEngine,
    base_dir: PathBuf,
}

impl ScenarioRunner {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Ok(Self {
            registry: Registry::with_diagnostics_dir(config.diagnostics_dir.clone()),
            engine: IngestEngine::from_config(&config)?,
            config,
            base_dir: PathBuf::from("."),
        })
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every command in order.
    ///
    /// A fatal error stops the run and is returned. Any other error is
    /// logged, aborts only that command, and is counted in the report.
    pub fn run(&mut self, scenario: &Scenario) -> Result<RunReport> {
        if let Some(env) = &scenario.environment {
            self.apply_environment(env)?;
        }

        let mut report = RunReport::default();
        for command in &scenario.scenario {
            report.commands += 1;
            match self.run_command(command) {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    error!("{} failed: {}", command.label(), e);
                    return Err(e);
                }
                Err(e) => {
                    error!("{} aborted: {}", command.label(), e);
                    report.failed += 1;
                }
            }
        }
        info!(
            "scenario finished: {} commands, {} aborted",
            report.commands, report.failed
        );
        Ok(report)
    }

    pub fn run_command(&mut self, command: &Command) -> Result<()> {
        match command {
            Command::Environments { name, value } => self.set_environment(name, value),
            Command::ReadSheets { sheets } => {
                for sheet in sheets {
                    self.read_sheet(sheet)?;
                }
                Ok(())
            }
            Command::ReadTbl { name } => {
                let lines = read_table_lines(self.resolve(Path::new(name)))?;
                self.engine
                    .ingest_lines(&self.registry, name, &lines, self.config.mode)?;
                self.print(name)
            }
            Command::CalcInsuranceExpense { name, variables } => {
                let index = policy_index(variables)?;
                let mut key = name.clone();
                self.registry.execute_kind(
                    names::INSURANCE_RESULT,
                    TableKind::InsuranceResult,
                    &mut key,
                    &Field::PolicyIndex(index),
                    None,
                )?;
                self.print(names::INSURANCE_RESULT)
            }
            Command::CalcExpenseOutput => {
                let mut key = String::new();
                self.registry.execute_kind(
                    names::EXPENSE_OUTPUT,
                    TableKind::ExpenseOutput,
                    &mut key,
                    &Field::Build,
                    None,
                )?;
                self.print(names::EXPENSE_OUTPUT)
            }
            Command::CalcInsuranceOutput { files, interest_rate } => {
                for file in files {
                    let index = output_index(&file.variables, *interest_rate)?;
                    let mut key = file.name.clone();
                    self.registry.execute_kind(
                        names::INSURANCE_OUTPUT,
                        TableKind::InsuranceOutput,
                        &mut key,
                        &Field::OutputIndex(index),
                        None,
                    )?;
                }
                self.print(names::INSURANCE_OUTPUT)
            }
        }
    }

    fn apply_environment(&mut self, env: &EnvironmentBlock) -> Result<()> {
        if let Some(core_type) = &env.core_type {
            self.set_environment("core_type", core_type)?;
        }
        if let Some(workers) = env.workers {
            if workers.max(1) != self.engine.workers() {
                self.engine = IngestEngine::new(workers)?;
            }
            self.config.workers = workers;
        }
        Ok(())
    }

    fn set_environment(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            "core_type" => {
                self.config.mode = value.parse::<ExecutionMode>().map_err(PipelineError::Config)?;
                info!("execution mode: {:?}", self.config.mode);
            }
            other => warn!("ignoring unknown environment value {}", other),
        }
        Ok(())
    }

    fn read_sheet(&self, spec: &SheetSpec) -> Result<()> {
        let kind = match spec.kind.parse::<TableKind>() {
            Ok(kind) => kind,
            Err(e) => {
                warn!("{}: {}, sheet skipped", spec.name, e);
                return Ok(());
            }
        };
        let range = parse_range(&spec.range)?;
        let sheet = Sheet::from_csv_path(self.resolve(&spec.path))?;
        self.engine
            .ingest_sheet(&self.registry, &spec.name, kind, &sheet, &range, self.config.mode)?;
        self.print(&spec.name)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    fn print(&self, name: &str) -> Result<()> {
        if self.config.print_after_ingest {
            self.registry.print(name)?;
        }
        Ok(())
    }
}
