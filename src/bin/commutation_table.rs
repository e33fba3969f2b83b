//! Print a flat-mortality commutation table and the matching term premium
//!
//! Lapse comes from a flat rate, or from a Termination sheet when one is
//! given. Usage: cargo run --bin commutation_table -- --age 40 --term 20 --q 0.002

use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use clap::Parser;
use log::info;

use reserve_engine::commutation::{distribute_lapse_and_reinstatement, RateByAge};
use reserve_engine::source::{parse_range, Sheet};
use reserve_engine::tables::{lapse_rate, names};
use reserve_engine::{
    compute_commutation, compute_term_premium, DiscountCurve, ExecutionMode, IngestEngine, Registry,
    Sex, TableKind,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Entry age
    #[arg(long, default_value_t = 40)]
    age: u32,

    /// Term in years
    #[arg(long, default_value_t = 20)]
    term: u32,

    /// Premium payment period in years (defaults to the term)
    #[arg(long)]
    payment_period: Option<u32>,

    /// Flat annual mortality rate
    #[arg(long, default_value_t = 0.002)]
    q: f64,

    /// Annual valuation rate
    #[arg(long, default_value_t = 0.0475)]
    rate: f64,

    /// Flat annual lapse rate; zero disables lapse
    #[arg(long, default_value_t = 0.0)]
    lapse: f64,

    /// Termination sheet (CSV) to take lapse rates from instead
    #[arg(long)]
    termination: Option<PathBuf>,

    /// Cell range of the termination rows
    #[arg(long, default_value = "A2:W46")]
    termination_range: String,

    /// Face amount for the premium
    #[arg(long, default_value_t = 100_000_000.0)]
    face: f64,

    /// Emit JSON instead of a text table
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let payment_period = args.payment_period.unwrap_or(args.term);
    ensure!(payment_period > 0, "payment period must be positive");
    ensure!(payment_period <= args.term, "payment period exceeds the term");

    let curve = DiscountCurve::single_rate(args.rate);
    let (lapse, reinstatement) = match &args.termination {
        Some(path) => termination_lapse(&args, path, payment_period)?,
        None => {
            let flag = if args.lapse > 0.0 { 2 } else { 0 };
            distribute_lapse_and_reinstatement(args.age, args.term, payment_period, |_, _| args.lapse, flag)
        }
    };
    info!(
        "lapse over {} ages, reinstatement from age {}",
        lapse.len(),
        args.age + payment_period
    );

    let cf = compute_commutation(
        args.age,
        args.term,
        |_| args.q,
        |age| lapse.get(&age).copied().unwrap_or(0.0),
        |t| curve.v0(t),
        |t| curve.v1(t),
    );
    let premium = compute_term_premium(
        args.age,
        args.term,
        payment_period,
        args.face,
        Sex::Male,
        |_, _| args.q,
        |t| curve.v0(t),
        |t| curve.v1(t),
    );

    if args.json {
        let out = serde_json::json!({
            "rows": cf.rows(),
            "reinstatement": reinstatement,
            "monthly_premium": premium,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!(
        "{:>4} {:>12} {:>12} {:>12} {:>12} {:>14} {:>12}",
        "age", "l", "D", "C", "C0", "N", "M"
    );
    for row in cf.rows() {
        println!(
            "{:>4} {:>12.4} {:>12.4} {:>12.4} {:>12.4} {:>14.4} {:>12.4}",
            row.age, row.lx, row.dx, row.cx, row.c0x, row.nx, row.mx
        );
    }
    println!();
    println!("Monthly premium: {:.0}", premium);
    Ok(())
}

/// Lapse and reinstatement by age from a Termination sheet
fn termination_lapse(args: &Args, path: &Path, payment_period: u32) -> Result<(RateByAge, RateByAge)> {
    let sheet = Sheet::from_csv_path(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let range = parse_range(&args.termination_range)?;

    let registry = Registry::new();
    IngestEngine::new(1)?.ingest_sheet(
        &registry,
        names::TERMINATION,
        TableKind::Termination,
        &sheet,
        &range,
        ExecutionMode::SingleThread,
    )?;
    let shared = registry.require_context(names::TERMINATION)?;
    let guard = shared.read();
    let table = guard.as_termination()?;

    let rates = distribute_lapse_and_reinstatement(
        args.age,
        args.term,
        payment_period,
        |period, duration| lapse_rate(table, period, duration),
        2,
    );
    Ok(rates)
}
