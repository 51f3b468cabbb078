use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "tandem workspace automation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the loom model checks (`--cfg loom`)
    Loom {
        /// Only run models whose path contains this string
        filter: Option<String>,

        /// Loom preemption bound; lower is faster, higher explores more
        #[arg(long)]
        max_preemptions: Option<u32>,
    },
    /// Run the criterion benches and summarize them
    Bench {
        /// Run quickly (lower sample size/time)
        #[arg(long, default_value_t = false)]
        quick: bool,

        /// Generate report only (skip running benchmarks)
        #[arg(long, default_value_t = false)]
        report_only: bool,
    },
}

const BENCHES: &[&str] = &["stack_benchmark", "queue_benchmark", "pool_benchmark"];

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Loom {
            filter,
            max_preemptions,
        } => run_loom(filter.as_deref(), max_preemptions)?,
        Commands::Bench { quick, report_only } => {
            if !report_only {
                run_benchmarks(quick)?;
            }
            generate_report()?;
        }
    }

    Ok(())
}

fn run_loom(filter: Option<&str>, max_preemptions: Option<u32>) -> Result<()> {
    println!("Running loom models...");
    let start = Instant::now();

    let mut cmd = Command::new("cargo");
    cmd.env("RUSTFLAGS", "--cfg loom")
        .env("CARGO_TARGET_DIR", "target/loom");
    if let Some(bound) = max_preemptions {
        cmd.env("LOOM_MAX_PREEMPTIONS", bound.to_string());
    }
    cmd.args(["test", "--lib", "--release"]);
    cmd.arg(filter.unwrap_or("loom_tests"));

    let status = cmd.status().context("Failed to run cargo test under loom")?;
    if !status.success() {
        anyhow::bail!("Loom models failed");
    }
    println!("Loom models passed in {:.2?}", start.elapsed());
    Ok(())
}

fn run_benchmarks(quick: bool) -> Result<()> {
    println!("Running benchmarks...");

    for bench in BENCHES {
        println!("\n>>> {}", bench);
        let start = Instant::now();

        let mut cmd = Command::new("cargo");
        cmd.env("CARGO_INCREMENTAL", "0");
        cmd.arg("bench").arg("--bench").arg(bench);

        // Args for the test runner (Criterion) go after --
        cmd.arg("--");
        if quick {
            cmd.arg("--measurement-time").arg("0.1");
            cmd.arg("--noplot");
            cmd.arg("--sample-size").arg("10");
        }

        let status = cmd
            .status()
            .context(format!("Failed to run bench {}", bench))?;

        if !status.success() {
            eprintln!("Warning: bench {} failed", bench);
        } else {
            println!("Finished {} in {:.2?}", bench, start.elapsed());
        }
    }

    Ok(())
}

fn generate_report() -> Result<()> {
    println!("\n>>> Generating Report...");
    let mut results: BTreeMap<String, f64> = BTreeMap::new();

    let criterion_dir = Path::new("target/criterion");
    if !criterion_dir.exists() {
        eprintln!("No criterion output found at {}", criterion_dir.display());
        return Ok(());
    }

    collect_results(criterion_dir, criterion_dir, &mut results);

    let report_path = Path::new("benchmark_results/report.md");
    if let Some(parent) = report_path.parent() {
        fs::create_dir_all(parent)?;
    }

    use std::io::Write;
    let mut file = fs::File::create(report_path)?;

    writeln!(file, "# Benchmark Report")?;
    writeln!(file)?;
    writeln!(file, "| Benchmark | Mean | Iterations/s |")?;
    writeln!(file, "|---|---|---|")?;

    for (name, time_ns) in &results {
        let per_sec = 1e9 / time_ns;
        writeln!(file, "| {} | {} | {:.0} |", name, format_time(*time_ns), per_sec)?;
    }

    println!("Report written to {}", report_path.display());
    Ok(())
}

fn format_time(ns: f64) -> String {
    if ns > 1_000_000.0 {
        format!("{:.2} ms", ns / 1_000_000.0)
    } else if ns > 1_000.0 {
        format!("{:.2} µs", ns / 1_000.0)
    } else {
        format!("{:.0} ns", ns)
    }
}

/// Walks criterion's output. Each `.../<group>/<bench>[/<param>]/new/estimates.json`
/// becomes one row keyed by the path between the root and `new`.
fn collect_results(root: &Path, dir: &Path, results: &mut BTreeMap<String, f64>) {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_results(root, &path, results);
            continue;
        }
        if path.file_name().and_then(|s| s.to_str()) != Some("estimates.json") {
            continue;
        }
        let Some(sample_dir) = path.parent() else {
            continue;
        };
        if sample_dir.file_name().and_then(|s| s.to_str()) != Some("new") {
            continue;
        }
        let Some(bench_dir) = sample_dir.parent() else {
            continue;
        };
        let Ok(name) = bench_dir.strip_prefix(root) else {
            continue;
        };
        if name.components().any(|c| c.as_os_str() == "report") {
            continue;
        }

        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        let Ok(json) = serde_json::from_str::<serde_json::Value>(&content) else {
            continue;
        };
        let time_ns = json
            .get("mean")
            .and_then(|m| m.get("point_estimate"))
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(0.0);
        if time_ns > 0.0 {
            results.insert(name.display().to_string(), time_ns);
        }
    }
}
