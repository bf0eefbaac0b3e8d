use std::fs;
use std::path::Path;
use std::process::{exit, Command, ExitStatus};

use clap::{Parser, Subcommand, ValueEnum};

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the taxi dispatch workspace",
    long_about = "A unified CLI for running the dispatch simulation, benchmarks,\n\
                  load tests and CI checks in the taxi dispatch workspace."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the dispatch simulation with a generated user file
    Run {
        /// Grid width and height
        #[arg(long, default_value_t = 20)]
        size: u32,
        /// Number of taxis
        #[arg(long, default_value_t = 5)]
        taxis: u32,
        /// Number of generated requesters
        #[arg(long, default_value_t = 20)]
        users: u32,
        /// Wall-clock milliseconds per time unit
        #[arg(long, default_value_t = 50)]
        time_unit_ms: u64,
        /// Directory for checkpoint, interaction log and user file
        #[arg(long, default_value = "target/dispatch-run")]
        out: String,
    },
    /// Run Criterion benchmarks
    Bench,
    /// Run CI checks (fmt, clippy, tests, smoke run, benchmarks)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
    /// Run load tests (ignored tests in dispatch_core)
    LoadTest,
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting, clippy, and tests
    Check,
    /// Short end-to-end simulation run
    Smoke,
    /// Run benchmarks
    Bench,
    /// Run check + smoke + bench
    All,
}

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn cargo(args: &[&str]) -> ExitStatus {
    eprintln!("+ cargo {}", args.join(" "));
    Command::new("cargo")
        .args(args)
        .status()
        .expect("failed to execute cargo")
}

fn run_cargo(args: &[&str]) {
    let status = cargo(args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

/// Writes `count` requesters spread over a `size`x`size` grid, arriving one
/// time unit apart.
fn write_user_file(path: &Path, size: u32, count: u32) {
    let lines: Vec<String> = (0..count)
        .map(|i| format!("{} {} {}", (i * 7) % size, (i * 11) % size, i + 1))
        .collect();
    fs::write(path, lines.join("\n")).expect("failed to write user file");
}

fn run_simulation(size: u32, taxis: u32, users: u32, time_unit_ms: u64, out: &str) {
    let out_dir = Path::new(out);
    fs::create_dir_all(out_dir).expect("failed to create output directory");
    let user_file = out_dir.join("users.txt");
    write_user_file(&user_file, size, users);

    let size = size.to_string();
    let taxis = taxis.to_string();
    let time_unit_ms = time_unit_ms.to_string();
    let user_file = user_file.display().to_string();
    run_cargo(&[
        "run",
        "-p",
        "dispatch_sim",
        "--release",
        "--",
        "-n",
        &size,
        "-m",
        &size,
        "--taxis",
        &taxis,
        "--users",
        &user_file,
        "--time-unit-ms",
        &time_unit_ms,
        "--state-dir",
        out,
        "--export-parquet",
        out,
    ]);
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_check() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);

    step("Test dispatch_core");
    run_cargo(&["test", "-p", "dispatch_core"]);

    step("Test dispatch_sim");
    run_cargo(&["test", "-p", "dispatch_sim"]);
}

fn ci_smoke() {
    step("Run dispatch simulation (10x10 grid, 3 taxis, 10 users)");
    run_simulation(10, 3, 10, 5, "target/dispatch-smoke");
}

fn ci_bench() {
    step("Run benchmarks");
    run_cargo(&["bench", "--package", "dispatch_core", "--bench", "performance"]);
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            size,
            taxis,
            users,
            time_unit_ms,
            out,
        } => run_simulation(size, taxis, users, time_unit_ms, &out),
        Commands::Bench => ci_bench(),
        Commands::Ci { job } => {
            match job {
                CiJob::Check => ci_check(),
                CiJob::Smoke => ci_smoke(),
                CiJob::Bench => ci_bench(),
                CiJob::All => {
                    ci_check();
                    ci_smoke();
                    ci_bench();
                }
            }
            eprintln!("\nCI job passed.");
        }
        Commands::LoadTest => {
            run_cargo(&[
                "test",
                "-p",
                "dispatch_core",
                "--test",
                "load_tests",
                "--",
                "--ignored",
            ]);
        }
    }
}
