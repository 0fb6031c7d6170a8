use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask", about = "Workspace automation for tessera")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run fmt, clippy and tests, stopping at the first failure
    Check,
    Fmt,
    Clippy,
    Test,
    /// Run the grid query benchmarks in release mode
    Bench,
    /// Build rustdoc for the workspace
    Doc,
}

/// Run `cargo` with the given arguments and fail on a non-zero exit.
fn cargo(args: &[&str]) -> Result<()> {
    println!("==> cargo {}", args.join(" "));
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("cargo {} failed", args[0]);
    }
    Ok(())
}

const FMT: &[&str] = &["fmt", "--all", "--", "--check"];
const CLIPPY: &[&str] = &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"];
const TEST: &[&str] = &["test", "--workspace"];

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check => {
            for step in [FMT, CLIPPY, TEST] {
                cargo(step)?;
            }
        }
        Commands::Fmt => cargo(FMT)?,
        Commands::Clippy => cargo(CLIPPY)?,
        Commands::Test => cargo(TEST)?,
        Commands::Bench => cargo(&["bench", "-p", "tessera-grid", "--bench", "bench_grid_queries"])?,
        Commands::Doc => cargo(&["doc", "--workspace", "--no-deps"])?,
    }

    Ok(())
}
