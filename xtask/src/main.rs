//! Workspace automation for connpool: `cargo xtask <command>`.
//!
//! - `ci`: format check, clippy, tests and docs
//! - `fmt`, `clippy`: lint the workspace, `--fix` applies changes
//! - `test`: all tests, one package, or the pool stress suite
//! - `doc`: build API docs
//! - `bench`: run the pool benchmarks

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask", about = "Build automation for connpool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Everything CI runs
    Ci,
    /// Run cargo fmt (--check by default, --fix to apply)
    Fmt {
        /// Apply formatting fixes
        #[arg(long)]
        fix: bool,
    },
    /// Run clippy on all targets
    Clippy {
        /// Apply clippy suggestions
        #[arg(long)]
        fix: bool,
    },
    /// Run tests
    Test {
        /// Test a specific package
        #[arg(short, long)]
        package: Option<String>,
        /// Only the multi-threaded pool stress suite
        #[arg(long)]
        stress: bool,
    },
    /// Generate documentation
    Doc {
        /// Open documentation in browser
        #[arg(long)]
        open: bool,
    },
    /// Run the pool benchmarks
    Bench {
        /// Only run benchmarks whose name contains this
        filter: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    sh.change_dir(workspace_root()?);

    match cli.command {
        Command::Ci => {
            fmt(&sh, false)?;
            clippy(&sh, false)?;
            test(&sh, None, false)?;
            doc(&sh, false)?;
        }
        Command::Fmt { fix } => fmt(&sh, fix)?,
        Command::Clippy { fix } => clippy(&sh, fix)?,
        Command::Test { package, stress } => test(&sh, package.as_deref(), stress)?,
        Command::Doc { open } => doc(&sh, open)?,
        Command::Bench { filter } => bench(&sh, filter.as_deref())?,
    }

    Ok(())
}

/// The xtask crate sits directly under the workspace root.
fn workspace_root() -> Result<PathBuf> {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .context("xtask manifest has no parent directory")
}

fn fmt(sh: &Shell, fix: bool) -> Result<()> {
    let check = (!fix).then_some(["--", "--check"]).into_iter().flatten();
    cmd!(sh, "cargo fmt --all {check...}").run()?;
    println!("✅ fmt");
    Ok(())
}

fn clippy(sh: &Shell, fix: bool) -> Result<()> {
    if fix {
        cmd!(sh, "cargo clippy --workspace --all-targets --fix --allow-dirty").run()?;
    } else {
        cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;
    }
    println!("✅ clippy");
    Ok(())
}

fn test(sh: &Shell, package: Option<&str>, stress: bool) -> Result<()> {
    if stress {
        cmd!(sh, "cargo test -p connpool-testing --test stress").run()?;
    } else if let Some(pkg) = package {
        cmd!(sh, "cargo test -p {pkg}").run()?;
    } else {
        cmd!(sh, "cargo test --workspace --all-targets").run()?;
        cmd!(sh, "cargo test --workspace --doc").run()?;
    }
    println!("✅ tests");
    Ok(())
}

fn doc(sh: &Shell, open: bool) -> Result<()> {
    let open = open.then_some("--open");
    cmd!(sh, "cargo doc --workspace --no-deps {open...}")
        .env("RUSTDOCFLAGS", "-D warnings")
        .run()?;
    println!("✅ docs");
    Ok(())
}

fn bench(sh: &Shell, filter: Option<&str>) -> Result<()> {
    println!("Running pool benchmarks...");
    let filter = filter.into_iter();
    cmd!(sh, "cargo bench -p connpool --bench pool -- {filter...}").run()?;
    Ok(())
}
