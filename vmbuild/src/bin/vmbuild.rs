use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vmbuild::config::BuildConfig;
use vmbuild::driver::memory::InMemoryDriver;
use vmbuild::logging::{LoggingOptions, init_logging};
use vmbuild::ui::ConsoleUi;
use vmbuild::{VmBuilder, VmbuildError};

#[derive(Parser)]
#[command(name = "vmbuild")]
#[command(about = "Create or clone VMs with automatic rollback")]
#[command(version)]
struct Args {
    /// Write daily-rotated log files here instead of stderr
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Log level filter (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a build config and print every problem found
    Validate {
        /// Path to the JSON build config
        config: PathBuf,
    },
    /// Run a build against an in-memory inventory
    Simulate {
        /// Path to the JSON build config
        config: PathBuf,
        /// Seed a template that can be cloned
        #[arg(long = "template")]
        templates: Vec<String>,
        /// Seed an existing VM
        #[arg(long = "existing")]
        existing: Vec<String>,
    },
}

fn load(path: &Path) -> Result<BuildConfig> {
    BuildConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

fn validate(path: &Path) -> Result<()> {
    let mut config = load(path)?;
    let errs = config.prepare();
    if !errs.is_empty() {
        return Err(VmbuildError::Validation(errs).into());
    }

    let source = if config.create.is_some() { "create" } else { "clone" };
    println!("{}: ok ({} {})", path.display(), source, config.location.vm_name);
    Ok(())
}

async fn simulate(path: &Path, templates: &[String], existing: &[String]) -> Result<()> {
    let config = load(path)?;

    let driver = templates
        .iter()
        .fold(InMemoryDriver::new(), |driver, name| driver.with_template(name));
    let driver = Arc::new(
        existing
            .iter()
            .fold(driver, |driver, name| driver.with_vm(name)),
    );

    let builder = VmBuilder::new(config, Arc::new(ConsoleUi), driver.clone())?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling build");
            on_interrupt.cancel();
        }
    });

    let result = builder.build(cancel).await;
    println!("inventory: {}", driver.inventory().join(", "));

    let output = result?;
    for step in &output.report.steps {
        println!(
            "step {}: {:?} ({} ms)",
            step.name,
            step.status,
            step.duration_ms.unwrap_or_default()
        );
    }
    println!("built {}", output.vm);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _guard = init_logging(&LoggingOptions {
        level: args.log_level.clone(),
        log_dir: args.log_dir.clone(),
        ..Default::default()
    });

    match &args.command {
        Command::Validate { config } => validate(config),
        Command::Simulate {
            config,
            templates,
            existing,
        } => simulate(config, templates, existing).await,
    }
}
