//! Command-line entry point for the devloop build-repair loop.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use devloop::agents::AgentContext;
use devloop::controller::{Controller, RunOutcome};
use devloop::core::log_tail::{DEFAULT_TAIL_LINES, reduce_log};
use devloop::core::types::TaskSpec;
use devloop::exit_codes;
use devloop::io::build::{BuildError, CommandBuildSystem};
use devloop::io::config::{CONFIG_FILE_NAME, DevloopConfig, load_config, write_config};
use devloop::io::oracle::{HttpOracle, OracleError, OracleSession, RetryPolicy};
use devloop::io::paths::RunPaths;
use devloop::io::prompt::PromptEngine;
use devloop::io::registry::PypiRegistry;
use devloop::logging;

#[derive(Parser)]
#[command(
    name = "devloop",
    version,
    about = "Generate a microservice and repair its build until it publishes"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate, build, and repair a microservice for a task.
    Generate {
        /// What the microservice should do.
        #[arg(long)]
        task: String,
        /// Example scenario the generated tests should cover.
        #[arg(long)]
        test: Option<String>,
        /// Run root; artifact sets are written below it.
        #[arg(long)]
        path: PathBuf,
        /// Config file. Defaults to `./devloop.toml`, where `init-config` writes it.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Allow a single build attempt per strategy.
        #[arg(long)]
        no_self_healing: bool,
    },
    /// Write the default config file.
    InitConfig {
        /// Destination. Defaults to `./devloop.toml`.
        #[arg(long)]
        path: Option<PathBuf>,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the error-relevant tail of a build log.
    ReduceLog {
        file: PathBuf,
        #[arg(long, default_value_t = DEFAULT_TAIL_LINES)]
        lines: usize,
    },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            if is_transport_failure(&err) {
                exit_codes::TRANSPORT
            } else {
                exit_codes::INVALID
            }
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate {
            task,
            test,
            path,
            config,
            no_self_healing,
        } => cmd_generate(
            TaskSpec { task, test },
            &path,
            config.as_deref(),
            no_self_healing,
        ),
        Command::InitConfig { path, force } => {
            cmd_init_config(path.as_deref().unwrap_or(Path::new(CONFIG_FILE_NAME)), force)
        }
        Command::ReduceLog { file, lines } => cmd_reduce_log(&file, lines),
    }
}

fn cmd_generate(
    task: TaskSpec,
    root: &Path,
    config_path: Option<&Path>,
    no_self_healing: bool,
) -> Result<i32> {
    if task.task.trim().is_empty() {
        bail!("--task must not be empty");
    }
    let mut config = load_config(config_path.unwrap_or(Path::new(CONFIG_FILE_NAME)))?;
    if no_self_healing {
        config.self_healing = false;
    }
    fs::create_dir_all(root).with_context(|| format!("create run root {}", root.display()))?;

    let paths = RunPaths::new(root);
    let oracle = OracleSession::new(
        Box::new(HttpOracle::from_config(&config.oracle)?),
        RetryPolicy::from_config(&config.oracle),
    )
    .with_transcript(&paths.transcript_path);
    let prompts = PromptEngine::new();
    let agents = AgentContext::new(&oracle, &prompts, &task)?;
    let build = CommandBuildSystem::new(config.build.clone());
    let registry = PypiRegistry::new(&config.registry)?;

    let controller = Controller::new(&config, root, agents, &build, &registry);
    match controller.run()? {
        RunOutcome::Succeeded {
            service,
            strategy,
            version,
            dir,
            companion_dir,
        } => {
            info!(%service, %strategy, version, "service published");
            println!("{}", dir.display());
            println!("{}", companion_dir.display());
            Ok(exit_codes::OK)
        }
        RunOutcome::AllStrategiesExhausted { service, attempts } => {
            eprintln!("no strategy produced a published service for {service}:");
            for (strategy, outcome) in &attempts {
                eprintln!("  {strategy}: {}", outcome.label());
            }
            Ok(exit_codes::EXHAUSTED)
        }
    }
}

fn cmd_init_config(path: &Path, force: bool) -> Result<i32> {
    if !force && path.exists() {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &DevloopConfig::default())?;
    println!("{}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_reduce_log(file: &Path, lines: usize) -> Result<i32> {
    if lines == 0 {
        bail!("--lines must be > 0");
    }
    let log = fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    println!("{}", reduce_log(&log, lines));
    Ok(exit_codes::OK)
}

/// Whether the oracle or build system gave up, as opposed to bad input.
fn is_transport_failure(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.is::<OracleError>() || cause.is::<BuildError>())
}
