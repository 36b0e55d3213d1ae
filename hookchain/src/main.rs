use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::json;

use hookchain::chain::Chain;
use hookchain::core::contract::{Validation, check_reply};
use hookchain::core::stage::{StageName, stage};
use hookchain::core::types::{ChainInput, HookStyle, RunStatus};
use hookchain::executor::StageExecutor;
use hookchain::exit_codes;
use hookchain::io::config::{DEFAULT_CONFIG_PATH, HookchainConfig, load_config, write_config};
use hookchain::io::memory::{FileMemoryStore, TranscriptRecorder};
use hookchain::io::model::CommandModelClient;
use hookchain::io::recorder::FileRunRecorder;
use hookchain::io::seed::load_seed;
use hookchain::io::tools::CommandToolRegistry;
use hookchain::logging;

#[derive(Parser)]
#[command(
    name = "hookchain",
    version,
    about = "Four-stage short-form content chain with validation and fallback"
)]
struct Cli {
    /// Config file location.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write `.hookchain/config.toml` with default settings.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Run the chain and print the run result as JSON.
    Run(RunArgs),
    /// Check a saved stage reply against that stage's output contract.
    Check {
        /// Stage name (summarizeTrend, generateIdeas, writeHooks, estimatePerformance).
        #[arg(long)]
        stage: StageName,
        /// File holding the raw reply.
        file: PathBuf,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Seed JSON file (niche, trendSource, notes, style, platform).
    #[arg(long, conflicts_with_all = ["niche", "trend_source", "notes", "style", "platform"])]
    seed: Option<PathBuf>,
    #[arg(long, required_unless_present = "seed")]
    niche: Option<String>,
    #[arg(long, required_unless_present = "seed")]
    trend_source: Option<String>,
    #[arg(long)]
    notes: Option<String>,
    /// Hook structure: AIDA or PAS.
    #[arg(long)]
    style: Option<HookStyle>,
    #[arg(long)]
    platform: Option<String>,
    /// Use a fixed run id instead of a generated one.
    #[arg(long)]
    run_id: Option<String>,
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Run(args) => cmd_run(&cli.config, args),
        Command::Check { stage, file } => cmd_check(stage, &file),
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    write_config(config_path, &HookchainConfig::default())?;
    println!("wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(config_path: &Path, args: RunArgs) -> Result<i32> {
    let config = load_config(config_path)?;
    let seed = seed_from_args(&args)?;

    let mut executor = StageExecutor::new(CommandModelClient::new(&config.model))
        .with_max_tool_rounds(config.chain.max_tool_rounds);
    if let Some(path) = &config.tools.registry_path {
        let registry = CommandToolRegistry::load(
            path,
            std::time::Duration::from_secs(config.tools.timeout_secs),
            config.model.output_limit_bytes,
        )?;
        executor = executor.with_tools(registry);
    }
    let transcript = config
        .recorder
        .memory_path
        .as_ref()
        .map(|path| TranscriptRecorder::new(FileMemoryStore::new(path)));
    let recorder = (FileRunRecorder::new(&config.recorder.runs_dir), transcript);

    let chain = Chain::new(executor, recorder);
    let result = match &args.run_id {
        Some(run_id) => chain.run_chain_with_id(&seed, run_id)?,
        None => chain.run_chain(&seed)?,
    };

    let rendered = serde_json::to_string_pretty(&result).context("serialize run result")?;
    println!("{rendered}");
    Ok(match result.status() {
        RunStatus::Completed => exit_codes::OK,
        RunStatus::Aborted => exit_codes::ABORTED,
    })
}

fn seed_from_args(args: &RunArgs) -> Result<ChainInput> {
    if let Some(path) = &args.seed {
        return load_seed(path);
    }
    let (Some(niche), Some(trend_source)) = (&args.niche, &args.trend_source) else {
        bail!("--niche and --trend-source are required without --seed");
    };
    let mut seed = ChainInput::new(
        niche.as_str(),
        trend_source.as_str(),
        args.notes.clone().unwrap_or_default(),
    );
    if let Some(style) = args.style {
        seed = seed.with_style(style);
    }
    if let Some(platform) = &args.platform {
        seed = seed.with_platform(platform.as_str());
    }
    Ok(seed)
}

fn cmd_check(stage_name: StageName, file: &Path) -> Result<i32> {
    let raw = fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let (verdict, code) = match check_reply(&raw, &stage(stage_name).output) {
        Validation::Valid(output) => (
            json!({"stage": stage_name, "valid": true, "output": output}),
            exit_codes::OK,
        ),
        Validation::Invalid(violation) => (
            json!({
                "stage": stage_name,
                "valid": false,
                "reason": violation.reason,
                "detail": violation.detail,
            }),
            exit_codes::INVALID,
        ),
    };
    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(code)
}
