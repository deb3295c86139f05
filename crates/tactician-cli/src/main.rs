use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use tactician_client::config::{ConfigLoadError, TacticianConfig};
use tactician_runner::logging::init_logging;
use tactician_scripting_host::{ScriptCompiler, ScriptError, ScriptRegistry};

mod demo;

#[derive(Parser)]
#[command(name = "tactician", version, about = "Scriptable automation for a running game session")]
pub struct Cli {
    /// Config file to use instead of the platform default
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the engine against a simulated game with a few sample actions
    Demo {
        /// Stop after this many seconds instead of waiting for Ctrl+C
        #[arg(short, long, value_name = "SECONDS")]
        seconds: Option<u64>,

        /// Also log every engine event, including store commits
        #[arg(short, long)]
        verbose: bool,
    },
    /// Compile a script file and report the first error
    Check {
        /// Script source, or a file whose text is `native:<name>`
        file: PathBuf,
    },
    /// Write a config file holding the default values
    InitConfig {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<TacticianConfig> {
    let result = match path {
        Some(path) => TacticianConfig::load_from(path),
        None => TacticianConfig::load(),
    };
    match result {
        Ok(config) => Ok(config),
        Err(ConfigLoadError::NotFound) => Ok(TacticianConfig::default()),
        Err(e) => Err(e).context("could not load config"),
    }
}

fn check(file: &PathBuf, config: &TacticianConfig) -> anyhow::Result<()> {
    let source = fs::read_to_string(file)
        .with_context(|| format!("could not read {}", file.display()))?;
    let registry = ScriptRegistry::from_config(&config.scripting);
    match registry.compile(&source) {
        Ok(_) => {
            println!("{}: ok", file.display());
            Ok(())
        }
        Err(ScriptError::Compile { line, message }) => {
            bail!("{}:{}: {}", file.display(), line, message)
        }
        Err(e) => bail!("{}: {}", file.display(), e),
    }
}

fn init_config(path: Option<&PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = path.cloned().unwrap_or_else(TacticianConfig::config_path);
    if path.exists() && !force {
        bail!(
            "{} already exists, pass --force to overwrite it",
            path.display()
        );
    }
    TacticianConfig::default()
        .save_to(&path)
        .context("could not write config")?;
    println!("Config file created at: {}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Check { file } => check(&file, &config),
        Command::InitConfig { force } => init_config(cli.config.as_ref(), force),
        Command::Demo { seconds, verbose } => {
            let _guard = init_logging("demo", config.logging.file)
                .context("could not set up logging")?;
            info!("Starting tactician demo...");
            let limit = seconds.map(Duration::from_secs);
            if limit.is_none() {
                info!("Press Ctrl+C to stop");
            }
            if let Err(e) = demo::run(config, verbose, limit).await {
                warn!("Demo ended with an error: {:#}", e);
                return Err(e);
            }
            Ok(())
        }
    }
}
