//! Backporter CLI
//!
//! The `backporter` command ports a single upstream commit into a distgit
//! packaging repository.
//!
//! ## Commands
//!
//! - `config`: Create, edit, view or update the YAML configuration
//! - `check`: Verify the host has every tool a backport needs
//! - `create`: Backport a commit onto a distgit branch

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use backporter_core::porting::{DEFAULT_CONTAINER_ENGINE, DEFAULT_PLATFORM};
use backporter_core::{
    check_required_tools, required_tools, run_backport, BackporterConfig, BuildCommands,
    BuildRecipe, ConfigError, ConfigField, ContainerEngine, PipelineSettings, StageCommands,
    SystemRunner, WorkspaceRetention, DEFAULT_CONFIG, DEFAULT_FIXMORPH_BASE_IMAGE,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use dialoguer::Input;
use tokio::sync::watch;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "backporter")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Backport upstream commits into distgit packages", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Check that the host has every tool a backport needs
    Check {
        #[command(flatten)]
        tools: ToolArgs,
    },

    /// Backport a commit onto a distgit branch
    Create {
        /// Upstream commit to backport
        commit: String,

        /// Distgit branch to backport onto (e.g. rhel-9.4)
        branch: String,

        #[command(flatten)]
        tools: ToolArgs,

        /// Keep the workspace after the run
        #[arg(long, value_enum, default_value_t = RetainArg::Never)]
        retain: RetainArg,

        /// Create workspaces under this directory instead of the system temp dir
        #[arg(long)]
        workspace_root: Option<PathBuf>,

        /// Directory with a replacement Dockerfile and run_fixmorph.sh
        #[arg(long)]
        recipe_dir: Option<PathBuf>,

        /// Configure command per build stage, in order (up to 3)
        #[arg(long = "configure-command", num_args = 1)]
        configure_commands: Vec<String>,

        /// Build command per build stage, in order (up to 3)
        #[arg(long = "build-command", num_args = 1)]
        build_commands: Vec<String>,

        /// Override the configured porting tool base image
        #[arg(long)]
        base_image: Option<String>,

        /// Seconds an interrupted tool gets to exit before it is killed
        #[arg(long, default_value = "10")]
        grace_period_secs: u64,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a new configuration file, prompting for missing values
    Create {
        #[command(flatten)]
        values: ConfigValues,
    },

    /// Interactively edit the configuration file
    Edit {
        #[command(flatten)]
        values: ConfigValues,
    },

    /// Print the configuration file
    View,

    /// Set a single configuration key
    Set {
        /// Key to set (upstream_url, distgit_repo, fixmorph_base_image)
        field: String,

        /// New value
        value: String,
    },
}

#[derive(Args, Default)]
struct ConfigValues {
    /// Upstream repository to backport from (e.g. https://github.com/python/cpython.git)
    #[arg(long)]
    upstream_url: Option<String>,

    /// Distgit repository to backport to (e.g. rpms/python)
    #[arg(long)]
    distgit_repo: Option<String>,

    /// Base image for the porting tool container
    #[arg(long)]
    fixmorph_base_image: Option<String>,
}

#[derive(Args)]
struct ToolArgs {
    /// Container engine CLI (docker or podman)
    #[arg(long, env = "BACKPORTER_CONTAINER_ENGINE", default_value = DEFAULT_CONTAINER_ENGINE)]
    engine: String,

    /// Platform passed to the image build
    #[arg(long, default_value = DEFAULT_PLATFORM)]
    platform: String,

    /// Packaging client used for clone and sources (rhpkg, fedpkg, centpkg)
    #[arg(long, env = "BACKPORTER_PACKAGING_CLIENT", default_value = backporter_core::distgit::DEFAULT_PACKAGING_CLIENT)]
    packaging_client: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum RetainArg {
    Never,
    OnFailure,
    Always,
}

impl From<RetainArg> for WorkspaceRetention {
    fn from(arg: RetainArg) -> Self {
        match arg {
            RetainArg::Never => WorkspaceRetention::Delete,
            RetainArg::OnFailure => WorkspaceRetention::KeepOnFailure,
            RetainArg::Always => WorkspaceRetention::Keep,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    backporter_core::telemetry::init_tracing(cli.json, level);

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Create { values } => cmd_config_create(&cli.config, values),
            ConfigAction::Edit { values } => cmd_config_edit(&cli.config, values),
            ConfigAction::View => cmd_config_view(&cli.config),
            ConfigAction::Set { field, value } => cmd_config_set(&cli.config, &field, &value),
        },
        Commands::Check { tools } => cmd_check(&cli.config, &tools),
        Commands::Create {
            commit,
            branch,
            tools,
            retain,
            workspace_root,
            recipe_dir,
            configure_commands,
            build_commands,
            base_image,
            grace_period_secs,
        } => {
            let mut settings = pipeline_settings(&tools, retain, workspace_root)?;
            settings.build_commands = build_commands_from(&configure_commands, &build_commands)?;
            settings.base_image = base_image;
            if let Some(dir) = recipe_dir {
                settings.recipe = BuildRecipe::from_dir(&dir)
                    .with_context(|| format!("Failed to load build recipe from {}", dir.display()))?;
            }
            cmd_create(
                &cli.config,
                &commit,
                &branch,
                settings,
                Duration::from_secs(grace_period_secs),
            )
            .await
        }
    }
}

fn prompt(text: &str, default: Option<&str>) -> Result<String> {
    let mut input = Input::<String>::new().with_prompt(text);
    if let Some(default) = default {
        input = input.default(default.to_string());
    }
    input.interact_text().context("Failed to read input")
}

/// Write a new config file, prompting for values not given as flags.
fn cmd_config_create(path: &Path, values: ConfigValues) -> Result<()> {
    let distgit_repo = match values.distgit_repo {
        Some(v) => v,
        None => prompt(
            "Downstream distgit repository (e.g. rpms/python)",
            None,
        )?,
    };
    let upstream_url = match values.upstream_url {
        Some(v) => v,
        None => prompt(
            "Upstream repository URL (e.g. https://github.com/python/cpython.git)",
            None,
        )?,
    };
    let fixmorph_base_image = match values.fixmorph_base_image {
        Some(v) => v,
        None => prompt(
            "Base image for the porting tool",
            Some(DEFAULT_FIXMORPH_BASE_IMAGE),
        )?,
    };

    let config = BackporterConfig {
        upstream_url,
        distgit_repo,
        fixmorph_base_image: Some(fixmorph_base_image),
    };
    config.write(path)?;
    println!("Wrote config to {}", display_path(path));
    Ok(())
}

/// Re-prompt every value with the current one as default.
fn cmd_config_edit(path: &Path, values: ConfigValues) -> Result<()> {
    let current = match BackporterConfig::read(path) {
        Ok(config) => config,
        Err(ConfigError::NotFound { .. }) => {
            warn!(path = %path.display(), "config file does not exist, creating a new one");
            return cmd_config_create(path, values);
        }
        Err(e) => return Err(e.into()),
    };

    let distgit_repo = match values.distgit_repo {
        Some(v) => v,
        None => prompt(
            "Downstream distgit repository",
            Some(&current.distgit_repo),
        )?,
    };
    let upstream_url = match values.upstream_url {
        Some(v) => v,
        None => prompt("Upstream repository URL", Some(&current.upstream_url))?,
    };
    let fixmorph_base_image = match values.fixmorph_base_image {
        Some(v) => v,
        None => prompt(
            "Base image for the porting tool",
            Some(current.effective_base_image()),
        )?,
    };

    let config = BackporterConfig {
        upstream_url,
        distgit_repo,
        fixmorph_base_image: Some(fixmorph_base_image),
    };
    config.write(path)?;
    println!("Wrote config to {}", display_path(path));
    Ok(())
}

fn cmd_config_view(path: &Path) -> Result<()> {
    let config = BackporterConfig::read(path)?;
    print!("{}", config.to_yaml()?);
    Ok(())
}

fn cmd_config_set(path: &Path, field: &str, value: &str) -> Result<()> {
    let field: ConfigField = field.parse()?;
    let mut config = BackporterConfig::read(path)?;
    let previous = config.get(field).unwrap_or("<unset>").to_string();
    config.set(field, value);
    config.write(path)?;
    info!(field = %field, "updated config");
    println!("{field}: {previous} -> {value}");
    Ok(())
}

/// Report missing host tools and whether the config file is usable.
fn cmd_check(config_path: &Path, tools: &ToolArgs) -> Result<()> {
    let settings = pipeline_settings(tools, RetainArg::Never, None)?;
    let required = required_tools(&settings);
    for tool in &required {
        if backporter_core::preflight::command_exists(&tool.command) {
            println!("Found command: {}", tool.command);
        }
    }
    check_required_tools(&required)?;

    let config = BackporterConfig::read(config_path)
        .with_context(|| "Create one with `backporter config create`")?;
    println!("Config: {}", display_path(config_path));
    println!("  upstream_url: {}", config.upstream_url);
    println!("  distgit_repo: {}", config.distgit_repo);
    println!("  base image:   {}", config.effective_base_image());
    Ok(())
}

/// Run a backport and print the ported patch.
async fn cmd_create(
    config_path: &Path,
    commit: &str,
    branch: &str,
    settings: PipelineSettings,
    grace_period: Duration,
) -> Result<()> {
    let config = BackporterConfig::read(config_path)
        .with_context(|| "Create one with `backporter config create`")?;

    let (interrupt_tx, interrupt_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping the running tool");
            interrupt_tx.send_replace(true);
        }
    });

    let runner = Arc::new(
        SystemRunner::new()
            .with_interrupt(interrupt_rx)
            .with_grace_period(grace_period),
    );

    let result = run_backport(commit, branch, &config, runner, settings, &mut |line: &str| {
        println!("{line}")
    })
    .await;

    match result {
        Ok(outcome) => {
            if let Some(ws) = &outcome.workspace {
                eprintln!("Workspace kept at {}", ws.display());
            }
            println!();
            println!("Backported patch ({}):", outcome.result.path.display());
            print!("{}", outcome.result.patch);
            Ok(())
        }
        Err(failure) => {
            if let Some(ws) = &failure.workspace {
                eprintln!("Workspace kept at {}", ws.display());
            }
            Err(failure.into())
        }
    }
}

fn pipeline_settings(
    tools: &ToolArgs,
    retain: RetainArg,
    workspace_root: Option<PathBuf>,
) -> Result<PipelineSettings> {
    if tools.engine.trim().is_empty() || tools.packaging_client.trim().is_empty() {
        bail!("--engine and --packaging-client must not be empty");
    }
    Ok(PipelineSettings {
        packaging_client: tools.packaging_client.clone(),
        engine: ContainerEngine {
            program: tools.engine.clone(),
            platform: tools.platform.clone(),
        },
        workspace_parent: workspace_root,
        retention: retain.into(),
        ..PipelineSettings::default()
    })
}

/// Pair configure and build commands by position; a stage missing either
/// keeps the default for it.
fn build_commands_from(configure: &[String], build: &[String]) -> Result<BuildCommands> {
    let stages = backporter_core::porting::BUILD_STAGES;
    if configure.len() > stages || build.len() > stages {
        bail!("at most {stages} configure and {stages} build commands are supported");
    }
    let pairs = (0..configure.len().max(build.len())).map(|i| {
        let defaults = StageCommands::default();
        StageCommands {
            config: configure.get(i).cloned().unwrap_or(defaults.config),
            build: build.get(i).cloned().unwrap_or(defaults.build),
        }
    });
    Ok(BuildCommands::from_stages(pairs))
}

fn display_path(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}
