//! CLI command definitions and dispatch.

pub mod build;
pub mod images;
pub mod lint;
pub mod publish;

use std::future::Future;
use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use dockyard_common::config::{EngineConfig, Isolation, LogSink, PipelineConfig};
use dockyard_common::error::Result;
use dockyard_common::types::{Arch, Os};
use dockyard_core::cancel::CancelToken;
use dockyard_core::client::Client;

/// Dockyard: declarative container composition and multi-platform publishing.
#[derive(Parser, Debug)]
#[command(name = "dockyard", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Pipeline configuration file (JSON).
    #[arg(long, global = true, env = "DOCKYARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the snapshot store, image catalog, and registry.
    #[arg(long, global = true, env = "DOCKYARD_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Where executed commands write their output: stdout, stderr, null,
    /// or a file path.
    #[arg(long, global = true, value_parser = parse_log_sink)]
    pub log_sink: Option<LogSink>,

    /// Maximum number of platforms built concurrently.
    #[arg(short = 'j', long, global = true)]
    pub parallelism: Option<usize>,

    /// Confinement of executed commands: auto, bubblewrap, or unconfined.
    #[arg(long, global = true, env = "DOCKYARD_ISOLATION", value_parser = parse_isolation)]
    pub isolation: Option<Isolation>,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build the payload for every platform and export the output tree.
    Build(build::BuildArgs),
    /// Run the linter against the project sources.
    Lint(lint::LintArgs),
    /// Run the test suite against the project sources.
    Test(test::TestArgs),
    /// Build and publish a multi-platform image.
    Publish(publish::PublishArgs),
    /// Manage the local base-image catalog.
    Images(images::ImagesArgs),
}

/// Matrix overrides shared by `build` and `publish`.
#[derive(clap::Args, Debug, Default)]
pub struct MatrixArgs {
    /// Target operating system; repeat to build several.
    #[arg(long = "os")]
    pub oses: Vec<Os>,

    /// Target architecture; repeat to build several.
    #[arg(long = "arch")]
    pub arches: Vec<Arch>,
}

impl MatrixArgs {
    fn apply(self, config: &mut PipelineConfig) {
        if !self.oses.is_empty() {
            config.oses = self.oses;
        }
        if !self.arches.is_empty() {
            config.arches = self.arches;
        }
    }
}

/// Settings resolved from the global flags.
#[derive(Debug)]
pub struct Context {
    /// Engine connection settings.
    pub engine: EngineConfig,
    /// Pipeline settings.
    pub pipeline: PipelineConfig,
}

impl Context {
    fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let pipeline = match &cli.config {
            Some(path) => PipelineConfig::load(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        let mut engine = EngineConfig::default();
        if let Some(dir) = &cli.data_dir {
            engine.data_dir.clone_from(dir);
        }
        if let Some(sink) = &cli.log_sink {
            engine.log_sink = sink.clone();
        }
        if let Some(n) = cli.parallelism {
            engine.parallelism = n.max(1);
        }
        if let Some(isolation) = cli.isolation {
            engine.isolation = isolation;
        }
        Ok(Self { engine, pipeline })
    }

    /// Runs one invocation against a fresh engine connection.
    ///
    /// Ctrl+C cancels the invocation; the connection is closed either way.
    ///
    /// # Errors
    ///
    /// Returns the invocation's error, or an error if the runtime or the
    /// signal handler cannot be set up.
    pub fn run<T, F, Fut>(&self, invocation: F) -> anyhow::Result<T>
    where
        F: FnOnce(Client, PipelineConfig) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let cancel = CancelToken::new();
        let on_signal = cancel.clone();
        ctrlc::set_handler(move || {
            tracing::warn!("interrupted, cancelling");
            on_signal.cancel();
        })
        .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;

        let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
        let pipeline = self.pipeline.clone();
        let value = runtime.block_on(dockyard_pipeline::tasks::with_local_engine(
            &self.engine,
            cancel,
            |client| invocation(client, pipeline),
        ))?;
        Ok(value)
    }
}

fn parse_log_sink(value: &str) -> std::result::Result<LogSink, String> {
    Ok(match value {
        "stdout" => LogSink::Stdout,
        "stderr" => LogSink::Stderr,
        "null" | "none" => LogSink::Null,
        "" => return Err("log sink must not be empty".into()),
        path => LogSink::File(PathBuf::from(path)),
    })
}

fn parse_isolation(value: &str) -> std::result::Result<Isolation, String> {
    match value {
        "auto" => Ok(Isolation::Auto),
        "bubblewrap" | "bwrap" => Ok(Isolation::Bubblewrap),
        "unconfined" | "none" => Ok(Isolation::Unconfined),
        other => Err(format!(
            "unknown isolation `{other}`, expected auto, bubblewrap, or unconfined"
        )),
    }
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let mut ctx = Context::from_cli(&cli)?;
    match cli.command {
        Command::Build(args) => build::execute(args, &mut ctx),
        Command::Lint(args) => lint::execute(args, &mut ctx),
        Command::Test(args) => test::execute(args, &mut ctx),
        Command::Publish(args) => publish::execute(args, &mut ctx),
        Command::Images(args) => images::execute(args, &ctx),
    }
}
