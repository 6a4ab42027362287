//! graph-reactor CLI: inspect configuration and exercise the runtime.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use graph_reactor::agent::{AgentError, AgentSpecBuilder};
use graph_reactor::graph::{Constness, Content};
use graph_reactor::{Action, Agent, AgentContext, ElementaryEvent, ProgramResult, Reactor};
use graph_reactor::{Completion, ReactorConfig, Trigger};

#[derive(Parser)]
#[command(name = "graph-reactor", version, about = "Reactive agent runtime over a semantic graph")]
struct Cli {
    /// Configuration file (TOML). Defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or create configuration files.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run an echo action through a fresh reactor and report the outcome.
    Selftest {
        /// How long to wait for the action to finish.
        #[arg(long, default_value = "5000")]
        timeout_ms: u64,

        /// Payload passed to the echo agent.
        #[arg(long, default_value = "ping")]
        payload: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML.
    Show,
    /// Write a default configuration file.
    Init {
        /// Destination path.
        #[arg(long, default_value = "graph-reactor.toml")]
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ReactorConfig::load(path)?,
        None => ReactorConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .init();

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                print!("{}", config.to_toml()?);
            }
            ConfigAction::Init { path } => {
                if path.exists() {
                    miette::bail!("{} already exists", path.display());
                }
                ReactorConfig::default().save(&path)?;
                println!("Wrote default configuration to {}", path.display());
            }
        },

        Commands::Selftest {
            timeout_ms,
            payload,
        } => {
            let report = selftest(config, Duration::from_millis(timeout_ms), &payload)?;
            let json = serde_json::to_string_pretty(&report).into_diagnostic()?;
            println!("{json}");
        }
    }

    Ok(())
}

/// Copies the content of its first argument into a new link and answers
/// with it.
struct EchoAgent;

impl Agent for EchoAgent {
    fn name(&self) -> &str {
        "echo"
    }

    fn trigger(&self) -> Trigger {
        Trigger::Action
    }

    fn run(&self, cx: &AgentContext<'_>, _event: &ElementaryEvent, action: &Action) -> ProgramResult {
        let input = action.argument(1).ok_or(AgentError::MissingArgument {
            agent: self.name().to_string(),
            ordinal: 1,
        })?;
        let Some(content) = cx.graph().get_content(input)? else {
            return Ok(Completion::Unsuccessful);
        };
        let output = cx.graph().create_link(Constness::Const)?;
        cx.graph().set_content(output, content)?;
        action.set_answer(output)?;
        Ok(Completion::Success)
    }
}

fn selftest(config: ReactorConfig, timeout: Duration, payload: &str) -> Result<serde_json::Value> {
    let mode = config.dispatch.mode;
    let workers = config.dispatch.workers;
    let reactor = Reactor::new(config)?;
    let graph = reactor.graph();

    let class = graph.resolve_identifier("action_echo").into_diagnostic()?;
    let spec = AgentSpecBuilder::for_action(reactor.keynodes(), class);
    let handle = reactor.subscribe_built_agent(EchoAgent, &spec)?;

    let input = graph.create_link(Constness::Const).into_diagnostic()?;
    graph.set_content(input, Content::from(payload)).into_diagnostic()?;

    let builder = reactor.create_action(class)?.set_argument(1, input)?;
    let action = builder.addr();
    let started = Instant::now();
    let completion = builder.initiate_and_wait(timeout)?;
    let elapsed = started.elapsed();

    let answer = reactor.action(action)?.answer();
    let echoed = match answer {
        Some(link) => graph.get_content(link).into_diagnostic()?,
        None => None,
    };

    reactor.unsubscribe_agent(&handle)?;
    reactor.shutdown();

    Ok(serde_json::json!({
        "mode": mode.to_string(),
        "workers": workers,
        "action": action.to_string(),
        "completion": completion,
        "answer": echoed,
        "elapsed_ms": elapsed.as_secs_f64() * 1000.0,
    }))
}
