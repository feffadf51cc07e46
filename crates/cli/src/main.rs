//! CLI entrypoint and subcommand orchestration.

mod attachment;
mod config;
mod repl;
#[cfg(test)]
mod test_support;

use std::path::PathBuf;
use std::sync::Arc;

use agent::{ChatSession, GeminiProvider};
use clap::{Parser, Subcommand};
use proto::{ChatModel, TurnPhase};
use tracing::info;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::repl::{Repl, format_model_list};

/// Top-level command-line arguments for the omnichat application.
#[derive(Parser)]
#[command(name = "omnichat")]
#[command(about = "Terminal chat client for Gemini", version = "0.1.0")]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Enable debug logging to ~/.omnichat/logs/debug.log
    #[arg(long, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// CLI subcommands available in the application.
#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat (default when no subcommand is given)
    Chat {
        /// Model id or alias to start with
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Send a single message and exit
    Run {
        /// Message to send
        #[arg(short = 'e', long)]
        exec: String,

        /// Model id or alias to use
        #[arg(short, long)]
        model: Option<String>,

        /// Image file to attach
        #[arg(short, long)]
        attach: Option<PathBuf>,
    },

    /// List available models
    Models,
}

impl Commands {
    fn label(&self) -> &'static str {
        match self {
            Commands::Chat { .. } => "chat",
            Commands::Run { .. } => "run",
            Commands::Models => "models",
        }
    }
}

#[tokio::main]
/// Program entrypoint.
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Chat { model: None });

    // WorkerGuard must outlive main() so buffered file writes are flushed on exit.
    let _file_guard = init_tracing(&cli.log_level, cli.debug);

    if cli.debug {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            command = command.label(),
            log_level = %cli.log_level,
            "========== omnichat session start =========="
        );
    }

    let config = Config::load(cli.config.as_deref())?;

    match command {
        Commands::Chat { model } => cmd_chat(config, model).await,
        Commands::Run {
            exec,
            model,
            attach,
        } => cmd_run(config, exec, model, attach).await,
        Commands::Models => cmd_models(config),
    }
}

/// Console logs go to stderr so they never interleave with streamed replies.
/// With `--debug`, a daily-rotated file under ~/.omnichat/logs gets debug level.
fn init_tracing(
    log_level: &str,
    debug: bool,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter);

    if !debug {
        tracing_subscriber::registry().with(console).init();
        return None;
    }

    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let log_dir = PathBuf::from(home).join(".omnichat").join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let appender = tracing_appender::rolling::daily(&log_dir, "debug.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_ansi(false)
        .with_filter(EnvFilter::new("debug,hyper_util=info,rustls=info,reqwest=info"));
    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .init();
    Some(guard)
}

/// Builds the Gemini-backed session. Fails when no API key is configured.
fn build_session(config: &Config, model: Option<String>) -> proto::Result<Arc<ChatSession>> {
    let api_key = config.require_api_key()?;
    let model = match model {
        Some(name) => name.parse::<ChatModel>()?,
        None => config.agent.effective_model()?,
    };

    let provider = GeminiProvider::with_base_url(api_key, config.agent.base_url.clone())
        .with_system_instruction(config.agent.system_instruction.clone());
    let session = ChatSession::with_default_seed(Arc::new(provider));
    session.select_model(model);
    info!(model = %model, base_url = %config.agent.base_url, "Session ready");
    Ok(Arc::new(session))
}

/// Starts the interactive REPL.
async fn cmd_chat(config: Config, model: Option<String>) -> anyhow::Result<()> {
    let session = build_session(&config, model)?;
    Repl::new(session, &config.ui.image_dir).run().await
}

/// Sends one message, streams the reply to stdout, and exits.
async fn cmd_run(
    config: Config,
    exec: String,
    model: Option<String>,
    attach: Option<PathBuf>,
) -> anyhow::Result<()> {
    let session = build_session(&config, model)?;
    let mut repl = Repl::new(session, &config.ui.image_dir);
    if let Some(path) = attach {
        repl.attach(&path)?;
    }

    let mut stdout = tokio::io::stdout();
    match repl.send_turn(exec, &mut stdout).await? {
        Some(TurnPhase::Finalized) => Ok(()),
        _ => std::process::exit(1),
    }
}

/// Prints the model catalog with the configured default marked.
fn cmd_models(config: Config) -> anyhow::Result<()> {
    let current = config.agent.effective_model()?;
    println!("{}", format_model_list(current));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proto::{ConfigError, ProtoError};

    #[test]
    fn no_subcommand_defaults_to_chat() {
        let cli = Cli::try_parse_from(["omnichat"]).expect("parse");
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "warn");
        assert!(!cli.debug);
    }

    #[test]
    fn run_subcommand_parses_exec_model_and_attachment() {
        let cli = Cli::try_parse_from([
            "omnichat", "run", "-e", "hello", "--model", "pro", "--attach", "cat.png",
        ])
        .expect("parse");
        match cli.command {
            Some(Commands::Run {
                exec,
                model,
                attach,
            }) => {
                assert_eq!(exec, "hello");
                assert_eq!(model.as_deref(), Some("pro"));
                assert_eq!(attach, Some(PathBuf::from("cat.png")));
            }
            _ => panic!("expected run subcommand"),
        }
    }

    #[test]
    fn command_labels_are_stable() {
        assert_eq!(Commands::Chat { model: None }.label(), "chat");
        assert_eq!(Commands::Models.label(), "models");
    }

    #[test]
    fn build_session_requires_api_key() {
        let cfg = Config::default();
        let err = build_session(&cfg, None).err().expect("missing key");
        assert!(matches!(
            err,
            proto::Error::Config(ConfigError::MissingField(ref field)) if field == "agent.api_key"
        ));
    }

    #[test]
    fn build_session_applies_model_override() {
        let mut cfg = Config::default();
        cfg.agent.api_key = "k".to_string();

        let session = build_session(&cfg, None).expect("session");
        assert_eq!(session.model(), ChatModel::Flash);

        let session = build_session(&cfg, Some("image".to_string())).expect("session");
        assert_eq!(session.model(), ChatModel::ImageGen);

        let err = build_session(&cfg, Some("gpt".to_string()))
            .err()
            .expect("unknown model");
        assert!(matches!(err, proto::Error::Proto(ProtoError::InvalidModel(_))));

        cfg.agent.model = "gpt".to_string();
        let err = build_session(&cfg, None).err().expect("bad configured model");
        assert!(matches!(err, proto::Error::Config(ConfigError::InvalidValue { .. })));
    }
}
