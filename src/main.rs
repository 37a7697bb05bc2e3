//! Parley - terminal chatbot over a text-completion service
//!
//! Frames the running transcript with a prompt template, asks the completion
//! service for the agent's next line, and saves the chat under an id so it can
//! be resumed later with `--chat-id`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod console;
mod conversation;
mod core;
mod providers;

use config::{Config, GenerationDefaults, PromptTemplate, RequestConfig};
use crate::core::{ConversationEngine, SessionStore};
use providers::{Provider, ProviderKind};

#[derive(Debug, Parser)]
#[command(name = "parley")]
#[command(about = "Chat with a completion model from the terminal. Type \"exit\" to end the chat.", long_about = None)]
struct Cli {
    /// Path to the prompt template file
    #[arg(long, default_value = "chatbots/assistant.txt")]
    prompt_file: PathBuf,

    /// Path to a .env-style file with secrets
    #[arg(long, default_value = ".env.secret")]
    secrets_file: PathBuf,

    /// First name of the user
    #[arg(long, default_value = "Human")]
    user_name: String,

    /// First name of the agent
    #[arg(long, default_value = "Assistant")]
    agent_name: String,

    /// Id of a saved chat to resume; the stored names take precedence
    #[arg(long)]
    chat_id: Option<String>,

    /// Unique-ish name for a new chat, used as the id prefix
    #[arg(long, default_value = "test_chat")]
    chat_name: String,

    /// Completion backend
    #[arg(long, value_enum, default_value_t = ProviderKind::OpenAI)]
    provider: ProviderKind,

    /// Model name; overrides the generation file and the provider's default
    #[arg(long, value_parser = clap::builder::NonEmptyStringValueParser::new())]
    model: Option<String>,

    /// TOML file overriding the generation defaults
    #[arg(long)]
    generation_file: Option<PathBuf>,

    /// List saved chats and exit
    #[arg(long)]
    list: bool,
}

/// Generation settings with the model resolved: `--model`, then the file, then the provider default
fn generation_defaults(cli: &Cli) -> anyhow::Result<GenerationDefaults> {
    let mut defaults = match &cli.generation_file {
        Some(path) => GenerationDefaults::from_file(path)
            .with_context(|| format!("loading generation settings from {}", path.display()))?,
        None => GenerationDefaults::default(),
    };
    if let Some(model) = &cli.model {
        defaults.model = Some(model.clone());
    }
    Ok(defaults.or_model(cli.provider.default_model()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_secrets_file(&cli.secrets_file)?;
    let store = SessionStore::new(&config.chat_turns_dir);

    if cli.list {
        for session in store.list().await? {
            println!("{}\t{}", session.chat_id, session.modified.to_rfc3339());
        }
        return Ok(());
    }

    let template = PromptTemplate::load_from_file(&cli.prompt_file).await?;
    let defaults = generation_defaults(&cli)?;
    let provider = Arc::new(Provider::from_kind(cli.provider, &config)?);

    let session = store
        .resolve(
            cli.chat_id.as_deref(),
            &cli.chat_name,
            &cli.user_name,
            &cli.agent_name,
            &template,
        )
        .await?;

    // Stop sequences follow the names the chat actually uses
    let request_config = RequestConfig::for_participants(
        &defaults,
        &session.record.user_name,
        &session.record.agent_name,
    );
    tracing::debug!(?request_config, "Generation parameters");

    let is_new = session.is_new;
    let mut engine = ConversationEngine::new(session.record, template, request_config, provider);

    let mut stdout = tokio::io::stdout();
    if is_new {
        stdout
            .write_all(format!("Chat Id: {}\n", engine.chat_id()).as_bytes())
            .await?;
    }
    console::print_transcript(&engine, &mut stdout).await?;

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let outcome = console::run(&mut engine, stdin, &mut stdout).await;

    // Save whatever was accumulated, even if the console failed
    store.persist(&engine.record()).await?;
    outcome?;

    Ok(())
}
