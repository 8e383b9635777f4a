use anyhow::{Context, Result};
use futures::StreamExt;
use llm_relay::cli::{Args, ChatConfig, ConfigDiscovery, EmbedConfig, ExecutionMode};
use llm_relay::env;
use llm_relay::llm::HttpProviderFactory;
use llm_relay::{ChatOptions, LLMManager, Message};
use std::io::{self, Write};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(env::DEFAULT_LOG_FILTER)),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = run(args, mode).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args, mode: ExecutionMode) -> Result<()> {
    match mode {
        ExecutionMode::ShowConfig => {
            ConfigDiscovery::show_discovery_info();
            return Ok(());
        }
        ExecutionMode::InitConfig => {
            let path = ConfigDiscovery::create_default_user_config()?;
            println!("Configuration file: {}", path.display());
            return Ok(());
        }
        _ => {}
    }

    let config = ConfigDiscovery::load(args.config.as_deref())?;
    let manager = LLMManager::new(config, &HttpProviderFactory)
        .await
        .context("Failed to initialize LLM manager")?;

    let result = match mode {
        ExecutionMode::Chat(chat) => run_chat(&manager, chat).await,
        ExecutionMode::Embed(embed) => run_embed(&manager, embed).await,
        ExecutionMode::Status => run_status(&manager).await,
        ExecutionMode::Health => run_health(&manager).await,
        ExecutionMode::ShowConfig | ExecutionMode::InitConfig => Ok(()),
    };

    manager.destroy().await;
    result
}

async fn run_chat(manager: &LLMManager, chat: ChatConfig) -> Result<()> {
    let mut messages = Vec::new();
    if let Some(system) = chat.system {
        messages.push(Message::system(system));
    }
    messages.push(Message::user(chat.prompt));

    let options = ChatOptions {
        model: chat.model,
        max_tokens: chat.max_tokens,
        temperature: chat.temperature,
        ..Default::default()
    };

    if chat.stream {
        let mut stream = manager
            .chat_stream(messages, &chat.context, options)
            .await?;
        let mut stdout = io::stdout();
        let mut provider = None;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if let Some(delta) = &chunk.delta_content {
                write!(stdout, "{}", delta)?;
                stdout.flush()?;
            }
            if provider.is_none() {
                provider = chunk
                    .metadata
                    .get("provider")
                    .and_then(|value| value.as_str())
                    .map(str::to_string);
            }
        }
        writeln!(stdout)?;
        if let Some(provider) = provider {
            info!("Streamed response from {}", provider);
        }
        return Ok(());
    }

    let response = manager.chat(messages, &chat.context, options).await?;
    println!("{}", response.content);
    info!(
        "Response from {} ({} tokens, ${:.6})",
        response
            .metadata
            .get("provider")
            .and_then(|value| value.as_str())
            .unwrap_or("unknown"),
        response.usage.total_tokens,
        response
            .metadata
            .get("cost")
            .and_then(|value| value.as_f64())
            .unwrap_or(0.0)
    );
    Ok(())
}

async fn run_embed(manager: &LLMManager, embed: EmbedConfig) -> Result<()> {
    let vectors = manager
        .embeddings(embed.texts, &embed.context, embed.model)
        .await?;
    println!("{}", serde_json::to_string(&vectors)?);
    Ok(())
}

async fn run_status(manager: &LLMManager) -> Result<()> {
    let status = manager.status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn run_health(manager: &LLMManager) -> Result<()> {
    let mut results: Vec<_> = manager.run_health_checks().await.into_iter().collect();
    results.sort();

    for (name, healthy) in &results {
        println!("{:<24} {}", name, if *healthy { "healthy" } else { "unhealthy" });
    }

    let unhealthy = results.iter().filter(|(_, healthy)| !healthy).count();
    if unhealthy > 0 {
        anyhow::bail!("{} of {} providers failed their health check", unhealthy, results.len());
    }
    Ok(())
}
