use std::sync::Arc;

use assistant_bridge::assistant::{AssistantProfile, OpenAiClient, RunCoordinator, RunSettings};
use assistant_bridge::bot::Bot;
use assistant_bridge::channels::{Channel, CliChannel, TelegramChannel};
use assistant_bridge::config::BotConfig;
use assistant_bridge::error::Result;
use assistant_bridge::i18n::Translations;
use assistant_bridge::tools::ToolRegistry;
use assistant_bridge::tools::builtin::{
    ImageGenerationTool, WeatherTool, WebScrapeTool, WebSearchTool,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = BotConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        eprintln!("  export OPENAI_API_KEY=sk-...");
        std::process::exit(1);
    });

    eprintln!("🤖 Assistant Bridge v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Assistant: {} ({})", config.assistant.name, config.assistant.model);
    eprintln!(
        "   Polling: every {:?}, up to {} times",
        config.poll.interval, config.poll.max_polls
    );

    // ── Translations ─────────────────────────────────────────────────────
    let translations = match &config.translations_path {
        Some(path) => Translations::load(path).await.unwrap_or_else(|e| {
            eprintln!(
                "   Warning: Could not load translations from {}: {}",
                path.display(),
                e
            );
            Translations::embedded()
        }),
        None => Translations::embedded(),
    };
    eprintln!(
        "   Language: {} (available: {})",
        config.bot_language,
        translations.languages().join(", ")
    );

    // ── Tools ────────────────────────────────────────────────────────────
    let tools = Arc::new(ToolRegistry::new());
    tools.register_sync(Arc::new(WebSearchTool::new(&config.search)));
    tools.register_sync(Arc::new(WebScrapeTool::new()));
    tools.register_sync(Arc::new(WeatherTool::new()));
    tools.register_sync(Arc::new(ImageGenerationTool::new(
        config.api_key.clone(),
        config.base_url.clone(),
    )));
    eprintln!("   Tools: {} registered", tools.count());

    // ── Assistant ────────────────────────────────────────────────────────
    let api = Arc::new(
        OpenAiClient::new(config.api_key.clone(), config.base_url.clone())
            .with_timeout(config.request_timeout),
    );
    let profile = AssistantProfile::build(&config.assistant, Some(tools.as_ref())).await;
    let coordinator = RunCoordinator::new(api, RunSettings::from(&config), profile)
        .with_tools(Arc::clone(&tools));

    let assistant_id = coordinator.ensure_assistant().await.unwrap_or_else(|e| {
        eprintln!("Error: Could not resolve assistant: {}", e);
        std::process::exit(1);
    });
    eprintln!("   Assistant id: {}", assistant_id);

    // ── Channels ─────────────────────────────────────────────────────────
    let mut bot = Bot::new(
        Arc::new(coordinator),
        Arc::new(translations),
        config.bot_language.clone(),
    );

    bot.add_channel(Arc::new(CliChannel::new()));
    let mut active_channels = vec!["cli"];

    if let Some(telegram) = &config.telegram {
        let channel = TelegramChannel::from_config(telegram);
        if let Err(e) = channel.health_check().await {
            eprintln!("   Warning: Telegram health check failed: {}", e);
        }
        eprintln!(
            "   Telegram: enabled (allowed: {})",
            if telegram.allowed_users.iter().any(|u| u == "*") {
                "everyone".to_string()
            } else {
                telegram.allowed_users.join(", ")
            }
        );
        bot.add_channel(Arc::new(channel));
        active_channels.push("telegram");
    }

    eprintln!("   Channels: {}", active_channels.join(", "));
    eprintln!("   Type a message and press Enter. /quit to exit.\n");

    Arc::new(bot).run().await?;
    Ok(())
}
