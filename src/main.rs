use serenity::all::{Client, GatewayIntents};
use tradedigest::config::IngestConfig;
use tradedigest::ingest::Handler;
use tradedigest::store::DayStore;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Load configuration
    let config = IngestConfig::from_env()?;
    let token = config.discord_token.clone();
    let store = DayStore::new(config.ingest_dir.clone());

    let intents =
        GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT;

    let mut client = Client::builder(&token, intents)
        .event_handler(Handler::new(config, store))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create client: {}", e))?;

    info!("Starting ingestion pass...");
    // Returns once the ready handler finishes the pass and shuts the
    // shard down.
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
        std::process::exit(1);
    }
    Ok(())
}
