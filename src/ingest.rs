use crate::config::IngestConfig;
use crate::gcp::GcpAuth;
use crate::gcs::GcsClient;
use crate::normalize;
use crate::store::{DayStore, MessageRecord};
use chrono::{DateTime, TimeZone, Utc};
use serenity::all::{
    Channel, ChannelId, ChannelType, Context, EventHandler, GetMessages, GuildChannel, Message,
    MessageId, Ready,
};
use serenity::async_trait;
use serenity::http::{Http, HttpError, StatusCode};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{error, info, warn};

const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;
const HISTORY_PAGE: u8 = 100;

/// Outcome set for a channel fetch. Every variant is handled by skipping
/// the channel with a warning; none of them aborts the run.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("channel not found (bad ID or bot not invited)")]
    NotFound,
    #[error("bot lacks permission (View Channel / Read Message History)")]
    Forbidden,
    #[error("transport error: {0}")]
    Transport(String),
}

/// The closed set of conversation containers the ingester understands.
pub enum ChannelKind {
    Text(GuildChannel),
    Thread(GuildChannel),
    Forum(GuildChannel),
    Unsupported(String),
}

/// Gateway handler that runs the one-shot history dump once the client is
/// ready, then shuts the shard down so `Client::start` returns.
pub struct Handler {
    config: IngestConfig,
    store: DayStore,
    started: AtomicBool,
}

impl Handler {
    pub fn new(config: IngestConfig, store: DayStore) -> Self {
        Self {
            config,
            store,
            started: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        // ready fires again on gateway reconnects; the pass runs once.
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Connected as {}", ready.user.name);

        let config = self.config.clone();
        let store = self.store.clone();
        tokio::spawn(async move {
            let pass = tokio::spawn({
                let ctx = ctx.clone();
                let config = config.clone();
                let store = store.clone();
                async move { run_history_pass(&ctx, &config, &store).await }
            });
            if let Err(e) = pass.await {
                error!("Ingestion task failed: {e}");
            }
            // Release the gateway connection on every exit path so the
            // process does not hold transport resources across restarts.
            ctx.shard.shutdown_clean();
        });
    }
}

/// Visit each configured channel once, dump its history since the floor
/// timestamp into the day store, then upload buffered partitions.
/// Per-channel failures are logged and skipped.
pub async fn run_history_pass(ctx: &Context, config: &IngestConfig, store: &DayStore) {
    for &cid in &config.channel_ids {
        let id = ChannelId::new(cid);
        match fetch_channel(&ctx.http, id).await {
            Ok(ChannelKind::Text(channel)) => {
                info!(
                    "Reading #{} ({}) since {}",
                    channel.name,
                    channel.id,
                    config.since_utc.to_rfc3339()
                );
                match dump_history(ctx, &channel, config, store).await {
                    Ok(count) => info!("Finished channel {}, messages read: {}", channel.id, count),
                    Err(e) => warn!("Dump of channel {} failed: {e:#}. Skipping.", channel.id),
                }
            }
            Ok(ChannelKind::Thread(thread)) => {
                if let Err(e) = dump_thread(ctx, &thread, config, store).await {
                    warn!("Dump of thread {} failed: {e:#}. Skipping.", thread.id);
                }
            }
            Ok(ChannelKind::Forum(forum)) => {
                if let Err(e) = dump_forum(ctx, &forum, config, store).await {
                    warn!("Dump of forum {} failed: {e:#}. Skipping.", forum.id);
                }
            }
            Ok(ChannelKind::Unsupported(kind)) => {
                warn!("Channel {} is unsupported type {}; skipping.", cid, kind);
            }
            Err(FetchError::NotFound) => {
                warn!("Channel {} not found (bad ID or bot not invited). Skipping.", cid);
            }
            Err(FetchError::Forbidden) => {
                warn!(
                    "Channel {} exists but bot lacks permission (View/Read History). Skipping.",
                    cid
                );
            }
            Err(FetchError::Transport(e)) => {
                warn!("HTTP error fetching channel {}: {}. Skipping.", cid, e);
            }
        }
    }

    upload_buffered(config, store).await;
}

/// Fetch a channel by id and classify it into the supported variants.
pub async fn fetch_channel(http: &Http, id: ChannelId) -> Result<ChannelKind, FetchError> {
    let channel = http.get_channel(id).await.map_err(classify_fetch_error)?;
    Ok(match channel {
        Channel::Guild(guild_channel) => match guild_channel.kind {
            ChannelType::Text | ChannelType::News => ChannelKind::Text(guild_channel),
            ChannelType::PublicThread | ChannelType::PrivateThread | ChannelType::NewsThread => {
                ChannelKind::Thread(guild_channel)
            }
            ChannelType::Forum => ChannelKind::Forum(guild_channel),
            other => ChannelKind::Unsupported(format!("{other:?}")),
        },
        Channel::Private(_) => ChannelKind::Unsupported("Private".to_string()),
        _ => ChannelKind::Unsupported("Unknown".to_string()),
    })
}

fn classify_fetch_error(err: serenity::Error) -> FetchError {
    if let serenity::Error::Http(HttpError::UnsuccessfulRequest(ref response)) = err {
        match response.status_code {
            StatusCode::NOT_FOUND => return FetchError::NotFound,
            StatusCode::FORBIDDEN => return FetchError::Forbidden,
            _ => {}
        }
    }
    FetchError::Transport(err.to_string())
}

async fn dump_thread(
    ctx: &Context,
    thread: &GuildChannel,
    config: &IngestConfig,
    store: &DayStore,
) -> anyhow::Result<u64> {
    info!(
        "Reading thread {} ({}) in parent {:?} since {}",
        thread.name,
        thread.id,
        thread.parent_id,
        config.since_utc.to_rfc3339()
    );
    let count = dump_history(ctx, thread, config, store).await?;
    info!("Finished thread {}, messages read: {}", thread.id, count);
    Ok(count)
}

/// A forum container itself has no messages: dump its live threads, then
/// page through archived public threads (oldest archive timestamp as the
/// cursor) until the listing is exhausted.
async fn dump_forum(
    ctx: &Context,
    forum: &GuildChannel,
    config: &IngestConfig,
    store: &DayStore,
) -> anyhow::Result<()> {
    let active = ctx.http.get_guild_active_threads(forum.guild_id).await?;
    for thread in active
        .threads
        .iter()
        .filter(|t| t.parent_id == Some(forum.id))
    {
        if let Err(e) = dump_thread(ctx, thread, config, store).await {
            warn!("Dump of live thread {} failed: {e:#}. Skipping.", thread.id);
        }
    }

    let mut before: Option<u64> = None;
    loop {
        let page = ctx
            .http
            .get_channel_archived_public_threads(forum.id, before, Some(HISTORY_PAGE as u64))
            .await?;
        for thread in &page.threads {
            if let Err(e) = dump_thread(ctx, thread, config, store).await {
                warn!(
                    "Dump of archived thread {} failed: {e:#}. Skipping.",
                    thread.id
                );
            }
        }
        if !page.has_more {
            break;
        }
        before = page
            .threads
            .last()
            .and_then(|t| t.thread_metadata.as_ref())
            .and_then(|m| m.archive_timestamp)
            .map(|ts| ts.unix_timestamp() as u64);
        if before.is_none() {
            break;
        }
    }
    Ok(())
}

/// Consume a channel's history oldest-first from the snowflake floor,
/// echoing each message to stdout and appending the normalized record.
async fn dump_history(
    ctx: &Context,
    channel: &GuildChannel,
    config: &IngestConfig,
    store: &DayStore,
) -> anyhow::Result<u64> {
    let mut anchor = snowflake_after(config.since_utc);
    let mut count = 0u64;

    loop {
        let builder = GetMessages::new().after(anchor).limit(HISTORY_PAGE);
        let mut batch = channel.id.messages(&ctx.http, builder).await?;
        if batch.is_empty() {
            break;
        }
        // Discord serves pages newest-first; restore chronological order.
        batch.sort_by_key(|m| m.id);

        for message in &batch {
            echo_message(message, config.print_authors);
            if let Some(record) = record_from_message(message, Some(&channel.name)) {
                store.append(&record)?;
            }
            count += 1;
        }

        anchor = batch.last().map(|m| m.id).unwrap_or(anchor);
        if batch.len() < HISTORY_PAGE as usize {
            break;
        }
    }
    Ok(count)
}

/// Console echo of one consumed message; author identity only when
/// configured.
fn echo_message(message: &Message, print_authors: bool) {
    let line: String = message
        .content
        .replace('\n', " ")
        .trim()
        .chars()
        .take(400)
        .collect();
    let ts = message.timestamp.to_string();
    if print_authors {
        println!("[{}] {}: {}", ts, message.author.tag(), line);
    } else {
        println!("[{ts}] {line}");
    }
}

fn record_from_message(message: &Message, channel_name: Option<&str>) -> Option<MessageRecord> {
    let attachment_urls: Vec<String> =
        message.attachments.iter().map(|a| a.url.clone()).collect();
    let ts = Utc
        .timestamp_opt(message.timestamp.unix_timestamp(), 0)
        .single()?;
    build_record(
        ts,
        &message.channel_id.to_string(),
        channel_name,
        &message.author.id.to_string(),
        &message.author.tag(),
        &message.content,
        &attachment_urls,
    )
}

/// Build the persisted record for one raw message, or `None` when nothing
/// survives cleanup (such messages are never persisted).
pub fn build_record(
    ts: DateTime<Utc>,
    channel_id: &str,
    channel_name: Option<&str>,
    author_id: &str,
    author: &str,
    raw_content: &str,
    attachment_urls: &[String],
) -> Option<MessageRecord> {
    let content = normalize::clean_content(raw_content)?;
    Some(MessageRecord {
        ts,
        channel_id: channel_id.to_string(),
        channel_name: channel_name.map(str::to_string),
        author_id: author_id.to_string(),
        author: author.to_string(),
        content,
        urls: normalize::collect_urls(raw_content, attachment_urls),
    })
}

/// Message-id floor for "history since `ts`": the snowflake a message
/// created at that instant would carry.
fn snowflake_after(ts: DateTime<Utc>) -> MessageId {
    let ms = ts
        .timestamp_millis()
        .saturating_sub(DISCORD_EPOCH_MS)
        .max(1) as u64;
    MessageId::new(ms << 22)
}

/// Upload every buffered partition file; failures are logged, never fatal,
/// since the local buffer stays durable for the life of the process.
async fn upload_buffered(config: &IngestConfig, store: &DayStore) {
    let Some(bucket) = &config.gcs_bucket else {
        info!("GCS_BUCKET not set; skipping upload.");
        return;
    };
    let http = reqwest::Client::new();
    let gcs = GcsClient::new(http.clone(), GcpAuth::new(http), bucket.clone());
    match gcs.upload_day_files(store).await {
        Ok(0) => info!("No JSONL files found to upload."),
        Ok(n) => info!("Uploaded {} JSONL files to GCS.", n),
        Err(e) => warn!("Upload to GCS failed: {e:#}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snowflake_floor_round_trips_the_timestamp() {
        let ts = Utc.with_ymd_and_hms(2025, 9, 20, 0, 0, 0).unwrap();
        let id = snowflake_after(ts);
        let back_ms = (id.get() >> 22) as i64 + DISCORD_EPOCH_MS;
        assert_eq!(back_ms, ts.timestamp_millis());
    }

    #[test]
    fn snowflake_floor_clamps_pre_epoch_timestamps() {
        let ancient = Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(snowflake_after(ancient).get(), 1 << 22);
    }

    #[test]
    fn build_record_suppresses_empty_content() {
        let ts = Utc.with_ymd_and_hms(2025, 9, 20, 12, 0, 0).unwrap();
        assert!(build_record(ts, "1", None, "2", "a", "\u{1F600}", &[]).is_none());

        let record = build_record(
            ts,
            "1",
            Some("stocks"),
            "2",
            "trader#0001",
            "buy $GME https://x.test/dd",
            &["https://cdn.example/chart.png".to_string()],
        )
        .unwrap();
        assert_eq!(record.content, "buy $GME https://x.test/dd");
        assert_eq!(
            record.urls,
            vec!["https://cdn.example/chart.png", "https://x.test/dd"]
        );
        assert_eq!(record.channel_name.as_deref(), Some("stocks"));
    }
}
