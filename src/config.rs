use chrono::{DateTime, Duration, NaiveDate, Utc};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;

/// Default local buffer for day-partitioned JSONL files (ephemeral in containers).
pub const DEFAULT_INGEST_DIR: &str = "/tmp/ingest";

/// Settings for the ingestion pass (the `tradedigest` binary).
#[derive(Clone)]
pub struct IngestConfig {
    pub discord_token: String,
    pub channel_ids: Vec<u64>,
    pub since_utc: DateTime<Utc>,
    pub print_authors: bool,
    pub ingest_dir: PathBuf,
    pub gcs_bucket: Option<String>,
}

/// Settings for the daily analysis pass (the `summarize` binary).
#[derive(Clone)]
pub struct AnalysisConfig {
    pub gcs_bucket: String,
    pub notion_token: Option<String>,
    pub notion_database_id: Option<String>,
    pub gcp_project_id: Option<String>,
    pub gcp_region: String,
    pub gemini_model: String,
}

impl IngestConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        let discord_token = env::var("DISCORD_BOT_TOKEN")
            .map_err(|_| anyhow::anyhow!("DISCORD_BOT_TOKEN missing. Add it to your .env"))?;
        if discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_BOT_TOKEN missing. Add it to your .env");
        }

        let ch_raw = env::var("CHANNEL_IDS").unwrap_or_default();
        let channel_ids = parse_channel_ids(&ch_raw)?;
        if channel_ids.is_empty() {
            anyhow::bail!("CHANNEL_IDS missing (comma-separated channel IDs)");
        }

        // Default floor: last 24 hours, so a daily job captures a full day.
        let since_utc = match env::var("SINCE_UTC_DATE") {
            Ok(raw) if !raw.trim().is_empty() => parse_since(raw.trim())?,
            _ => Utc::now() - Duration::hours(24),
        };

        Ok(IngestConfig {
            discord_token,
            channel_ids,
            since_utc,
            print_authors: env_bool("PRINT_AUTHORS", true),
            ingest_dir: env::var("INGEST_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_INGEST_DIR)),
            gcs_bucket: env::var("GCS_BUCKET").ok().filter(|b| !b.trim().is_empty()),
        })
    }
}

impl AnalysisConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        let gcs_bucket = env::var("GCS_BUCKET")
            .ok()
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("GCS_BUCKET missing (target bucket name)"))?;

        Ok(AnalysisConfig {
            gcs_bucket,
            notion_token: env::var("NOTION_API_TOKEN")
                .ok()
                .filter(|t| !t.trim().is_empty()),
            notion_database_id: env::var("NOTION_DATABASE_ID")
                .ok()
                .filter(|d| !d.trim().is_empty()),
            gcp_project_id: env::var("GCP_PROJECT_ID")
                .ok()
                .filter(|p| !p.trim().is_empty()),
            gcp_region: env::var("GCP_REGION").unwrap_or_else(|_| "us-central1".to_string()),
            gemini_model: env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| "gemini-2.0-flash-001".to_string()),
        })
    }
}

fn parse_channel_ids(raw: &str) -> anyhow::Result<Vec<u64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .map_err(|_| anyhow::anyhow!("CHANNEL_IDS entry {:?} is not a valid channel id", s))
        })
        .collect()
}

/// Accepts a full RFC 3339 instant or a bare YYYY-MM-DD (midnight UTC).
fn parse_since(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| anyhow::anyhow!("SINCE_UTC_DATE {:?} is out of range", raw))?;
        return Ok(DateTime::from_naive_utc_and_offset(midnight, Utc));
    }
    anyhow::bail!("SINCE_UTC_DATE {:?} is not ISO-8601 (expected RFC 3339 or YYYY-MM-DD)", raw)
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(val) => matches!(
            val.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "y"
        ),
        Err(_) => default,
    }
}

impl std::fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestConfig")
            .field("discord_token", &"[REDACTED]")
            .field("channel_ids", &self.channel_ids)
            .field("since_utc", &self.since_utc)
            .field("print_authors", &self.print_authors)
            .field("ingest_dir", &self.ingest_dir)
            .field("gcs_bucket", &self.gcs_bucket)
            .finish()
    }
}

impl std::fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("gcs_bucket", &self.gcs_bucket)
            .field(
                "notion_token",
                &self.notion_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("notion_database_id", &self.notion_database_id)
            .field("gcp_project_id", &self.gcp_project_id)
            .field("gcp_region", &self.gcp_region)
            .field("gemini_model", &self.gemini_model)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_channel_id_lists() {
        assert_eq!(
            parse_channel_ids("1, 2,3 ,").unwrap(),
            vec![1u64, 2, 3]
        );
        assert!(parse_channel_ids("abc").is_err());
        assert!(parse_channel_ids("").unwrap().is_empty());
    }

    #[test]
    fn parses_since_timestamps() {
        let midnight = parse_since("2025-09-20").unwrap();
        assert_eq!(midnight, Utc.with_ymd_and_hms(2025, 9, 20, 0, 0, 0).unwrap());

        let instant = parse_since("2025-09-20T12:30:00Z").unwrap();
        assert_eq!(instant, Utc.with_ymd_and_hms(2025, 9, 20, 12, 30, 0).unwrap());

        assert!(parse_since("not-a-date").is_err());
    }

    #[test]
    fn env_bool_accepts_common_truthy_values() {
        env::set_var("TD_TEST_FLAG", "YES");
        assert!(env_bool("TD_TEST_FLAG", false));
        env::set_var("TD_TEST_FLAG", "0");
        assert!(!env_bool("TD_TEST_FLAG", true));
        env::remove_var("TD_TEST_FLAG");
        assert!(env_bool("TD_TEST_FLAG", true));
    }

    #[test]
    fn ingest_config_requires_token_and_channels() {
        env::remove_var("DISCORD_BOT_TOKEN");
        env::remove_var("CHANNEL_IDS");
        assert!(IngestConfig::build().is_err());

        env::set_var("DISCORD_BOT_TOKEN", "test_token");
        assert!(IngestConfig::build().is_err(), "still missing CHANNEL_IDS");

        env::set_var("CHANNEL_IDS", "123,456");
        let cfg = IngestConfig::build().unwrap();
        assert_eq!(cfg.channel_ids, vec![123u64, 456]);
        assert!(cfg.print_authors);

        let debug_output = format!("{:?}", cfg);
        assert!(!debug_output.contains("test_token"));
        assert!(debug_output.contains("[REDACTED]"));

        env::remove_var("DISCORD_BOT_TOKEN");
        env::remove_var("CHANNEL_IDS");
    }
}
