use chrono::{NaiveDate, Utc};
use tradedigest::aggregate::{self, DayStats};
use tradedigest::analyzer::{self, AiAnalysis, VertexOracle};
use tradedigest::config::AnalysisConfig;
use tradedigest::gcp::GcpAuth;
use tradedigest::gcs::GcsClient;
use tradedigest::notion::NotionClient;
use tradedigest::report;
use tradedigest::store::MessageRecord;
use tracing::{error, info, warn};

struct Args {
    date: Option<NaiveDate>,
    no_ai: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut date = None;
    let mut no_ai = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--no-ai" => no_ai = true,
            "--help" | "-h" => {
                println!("Usage: summarize [YYYY-MM-DD] [--no-ai]");
                std::process::exit(0);
            }
            other if other.starts_with('-') => {
                anyhow::bail!("unknown flag {:?} (expected [YYYY-MM-DD] [--no-ai])", other)
            }
            other => {
                date = Some(parse_date(other)?);
            }
        }
    }
    // DAY supports cron-style invocations without positional args.
    if date.is_none() {
        if let Ok(raw) = std::env::var("DAY") {
            if !raw.trim().is_empty() {
                date = Some(parse_date(raw.trim())?);
            }
        }
    }
    Ok(Args { date, no_ai })
}

fn parse_date(raw: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| anyhow::anyhow!("date {:?} is not YYYY-MM-DD", raw))
}

async fn run_analysis(
    config: &AnalysisConfig,
    client: &reqwest::Client,
    auth: &GcpAuth,
    records: &[MessageRecord],
    stats: &DayStats,
) -> AiAnalysis {
    // Oracle construction failures degrade exactly like generation failures.
    match VertexOracle::from_config(config, client.clone(), auth.clone()).await {
        Ok(oracle) => analyzer::analyze(&oracle, records, stats).await,
        Err(e) => {
            error!("Vertex AI unavailable, falling back to basic summary: {e:#}");
            AiAnalysis::fallback(stats, &format!("{e:#}"))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args = parse_args()?;
    let config = AnalysisConfig::from_env()?;

    let http = reqwest::Client::new();
    let auth = GcpAuth::new(http.clone());
    let gcs = GcsClient::new(http.clone(), auth.clone(), config.gcs_bucket.clone());

    let date = match args.date {
        Some(date) => date,
        None => match gcs.list_dates().await?.pop() {
            Some(latest) => {
                info!("No date given; using latest stored day {}", latest);
                latest
            }
            None => anyhow::bail!("no stored days found in gs://{}", config.gcs_bucket),
        },
    };

    info!("Summarizing {}", date);
    let records = gcs.load_day(date).await?;
    ensure_day_has_records(&records, date)?;
    let stats = aggregate::aggregate(&records);

    let ai = if args.no_ai {
        info!("AI analysis disabled (--no-ai)");
        AiAnalysis::fallback(&stats, "AI analysis disabled")
    } else {
        run_analysis(&config, &http, &auth, &records, &stats).await
    };

    let generated_at = Utc::now();
    let json = report::render_structured(&stats, &ai, date, generated_at)?;
    let markdown = report::render_markdown(&stats, &ai, date, generated_at);
    let text = report::render_text(&stats, &ai, date);

    println!("{text}");

    let urls = gcs.publish_summaries(date, &json, &markdown, &text).await?;
    info!("Published {}, {}, {}", urls.json, urls.markdown, urls.text);

    match (&config.notion_token, &config.notion_database_id) {
        (Some(token), Some(database_id)) => {
            let notion = NotionClient::new(http.clone(), token.clone(), database_id.clone());
            let page_url = notion.upsert_summary(&stats, &ai, date).await?;
            info!("Notion page: {}", page_url);
        }
        _ => match notion_missing_var(&config) {
            Some(missing) => warn!(
                "Notion partially configured ({} missing); skipping page creation.",
                missing
            ),
            None => info!("Notion not configured; skipping page creation."),
        },
    }

    Ok(())
}

/// A day with no stored records is not summarized: nothing is published
/// and the run fails, so a silent ingestion gap surfaces as a job error.
fn ensure_day_has_records(records: &[MessageRecord], date: NaiveDate) -> anyhow::Result<()> {
    if records.is_empty() {
        anyhow::bail!("no messages stored for {date}; nothing to summarize");
    }
    Ok(())
}

/// Which half of the Notion token/database pair is missing, if exactly
/// one is set. `None` means fully configured or fully absent.
fn notion_missing_var(config: &AnalysisConfig) -> Option<&'static str> {
    match (&config.notion_token, &config.notion_database_id) {
        (Some(_), None) => Some("NOTION_DATABASE_ID"),
        (None, Some(_)) => Some("NOTION_API_TOKEN"),
        _ => None,
    }
}
