//! End-to-end pipeline over the local day store: persist records, read
//! them back, aggregate, run the degraded analysis path, and check that
//! the three renderings agree with each other and with the aggregates.

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use tradedigest::aggregate;
use tradedigest::analyzer::{self, AiAnalysis, GenerativeOracle, SamplingParams};
use tradedigest::report;
use tradedigest::store::{DayStore, MessageRecord};

struct FailingOracle;

#[async_trait]
impl GenerativeOracle for FailingOracle {
    async fn generate(&self, _prompt: &str, _params: &SamplingParams) -> anyhow::Result<String> {
        anyhow::bail!("model endpoint unreachable")
    }
}

fn record(hour: u32, channel_id: &str, author: &str, content: &str) -> MessageRecord {
    MessageRecord {
        ts: Utc.with_ymd_and_hms(2025, 9, 20, hour, 0, 0).unwrap(),
        channel_id: channel_id.to_string(),
        channel_name: Some(format!("channel-{channel_id}")),
        author_id: format!("{author}-id"),
        author: author.to_string(),
        content: content.to_string(),
        urls: Vec::new(),
    }
}

fn sample_day() -> Vec<MessageRecord> {
    vec![
        record(9, "111", "alice#0001", "loading up on $GME here"),
        record(10, "111", "bob#0002", "$GME squeeze and $AMC too"),
        record(11, "111", "alice#0001", "still holding $GME"),
        record(12, "222", "carol#0003", "watching $AMC closely"),
        record(13, "222", "dave#0004", "no tickers, just vibes"),
    ]
}

#[tokio::test]
async fn store_aggregate_analyze_and_render() {
    let date = NaiveDate::from_ymd_opt(2025, 9, 20).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let store = DayStore::new(dir.path());

    for message in sample_day() {
        store.append(&message).unwrap();
    }

    // Reading the day back preserves every record in partition order.
    let records = store.read_day(date).unwrap();
    assert_eq!(records.len(), 5);
    let mut expected = sample_day();
    expected.sort_by(|a, b| a.channel_id.cmp(&b.channel_id).then(a.ts.cmp(&b.ts)));
    assert_eq!(records, expected);

    let stats = aggregate::aggregate(&records);
    assert_eq!(stats.total_messages, 5);
    assert_eq!(stats.unique_authors, 4);
    assert_eq!(stats.mentions("GME"), 3);
    assert_eq!(stats.mentions("AMC"), 2);
    assert_eq!(stats.top_tickers.first().map(|(t, _)| t.as_str()), Some("GME"));
    assert_eq!(stats.channels.len(), 2);

    // Oracle failure degrades to the fallback instead of erroring out.
    let ai = analyzer::analyze(&FailingOracle, &records, &stats).await;
    assert!(ai.error.is_some());
    assert_eq!(ai.watchlist, vec!["GME".to_string(), "AMC".to_string()]);

    let generated_at = Utc.with_ymd_and_hms(2025, 9, 21, 1, 0, 0).unwrap();
    let json = report::render_structured(&stats, &ai, date, generated_at).unwrap();
    let markdown = report::render_markdown(&stats, &ai, date, generated_at);
    let text = report::render_text(&stats, &ai, date);

    // The structured artifact round-trips the aggregates and analysis.
    let artifact: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(artifact["date"], "2025-09-20");
    assert_eq!(artifact["basic_stats"]["total_messages"], 5);
    assert_eq!(artifact["basic_stats"]["top_tickers"]["GME"], 3);
    let rendered_ai: AiAnalysis =
        serde_json::from_value(artifact["ai_insights"].clone()).unwrap();
    assert_eq!(rendered_ai, ai);

    // Human renderings agree on the headline numbers and watchlist order.
    for rendering in [&markdown, &text] {
        let gme = rendering.find("$GME").unwrap();
        let amc = rendering.find("$AMC").unwrap();
        assert!(gme < amc);
    }
    assert!(text.contains("Total Messages: 5"));
    assert!(text.contains("Unique Authors: 4"));
    assert!(markdown.contains("- **Total Messages**: 5"));
    assert!(markdown.contains("- **Unique Authors**: 4"));
    assert!(markdown.contains("# Discord Trading Summary - 2025-09-20"));
    assert!(text.contains("DISCORD TRADING SUMMARY - 2025-09-20"));
}

#[tokio::test]
async fn empty_day_still_renders() {
    let date = NaiveDate::from_ymd_opt(2025, 9, 20).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let store = DayStore::new(dir.path());

    let records = store.read_day(date).unwrap();
    assert!(records.is_empty());

    let stats = aggregate::aggregate(&records);
    assert_eq!(stats.total_messages, 0);

    let ai = analyzer::analyze(&FailingOracle, &records, &stats).await;
    assert!(ai.watchlist.is_empty());

    let text = report::render_text(&stats, &ai, date);
    assert!(text.contains("Total Messages: 0"));
    assert!(!text.contains("TOP WATCHLIST"));
}
