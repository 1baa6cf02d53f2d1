pub mod vertex;

use crate::aggregate::{ordered_map, DayStats};
use crate::store::MessageRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

pub use vertex::VertexOracle;

/// Messages sent to the oracle are capped to this deterministic prefix.
const MAX_PROMPT_MESSAGES: usize = 100;
/// Tickers embedded in the prompt context line.
const MAX_PROMPT_TICKERS: usize = 10;
/// Fallback watchlists carry at most this many tickers.
const FALLBACK_WATCHLIST_LIMIT: usize = 5;

/// Fixed sampling parameters: low temperature and bounded output, to favor
/// factual JSON over creativity.
#[derive(Debug, Clone, Copy)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        SamplingParams {
            temperature: 0.2,
            top_p: 0.8,
            top_k: 40,
            max_output_tokens: 2048,
        }
    }
}

/// The external generative model, seen as a black box turning a prompt
/// into raw text. Implemented by `VertexOracle`; tests substitute stubs.
#[async_trait]
pub trait GenerativeOracle: Send + Sync {
    async fn generate(&self, prompt: &str, params: &SamplingParams) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
    Mixed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Conviction {
    High,
    Medium,
    Low,
    #[serde(other)]
    Unknown,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Bullish => "bullish",
            Sentiment::Bearish => "bearish",
            Sentiment::Neutral => "neutral",
            Sentiment::Mixed => "mixed",
            Sentiment::Unknown => "unknown",
        }
    }
}

impl Conviction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Conviction::High => "high",
            Conviction::Medium => "medium",
            Conviction::Low => "low",
            Conviction::Unknown => "unknown",
        }
    }
}

/// Oracle verdict for one ticker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TickerInsight {
    pub sentiment: Sentiment,
    pub conviction: Conviction,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
}

/// Structured result of the AI pass. Advisory only: validated as
/// well-formed JSON, never for semantic correctness. `error` is set on the
/// fallback value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiAnalysis {
    #[serde(default)]
    pub executive_summary: String,
    #[serde(default, with = "ordered_map")]
    pub ticker_analysis: Vec<(String, TickerInsight)>,
    #[serde(default)]
    pub key_themes: Vec<String>,
    #[serde(default)]
    pub notable_insights: Vec<String>,
    #[serde(default)]
    pub watchlist: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AiAnalysis {
    /// Degraded result used when the oracle call or parse fails: an error
    /// marker plus a best-effort watchlist from the aggregation alone.
    pub fn fallback(stats: &DayStats, reason: &str) -> Self {
        AiAnalysis {
            executive_summary: "AI analysis unavailable - see basic statistics".to_string(),
            ticker_analysis: Vec::new(),
            key_themes: Vec::new(),
            notable_insights: Vec::new(),
            watchlist: stats
                .top_tickers
                .iter()
                .take(FALLBACK_WATCHLIST_LIMIT)
                .map(|(ticker, _)| ticker.clone())
                .collect(),
            error: Some(reason.to_string()),
        }
    }
}

/// Run the AI pass. This is the one pipeline stage allowed to fail, and it
/// degrades instead of propagating: any oracle or parse error is logged
/// and replaced by the fallback value.
pub async fn analyze(
    oracle: &dyn GenerativeOracle,
    records: &[MessageRecord],
    stats: &DayStats,
) -> AiAnalysis {
    match try_analyze(oracle, records, stats).await {
        Ok(analysis) => {
            info!("Successfully generated AI analysis");
            analysis
        }
        Err(e) => {
            error!("AI analysis failed, falling back to basic summary: {e:#}");
            AiAnalysis::fallback(stats, &format!("{e:#}"))
        }
    }
}

async fn try_analyze(
    oracle: &dyn GenerativeOracle,
    records: &[MessageRecord],
    stats: &DayStats,
) -> anyhow::Result<AiAnalysis> {
    let prompt = build_prompt(records, stats);
    let raw = oracle.generate(&prompt, &SamplingParams::default()).await?;
    let body = strip_code_fences(&raw);
    let analysis: AiAnalysis =
        serde_json::from_str(body).map_err(|e| anyhow::anyhow!("oracle returned unparsable JSON: {e}"))?;
    Ok(analysis)
}

/// Fixed-structure prompt: aggregate context, the first `MAX_PROMPT_MESSAGES`
/// messages as `[channel] author: content` lines, and an instruction pinning
/// the JSON response shape.
pub fn build_prompt(records: &[MessageRecord], stats: &DayStats) -> String {
    let records = if records.len() > MAX_PROMPT_MESSAGES {
        info!(
            "Limiting messages to {} for LLM analysis",
            MAX_PROMPT_MESSAGES
        );
        &records[..MAX_PROMPT_MESSAGES]
    } else {
        records
    };

    let messages_str = records
        .iter()
        .map(|r| {
            format!(
                "[{}] {}: {}",
                r.channel_name.as_deref().unwrap_or("unknown"),
                r.author,
                r.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let tickers_str = stats
        .top_tickers
        .iter()
        .take(MAX_PROMPT_TICKERS)
        .map(|(ticker, count)| format!("${ticker} ({count} mentions)"))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"You are analyzing discussions from a Discord trading community. Your goal is to provide actionable insights for traders.

## Context
- Total Messages: {total}
- Unique Authors: {authors}
- Top Mentioned Tickers: {tickers_str}

## Messages
{messages_str}

## Your Task
Analyze these trading discussions and provide:

1. **Sentiment Analysis**: For each frequently mentioned ticker, what's the overall sentiment? (Bullish/Bearish/Neutral/Mixed)

2. **Key Themes**: What are the main topics or concerns being discussed? (earnings, technical patterns, news events, etc.)

3. **Notable Insights**: Any specific actionable insights, trade ideas, or risk warnings mentioned?

4. **Community Conviction**: Which tickers have the strongest conviction from the community? Look for multiple mentions, detailed analysis, or experienced traders weighing in.

5. **Executive Summary**: A 2-3 sentence summary of the most important takeaways for someone who wants to quickly understand what happened.

Format your response as JSON with this structure:
{{
  "executive_summary": "Brief 2-3 sentence overview",
  "ticker_analysis": {{
    "TICKER": {{
      "sentiment": "bullish/bearish/neutral/mixed",
      "conviction": "high/medium/low",
      "key_points": ["point 1", "point 2"],
      "risks": ["risk 1", "risk 2"]
    }}
  }},
  "key_themes": ["theme 1", "theme 2", "theme 3"],
  "notable_insights": ["insight 1", "insight 2"],
  "watchlist": ["TICKER1", "TICKER2", "TICKER3"]
}}

Be concise, factual, and focused on actionable information. If sentiment is unclear or mixed, say so.
"#,
        total = stats.total_messages,
        authors = stats.unique_authors,
    )
}

/// Drop a Markdown code-fence wrapper from the raw oracle response, if any.
pub fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use chrono::{TimeZone, Utc};

    struct FixedOracle(String);

    #[async_trait]
    impl GenerativeOracle for FixedOracle {
        async fn generate(&self, _: &str, _: &SamplingParams) -> anyhow::Result<String> {
            Ok(self.0.clone())
        }
    }

    struct FailingOracle;

    #[async_trait]
    impl GenerativeOracle for FailingOracle {
        async fn generate(&self, _: &str, _: &SamplingParams) -> anyhow::Result<String> {
            anyhow::bail!("oracle unreachable")
        }
    }

    fn sample_records(n: usize) -> Vec<MessageRecord> {
        let base = Utc.with_ymd_and_hms(2025, 9, 20, 9, 0, 0).unwrap();
        (0..n)
            .map(|i| MessageRecord {
                ts: base + chrono::Duration::seconds(i as i64),
                channel_id: "111".to_string(),
                channel_name: Some("stocks".to_string()),
                author_id: "1".to_string(),
                author: "alice".to_string(),
                content: format!("message {i} about $GME"),
                urls: Vec::new(),
            })
            .collect()
    }

    #[test]
    fn strips_json_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn prompt_embeds_stats_and_truncates_messages() {
        let records = sample_records(150);
        let stats = aggregate(&records);
        let prompt = build_prompt(&records, &stats);
        assert!(prompt.contains("Total Messages: 150"));
        assert!(prompt.contains("$GME (150 mentions)"));
        assert!(prompt.contains("message 99"));
        assert!(!prompt.contains("message 100 "));
    }

    #[tokio::test]
    async fn parses_fenced_oracle_response() {
        let response = r#"```json
{
  "executive_summary": "Heavy $GME chatter.",
  "ticker_analysis": {
    "GME": {
      "sentiment": "bullish",
      "conviction": "high",
      "key_points": ["volume spike"],
      "risks": ["crowded trade"]
    }
  },
  "key_themes": ["short squeeze"],
  "notable_insights": ["watch open interest"],
  "watchlist": ["GME"]
}
```"#;
        let records = sample_records(3);
        let stats = aggregate(&records);
        let analysis = analyze(&FixedOracle(response.to_string()), &records, &stats).await;
        assert!(analysis.error.is_none());
        assert_eq!(analysis.ticker_analysis.len(), 1);
        assert_eq!(analysis.ticker_analysis[0].0, "GME");
        assert_eq!(analysis.ticker_analysis[0].1.sentiment, Sentiment::Bullish);
        assert_eq!(analysis.watchlist, vec!["GME"]);
    }

    #[tokio::test]
    async fn unknown_enum_labels_do_not_fail_the_parse() {
        let response = r#"{"executive_summary":"x","ticker_analysis":{"GME":{"sentiment":"euphoric","conviction":"extreme","key_points":[],"risks":[]}},"key_themes":[],"notable_insights":[],"watchlist":[]}"#;
        let records = sample_records(1);
        let stats = aggregate(&records);
        let analysis = analyze(&FixedOracle(response.to_string()), &records, &stats).await;
        assert!(analysis.error.is_none());
        assert_eq!(analysis.ticker_analysis[0].1.sentiment, Sentiment::Unknown);
        assert_eq!(analysis.ticker_analysis[0].1.conviction, Conviction::Unknown);
    }

    #[tokio::test]
    async fn oracle_failure_degrades_to_fallback() {
        let records = sample_records(3);
        let stats = aggregate(&records);
        let analysis = analyze(&FailingOracle, &records, &stats).await;
        assert!(analysis.error.as_deref().unwrap_or("").contains("oracle unreachable"));
        assert!(analysis.ticker_analysis.is_empty());
        assert_eq!(analysis.watchlist, vec!["GME"]);
    }

    #[tokio::test]
    async fn unparsable_response_degrades_to_fallback() {
        let records = sample_records(3);
        let stats = aggregate(&records);
        let analysis =
            analyze(&FixedOracle("I cannot help with that".to_string()), &records, &stats).await;
        let err = analysis.error.as_deref().unwrap_or("");
        assert!(err.contains("unparsable"), "error marker: {err}");
        assert!(analysis.ticker_analysis.is_empty());
    }
}
