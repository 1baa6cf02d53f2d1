use crate::aggregate::DayStats;
use crate::analyzer::AiAnalysis;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::Serialize;

/// Shared truncation limits; the plain-text and Markdown renderings must
/// stay in parity on these.
const WATCHLIST_LIMIT: usize = 5;
const TICKER_DETAIL_LIMIT: usize = 5;
const KEY_POINT_LIMIT: usize = 2;
const RISK_LIMIT: usize = 2;
const CHANNEL_TICKER_DISPLAY: usize = 3;

const BANNER_WIDTH: usize = 70;

/// The structured rendering: a lossless serialization of aggregation plus
/// AI insights.
#[derive(Serialize)]
struct SummaryArtifact<'a> {
    date: NaiveDate,
    generated_at: String,
    basic_stats: &'a DayStats,
    ai_insights: &'a AiAnalysis,
}

/// Structured JSON artifact for `summaries/<date>.json`.
pub fn render_structured(
    stats: &DayStats,
    ai: &AiAnalysis,
    date: NaiveDate,
    generated_at: DateTime<Utc>,
) -> anyhow::Result<String> {
    let artifact = SummaryArtifact {
        date,
        generated_at: iso(generated_at),
        basic_stats: stats,
        ai_insights: ai,
    };
    Ok(serde_json::to_string_pretty(&artifact)?)
}

/// Plain-text artifact for `summaries/<date>.txt`. Sections appear only
/// when their backing data is non-empty.
pub fn render_text(stats: &DayStats, ai: &AiAnalysis, date: NaiveDate) -> String {
    let mut lines: Vec<String> = Vec::new();
    let banner = "=".repeat(BANNER_WIDTH);
    let rule = "-".repeat(BANNER_WIDTH);

    lines.push(banner.clone());
    lines.push(format!("DISCORD TRADING SUMMARY - {date}"));
    lines.push(banner.clone());
    lines.push(String::new());

    if !ai.executive_summary.is_empty() {
        lines.push("EXECUTIVE SUMMARY".to_string());
        lines.push(rule.clone());
        lines.push(ai.executive_summary.clone());
        lines.push(String::new());
    }

    lines.push("OVERVIEW".to_string());
    lines.push(rule.clone());
    lines.push(format!("Total Messages: {}", stats.total_messages));
    lines.push(format!("Unique Authors: {}", stats.unique_authors));
    lines.push(format!("Channels: {}", stats.channels.len()));
    if let Some(range) = &stats.date_range {
        lines.push(format!(
            "Time Range: {} to {}",
            iso(range.start),
            iso(range.end)
        ));
    }
    lines.push(String::new());

    if !ai.watchlist.is_empty() {
        lines.push("TOP WATCHLIST".to_string());
        lines.push(rule.clone());
        for ticker in ai.watchlist.iter().take(WATCHLIST_LIMIT) {
            lines.push(format!("  * ${ticker}"));
        }
        lines.push(String::new());
    }

    if !ai.ticker_analysis.is_empty() {
        lines.push("TICKER ANALYSIS".to_string());
        lines.push(rule.clone());
        for (ticker, insight) in ai.ticker_analysis.iter().take(TICKER_DETAIL_LIMIT) {
            lines.push(String::new());
            lines.push(format!(
                "  ${} - {} mentions | {} | Conviction: {}",
                ticker,
                stats.mentions(ticker),
                insight.sentiment.as_str().to_uppercase(),
                insight.conviction.as_str().to_uppercase(),
            ));
            for point in insight.key_points.iter().take(KEY_POINT_LIMIT) {
                lines.push(format!("    + {point}"));
            }
            for risk in insight.risks.iter().take(RISK_LIMIT) {
                lines.push(format!("    ! {risk}"));
            }
        }
        lines.push(String::new());
    }

    if !ai.key_themes.is_empty() {
        lines.push("KEY THEMES".to_string());
        lines.push(rule.clone());
        for theme in &ai.key_themes {
            lines.push(format!("  * {theme}"));
        }
        lines.push(String::new());
    }

    if !ai.notable_insights.is_empty() {
        lines.push("NOTABLE INSIGHTS".to_string());
        lines.push(rule.clone());
        for insight in &ai.notable_insights {
            lines.push(format!("  * {insight}"));
        }
        lines.push(String::new());
    }

    if !stats.channels.is_empty() {
        lines.push("CHANNEL BREAKDOWN".to_string());
        lines.push(rule);
        for (channel, ch) in &stats.channels {
            lines.push(String::new());
            lines.push(format!("  {channel}"));
            lines.push(format!(
                "    Messages: {} | Authors: {}",
                ch.messages, ch.unique_authors
            ));
            if !ch.top_tickers.is_empty() {
                let tickers = ch
                    .top_tickers
                    .iter()
                    .take(CHANNEL_TICKER_DISPLAY)
                    .map(|(t, c)| format!("${t} ({c})"))
                    .collect::<Vec<_>>()
                    .join(", ");
                lines.push(format!("    Top Tickers: {tickers}"));
            }
        }
        lines.push(String::new());
    }

    lines.push(banner);
    lines.join("\n")
}

/// Markdown section document for `summaries/<date>.md`: the same section
/// set and truncation limits as the plain-text rendering.
pub fn render_markdown(
    stats: &DayStats,
    ai: &AiAnalysis,
    date: NaiveDate,
    generated_at: DateTime<Utc>,
) -> String {
    let mut md: Vec<String> = Vec::new();
    md.push(format!("# Discord Trading Summary - {date}\n"));

    if !ai.executive_summary.is_empty() {
        md.push("## Executive Summary\n".to_string());
        md.push(ai.executive_summary.clone());
        md.push(String::new());
    }

    md.push("## Overview\n".to_string());
    md.push(format!("- **Total Messages**: {}", stats.total_messages));
    md.push(format!("- **Unique Authors**: {}", stats.unique_authors));
    md.push(format!("- **Channels Monitored**: {}", stats.channels.len()));
    if let Some(range) = &stats.date_range {
        md.push(format!(
            "- **Time Range**: {} to {}",
            iso(range.start),
            iso(range.end)
        ));
    }
    md.push(String::new());

    if !ai.watchlist.is_empty() {
        md.push("## Top Watchlist\n".to_string());
        for ticker in ai.watchlist.iter().take(WATCHLIST_LIMIT) {
            md.push(format!("- **${ticker}**"));
        }
        md.push(String::new());
    }

    if !ai.ticker_analysis.is_empty() {
        md.push("## Ticker Analysis\n".to_string());
        for (ticker, insight) in ai.ticker_analysis.iter().take(TICKER_DETAIL_LIMIT) {
            md.push(format!("### ${ticker}"));
            md.push(format!(
                "**Sentiment**: {} | **Conviction**: {} | **Mentions**: {}\n",
                title_case(insight.sentiment.as_str()),
                title_case(insight.conviction.as_str()),
                stats.mentions(ticker),
            ));
            if !insight.key_points.is_empty() {
                md.push("**Key Points:**".to_string());
                for point in insight.key_points.iter().take(KEY_POINT_LIMIT) {
                    md.push(format!("- {point}"));
                }
                md.push(String::new());
            }
            if !insight.risks.is_empty() {
                md.push("**Risks:**".to_string());
                for risk in insight.risks.iter().take(RISK_LIMIT) {
                    md.push(format!("- {risk}"));
                }
                md.push(String::new());
            }
        }
    }

    if !ai.key_themes.is_empty() {
        md.push("## Key Themes\n".to_string());
        for theme in &ai.key_themes {
            md.push(format!("- {theme}"));
        }
        md.push(String::new());
    }

    if !ai.notable_insights.is_empty() {
        md.push("## Notable Insights\n".to_string());
        for insight in &ai.notable_insights {
            md.push(format!("- {insight}"));
        }
        md.push(String::new());
    }

    if !stats.channels.is_empty() {
        md.push("## Channel Activity\n".to_string());
        for (channel, ch) in &stats.channels {
            md.push(format!("### {channel}\n"));
            md.push(format!("- **Messages**: {}", ch.messages));
            md.push(format!("- **Unique Authors**: {}", ch.unique_authors));
            if !ch.top_tickers.is_empty() {
                md.push("- **Top Tickers**:".to_string());
                for (ticker, count) in ch.top_tickers.iter().take(CHANNEL_TICKER_DISPLAY) {
                    md.push(format!("  - ${ticker}: {count} mentions"));
                }
            }
            md.push(String::new());
        }
    }

    md.push("---".to_string());
    md.push(format!("*Generated at {}*", iso(generated_at)));
    md.join("\n")
}

fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
