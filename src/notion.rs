use crate::aggregate::DayStats;
use crate::analyzer::AiAnalysis;
use anyhow::Context as _;
use chrono::NaiveDate;
use serde_json::{json, Value};
use tracing::{info, warn};

const NOTION_API: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";

/// Property tags carry at most this many tickers.
const TAG_LIMIT: usize = 5;
/// Block-tree truncation, in parity with the text/Markdown renderings.
const WATCHLIST_LIMIT: usize = 5;
const TICKER_DETAIL_LIMIT: usize = 5;
const KEY_POINT_LIMIT: usize = 2;
const RISK_LIMIT: usize = 2;
const CHANNEL_TICKER_DISPLAY: usize = 3;

/// Document sink: one page per calendar day in a Notion database.
pub struct NotionClient {
    client: reqwest::Client,
    token: String,
    database_id: String,
}

impl NotionClient {
    pub fn new(
        client: reqwest::Client,
        token: impl Into<String>,
        database_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            token: token.into(),
            database_id: database_id.into(),
        }
    }

    /// Create-or-replace the summary page for `date`. Existing pages for
    /// the date are archived first, then the new page is created.
    ///
    /// Known gap: this is not atomic. A crash between the archive and the
    /// create leaves no visible page for the date until the next run.
    pub async fn upsert_summary(
        &self,
        stats: &DayStats,
        ai: &AiAnalysis,
        date: NaiveDate,
    ) -> anyhow::Result<String> {
        let existing = self.find_pages_for(date).await?;
        for page_id in &existing {
            warn!("Archiving existing summary page {} for {}", page_id, date);
            self.archive_page(page_id).await?;
        }

        info!("Creating Notion page for {}...", date);
        let body = json!({
            "parent": { "database_id": self.database_id },
            "properties": build_properties(stats, ai, date),
            "children": build_content_blocks(stats, ai),
        });

        let response = self
            .request(reqwest::Method::POST, &format!("{NOTION_API}/pages"))
            .json(&body)
            .send()
            .await
            .context("creating Notion page")?;
        let status = response.status();
        let payload: Value = response.json().await.context("parsing Notion response")?;
        if !status.is_success() {
            anyhow::bail!("Notion page create failed ({status}): {payload}");
        }

        let page_url = payload["url"].as_str().unwrap_or_default().to_string();
        info!("Created Notion page: {}", page_url);
        Ok(page_url)
    }

    async fn find_pages_for(&self, date: NaiveDate) -> anyhow::Result<Vec<String>> {
        let body = json!({
            "filter": {
                "property": "Date",
                "date": { "equals": date.to_string() }
            }
        });
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("{NOTION_API}/databases/{}/query", self.database_id),
            )
            .json(&body)
            .send()
            .await
            .context("querying Notion database")?;
        let status = response.status();
        let payload: Value = response.json().await.context("parsing Notion query")?;
        if !status.is_success() {
            anyhow::bail!("Notion database query failed ({status}): {payload}");
        }

        Ok(payload["results"]
            .as_array()
            .map(|results| {
                results
                    .iter()
                    .filter_map(|page| page["id"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn archive_page(&self, page_id: &str) -> anyhow::Result<()> {
        let response = self
            .request(
                reqwest::Method::PATCH,
                &format!("{NOTION_API}/pages/{page_id}"),
            )
            .json(&json!({ "archived": true }))
            .send()
            .await
            .context("archiving Notion page")?;
        let status = response.status();
        if !status.is_success() {
            let payload = response.text().await.unwrap_or_default();
            anyhow::bail!("Notion page archive failed ({status}): {payload}");
        }
        Ok(())
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
    }
}

fn build_properties(stats: &DayStats, ai: &AiAnalysis, date: NaiveDate) -> Value {
    let tags: Vec<Value> = stats
        .top_tickers
        .iter()
        .take(TAG_LIMIT)
        .map(|(ticker, _)| json!({ "name": ticker }))
        .collect();

    let mut properties = json!({
        "Name": {
            "title": [{ "text": { "content": format!("Discord Trading Summary - {date}") } }]
        },
        "Date": { "date": { "start": date.to_string() } },
        "Total Messages": { "number": stats.total_messages },
        "Unique Authors": { "number": stats.unique_authors },
        "Top Tickers": { "multi_select": tags },
    });

    if !ai.executive_summary.is_empty() {
        properties["AI Analysis"] = json!({ "checkbox": true });
    }
    properties
}

/// Block tree mirroring the report sections: executive summary, overview,
/// watchlist, ticker detail, themes, insights, channel breakdown.
fn build_content_blocks(stats: &DayStats, ai: &AiAnalysis) -> Vec<Value> {
    let mut blocks = Vec::new();

    if !ai.executive_summary.is_empty() {
        blocks.push(heading_2("Executive Summary"));
        blocks.push(paragraph(&ai.executive_summary));
        blocks.push(divider());
    }

    blocks.push(heading_2("Overview"));
    blocks.push(bullet(&format!("Total Messages: {}", stats.total_messages)));
    blocks.push(bullet(&format!("Unique Authors: {}", stats.unique_authors)));
    blocks.push(bullet(&format!("Channels: {}", stats.channels.len())));
    if let Some(range) = &stats.date_range {
        blocks.push(bullet(&format!(
            "Time Range: {} to {}",
            range.start.to_rfc3339(),
            range.end.to_rfc3339()
        )));
    }

    if !ai.watchlist.is_empty() {
        blocks.push(heading_2("Top Watchlist"));
        for ticker in ai.watchlist.iter().take(WATCHLIST_LIMIT) {
            blocks.push(bullet(&format!("${ticker}")));
        }
    }

    if !ai.ticker_analysis.is_empty() {
        blocks.push(heading_2("Ticker Analysis"));
        for (ticker, insight) in ai.ticker_analysis.iter().take(TICKER_DETAIL_LIMIT) {
            blocks.push(heading_3(&format!("${ticker}")));
            blocks.push(paragraph(&format!(
                "{} mentions | Sentiment: {} | Conviction: {}",
                stats.mentions(ticker),
                insight.sentiment.as_str().to_uppercase(),
                insight.conviction.as_str().to_uppercase(),
            )));
            if !insight.key_points.is_empty() {
                blocks.push(bold_paragraph("Key Points:"));
                for point in insight.key_points.iter().take(KEY_POINT_LIMIT) {
                    blocks.push(bullet(point));
                }
            }
            if !insight.risks.is_empty() {
                blocks.push(bold_paragraph("Risks:"));
                for risk in insight.risks.iter().take(RISK_LIMIT) {
                    blocks.push(bullet(risk));
                }
            }
        }
    }

    if !ai.key_themes.is_empty() {
        blocks.push(heading_2("Key Themes"));
        for theme in &ai.key_themes {
            blocks.push(bullet(theme));
        }
    }

    if !ai.notable_insights.is_empty() {
        blocks.push(heading_2("Notable Insights"));
        for insight in &ai.notable_insights {
            blocks.push(bullet(insight));
        }
    }

    if !stats.channels.is_empty() {
        blocks.push(heading_2("Channel Breakdown"));
        for (channel, ch) in &stats.channels {
            blocks.push(heading_3(channel));
            blocks.push(bullet(&format!("Messages: {}", ch.messages)));
            blocks.push(bullet(&format!("Unique Authors: {}", ch.unique_authors)));
            if !ch.top_tickers.is_empty() {
                let tickers = ch
                    .top_tickers
                    .iter()
                    .take(CHANNEL_TICKER_DISPLAY)
                    .map(|(t, c)| format!("${t} ({c})"))
                    .collect::<Vec<_>>()
                    .join(", ");
                blocks.push(bullet(&format!("Top Tickers: {tickers}")));
            }
        }
    }

    blocks
}

fn rich_text(content: &str) -> Value {
    json!([{ "type": "text", "text": { "content": content } }])
}

fn heading_2(content: &str) -> Value {
    json!({
        "object": "block",
        "type": "heading_2",
        "heading_2": { "rich_text": rich_text(content) }
    })
}

fn heading_3(content: &str) -> Value {
    json!({
        "object": "block",
        "type": "heading_3",
        "heading_3": { "rich_text": rich_text(content) }
    })
}

fn paragraph(content: &str) -> Value {
    json!({
        "object": "block",
        "type": "paragraph",
        "paragraph": { "rich_text": rich_text(content) }
    })
}

fn bold_paragraph(content: &str) -> Value {
    json!({
        "object": "block",
        "type": "paragraph",
        "paragraph": {
            "rich_text": [{
                "type": "text",
                "text": { "content": content },
                "annotations": { "bold": true }
            }]
        }
    })
}

fn bullet(content: &str) -> Value {
    json!({
        "object": "block",
        "type": "bulleted_list_item",
        "bulleted_list_item": { "rich_text": rich_text(content) }
    })
}

fn divider() -> Value {
    json!({ "object": "block", "type": "divider", "divider": {} })
}
