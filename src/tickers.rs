use once_cell::sync::Lazy;
use regex::Regex;

/// Stock tickers like $AAPL or $GME: 1-5 uppercase letters after `$`,
/// closed by a word boundary.
static TICKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$([A-Z]{1,5})\b").expect("ticker regex"));

/// Extract every ticker occurrence from `text`, in order, duplicates
/// included. Counting is the caller's job.
pub fn extract(text: &str) -> Vec<String> {
    TICKER_RE
        .captures_iter(text)
        .map(|cap| cap[1].to_string())
        .collect()
}
