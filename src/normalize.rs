use once_cell::sync::Lazy;
use regex::Regex;

static EMOJI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x{1F300}-\x{1FAFF}]").expect("emoji regex"));
static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Clean raw message text: strip emoji, drop backtick fences, collapse
/// whitespace runs to a single space, trim. Returns `None` when nothing
/// survives cleanup; callers must not persist such messages.
pub fn clean_content(raw: &str) -> Option<String> {
    let without_emoji = EMOJI_RE.replace_all(raw, "");
    let without_fences = without_emoji.replace("```", "").replace('`', "");
    let collapsed = WS_RE.replace_all(&without_fences, " ");
    let cleaned = collapsed.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Collect URLs for a message: attachment URLs first, then every
/// whitespace-delimited `http://`/`https://` token from the *uncleaned*
/// text. Order-preserving, duplicates allowed.
pub fn collect_urls(raw: &str, attachment_urls: &[String]) -> Vec<String> {
    let mut urls: Vec<String> = attachment_urls.to_vec();
    urls.extend(
        raw.split_whitespace()
            .filter(|tok| tok.starts_with("http://") || tok.starts_with("https://"))
            .map(str::to_string),
    );
    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_emoji_and_fences() {
        let raw = "to the moon \u{1F680}\u{1F4C8} ```rust\nfn main() {}\n``` and `inline`";
        let cleaned = clean_content(raw).unwrap();
        assert!(!cleaned.contains('\u{1F680}'));
        assert!(!cleaned.contains('`'));
        assert_eq!(cleaned, "to the moon rust fn main() {} and inline");
    }

    #[test]
    fn collapses_and_trims_whitespace() {
        assert_eq!(
            clean_content("  lots\t\tof\n\n whitespace  ").unwrap(),
            "lots of whitespace"
        );
    }

    #[test]
    fn empty_after_cleanup_is_suppressed() {
        assert_eq!(clean_content(""), None);
        assert_eq!(clean_content("   \n\t "), None);
        assert_eq!(clean_content("\u{1F600}\u{1F680}"), None);
        assert_eq!(clean_content("``` ```"), None);
    }

    #[test]
    fn cleanup_is_idempotent() {
        let raw = "to the moon \u{1F680}  ```x``` \n done";
        let once = clean_content(raw).unwrap();
        assert_eq!(clean_content(&once).unwrap(), once);
    }

    #[test]
    fn collects_attachment_then_inline_urls() {
        let attachments = vec!["https://cdn.example/a.png".to_string()];
        let urls = collect_urls(
            "chart https://x.test/1 and http://y.test/2 plus https://x.test/1",
            &attachments,
        );
        assert_eq!(
            urls,
            vec![
                "https://cdn.example/a.png",
                "https://x.test/1",
                "http://y.test/2",
                "https://x.test/1",
            ]
        );
    }

    #[test]
    fn non_url_tokens_are_ignored() {
        assert!(collect_urls("no links here, httpx://nope ftp://also-no", &[]).is_empty());
    }
}
