use crate::store::MessageRecord;
use crate::tickers;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Per-channel rankings are cut to this many tickers.
const CHANNEL_TICKER_LIMIT: usize = 10;

/// Statistics reduced from one day's records. Recomputed in full on every
/// analysis run; re-aggregating the same input yields byte-identical
/// serialized output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DayStats {
    pub total_messages: usize,
    pub unique_authors: usize,
    /// ticker -> mention count, descending by count, first-encounter order
    /// on ties.
    #[serde(with = "ordered_map")]
    pub top_tickers: Vec<(String, u64)>,
    /// channel key ("name (id)") -> per-channel stats, in first-encounter
    /// order.
    #[serde(with = "ordered_map")]
    pub channels: Vec<(String, ChannelStats)>,
    pub date_range: Option<DateRange>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelStats {
    pub messages: usize,
    pub unique_authors: usize,
    #[serde(with = "ordered_map")]
    pub top_tickers: Vec<(String, u64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayStats {
    pub fn empty() -> Self {
        DayStats {
            total_messages: 0,
            unique_authors: 0,
            top_tickers: Vec::new(),
            channels: Vec::new(),
            date_range: None,
        }
    }

    /// Mention count for one ticker, if it ranked at all.
    pub fn mentions(&self, ticker: &str) -> u64 {
        self.top_tickers
            .iter()
            .find(|(t, _)| t == ticker)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }
}

/// Fold a day's records into `DayStats` in a single pass. Empty input is
/// the all-zero value, never an error.
pub fn aggregate(records: &[MessageRecord]) -> DayStats {
    if records.is_empty() {
        return DayStats::empty();
    }

    let mut ticker_counts = Counter::default();
    let mut authors: HashSet<&str> = HashSet::new();
    let mut channels: Vec<(String, ChannelAccum)> = Vec::new();
    let mut channel_index: HashMap<String, usize> = HashMap::new();
    let mut range: Option<(DateTime<Utc>, DateTime<Utc>)> = None;

    for record in records {
        let channel_key = format!(
            "{} ({})",
            record.channel_name.as_deref().unwrap_or("unknown"),
            record.channel_id
        );
        let idx = *channel_index.entry(channel_key.clone()).or_insert_with(|| {
            channels.push((channel_key, ChannelAccum::default()));
            channels.len() - 1
        });
        let accum = &mut channels[idx].1;
        accum.messages += 1;
        accum.authors.insert(record.author.clone());

        for ticker in tickers::extract(&record.content) {
            ticker_counts.bump(&ticker);
            accum.tickers.bump(&ticker);
        }

        authors.insert(&record.author);

        range = Some(match range {
            None => (record.ts, record.ts),
            Some((start, end)) => (start.min(record.ts), end.max(record.ts)),
        });
    }

    DayStats {
        total_messages: records.len(),
        unique_authors: authors.len(),
        top_tickers: ticker_counts.into_ranked(usize::MAX),
        channels: channels
            .into_iter()
            .map(|(key, accum)| {
                (
                    key,
                    ChannelStats {
                        messages: accum.messages,
                        unique_authors: accum.authors.len(),
                        top_tickers: accum.tickers.into_ranked(CHANNEL_TICKER_LIMIT),
                    },
                )
            })
            .collect(),
        date_range: range.map(|(start, end)| DateRange { start, end }),
    }
}

#[derive(Default)]
struct ChannelAccum {
    messages: usize,
    authors: HashSet<String>,
    tickers: Counter,
}

/// Insertion-ordered counter; ranking is a stable descending sort, so ties
/// keep first-encounter order.
#[derive(Default)]
struct Counter {
    index: HashMap<String, usize>,
    entries: Vec<(String, u64)>,
}

impl Counter {
    fn bump(&mut self, key: &str) {
        match self.index.get(key) {
            Some(&i) => self.entries[i].1 += 1,
            None => {
                self.index.insert(key.to_string(), self.entries.len());
                self.entries.push((key.to_string(), 1));
            }
        }
    }

    fn into_ranked(self, limit: usize) -> Vec<(String, u64)> {
        let mut entries = self.entries;
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries.truncate(limit);
        entries
    }
}

/// Serialize `Vec<(String, V)>` as a JSON object, preserving entry order,
/// and read JSON objects back in document order.
pub mod ordered_map {
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::fmt;
    use std::marker::PhantomData;

    pub fn serialize<V, S>(entries: &[(String, V)], serializer: S) -> Result<S::Ok, S::Error>
    where
        V: Serialize,
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (key, value) in entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }

    pub fn deserialize<'de, V, D>(deserializer: D) -> Result<Vec<(String, V)>, D::Error>
    where
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        struct OrderedMapVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
            type Value = Vec<(String, V)>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry()? {
                    entries.push((key, value));
                }
                Ok(entries)
            }
        }

        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}
