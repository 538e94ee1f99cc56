use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::{CircularBuffer, WebSocketError};

pub const DEFAULT_JOURNAL_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Sent,
    Received,
    Ping,
    Pong,
    Heartbeat,
    Open,
    Close,
    Error,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Sent => "sent",
            EntryKind::Received => "received",
            EntryKind::Ping => "ping",
            EntryKind::Pong => "pong",
            EntryKind::Heartbeat => "heartbeat",
            EntryKind::Open => "open",
            EntryKind::Close => "close",
            EntryKind::Error => "error",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = WebSocketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "sent" => EntryKind::Sent,
            "received" => EntryKind::Received,
            "ping" => EntryKind::Ping,
            "pong" => EntryKind::Pong,
            "heartbeat" => EntryKind::Heartbeat,
            "open" => EntryKind::Open,
            "close" => EntryKind::Close,
            "error" => EntryKind::Error,
            other => {
                return Err(WebSocketError::InvalidState(format!(
                    "unknown message kind: {other}"
                )));
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub id: u64,
    /// Unix epoch milliseconds.
    pub timestamp: u64,
    pub kind: EntryKind,
    pub payload: String,
    pub is_binary: bool,
}

/// Filters for [`Journal::query`]. Time bounds are inclusive; `limit` keeps the
/// most recent N matches, and 0 means no limit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JournalQuery {
    pub limit: Option<usize>,
    pub kind: Option<EntryKind>,
    pub since_time: Option<u64>,
    pub until_time: Option<u64>,
}

impl JournalQuery {
    fn matches(&self, entry: &JournalEntry) -> bool {
        self.kind.is_none_or(|kind| entry.kind == kind)
            && self.since_time.is_none_or(|since| entry.timestamp >= since)
            && self.until_time.is_none_or(|until| entry.timestamp <= until)
    }
}

/// Bounded, append-only traffic log. Oldest entries are evicted first.
#[derive(Debug, Clone)]
pub struct Journal {
    entries: CircularBuffer<JournalEntry>,
    next_id: u64,
}

impl Journal {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: CircularBuffer::new(capacity),
            next_id: 1,
        }
    }

    pub fn append(
        &mut self,
        timestamp: u64,
        kind: EntryKind,
        payload: impl Into<String>,
        is_binary: bool,
    ) -> JournalEntry {
        let entry = JournalEntry {
            id: self.next_id,
            timestamp,
            kind,
            payload: payload.into(),
            is_binary,
        };
        self.next_id += 1;
        self.entries.push(entry.clone());
        entry
    }

    pub fn query(&self, query: &JournalQuery) -> Vec<JournalEntry> {
        let mut matched: Vec<JournalEntry> = self
            .entries
            .iter()
            .filter(|entry| query.matches(entry))
            .cloned()
            .collect();

        if let Some(limit) = query.limit.filter(|limit| *limit > 0)
            && matched.len() > limit
        {
            matched.drain(..matched.len() - limit);
        }
        matched
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }
}

impl Default for Journal {
    fn default() -> Self {
        Self::new(DEFAULT_JOURNAL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(count: u64) -> Journal {
        let mut journal = Journal::new(10);
        for i in 0..count {
            let kind = if i % 2 == 0 {
                EntryKind::Sent
            } else {
                EntryKind::Received
            };
            journal.append(1_000 + i, kind, format!("m{i}"), false);
        }
        journal
    }

    #[test]
    fn keeps_most_recent_entries_in_order() {
        let journal = filled(13);
        assert_eq!(journal.len(), 10);
        let all = journal.query(&JournalQuery::default());
        let payloads: Vec<_> = all.iter().map(|e| e.payload.as_str()).collect();
        assert_eq!(payloads.first(), Some(&"m3"));
        assert_eq!(payloads.last(), Some(&"m12"));
        assert!(all.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn limit_applies_after_filtering() {
        let journal = filled(10);
        let sent = journal.query(&JournalQuery {
            limit: Some(2),
            kind: Some(EntryKind::Sent),
            ..JournalQuery::default()
        });
        let payloads: Vec<_> = sent.iter().map(|e| e.payload.as_str()).collect();
        assert_eq!(payloads, vec!["m6", "m8"]);
    }

    #[test]
    fn time_bounds_are_inclusive() {
        let journal = filled(10);
        let window = journal.query(&JournalQuery {
            since_time: Some(1_002),
            until_time: Some(1_004),
            ..JournalQuery::default()
        });
        assert_eq!(window.len(), 3);

        let unlimited = journal.query(&JournalQuery {
            limit: Some(0),
            ..JournalQuery::default()
        });
        assert_eq!(unlimited.len(), 10);
    }

    #[test]
    fn ids_stay_unique_across_clear() {
        let mut journal = filled(3);
        journal.clear();
        assert!(journal.is_empty());
        let entry = journal.append(5, EntryKind::Open, "", false);
        assert_eq!(entry.id, 4);
    }

    #[test]
    fn entry_serializes_camel_case() {
        let mut journal = Journal::default();
        let entry = journal.append(7, EntryKind::Heartbeat, "ping", false);
        let json = sonic_rs::to_string(&entry).unwrap();
        assert_eq!(
            json,
            r#"{"id":1,"timestamp":7,"kind":"heartbeat","payload":"ping","isBinary":false}"#
        );
        assert_eq!("pong".parse::<EntryKind>().unwrap(), EntryKind::Pong);
    }
}
