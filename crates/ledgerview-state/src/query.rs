//! Read-only query projection

use ledgerview_core::{AuthorId, LogEntry};
use serde::{Deserialize, Serialize};

/// Whose entries a query selects
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "author", rename_all = "snake_case")]
pub enum Scope {
    #[default]
    All,
    /// Only this author's entries
    Author(AuthorId),
    /// Everyone except this author
    Excluding(AuthorId),
}

impl Scope {
    pub fn matches(&self, entry: &LogEntry) -> bool {
        match self {
            Scope::All => true,
            Scope::Author(author) => entry.author() == author,
            Scope::Excluding(author) => entry.author() != author,
        }
    }
}

/// Case-insensitive payload search. An empty term matches everything.
pub fn matches_search(entry: &LogEntry, term: &str) -> bool {
    term.is_empty()
        || entry
            .payload()
            .to_lowercase()
            .contains(&term.to_lowercase())
}

/// Entries in `entries` selected by `scope` and `search`, order preserved
pub fn filter_by<'a>(
    entries: impl IntoIterator<Item = &'a LogEntry>,
    scope: &Scope,
    search: Option<&str>,
) -> Vec<LogEntry> {
    let term = search.unwrap_or("");
    entries
        .into_iter()
        .filter(|e| scope.matches(e) && matches_search(e, term))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerview_core::{LogPosition, RemoteEntry, Timestamp};

    fn entry(p: u64, author: &str, payload: &str) -> LogEntry {
        LogEntry::confirmed(RemoteEntry::new(
            format!("e{p}"),
            author,
            payload,
            LogPosition::new(p),
            Timestamp::from_secs(p as i64),
        ))
    }

    fn sample() -> Vec<LogEntry> {
        vec![
            entry(3, "0xa", "Hello World"),
            entry(2, "0xb", "gm"),
            entry(1, "0xA", "hello again"),
        ]
    }

    fn positions(entries: &[LogEntry]) -> Vec<u64> {
        entries.iter().filter_map(|e| e.position()).map(|p| p.value()).collect()
    }

    #[test]
    fn test_scope_filters() {
        let entries = sample();
        let me = AuthorId::new("0xa");
        assert_eq!(positions(&filter_by(&entries, &Scope::All, None)), vec![3, 2, 1]);
        assert_eq!(positions(&filter_by(&entries, &Scope::Author(me.clone()), None)), vec![3, 1]);
        assert_eq!(positions(&filter_by(&entries, &Scope::Excluding(me), None)), vec![2]);
    }

    #[test]
    fn test_search_case_insensitive() {
        let entries = sample();
        assert_eq!(positions(&filter_by(&entries, &Scope::All, Some("HELLO"))), vec![3, 1]);
        assert_eq!(positions(&filter_by(&entries, &Scope::All, Some(""))), vec![3, 2, 1]);
        assert!(filter_by(&entries, &Scope::All, Some("nope")).is_empty());
    }

    #[test]
    fn test_scope_serde_shape() {
        let scope: Scope = serde_json::from_str(r#"{"scope":"author","author":"0xAB"}"#).unwrap();
        assert_eq!(scope, Scope::Author(AuthorId::new("0xab")));
        let all: Scope = serde_json::from_str(r#"{"scope":"all"}"#).unwrap();
        assert_eq!(all, Scope::All);
    }
}
