//! Blacklist and whitelist entries.

use super::alias::normalize_number;
use super::split_quoted;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub pattern: String,
    /// From a `#=` comment on the entry's line.
    pub display: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CallList {
    entries: Vec<ListEntry>,
    ignore1: bool,
}

impl CallList {
    pub fn parse(text: &str, ignore1: bool) -> Self {
        let mut entries = Vec::new();
        for raw in text.lines() {
            let (content, comment) = match raw.find('#') {
                Some(i) => (&raw[..i], Some(&raw[i + 1..])),
                None => (raw, None),
            };
            let display = comment
                .and_then(|c| c.strip_prefix('='))
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty());
            for pattern in split_quoted(content) {
                if pattern.is_empty() {
                    continue;
                }
                entries.push(ListEntry {
                    pattern,
                    display: display.clone(),
                });
            }
        }
        CallList { entries, ignore1 }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_matches_number(&self, entry: &ListEntry, number: &str) -> bool {
        !number.is_empty()
            && normalize_number(&entry.pattern, self.ignore1)
                == normalize_number(number, self.ignore1)
    }

    fn entry_matches_name(entry: &ListEntry, name: &str) -> bool {
        !name.is_empty() && name.contains(entry.pattern.as_str())
    }

    pub fn matches_number(&self, number: &str) -> bool {
        self.entries
            .iter()
            .any(|e| self.entry_matches_number(e, number))
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.entries.iter().any(|e| Self::entry_matches_name(e, name))
    }

    /// First entry matching the name or the number.
    pub fn find(&self, name: &str, number: &str) -> Option<&ListEntry> {
        self.entries
            .iter()
            .find(|e| Self::entry_matches_name(e, name) || self.entry_matches_number(e, number))
    }
}
