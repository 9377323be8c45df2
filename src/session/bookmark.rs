//! Bookmarks: causal-consistency tokens handed out on commit.

use std::cmp::Ordering;
use std::fmt;

use crate::types::{BoltDict, BoltValue};

const TX_PREFIX: &str = "neo4j:bookmark:v1:tx";

/// An ordered, duplicate-free set of bookmark strings. Empty means "no
/// causal constraint".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bookmark {
    values: Vec<String>,
}

impl Bookmark {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut bookmark = Self::empty();
        for value in values {
            bookmark.push(value.into());
        }
        bookmark
    }

    fn push(&mut self, value: String) {
        if !value.is_empty() && !self.values.contains(&value) {
            self.values.push(value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// The most recent value: highest transaction id, with values in an
    /// unknown format ranking below any known one.
    pub fn max_value(&self) -> Option<&str> {
        self.values
            .iter()
            .max_by(|a, b| compare_values(a, b))
            .map(String::as_str)
    }

    /// Union of both sets, keeping this bookmark's order first.
    pub fn merge(&self, other: &Bookmark) -> Bookmark {
        let mut merged = self.clone();
        for value in &other.values {
            merged.push(value.clone());
        }
        merged
    }

    /// Parameters for a Bolt 1/2 `BEGIN` statement: `{bookmark, bookmarks}`.
    /// Empty when there is nothing to wait for.
    pub fn to_begin_parameters(&self) -> BoltDict {
        let Some(max) = self.max_value() else {
            return BoltDict::new();
        };
        BoltDict::from([
            ("bookmark".to_string(), BoltValue::from(max)),
            ("bookmarks".to_string(), self.to_value()),
        ])
    }

    /// The values as a Bolt list, as carried in BEGIN/RUN metadata from Bolt 3.
    pub fn to_value(&self) -> BoltValue {
        BoltValue::from(self.values.clone())
    }

    /// Reads the `bookmark` entry of a SUCCESS metadata map.
    pub fn from_metadata(metadata: &BoltDict) -> Option<Bookmark> {
        metadata
            .get("bookmark")
            .and_then(BoltValue::as_str)
            .map(Bookmark::from)
            .filter(|b| !b.is_empty())
    }
}

impl From<&str> for Bookmark {
    fn from(value: &str) -> Self {
        Self::from_values([value])
    }
}

impl From<String> for Bookmark {
    fn from(value: String) -> Self {
        Self::from_values([value])
    }
}

impl fmt::Display for Bookmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.values.join(", "))
    }
}

fn tx_id(value: &str) -> Option<i64> {
    value.strip_prefix(TX_PREFIX)?.parse().ok()
}

fn compare_values(a: &str, b: &str) -> Ordering {
    tx_id(a).cmp(&tx_id(b)).then_with(|| a.cmp(b))
}
