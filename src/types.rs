//! Shared types: query filters, subscription ids, and result containers.

use std::fmt;

/// One decoded JSON record from the feed.
///
/// Records are schema-free; callers pick out the fields they care about.
pub type Record = serde_json::Value;

/// Identifier of a live stream subscription.
///
/// Allocated once when a subscription starts and stable across every
/// reconnect of that subscription. Ids are never reused within one
/// supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl SubscriptionId {
    /// The raw numeric id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Filter for search and stream requests.
///
/// All fields are optional; an empty query matches everything the access
/// key is entitled to. `period`, `from` and `size` only apply to searches.
///
/// # Examples
///
/// ```
/// use firehose_client::Query;
///
/// let query = Query::new()
///     .with_text("src:instagram")
///     .with_location([40.5, -74.3, 40.9, -73.7]);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Bounding box filter: `[lat_min, lon_min, lat_max, lon_max]`.
    pub location: Option<[f64; 4]>,
    /// Full-text filter string.
    pub text: Option<String>,
    /// Time period filter: `[from_ts, to_ts]` Unix seconds. Search only.
    pub period: Option<[i64; 2]>,
    /// Result offset for paging. Search only.
    pub from: Option<u32>,
    /// Result page size. Search only.
    pub size: Option<u32>,
}

impl Query {
    /// Create an empty query.
    pub fn new() -> Self {
        Query::default()
    }

    /// Filter by bounding box `[lat_min, lon_min, lat_max, lon_max]`.
    #[must_use]
    pub fn with_location(mut self, location: [f64; 4]) -> Self {
        self.location = Some(location);
        self
    }

    /// Filter by text match.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Restrict to a time period `[from_ts, to_ts]`.
    #[must_use]
    pub fn with_period(mut self, period: [i64; 2]) -> Self {
        self.period = Some(period);
        self
    }

    /// Skip the first `from` results.
    #[must_use]
    pub fn with_from(mut self, from: u32) -> Self {
        self.from = Some(from);
        self
    }

    /// Return at most `size` results.
    #[must_use]
    pub fn with_size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    /// Render the query as URL parameter pairs, credential included.
    ///
    /// Array-valued filters are JSON-encoded, matching the wire format the
    /// service expects.
    pub(crate) fn to_pairs(&self, access_key: &str) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("accesskey", access_key.to_string())];
        if let Some(location) = &self.location {
            // serializing a fixed-size float array cannot fail
            pairs.push(("loc", serde_json::to_string(location).unwrap_or_default()));
        }
        if let Some(text) = &self.text {
            pairs.push(("str", text.clone()));
        }
        if let Some(period) = &self.period {
            pairs.push(("period", serde_json::to_string(period).unwrap_or_default()));
        }
        if let Some(from) = self.from {
            pairs.push(("from", from.to_string()));
        }
        if let Some(size) = self.size {
            pairs.push(("size", size.to_string()));
        }
        pairs
    }
}

/// Result of a one-shot search call.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResults {
    /// Matching records.
    pub hits: Vec<Record>,
    /// Total match count on the server, which may exceed `hits.len()`.
    pub total: u64,
    /// Server-side processing time in milliseconds.
    pub took: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_query_carries_only_access_key() {
        let pairs = Query::new().to_pairs("k1");
        assert_eq!(pairs, vec![("accesskey", "k1".to_string())]);
    }

    #[test]
    fn test_full_query_pairs() {
        let pairs = Query::new()
            .with_location([1.0, 2.0, 3.0, 4.0])
            .with_text("storm")
            .with_period([100, 200])
            .with_from(10)
            .with_size(50)
            .to_pairs("k1");

        assert!(pairs.contains(&("loc", "[1.0,2.0,3.0,4.0]".to_string())));
        assert!(pairs.contains(&("str", "storm".to_string())));
        assert!(pairs.contains(&("period", "[100,200]".to_string())));
        assert!(pairs.contains(&("from", "10".to_string())));
        assert!(pairs.contains(&("size", "50".to_string())));
    }

    #[test]
    fn test_subscription_id_display() {
        let id = SubscriptionId(7);
        assert_eq!(id.to_string(), "7");
        assert_eq!(id.as_u64(), 7);
    }
}
