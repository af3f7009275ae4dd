//! Range query parameters shared by both cache tiers.

use std::ops::Bound;

use gridfeed_core::TimestampSecs;
use serde::{Deserialize, Serialize};

/// Direction of a range scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

/// Window of a candle read. Both bounds are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeQuery {
    /// Only candles strictly older than this.
    pub before: Option<TimestampSecs>,
    /// Only candles strictly newer than this.
    pub after: Option<TimestampSecs>,
    pub limit: usize,
    pub order: Order,
}

impl RangeQuery {
    /// The `limit` most recent candles, returned ascending.
    pub fn latest(limit: usize) -> Self {
        Self {
            before: None,
            after: None,
            limit,
            order: Order::Asc,
        }
    }

    pub fn before(mut self, ts: TimestampSecs) -> Self {
        self.before = Some(ts);
        self
    }

    pub fn after(mut self, ts: TimestampSecs) -> Self {
        self.after = Some(ts);
        self
    }

    pub fn with_order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    /// Whether either bound is set.
    pub fn is_bounded(&self) -> bool {
        self.before.is_some() || self.after.is_some()
    }

    /// Lower score bound.
    pub fn min_bound(&self) -> Bound<TimestampSecs> {
        self.after.map_or(Bound::Unbounded, Bound::Excluded)
    }

    /// Upper score bound.
    pub fn max_bound(&self) -> Bound<TimestampSecs> {
        self.before.map_or(Bound::Unbounded, Bound::Excluded)
    }

    /// Whether `ts` falls inside the window.
    pub fn contains(&self, ts: TimestampSecs) -> bool {
        self.before.map_or(true, |b| ts < b) && self.after.map_or(true, |a| ts > a)
    }
}
