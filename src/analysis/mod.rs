//! Pure monthly analytics: correlation matrices and the temporal network.
//!
//! Nothing here touches the store. Each month is described by an explicit
//! context value, so months can be computed independently and in any order.

pub mod correlation;
pub mod network;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub use correlation::{CorrelationOutcome, MonthContext, MonthPanel, group_by_month, monthly_correlations};
pub use network::{AssetGraph, network_metrics};

/// Total order over asset identifiers, used to emit each pair once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetOrder {
    /// Byte-wise string order.
    #[default]
    Lexical,
    /// ASCII case-insensitive, ties broken lexically.
    CaseInsensitive,
}

impl AssetOrder {
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        match self {
            AssetOrder::Lexical => a.cmp(b),
            AssetOrder::CaseInsensitive => a
                .bytes()
                .map(|c| c.to_ascii_lowercase())
                .cmp(b.bytes().map(|c| c.to_ascii_lowercase()))
                .then_with(|| a.cmp(b)),
        }
    }

    pub fn sort<S: AsRef<str>>(&self, assets: &mut [S]) {
        assets.sort_by(|a, b| self.compare(a.as_ref(), b.as_ref()));
    }
}
