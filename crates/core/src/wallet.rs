//! Wallet collaborator seam and recipient-name resolution.
//!
//! The actual signing/transfer machinery is a third-party concern behind the
//! [`Wallet`] trait; the core only resolves names and normalizes results into
//! the `{message}`/`{error}` shape all tools use.

use async_trait::async_trait;
use fuzzy_matcher::{FuzzyMatcher, skim::SkimMatcherV2};
use std::collections::BTreeMap;

/// Narrow interface over the wallet SDK/collaborator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Wallet: Send + Sync {
    /// The connected account address.
    async fn address(&self) -> anyhow::Result<String>;
    /// Current balance, formatted in whole-token units (e.g. "1.2500 ETH").
    async fn balance(&self) -> anyhow::Result<String>;
    /// Submits a transfer and returns the transaction hash.
    async fn transfer(&self, to: &str, amount_eth: f64) -> anyhow::Result<String>;
}

/// Human-readable name to chain address mapping, resolved fuzzily so a spoken
/// "send it to colin" finds "Colin Smith".
pub struct AddressBook {
    entries: BTreeMap<String, String>,
    matcher: SkimMatcherV2,
}

impl AddressBook {
    pub fn new(entries: BTreeMap<String, String>) -> Self {
        Self {
            entries,
            matcher: SkimMatcherV2::default(),
        }
    }

    pub fn empty() -> Self {
        Self::new(BTreeMap::new())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when the recipient is already a chain address and needs no lookup.
    pub fn is_address(recipient: &str) -> bool {
        let hex = match recipient.strip_prefix("0x") {
            Some(rest) => rest,
            None => return false,
        };
        hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit())
    }

    /// Best fuzzy match for a spoken or typed name.
    pub fn resolve(&self, query: &str) -> Option<(&str, &str)> {
        self.entries
            .iter()
            .filter_map(|(name, address)| {
                self.matcher
                    .fuzzy_match(name, query)
                    .map(|score| (score, name, address))
            })
            .max_by_key(|(score, ..)| *score)
            .map(|(_, name, address)| (name.as_str(), address.as_str()))
    }
}
