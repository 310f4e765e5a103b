//! Storage tiers and scopes

use serde::{Deserialize, Serialize};
use std::fmt;

/// A storage tier an entity may live in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// In-process memory
    Memory,
    /// On-device cache of remote content
    LocalCache,
    /// On-device drafts not yet published
    LocalDraft,
    /// Remote authoritative store
    Remote,
}

impl Tier {
    const fn bit(self) -> u8 {
        match self {
            Self::Memory => 1,
            Self::LocalCache => 1 << 1,
            Self::LocalDraft => 1 << 2,
            Self::Remote => 1 << 3,
        }
    }
}

/// The on-device tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalTier {
    /// Cache of remote content, safe to evict
    Cache,
    /// Unpublished work, must survive restarts
    Draft,
}

impl LocalTier {
    /// Directory / namespace name for the tier
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Draft => "draft",
        }
    }
}

impl From<LocalTier> for Tier {
    fn from(tier: LocalTier) -> Self {
        match tier {
            LocalTier::Cache => Tier::LocalCache,
            LocalTier::Draft => Tier::LocalDraft,
        }
    }
}

impl fmt::Display for LocalTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How far an operation reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Memory and the requested local tier only
    LocalOnly,
    /// Local tier first, then the remote store
    LocalThenRemote,
}

/// Outcome of a remote existence probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Existence {
    /// Remote holds the object
    Present,
    /// Remote does not hold the object
    Absent,
    /// Probe failed; the answer is unknown
    Indeterminate,
}

/// Set of tiers an entity is currently known to exist in
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TierSet(u8);

impl TierSet {
    /// Empty set
    #[inline]
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Check membership
    #[inline]
    #[must_use]
    pub fn contains(self, tier: Tier) -> bool {
        self.0 & tier.bit() != 0
    }

    /// Add a tier
    #[inline]
    pub fn insert(&mut self, tier: impl Into<Tier>) {
        self.0 |= tier.into().bit();
    }

    /// Remove a tier
    #[inline]
    pub fn remove(&mut self, tier: impl Into<Tier>) {
        self.0 &= !tier.into().bit();
    }

    /// Builder-style insert
    #[inline]
    #[must_use]
    pub fn with(mut self, tier: impl Into<Tier>) -> Self {
        self.insert(tier);
        self
    }

    /// No tier at all
    #[inline]
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate members in a fixed order
    pub fn iter(self) -> impl Iterator<Item = Tier> {
        [Tier::Memory, Tier::LocalCache, Tier::LocalDraft, Tier::Remote]
            .into_iter()
            .filter(move |t| self.contains(*t))
    }
}

impl fmt::Debug for TierSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
