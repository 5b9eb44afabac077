//! Skip policies: which transform faults a chunk step tolerates.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use batchforge_core::{FaultCategory, ItemFault};

/// Set of fault categories a policy may skip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkippableFaults {
    /// Every category.
    Any,
    /// Only the listed categories.
    Only(BTreeSet<FaultCategory>),
}

impl SkippableFaults {
    pub fn only(categories: impl IntoIterator<Item = FaultCategory>) -> Self {
        Self::Only(categories.into_iter().collect())
    }

    /// Validation, parse and transform faults; not `Other`.
    pub fn data() -> Self {
        Self::only(FaultCategory::DATA)
    }

    pub fn matches(&self, category: FaultCategory) -> bool {
        match self {
            Self::Any => true,
            Self::Only(set) => set.contains(&category),
        }
    }
}

impl Default for SkippableFaults {
    fn default() -> Self {
        Self::Any
    }
}

/// Decides whether a transform fault is dropped (and counted) or aborts the
/// attempt. `skip_count` is the number of items skipped so far in the
/// current attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipPolicy {
    /// Every fault is fatal.
    NeverSkip,
    /// Every fault is skipped, without limit. Hides systematic failures; use
    /// only for best-effort data.
    AlwaysSkip,
    /// Skip matching faults while fewer than `limit` have been skipped.
    LimitedSkip { limit: u64, skippable: SkippableFaults },
    /// Skip only matching categories, optionally capped by `limit`.
    ClassifyingSkip {
        skippable: SkippableFaults,
        limit: Option<u64>,
    },
}

impl Default for SkipPolicy {
    fn default() -> Self {
        Self::NeverSkip
    }
}

impl SkipPolicy {
    /// `LimitedSkip` over any category.
    pub fn limited(limit: u64) -> Self {
        Self::LimitedSkip {
            limit,
            skippable: SkippableFaults::Any,
        }
    }

    /// `LimitedSkip` over the given categories.
    pub fn limited_to(limit: u64, categories: impl IntoIterator<Item = FaultCategory>) -> Self {
        Self::LimitedSkip {
            limit,
            skippable: SkippableFaults::only(categories),
        }
    }

    /// Uncapped `ClassifyingSkip` over the given categories.
    pub fn classifying(categories: impl IntoIterator<Item = FaultCategory>) -> Self {
        Self::ClassifyingSkip {
            skippable: SkippableFaults::only(categories),
            limit: None,
        }
    }

    /// Cap a `ClassifyingSkip`; other variants are returned unchanged.
    pub fn with_limit(self, limit: u64) -> Self {
        match self {
            Self::ClassifyingSkip { skippable, .. } => Self::ClassifyingSkip {
                skippable,
                limit: Some(limit),
            },
            other => other,
        }
    }

    pub fn should_skip(&self, fault: &ItemFault, skip_count: u64) -> bool {
        match self {
            Self::NeverSkip => false,
            Self::AlwaysSkip => true,
            Self::LimitedSkip { limit, skippable } => {
                skip_count < *limit && skippable.matches(fault.category)
            }
            Self::ClassifyingSkip { skippable, limit } => {
                skippable.matches(fault.category) && limit.is_none_or(|l| skip_count < l)
            }
        }
    }
}
