//! Merge policies for segment management.
//!
//! A policy looks at the segments of a pending commit and proposes groups to
//! merge. The writer applies the proposals and asks again until nothing is
//! proposed, so every policy must eventually return an empty list.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};
use crate::lexical::index::segment::SegmentInfo;

/// Why a group of segments was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeReason {
    /// A size tier holds too many segments.
    TierOverflow,
    /// Segments with a high share of deleted documents are rewritten.
    Deletions,
}

/// Segments to merge into one.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeCandidate {
    /// Segment names, in generation order.
    pub segments: Vec<String>,
    pub reason: MergeReason,
}

/// Trait for defining merge policies.
pub trait MergePolicy: Send + Sync + std::fmt::Debug {
    /// Non-overlapping groups of segments to merge.
    fn select_merges(&self, segments: &[SegmentInfo]) -> Vec<MergeCandidate>;
}

/// Size-tiered merge policy.
///
/// Segments fall into tiers by live document count,
/// `floor(log_tier_factor(live))`. Any tier holding more than
/// `max_segments_per_tier` segments merges its `segments_per_merge`
/// smallest ones. Segments whose deleted ratio exceeds
/// `deletion_threshold` are rewritten to reclaim space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TieredMergePolicy {
    /// Maximum number of segments per tier.
    pub max_segments_per_tier: usize,

    /// Number of segments to merge at once.
    pub segments_per_merge: usize,

    /// Live-size ratio between consecutive tiers.
    pub tier_factor: f64,

    /// Deletion ratio above which a segment is rewritten.
    pub deletion_threshold: f64,

    /// Fewest segments a tier merge combines.
    pub min_merge_segments: usize,
}

impl Default for TieredMergePolicy {
    fn default() -> Self {
        TieredMergePolicy {
            max_segments_per_tier: 4,
            segments_per_merge: 4,
            tier_factor: 4.0,
            deletion_threshold: 0.3,
            min_merge_segments: 2,
        }
    }
}

impl TieredMergePolicy {
    pub fn validate(&self) -> Result<()> {
        if self.max_segments_per_tier == 0 {
            return Err(StrataError::invalid_argument("max_segments_per_tier must be positive"));
        }
        if self.min_merge_segments < 2 || self.segments_per_merge < self.min_merge_segments {
            return Err(StrataError::invalid_argument(
                "segments_per_merge must be at least min_merge_segments, which must be at least 2",
            ));
        }
        if !(self.tier_factor > 1.0) {
            return Err(StrataError::invalid_argument("tier_factor must be greater than 1"));
        }
        if !(self.deletion_threshold > 0.0 && self.deletion_threshold <= 1.0) {
            return Err(StrataError::invalid_argument("deletion_threshold must be in (0, 1]"));
        }
        Ok(())
    }

    /// Tier of a segment with `live` documents.
    pub fn tier(&self, live: u32) -> u32 {
        if live <= 1 {
            0
        } else {
            ((live as f64).ln() / self.tier_factor.ln()).floor() as u32
        }
    }

    /// Group segments by tier, smallest first within a tier.
    fn group_by_tier<'a>(&self, segments: &[&'a SegmentInfo]) -> BTreeMap<u32, Vec<&'a SegmentInfo>> {
        let mut tiers: BTreeMap<u32, Vec<&SegmentInfo>> = BTreeMap::new();
        for segment in segments {
            tiers.entry(self.tier(segment.doc_count())).or_default().push(segment);
        }
        for tier_segments in tiers.values_mut() {
            tier_segments.sort_by_key(|s| s.doc_count());
        }
        tiers
    }
}

impl MergePolicy for TieredMergePolicy {
    fn select_merges(&self, segments: &[SegmentInfo]) -> Vec<MergeCandidate> {
        let mut candidates = Vec::new();

        // Deletion-heavy segments are rewritten first, together when there
        // are several of them.
        let (heavy, rest): (Vec<&SegmentInfo>, Vec<&SegmentInfo>) = segments
            .iter()
            .partition(|s| s.deletion_ratio() > self.deletion_threshold);
        for group in heavy.chunks(self.segments_per_merge.max(1)) {
            candidates.push(MergeCandidate {
                segments: group.iter().map(|s| s.name.clone()).collect(),
                reason: MergeReason::Deletions,
            });
        }

        for (_, tier_segments) in self.group_by_tier(&rest) {
            if tier_segments.len() <= self.max_segments_per_tier {
                continue;
            }
            let take = self.segments_per_merge.min(tier_segments.len());
            if take < self.min_merge_segments {
                continue;
            }
            candidates.push(MergeCandidate {
                segments: tier_segments[..take].iter().map(|s| s.name.clone()).collect(),
                reason: MergeReason::TierOverflow,
            });
        }

        // Keep each group in generation order.
        let position: BTreeMap<&str, usize> = segments
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.as_str(), i))
            .collect();
        for candidate in &mut candidates {
            candidate.segments.sort_by_key(|name| position.get(name.as_str()).copied());
        }
        candidates
    }
}

/// No-merge policy for testing or read-mostly indexes.
#[derive(Debug, Clone, Default)]
pub struct NoMergePolicy;

impl MergePolicy for NoMergePolicy {
    fn select_merges(&self, _segments: &[SegmentInfo]) -> Vec<MergeCandidate> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn create_test_segment(name: &str, doc_count_all: u32, deleted_count: u32) -> SegmentInfo {
        SegmentInfo {
            name: name.to_string(),
            doc_count_all,
            deleted_count,
            del_gen: u64::from(deleted_count > 0),
            has_vectors: false,
            posting_formats: Default::default(),
            field_stats: Default::default(),
            field_epochs: Default::default(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_tiers() {
        let policy = TieredMergePolicy::default();
        assert_eq!(policy.tier(0), 0);
        assert_eq!(policy.tier(3), 0);
        assert_eq!(policy.tier(4), 1);
        assert_eq!(policy.tier(15), 1);
        assert_eq!(policy.tier(16), 2);
        assert_eq!(policy.tier(1000), 4);
    }

    #[test]
    fn test_tiered_merge_policy_too_many_segments() {
        let policy = TieredMergePolicy::default();
        let segments = vec![
            create_test_segment("seg1", 10, 0),
            create_test_segment("seg2", 8, 0),
            create_test_segment("seg3", 12, 0),
            create_test_segment("seg4", 9, 0),
            create_test_segment("big", 5000, 0),
        ];
        assert!(policy.select_merges(&segments).is_empty());

        let mut segments = segments;
        segments.push(create_test_segment("seg5", 5, 0));
        let candidates = policy.select_merges(&segments);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].reason, MergeReason::TierOverflow);
        // The four smallest of tier 1, listed in generation order.
        assert_eq!(candidates[0].segments, vec!["seg1", "seg2", "seg4", "seg5"]);
    }

    #[test]
    fn test_tiered_merge_policy_high_deletion() {
        let policy = TieredMergePolicy::default();
        let segments = vec![
            create_test_segment("seg1", 100, 31),
            create_test_segment("seg2", 100, 30),
            create_test_segment("seg3", 10, 9),
        ];
        let candidates = policy.select_merges(&segments);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].reason, MergeReason::Deletions);
        assert_eq!(candidates[0].segments, vec!["seg1", "seg3"]);
    }

    #[test]
    fn test_no_merge_policy() {
        let segments = vec![create_test_segment("seg1", 10, 9); 10];
        assert!(NoMergePolicy.select_merges(&segments).is_empty());
    }

    #[test]
    fn test_validate() {
        assert!(TieredMergePolicy::default().validate().is_ok());
        let bad = TieredMergePolicy {
            tier_factor: 1.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = TieredMergePolicy {
            segments_per_merge: 1,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
