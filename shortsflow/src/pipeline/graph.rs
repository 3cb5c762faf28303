//! The fixed stage graph.
//!
//! Stages are arranged in groups. Groups run in order; members of one group
//! are dispatched concurrently. A stage causally precedes another exactly when
//! its group comes first.

use crate::core::StageId;

/// The fixed partial order of the video pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageGraph;

static GROUPS: [&[StageId]; 8] = [
    &[StageId::FetchTopic],
    &[StageId::GenerateNarrative],
    &[StageId::GenerateMetadata],
    &[StageId::GenerateImages, StageId::SynthesizeVoice],
    &[StageId::AnimateAvatar],
    &[StageId::TranscribeSubtitles],
    &[StageId::ComposeVideo],
    &[StageId::Upload, StageId::Backup, StageId::Notify],
];

impl StageGraph {
    /// Execution groups, in order.
    #[must_use]
    pub fn groups() -> &'static [&'static [StageId]] {
        &GROUPS
    }

    /// Index of the group containing `stage`.
    #[must_use]
    pub fn group_index(stage: StageId) -> usize {
        GROUPS
            .iter()
            .position(|group| group.contains(&stage))
            .unwrap_or(GROUPS.len())
    }

    /// Whether `before` causally precedes `after`.
    #[must_use]
    pub fn precedes(before: StageId, after: StageId) -> bool {
        Self::group_index(before) < Self::group_index(after)
    }

    /// Stages whose outputs `stage` reads.
    #[must_use]
    pub fn dependencies(stage: StageId) -> &'static [StageId] {
        match stage {
            StageId::FetchTopic => &[],
            StageId::GenerateNarrative => &[StageId::FetchTopic],
            StageId::GenerateMetadata => &[StageId::GenerateNarrative],
            StageId::GenerateImages => &[StageId::GenerateMetadata],
            StageId::SynthesizeVoice => &[StageId::GenerateNarrative],
            StageId::AnimateAvatar | StageId::TranscribeSubtitles => &[StageId::SynthesizeVoice],
            StageId::ComposeVideo => &[
                StageId::GenerateImages,
                StageId::SynthesizeVoice,
                StageId::AnimateAvatar,
                StageId::TranscribeSubtitles,
            ],
            StageId::Upload | StageId::Notify => &[StageId::GenerateMetadata, StageId::ComposeVideo],
            StageId::Backup => &[StageId::ComposeVideo],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_stage_in_exactly_one_group() {
        for stage in StageId::ALL {
            let count = StageGraph::groups()
                .iter()
                .filter(|g| g.contains(&stage))
                .count();
            assert_eq!(count, 1, "{stage}");
        }
    }

    #[test]
    fn test_dependencies_precede_their_readers() {
        for stage in StageId::ALL {
            for dep in StageGraph::dependencies(stage) {
                assert!(StageGraph::precedes(*dep, stage), "{dep} -> {stage}");
            }
        }
    }

    #[test]
    fn test_group_members_do_not_precede_each_other() {
        assert!(!StageGraph::precedes(StageId::GenerateImages, StageId::SynthesizeVoice));
        assert!(!StageGraph::precedes(StageId::SynthesizeVoice, StageId::GenerateImages));
        assert!(!StageGraph::precedes(StageId::Upload, StageId::Notify));
        assert!(StageGraph::precedes(StageId::FetchTopic, StageId::Notify));
    }

    #[test]
    fn test_group_order_matches_stage_order() {
        let flattened: Vec<_> = StageGraph::groups().iter().flat_map(|g| g.iter().copied()).collect();
        assert_eq!(flattened, StageId::ALL.to_vec());
    }
}
