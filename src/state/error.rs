//! Merge Collision Error - explicit error for overlapping shard states

/// Error returned when merging a shard state into a target that already holds
/// one of its users. Users are owned by exactly one shard, so a collision means
/// routing was not deterministic. Reported instead of overwriting silently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeCollisionError {
    /// The user present on both sides of the merge
    pub user: String,
}

impl std::fmt::Display for MergeCollisionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "merge collision: user '{}' is owned by more than one shard",
            self.user
        )
    }
}

impl std::error::Error for MergeCollisionError {}
