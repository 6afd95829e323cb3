//! Detection and resolution of paths left unmerged by a pull.
//!
//! 1. **Detection** -- read unmerged paths and the blob ids of both sides.
//! 2. **Resolution** -- apply a keep-local, keep-remote or merge-both
//!    strategy per path and re-stage it.

pub mod detector;
pub mod resolver;

pub use detector::{detect_conflicts, ConflictRecord};
pub use resolver::{
    ConflictResolver, FixedStrategy, ResolutionPlan, ResolutionReport, ResolutionStrategy,
    ResolverState, StrategyPicker, MERGE_HEADER,
};
