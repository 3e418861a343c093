use thiserror::Error;

use crate::context::SourceId;

/// Errors from context operations aimed at a source the loop no longer
/// knows. Mis-sequencing of the scheduling lifecycle (resetting an
/// uncancelled gate, re-starting a running dispatcher) is defined as a
/// no-op and never surfaces here.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LoopError {
    /// The id does not (or no longer does) name an attached source.
    #[error("source {0:?} is not attached to this loop context")]
    SourceDestroyed(SourceId),

    /// The child id is not composed under the given parent.
    #[error("source {child:?} is not a child of source {parent:?}")]
    NotAChild { parent: SourceId, child: SourceId },
}
