use thiserror::Error;

/// Failures the pipeline can surface to a caller.
///
/// `StateInconsistency` is fatal and never auto-repaired: the persisted
/// status and the on-disk artifacts disagree, which needs a human decision.
/// `ValidationFailure` blocks advancement but is recoverable by fixing the
/// offending inputs and re-running.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("chapter {chapter}: status claims '{status}' but {missing} is absent")]
    StateInconsistency {
        chapter: usize,
        status: String,
        missing: String,
    },

    #[error("cannot extract a scene index from '{filename}'")]
    AmbiguousFilename { filename: String },

    #[error("'{first}' and '{second}' both resolve to scene {index}")]
    FilenameCollision {
        first: String,
        second: String,
        index: usize,
    },

    #[error("chapter {chapter}: {count} validation error(s), first: {first}")]
    ValidationFailure {
        chapter: usize,
        count: usize,
        first: String,
    },

    #[error("{document}: {reason}")]
    SchemaError { document: String, reason: String },
}
