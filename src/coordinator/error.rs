use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("Success percentage must be between 0 and 100, got {0}")]
    InvalidPercentage(i64),

    #[error("Duplicate participant id: {0}")]
    DuplicateParticipant(usize),

    #[error("Worker pool is closed")]
    PoolClosed,
}
