use thiserror::Error;

/// Caller errors reported synchronously by the ledger operations. None are
/// retried internally and none are fatal to the ledger; a failed operation
/// leaves all state unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("invalid poll parameters: {0}")]
    InvalidInput(String),

    #[error("poll {0} does not exist")]
    PollNotFound(u64),

    #[error("poll is not active")]
    PollInactive,

    #[error("poll has ended")]
    PollExpired,

    #[error("invalid option index")]
    InvalidOption,

    #[error("identity has already voted on this poll")]
    AlreadyVoted,

    #[error("only the creator can end the poll")]
    NotCreator,

    #[error("poll already ended")]
    PollAlreadyEnded,
}

pub type Result<T> = std::result::Result<T, LedgerError>;
