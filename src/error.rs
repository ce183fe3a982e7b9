use thiserror::Error;

/// Every way a reward operation can be refused.
/// Reducers surface these to the client as the error string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RewardError {
    #[error("student {0} not found")]
    StudentNotFound(String),

    #[error("problem {0} not found")]
    ProblemNotFound(u64),

    #[error("item {0} not found")]
    ItemNotFound(u64),

    #[error("task {0} not found")]
    TaskNotFound(u64),

    #[error("chapter {0} not found")]
    ChapterNotFound(u64),

    #[error("item {0} is not owned")]
    NotOwned(u64),

    #[error("already completed")]
    AlreadyCompleted,

    #[error("login bonus already claimed today")]
    AlreadyClaimedToday,

    #[error("insufficient funds: need {needed} coins, have {available}")]
    InsufficientFunds { needed: u32, available: u32 },

    #[error("level too low: requires level {required}, current level {current}")]
    LevelTooLow { required: u32, current: u32 },

    #[error("item catalog is empty")]
    EmptyCatalog,

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("validation error: {0}")]
    Validation(String),
}

impl From<RewardError> for String {
    fn from(err: RewardError) -> Self {
        err.to_string()
    }
}

pub type RewardResult<T> = Result<T, RewardError>;
