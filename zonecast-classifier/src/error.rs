use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ClassifierError {
    #[error("Allowlist entry {0:?} collides with the unnamed-device sentinel")]
    ReservedName(String),

    #[error("Alias code {code:?} maps to an invalid zone label {zone:?}")]
    InvalidAlias { code: String, zone: String },

    #[error("Keyword {0:?} would match unnamed devices")]
    KeywordMatchesSentinel(String),

    #[error("Classifier policy has no entries")]
    EmptyPolicy,
}

pub type Result<T> = std::result::Result<T, ClassifierError>;
