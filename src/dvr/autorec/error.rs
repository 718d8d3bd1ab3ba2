use thiserror::Error;

use super::RuleId;

#[derive(Error, Debug)]
pub enum AutorecError {
    #[error("Invalid autorec entry id '{0}'")]
    InvalidId(String),

    #[error("Invalid title pattern '{pattern}': {source}")]
    InvalidTitlePattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Autorec entry not found: {0}")]
    NotFound(RuleId),

    #[error("Storage error: {0:#}")]
    Store(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AutorecError>;
