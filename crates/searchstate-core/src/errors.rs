use crate::model::{FilterId, GroupId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid group type {0:?}")]
    InvalidGroupType(String),
    #[error("invalid filter spec: {0}")]
    InvalidFilterSpec(String),
    #[error("failed to evaluate search domain: {0}")]
    DomainEvaluation(String),
    #[error("unknown filter {0}")]
    UnknownFilter(FilterId),
    #[error("unknown group {0}")]
    UnknownGroup(GroupId),
    #[error("unknown field {0:?}")]
    UnknownField(String),
    #[error("a favorite named {0:?} already exists")]
    DuplicateFavorite(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
