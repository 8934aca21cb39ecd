use cutover_store::StoreError;

use crate::phase::Phase;

#[derive(Debug, thiserror::Error)]
pub enum CutoverError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("translation failed: {0}")]
    Translation(String),

    #[error("{0}")]
    Validation(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("conflicting write on {0}: lock wait exceeded")]
    ConflictingWrite(String),

    #[error("illegal phase transition from {from} to {to}")]
    IllegalTransition { from: Phase, to: Phase },

    #[error("invalid phase `{0}`")]
    InvalidPhase(String),

    #[error("store `{0}`")]
    Store(StoreError),
}

impl CutoverError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CutoverError::NotFound(_))
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, CutoverError::StoreUnavailable(_))
    }
}

impl From<StoreError> for CutoverError {
    fn from(value: StoreError) -> Self {
        if value.is_unavailable() {
            CutoverError::StoreUnavailable(value.to_string())
        } else {
            CutoverError::Store(value)
        }
    }
}

pub type Result<T> = std::result::Result<T, CutoverError>;
