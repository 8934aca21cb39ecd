use parking_lot::RwLock;
use parse_display::{Display, FromStr};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::{
    config::PHASE_ENV,
    error::{CutoverError, Result},
};

/// Migration phases, in the only order they may be advanced through.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    FromStr,
    Serialize,
    Deserialize,
)]
#[display(style = "SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    #[default]
    SourceOnly,
    DualWrite,
    DualReadFallback,
    DestinationOnly,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::SourceOnly,
        Phase::DualWrite,
        Phase::DualReadFallback,
        Phase::DestinationOnly,
    ];

    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::SourceOnly => Some(Phase::DualWrite),
            Phase::DualWrite => Some(Phase::DualReadFallback),
            Phase::DualReadFallback => Some(Phase::DestinationOnly),
            Phase::DestinationOnly => None,
        }
    }

    /// The source stays the system of record up to and including the
    /// fallback-read phase.
    pub fn source_authoritative(self) -> bool {
        self < Phase::DestinationOnly
    }

    pub fn writes_destination(self) -> bool {
        self >= Phase::DualWrite
    }

    pub fn reads_destination(self) -> bool {
        self >= Phase::DualReadFallback
    }

    pub fn parse(value: &str) -> Result<Phase> {
        value
            .trim()
            .to_uppercase()
            .parse()
            .map_err(|_| CutoverError::InvalidPhase(value.to_owned()))
    }

    /// Phase configured in `CUTOVER_PHASE`, `SOURCE_ONLY` when unset.
    pub fn from_env() -> Result<Phase> {
        match std::env::var(PHASE_ENV) {
            Ok(value) => Phase::parse(&value),
            Err(std::env::VarError::NotPresent) => Ok(Phase::default()),
            Err(e) => Err(CutoverError::InvalidPhase(e.to_string())),
        }
    }
}

/// Single source of truth for the active phase.
///
/// Nothing moves the phase except the explicit calls below. Components never
/// hold the controller; they are built with a [`Phase`] snapshot.
#[derive(Debug, Clone, Default)]
pub struct PhaseController(Arc<RwLock<Phase>>);

impl PhaseController {
    pub fn new(phase: Phase) -> Self {
        Self(Arc::new(RwLock::new(phase)))
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(Phase::from_env()?))
    }

    pub fn current(&self) -> Phase {
        *self.0.read()
    }

    /// Moves exactly one phase forward.
    pub fn advance(&self) -> Result<Phase> {
        let mut phase = self.0.write();
        let from = *phase;
        let to = from.next().ok_or(CutoverError::IllegalTransition { from, to: from })?;

        *phase = to;
        info!(%from, %to, "migration phase advanced");

        Ok(to)
    }

    /// Moves back to any earlier phase.
    pub fn rollback(&self, to: Phase) -> Result<Phase> {
        let mut phase = self.0.write();
        let from = *phase;

        if to >= from {
            return Err(CutoverError::IllegalTransition { from, to });
        }

        *phase = to;
        info!(%from, %to, "migration phase rolled back");

        Ok(to)
    }

    /// Administrative reload: accepts the current phase, the next one or any
    /// earlier one.
    pub fn reload(&self, to: Phase) -> Result<Phase> {
        let mut phase = self.0.write();
        let from = *phase;

        if to != from && to > from && from.next() != Some(to) {
            return Err(CutoverError::IllegalTransition { from, to });
        }

        if to != from {
            info!(%from, %to, "migration phase reloaded");
        }

        *phase = to;

        Ok(to)
    }

    pub fn reload_from_env(&self) -> Result<Phase> {
        self.reload(Phase::from_env()?)
    }
}
