use cutover_store::Store;
use parse_display::Display;
use serde::{Deserialize, Serialize};

use crate::phase::Phase;

#[derive(Debug, Clone, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum Connectivity {
    #[display("connected")]
    Connected,
    #[display("disconnected: {0}")]
    Disconnected(String),
}

impl Connectivity {
    pub async fn probe(store: &Store) -> Self {
        match store.ping().await {
            Ok(_) => Connectivity::Connected,
            Err(e) => Connectivity::Disconnected(e.to_string()),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Connectivity::Connected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub phase: Phase,
    pub source: Connectivity,
    pub destination: Connectivity,
}

impl Health {
    /// Whether every store the phase reads from is reachable.
    pub fn is_serving(&self) -> bool {
        match self.phase {
            Phase::SourceOnly | Phase::DualWrite => self.source.is_connected(),
            Phase::DualReadFallback => {
                self.source.is_connected() || self.destination.is_connected()
            }
            Phase::DestinationOnly => self.destination.is_connected(),
        }
    }
}
