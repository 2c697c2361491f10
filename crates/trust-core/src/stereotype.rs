//! Bounded table of stereotype priors keyed by device class, fetched
//! on-demand from the root of trust and applied as a weak prior for edges
//! with little direct interaction history.

use std::collections::HashMap;

use thiserror::Error;

use crate::certificate::StereotypeTags;
use crate::limits::MAX_STEREOTYPES;
use crate::trust_model::{EdgeTrustState, TrustModelKind};

#[derive(Debug, Error)]
pub enum StereotypeError {
    #[error("a request for this device class is already pending")]
    RequestInFlight,
    #[error("stereotype table is full and nothing is evictable")]
    Full,
}

struct Entry {
    prior: EdgeTrustState,
    referenced_by_certificates: u32,
}

enum Slot {
    Resolved(Entry),
    Pending,
}

/// Caches a `Beta`/`EdgeTrustState` prior per device class, requested
/// lazily from the root and evicted once no known certificate still
/// references that class.
pub struct StereotypeTable {
    kind: TrustModelKind,
    entries: HashMap<u8, Slot>,
}

impl StereotypeTable {
    pub fn new(kind: TrustModelKind) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
        }
    }

    /// Returns `true` if a request should actually be sent (first time or
    /// retried after a previous failure); idempotent for an
    /// already-pending or already-resolved class.
    pub fn request(&mut self, tags: StereotypeTags) -> Result<bool, StereotypeError> {
        if self.entries.contains_key(&tags.device_class) {
            return Ok(false);
        }

        if self.entries.len() >= MAX_STEREOTYPES {
            self.evict_unreferenced();
            if self.entries.len() >= MAX_STEREOTYPES {
                return Err(StereotypeError::Full);
            }
        }

        self.entries.insert(tags.device_class, Slot::Pending);
        Ok(true)
    }

    pub fn resolve(&mut self, tags: StereotypeTags, prior: EdgeTrustState) {
        self.entries.insert(
            tags.device_class,
            Slot::Resolved(Entry {
                prior,
                referenced_by_certificates: 0,
            }),
        );
    }

    pub fn find(&self, tags: StereotypeTags) -> Option<&EdgeTrustState> {
        match self.entries.get(&tags.device_class)? {
            Slot::Resolved(entry) => Some(&entry.prior),
            Slot::Pending => None,
        }
    }

    pub fn is_pending(&self, tags: StereotypeTags) -> bool {
        matches!(self.entries.get(&tags.device_class), Some(Slot::Pending))
    }

    pub fn reference(&mut self, tags: StereotypeTags) {
        if let Some(Slot::Resolved(entry)) = self.entries.get_mut(&tags.device_class) {
            entry.referenced_by_certificates += 1;
        }
    }

    pub fn unreference(&mut self, tags: StereotypeTags) {
        if let Some(Slot::Resolved(entry)) = self.entries.get_mut(&tags.device_class) {
            entry.referenced_by_certificates = entry.referenced_by_certificates.saturating_sub(1);
        }
    }

    fn evict_unreferenced(&mut self) {
        let stale: Vec<u8> = self
            .entries
            .iter()
            .filter_map(|(class, slot)| match slot {
                Slot::Resolved(entry) if entry.referenced_by_certificates == 0 => Some(*class),
                _ => None,
            })
            .collect();
        for class in stale {
            self.entries.remove(&class);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn trust_model_kind(&self) -> TrustModelKind {
        self.kind
    }
}
