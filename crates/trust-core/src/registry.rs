//! Bounded, generational-index arenas for known edges, the capabilities
//! they advertise, and the peer nodes gossip has told us about.

use std::collections::HashMap;
use std::net::Ipv6Addr;

use thiserror::Error;

use crate::eui64::Eui64;
use crate::limits::{MAX_CAPABILITIES_PER_EDGE, MAX_EDGES, MAX_PEERS};
use crate::trust_model::{CapabilityTrustState, EdgeTrustState, TrustModelKind};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry is full and no evictable entry was found")]
    Full,
    #[error("unknown edge handle")]
    UnknownEdge,
    #[error("unknown capability handle")]
    UnknownCapability,
    #[error("capability {0:?} already registered for this edge")]
    DuplicateCapability(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EdgeHandle {
    slot: usize,
    generation: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CapabilityHandle {
    slot: usize,
    generation: u32,
}

struct EdgeSlot {
    entry: Option<Edge>,
    generation: u32,
}

struct CapabilitySlot {
    entry: Option<Capability>,
    generation: u32,
}

#[derive(Clone, Debug)]
pub struct Edge {
    pub eui64: Eui64,
    pub address: Ipv6Addr,
    pub active: bool,
    pub trust: EdgeTrustState,
    capabilities: Vec<CapabilityHandle>,
}

#[derive(Clone, Debug)]
pub struct Capability {
    pub edge: EdgeHandle,
    pub name: String,
    pub active: bool,
    pub trust: CapabilityTrustState,
}

/// Registry of known edges and the capabilities they advertise, with a
/// free-up policy that prefers evicting inactive entries before active
/// ones, keeping total state bounded regardless of gossip volume.
/// A peer's self-reported view of the edges it has interacted with,
/// received via trust exchange and merged in verbatim (peers/edges
/// unknown locally are skipped, never invented).
#[derive(Clone, Debug, Default)]
pub struct PeerRecord {
    pub address: Ipv6Addr,
    /// The peer's own monotonic clock at the time of its last trust report;
    /// not comparable across peers, only used to detect stale re-sends.
    pub last_seen: u64,
    edges: HashMap<Eui64, EdgeTrustState>,
}

impl PeerRecord {
    pub fn edge(&self, eui64: &Eui64) -> Option<&EdgeTrustState> {
        self.edges.get(eui64)
    }

    pub fn merge_edge_report(&mut self, eui64: Eui64, state: EdgeTrustState) {
        self.edges.insert(eui64, state);
    }
}

pub struct Registry {
    kind: TrustModelKind,
    edges: Vec<EdgeSlot>,
    by_eui64: HashMap<Eui64, usize>,
    capabilities: Vec<CapabilitySlot>,
    peers: HashMap<Eui64, PeerRecord>,
}

impl Registry {
    pub fn new(kind: TrustModelKind) -> Self {
        Self {
            kind,
            edges: Vec::new(),
            by_eui64: HashMap::new(),
            capabilities: Vec::new(),
            peers: HashMap::new(),
        }
    }

    pub fn trust_model_kind(&self) -> TrustModelKind {
        self.kind
    }

    pub fn add_edge(&mut self, eui64: Eui64, address: Ipv6Addr) -> Result<EdgeHandle, RegistryError> {
        if let Some(&slot) = self.by_eui64.get(&eui64) {
            let generation = self.edges[slot].generation;
            if let Some(edge) = &mut self.edges[slot].entry {
                edge.address = address;
                edge.active = true;
            }
            return Ok(EdgeHandle { slot, generation });
        }

        let slot = if self.edges.len() < MAX_EDGES {
            self.edges.push(EdgeSlot { entry: None, generation: 0 });
            self.edges.len() - 1
        } else {
            self.find_evictable_edge().ok_or(RegistryError::Full)?
        };

        let edge = Edge {
            eui64,
            address,
            active: true,
            trust: EdgeTrustState::new(self.kind),
            capabilities: Vec::new(),
        };

        self.edges[slot].entry = Some(edge);
        self.edges[slot].generation = self.edges[slot].generation.wrapping_add(1);
        self.by_eui64.insert(eui64, slot);

        Ok(EdgeHandle {
            slot,
            generation: self.edges[slot].generation,
        })
    }

    fn find_evictable_edge(&self) -> Option<usize> {
        self.edges
            .iter()
            .position(|s| matches!(&s.entry, Some(e) if !e.active && e.capabilities.is_empty()))
    }

    pub fn mark_edge_inactive(&mut self, handle: EdgeHandle) -> Result<(), RegistryError> {
        let edge = self.resolve_edge_mut(handle)?;
        edge.active = false;
        Ok(())
    }

    pub fn remove_edge(&mut self, handle: EdgeHandle) -> Result<(), RegistryError> {
        let slot = self.resolve_slot(handle)?;
        let edge = self.edges[slot].entry.take().ok_or(RegistryError::UnknownEdge)?;
        self.by_eui64.remove(&edge.eui64);
        for cap_handle in edge.capabilities {
            if let Ok(cap_slot) = self.resolve_capability_slot(cap_handle) {
                self.capabilities[cap_slot].entry = None;
            }
        }
        Ok(())
    }

    pub fn find_edge_by_eui64(&self, eui64: &Eui64) -> Option<EdgeHandle> {
        let &slot = self.by_eui64.get(eui64)?;
        Some(EdgeHandle {
            slot,
            generation: self.edges[slot].generation,
        })
    }

    pub fn find_edge_by_address(&self, address: &Ipv6Addr) -> Option<EdgeHandle> {
        self.edges.iter().enumerate().find_map(|(slot, s)| match &s.entry {
            Some(e) if &e.address == address => Some(EdgeHandle { slot, generation: s.generation }),
            _ => None,
        })
    }

    pub fn edge(&self, handle: EdgeHandle) -> Result<&Edge, RegistryError> {
        self.resolve_edge(handle)
    }

    pub fn edge_mut(&mut self, handle: EdgeHandle) -> Result<&mut Edge, RegistryError> {
        self.resolve_edge_mut(handle)
    }

    pub fn iter_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter_map(|s| s.entry.as_ref())
    }

    pub fn add_capability(&mut self, edge_handle: EdgeHandle, name: impl Into<String>) -> Result<CapabilityHandle, RegistryError> {
        let name = name.into();
        let edge_slot = self.resolve_slot(edge_handle)?;

        {
            let edge = self.edges[edge_slot].entry.as_ref().ok_or(RegistryError::UnknownEdge)?;
            if edge.capabilities.len() >= MAX_CAPABILITIES_PER_EDGE {
                for &cap_handle in &edge.capabilities {
                    if let Ok(slot) = self.resolve_capability_slot(cap_handle) {
                        if let Some(cap) = &self.capabilities[slot].entry {
                            if cap.name == name {
                                return Ok(cap_handle);
                            }
                        }
                    }
                }
                return Err(RegistryError::DuplicateCapability(name));
            }
            for &cap_handle in &edge.capabilities {
                if let Ok(slot) = self.resolve_capability_slot(cap_handle) {
                    if let Some(cap) = &self.capabilities[slot].entry {
                        if cap.name == name {
                            return Ok(cap_handle);
                        }
                    }
                }
            }
        }

        let slot = self.allocate_capability_slot();
        let capability = Capability {
            edge: edge_handle,
            name,
            active: true,
            trust: CapabilityTrustState::new(self.kind),
        };
        self.capabilities[slot].entry = Some(capability);
        self.capabilities[slot].generation = self.capabilities[slot].generation.wrapping_add(1);
        let handle = CapabilityHandle {
            slot,
            generation: self.capabilities[slot].generation,
        };

        if let Some(edge) = self.edges[edge_slot].entry.as_mut() {
            edge.capabilities.push(handle);
        }

        Ok(handle)
    }

    fn allocate_capability_slot(&mut self) -> usize {
        if let Some(slot) = self
            .capabilities
            .iter()
            .position(|s| s.entry.is_none())
        {
            return slot;
        }
        if self.capabilities.len() < MAX_EDGES * MAX_CAPABILITIES_PER_EDGE {
            self.capabilities.push(CapabilitySlot { entry: None, generation: 0 });
            return self.capabilities.len() - 1;
        }
        if let Some(slot) = self
            .capabilities
            .iter()
            .position(|s| matches!(&s.entry, Some(c) if !c.active))
        {
            return slot;
        }
        self.capabilities.push(CapabilitySlot { entry: None, generation: 0 });
        self.capabilities.len() - 1
    }

    pub fn capability(&self, handle: CapabilityHandle) -> Result<&Capability, RegistryError> {
        self.resolve_capability(handle)
    }

    pub fn capability_mut(&mut self, handle: CapabilityHandle) -> Result<&mut Capability, RegistryError> {
        let slot = self.resolve_capability_slot(handle)?;
        self.capabilities[slot].entry.as_mut().ok_or(RegistryError::UnknownCapability)
    }

    pub fn find_capability(&self, edge_handle: EdgeHandle, name: &str) -> Option<CapabilityHandle> {
        let edge = self.resolve_edge(edge_handle).ok()?;
        edge.capabilities.iter().copied().find(|&h| {
            self.resolve_capability(h).map(|c| c.name == name).unwrap_or(false)
        })
    }

    pub fn has_active_capability(&self, edge_handle: EdgeHandle, name: &str) -> bool {
        match self.find_capability(edge_handle, name) {
            Some(handle) => self
                .resolve_capability(handle)
                .map(|c| c.active)
                .unwrap_or(false),
            None => false,
        }
    }

    pub fn iter_capabilities_of(&self, edge_handle: EdgeHandle) -> impl Iterator<Item = &Capability> {
        let handles = self
            .resolve_edge(edge_handle)
            .map(|e| e.capabilities.clone())
            .unwrap_or_default();
        handles.into_iter().filter_map(move |h| self.resolve_capability(h).ok())
    }

    /// Records that a peer was seen (announce, trust POST, etc.), creating
    /// its record on first contact. On memory pressure, evicts the peer
    /// record with the oldest `last_seen` stamp.
    pub fn record_peer(&mut self, eui64: Eui64, address: Ipv6Addr) {
        self.record_peer_at(eui64, address, 0)
    }

    pub fn record_peer_at(&mut self, eui64: Eui64, address: Ipv6Addr, last_seen: u64) {
        if self.peers.len() >= MAX_PEERS && !self.peers.contains_key(&eui64) {
            if let Some(&stale) = self
                .peers
                .iter()
                .min_by_key(|(_, record)| record.last_seen)
                .map(|(eui64, _)| eui64)
            {
                self.peers.remove(&stale);
            }
        }
        let record = self.peers.entry(eui64).or_default();
        record.address = address;
        record.last_seen = record.last_seen.max(last_seen);
    }

    pub fn peer_address(&self, eui64: &Eui64) -> Option<Ipv6Addr> {
        self.peers.get(eui64).map(|r| r.address)
    }

    pub fn peer(&self, eui64: &Eui64) -> Option<&PeerRecord> {
        self.peers.get(eui64)
    }

    pub fn iter_peers(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    /// Merges one reported per-edge trust state into `sender`'s peer
    /// record. `sender` must already be known (via `record_peer`); the
    /// local edge named by `edge_eui64` need not be known — the caller is
    /// expected to have already checked that and skipped unknown edges.
    pub fn merge_peer_edge_report(&mut self, sender: Eui64, edge_eui64: Eui64, state: EdgeTrustState) {
        if let Some(record) = self.peers.get_mut(&sender) {
            record.merge_edge_report(edge_eui64, state);
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    fn resolve_slot(&self, handle: EdgeHandle) -> Result<usize, RegistryError> {
        let slot = self.edges.get(handle.slot).ok_or(RegistryError::UnknownEdge)?;
        if slot.generation != handle.generation || slot.entry.is_none() {
            return Err(RegistryError::UnknownEdge);
        }
        Ok(handle.slot)
    }

    fn resolve_edge(&self, handle: EdgeHandle) -> Result<&Edge, RegistryError> {
        let slot = self.resolve_slot(handle)?;
        self.edges[slot].entry.as_ref().ok_or(RegistryError::UnknownEdge)
    }

    fn resolve_edge_mut(&mut self, handle: EdgeHandle) -> Result<&mut Edge, RegistryError> {
        let slot = self.resolve_slot(handle)?;
        self.edges[slot].entry.as_mut().ok_or(RegistryError::UnknownEdge)
    }

    fn resolve_capability_slot(&self, handle: CapabilityHandle) -> Result<usize, RegistryError> {
        let slot = self.capabilities.get(handle.slot).ok_or(RegistryError::UnknownCapability)?;
        if slot.generation != handle.generation || slot.entry.is_none() {
            return Err(RegistryError::UnknownCapability);
        }
        Ok(handle.slot)
    }

    fn resolve_capability(&self, handle: CapabilityHandle) -> Result<&Capability, RegistryError> {
        let slot = self.resolve_capability_slot(handle)?;
        self.capabilities[slot].entry.as_ref().ok_or(RegistryError::UnknownCapability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eui(byte: u8) -> Eui64 {
        Eui64([byte; 8])
    }

    #[test]
    fn add_edge_is_idempotent_by_eui64() {
        let mut registry = Registry::new(TrustModelKind::None);
        let addr: Ipv6Addr = "fe80::1".parse().unwrap();
        let h1 = registry.add_edge(eui(1), addr).unwrap();
        let h2 = registry.add_edge(eui(1), addr).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn stale_handle_after_remove_is_rejected() {
        let mut registry = Registry::new(TrustModelKind::None);
        let addr: Ipv6Addr = "fe80::1".parse().unwrap();
        let handle = registry.add_edge(eui(1), addr).unwrap();
        registry.remove_edge(handle).unwrap();
        assert!(registry.edge(handle).is_err());
    }

    #[test]
    fn capability_registration_is_idempotent_and_queryable() {
        let mut registry = Registry::new(TrustModelKind::None);
        let addr: Ipv6Addr = "fe80::1".parse().unwrap();
        let edge = registry.add_edge(eui(2), addr).unwrap();
        let c1 = registry.add_capability(edge, "temperature").unwrap();
        let c2 = registry.add_capability(edge, "temperature").unwrap();
        assert_eq!(c1, c2);
        assert!(registry.has_active_capability(edge, "temperature"));
        assert!(!registry.has_active_capability(edge, "humidity"));
    }

    #[test]
    fn evicts_inactive_edge_with_no_capabilities_when_full() {
        let mut registry = Registry::new(TrustModelKind::None);
        let first = registry.add_edge(eui(9), "fe80::9".parse().unwrap()).unwrap();
        registry.mark_edge_inactive(first).unwrap();

        for i in 10..(10 + crate::limits::MAX_EDGES as u8 - 1) {
            registry.add_edge(eui(i), "fe80::10".parse().unwrap()).unwrap();
        }

        let fresh = registry.add_edge(eui(200), "fe80::200".parse().unwrap());
        assert!(fresh.is_ok());
        assert!(registry.edge(first).is_err());
    }

    #[test]
    fn peer_table_is_bounded() {
        let mut registry = Registry::new(TrustModelKind::None);
        for i in 0..(crate::limits::MAX_PEERS as u8).saturating_add(5) {
            registry.record_peer(eui(i), "fe80::1".parse().unwrap());
        }
        assert!(registry.peer_count() <= crate::limits::MAX_PEERS);
    }

    #[test]
    fn merged_peer_edge_report_is_retrievable_and_unknown_peer_is_skipped() {
        use crate::trust_model::Beta;

        let mut registry = Registry::new(TrustModelKind::Reputation);
        let sender = eui(42);
        let reported_edge = eui(1);
        registry.record_peer(sender, "fe80::42".parse().unwrap());

        let state = EdgeTrustState::Reputation {
            task_submission: Beta::new(3, 1),
            task_result: Beta::default(),
        };
        registry.merge_peer_edge_report(sender, reported_edge, state.clone());

        let record = registry.peer(&sender).unwrap();
        assert_eq!(record.edge(&reported_edge), Some(&state));

        // An unknown sender is silently skipped, not an error.
        registry.merge_peer_edge_report(eui(99), reported_edge, state);
        assert!(registry.peer(&eui(99)).is_none());
    }
}
