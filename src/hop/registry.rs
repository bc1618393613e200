//! Session-wide collection of hops
//!
//! The map itself sits behind a coarse lock taken only to add, list or clear
//! hops. Each hop has its own mutex so writers on different hops never contend.

use crate::hop::HopState;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// A hop shared between the monitor, the resolvers and readers
pub type SharedHop = Arc<Mutex<HopState>>;

/// Hop-number keyed registry shared by every component of a session
#[derive(Debug, Clone, Default)]
pub struct HopRegistry {
    hops: Arc<Mutex<BTreeMap<u8, SharedHop>>>,
}

impl HopRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a hop, replacing any previous entry with the same number
    pub fn insert(&self, hop: HopState) -> SharedHop {
        let number = hop.hop_number;
        let shared = Arc::new(Mutex::new(hop));
        self.hops
            .lock()
            .expect("mutex poisoned")
            .insert(number, Arc::clone(&shared));
        shared
    }

    /// Get a hop by number
    pub fn get(&self, hop_number: u8) -> Option<SharedHop> {
        self.hops
            .lock()
            .expect("mutex poisoned")
            .get(&hop_number)
            .cloned()
    }

    /// Handles to every hop, ordered by hop number
    pub fn hops(&self) -> Vec<SharedHop> {
        self.hops
            .lock()
            .expect("mutex poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Consistent copy of every hop, ordered by hop number
    ///
    /// Each hop is locked only long enough to clone it, and never while the
    /// registry lock is held.
    pub fn snapshot(&self) -> Vec<HopState> {
        self.hops()
            .iter()
            .map(|hop| hop.lock().expect("mutex poisoned").clone())
            .collect()
    }

    /// Remove every hop
    pub fn clear(&self) {
        self.hops.lock().expect("mutex poisoned").clear();
    }

    /// Number of hops
    pub fn len(&self) -> usize {
        self.hops.lock().expect("mutex poisoned").len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-flight markers carried by a hop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    /// `is_resolving_hostname`
    Hostname,
    /// `is_fetching_geo_info`
    GeoInfo,
}

impl PendingKind {
    fn flag(self, hop: &mut HopState) -> &mut bool {
        match self {
            PendingKind::Hostname => &mut hop.is_resolving_hostname,
            PendingKind::GeoInfo => &mut hop.is_fetching_geo_info,
        }
    }
}

/// Holds an in-flight marker on a hop and clears it when dropped
///
/// Lookups hold one for their whole duration so the marker is reset on
/// every exit path, including cancellation.
pub struct PendingFlag {
    hop: SharedHop,
    kind: PendingKind,
}

impl PendingFlag {
    /// Set the marker unless it is already set
    ///
    /// Returns `None` when another lookup of the same kind is in flight.
    pub fn try_raise(hop: &SharedHop, kind: PendingKind) -> Option<Self> {
        let mut state = hop.lock().expect("mutex poisoned");
        let flag = kind.flag(&mut state);
        if *flag {
            return None;
        }
        *flag = true;
        Some(Self {
            hop: Arc::clone(hop),
            kind,
        })
    }
}

impl Drop for PendingFlag {
    fn drop(&mut self) {
        if let Ok(mut state) = self.hop.lock() {
            *self.kind.flag(&mut state) = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icmp::ProbeResult;

    #[test]
    fn test_snapshot_is_ordered() {
        let registry = HopRegistry::new();
        registry.insert(HopState::new(3, "10.0.0.3".parse().unwrap()));
        registry.insert(HopState::new(1, "10.0.0.1".parse().unwrap()));
        registry.insert(HopState::no_response(2));

        let numbers: Vec<u8> = registry.snapshot().iter().map(|h| h.hop_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let registry = HopRegistry::new();
        let shared = registry.insert(HopState::new(1, "10.0.0.1".parse().unwrap()));
        let before = registry.snapshot();

        for _ in 0..20 {
            shared
                .lock()
                .unwrap()
                .record_probe(ProbeResult::success(4));
        }

        assert_eq!(before[0].warmup_probes_sent, 0);
        assert_eq!(registry.snapshot()[0].warmup_probes_sent, 20);
    }

    #[test]
    fn test_clear() {
        let registry = HopRegistry::new();
        registry.insert(HopState::new(1, "10.0.0.1".parse().unwrap()));
        assert!(!registry.is_empty());
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.get(1).is_none());
    }

    #[test]
    fn test_pending_flag_clears_on_drop() {
        let registry = HopRegistry::new();
        let hop = registry.insert(HopState::new(1, "10.0.0.1".parse().unwrap()));
        {
            let _guard = PendingFlag::try_raise(&hop, PendingKind::GeoInfo).unwrap();
            assert!(hop.lock().unwrap().is_fetching_geo_info);
            assert!(PendingFlag::try_raise(&hop, PendingKind::GeoInfo).is_none());
            assert!(PendingFlag::try_raise(&hop, PendingKind::Hostname).is_some());
        }
        assert!(!hop.lock().unwrap().is_fetching_geo_info);
        assert!(!hop.lock().unwrap().is_resolving_hostname);
    }

    #[test]
    fn test_concurrent_writers() {
        let registry = HopRegistry::new();
        for n in 1..=4 {
            registry.insert(HopState::new(n, "10.0.0.1".parse().unwrap()));
        }

        let handles: Vec<_> = registry
            .hops()
            .into_iter()
            .map(|hop| {
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        hop.lock().unwrap().record_probe(ProbeResult::success(1));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for hop in registry.snapshot() {
            assert_eq!(hop.warmup_probes_sent, 100);
            assert_eq!(hop.total_probes_sent, 90);
        }
    }
}
