//! Peer Registry
//!
//! The authoritative local view: peer address -> membership state. Dead peers
//! are evicted rather than tombstoned, and the local node is never a member of
//! its own registry. Every mutator reports whether a transition happened so
//! callers can disseminate exactly once per change.

use super::types::{MemberView, PeerAddress, PeerEntry, PeerState};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::seq::IteratorRandom;
use std::time::SystemTime;

pub struct PeerRegistry {
    local: PeerAddress,
    peers: DashMap<PeerAddress, PeerEntry>,
}

impl PeerRegistry {
    pub fn new(local: PeerAddress) -> Self {
        Self {
            local,
            peers: DashMap::new(),
        }
    }

    pub fn local(&self) -> &PeerAddress {
        &self.local
    }

    /// Inserts as `Alive` if absent.
    pub fn add(&self, address: &PeerAddress) -> bool {
        if *address == self.local {
            return false;
        }

        match self.peers.entry(*address) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(PeerEntry::alive());
                true
            }
        }
    }

    pub fn remove(&self, address: &PeerAddress) -> bool {
        self.peers.remove(address).is_some()
    }

    /// Evicts the peer only if it is still `Suspect`.
    pub fn evict_if_suspect(&self, address: &PeerAddress) -> bool {
        self.peers
            .remove_if(address, |_, entry| entry.state == PeerState::Suspect)
            .is_some()
    }

    /// `Alive -> Suspect`. Absent or already-suspect peers are left untouched.
    pub fn mark_suspect(&self, address: &PeerAddress, since: SystemTime) -> bool {
        match self.peers.get_mut(address) {
            Some(mut entry) if entry.state == PeerState::Alive => {
                entry.state = PeerState::Suspect;
                entry.suspected_since = Some(since);
                true
            }
            _ => false,
        }
    }

    /// `Suspect -> Alive`, or first contact.
    pub fn mark_alive(&self, address: &PeerAddress) -> bool {
        if *address == self.local {
            return false;
        }

        match self.peers.entry(*address) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.state == PeerState::Alive {
                    return false;
                }
                *entry = PeerEntry::alive();
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PeerEntry::alive());
                true
            }
        }
    }

    /// `Suspect -> Alive` for a peer that is still tracked. Never inserts, so an
    /// evicted peer only returns through [`mark_alive`](Self::mark_alive).
    pub fn clear_suspicion(&self, address: &PeerAddress) -> bool {
        match self.peers.get_mut(address) {
            Some(mut entry) if entry.state == PeerState::Suspect => {
                *entry = PeerEntry::alive();
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, address: &PeerAddress) -> bool {
        self.peers.contains_key(address)
    }

    pub fn state(&self, address: &PeerAddress) -> Option<PeerState> {
        self.peers.get(address).map(|entry| entry.state)
    }

    pub fn suspected_since(&self, address: &PeerAddress) -> Option<SystemTime> {
        self.peers
            .get(address)
            .and_then(|entry| entry.suspected_since)
    }

    pub fn size(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Picks one peer at random that is not in `excluding`.
    pub fn sample(&self, excluding: &[&PeerAddress]) -> Option<PeerAddress> {
        self.peers
            .iter()
            .map(|entry| *entry.key())
            .filter(|address| !excluding.contains(&address))
            .choose(&mut rand::thread_rng())
    }

    pub fn peers(&self) -> Vec<PeerAddress> {
        self.peers.iter().map(|entry| *entry.key()).collect()
    }

    /// Sorted snapshot of the local view.
    pub fn view(&self) -> Vec<MemberView> {
        let now = SystemTime::now();
        let mut view: Vec<MemberView> = self
            .peers
            .iter()
            .map(|entry| MemberView {
                address: *entry.key(),
                state: entry.value().state,
                suspected_for_ms: entry.value().suspected_since.map(|since| {
                    now.duration_since(since).unwrap_or_default().as_millis() as u64
                }),
            })
            .collect();

        view.sort_by_key(|member| member.address);
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use std::time::Duration;

    fn addr(port: u16) -> PeerAddress {
        PeerAddress::new(Ipv4Addr::LOCALHOST, port)
    }

    #[test]
    fn test_add_is_idempotent() {
        let registry = PeerRegistry::new(addr(3000));

        assert!(registry.add(&addr(3001)));
        assert!(!registry.add(&addr(3001)));
        assert_eq!(registry.size(), 1);
        assert_eq!(registry.state(&addr(3001)), Some(PeerState::Alive));
    }

    #[test]
    fn test_local_address_is_never_a_member() {
        let registry = PeerRegistry::new(addr(3000));

        assert!(!registry.add(&addr(3000)));
        assert!(!registry.mark_alive(&addr(3000)));
        assert!(!registry.contains(&addr(3000)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_suspect_only_from_alive() {
        let registry = PeerRegistry::new(addr(3000));
        let first = SystemTime::now();

        assert!(!registry.mark_suspect(&addr(3001), first), "absent peer");

        registry.add(&addr(3001));
        assert!(registry.mark_suspect(&addr(3001), first));
        assert!(!registry.mark_suspect(&addr(3001), first + Duration::from_secs(9)));

        assert_eq!(registry.state(&addr(3001)), Some(PeerState::Suspect));
        assert_eq!(registry.suspected_since(&addr(3001)), Some(first));
    }

    #[test]
    fn test_mark_alive_refutes_and_inserts() {
        let registry = PeerRegistry::new(addr(3000));
        registry.add(&addr(3001));
        registry.mark_suspect(&addr(3001), SystemTime::now());

        assert!(registry.mark_alive(&addr(3001)));
        assert_eq!(registry.state(&addr(3001)), Some(PeerState::Alive));
        assert_eq!(registry.suspected_since(&addr(3001)), None);
        assert!(!registry.mark_alive(&addr(3001)), "already alive");

        assert!(registry.mark_alive(&addr(3002)), "first contact");
        assert_eq!(registry.size(), 2);
    }

    #[test]
    fn test_evict_if_suspect_leaves_alive_peers() {
        let registry = PeerRegistry::new(addr(3000));
        registry.add(&addr(3001));

        assert!(!registry.evict_if_suspect(&addr(3001)));
        registry.mark_suspect(&addr(3001), SystemTime::now());
        assert!(registry.evict_if_suspect(&addr(3001)));
        assert!(!registry.contains(&addr(3001)));
        assert!(!registry.remove(&addr(3001)));
    }

    #[test]
    fn test_sample_respects_exclusion() {
        let registry = PeerRegistry::new(addr(3000));
        assert_eq!(registry.sample(&[]), None);

        registry.add(&addr(3001));
        assert_eq!(registry.sample(&[&addr(3001)]), None);

        registry.add(&addr(3002));
        for _ in 0..32 {
            assert_eq!(registry.sample(&[&addr(3001)]), Some(addr(3002)));
        }
    }

    #[test]
    fn test_clear_suspicion_never_inserts() {
        let registry = PeerRegistry::new(addr(3000));
        registry.add(&addr(3001));
        registry.add(&addr(3002));
        registry.mark_suspect(&addr(3001), SystemTime::now());

        assert!(registry.clear_suspicion(&addr(3001)));
        assert_eq!(registry.state(&addr(3001)), Some(PeerState::Alive));
        assert_eq!(registry.suspected_since(&addr(3001)), None);
        assert!(!registry.clear_suspicion(&addr(3002)), "alive, not suspect");

        registry.remove(&addr(3001));
        assert!(!registry.clear_suspicion(&addr(3001)));
        assert!(!registry.contains(&addr(3001)));
    }

    #[test]
    fn test_view_is_sorted_and_reports_suspicion() {
        let registry = PeerRegistry::new(addr(3000));
        registry.add(&addr(3003));
        registry.add(&addr(3001));
        registry.mark_suspect(&addr(3003), SystemTime::now() - Duration::from_secs(2));

        let view = registry.view();
        assert_eq!(view.len(), 2);
        assert_eq!(view[0].address, addr(3001));
        assert_eq!(view[0].suspected_for_ms, None);
        assert_eq!(view[1].state, PeerState::Suspect);
        assert!(view[1].suspected_for_ms.unwrap() >= 2000);
    }

    #[test]
    fn test_concurrent_mutation_keeps_entries_unique() {
        let registry = Arc::new(PeerRegistry::new(addr(3000)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for port in 3001..3101 {
                        registry.add(&addr(port));
                        registry.mark_suspect(&addr(port), SystemTime::now());
                        registry.mark_alive(&addr(port));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let unique: HashSet<_> = registry.peers().into_iter().collect();
        assert_eq!(unique.len(), 100);
        assert_eq!(registry.size(), 100);
    }
}
