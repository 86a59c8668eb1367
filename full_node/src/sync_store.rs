use dg_node_core::blockchain::sized_bytes::Bytes32;
use log::debug;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Number of peak hashes whose peers are remembered.
pub const MAX_PEAKS_TRACKED: usize = 256;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PeerPeak {
    pub header_hash: Bytes32,
    pub height: u32,
    pub weight: u128,
}

#[derive(Default)]
struct PeerState {
    peak_to_peer: HashMap<Bytes32, HashSet<Bytes32>>,
    peak_order: VecDeque<Bytes32>,
    peer_to_peak: HashMap<Bytes32, PeerPeak>,
    batch_syncing: HashSet<Bytes32>,
    backtrack_syncing: HashMap<Bytes32, u32>,
}

/// What the node knows about its peers' peaks while deciding whether and from whom to sync.
#[derive(Default)]
pub struct SyncStore {
    sync_mode: AtomicBool,
    long_sync: AtomicBool,
    state: Mutex<PeerState>,
    peers_changed: Notify,
}
impl SyncStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sync_mode(&self, sync_mode: bool) {
        self.sync_mode.store(sync_mode, Ordering::SeqCst);
    }
    pub fn get_sync_mode(&self) -> bool {
        self.sync_mode.load(Ordering::SeqCst)
    }
    pub fn set_long_sync(&self, long_sync: bool) {
        self.long_sync.store(long_sync, Ordering::SeqCst);
    }
    pub fn get_long_sync(&self) -> bool {
        self.long_sync.load(Ordering::SeqCst)
    }

    pub fn seen_header_hash(&self, header_hash: &Bytes32) -> bool {
        self.state.lock().peak_to_peer.contains_key(header_hash)
    }

    /// Records that `peer_id` has `header_hash`. `new_peak` marks it as the peer's own peak.
    pub fn peer_has_block(
        &self,
        header_hash: Bytes32,
        peer_id: Bytes32,
        weight: u128,
        height: u32,
        new_peak: bool,
    ) {
        let mut state = self.state.lock();
        if let Some(peers) = state.peak_to_peer.get_mut(&header_hash) {
            peers.insert(peer_id);
        } else {
            state.peak_to_peer.insert(header_hash, HashSet::from([peer_id]));
            state.peak_order.push_back(header_hash);
            while state.peak_order.len() > MAX_PEAKS_TRACKED {
                if let Some(oldest) = state.peak_order.pop_front() {
                    state.peak_to_peer.remove(&oldest);
                }
            }
        }
        if new_peak {
            state.peer_to_peak.insert(
                peer_id,
                PeerPeak {
                    header_hash,
                    height,
                    weight,
                },
            );
        }
        drop(state);
        self.peers_changed.notify_waiters();
    }

    /// Peers known to have each of `header_hashes`.
    pub fn get_peers_that_have_peak(&self, header_hashes: &[Bytes32]) -> HashSet<Bytes32> {
        let state = self.state.lock();
        header_hashes
            .iter()
            .filter_map(|hash| state.peak_to_peer.get(hash))
            .flatten()
            .copied()
            .collect()
    }

    pub fn get_peak_of_each_peer(&self) -> HashMap<Bytes32, PeerPeak> {
        self.state.lock().peer_to_peak.clone()
    }

    /// Heaviest peak reported by any peer, ties go to the greater header hash.
    pub fn get_heaviest_peak(&self) -> Option<PeerPeak> {
        self.state
            .lock()
            .peer_to_peak
            .values()
            .max_by(|a, b| {
                a.weight
                    .cmp(&b.weight)
                    .then_with(|| a.header_hash.cmp(&b.header_hash))
            })
            .copied()
    }

    pub fn peer_disconnected(&self, peer_id: &Bytes32) {
        let mut state = self.state.lock();
        state.peer_to_peak.remove(peer_id);
        for peers in state.peak_to_peer.values_mut() {
            peers.remove(peer_id);
        }
        state.batch_syncing.remove(peer_id);
        state.backtrack_syncing.remove(peer_id);
        drop(state);
        debug!("Peer {peer_id} removed from sync store");
        self.peers_changed.notify_waiters();
    }

    pub fn clear_sync_info(&self) {
        let mut state = self.state.lock();
        state.peak_to_peer.clear();
        state.peak_order.clear();
    }

    /// Returns false when the peer is already batch syncing.
    pub fn start_batch_syncing(&self, peer_id: Bytes32) -> bool {
        self.state.lock().batch_syncing.insert(peer_id)
    }
    pub fn end_batch_syncing(&self, peer_id: &Bytes32) {
        self.state.lock().batch_syncing.remove(peer_id);
    }
    pub fn is_batch_syncing(&self, peer_id: &Bytes32) -> bool {
        self.state.lock().batch_syncing.contains(peer_id)
    }

    pub fn increment_backtrack_syncing(&self, peer_id: Bytes32) -> u32 {
        let mut state = self.state.lock();
        let count = state.backtrack_syncing.entry(peer_id).or_insert(0);
        *count += 1;
        *count
    }
    pub fn decrement_backtrack_syncing(&self, peer_id: &Bytes32) {
        let mut state = self.state.lock();
        if let Some(count) = state.backtrack_syncing.get_mut(peer_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.backtrack_syncing.remove(peer_id);
            }
        }
    }
    pub fn get_backtrack_syncing(&self, peer_id: &Bytes32) -> u32 {
        self.state
            .lock()
            .backtrack_syncing
            .get(peer_id)
            .copied()
            .unwrap_or_default()
    }

    /// Completes on the next peer peak report or disconnect.
    pub async fn peers_changed(&self) {
        self.peers_changed.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn hash(i: u32) -> Bytes32 {
        let mut bytes = [0u8; 32];
        bytes[..4].copy_from_slice(&i.to_be_bytes());
        Bytes32::new(bytes)
    }

    #[test]
    fn test_heaviest_peak_and_disconnect() {
        let store = SyncStore::new();
        assert!(store.get_heaviest_peak().is_none());
        store.peer_has_block(hash(1), hash(100), 10, 1, true);
        store.peer_has_block(hash(2), hash(101), 20, 2, true);
        store.peer_has_block(hash(2), hash(102), 20, 2, false);
        assert_eq!(store.get_heaviest_peak().unwrap().header_hash, hash(2));
        assert_eq!(store.get_peers_that_have_peak(&[hash(2)]).len(), 2);
        assert!(store.seen_header_hash(&hash(1)));
        store.peer_disconnected(&hash(101));
        assert_eq!(store.get_heaviest_peak().unwrap().header_hash, hash(1));
        assert_eq!(store.get_peers_that_have_peak(&[hash(2)]).len(), 1);
        store.clear_sync_info();
        assert!(!store.seen_header_hash(&hash(1)));
        assert_eq!(store.get_peak_of_each_peer().len(), 1);
    }

    #[test]
    fn test_peak_tracking_is_bounded() {
        let store = SyncStore::new();
        for i in 0..(MAX_PEAKS_TRACKED as u32 + 10) {
            store.peer_has_block(hash(i), hash(9999), u128::from(i), i, false);
        }
        assert!(!store.seen_header_hash(&hash(0)));
        assert!(store.seen_header_hash(&hash(MAX_PEAKS_TRACKED as u32 + 9)));
    }

    #[test]
    fn test_sync_counters() {
        let store = SyncStore::new();
        store.set_sync_mode(true);
        store.set_long_sync(true);
        assert!(store.get_sync_mode() && store.get_long_sync());
        assert!(store.start_batch_syncing(hash(1)));
        assert!(!store.start_batch_syncing(hash(1)));
        store.end_batch_syncing(&hash(1));
        assert!(!store.is_batch_syncing(&hash(1)));
        assert_eq!(store.increment_backtrack_syncing(hash(1)), 1);
        assert_eq!(store.increment_backtrack_syncing(hash(1)), 2);
        store.decrement_backtrack_syncing(&hash(1));
        store.decrement_backtrack_syncing(&hash(1));
        assert_eq!(store.get_backtrack_syncing(&hash(1)), 0);
    }

    #[tokio::test]
    async fn test_peers_changed_notifies() {
        let store = Arc::new(SyncStore::new());
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.peers_changed().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.peer_has_block(hash(1), hash(2), 1, 1, true);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
