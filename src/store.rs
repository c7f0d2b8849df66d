//! In-memory current-value stores for `ZoneState`/`ClientState`, keyed by
//! 1-based index (spec §4.6). `set` is an atomic replace: readers see
//! either the pre- or post-image, never a torn value.

use std::collections::HashMap;
use std::hash::Hash;
use tokio::sync::RwLock;

use crate::domain::{ClientIndex, ClientState, ZoneIndex, ZoneState};

pub struct StateStore<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K, V> StateStore<K, V>
where
    K: Eq + Hash + Copy,
    V: Clone,
{
    pub fn new() -> Self {
        StateStore {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: K) -> Option<V> {
        self.inner.read().await.get(&key).cloned()
    }

    /// Atomic replace. The pluggable-persistence Design Note (§4.6) treats
    /// this as the one write seam a durable implementation would hook.
    pub async fn set(&self, key: K, value: V) {
        self.inner.write().await.insert(key, value);
    }

    pub async fn get_all(&self) -> HashMap<K, V> {
        self.inner.read().await.clone()
    }

    /// Seeds an entry only if absent, used at startup hydration.
    pub async fn initialize(&self, key: K, value: V) {
        self.inner.write().await.entry(key).or_insert(value);
    }
}

impl<K, V> Default for StateStore<K, V>
where
    K: Eq + Hash + Copy,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

pub type ZoneStateStore = StateStore<ZoneIndex, ZoneState>;
pub type ClientStateStore = StateStore<ClientIndex, ClientState>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PlaybackState;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store: ZoneStateStore = StateStore::new();
        let zone = ZoneState::new(1, "Living Room".into(), "Zone1".into());
        store.set(1, zone.clone()).await;
        let fetched = store.get(1).await.unwrap();
        assert_eq!(fetched.zone_index, zone.zone_index);
        assert_eq!(fetched.playback_state, PlaybackState::Stopped);
    }

    #[tokio::test]
    async fn initialize_does_not_overwrite_existing() {
        let store: ZoneStateStore = StateStore::new();
        let mut zone = ZoneState::new(1, "Living Room".into(), "Zone1".into());
        zone.volume = 42;
        store.set(1, zone).await;
        let default_zone = ZoneState::new(1, "Living Room".into(), "Zone1".into());
        store.initialize(1, default_zone).await;
        assert_eq!(store.get(1).await.unwrap().volume, 42);
    }

    #[tokio::test]
    async fn get_all_reflects_every_key() {
        let store: ClientStateStore = StateStore::new();
        store
            .set(
                1,
                ClientState::from_config(1, "a".into(), "aa:bb:cc:dd:ee:01".into(), 1, None),
            )
            .await;
        store
            .set(
                2,
                ClientState::from_config(2, "b".into(), "aa:bb:cc:dd:ee:02".into(), 1, None),
            )
            .await;
        assert_eq!(store.get_all().await.len(), 2);
    }
}
