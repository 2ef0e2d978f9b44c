//! Per-request channel registries.
//!
//! Both services keep process-wide maps that connect long-lived requests to
//! work that completes elsewhere:
//!
//! - the resource service maps a resource id to the live-status channel of
//!   the SSE request that created it, so the indexation-completion consumer
//!   can push the terminal status onto the original HTTP response;
//! - the search service maps a process id to the cancellation handle of a
//!   running answer stream, so `DELETE /ask/stream/cancel/{id}` can stop it.
//!
//! Entries are inserted at request start and removed on every exit path;
//! sends are non-blocking with a drop branch so a slow client can never
//! stall a consumer.

use std::hash::Hash;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Registry of bounded per-request channels keyed by an aggregate id.
///
/// Each channel has capacity 1: the only message that matters is the terminal
/// status, and [`notify`](Self::notify) drops the update rather than blocking
/// when the receiver is slow. The durable state lives in the database; a lost
/// notification is recovered by polling.
pub struct ChannelRegistry<K, T> {
    channels: DashMap<K, mpsc::Sender<T>>,
}

impl<K, T> ChannelRegistry<K, T>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Register a channel under `key` and return its receiving half.
    ///
    /// A previous registration under the same key is replaced; its receiver
    /// observes a closed channel.
    pub fn register(&self, key: K) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(1);
        self.channels.insert(key, tx);
        rx
    }

    /// Non-blocking send to the channel registered under `key`.
    ///
    /// Returns `true` when the update was delivered. Returns `false` when no
    /// channel is registered (fast path / replay / client gone), when the
    /// channel is full, or when the receiver has been dropped.
    pub fn notify(&self, key: &K, update: T) -> bool {
        match self.channels.get(key) {
            Some(tx) => tx.try_send(update).is_ok(),
            None => false,
        }
    }

    /// Close and remove the channel registered under `key`.
    ///
    /// Dropping the sender ends the receiver's stream. Returns `true` when a
    /// channel was present.
    pub fn close(&self, key: &K) -> bool {
        self.channels.remove(key).is_some()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.channels.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl<K: Eq + Hash, T> Default for ChannelRegistry<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry of cancellation handles keyed by a process id.
pub struct CancelRegistry<K> {
    handles: DashMap<K, CancellationToken>,
}

impl<K> CancelRegistry<K>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
        }
    }

    /// Register a fresh cancellation token under `key` and return it.
    pub fn register(&self, key: K) -> CancellationToken {
        let token = CancellationToken::new();
        self.handles.insert(key, token.clone());
        token
    }

    /// Cancel the handle registered under `key`, leaving the entry in place.
    ///
    /// Eviction belongs to [`remove`](Self::remove), which the owning task
    /// calls when its stream exits. Cancel is therefore idempotent on a
    /// still-live process: repeat calls keep returning `true` until the
    /// stream has wound down; only unknown (or finished) keys return
    /// `false`.
    pub fn cancel(&self, key: &K) -> bool {
        match self.handles.get(key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the handle without cancelling, for the owning task's exit
    /// paths (normal completion and post-cancel teardown alike).
    pub fn remove(&self, key: &K) -> bool {
        self.handles.remove(key).is_some()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.handles.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl<K: Eq + Hash> Default for CancelRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn notify_delivers_to_registered_channel() {
        let registry: ChannelRegistry<Uuid, &'static str> = ChannelRegistry::new();
        let id = Uuid::new_v4();
        let mut rx = registry.register(id);

        assert!(registry.notify(&id, "done"));
        assert_eq!(rx.recv().await, Some("done"));
    }

    #[tokio::test]
    async fn notify_unknown_key_is_noop() {
        let registry: ChannelRegistry<Uuid, &'static str> = ChannelRegistry::new();
        assert!(!registry.notify(&Uuid::new_v4(), "done"));
    }

    #[tokio::test]
    async fn notify_drops_on_full_channel() {
        let registry: ChannelRegistry<Uuid, u32> = ChannelRegistry::new();
        let id = Uuid::new_v4();
        let mut rx = registry.register(id);

        assert!(registry.notify(&id, 1));
        // Capacity is 1 and nothing has been received yet.
        assert!(!registry.notify(&id, 2));
        assert_eq!(rx.recv().await, Some(1));
    }

    #[tokio::test]
    async fn close_ends_the_receiver_stream() {
        let registry: ChannelRegistry<Uuid, u32> = ChannelRegistry::new();
        let id = Uuid::new_v4();
        let mut rx = registry.register(id);

        assert!(registry.close(&id));
        assert!(!registry.contains(&id));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn notify_after_receiver_dropped_fails() {
        let registry: ChannelRegistry<Uuid, u32> = ChannelRegistry::new();
        let id = Uuid::new_v4();
        let rx = registry.register(id);
        drop(rx);

        assert!(!registry.notify(&id, 1));
    }

    #[tokio::test]
    async fn reregistering_replaces_previous_channel() {
        let registry: ChannelRegistry<Uuid, u32> = ChannelRegistry::new();
        let id = Uuid::new_v4();
        let mut first = registry.register(id);
        let mut second = registry.register(id);

        assert!(registry.notify(&id, 7));
        assert_eq!(first.recv().await, None);
        assert_eq!(second.recv().await, Some(7));
    }

    #[tokio::test]
    async fn cancel_triggers_registered_token() {
        let registry: CancelRegistry<Uuid> = CancelRegistry::new();
        let id = Uuid::new_v4();
        let token = registry.register(id);

        assert!(registry.cancel(&id));
        assert!(token.is_cancelled());
        // The entry survives until the owning task removes it, so repeat
        // cancels on a still-live process keep succeeding.
        assert!(registry.contains(&id));
        assert!(registry.cancel(&id));

        assert!(registry.remove(&id));
        assert!(!registry.contains(&id));
        assert!(!registry.cancel(&id));
    }

    #[test]
    fn cancel_unknown_key_returns_false() {
        let registry: CancelRegistry<Uuid> = CancelRegistry::new();
        assert!(!registry.cancel(&Uuid::new_v4()));
    }

    #[test]
    fn remove_does_not_cancel() {
        let registry: CancelRegistry<Uuid> = CancelRegistry::new();
        let id = Uuid::new_v4();
        let token = registry.register(id);

        assert!(registry.remove(&id));
        assert!(!token.is_cancelled());
        // Second removal is a no-op.
        assert!(!registry.remove(&id));
    }
}
