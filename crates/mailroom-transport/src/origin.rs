//! In-process origin: shared storage and broadcast channels for its tabs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};

use crate::{
    DurableStorage, StorageEventChannel, SyncChannel, TabId, TransportError,
};

/// Counter for generating unique tab IDs.
static NEXT_TAB_ID: AtomicU64 = AtomicU64::new(1);

/// Buffered messages per channel before slow tabs start lagging.
const CHANNEL_CAPACITY: usize = 64;

/// Locks a std mutex, recovering the data if a holder panicked.
///
/// Every critical section here is a plain map operation, so the data is
/// never left half-written.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Origin
// ---------------------------------------------------------------------------

/// Capabilities of an origin.
#[derive(Debug, Clone)]
pub struct OriginConfig {
    /// The origin's name, e.g. `https://mail.example.com`. Only used for
    /// logging.
    pub name: String,

    /// Whether tabs get a broadcast primitive. When `false`, cross-tab
    /// traffic has to go through storage events.
    pub broadcast_supported: bool,

    /// Byte budget for durable storage (keys + values). `None` means
    /// unlimited.
    pub storage_quota_bytes: Option<usize>,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            name: "http://localhost".to_string(),
            broadcast_supported: true,
            storage_quota_bytes: None,
        }
    }
}

struct OriginInner {
    config: OriginConfig,
    channels: Mutex<HashMap<String, broadcast::Sender<Frame>>>,
    storage: Mutex<HashMap<String, String>>,
    storage_events: broadcast::Sender<StorageEvent>,
}

/// One origin: the set of tabs that share durable storage and broadcast
/// channels.
///
/// Cheap to clone; every clone refers to the same origin.
#[derive(Clone)]
pub struct Origin {
    inner: Arc<OriginInner>,
}

impl Origin {
    /// Creates an origin with broadcast support and unlimited storage.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(OriginConfig {
            name: name.into(),
            ..OriginConfig::default()
        })
    }

    /// Creates an origin whose tabs have no broadcast primitive.
    pub fn without_broadcast(name: impl Into<String>) -> Self {
        Self::with_config(OriginConfig {
            name: name.into(),
            broadcast_supported: false,
            ..OriginConfig::default()
        })
    }

    /// Creates an origin from an explicit config.
    pub fn with_config(config: OriginConfig) -> Self {
        let (storage_events, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(OriginInner {
                config,
                channels: Mutex::new(HashMap::new()),
                storage: Mutex::new(HashMap::new()),
                storage_events,
            }),
        }
    }

    /// The origin's name.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Whether tabs of this origin can open broadcast channels.
    pub fn supports_broadcast(&self) -> bool {
        self.inner.config.broadcast_supported
    }

    /// Opens a new tab.
    pub fn open_tab(&self) -> Tab {
        let id = TabId::new(NEXT_TAB_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(tab = %id, origin = self.name(), "tab opened");
        Tab {
            id,
            origin: self.clone(),
        }
    }

    fn channel_sender(&self, name: &str) -> broadcast::Sender<Frame> {
        lock(&self.inner.channels)
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

// ---------------------------------------------------------------------------
// Tab
// ---------------------------------------------------------------------------

/// One client instance inside an origin.
#[derive(Clone)]
pub struct Tab {
    id: TabId,
    origin: Origin,
}

impl Tab {
    /// This tab's identity.
    pub fn id(&self) -> TabId {
        self.id
    }

    /// The origin this tab belongs to.
    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// This tab's view of the origin's durable storage.
    pub fn local_storage(&self) -> LocalStorage {
        LocalStorage {
            tab: self.id,
            origin: Arc::clone(&self.origin.inner),
        }
    }

    /// Opens the named broadcast channel.
    ///
    /// # Errors
    /// [`TransportError::Unsupported`] when the origin has no broadcast
    /// primitive.
    pub fn broadcast_channel(
        &self,
        name: &str,
    ) -> Result<BroadcastPort, TransportError> {
        if !self.origin.supports_broadcast() {
            return Err(TransportError::Unsupported("broadcast channel"));
        }
        let sender = self.origin.channel_sender(name);
        let receiver = sender.subscribe();
        let (closed, _) = watch::channel(false);
        Ok(BroadcastPort {
            tab: self.id,
            name: name.to_string(),
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            closed,
        })
    }

    /// Opens a cross-tab channel, preferring the broadcast primitive and
    /// falling back to storage events on `fallback_key`.
    pub fn sync_channel(&self, name: &str, fallback_key: &str) -> OriginChannel {
        match self.broadcast_channel(name) {
            Ok(port) => OriginChannel::Broadcast(port),
            Err(e) => {
                tracing::debug!(
                    tab = %self.id,
                    error = %e,
                    key = fallback_key,
                    "falling back to storage events for cross-tab sync"
                );
                OriginChannel::StorageEvents(StorageEventChannel::new(
                    self.local_storage(),
                    fallback_key,
                ))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// BroadcastPort
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Frame {
    from: TabId,
    data: Arc<[u8]>,
}

/// A tab's end of a named broadcast channel.
pub struct BroadcastPort {
    tab: TabId,
    name: String,
    sender: broadcast::Sender<Frame>,
    receiver: tokio::sync::Mutex<broadcast::Receiver<Frame>>,
    closed: watch::Sender<bool>,
}

impl BroadcastPort {
    /// The channel name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl SyncChannel for BroadcastPort {
    type Error = TransportError;

    fn post(&self, data: &[u8]) -> Result<(), Self::Error> {
        if *self.closed.borrow() {
            return Err(TransportError::ChannelClosed(self.name.clone()));
        }
        // `send` only fails when nobody is subscribed, and our own
        // receiver is always subscribed while the port is alive.
        let _ = self.sender.send(Frame {
            from: self.tab,
            data: Arc::from(data),
        });
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Ok(None);
        }
        let mut receiver = self.receiver.lock().await;
        loop {
            tokio::select! {
                // `closed` only ever flips false → true.
                _ = closed.changed() => return Ok(None),
                frame = receiver.recv() => match frame {
                    Ok(frame) if frame.from == self.tab => continue,
                    Ok(frame) => return Ok(Some(frame.data.to_vec())),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            tab = %self.tab,
                            channel = %self.name,
                            skipped,
                            "broadcast receiver lagged, messages dropped"
                        );
                    }
                    Err(RecvError::Closed) => return Ok(None),
                },
            }
        }
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }

    fn tab(&self) -> TabId {
        self.tab
    }
}

// ---------------------------------------------------------------------------
// LocalStorage
// ---------------------------------------------------------------------------

/// A change to durable storage, as observed by the *other* tabs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    /// The tab that made the change.
    pub source: TabId,
    pub key: String,
    pub old_value: Option<String>,
    /// `None` when the key was removed.
    pub new_value: Option<String>,
}

/// A tab's handle on the origin's durable storage.
#[derive(Clone)]
pub struct LocalStorage {
    tab: TabId,
    origin: Arc<OriginInner>,
}

impl LocalStorage {
    /// The tab this handle writes as.
    pub fn tab(&self) -> TabId {
        self.tab
    }

    /// Subscribes to storage changes made by other tabs.
    pub fn events(&self) -> StorageEvents {
        StorageEvents {
            tab: self.tab,
            receiver: self.origin.storage_events.subscribe(),
        }
    }

    fn emit(&self, key: &str, old_value: Option<String>, new_value: Option<String>) {
        // No subscribers is fine: nobody is listening yet.
        let _ = self.origin.storage_events.send(StorageEvent {
            source: self.tab,
            key: key.to_string(),
            old_value,
            new_value,
        });
    }
}

impl DurableStorage for LocalStorage {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.origin.storage).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), TransportError> {
        let old_value = {
            let mut storage = lock(&self.origin.storage);
            if let Some(quota) = self.origin.config.storage_quota_bytes {
                let used: usize = storage
                    .iter()
                    .filter(|(k, _)| k.as_str() != key)
                    .map(|(k, v)| k.len() + v.len())
                    .sum();
                if used + key.len() + value.len() > quota {
                    return Err(TransportError::QuotaExceeded {
                        key: key.to_string(),
                    });
                }
            }
            let old = storage.insert(key.to_string(), value.to_string());
            // Browsers only fire `storage` when the value actually changed.
            if old.as_deref() == Some(value) {
                return Ok(());
            }
            old
        };
        self.emit(key, old_value, Some(value.to_string()));
        Ok(())
    }

    fn remove(&self, key: &str) {
        let old_value = lock(&self.origin.storage).remove(key);
        if old_value.is_some() {
            self.emit(key, old_value, None);
        }
    }
}

/// Storage changes made by other tabs, in the order the origin saw them.
pub struct StorageEvents {
    tab: TabId,
    receiver: broadcast::Receiver<StorageEvent>,
}

impl StorageEvents {
    /// Waits for the next change made by another tab.
    ///
    /// Returns `None` once the origin is gone.
    pub async fn next(&mut self) -> Option<StorageEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.source == self.tab => continue,
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        tab = %self.tab,
                        skipped,
                        "storage event receiver lagged, events dropped"
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// OriginChannel
// ---------------------------------------------------------------------------

/// Whichever cross-tab channel the origin could provide.
pub enum OriginChannel {
    Broadcast(BroadcastPort),
    StorageEvents(StorageEventChannel),
}

impl OriginChannel {
    /// Short name of the mechanism in use, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Broadcast(_) => "broadcast",
            Self::StorageEvents(_) => "storage-events",
        }
    }
}

impl SyncChannel for OriginChannel {
    type Error = TransportError;

    fn post(&self, data: &[u8]) -> Result<(), Self::Error> {
        match self {
            Self::Broadcast(port) => port.post(data),
            Self::StorageEvents(channel) => channel.post(data),
        }
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        match self {
            Self::Broadcast(port) => port.recv().await,
            Self::StorageEvents(channel) => channel.recv().await,
        }
    }

    fn close(&self) {
        match self {
            Self::Broadcast(port) => port.close(),
            Self::StorageEvents(channel) => channel.close(),
        }
    }

    fn tab(&self) -> TabId {
        match self {
            Self::Broadcast(port) => port.tab(),
            Self::StorageEvents(channel) => channel.tab(),
        }
    }
}
