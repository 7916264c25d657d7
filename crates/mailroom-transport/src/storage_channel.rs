//! Cross-tab channel built on storage events.
//!
//! Origins without a broadcast primitive can still reach their sibling
//! tabs: writing a key fires a `storage` event in every *other* tab. The
//! sender writes the serialized message under a well-known key and removes
//! it straight away, so the key never lingers and the next message always
//! registers as a change.

use tokio::sync::watch;

use crate::{
    DurableStorage, LocalStorage, StorageEvents, SyncChannel, TabId,
    TransportError,
};

/// A [`SyncChannel`] over write-then-remove storage events.
pub struct StorageEventChannel {
    key: String,
    storage: LocalStorage,
    events: tokio::sync::Mutex<StorageEvents>,
    closed: watch::Sender<bool>,
    tab: TabId,
}

impl StorageEventChannel {
    /// Creates a channel carried on `key` of the given storage.
    pub fn new(storage: LocalStorage, key: &str) -> Self {
        let events = storage.events();
        let (closed, _) = watch::channel(false);
        Self {
            key: key.to_string(),
            tab: storage.tab(),
            events: tokio::sync::Mutex::new(events),
            storage,
            closed,
        }
    }

    /// The storage key messages travel on.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl SyncChannel for StorageEventChannel {
    type Error = TransportError;

    fn post(&self, data: &[u8]) -> Result<(), Self::Error> {
        if *self.closed.borrow() {
            return Err(TransportError::ChannelClosed(self.key.clone()));
        }
        let text = std::str::from_utf8(data).map_err(|_| {
            TransportError::InvalidPayload(
                "storage events only carry UTF-8 text".into(),
            )
        })?;
        self.storage.set(&self.key, text)?;
        self.storage.remove(&self.key);
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Ok(None);
        }
        let mut events = self.events.lock().await;
        loop {
            tokio::select! {
                _ = closed.changed() => return Ok(None),
                event = events.next() => match event {
                    // The removal half of write-then-remove has no value.
                    Some(event) if event.key == self.key => {
                        if let Some(value) = event.new_value {
                            return Ok(Some(value.into_bytes()));
                        }
                    }
                    Some(_) => continue,
                    None => return Ok(None),
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
