use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use concierge_auth::Principal;
use concierge_session::{IdentityEvent, IdentityProvider, IdentityStream, ProviderError};

/// In-memory identity provider for tests/dev.
///
/// - Broadcasts every change to all live subscribers
/// - A new subscriber gets the current identity first, then every later change
/// - Counts `sign_out` calls
#[derive(Debug, Default)]
pub struct InMemoryIdentityProvider {
    state: Mutex<State>,
    sign_outs: AtomicUsize,
}

#[derive(Debug, Default)]
struct State {
    current: IdentityEvent,
    subscribers: Vec<mpsc::UnboundedSender<IdentityEvent>>,
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, principal: Principal) {
        self.set(Some(principal));
    }

    /// Session ended on the provider side (expiry, other tab).
    pub fn expire(&self) {
        self.set(None);
    }

    pub fn current(&self) -> IdentityEvent {
        self.state.lock().ok().and_then(|s| s.current.clone())
    }

    pub fn sign_out_count(&self) -> usize {
        self.sign_outs.load(Ordering::SeqCst)
    }

    fn set(&self, event: IdentityEvent) {
        if let Ok(mut state) = self.state.lock() {
            state.current.clone_from(&event);
            // Drop any dead subscribers while publishing.
            state.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    fn subscribe(&self) -> IdentityStream {
        let (tx, rx) = mpsc::unbounded_channel();
        // Snapshot and registration under one lock, so no change slips between.
        if let Ok(mut state) = self.state.lock() {
            let _ = tx.send(state.current.clone());
            state.subscribers.push(tx);
        }
        IdentityStream::new(rx)
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        self.set(None);
        Ok(())
    }
}
