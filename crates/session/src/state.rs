//! Session state: one writer, many readers.
//!
//! [`SessionStore`] is owned by the session controller and is the only place
//! that mutates the snapshot. Everyone else holds a [`SessionReader`].
//!
//! Every publish replaces the whole snapshot under the channel lock, and the
//! attempt counter is bumped and checked under that same lock. A reader can
//! therefore never see `ready = true` next to fields from an attempt that is
//! still in flight, and a superseded attempt can never publish.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

use concierge_auth::{permissions, Permission, Principal, Role};
use concierge_core::TenantId;

/// Where the session is in its resolution lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No principal.
    #[default]
    Idle,
    /// Principal present, resolution in flight (or its directory read failed).
    Resolving,
    /// Resolved and not on the allowlist.
    Denied,
    /// Authorized, but no tenant id could be resolved.
    AuthorizedNoTenant,
    /// Authorized with a tenant id.
    AuthorizedWithTenant,
}

/// Read projection of the session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SessionSnapshot {
    pub principal: Option<Principal>,
    pub tenant_id: Option<TenantId>,
    pub tenant_name: Option<String>,
    pub role: Option<Role>,
    pub permissions: Vec<Permission>,
    pub ready: bool,
    pub error: Option<String>,
    pub phase: SessionPhase,
}

impl SessionSnapshot {
    pub fn is_signed_in(&self) -> bool {
        self.principal.is_some()
    }

    pub fn is_admin(&self) -> bool {
        self.role.as_ref().is_some_and(Role::is_admin)
    }

    pub fn has_permission(&self, required: &str) -> bool {
        permissions::grants(self.role.as_ref(), &self.permissions, required)
    }

    /// Wipe identity-bound fields. The last error is kept so a denial
    /// message outlives the forced sign-out that follows it.
    pub(crate) fn clear_identity(&mut self) {
        self.principal = None;
        self.tenant_id = None;
        self.tenant_name = None;
        self.role = None;
        self.permissions.clear();
    }
}

/// Returned once the store has been torn down.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("session store closed")]
pub struct SessionClosed;

/// Token identifying one resolution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt(u64);

impl Attempt {
    pub fn number(&self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for Attempt {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Owner of the session snapshot.
#[derive(Debug)]
pub struct SessionStore {
    tx: watch::Sender<SessionSnapshot>,
    generation: AtomicU64,
    live: AtomicBool,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionSnapshot::default());
        Self {
            tx,
            generation: AtomicU64::new(0),
            live: AtomicBool::new(false),
        }
    }

    /// Start accepting publishes.
    pub fn init(&self) {
        self.live.store(true, Ordering::SeqCst);
    }

    /// Stop accepting publishes; attempts in flight are discarded.
    pub fn teardown(&self) {
        self.tx.send_if_modified(|_| {
            self.live.store(false, Ordering::SeqCst);
            self.generation.fetch_add(1, Ordering::SeqCst);
            false
        });
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn reader(&self) -> SessionReader {
        SessionReader {
            rx: self.tx.subscribe(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.tx.borrow().clone()
    }

    /// Supersede every earlier attempt and apply `start` as the new attempt's
    /// first state. Returns `None` when the store is not live.
    pub(crate) fn begin(&self, start: impl FnOnce(&mut SessionSnapshot)) -> Option<Attempt> {
        let mut attempt = None;
        self.tx.send_if_modified(|snapshot| {
            if !self.is_live() {
                return false;
            }
            let number = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            attempt = Some(Attempt(number));
            start(snapshot);
            true
        });
        attempt
    }

    pub(crate) fn is_current(&self, attempt: Attempt) -> bool {
        self.is_live() && self.generation.load(Ordering::SeqCst) == attempt.0
    }

    /// Apply `settle` only if `attempt` is still the latest one.
    pub(crate) fn publish(
        &self,
        attempt: Attempt,
        settle: impl FnOnce(&mut SessionSnapshot),
    ) -> bool {
        self.tx.send_if_modified(|snapshot| {
            if !self.is_current(attempt) {
                return false;
            }
            settle(snapshot);
            true
        })
    }

    /// Conditional update outside the attempt protocol (manual actions).
    pub(crate) fn update(&self, apply: impl FnOnce(&mut SessionSnapshot) -> bool) -> bool {
        self.tx.send_if_modified(|snapshot| self.is_live() && apply(snapshot))
    }
}

/// Read-only handle on the session.
#[derive(Debug, Clone)]
pub struct SessionReader {
    rx: watch::Receiver<SessionSnapshot>,
}

impl SessionReader {
    pub fn current(&self) -> SessionSnapshot {
        self.rx.borrow().clone()
    }

    /// Wait for the next published snapshot.
    pub async fn changed(&mut self) -> Result<SessionSnapshot, SessionClosed> {
        self.rx.changed().await.map_err(|_| SessionClosed)?;
        Ok(self.rx.borrow_and_update().clone())
    }

    /// Wait until the session reports ready.
    pub async fn wait_ready(&mut self) -> Result<SessionSnapshot, SessionClosed> {
        self.wait_until(|s| s.ready).await
    }

    /// Wait until a published snapshot satisfies `condition`.
    pub async fn wait_until(
        &mut self,
        condition: impl FnMut(&SessionSnapshot) -> bool,
    ) -> Result<SessionSnapshot, SessionClosed> {
        let snapshot = self
            .rx
            .wait_for(condition)
            .await
            .map_err(|_| SessionClosed)?;
        Ok(snapshot.clone())
    }
}
