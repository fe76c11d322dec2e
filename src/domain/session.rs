//! Usage: In-memory session state layered over the durable token store.

use crate::domain::images::TokenPair;
use crate::infra::token_store::{TokenStore, KEY_ACCESS_TOKEN, KEY_CURRENT_USER, KEY_REFRESH_TOKEN};
use crate::shared::error::AppResult;
use crate::shared::mutex_ext::MutexExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Coarse auth status broadcast to embedders (drives e.g. a login redirect).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStatus {
    SignedIn { identity: String },
    SignedOut,
}

/// What the session currently knows about the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub identity: String,
}

/// Holds the live session and its activity flags. All credential mutations go
/// through here so that the store and the broadcast status never disagree for
/// longer than a single method call.
pub struct SessionState {
    store: Arc<dyn TokenStore>,
    session: Mutex<Option<SessionSnapshot>>,
    loading: AtomicUsize,
    refreshing: AtomicUsize,
    status_tx: watch::Sender<AuthStatus>,
}

impl SessionState {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        let (status_tx, _) = watch::channel(AuthStatus::SignedOut);
        Self {
            store,
            session: Mutex::new(None),
            loading: AtomicUsize::new(0),
            refreshing: AtomicUsize::new(0),
            status_tx,
        }
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Restore the session from durable storage. A partial credential set
    /// (some keys present, some missing) is treated as signed out and the
    /// leftovers are discarded.
    pub fn hydrate(&self) -> AppResult<bool> {
        let access = self.store.get(KEY_ACCESS_TOKEN)?;
        let refresh = self.store.get(KEY_REFRESH_TOKEN)?;
        let user = self.store.get(KEY_CURRENT_USER)?;

        match (access, refresh, user) {
            (Some(_), Some(_), Some(identity)) => {
                let snapshot = SessionSnapshot { identity };
                *self.session.lock_or_recover() = Some(snapshot.clone());
                self.publish_signed_in(snapshot.identity);
                Ok(true)
            }
            (None, None, None) => Ok(false),
            _ => {
                tracing::warn!("partial credentials found in store, discarding");
                self.remove_all_credentials();
                Ok(false)
            }
        }
    }

    /// Persist a fresh credential pair and mark the session signed in.
    pub fn apply_login(&self, pair: &TokenPair, identity: &str) -> AppResult<()> {
        self.store.set(KEY_ACCESS_TOKEN, &pair.access_token)?;
        self.store.set(KEY_REFRESH_TOKEN, &pair.refresh_token)?;
        self.store.set(KEY_CURRENT_USER, identity)?;

        let snapshot = SessionSnapshot {
            identity: identity.to_string(),
        };
        *self.session.lock_or_recover() = Some(snapshot.clone());
        self.publish_signed_in(snapshot.identity);
        Ok(())
    }

    /// Rotate both tokens after a successful refresh. The identity is left
    /// untouched; refresh never changes who is signed in.
    pub fn apply_refresh(&self, pair: &TokenPair) -> AppResult<()> {
        self.store.set(KEY_ACCESS_TOKEN, &pair.access_token)?;
        self.store.set(KEY_REFRESH_TOKEN, &pair.refresh_token)?;
        Ok(())
    }

    /// Drop the session everywhere. Store removals are best effort; a failed
    /// delete is logged and does not keep the session alive. Safe to call
    /// repeatedly, and the signed-out status is broadcast at most once per
    /// sign-in.
    pub fn clear(&self) {
        self.remove_all_credentials();
        *self.session.lock_or_recover() = None;
        self.status_tx.send_if_modified(|status| {
            if *status == AuthStatus::SignedOut {
                return false;
            }
            *status = AuthStatus::SignedOut;
            true
        });
    }

    fn remove_all_credentials(&self) {
        for key in [KEY_ACCESS_TOKEN, KEY_REFRESH_TOKEN, KEY_CURRENT_USER] {
            if let Err(err) = self.store.remove(key) {
                tracing::warn!(key = key, "failed to remove credential: {}", err);
            }
        }
    }

    fn publish_signed_in(&self, identity: String) {
        self.status_tx.send_if_modified(|status| {
            let next = AuthStatus::SignedIn { identity };
            if *status == next {
                return false;
            }
            *status = next;
            true
        });
    }

    /// Watch auth status transitions. The receiver starts at the current
    /// status.
    pub fn subscribe(&self) -> watch::Receiver<AuthStatus> {
        self.status_tx.subscribe()
    }

    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.session.lock_or_recover().clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.session.lock_or_recover().is_some()
    }

    /// True while any authenticated request is in flight.
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst) > 0
    }

    /// True while a token refresh is in flight.
    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::SeqCst) > 0
    }

    pub(crate) fn begin_loading(&self) -> FlagGuard<'_> {
        FlagGuard::acquire(&self.loading)
    }

    pub(crate) fn begin_refreshing(&self) -> FlagGuard<'_> {
        FlagGuard::acquire(&self.refreshing)
    }
}

/// Counts overlapping activities so the flag only drops when the last one
/// finishes. Released on drop, including on error and panic paths.
pub(crate) struct FlagGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> FlagGuard<'a> {
    fn acquire(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}
