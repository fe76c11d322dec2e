//! Usage: Single-flight access token refresh shared across concurrent requests.

use crate::client::http::Transport;
use crate::domain::images::TokenPair;
use crate::domain::session::SessionState;
use crate::infra::token_store::{TokenStore, KEY_REFRESH_TOKEN};
use crate::shared::error::{AppError, AppResult, CODE_REFRESH_FAILED};
use crate::shared::mutex_ext::MutexExt;
use crate::shared::security::mask_token;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

const REFRESH_PATH: &str = "/refresh";
const BODY_SNIPPET_MAX_CHARS: usize = 240;

type SharedRefresh = Shared<BoxFuture<'static, AppResult<String>>>;
type InflightSlot = Arc<Mutex<Option<(u64, SharedRefresh)>>>;

/// Collapses concurrent refresh attempts into one backend call. Every waiter
/// gets the same outcome, and the in-flight slot is emptied before any waiter
/// resumes, so a follow-up 401 can always start a fresh attempt.
pub struct RefreshCoordinator {
    transport: Arc<Transport>,
    store: Arc<dyn TokenStore>,
    session: Arc<SessionState>,
    inflight: InflightSlot,
    next_ticket: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(
        transport: Arc<Transport>,
        store: Arc<dyn TokenStore>,
        session: Arc<SessionState>,
    ) -> Self {
        Self {
            transport,
            store,
            session,
            inflight: Arc::new(Mutex::new(None)),
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Join the in-flight refresh if one exists, otherwise start one. Returns
    /// the new access token on success. On failure the session has already
    /// been cleared.
    pub async fn ensure_fresh_token(&self) -> AppResult<String> {
        let shared = {
            let mut slot = self.inflight.lock_or_recover();
            if let Some((_, existing)) = slot.as_ref() {
                existing.clone()
            } else {
                let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
                let fut = drive_refresh(
                    ticket,
                    Arc::clone(&self.transport),
                    Arc::clone(&self.store),
                    Arc::clone(&self.session),
                    Arc::clone(&self.inflight),
                );
                *slot = Some((ticket, fut.clone()));
                fut
            }
        };

        shared.await
    }
}

fn drive_refresh(
    ticket: u64,
    transport: Arc<Transport>,
    store: Arc<dyn TokenStore>,
    session: Arc<SessionState>,
    inflight: InflightSlot,
) -> SharedRefresh {
    async move {
        let outcome = run_refresh(&transport, &store, &session).await;

        // Empty the slot before waiters resume. Only this ticket's slot; a
        // later attempt may already own it.
        let mut slot = inflight.lock_or_recover();
        if slot.as_ref().is_some_and(|(owner, _)| *owner == ticket) {
            *slot = None;
        }
        drop(slot);

        outcome
    }
    .boxed()
    .shared()
}

async fn run_refresh(
    transport: &Transport,
    store: &Arc<dyn TokenStore>,
    session: &SessionState,
) -> AppResult<String> {
    let _refreshing = session.begin_refreshing();

    match perform_refresh(transport, store).await {
        Ok(pair) => {
            if let Err(err) = session.apply_refresh(&pair) {
                tracing::warn!("failed to persist refreshed tokens: {}", err);
                session.clear();
                return Err(err);
            }
            tracing::debug!(
                access_token = %mask_token(&pair.access_token),
                "token refresh succeeded"
            );
            Ok(pair.access_token)
        }
        Err(err) => {
            tracing::warn!("token refresh failed: {}", err);
            session.clear();
            Err(err)
        }
    }
}

async fn perform_refresh(
    transport: &Transport,
    store: &Arc<dyn TokenStore>,
) -> AppResult<TokenPair> {
    let refresh_token = store
        .get(KEY_REFRESH_TOKEN)?
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::new(CODE_REFRESH_FAILED, "no refresh token stored"))?;

    let response = transport
        .post_json(REFRESH_PATH, &json!({ "refresh_token": refresh_token }))
        .await
        .map_err(|e| {
            AppError::new(
                CODE_REFRESH_FAILED,
                format!("refresh request failed: {}", e.message()),
            )
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(BODY_SNIPPET_MAX_CHARS).collect();
        return Err(AppError::new(
            CODE_REFRESH_FAILED,
            format!("refresh rejected with status {status}: {snippet}"),
        ));
    }

    // A response missing either token is a failed rotation, not a partial
    // success.
    response.json::<TokenPair>().await.map_err(|e| {
        AppError::new(
            CODE_REFRESH_FAILED,
            format!("refresh response malformed: {e}"),
        )
    })
}
