//! Usage: HTTP plumbing (policy-free transport + the 401-refresh-retry pipeline).

use crate::client::refresh::RefreshCoordinator;
use crate::domain::images::UploadFile;
use crate::domain::session::SessionState;
use crate::infra::config::ClientConfig;
use crate::infra::token_store::{TokenStore, KEY_ACCESS_TOKEN};
use crate::shared::error::{AppError, AppResult, CODE_INVALID_INPUT, CODE_NETWORK, CODE_UNAUTHENTICATED};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, StatusCode};
use std::sync::Arc;

/// Request payload shape. Multipart carries raw parts instead of a built
/// `Form` so the body can be rebuilt for a retry.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Multipart(Vec<UploadFile>),
}

/// Thin wrapper over `reqwest`. Sends exactly what it is told; all auth and
/// retry policy lives in [`AuthHttp`].
pub struct Transport {
    client: reqwest::Client,
    config: ClientConfig,
}

impl Transport {
    pub fn new(config: ClientConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::new(CODE_NETWORK, format!("failed to build http client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Fire one request. Transport-level failures (connect, timeout, body
    /// read) map to `NETWORK_ERROR`; any HTTP status comes back as `Ok`.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        bearer: Option<&str>,
        body: &RequestBody,
    ) -> AppResult<reqwest::Response> {
        let url = self.config.resolve(path);
        let mut request = self.client.request(method, &url);

        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        request = match body {
            RequestBody::Empty => request,
            RequestBody::Json(value) => request.json(value),
            RequestBody::Multipart(files) => request.multipart(build_form(files)?),
        };

        request
            .send()
            .await
            .map_err(|e| AppError::new(CODE_NETWORK, format!("request to {url} failed: {e}")))
    }

    /// Unauthenticated JSON POST, used by the login/register/refresh calls
    /// that run before a bearer token exists.
    pub async fn post_json(
        &self,
        path: &str,
        payload: &serde_json::Value,
    ) -> AppResult<reqwest::Response> {
        self.send(Method::POST, path, None, &RequestBody::Json(payload.clone()))
            .await
    }
}

fn build_form(files: &[UploadFile]) -> AppResult<Form> {
    let mut form = Form::new();
    for file in files {
        let mut part = Part::bytes(file.bytes.to_vec()).file_name(file.file_name.clone());
        if let Some(content_type) = &file.content_type {
            part = part.mime_str(content_type).map_err(|e| {
                AppError::new(
                    CODE_INVALID_INPUT,
                    format!("invalid content type {content_type}: {e}"),
                )
            })?;
        }
        form = form.part("files", part);
    }
    Ok(form)
}

/// Authenticated request pipeline. Attaches the stored bearer token and, on a
/// 401, funnels through the refresh coordinator and retries exactly once.
pub struct AuthHttp {
    transport: Arc<Transport>,
    store: Arc<dyn TokenStore>,
    session: Arc<SessionState>,
    refresher: Arc<RefreshCoordinator>,
}

impl AuthHttp {
    pub fn new(
        transport: Arc<Transport>,
        store: Arc<dyn TokenStore>,
        session: Arc<SessionState>,
        refresher: Arc<RefreshCoordinator>,
    ) -> Self {
        Self {
            transport,
            store,
            session,
            refresher,
        }
    }

    /// Send an authenticated request.
    ///
    /// No stored access token means the caller is signed out; the session is
    /// cleared and no network call is made. A 401 response triggers one
    /// refresh-and-retry cycle. A 401 on the retry is terminal: the session
    /// is cleared and the response is returned as-is for the caller to
    /// inspect.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: &RequestBody,
    ) -> AppResult<reqwest::Response> {
        let _loading = self.session.begin_loading();

        let token = self
            .store
            .get(KEY_ACCESS_TOKEN)?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let Some(token) = token else {
            self.session.clear();
            return Err(AppError::new(CODE_UNAUTHENTICATED, "no access token stored"));
        };

        let response = self
            .transport
            .send(method.clone(), path, Some(&token), body)
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        // Refresh failures already tore the session down inside the
        // coordinator; just propagate the error here.
        let fresh_token = self.refresher.ensure_fresh_token().await?;

        let retry = self
            .transport
            .send(method, path, Some(&fresh_token), body)
            .await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!(path = path, "request unauthorized after token refresh, signing out");
            self.session.clear();
        }
        Ok(retry)
    }
}
