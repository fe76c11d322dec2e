//! Usage: Typed client surface for the image backend endpoints.

use crate::client::http::{AuthHttp, RequestBody, Transport};
use crate::client::refresh::RefreshCoordinator;
use crate::domain::images::{
    ImagePage, ImageRecord, IssuedToken, TokenPair, UploadFile, UploadReceipt, Workflow,
};
use crate::domain::session::SessionState;
use crate::infra::config::ClientConfig;
use crate::infra::token_store::TokenStore;
use crate::shared::error::{
    AppError, AppResult, CODE_INVALID_INPUT, CODE_UNAUTHENTICATED, CODE_UPSTREAM,
};
use reqwest::Method;
use serde_json::json;
use std::sync::Arc;

const LOGIN_PATH: &str = "/login";
const REGISTER_PATH: &str = "/register";
const TOKEN_PATH: &str = "/token";
const LIST_IMAGES_PATH: &str = "/images/list";
const UPLOAD_IMAGES_PATH: &str = "/upload-images";
const GET_IMAGE_PATH: &str = "/get-image";

const LIST_LIMIT_DEFAULT: u32 = 25;
const LIST_LIMIT_MAX: u32 = 100;
const UPLOAD_MAX_FILES: usize = 2;
const BODY_SNIPPET_MAX_CHARS: usize = 240;

/// Entry point for embedders. Owns the session, the refresh coordinator, and
/// the authenticated pipeline; hand out clones of the `Arc`-wrapped client.
pub struct ApiClient {
    transport: Arc<Transport>,
    session: Arc<SessionState>,
    auth: AuthHttp,
}

impl ApiClient {
    pub fn new(config: ClientConfig, store: Arc<dyn TokenStore>) -> AppResult<Self> {
        let transport = Arc::new(Transport::new(config)?);
        let session = Arc::new(SessionState::new(Arc::clone(&store)));
        let refresher = Arc::new(RefreshCoordinator::new(
            Arc::clone(&transport),
            Arc::clone(&store),
            Arc::clone(&session),
        ));
        let auth = AuthHttp::new(
            Arc::clone(&transport),
            store,
            Arc::clone(&session),
            refresher,
        );
        Ok(Self {
            transport,
            session,
            auth,
        })
    }

    pub fn from_env(store: Arc<dyn TokenStore>) -> AppResult<Self> {
        Self::new(ClientConfig::from_env()?, store)
    }

    pub fn config(&self) -> &ClientConfig {
        self.transport.config()
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    /// Restore a persisted session, if any. Call once at startup.
    pub fn hydrate(&self) -> AppResult<bool> {
        self.session.hydrate()
    }

    pub fn logout(&self) {
        self.session.clear();
    }

    pub async fn login(&self, email: &str, password: &str) -> AppResult<()> {
        let identity = validated_identity(email)?;
        let pair = self
            .credentials_request(LOGIN_PATH, &identity, password)
            .await?;
        self.session.apply_login(&pair, &identity)
    }

    pub async fn register(&self, email: &str, password: &str) -> AppResult<()> {
        let identity = validated_identity(email)?;
        let pair = self
            .credentials_request(REGISTER_PATH, &identity, password)
            .await?;
        self.session.apply_login(&pair, &identity)
    }

    async fn credentials_request(
        &self,
        path: &str,
        email: &str,
        password: &str,
    ) -> AppResult<TokenPair> {
        if password.is_empty() {
            return Err(AppError::new(CODE_INVALID_INPUT, "password is required"));
        }

        let response = self
            .transport
            .post_json(path, &json!({ "email": email, "password": password }))
            .await?;
        let response = expect_success(response).await?;
        response
            .json::<TokenPair>()
            .await
            .map_err(|e| AppError::new(CODE_UPSTREAM, format!("credentials response malformed: {e}")))
    }

    /// Mint a long-lived API token for the signed-in user.
    pub async fn issue_token(&self, days_valid: Option<u32>) -> AppResult<IssuedToken> {
        let payload = match days_valid {
            Some(days) if days == 0 => {
                return Err(AppError::new(
                    CODE_INVALID_INPUT,
                    "days_valid must be at least 1",
                ));
            }
            Some(days) => json!({ "days_valid": days }),
            None => json!({}),
        };

        let response = self
            .auth
            .request(Method::POST, TOKEN_PATH, &RequestBody::Json(payload))
            .await?;
        let response = expect_success(response).await?;
        response
            .json::<IssuedToken>()
            .await
            .map_err(|e| AppError::new(CODE_UPSTREAM, format!("token response malformed: {e}")))
    }

    /// Fetch one page of the image listing. `limit` defaults to 25 and must
    /// stay within 1..=100.
    pub async fn list_images(
        &self,
        cursor: Option<&str>,
        limit: Option<u32>,
    ) -> AppResult<ImagePage> {
        let limit = limit.unwrap_or(LIST_LIMIT_DEFAULT);
        if limit < 1 || limit > LIST_LIMIT_MAX {
            return Err(AppError::new(
                CODE_INVALID_INPUT,
                format!("limit must be within 1..={LIST_LIMIT_MAX}, got {limit}"),
            ));
        }

        let mut payload = json!({ "limit": limit });
        if let Some(cursor) = cursor.map(str::trim).filter(|v| !v.is_empty()) {
            payload["cursor"] = json!(cursor);
        }

        let response = self
            .auth
            .request(Method::POST, LIST_IMAGES_PATH, &RequestBody::Json(payload))
            .await?;
        let response = expect_success(response).await?;
        response
            .json::<ImagePage>()
            .await
            .map_err(|e| AppError::new(CODE_UPSTREAM, format!("list response malformed: {e}")))
    }

    /// Upload up to two files in one multipart request.
    pub async fn upload_images(
        &self,
        files: Vec<UploadFile>,
        workflow: Workflow,
    ) -> AppResult<Vec<UploadReceipt>> {
        if files.is_empty() {
            return Err(AppError::new(CODE_INVALID_INPUT, "no files to upload"));
        }
        if files.len() > UPLOAD_MAX_FILES {
            return Err(AppError::new(
                CODE_INVALID_INPUT,
                format!("at most {UPLOAD_MAX_FILES} files per upload, got {}", files.len()),
            ));
        }

        let path = format!("{UPLOAD_IMAGES_PATH}?workflow={}", workflow.as_str());
        let response = self
            .auth
            .request(Method::POST, &path, &RequestBody::Multipart(files))
            .await?;
        let response = expect_success(response).await?;
        response
            .json::<Vec<UploadReceipt>>()
            .await
            .map_err(|e| AppError::new(CODE_UPSTREAM, format!("upload response malformed: {e}")))
    }

    /// Fetch one image record by id.
    pub async fn fetch_image(&self, image_id: &str) -> AppResult<ImageRecord> {
        let image_id = image_id.trim();
        if image_id.is_empty() {
            return Err(AppError::new(CODE_INVALID_INPUT, "image_id is required"));
        }

        let path = format!("{GET_IMAGE_PATH}?image_id={}", urlencoding::encode(image_id));
        let response = self
            .auth
            .request(Method::GET, &path, &RequestBody::Empty)
            .await?;
        let response = expect_success(response).await?;
        response
            .json::<ImageRecord>()
            .await
            .map_err(|e| AppError::new(CODE_UPSTREAM, format!("image response malformed: {e}")))
    }
}

fn validated_identity(email: &str) -> AppResult<String> {
    let trimmed = email.trim();
    if trimmed.is_empty() {
        return Err(AppError::new(CODE_INVALID_INPUT, "email is required"));
    }
    Ok(trimmed.to_string())
}

/// Turn a non-2xx response into a typed error. A 401 here is terminal; the
/// request pipeline has already exhausted its refresh-and-retry budget.
async fn expect_success(response: reqwest::Response) -> AppResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(BODY_SNIPPET_MAX_CHARS).collect();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(AppError::new(
            CODE_UNAUTHENTICATED,
            format!("request unauthorized: {snippet}"),
        ));
    }
    Err(AppError::new(
        CODE_UPSTREAM,
        format!("backend returned status {status}: {snippet}"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::token_store::MemoryTokenStore;

    fn client() -> ApiClient {
        let config = ClientConfig::new("http://localhost:80").unwrap();
        ApiClient::new(config, Arc::new(MemoryTokenStore::new())).unwrap()
    }

    #[tokio::test]
    async fn login_rejects_blank_email() {
        let err = client().login("   ", "secret").await.unwrap_err();
        assert_eq!(err.code(), CODE_INVALID_INPUT);
    }

    #[tokio::test]
    async fn login_rejects_empty_password() {
        let err = client().login("me@example.com", "").await.unwrap_err();
        assert_eq!(err.code(), CODE_INVALID_INPUT);
    }

    #[tokio::test]
    async fn list_images_rejects_out_of_range_limit() {
        let api = client();
        let err = api.list_images(None, Some(0)).await.unwrap_err();
        assert_eq!(err.code(), CODE_INVALID_INPUT);
        let err = api.list_images(None, Some(101)).await.unwrap_err();
        assert_eq!(err.code(), CODE_INVALID_INPUT);
    }

    #[tokio::test]
    async fn upload_rejects_empty_and_oversized_batches() {
        let api = client();
        let err = api
            .upload_images(Vec::new(), Workflow::Cloud)
            .await
            .unwrap_err();
        assert_eq!(err.code(), CODE_INVALID_INPUT);

        let file = |name: &str| UploadFile {
            file_name: name.to_string(),
            content_type: Some("image/png".to_string()),
            bytes: bytes::Bytes::from_static(b"png"),
        };
        let err = api
            .upload_images(vec![file("a.png"), file("b.png"), file("c.png")], Workflow::Cloud)
            .await
            .unwrap_err();
        assert_eq!(err.code(), CODE_INVALID_INPUT);
    }

    #[tokio::test]
    async fn fetch_image_rejects_blank_id() {
        let err = client().fetch_image("  ").await.unwrap_err();
        assert_eq!(err.code(), CODE_INVALID_INPUT);
    }

    #[tokio::test]
    async fn authed_call_without_session_fails_fast() {
        let api = client();
        let err = api.issue_token(Some(7)).await.unwrap_err();
        assert_eq!(err.code(), CODE_UNAUTHENTICATED);
    }
}
