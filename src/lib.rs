//! Usage: Session-aware client library for the image backend.
//!
//! Wraps the backend's auth and image endpoints behind a typed API:
//! credentials persist in a [`TokenStore`], authenticated requests retry
//! once after a single-flight token refresh, and [`ImageFeed`] pages
//! through the listing with a cursor.
//!
//! ```no_run
//! use imagehub_client::{ApiClient, ImageFeed, SqliteTokenStore};
//! use std::sync::Arc;
//!
//! # async fn run() -> imagehub_client::AppResult<()> {
//! let store = Arc::new(SqliteTokenStore::open("credentials.db")?);
//! let api = Arc::new(ApiClient::from_env(store)?);
//! if !api.hydrate()? {
//!     api.login("me@example.com", "secret").await?;
//! }
//! let feed = ImageFeed::new(Arc::clone(&api), 25)?;
//! feed.load_next().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod domain;
pub mod infra;
pub mod shared;

pub use client::api::ApiClient;
pub use client::feed::{ImageFeed, LoadOutcome};
pub use client::http::{AuthHttp, RequestBody, Transport};
pub use client::refresh::RefreshCoordinator;
pub use domain::images::{
    ImagePage, ImageRecord, IssuedToken, TokenPair, UploadFile, UploadReceipt, Workflow,
};
pub use domain::session::{AuthStatus, SessionSnapshot, SessionState};
pub use infra::config::ClientConfig;
pub use infra::token_store::{
    MemoryTokenStore, SqliteTokenStore, TokenStore, KEY_ACCESS_TOKEN, KEY_CURRENT_USER,
    KEY_REFRESH_TOKEN,
};
pub use shared::error::{AppError, AppResult};
pub use shared::logging::init_tracing;
