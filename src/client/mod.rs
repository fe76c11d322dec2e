pub mod api;
pub mod feed;
pub mod http;
pub mod refresh;
