pub mod error;
pub mod logging;
pub(crate) mod mutex_ext;
pub(crate) mod security;
pub(crate) mod time;
