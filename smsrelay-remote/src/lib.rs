//! HTTP side of the relay: the backend queue client, its wire types, the
//! bearer token sources and the locally stored API URL override.

pub mod client;
pub mod config;
pub mod session;
pub mod types;

pub use client::HttpQueueClient;
pub use config::RemoteSettings;
pub use session::{is_token_expired, FileTokenSource, StaticToken, TokenSource};
