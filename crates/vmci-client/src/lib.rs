//! Client library for the vmci dispatcher.
//!
//! [`DispatcherClient`] covers both the worker RPC (poll, progress updates,
//! keep-alive) and the operator API (submit, list and inspect tasks).

pub mod error;
pub mod http;

pub use error::ClientError;
pub use http::DispatcherClient;
