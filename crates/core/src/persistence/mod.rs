//! # Durable Persistence
//!
//! Pushes result trees to a flaky remote API.
//!
//! ```text
//! ResultPersister ── create_target ──▶ DurableClient::call ──▶ RemoteApi
//!        └────────── persist_tree ───▶ (sequential child writes)
//! ```
//!
//! Every remote call goes through [`DurableClient`], which caps in-flight
//! calls with a semaphore and retries transient failures with jittered
//! exponential backoff.

pub mod client;
pub mod error;
pub mod http;
pub mod persister;
pub mod tree;

pub use client::{DurableClient, RemoteApi, RemoteRequest, RemoteResponse, RetryPolicy};
pub use error::RemoteError;
pub use http::HttpRemoteApi;
pub use persister::ResultPersister;
pub use tree::{PersistFailure, PersistOutcome, PersistenceTarget, Writable, WrittenChild};
