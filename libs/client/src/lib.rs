//! Client SDK for the Tably venue-management platform.
//!
//! Two services make up the SDK: [`SessionManager`] owns the authenticated
//! session (identity, in-memory access token, cookie-held session id) and
//! [`EventRouter`] owns the realtime order-event channel (one websocket
//! connection, room subscriptions, listener fanout). Both are explicitly
//! constructed instances; nothing in this crate is a process-global.
//!
//! The session manager supplies the bearer token used by every outbound
//! call, including the router's connection handshake:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use tably_client::{ClientConfig, EventRouter, SessionManager};
//! # use tably_client::storage::MemoryStore;
//! # async fn demo() {
//! let config = ClientConfig::new("https://api.tably.test", "wss://rt.tably.test");
//! let session = SessionManager::new(&config, Arc::new(MemoryStore::new())).unwrap();
//! let _ = session.login("ops@tably.test", "secret").await;
//! let router = EventRouter::new(config, session.api().bearer_slot());
//! router.connect();
//! # }
//! ```

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod http;
pub mod optimistic;
pub mod realtime;
pub mod session;
pub mod storage;

pub use config::ClientConfig;
pub use error::ClientError;
pub use realtime::router::EventRouter;
pub use session::manager::SessionManager;
