//! Boardcast server core.
//!
//! The server-side of a real-time collaborative task board: an axum
//! WebSocket gateway multiplexing room subscriptions per session, a task
//! service enforcing the board invariants under optimistic concurrency, a
//! conflict controller driving detection and resolution of stale writes,
//! the Smart-Assign engine, and an activity recorder feeding the audit
//! trail. External collaborators (persistence, user directory, credential
//! verifier, activity sink) are injected behind traits; in-memory
//! implementations back tests and the dev binary.

pub mod activity;
pub mod assign;
pub mod auth;
pub mod config;
pub mod conflict;
pub mod error;
pub mod gateway;
pub mod rooms;
pub mod store;
pub mod tasks;
