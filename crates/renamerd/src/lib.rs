//! renamer daemon - rename sessions, atomic commit and delivery
//!
//! This crate provides the daemon side of renamer:
//! - `supervisor` - per-session workers driving the lifecycle state machine
//! - `store` - session store actor, the single owner of session records
//! - `rename` - collision-safe atomic rename
//! - `delivery` - the `Transport` seam and bounded retry
//! - `intake` - staging of uploaded files
//! - `server` - Unix socket server and the socket transport
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       renamerd daemon                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │  DaemonServer   │────▶│        Supervisor           │   │
//! │  │ (Unix Socket)   │     │  (one worker per session)   │   │
//! │  └────────┬────────┘     └───────┬──────────────┬──────┘   │
//! │           │                      │              │          │
//! │           │ upload               │ records      │ commit   │
//! │           ▼                      ▼              ▼          │
//! │  ┌─────────────────┐     ┌──────────────┐ ┌─────────────┐  │
//! │  │     Intake      │     │  StoreActor  │ │ rename +    │  │
//! │  │ (staging dir)   │     │              │ │ delivery    │  │
//! │  └─────────────────┘     └──────────────┘ └─────────────┘  │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod cleanup;
pub mod config;
pub mod delivery;
pub mod intake;
pub mod rename;
pub mod server;
pub mod store;
pub mod supervisor;
