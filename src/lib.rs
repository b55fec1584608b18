//! QARS - QA Release Server
//!
//! Coordinates promotion of change records from development into QA.
//! Many client sessions share one server; requests are queued as pending,
//! batched into a single transfer, claimed by the transfer agent and
//! completed with a release report.
//!
//! # Modules
//!
//! - [`core_types`] - Tracking numbers and session ids
//! - [`entity`] - Change records, files, transfer requests and users
//! - [`protocol`] - Action/result codes, payloads and wire framing
//! - [`persistence`] - Snapshots, the tracking counter and the instruction marker
//! - [`collaborators`] - Filesystem, impact analysis and mail seams
//! - [`server`] - Acceptor, connection handlers and the dispatcher
//! - [`client`] - Async protocol client

// Core types - must be first!
pub mod core_types;

pub mod activity_log;
pub mod client;
pub mod collaborators;
pub mod config;
pub mod entity;
pub mod error;
pub mod logging;
pub mod persistence;
pub mod protocol;
pub mod server;

// Convenient re-exports at crate root
pub use client::{ReleaseClient, Response};
pub use config::AppConfig;
pub use core_types::{SessionId, TrackingNumber};
pub use entity::{Category, ChangeRecord, ReleaseFile, SecurityLevel, TransferRequest, User};
pub use error::QarsError;
pub use protocol::{ActionCode, Payload, ResultCode};
pub use server::{Dispatcher, ServerHandle, Services};
