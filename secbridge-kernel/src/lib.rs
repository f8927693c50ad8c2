//! secbridge kernel - reconciles "security updates" monitoring alerts with
//! MantisBT tickets.
//!
//! - `monitoring`: Livestatus query builder and client
//! - `tracker`: issue tracker capability and its MantisBT REST client
//! - `store`: SQLite host -> issue mapping
//! - `templates` / `resolver`: message rendering and reverse parsing
//! - `engine`: per-host decision table and the run loop

pub mod config;
pub mod engine;
pub mod errors;
pub mod models;
pub mod monitoring;
pub mod resolver;
pub mod store;
pub mod templates;
pub mod tracker;

pub use engine::{EngineSettings, HostOutcome, ReconciliationEngine, RunReport};
pub use errors::{ErrorKind, ParseError, ReconcileError, TransportError};
pub use store::{MappingStore, StoreError};
