//! Gateway to the hosted auth and database service.
//!
//! This crate provides:
//! - [`AuthGateway`] and [`RecordStore`] traits the rest of the workspace codes against
//! - [`SupabaseClient`], the reqwest implementation (GoTrue + PostgREST)
//! - [`MemoryBackend`], an in-process implementation with row ownership checks
//! - [`GatewayError`] with a structured [`GatewayErrorKind`]

mod client;
mod error;
pub mod memory;
mod models;
mod query;
mod session_cache;
mod traits;

pub use client::SupabaseClient;
pub use error::{GatewayError, GatewayErrorKind, GatewayResult};
pub use memory::{MemoryBackend, Operation};
pub use models::{
    db_timestamp, AuthChange, AuthChangeEvent, Session, SignUpOutcome, UserIdentity,
};
pub use query::{filter_text, Filter, FilterOp, Order, TableQuery};
pub use session_cache::SessionCache;
pub use traits::{AuthGateway, Backend, RecordStore, SharedBackend};
