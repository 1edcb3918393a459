//! Tidemark Core - Shared Types
//!
//! Data types, collaborator traits, errors and configuration used by every
//! other Tidemark crate. No component logic lives here.

use chrono::{DateTime, Utc};
use uuid::Uuid;

mod config;
mod entities;
mod error;
mod health;
mod key;
mod ring;
mod traits;

pub use config::*;
pub use entities::*;
pub use error::*;
pub use health::*;
pub use key::*;
pub use ring::RingBuffer;
pub use traits::*;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Identifier for audit events, UUIDv7 so ids sort by creation time.
pub type EventId = Uuid;

/// Generate a new UUIDv7 event id.
pub fn new_event_id() -> EventId {
    Uuid::now_v7()
}

/// Generate a new session id.
pub fn new_session_id() -> Uuid {
    Uuid::now_v7()
}
