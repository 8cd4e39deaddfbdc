//! Event models shared by all workers.

pub mod event;
pub mod time;

pub use event::{decode, DomainEvent, Envelope};
pub use time::{EventDateTime, EventInstant};
