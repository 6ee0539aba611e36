//! Signaling Relay Client Library
//!
//! Provides a unified interface for sending signaling commands to, and
//! consuming events from, the external signaling relay (NATS or an
//! in-process hub for tests and demos).

pub mod error;
pub mod memory;
pub mod nats;
pub mod traits;

pub use error::*;
pub use memory::*;
pub use nats::*;
pub use traits::*;
