//! Meshcall Types
//!
//! Shared type definitions for participant identities, the signaling
//! envelope and the relay command/event schemas used across all
//! meshcall crates.

pub mod error;
pub mod identity;
pub mod relay;
pub mod signaling;

pub use error::*;
pub use identity::*;
pub use relay::*;
pub use signaling::*;
