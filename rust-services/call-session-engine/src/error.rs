//! Error types for the call session engine
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use meshcall_types::UserId;
use serde::Serialize;
use signaling_relay_client::RelayError;
use thiserror::Error;

use crate::link::LinkState;
use crate::media::MediaKind;

/// Result type for call session operations
pub type CallResult<T> = Result<T, CallError>;

/// Errors that can occur while managing a call session
#[derive(Error, Debug)]
pub enum CallError {
    /// User or OS refused a capture device
    #[error("Media access denied for {kind} capture: {reason}")]
    MediaAccessDenied { kind: MediaKind, reason: String },

    /// User or OS refused screen capture
    #[error("Display capture denied: {0}")]
    DisplayCaptureDenied(String),

    /// Relay did not accept a message
    #[error("Signaling send to {peer} failed: {reason}")]
    SignalingSendFailure { peer: UserId, reason: String },

    /// ICE/DTLS failure on one link
    #[error("Connection to {peer} failed after {restarts} ICE restart(s)")]
    ConnectionFailed { peer: UserId, restarts: u32 },

    /// Local offer could not be produced or applied
    #[error("Offer creation for {peer} failed: {reason}")]
    OfferCreationFailure { peer: UserId, reason: String },

    /// Local answer could not be produced or applied
    #[error("Answer creation for {peer} failed: {reason}")]
    AnswerCreationFailure { peer: UserId, reason: String },

    #[error("A call session is already active")]
    SessionAlreadyActive,

    #[error("No active call session")]
    NoActiveSession,

    #[error("Not in a group call")]
    NotInGroup,

    #[error("No link for peer {peer}")]
    LinkNotFound { peer: UserId },

    #[error("Invalid link transition for {peer}: {from} -> {to}")]
    InvalidTransition {
        peer: UserId,
        from: LinkState,
        to: LinkState,
    },

    #[error("Invalid signaling state for {peer}: {reason}")]
    InvalidSignalingState { peer: UserId, reason: String },

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    /// Native peer connection or capture backend error
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The call client task is gone
    #[error("Call client stopped")]
    ClientStopped,
}

/// Coarse error category published on the event bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallErrorKind {
    MediaAccessDenied,
    DisplayCaptureDenied,
    SignalingSendFailure,
    ConnectionFailed,
    OfferCreationFailure,
    AnswerCreationFailure,
    /// Misuse of the session facade
    Session,
    /// Signaling arrived in a state that cannot accept it
    Protocol,
    /// Reported by the relay (`call-error`)
    Remote,
    Internal,
}

impl CallError {
    pub fn kind(&self) -> CallErrorKind {
        match self {
            CallError::MediaAccessDenied { .. } => CallErrorKind::MediaAccessDenied,
            CallError::DisplayCaptureDenied(_) => CallErrorKind::DisplayCaptureDenied,
            CallError::SignalingSendFailure { .. } | CallError::Relay(_) => {
                CallErrorKind::SignalingSendFailure
            }
            CallError::ConnectionFailed { .. } => CallErrorKind::ConnectionFailed,
            CallError::OfferCreationFailure { .. } => CallErrorKind::OfferCreationFailure,
            CallError::AnswerCreationFailure { .. } => CallErrorKind::AnswerCreationFailure,
            CallError::SessionAlreadyActive
            | CallError::NoActiveSession
            | CallError::NotInGroup
            | CallError::ClientStopped => CallErrorKind::Session,
            CallError::LinkNotFound { .. }
            | CallError::InvalidTransition { .. }
            | CallError::InvalidSignalingState { .. } => CallErrorKind::Protocol,
            CallError::Backend(_) | CallError::Config(_) => CallErrorKind::Internal,
        }
    }

    /// Peer the error is scoped to; `None` for session-scoped errors
    pub fn peer(&self) -> Option<&UserId> {
        match self {
            CallError::SignalingSendFailure { peer, .. }
            | CallError::ConnectionFailed { peer, .. }
            | CallError::OfferCreationFailure { peer, .. }
            | CallError::AnswerCreationFailure { peer, .. }
            | CallError::LinkNotFound { peer }
            | CallError::InvalidTransition { peer, .. }
            | CallError::InvalidSignalingState { peer, .. } => Some(peer),
            _ => None,
        }
    }
}
