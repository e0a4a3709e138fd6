//! twilio-voice: Outbound call control for dialgate
//!
//! Places calls with asynchronous answering-machine detection and hangs
//! them up. The provider reports the AMD verdict and status transitions
//! back through webhooks; this crate only builds the callback URLs.
//!
//! ## Key Components
//!
//! - `TelephonyControl`: place / terminate seam used by the orchestrator
//! - `TwilioClient`: REST implementation
//! - `RecordingTelephony`: in-memory fake for tests

pub mod client;
pub mod control;
mod error;
pub mod fakes;

pub use client::{
    TwilioClient, TwilioConfig, AMD_CALLBACK_PATH, SESSION_QUERY_KEY, STATUS_CALLBACK_PATH,
};
pub use control::{normalize_destination, CallId, CallSession, TelephonyControl};
pub use error::ProviderError;
pub use fakes::{PlacedCall, RecordingTelephony};
