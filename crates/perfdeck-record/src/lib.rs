#![deny(clippy::all)]

//! Process supervision for perf-based profiling: a recording controller
//! around a single `perf record` process, the privilege-elevation handshake
//! that can precede it, and capability probes against the installed perf
//! binary.

mod controller;
mod elevate;
mod error;
pub mod probes;
mod request;
mod sync;

pub use controller::RecordController;
pub use controller::RecordEvent;
pub use elevate::AuthHelper;
pub use elevate::ELEVATE_ACTION_ID;
pub use elevate::ELEVATE_SCRIPT_NAME;
pub use elevate::HandshakeState;
pub use elevate::HelperJob;
pub use elevate::HelperSignal;
pub use elevate::PkexecHelper;
pub use error::RecordError;
pub use request::RecordTarget;
pub use request::RecordingRequest;
