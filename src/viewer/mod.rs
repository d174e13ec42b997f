//! Client side of run tracking: bootstrap a run over HTTP, follow its live
//! channel and render the merged state.

pub mod client;
pub mod state;

pub use client::{ClientError, RunTrackingClient};
pub use state::{format_duration, RunView};
