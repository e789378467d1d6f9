//! Core types for the stemsep daemon.
//!
//! - [`AudioRequest`]: A parsed separation request
//! - [`SeparationResult`]: Ordered stem paths produced for a request
//! - [`RequestStage`]: Per-request state machine

mod request;
mod result;
mod stage;

pub use request::AudioRequest;
pub use result::SeparationResult;
pub use stage::RequestStage;
