//! Client side of the call-verification provider API.

mod client;
pub mod retry;

pub use client::{SessionDescriptor, VerificationClient};
pub use retry::RetryPolicy;
