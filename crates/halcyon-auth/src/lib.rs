//! Authentication orchestration for the Halcyon account platform.
//!
//! Drives one login attempt from submitted credentials to an established,
//! key-unlocked [`Session`](halcyon_core::session::Session), across the
//! mutually exclusive verification paths: password-only, two-factor,
//! mailbox-key unlock and SSO device trust.
//!
//! The entry point is [`LoginFlow`]: the caller renders the form matching
//! [`LoginFlow::step`], feeds the user's input to [`LoginFlow::submit`] and
//! re-invokes it for the next step until the flow completes. All network and
//! storage access goes through the capabilities in [`FlowDeps`].

mod cache;
mod error;
mod finalize;
pub mod flow;
mod kt;
pub mod sso;

#[cfg(test)]
pub(crate) mod testutil;

pub use cache::AuthCache;
pub use error::{DeviceTrustErrorKind, LoginError};
pub use flow::{AuthStep, FlowDeps, LoginFlow, StepInput, SubmitOutcome};
pub use kt::{KeyTransparencyVerifier, KtError, NoopKtVerifier};
pub use sso::{AlwaysVisible, PollHandle, PollUpdate, SsoState, VisibilityProbe};
