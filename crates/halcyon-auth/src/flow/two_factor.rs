use halcyon_core::api::SecondFactor;

use crate::{cache::AuthCache, flow::FlowDeps, LoginError};

/// Submits the second factor for the pending session.
///
/// A 422 is the one recoverable response: the code was wrong, the user may
/// resubmit against the same cache. Everything else (including rate limits)
/// cancels the attempt.
pub(crate) async fn submit_second_factor(
    deps: &FlowDeps,
    cache: &mut AuthCache,
    factor: &SecondFactor,
) -> Result<(), LoginError> {
    match deps.api.submit_second_factor(factor).await {
        Ok(()) => {
            cache.two_factor_pending = false;
            Ok(())
        }
        Err(err) if err.status().map(|s| s.as_u16()) == Some(422) => Err(LoginError::Totp),
        Err(err) => Err(err.into()),
    }
}
