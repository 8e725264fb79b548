use halcyon_core::api::User;
use thiserror::Error;

/// Key-transparency verification failure. Best-effort from the login flow's
/// point of view; commits are logged and never block a login.
#[derive(Debug, Error)]
#[error("Key transparency commit failed: {0}")]
pub struct KtError(pub String);

/// Capability for publishing the post-login key-transparency proof.
///
/// Threaded through the flow but implemented elsewhere; the commit runs last
/// in the finalizer because it needs the finalized user record.
#[async_trait::async_trait]
pub trait KeyTransparencyVerifier: Send + Sync {
    #[allow(missing_docs)]
    async fn commit(&self, user: &User) -> Result<(), KtError>;
}

/// Verifier for callers that have key transparency disabled.
pub struct NoopKtVerifier;

#[async_trait::async_trait]
impl KeyTransparencyVerifier for NoopKtVerifier {
    async fn commit(&self, _user: &User) -> Result<(), KtError> {
        Ok(())
    }
}
