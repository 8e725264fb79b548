use halcyon_core::{
    api::api_codes, crypto::UnlockError, session::StoreError, ApiError, MissingFieldError,
};
use thiserror::Error;

/// The three server-reported trust states of a device record that are not
/// surfaced verbatim but translated into sub-state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceTrustErrorKind {
    /// The record exists but has not been activated yet.
    Inactive,
    /// No record exists for this `(user, device)` pair.
    NonExisting,
    /// The record exists but its secret no longer validates.
    Invalid,
}

/// Error for a login attempt.
///
/// `Password` and `Totp` are recoverable: the flow stays on the same step and
/// the cache is preserved for resubmission. Every other variant cancels the
/// attempt.
#[derive(Debug, Error)]
pub enum LoginError {
    /// Wrong mailbox or backup password.
    #[error("Wrong password")]
    Password,
    /// Wrong two-factor code.
    #[error("Wrong two-factor code")]
    Totp,
    /// Device trust could not be established; carries the server-reported
    /// state.
    #[error("Device trust could not be established ({0:?})")]
    DeviceTrust(DeviceTrustErrorKind),
    /// The account is suspended; surfaced as a dedicated modal by the caller.
    #[error("The account is suspended")]
    Suspended,
    /// A network or server failure not reclassified above.
    #[error(transparent)]
    Api(ApiError),
    /// A key-unlock failure other than a wrong password.
    #[error(transparent)]
    Unlock(UnlockError),
    #[allow(missing_docs)]
    #[error(transparent)]
    MissingField(#[from] MissingFieldError),
    #[allow(missing_docs)]
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A programming-contract violation; never expected in normal operation
    /// and propagated uncaught.
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),
}

impl LoginError {
    /// Whether the flow keeps its step and cache so the user can resubmit.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LoginError::Password | LoginError::Totp)
    }
}

impl From<ApiError> for LoginError {
    fn from(err: ApiError) -> Self {
        match err.response_code() {
            Some(api_codes::ACCOUNT_SUSPENDED) => LoginError::Suspended,
            Some(api_codes::DEVICE_INACTIVE) => {
                LoginError::DeviceTrust(DeviceTrustErrorKind::Inactive)
            }
            Some(api_codes::DEVICE_NON_EXISTING) => {
                LoginError::DeviceTrust(DeviceTrustErrorKind::NonExisting)
            }
            Some(api_codes::DEVICE_INVALID) => {
                LoginError::DeviceTrust(DeviceTrustErrorKind::Invalid)
            }
            _ => LoginError::Api(err),
        }
    }
}

impl From<UnlockError> for LoginError {
    fn from(err: UnlockError) -> Self {
        match err {
            UnlockError::WrongPassword => LoginError::Password,
            other => LoginError::Unlock(other),
        }
    }
}
