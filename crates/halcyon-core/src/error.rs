//! Errors that can occur when using this SDK

use reqwest::StatusCode;
use thiserror::Error;

/// Errors from performing network requests.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error("Received error message from server: [{}] {} (code {})", .status, .message, .code)]
    ResponseContent {
        status: StatusCode,
        /// Platform-specific error code carried in the response body.
        code: u32,
        message: String,
    },
}

impl ApiError {
    /// The platform error code of the response, if this is a server-reported error.
    pub fn response_code(&self) -> Option<u32> {
        match self {
            ApiError::ResponseContent { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// The HTTP status of the response, if this is a server-reported error.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::ResponseContent { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Platform error codes this SDK reacts to. Every other code is passed through.
pub mod api_codes {
    /// The account has been suspended by the platform.
    pub const ACCOUNT_SUSPENDED: u32 = 10_003;
    /// No unprivatization context exists for this member.
    pub const NO_UNPRIVATIZATION_DATA: u32 = 12_200;
    /// The trusted device exists but has not been activated by a peer.
    pub const DEVICE_INACTIVE: u32 = 12_300;
    /// No trusted device record exists for this `(user, device)` pair.
    pub const DEVICE_NON_EXISTING: u32 = 12_301;
    /// The trusted device record exists but its secret no longer validates.
    pub const DEVICE_INVALID: u32 = 12_302;
}

/// Missing required field.
#[derive(Debug, Error)]
#[error("The response received was missing a required field: {0}")]
pub struct MissingFieldError(pub &'static str);

/// This macro is used to require that a value is present or return an error otherwise.
/// It is equivalent to using `val.ok_or(Error::MissingFields)?`, but easier to use and
/// with a more descriptive error message.
/// Note that this macro will return early from the function if the value is not present.
#[macro_export]
macro_rules! require {
    ($val:expr) => {
        match $val {
            Some(val) => val,
            None => return Err($crate::MissingFieldError(stringify!($val)).into()),
        }
    };
}
