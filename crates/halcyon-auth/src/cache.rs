//! The request-scoped authentication cache.
//!
//! One [`AuthCache`] is owned exclusively by one login attempt; it is created
//! by the login step and dropped when the attempt completes or is cancelled.
//! The server-fetched records are held in [`Memo`] cells so "is this field
//! already fetched" is a type-level fact, and [`Memo::invalidate`] is the
//! only way a mutation (key migration, device recovery, password setup) can
//! force a refetch.

use std::future::Future;

use halcyon_core::{
    api::{Address, AuthApi, AuthResponse, KeySalt, UnprivatizationContext, User},
    ApiError,
};

/// A fetch-at-most-once cell.
pub(crate) enum Memo<T> {
    Empty,
    Fetched(T),
}

impl<T> Default for Memo<T> {
    fn default() -> Self {
        Memo::Empty
    }
}

impl<T> Memo<T> {
    pub(crate) fn get(&self) -> Option<&T> {
        match self {
            Memo::Empty => None,
            Memo::Fetched(value) => Some(value),
        }
    }

    /// Empties the cell; the next access refetches.
    pub(crate) fn invalidate(&mut self) {
        *self = Memo::Empty;
    }

    /// Returns the cached value, fetching it first if the cell is empty.
    pub(crate) async fn get_or_try_fill<E, Fut>(
        &mut self,
        fetch: impl FnOnce() -> Fut,
    ) -> Result<&T, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        if let Memo::Empty = self {
            *self = Memo::Fetched(fetch().await?);
        }
        match self {
            Memo::Fetched(value) => Ok(value),
            Memo::Empty => unreachable!("cell was just filled"),
        }
    }
}

/// The lazily-populated sub-cache of server records.
#[derive(Default)]
pub(crate) struct CacheData {
    pub(crate) user: Memo<User>,
    pub(crate) addresses: Memo<Vec<Address>>,
    pub(crate) salts: Memo<Vec<KeySalt>>,
    pub(crate) unprivatization: Memo<UnprivatizationContext>,
}

/// Mutable context threading authentication state through every step of one
/// login attempt.
pub struct AuthCache {
    pub(crate) username: String,
    pub(crate) login_password: String,
    pub(crate) auth_response: AuthResponse,
    /// Server-reported credential hashing scheme version; triggers a rehash
    /// during finalize when older than current.
    pub(crate) auth_version: u8,
    pub(crate) persistent: bool,
    /// Administrative override: no client-side key material is available, so
    /// unlock and salt fetches are skipped entirely.
    pub(crate) ignore_unlock: bool,
    /// Set while the server still expects a second factor.
    pub(crate) two_factor_pending: bool,
    pub(crate) data: CacheData,
}

impl AuthCache {
    pub(crate) fn new(
        username: String,
        login_password: String,
        auth_response: AuthResponse,
        auth_version: u8,
        persistent: bool,
        ignore_unlock: bool,
    ) -> Self {
        let two_factor_pending = auth_response.two_factor.enabled;
        Self {
            username,
            login_password,
            auth_response,
            auth_version,
            persistent,
            ignore_unlock,
            two_factor_pending,
            data: CacheData::default(),
        }
    }

    /// The user record, fetched at most once.
    pub(crate) async fn user(&mut self, api: &dyn AuthApi) -> Result<&User, ApiError> {
        self.data.user.get_or_try_fill(|| api.fetch_user()).await
    }

    /// Concurrent fan-out for the policy step: user and key salts.
    pub(crate) async fn user_and_salts(
        &mut self,
        api: &dyn AuthApi,
    ) -> Result<(&User, &Vec<KeySalt>), ApiError> {
        let CacheData { user, salts, .. } = &mut self.data;
        tokio::try_join!(
            user.get_or_try_fill(|| api.fetch_user()),
            salts.get_or_try_fill(|| api.fetch_key_salts()),
        )
    }

    /// Concurrent fan-out for password setup: user and addresses.
    pub(crate) async fn user_and_addresses(
        &mut self,
        api: &dyn AuthApi,
    ) -> Result<(&User, &Vec<Address>), ApiError> {
        let CacheData {
            user, addresses, ..
        } = &mut self.data;
        tokio::try_join!(
            user.get_or_try_fill(|| api.fetch_user()),
            addresses.get_or_try_fill(|| api.fetch_addresses()),
        )
    }
}
