//! The `next()` transition policy.
//!
//! The whole post-auth routing decision is one ordered table of
//! `(predicate, target)` rows over a [`PolicyFacts`] snapshot. The first
//! matching row wins; an account matching no row is in one-password mode
//! with keys and derives its key passphrase from the login password.

use halcyon_core::api::{AuthApi, PasswordMode};

use crate::{cache::AuthCache, LoginError};

/// Everything the transition table is allowed to look at.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PolicyFacts {
    pub second_factor_pending: bool,
    pub ignore_unlock: bool,
    pub sso: bool,
    pub has_keys: bool,
    pub temporary_password: bool,
    pub requires_key_setup: bool,
    pub two_password_mode: bool,
}

impl PolicyFacts {
    /// Facts available before the user record is fetched. Sufficient for the
    /// rows that must not trigger a fetch (second factor, admin override).
    fn before_user_fetch(cache: &AuthCache) -> Self {
        Self {
            second_factor_pending: cache.two_factor_pending,
            ignore_unlock: cache.ignore_unlock,
            ..Self::default()
        }
    }
}

/// Where the flow goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    TwoFactor,
    Finalize,
    NewPassword,
    SetupPassword,
    Sso,
    Unlock,
    /// One-password mode: derive the key passphrase from the login password
    /// and finalize without a dedicated unlock step.
    DeriveAndFinalize,
}

type Predicate = fn(&PolicyFacts) -> bool;

/// Ordered policy rows. SSO accounts fork into the device-trust sub-flow
/// before any of the key-material rows apply.
pub(crate) const TRANSITIONS: &[(Predicate, Transition)] = &[
    (|f| f.second_factor_pending, Transition::TwoFactor),
    (|f| f.ignore_unlock, Transition::Finalize),
    (|f| f.sso, Transition::Sso),
    (|f| !f.has_keys && f.temporary_password, Transition::NewPassword),
    (|f| !f.has_keys && f.requires_key_setup, Transition::SetupPassword),
    (|f| !f.has_keys, Transition::Finalize),
    (|f| f.two_password_mode, Transition::Unlock),
];

pub(crate) fn next_transition(facts: &PolicyFacts) -> Transition {
    TRANSITIONS
        .iter()
        .find(|(predicate, _)| predicate(facts))
        .map(|(_, target)| *target)
        .unwrap_or(Transition::DeriveAndFinalize)
}

/// Computes the next transition, fetching `user` and `salts` (memoized,
/// concurrent) unless a pre-fetch row already decides the step.
pub(crate) async fn next(cache: &mut AuthCache, api: &dyn AuthApi) -> Result<Transition, LoginError> {
    let facts = if cache.two_factor_pending || cache.ignore_unlock {
        // Admin contexts cannot fetch key salts at all.
        PolicyFacts::before_user_fetch(cache)
    } else {
        let temporary_password = cache.auth_response.temporary_password;
        let two_password_mode = cache.auth_response.password_mode == PasswordMode::Two;
        let (user, _salts) = cache.user_and_salts(api).await?;
        PolicyFacts {
            second_factor_pending: false,
            ignore_unlock: false,
            sso: user.sso,
            has_keys: !user.keys.is_empty(),
            temporary_password: temporary_password || user.temporary_password,
            requires_key_setup: user.requires_key_setup,
            two_password_mode,
        }
    };
    Ok(next_transition(&facts))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts_from_bits(bits: u8) -> PolicyFacts {
        PolicyFacts {
            second_factor_pending: bits & 1 != 0,
            ignore_unlock: bits & 2 != 0,
            sso: bits & 4 != 0,
            has_keys: bits & 8 != 0,
            temporary_password: bits & 16 != 0,
            requires_key_setup: bits & 32 != 0,
            two_password_mode: bits & 64 != 0,
        }
    }

    /// Every combination of facts resolves to a transition; the table has no
    /// dead end.
    #[test]
    fn every_fact_combination_has_a_transition() {
        for bits in 0..128u8 {
            let facts = facts_from_bits(bits);
            // next_transition never panics and always yields a target.
            let _ = next_transition(&facts);
        }
    }

    /// The pending second factor dominates every other fact.
    #[test]
    fn second_factor_wins_over_everything() {
        for bits in 0..128u8 {
            let facts = facts_from_bits(bits | 1);
            assert_eq!(next_transition(&facts), Transition::TwoFactor);
        }
    }

    /// The admin override skips key handling regardless of account shape.
    #[test]
    fn ignore_unlock_short_circuits_to_finalize() {
        for bits in 0..128u8 {
            let facts = facts_from_bits((bits | 2) & !1);
            assert_eq!(next_transition(&facts), Transition::Finalize);
        }
    }

    /// SSO accounts fork into the device-trust sub-flow instead of the
    /// key-material rows.
    #[test]
    fn sso_forks_before_key_material_rows() {
        for bits in 0..128u8 {
            let facts = facts_from_bits((bits | 4) & !3);
            assert_eq!(next_transition(&facts), Transition::Sso);
        }
    }

    #[test]
    fn keyless_accounts_route_by_server_flags() {
        let base = PolicyFacts::default();

        assert_eq!(
            next_transition(&PolicyFacts {
                temporary_password: true,
                ..base
            }),
            Transition::NewPassword
        );
        assert_eq!(
            next_transition(&PolicyFacts {
                requires_key_setup: true,
                ..base
            }),
            Transition::SetupPassword
        );
        // No keys, nothing to set up: nothing to unlock either.
        assert_eq!(next_transition(&base), Transition::Finalize);
    }

    #[test]
    fn keyed_accounts_split_on_password_mode() {
        let keyed = PolicyFacts {
            has_keys: true,
            ..PolicyFacts::default()
        };
        assert_eq!(
            next_transition(&PolicyFacts {
                two_password_mode: true,
                ..keyed
            }),
            Transition::Unlock
        );
        assert_eq!(next_transition(&keyed), Transition::DeriveAndFinalize);
    }
}
