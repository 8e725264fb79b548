//! Cooperative polling for peer approval of an inactive trusted device.
//!
//! The poller re-checks the device record on a fixed interval, skips checks
//! while the document is hidden, and delivers at most one `Approved` update.
//! Cancellation is structured: the handle owns a [`CancellationToken`], and a
//! poll run that loses the race to cancellation delivers nothing, so a stale
//! in-flight result can never override a newer outcome.

use std::{sync::Arc, time::Duration};

use halcyon_core::api::{AuthApi, DeviceState, TrustedDevice};
use halcyon_core::DeviceId;
use log::debug;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{DeviceTrustErrorKind, LoginError};

pub(crate) const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Consecutive checks suppressed while the document is not visible. After
/// that many skips one check goes through even in the background, so a
/// long-hidden tab still converges.
const MAX_HIDDEN_SKIPS: u32 = 3;

/// Tells the poller whether the hosting document is in the foreground.
pub trait VisibilityProbe: Send + Sync {
    #[allow(missing_docs)]
    fn is_visible(&self) -> bool;
}

/// Probe for headless hosts without a visibility notion.
pub struct AlwaysVisible;

impl VisibilityProbe for AlwaysVisible {
    fn is_visible(&self) -> bool {
        true
    }
}

/// What the poll loop last observed.
#[derive(Debug, Clone)]
pub enum PollUpdate {
    /// The device is still awaiting approval.
    Pending,
    /// A peer device approved; the record carries the released secret.
    Approved(TrustedDevice),
    /// The record disappeared or went invalid; the sub-flow must recreate it.
    Lost,
}

/// Caller-facing handle to a running poll loop. Dropping the handle (or
/// calling [`unsubscribe`](Self::unsubscribe)) cancels the loop.
pub struct PollHandle {
    token: CancellationToken,
    receiver: watch::Receiver<PollUpdate>,
}

impl PollHandle {
    /// Stops the poll loop. Invoked on success and when the sub-flow is
    /// abandoned; idempotent.
    pub fn unsubscribe(&self) {
        self.token.cancel();
    }

    /// Waits for a terminal update: the approved device record, or `None`
    /// when the record was lost or the poller was unsubscribed.
    pub async fn wait(&mut self) -> Option<TrustedDevice> {
        loop {
            match &*self.receiver.borrow_and_update() {
                PollUpdate::Approved(device) => return Some(device.clone()),
                PollUpdate::Lost => return None,
                PollUpdate::Pending => {}
            }
            if self.receiver.changed().await.is_err() {
                return None;
            }
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Spawns the poll loop for a device record.
pub(crate) fn spawn_poller(
    api: Arc<dyn AuthApi>,
    device_id: DeviceId,
    visibility: Arc<dyn VisibilityProbe>,
) -> PollHandle {
    let token = CancellationToken::new();
    let (sender, receiver) = watch::channel(PollUpdate::Pending);
    let loop_token = token.clone();

    tokio::spawn(async move {
        // First check one full period in; the caller has just fetched the
        // record itself.
        let start = tokio::time::Instant::now() + POLL_INTERVAL;
        let mut interval = tokio::time::interval_at(start, POLL_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut hidden_skips = 0u32;

        loop {
            tokio::select! {
                _ = loop_token.cancelled() => return,
                _ = interval.tick() => {}
            }

            // Foreground-only polling, with a cap so hidden tabs still make
            // progress eventually.
            if !visibility.is_visible() && hidden_skips < MAX_HIDDEN_SKIPS {
                hidden_skips += 1;
                continue;
            }
            hidden_skips = 0;

            let result = tokio::select! {
                _ = loop_token.cancelled() => return,
                result = api.fetch_trusted_device(device_id) => result,
            };

            match result {
                Ok(device) if device.state == DeviceState::Active => {
                    let _ = sender.send(PollUpdate::Approved(device));
                    return;
                }
                Ok(_) => {
                    let _ = sender.send(PollUpdate::Pending);
                }
                Err(err) => match LoginError::from(err) {
                    LoginError::DeviceTrust(
                        DeviceTrustErrorKind::Invalid | DeviceTrustErrorKind::NonExisting,
                    ) => {
                        // Best-effort cleanup of the dead record.
                        if let Err(err) = api.delete_trusted_device(device_id).await {
                            debug!("failed to delete invalid device record: {err}");
                        }
                        let _ = sender.send(PollUpdate::Lost);
                        return;
                    }
                    LoginError::DeviceTrust(DeviceTrustErrorKind::Inactive) => {}
                    other => debug!("device poll failed, will retry: {other}"),
                },
            }
        }
    });

    PollHandle { token, receiver }
}
