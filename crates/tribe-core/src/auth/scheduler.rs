use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::session::{SessionService, WeakSession};

/// Recurring timer that renews the access token before it expires,
/// independent of request traffic. At most one timer runs per session.
pub struct RenewalScheduler {
    period: Duration,
    refresh_on_start: bool,
    handle: Mutex<Option<JoinHandle<()>>>,
    ticks: Arc<AtomicU64>,
}

impl RenewalScheduler {
    pub fn new(period: Duration, refresh_on_start: bool) -> Self {
        Self {
            period,
            refresh_on_start,
            handle: Mutex::new(None),
            ticks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start the timer unless one is already running.
    pub fn start(&self, session: WeakSession) -> bool {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Token renewal already scheduled");
            return false;
        }

        info!(interval_secs = self.period.as_secs(), "Scheduling token renewal");
        *handle = Some(tokio::spawn(run(
            session,
            self.period,
            self.refresh_on_start,
            Arc::clone(&self.ticks),
        )));
        true
    }

    pub fn stop(&self) -> bool {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        match handle.take() {
            Some(h) => {
                h.abort();
                info!("Token renewal stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Number of timer ticks so far, across restarts.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

impl Drop for RenewalScheduler {
    fn drop(&mut self) {
        let handle = self.handle.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(h) = handle.take() {
            h.abort();
        }
    }
}

async fn run(session: WeakSession, period: Duration, refresh_on_start: bool, ticks: Arc<AtomicU64>) {
    if refresh_on_start {
        // catch tokens that expired while nothing was running
        if let Some(session) = session.upgrade() {
            if session.is_authenticated() {
                if let Err(e) = session.refresh_token().await {
                    warn!(error = %e, "Initial token renewal failed");
                }
            }
        }
    }

    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        ticks.fetch_add(1, Ordering::Relaxed);

        let Some(session) = session.upgrade() else {
            debug!("Session dropped, stopping token renewal");
            return;
        };
        renew(&session).await;
    }
}

async fn renew(session: &SessionService) {
    if !session.is_authenticated() {
        debug!("No session, skipping renewal");
        return;
    }
    match session.refresh_token().await {
        Ok(_) => info!("Token automatically refreshed"),
        Err(e) => {
            warn!(error = %e, "Automatic token refresh failed");
            session.logout().await;
            session.require_login();
        }
    }
}
