//! Listening watchdog.
//!
//! Some platforms quietly end continuous recognition after a stretch of
//! silence: no error, no result, just an `Ended` that may or may not arrive.
//! [`ListeningWatchdog`] ticks on a fixed interval while continuous mode is
//! on, and the controller asks it what to do with each tick via
//! [`ListeningWatchdog::assess`]. The watchdog never touches the speech port
//! itself; restarting is the controller's job.
//!
//! # Design
//!
//! One cancellable ticker task plus at most one pending one-shot retry. Both
//! deliver [`WatchdogEvent`]s through the controller's internal event channel,
//! so every decision is taken against the controller's current state rather
//! than the state at the time the timer was set.

use crate::config::WatchdogConfig;
use crate::pipeline::messages::TurnEvent;
use crate::pipeline::state::TurnState;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Timer events delivered to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogEvent {
    /// Periodic liveness check.
    Tick,
    /// Backoff after a failed restart elapsed.
    Retry,
}

/// What the controller should do with a watchdog event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogAction {
    /// Leave the speech port alone.
    Noop,
    /// Stop, then start speech input again.
    Restart,
}

/// Periodic recovery for silently terminated listening.
pub struct ListeningWatchdog {
    interval: Duration,
    retry_backoff: Duration,
    events_tx: mpsc::UnboundedSender<TurnEvent>,
    cancel: CancellationToken,
    ticker: Option<CancellationToken>,
    retry: Option<CancellationToken>,
}

impl ListeningWatchdog {
    /// Create a disarmed watchdog. Timers are children of `cancel`.
    pub fn new(
        config: &WatchdogConfig,
        events_tx: mpsc::UnboundedSender<TurnEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            interval: Duration::from_millis(config.interval_ms.max(1)),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms.max(1)),
            events_tx,
            cancel,
            ticker: None,
            retry: None,
        }
    }

    /// Decide how to handle a tick or retry.
    ///
    /// Only a `Listening` controller whose input has gone quiet is restarted.
    /// `Speaking` and `Processing` hold the microphone closed on purpose.
    pub fn assess(state: TurnState, input_active: bool) -> WatchdogAction {
        match state {
            TurnState::Listening if !input_active => WatchdogAction::Restart,
            TurnState::Listening
            | TurnState::Idle
            | TurnState::Processing
            | TurnState::Speaking => WatchdogAction::Noop,
        }
    }

    /// Start ticking. Arming an armed watchdog does nothing.
    pub fn arm(&mut self) {
        if self.is_armed() {
            return;
        }
        let token = self.cancel.child_token();
        let tx = self.events_tx.clone();
        let period = self.interval;
        info!(interval_ms = period.as_millis() as u64, "listening watchdog armed");
        tokio::spawn(run_ticker(period, tx, token.clone()));
        self.ticker = Some(token);
    }

    /// Stop ticking and drop any pending retry.
    pub fn disarm(&mut self) {
        if let Some(token) = self.ticker.take() {
            token.cancel();
            info!("listening watchdog disarmed");
        }
        self.cancel_retry();
    }

    /// Whether the ticker is running.
    pub fn is_armed(&self) -> bool {
        self.ticker.as_ref().is_some_and(|t| !t.is_cancelled())
    }

    /// Schedule a [`WatchdogEvent::Retry`] after the backoff.
    ///
    /// Returns `false` when disarmed or a retry is already pending.
    pub fn schedule_retry(&mut self) -> bool {
        if !self.is_armed() || self.retry_pending() {
            return false;
        }
        let token = self.cancel.child_token();
        let tx = self.events_tx.clone();
        let backoff = self.retry_backoff;
        debug!(backoff_ms = backoff.as_millis() as u64, "listening restart retry scheduled");
        let task_token = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = task_token.cancelled() => {}
                () = tokio::time::sleep(backoff) => {
                    let _ = tx.send(TurnEvent::Watchdog(WatchdogEvent::Retry));
                }
            }
        });
        self.retry = Some(token);
        true
    }

    /// Whether a retry is waiting to fire.
    pub fn retry_pending(&self) -> bool {
        self.retry.as_ref().is_some_and(|t| !t.is_cancelled())
    }

    /// Mark the pending retry as delivered.
    pub fn retry_fired(&mut self) {
        self.retry = None;
    }

    fn cancel_retry(&mut self) {
        if let Some(token) = self.retry.take() {
            token.cancel();
        }
    }
}

impl Drop for ListeningWatchdog {
    fn drop(&mut self) {
        self.disarm();
    }
}

async fn run_ticker(
    period: Duration,
    tx: mpsc::UnboundedSender<TurnEvent>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                if tx.send(TurnEvent::Watchdog(WatchdogEvent::Tick)).is_err() {
                    // Controller gone.
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn watchdog() -> (ListeningWatchdog, mpsc::UnboundedReceiver<TurnEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = WatchdogConfig {
            interval_ms: 20_000,
            retry_backoff_ms: 2_000,
        };
        (ListeningWatchdog::new(&config, tx, CancellationToken::new()), rx)
    }

    #[test]
    fn restarts_only_quiet_listening() {
        use TurnState::*;
        assert_eq!(ListeningWatchdog::assess(Listening, false), WatchdogAction::Restart);
        assert_eq!(ListeningWatchdog::assess(Listening, true), WatchdogAction::Noop);
        for state in [Idle, Processing, Speaking] {
            assert_eq!(ListeningWatchdog::assess(state, false), WatchdogAction::Noop);
            assert_eq!(ListeningWatchdog::assess(state, true), WatchdogAction::Noop);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn armed_watchdog_ticks_after_interval() {
        let (mut wd, mut rx) = watchdog();
        wd.arm();
        assert!(wd.is_armed());

        let early = tokio::time::timeout(Duration::from_secs(19), rx.recv()).await;
        assert!(early.is_err(), "no tick before the interval");

        let ev = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("tick within interval")
            .expect("channel open");
        assert!(matches!(ev, TurnEvent::Watchdog(WatchdogEvent::Tick)));
    }

    #[tokio::test(start_paused = true)]
    async fn disarmed_watchdog_is_silent() {
        let (mut wd, mut rx) = watchdog();
        wd.arm();
        wd.disarm();
        assert!(!wd.is_armed());
        let res = tokio::time::timeout(Duration::from_secs(60), rx.recv()).await;
        assert!(res.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_fires_once_after_backoff() {
        let (mut wd, mut rx) = watchdog();
        wd.arm();
        assert!(wd.schedule_retry());
        assert!(!wd.schedule_retry(), "only one retry pending");

        let ev = tokio::time::timeout(Duration::from_millis(2_500), rx.recv())
            .await
            .expect("retry within backoff")
            .expect("channel open");
        assert!(matches!(ev, TurnEvent::Watchdog(WatchdogEvent::Retry)));
        wd.retry_fired();
        assert!(!wd.retry_pending());
        assert!(wd.schedule_retry());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_requires_armed_watchdog() {
        let (mut wd, _rx) = watchdog();
        assert!(!wd.schedule_retry());
    }

    #[tokio::test(start_paused = true)]
    async fn disarm_cancels_pending_retry() {
        let (mut wd, mut rx) = watchdog();
        wd.arm();
        assert!(wd.schedule_retry());
        wd.disarm();
        let res = tokio::time::timeout(Duration::from_secs(30), rx.recv()).await;
        assert!(res.is_err());
    }
}
