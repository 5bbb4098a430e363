use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::model::{Event, Ms};

pub type ViewId = u64;

const REQUEST_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefetchReason {
    /// Periodic refresh while the view is open.
    Interval,
    /// The app came back to the foreground.
    Foreground,
    /// A booking was confirmed, here or by another client.
    BookingConfirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefetchRequest {
    pub view: ViewId,
    pub reason: RefetchReason,
}

struct ViewState {
    fetched_at: Option<Ms>,
    cancel: CancellationToken,
}

/// Keeps slot views fresh: a periodic re-fetch per open view, an immediate
/// one on foreground, and a delayed one after a booking.
///
/// Requests arrive on the receiver returned by [`FreshnessMonitor::new`].
/// Every timer hangs off one root token, so [`FreshnessMonitor::shutdown`]
/// stops them all, and [`FreshnessMonitor::teardown_view`] stops one view's.
pub struct FreshnessMonitor {
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    tx: mpsc::Sender<RefetchRequest>,
    root: CancellationToken,
    views: HashMap<ViewId, ViewState>,
    next_view: ViewId,
}

async fn send_unless_cancelled(
    tx: &mpsc::Sender<RefetchRequest>,
    cancel: &CancellationToken,
    request: RefetchRequest,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(request) => sent.is_ok(),
    }
}

impl FreshnessMonitor {
    pub fn new(config: SessionConfig, clock: Arc<dyn Clock>) -> (Self, mpsc::Receiver<RefetchRequest>) {
        let (tx, rx) = mpsc::channel(REQUEST_BUFFER);
        let monitor = Self {
            config,
            clock,
            tx,
            root: CancellationToken::new(),
            views: HashMap::new(),
            next_view: 1,
        };
        (monitor, rx)
    }

    /// Start tracking a view and its periodic refresh.
    pub fn open_view(&mut self) -> ViewId {
        let view = self.next_view;
        self.next_view += 1;
        let cancel = self.root.child_token();

        let period = self.config.refresh_interval;
        let tx = self.tx.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticks.tick() => {}
                }
                let request = RefetchRequest {
                    view,
                    reason: RefetchReason::Interval,
                };
                if !send_unless_cancelled(&tx, &token, request).await {
                    break;
                }
            }
            debug!(view, "refresh timer stopped");
        });

        self.views.insert(
            view,
            ViewState {
                fetched_at: None,
                cancel,
            },
        );
        view
    }

    pub fn is_active(&self, view: ViewId) -> bool {
        self.views.contains_key(&view)
    }

    pub fn record_fetch(&mut self, view: ViewId, fetched_at: Ms) {
        if let Some(state) = self.views.get_mut(&view) {
            state.fetched_at = Some(fetched_at);
        }
    }

    pub fn fetched_at(&self, view: ViewId) -> Option<Ms> {
        self.views.get(&view).and_then(|s| s.fetched_at)
    }

    /// Advisory. A view that never loaded counts as stale.
    pub fn is_stale(&self, view: ViewId) -> bool {
        let stale_ms = self.config.stale_after.as_millis() as Ms;
        match self.fetched_at(view) {
            Some(at) => self.clock.now_ms() - at > stale_ms,
            None => true,
        }
    }

    /// Re-fetch every open view now.
    pub fn notify_foreground(&self) {
        for (&view, state) in &self.views {
            if state.cancel.is_cancelled() {
                continue;
            }
            let request = RefetchRequest {
                view,
                reason: RefetchReason::Foreground,
            };
            // A full buffer already holds a pending re-fetch.
            if self.tx.try_send(request).is_err() {
                debug!(view, "foreground refetch dropped");
            }
        }
    }

    /// Re-fetch every open view once, after the post-booking delay.
    pub fn notify_booking_confirmed(&self) {
        for (&view, state) in &self.views {
            self.schedule_once(view, &state.cancel, self.config.post_booking_refetch_delay);
        }
    }

    fn schedule_once(&self, view: ViewId, cancel: &CancellationToken, delay: Duration) {
        let tx = self.tx.clone();
        let token = cancel.child_token();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let request = RefetchRequest {
                view,
                reason: RefetchReason::BookingConfirmed,
            };
            send_unless_cancelled(&tx, &token, request).await;
        });
    }

    /// Watch a vendor's event stream for bookings made elsewhere; each one
    /// triggers a delayed re-fetch of `view`.
    pub fn follow_events(&self, view: ViewId, mut events: broadcast::Receiver<Event>) {
        let Some(state) = self.views.get(&view) else {
            return;
        };
        let token = state.cancel.clone();
        let tx = self.tx.clone();
        let delay = self.config.post_booking_refetch_delay;
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(event) if event.creates_appointment() => {}
                    Ok(_) => continue,
                    // Missed some events; one of them may have been a booking.
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                let request = RefetchRequest {
                    view,
                    reason: RefetchReason::BookingConfirmed,
                };
                if !send_unless_cancelled(&tx, &token, request).await {
                    break;
                }
            }
        });
    }

    /// Stop every timer of `view`. Nothing for it is sent afterwards.
    pub fn teardown_view(&mut self, view: ViewId) {
        if let Some(state) = self.views.remove(&view) {
            state.cancel.cancel();
        }
    }

    pub fn shutdown(&mut self) {
        self.root.cancel();
        self.views.clear();
    }
}

impl Drop for FreshnessMonitor {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
