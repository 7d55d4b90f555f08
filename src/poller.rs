//! Background payment status tracking.
//!
//! A spawned task polls the payment on a fixed interval, starting immediately,
//! and publishes a [`PollState`] through a `watch` channel. The timer stops once
//! a terminal status is seen; [`PollerHandle::refresh`] polls right away and
//! re-arms it. Dropping the handle aborts the task, so a response that arrives
//! afterwards is never published.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::api::PaymentApi;
use crate::{Payment, Result, StorefrontError};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2500);

#[derive(Clone, Debug, Default)]
pub struct PollState {
    pub payment: Option<Payment>,
    pub loading: bool,
    /// Message from the last failed poll. Cleared by the next successful one.
    pub error: Option<String>,
    /// Whether the timer is running.
    pub active: bool,
    pub polls: u64,
}

impl PollState {
    pub fn is_settled(&self) -> bool {
        self.payment.as_ref().is_some_and(|p| p.status.is_terminal())
    }
}

#[derive(Debug)]
enum Command {
    Refresh,
}

pub struct PaymentPoller<A: ?Sized> {
    api: Arc<A>,
    payment_id: i64,
    interval: Duration,
}

impl<A: PaymentApi + ?Sized + 'static> PaymentPoller<A> {
    pub fn new(api: Arc<A>, payment_id: i64) -> Self {
        Self { api, payment_id, interval: DEFAULT_POLL_INTERVAL }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn spawn(self) -> PollerHandle<A> {
        let (state_tx, state_rx) = watch::channel(PollState { active: true, ..PollState::default() });
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(Arc::clone(&self.api), self.payment_id, self.interval, state_tx, command_rx));
        PollerHandle { api: self.api, payment_id: self.payment_id, state: state_rx, commands: command_tx, task }
    }
}

#[instrument(skip(api, interval, state, commands))]
async fn run<A: PaymentApi + ?Sized>(
    api: Arc<A>,
    payment_id: i64,
    interval: Duration,
    state: watch::Sender<PollState>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut armed = true;

    loop {
        tokio::select! {
            _ = ticker.tick(), if armed => {}
            command = commands.recv() => match command {
                Some(Command::Refresh) => {
                    debug!("manual refresh");
                    armed = true;
                    ticker.reset();
                }
                None => break,
            },
        }

        armed = poll_once(api.as_ref(), payment_id, &state).await;
        state.send_modify(|s| s.active = armed);
        if !armed {
            info!("payment settled, polling stopped");
        }
    }
}

/// Returns whether polling should continue.
async fn poll_once<A: PaymentApi + ?Sized>(api: &A, payment_id: i64, state: &watch::Sender<PollState>) -> bool {
    state.send_modify(|s| s.loading = true);
    match api.get_payment(payment_id).await {
        Ok(payment) => {
            let terminal = payment.status.is_terminal();
            debug!(status = %payment.status, "payment polled");
            state.send_modify(|s| {
                s.payment = Some(payment);
                s.error = None;
                s.loading = false;
                s.polls += 1;
            });
            !terminal
        }
        Err(e) => {
            warn!(error = %e, "payment poll failed");
            state.send_modify(|s| {
                s.error = Some(e.user_message());
                s.loading = false;
                s.polls += 1;
            });
            true
        }
    }
}

/// Owns the polling task.
pub struct PollerHandle<A: ?Sized> {
    api: Arc<A>,
    payment_id: i64,
    state: watch::Receiver<PollState>,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl<A: PaymentApi + ?Sized> PollerHandle<A> {
    pub fn payment_id(&self) -> i64 { self.payment_id }

    pub fn state(&self) -> PollState { self.state.borrow().clone() }

    pub fn subscribe(&self) -> watch::Receiver<PollState> { self.state.clone() }

    /// Polls now and restarts the timer.
    pub fn refresh(&self) {
        if self.commands.send(Command::Refresh).is_err() {
            warn!(payment_id = self.payment_id, "poller task is gone");
        }
    }

    /// Asks the dummy gateway to confirm the payment, then refreshes.
    #[instrument(skip(self), fields(payment_id = self.payment_id))]
    pub async fn simulate_paid(&self) -> Result<()> {
        let simulatable = self.state.borrow().payment.as_ref().map(Payment::can_simulate);
        match simulatable {
            None => return Err(StorefrontError::PaymentNotLoaded),
            Some(true) => {}
            Some(false) => return Err(StorefrontError::NotDummyProvider),
        }
        self.api.simulate_paid(self.payment_id).await?;
        info!("dummy payment confirmation sent");
        self.refresh();
        Ok(())
    }

    /// Resolves with the payment once it reaches a terminal status, or `None`
    /// if the task stops first.
    pub async fn wait_until_settled(&self) -> Option<Payment> {
        let mut rx = self.state.clone();
        loop {
            let settled = {
                let state = rx.borrow_and_update();
                state.payment.as_ref().filter(|p| p.status.is_terminal()).cloned()
            };
            if settled.is_some() {
                return settled;
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }
}

impl<A: ?Sized> Drop for PollerHandle<A> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl<A: ?Sized> std::fmt::Debug for PollerHandle<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollerHandle").field("payment_id", &self.payment_id).field("state", &*self.state.borrow()).finish()
    }
}
