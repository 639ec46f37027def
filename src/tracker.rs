use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};

use crate::api::BusLocationProvider;
use crate::error::Result;
use crate::structs::LocationFix;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Tracking { route_id: String },
}

/// What the display sees. `generation` is bumped on every start; `seq` is
/// the sequence number of the last fetch applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub generation: u64,
    pub seq: u64,
    pub route_id: Option<String>,
    pub fix: Option<LocationFix>,
    pub error: Option<String>,
}

/// Applies the result of fetch `seq`, issued for (`generation`, `route_id`).
/// Results for a superseded generation, a different route, or older than the
/// last applied fetch are dropped.
pub fn apply(
    tx: &watch::Sender<Snapshot>,
    generation: u64,
    seq: u64,
    route_id: &str,
    result: Result<LocationFix>,
) -> bool {
    tx.send_if_modified(|snap| {
        if snap.generation != generation || snap.route_id.as_deref() != Some(route_id) {
            log::debug!("Dropping stale result for {} (generation {})", route_id, generation);
            return false;
        }
        if seq <= snap.seq {
            log::debug!("Dropping out-of-order fetch {} for {} (have {})", seq, route_id, snap.seq);
            return false;
        }
        match result {
            Ok(fix) if fix.route_id == route_id => {
                snap.seq = seq;
                snap.fix = Some(fix);
                snap.error = None;
                true
            }
            Ok(fix) => {
                log::warn!("Provider answered {} for {}", fix.route_id, route_id);
                false
            }
            Err(e) => {
                snap.seq = seq;
                snap.error = Some(e.user_message());
                true
            }
        }
    })
}

/// Fixed-interval fetcher for one chat. Dropping it stops all scheduled fetches.
pub struct Poller {
    provider: Arc<dyn BusLocationProvider>,
    interval: Duration,
    tx: Arc<watch::Sender<Snapshot>>,
    /// Hands out fetch sequence numbers; never reset.
    next_seq: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

fn take_seq(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::SeqCst) + 1
}

impl Poller {
    pub fn new(provider: Arc<dyn BusLocationProvider>, interval: Duration) -> Self {
        let (tx, _) = watch::channel(Snapshot::default());
        Self {
            provider,
            interval,
            tx: Arc::new(tx),
            next_seq: Arc::new(AtomicU64::new(0)),
            task: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.tx.subscribe()
    }

    pub fn latest(&self) -> Snapshot {
        self.tx.borrow().clone()
    }

    pub fn state(&self) -> PollerState {
        match (&self.task, self.tx.borrow().route_id.clone()) {
            (Some(_), Some(route_id)) => PollerState::Tracking { route_id },
            _ => PollerState::Idle,
        }
    }

    /// Fetches now and then every interval. Any schedule for a previous
    /// route is aborted first.
    pub fn start(&mut self, route_id: &str) {
        if let Some(task) = self.task.take() {
            task.abort();
        }

        let mut generation = 0;
        self.tx.send_modify(|snap| {
            snap.generation += 1;
            generation = snap.generation;
            snap.route_id = Some(route_id.to_string());
            snap.fix = None;
            snap.error = None;
        });
        log::info!("Tracking {} (generation {})", route_id, generation);

        let provider = Arc::clone(&self.provider);
        let tx = Arc::clone(&self.tx);
        let next_seq = Arc::clone(&self.next_seq);
        let route_id = route_id.to_string();
        let mut interval_timer = time::interval(self.interval);
        interval_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.task = Some(tokio::spawn(async move {
            loop {
                interval_timer.tick().await;
                let seq = take_seq(&next_seq);
                log::debug!("Polling {} (fetch {})", route_id, seq);

                let result = provider.fetch(&route_id).await;
                if let Err(e) = &result {
                    log::warn!("Fetching location of {} failed: {}", route_id, e);
                }
                apply(&tx, generation, seq, &route_id, result);
            }
        }));
    }

    /// One extra fetch for the current route. Not cancelled by a route
    /// switch; its result is dropped if the route changed or a later fetch
    /// landed first.
    pub fn refresh(&self) -> Option<JoinHandle<bool>> {
        let (generation, route_id) = {
            let snap = self.tx.borrow();
            (snap.generation, snap.route_id.clone()?)
        };
        self.task.as_ref()?;

        let seq = take_seq(&self.next_seq);
        let provider = Arc::clone(&self.provider);
        let tx = Arc::clone(&self.tx);
        Some(tokio::spawn(async move {
            let result = provider.fetch(&route_id).await;
            apply(&tx, generation, seq, &route_id, result)
        }))
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
