use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::sync::watch;

use crate::api::{BusLocationProvider, HttpBusLocations, SimulatedBusLocations};
use crate::config::Config;
use crate::data::{seed_feedback, RouteCatalog};
use crate::error::Result;
use crate::feedback::FeedbackBoard;
use crate::io::{FileStore, KeyValueStore};
use crate::navigation::{self, Access, Screen};
use crate::session::Sessions;
use crate::structs::{Identity, Position};
use crate::tracker::{Poller, Snapshot};

/// Everything the handlers share. Built once in `main` and injected.
pub struct App {
    pub config: Config,
    pub routes: Arc<RouteCatalog>,
    pub sessions: Sessions,
    board: Mutex<FeedbackBoard>,
    pub provider: Arc<dyn BusLocationProvider>,
    pub http: reqwest::Client,
    trackers: Mutex<HashMap<i64, Poller>>,
    positions: Mutex<HashMap<i64, Position>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        let storage: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(&config.session_store_path));

        let provider: Arc<dyn BusLocationProvider> = match &config.bus_api_url {
            Some(url) => {
                log::info!("Using bus location backend at {}", url);
                Arc::new(HttpBusLocations::new(url, config.poll_interval)?)
            }
            None => {
                log::info!("Using simulated bus locations");
                Arc::new(SimulatedBusLocations::new(config.fetch_delay))
            }
        };

        Self::with_parts(config, storage, provider)
    }

    pub fn with_parts(
        config: Config,
        storage: Arc<dyn KeyValueStore>,
        provider: Arc<dyn BusLocationProvider>,
    ) -> Result<Self> {
        let routes = Arc::new(RouteCatalog::default());
        let board = FeedbackBoard::new(Arc::clone(&routes), config.status_policy).with_items(seed_feedback())?;

        Ok(Self {
            config,
            routes,
            sessions: Sessions::new(storage),
            board: Mutex::new(board),
            provider,
            http: reqwest::Client::new(),
            trackers: Mutex::new(HashMap::new()),
            positions: Mutex::new(HashMap::new()),
        })
    }

    pub fn identity(&self, chat: i64) -> Option<Identity> {
        self.sessions.current(chat).identity
    }

    /// Where a request for `screen` actually lands for this chat.
    pub fn land(&self, chat: i64, screen: Screen) -> Access {
        navigation::land(screen, &self.sessions.current(chat))
    }

    pub fn board(&self) -> MutexGuard<'_, FeedbackBoard> {
        lock(&self.board)
    }

    /// Starts (or retargets) the chat's poller. Returns a receiver only when a
    /// new poller was created, so the caller knows to attach a display.
    pub fn track(&self, chat: i64, route_id: &str) -> Option<watch::Receiver<Snapshot>> {
        let mut trackers = lock(&self.trackers);
        let mut created = None;
        let poller = trackers.entry(chat).or_insert_with(|| {
            let poller = Poller::new(Arc::clone(&self.provider), self.config.poll_interval);
            created = Some(poller.subscribe());
            poller
        });
        poller.start(route_id);
        created
    }

    pub fn refresh(&self, chat: i64) -> bool {
        lock(&self.trackers).get(&chat).and_then(Poller::refresh).is_some()
    }

    pub fn is_tracking(&self, chat: i64) -> bool {
        lock(&self.trackers).contains_key(&chat)
    }

    /// Tears down the chat's tracking view.
    pub fn stop_tracking(&self, chat: i64) {
        if lock(&self.trackers).remove(&chat).is_some() {
            log::info!("Stopped tracking for chat {}", chat);
        }
    }

    pub fn set_position(&self, chat: i64, pos: Position) {
        lock(&self.positions).insert(chat, pos);
    }

    pub fn position(&self, chat: i64) -> Option<Position> {
        lock(&self.positions).get(&chat).copied()
    }
}
