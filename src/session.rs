use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::error::Result;
use crate::io::KeyValueStore;
use crate::structs::{Identity, Role};

/// Snapshot returned by [`SessionStore::current`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub identity: Option<Identity>,
    pub loading: bool,
}

impl SessionView {
    pub fn is_signed_in(&self) -> bool {
        self.identity.is_some()
    }

    pub fn is_admin(&self) -> bool {
        self.role() == Some(Role::Admin)
    }

    pub fn is_student(&self) -> bool {
        self.role() == Some(Role::Student)
    }

    fn role(&self) -> Option<Role> {
        self.identity.as_ref().map(|i| i.role)
    }
}

/// One signed-in identity persisted under a single storage key.
pub struct SessionStore {
    storage: Arc<dyn KeyValueStore>,
    key: String,
    identity: Option<Identity>,
    loading: bool,
}

impl SessionStore {
    /// Starts in the loading state; call [`rehydrate`](Self::rehydrate) before use.
    pub fn new(storage: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
            identity: None,
            loading: true,
        }
    }

    /// Opens and rehydrates in one go.
    pub fn open(storage: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        let mut store = Self::new(storage, key);
        store.rehydrate();
        store
    }

    /// Loads the persisted identity. Unreadable or malformed records are
    /// dropped and the session comes up signed out.
    pub fn rehydrate(&mut self) {
        self.identity = match self.storage.get(&self.key) {
            Ok(Some(raw)) => match serde_json::from_str::<Identity>(&raw) {
                Ok(identity) => Some(identity),
                Err(e) => {
                    log::warn!("Failed to parse stored identity under {}: {}", self.key, e);
                    if let Err(e) = self.storage.remove(&self.key) {
                        log::warn!("Failed to clear {}: {}", self.key, e);
                    }
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                log::warn!("Failed to read {}: {}", self.key, e);
                None
            }
        };
        self.loading = false;
    }

    /// Persists first; the in-memory identity only changes once storage agrees.
    pub fn sign_in(&mut self, identity: Identity) -> Result<()> {
        let raw = serde_json::to_string(&identity)?;
        self.storage.set(&self.key, &raw)?;
        log::info!("{} signed in as {:?}", identity.email, identity.role);
        self.identity = Some(identity);
        Ok(())
    }

    pub fn sign_out(&mut self) -> Result<()> {
        self.storage.remove(&self.key)?;
        if let Some(identity) = self.identity.take() {
            log::info!("{} signed out", identity.email);
        }
        Ok(())
    }

    pub fn current(&self) -> SessionView {
        SessionView {
            identity: self.identity.clone(),
            loading: self.loading,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn is_signed_in(&self) -> bool {
        self.identity.is_some()
    }

    pub fn is_admin(&self) -> bool {
        matches!(&self.identity, Some(i) if i.role == Role::Admin)
    }

    pub fn is_student(&self) -> bool {
        matches!(&self.identity, Some(i) if i.role == Role::Student)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Sessions keyed by chat, opened lazily from one shared store. Each chat has
/// its own lock; the registry lock is never held during storage I/O.
#[derive(Clone)]
pub struct Sessions {
    storage: Arc<dyn KeyValueStore>,
    open: Arc<Mutex<HashMap<i64, Arc<Mutex<SessionStore>>>>>,
}

impl Sessions {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            storage,
            open: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn key_for(chat: i64) -> String {
        format!("session:{}", chat)
    }

    fn session(&self, chat: i64) -> Arc<Mutex<SessionStore>> {
        if let Some(session) = lock(&self.open).get(&chat) {
            return Arc::clone(session);
        }

        let opened = Arc::new(Mutex::new(SessionStore::open(
            Arc::clone(&self.storage),
            Self::key_for(chat),
        )));
        // Another caller may have opened the same chat meanwhile; first one wins.
        Arc::clone(lock(&self.open).entry(chat).or_insert(opened))
    }

    /// Runs `f` against the chat's session, rehydrating it on first use.
    pub fn with<T>(&self, chat: i64, f: impl FnOnce(&mut SessionStore) -> T) -> T {
        let session = self.session(chat);
        let mut session = lock(&session);
        f(&mut session)
    }

    pub fn current(&self, chat: i64) -> SessionView {
        self.with(chat, |s| s.current())
    }
}
