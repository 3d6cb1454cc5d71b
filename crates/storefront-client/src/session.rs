//! Persisted sign-in state.

use common::protocol::{AuthResponse, UserProfile};
use serde::{Deserialize, Serialize};

use crate::error::ClientResult;
use crate::storage::FileStore;

const SESSION_KEY: &str = "session";

/// Token pair plus the profile returned at sign-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub user: Option<UserProfile>,
}

impl From<AuthResponse> for Session {
    fn from(r: AuthResponse) -> Self {
        Self {
            access_token: r.access_token,
            refresh_token: r.refresh_token,
            user: Some(r.user),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    store: FileStore,
}

impl SessionStore {
    pub fn new(store: FileStore) -> Self {
        Self { store }
    }

    pub fn load(&self) -> ClientResult<Option<Session>> {
        self.store.get(SESSION_KEY)
    }

    pub fn save(&self, session: &Session) -> ClientResult<()> {
        self.store.set(SESSION_KEY, session)
    }

    pub fn clear(&self) -> ClientResult<()> {
        self.store.remove(SESSION_KEY)
    }
}
