//! Server-side authentication state. Sessions live for the process
//! lifetime only and are never persisted.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use rand::rngs::OsRng;
use rand::RngCore;

use crate::record::{unix_now, UserRecord};

/// Length of a session id in hex characters.
pub const SESSION_ID_LEN: usize = 128;

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    /// Snapshot of the user record at login time.
    pub user: UserRecord,
    pub login_time: u64,
    pub last_activity: u64,
    pub operations_count: u64,
}

#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: BTreeMap<String, Session>,
}

impl SessionManager {
    pub fn new() -> SessionManager {
        SessionManager {
            sessions: BTreeMap::new(),
        }
    }

    fn generate_session_id() -> String {
        let mut bytes = [0u8; SESSION_ID_LEN / 2];
        OsRng.fill_bytes(&mut bytes);
        let mut id = String::with_capacity(SESSION_ID_LEN);
        for b in bytes.iter() {
            // infallible for String
            let _ = write!(id, "{:02x}", b);
        }
        id
    }

    /// Opens a session for an active user; inactive accounts cannot log in.
    pub fn create_session(&mut self, user: &UserRecord) -> Option<String> {
        if user.is_active != 1 {
            return None;
        }
        let session_id = Self::generate_session_id();
        let now = unix_now();
        self.sessions.insert(
            session_id.clone(),
            Session {
                session_id: session_id.clone(),
                user: user.clone(),
                login_time: now,
                last_activity: now,
                operations_count: 0,
            },
        );
        Some(session_id)
    }

    /// A session is valid while it exists and its user snapshot is active.
    pub fn validate_session(&self, session_id: &str) -> bool {
        match self.sessions.get(session_id) {
            Some(s) => s.user.is_active == 1,
            None => false,
        }
    }

    pub fn destroy_session(&mut self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    pub fn update_activity(&mut self, session_id: &str) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(s) => {
                s.last_activity = unix_now();
                s.operations_count += 1;
                true
            }
            None => false,
        }
    }

    pub fn get_session(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    pub fn active_count(&self) -> u64 {
        self.sessions.len() as u64
    }
}
