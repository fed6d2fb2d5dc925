/*
 * Copyright 2025 Paul Moore Parks and contributors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Operator session management.
//!
//! Sessions are keyed by `(terminal_id, operator_id)` and gate every kernel
//! mutation: `validate_session` runs at the head of each operation. Lookups
//! are constant-time; there are no suspension points here.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::info;

use crate::error::KernelError;

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub terminal_id: String,
    pub operator_id: String,
    pub created_utc: DateTime<Utc>,
    pub closed: bool,
}

/// Issues, validates, and closes operator sessions.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Session>>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a session for a terminal/operator pair. Blank identifiers are
    /// rejected.
    pub fn create_session(
        &self,
        terminal_id: &str,
        operator_id: &str,
    ) -> Result<String, KernelError> {
        if terminal_id.trim().is_empty() {
            return Err(KernelError::InvalidArgument(
                "Terminal ID must not be blank".to_string(),
            ));
        }
        if operator_id.trim().is_empty() {
            return Err(KernelError::InvalidArgument(
                "Operator ID must not be blank".to_string(),
            ));
        }

        let session_id = format!(
            "sess_{}",
            uuid::Uuid::new_v4().simple().to_string()[..8].to_uppercase()
        );
        let session = Session {
            id: session_id.clone(),
            terminal_id: terminal_id.to_string(),
            operator_id: operator_id.to_string(),
            created_utc: Utc::now(),
            closed: false,
        };

        let mut sessions = self.sessions.write().expect("session registry poisoned");
        sessions.insert(session_id.clone(), session);
        info!(session_id = %session_id, terminal_id, operator_id, "session created");
        Ok(session_id)
    }

    /// Fails when the session is unknown or closed. Called at the head of
    /// every kernel mutation.
    pub fn validate_session(&self, session_id: &str) -> Result<(), KernelError> {
        let sessions = self.sessions.read().expect("session registry poisoned");
        match sessions.get(session_id) {
            None => Err(KernelError::InvalidArgument(format!(
                "Unknown session '{session_id}'"
            ))),
            Some(session) if session.closed => Err(KernelError::IllegalState(format!(
                "Session '{session_id}' is closed"
            ))),
            Some(_) => Ok(()),
        }
    }

    /// Terminal transition. Re-closing a closed session is a no-op; an
    /// unknown session still fails.
    pub fn close_session(&self, session_id: &str) -> Result<(), KernelError> {
        let mut sessions = self.sessions.write().expect("session registry poisoned");
        let session = sessions.get_mut(session_id).ok_or_else(|| {
            KernelError::InvalidArgument(format!("Unknown session '{session_id}'"))
        })?;
        if !session.closed {
            session.closed = true;
            info!(session_id, "session closed");
        }
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        let sessions = self.sessions.read().expect("session registry poisoned");
        sessions.get(session_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_validate() {
        let manager = SessionManager::new();
        let id = manager.create_session("TERM1", "OP1").unwrap();
        assert!(id.starts_with("sess_"));
        manager.validate_session(&id).unwrap();
    }

    #[test]
    fn blank_identifiers_rejected() {
        let manager = SessionManager::new();
        assert!(manager.create_session("", "OP1").is_err());
        assert!(manager.create_session("TERM1", "   ").is_err());
    }

    #[test]
    fn unknown_session_rejected() {
        let manager = SessionManager::new();
        assert!(manager.validate_session("sess_NOPE").is_err());
    }

    #[test]
    fn close_is_idempotent_and_blocks_use() {
        let manager = SessionManager::new();
        let id = manager.create_session("TERM1", "OP1").unwrap();
        manager.close_session(&id).unwrap();
        manager.close_session(&id).unwrap();
        let err = manager.validate_session(&id).unwrap_err();
        assert!(err.to_string().contains("closed"));
    }
}
