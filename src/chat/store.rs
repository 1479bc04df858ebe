use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    chat::models::{ChatMessage, ChatSession, DEFAULT_TITLE},
    error::{AppError, AppResult},
};

/// In-memory session and message records. Deleted sessions stay in the map
/// flagged as deleted and behave as missing.
#[derive(Default)]
pub struct ChatStore {
    sessions: DashMap<Uuid, ChatSession>,
    messages: DashMap<Uuid, Vec<ChatMessage>>,
}

impl ChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_session(&self, user_id: String, title: Option<String>) -> ChatSession {
        let now = Utc::now();
        let session = ChatSession {
            id: Uuid::new_v4(),
            user_id,
            title: title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            favorite: false,
            deleted: false,
            created_at: now,
            updated_at: now,
        };
        self.sessions.insert(session.id, session.clone());
        session
    }

    /// Live sessions of a user, most recently updated first.
    pub fn list_sessions(&self, user_id: &str, favorite: Option<bool>) -> Vec<ChatSession> {
        let mut sessions: Vec<ChatSession> = self
            .sessions
            .iter()
            .filter(|s| !s.deleted && s.user_id == user_id)
            .filter(|s| favorite.is_none_or(|f| s.favorite == f))
            .map(|s| s.value().clone())
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions
    }

    pub fn rename(&self, id: Uuid, title: String) -> AppResult<ChatSession> {
        self.update(id, |session| session.title = title)
    }

    pub fn set_favorite(&self, id: Uuid, favorite: bool) -> AppResult<ChatSession> {
        self.update(id, |session| session.favorite = favorite)
    }

    pub fn soft_delete(&self, id: Uuid) -> AppResult<()> {
        self.update(id, |session| session.deleted = true).map(|_| ())
    }

    pub fn add_message(
        &self,
        session_id: Uuid,
        created_by: String,
        content: String,
        context: Option<Value>,
    ) -> AppResult<ChatMessage> {
        self.ensure_live(session_id)?;

        let message = ChatMessage {
            id: Uuid::new_v4(),
            session_id,
            created_by,
            content,
            context,
            created_at: Utc::now(),
        };
        self.messages
            .entry(session_id)
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    /// One zero-based page of a session's messages in creation order, plus the
    /// total message count.
    pub fn list_messages(
        &self,
        session_id: Uuid,
        page: usize,
        size: usize,
    ) -> AppResult<(Vec<ChatMessage>, usize)> {
        self.ensure_live(session_id)?;

        let size = size.max(1);
        let Some(messages) = self.messages.get(&session_id) else {
            return Ok((Vec::new(), 0));
        };

        let items = messages
            .iter()
            .skip(page.saturating_mul(size))
            .take(size)
            .cloned()
            .collect();
        Ok((items, messages.len()))
    }

    fn ensure_live(&self, id: Uuid) -> AppResult<()> {
        match self.sessions.get(&id) {
            Some(session) if !session.deleted => Ok(()),
            _ => Err(AppError::SessionNotFound),
        }
    }

    fn update<F>(&self, id: Uuid, apply: F) -> AppResult<ChatSession>
    where
        F: FnOnce(&mut ChatSession),
    {
        let mut entry = self
            .sessions
            .get_mut(&id)
            .filter(|s| !s.deleted)
            .ok_or(AppError::SessionNotFound)?;
        apply(&mut entry);
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }
}
