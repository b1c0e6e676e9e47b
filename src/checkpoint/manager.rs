//! Persistence of checkpoints and session documents.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use crate::checkpoint::store::CheckpointStore;
use crate::checkpoint::types::{Checkpoint, CheckpointId, CheckpointResponse};
use crate::error::{Error, Result};
use crate::session::Session;
use crate::workflow::SessionId;

pub const CHECKPOINTS: &str = "checkpoints";
pub const SESSIONS: &str = "sessions";

/// Reads and writes checkpoint and session documents through a
/// [`CheckpointStore`].
///
/// Collection `checkpoints` is keyed by checkpoint id. Collection `sessions`
/// is keyed by session id and merge-updated, so the pointer to the current
/// checkpoint and the full session body live in the same document.
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store }
    }

    /// Store a checkpoint and point the session document at it.
    pub async fn persist(&self, session_id: SessionId, checkpoint: &Checkpoint) -> Result<()> {
        tracing::info!(
            session = %session_id.short(),
            checkpoint = %checkpoint.id,
            conflicts = checkpoint.conflicts.len(),
            "persisting checkpoint"
        );
        self.store
            .set(CHECKPOINTS, checkpoint.id.as_str(), serde_json::to_value(checkpoint)?)
            .await?;
        self.store
            .merge(
                SESSIONS,
                &session_id.to_string(),
                json!({
                    "current_checkpoint": checkpoint.id,
                    "status": "awaiting_response",
                    "updated_at": Utc::now(),
                }),
            )
            .await
    }

    pub async fn load(&self, id: &CheckpointId) -> Result<Option<Checkpoint>> {
        match self.store.get(CHECKPOINTS, id.as_str()).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Attach a response to a stored checkpoint and clear the session's
    /// pending pointer. Returns the updated checkpoint.
    ///
    /// # Errors
    /// - `CheckpointNotFound` if no checkpoint has this id
    /// - `UnknownAction` if the response names no offered option
    /// - `CheckpointAnswered` if a different action was already recorded
    pub async fn record_response(
        &self,
        id: &CheckpointId,
        response: CheckpointResponse,
    ) -> Result<Checkpoint> {
        let mut checkpoint = self
            .load(id)
            .await?
            .ok_or_else(|| Error::CheckpointNotFound(id.to_string()))?;

        if checkpoint.option(&response.action_id).is_none() {
            return Err(Error::UnknownAction {
                checkpoint: id.to_string(),
                action: response.action_id,
            });
        }
        if let Some(recorded) = &checkpoint.response {
            if recorded.action_id != response.action_id {
                return Err(Error::CheckpointAnswered {
                    checkpoint: id.to_string(),
                    action: recorded.action_id.clone(),
                });
            }
        }

        tracing::info!(checkpoint = %id, action = %response.action_id, "recording response");
        checkpoint.respond(response);
        self.store
            .set(CHECKPOINTS, id.as_str(), serde_json::to_value(&checkpoint)?)
            .await?;
        self.store
            .merge(
                SESSIONS,
                &checkpoint.session_id().to_string(),
                json!({
                    "current_checkpoint": Value::Null,
                    "status": "resuming",
                    "updated_at": Utc::now(),
                }),
            )
            .await?;
        Ok(checkpoint)
    }

    /// Merge the full session into its document.
    pub async fn save_session(&self, session: &Session) -> Result<()> {
        tracing::debug!(session = %session.id.short(), status = session.status(), "saving session");
        self.store
            .merge(
                SESSIONS,
                &session.id.to_string(),
                json!({
                    "current_checkpoint": session.pending_checkpoint.as_ref().map(|c| &c.id),
                    "status": session.status(),
                    "updated_at": session.updated_at,
                    "session": serde_json::to_value(session)?,
                }),
            )
            .await
    }

    pub async fn load_session(&self, id: SessionId) -> Result<Option<Session>> {
        let Some(doc) = self.store.get(SESSIONS, &id.to_string()).await? else {
            return Ok(None);
        };
        match doc.get("session") {
            Some(body) => Ok(Some(serde_json::from_value(body.clone())?)),
            None => Ok(None),
        }
    }

    /// Raw session document, including the bookkeeping fields.
    pub async fn session_document(&self, id: SessionId) -> Result<Option<Value>> {
        self.store.get(SESSIONS, &id.to_string()).await
    }

    /// Most recently created checkpoint of a session.
    pub async fn latest_checkpoint(&self, session_id: SessionId) -> Result<Option<Checkpoint>> {
        let mut latest: Option<Checkpoint> = None;
        for (_, value) in self.store.list(CHECKPOINTS).await? {
            let checkpoint: Checkpoint = serde_json::from_value(value)?;
            if checkpoint.session_id() != session_id {
                continue;
            }
            if latest
                .as_ref()
                .map_or(true, |l| checkpoint.created_at >= l.created_at)
            {
                latest = Some(checkpoint);
            }
        }
        Ok(latest)
    }
}
