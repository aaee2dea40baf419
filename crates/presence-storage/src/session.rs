use crate::{HostStorage, StorageError};
use presence_core::{NotificationSettings, Session, UserRecord};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

pub const USER_KEY: &str = "user";
pub const NOTIFICATION_SETTINGS_KEY: &str = "notificationSettings";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("corrupt {key} record: {reason}")]
    Corrupt { key: &'static str, reason: String },
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("storage task failed: {0}")]
    Join(String),
}

/// Owner of the signed-in identity. Reads and writes go through the host
/// storage on the blocking pool so the event loop never waits on disk.
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn HostStorage>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn HostStorage>) -> Self {
        Self { storage }
    }

    /// The active session, or `None` when signed out. Storage failures and
    /// corrupt records are logged and read as signed out.
    pub async fn current(&self) -> Option<Session> {
        match self.load_user().await {
            Ok(user) => user.and_then(|user| user.session()),
            Err(err) => {
                warn!(event = "session_read_failed", error = %err);
                None
            }
        }
    }

    pub async fn load_user(&self) -> Result<Option<UserRecord>, SessionError> {
        let raw = self.read(USER_KEY).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let user = serde_json::from_str::<UserRecord>(&raw).map_err(|err| {
            SessionError::Corrupt {
                key: USER_KEY,
                reason: err.to_string(),
            }
        })?;
        Ok(Some(user))
    }

    pub async fn save(&self, user: &UserRecord) -> Result<(), SessionError> {
        let encoded =
            serde_json::to_string(user).map_err(|err| SessionError::Serialization(err.to_string()))?;
        self.write(USER_KEY, Some(encoded)).await
    }

    pub async fn clear(&self) -> Result<(), SessionError> {
        self.write(USER_KEY, None).await
    }

    /// Per-category notification toggles. Missing or unreadable settings mean
    /// every category is enabled.
    pub async fn notification_settings(&self) -> NotificationSettings {
        let raw = match self.read(NOTIFICATION_SETTINGS_KEY).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(event = "settings_read_failed", error = %err);
                return NotificationSettings::default();
            }
        };
        let Some(raw) = raw else {
            return NotificationSettings::default();
        };
        serde_json::from_str(&raw).unwrap_or_else(|err| {
            warn!(event = "settings_corrupt", error = %err);
            NotificationSettings::default()
        })
    }

    pub async fn save_notification_settings(
        &self,
        settings: &NotificationSettings,
    ) -> Result<(), SessionError> {
        let encoded = serde_json::to_string(settings)
            .map_err(|err| SessionError::Serialization(err.to_string()))?;
        self.write(NOTIFICATION_SETTINGS_KEY, Some(encoded)).await
    }

    async fn read(&self, key: &'static str) -> Result<Option<String>, SessionError> {
        let storage = self.storage.clone();
        let result = tokio::task::spawn_blocking(move || storage.get(key))
            .await
            .map_err(|err| SessionError::Join(err.to_string()))?;
        Ok(result?)
    }

    async fn write(&self, key: &'static str, value: Option<String>) -> Result<(), SessionError> {
        let storage = self.storage.clone();
        let result = tokio::task::spawn_blocking(move || match value {
            Some(value) => storage.set(key, &value),
            None => storage.remove(key),
        })
        .await
        .map_err(|err| SessionError::Join(err.to_string()))?;
        Ok(result?)
    }
}
