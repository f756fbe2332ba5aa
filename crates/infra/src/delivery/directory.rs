//! Recipient lookup: the users a horse notification goes to, with their preferences.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use paddock_core::{HorseId, UserId};
use paddock_notifications::NotificationCategory;

/// Why a user is notified about a horse.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecipientRole {
    Owner,
    Trainer,
}

impl RecipientRole {
    pub fn as_str(self) -> &'static str {
        match self {
            RecipientRole::Owner => "owner",
            RecipientRole::Trainer => "trainer",
        }
    }
}

impl core::fmt::Display for RecipientRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-category email switches. A user without a stored row gets everything.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreferences {
    pub race_results: bool,
    pub registrations: bool,
    pub declarations: bool,
    pub trainings: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            race_results: true,
            registrations: true,
            declarations: true,
            trainings: true,
        }
    }
}

impl NotificationPreferences {
    pub fn allows(&self, category: NotificationCategory) -> bool {
        match category {
            NotificationCategory::RaceResults => self.race_results,
            NotificationCategory::Registrations => self.registrations,
            NotificationCategory::Declarations => self.declarations,
            NotificationCategory::Trainings => self.trainings,
        }
    }

    /// Same preferences with one category switched off.
    pub fn without(mut self, category: NotificationCategory) -> Self {
        match category {
            NotificationCategory::RaceResults => self.race_results = false,
            NotificationCategory::Registrations => self.registrations = false,
            NotificationCategory::Declarations => self.declarations = false,
            NotificationCategory::Trainings => self.trainings = false,
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub user_id: UserId,
    pub email: String,
    pub name: Option<String>,
    pub role: RecipientRole,
    pub preferences: NotificationPreferences,
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory storage error: {0}")]
    Storage(String),
}

/// Resolves the recipients of a horse notification.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// Owner first, then trainer. Empty when the horse does not exist or has no
    /// user with an email address.
    async fn recipients_for_horse(&self, horse_id: &HorseId)
    -> Result<Vec<Recipient>, DirectoryError>;
}

#[async_trait]
impl<T: RecipientDirectory + ?Sized> RecipientDirectory for Arc<T> {
    async fn recipients_for_horse(
        &self,
        horse_id: &HorseId,
    ) -> Result<Vec<Recipient>, DirectoryError> {
        (**self).recipients_for_horse(horse_id).await
    }
}

/// In-memory directory for tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryRecipientDirectory {
    horses: RwLock<HashMap<HorseId, Vec<Recipient>>>,
}

impl InMemoryRecipientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, horse_id: HorseId, recipient: Recipient) {
        if let Ok(mut horses) = self.horses.write() {
            horses.entry(horse_id).or_default().push(recipient);
        }
    }
}

#[async_trait]
impl RecipientDirectory for InMemoryRecipientDirectory {
    async fn recipients_for_horse(
        &self,
        horse_id: &HorseId,
    ) -> Result<Vec<Recipient>, DirectoryError> {
        let horses = self
            .horses
            .read()
            .map_err(|_| DirectoryError::Storage("recipient lock poisoned".to_string()))?;
        Ok(horses.get(horse_id).cloned().unwrap_or_default())
    }
}

const SELECT_RECIPIENTS: &str = r#"
    SELECT u.id AS user_id, u.email, u.name, r.role, r.ord,
        COALESCE(p."raceResults", TRUE) AS race_results,
        COALESCE(p."registrations", TRUE) AS registrations,
        COALESCE(p."declarations", TRUE) AS declarations,
        COALESCE(p."trainings", TRUE) AS trainings
    FROM (
        SELECT h."ownerId" AS user_id, 'OWNER' AS role, 0 AS ord
        FROM "Horse" h WHERE h.id = $1
        UNION ALL
        SELECT h."trainerId" AS user_id, 'TRAINER' AS role, 1 AS ord
        FROM "Horse" h WHERE h.id = $1
    ) r
    JOIN "User" u ON u.id = r.user_id
    LEFT JOIN "NotificationPreference" p ON p."userId" = u.id
    WHERE u.email IS NOT NULL AND u.email <> ''
    ORDER BY r.ord
"#;

/// Reads owner and trainer users of a horse, with their stored preferences.
#[derive(Debug, Clone)]
pub struct PostgresRecipientDirectory {
    pool: PgPool,
}

impl PostgresRecipientDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecipientDirectory for PostgresRecipientDirectory {
    #[instrument(skip(self), fields(horse_id = %horse_id), err)]
    async fn recipients_for_horse(
        &self,
        horse_id: &HorseId,
    ) -> Result<Vec<Recipient>, DirectoryError> {
        let rows = sqlx::query(SELECT_RECIPIENTS)
            .bind(horse_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DirectoryError::Storage(format!("recipient lookup failed: {e}")))?;

        rows.iter().map(recipient_from_row).collect()
    }
}

fn recipient_from_row(row: &PgRow) -> Result<Recipient, DirectoryError> {
    let get_bool = |column: &str| -> Result<bool, DirectoryError> {
        row.try_get(column).map_err(|e| decode_error(column, e))
    };

    let role: String = row.try_get("role").map_err(|e| decode_error("role", e))?;
    let role = match role.as_str() {
        "OWNER" => RecipientRole::Owner,
        "TRAINER" => RecipientRole::Trainer,
        other => {
            return Err(DirectoryError::Storage(format!(
                "unexpected recipient role: {other}"
            )));
        }
    };

    Ok(Recipient {
        user_id: UserId::from(
            row.try_get::<String, _>("user_id")
                .map_err(|e| decode_error("user_id", e))?,
        ),
        email: row.try_get("email").map_err(|e| decode_error("email", e))?,
        name: row.try_get("name").map_err(|e| decode_error("name", e))?,
        role,
        preferences: NotificationPreferences {
            race_results: get_bool("race_results")?,
            registrations: get_bool("registrations")?,
            declarations: get_bool("declarations")?,
            trainings: get_bool("trainings")?,
        },
    })
}

fn decode_error(column: &str, err: sqlx::Error) -> DirectoryError {
    DirectoryError::Storage(format!("failed to decode column {column}: {err}"))
}
