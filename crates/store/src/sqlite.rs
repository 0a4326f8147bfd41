//! SQLite store.
//!
//! Three tables:
//! - `agent_definitions`: definitions as camelCase JSON documents
//! - `agent_instances`: one row per live conversation
//! - `agent_messages`: history rows, cascaded on instance deletion
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microseconds, `Z`)
//! so that text ordering equals time ordering.

use agentweave_core::agent::{
    AgentDefinition, AgentInstance, AgentStatus, InstancePatch, ProviderConfig,
};
use agentweave_core::error::StoreError;
use agentweave_core::message::{AgentMessage, MessageMetadata, MessageRole};
use agentweave_core::store::{AgentStore, InstanceRecord};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// A SQLite-backed [`AgentStore`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database file.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite agent store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agent_definitions (
                id    TEXT PRIMARY KEY NOT NULL,
                data  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("agent_definitions table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agent_instances (
                id              TEXT PRIMARY KEY NOT NULL,
                definition_id   TEXT NOT NULL,
                name            TEXT NOT NULL,
                status          TEXT NOT NULL,
                provider_config TEXT,
                closed          INTEGER NOT NULL DEFAULT 0,
                created         TEXT NOT NULL,
                modified        TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("agent_instances table: {e}")))?;

        // iid preserves insertion order for messages with equal timestamps
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agent_messages (
                iid           INTEGER PRIMARY KEY AUTOINCREMENT,
                id            TEXT UNIQUE NOT NULL,
                agent_id      TEXT NOT NULL REFERENCES agent_instances(id) ON DELETE CASCADE,
                role          TEXT NOT NULL,
                content       TEXT NOT NULL,
                content_type  TEXT NOT NULL,
                duration      INTEGER,
                metadata      TEXT NOT NULL DEFAULT '{}',
                created       TEXT NOT NULL,
                modified      TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("agent_messages table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_agent_messages_agent ON agent_messages(agent_id, modified)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("agent_messages index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_instance(row: &sqlx::sqlite::SqliteRow) -> Result<AgentInstance, StoreError> {
        let id: String = column(row, "id")?;
        let status: String = column(row, "status")?;
        let provider_config: Option<String> = column(row, "provider_config")?;
        let closed: i64 = column(row, "closed")?;
        let created: String = column(row, "created")?;
        let modified: String = column(row, "modified")?;

        let status = AgentStatus::parse(&status).ok_or_else(|| StoreError::Corrupt {
            id: id.clone(),
            reason: format!("unknown status '{status}'"),
        })?;
        let provider_config = provider_config
            .map(|json| serde_json::from_str::<ProviderConfig>(&json))
            .transpose()
            .map_err(|e| StoreError::Corrupt {
                id: id.clone(),
                reason: format!("provider_config: {e}"),
            })?;

        Ok(AgentInstance {
            definition_id: column(row, "definition_id")?,
            name: column(row, "name")?,
            status,
            provider_config,
            closed: closed != 0,
            created: parse_time(&id, &created)?,
            modified: parse_time(&id, &modified)?,
            id,
        })
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<AgentMessage, StoreError> {
        let id: String = column(row, "id")?;
        let role: String = column(row, "role")?;
        let duration: Option<i64> = column(row, "duration")?;
        let metadata: String = column(row, "metadata")?;
        let created: String = column(row, "created")?;
        let modified: String = column(row, "modified")?;

        let role = MessageRole::parse(&role).ok_or_else(|| StoreError::Corrupt {
            id: id.clone(),
            reason: format!("unknown role '{role}'"),
        })?;
        let metadata: MessageMetadata =
            serde_json::from_str(&metadata).map_err(|e| StoreError::Corrupt {
                id: id.clone(),
                reason: format!("metadata: {e}"),
            })?;

        Ok(AgentMessage {
            agent_id: column(row, "agent_id")?,
            role,
            content: column(row, "content")?,
            content_type: column(row, "content_type")?,
            duration: duration.map(|d| d.clamp(0, u32::MAX as i64) as u32),
            metadata,
            created: parse_time(&id, &created)?,
            modified: parse_time(&id, &modified)?,
            id,
        })
    }

    async fn write_instance(&self, instance: &AgentInstance) -> Result<(), StoreError> {
        let provider_config = instance
            .provider_config
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Storage(format!("provider_config serialization: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO agent_instances (id, definition_id, name, status, provider_config, closed, created, modified)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                status = excluded.status,
                provider_config = excluded.provider_config,
                closed = excluded.closed,
                modified = excluded.modified
            "#,
        )
        .bind(&instance.id)
        .bind(&instance.definition_id)
        .bind(&instance.name)
        .bind(instance.status.as_str())
        .bind(provider_config)
        .bind(instance.closed as i64)
        .bind(format_time(&instance.created))
        .bind(format_time(&instance.modified))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("instance write failed: {e}")))?;
        Ok(())
    }
}

fn column<'r, T>(row: &'r sqlx::sqlite::SqliteRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| StoreError::QueryFailed(format!("{name} column: {e}")))
}

fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(id: &str, s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            reason: format!("timestamp '{s}': {e}"),
        })
}

#[async_trait]
impl AgentStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn save_definition(&self, definition: &AgentDefinition) -> Result<(), StoreError> {
        let data = serde_json::to_string(definition)
            .map_err(|e| StoreError::Storage(format!("definition serialization: {e}")))?;
        sqlx::query(
            "INSERT INTO agent_definitions (id, data) VALUES (?1, ?2) \
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
        )
        .bind(&definition.id)
        .bind(&data)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("definition write failed: {e}")))?;
        debug!(definition_id = %definition.id, "Saved agent definition");
        Ok(())
    }

    async fn get_definition(&self, id: &str) -> Result<Option<AgentDefinition>, StoreError> {
        let row = sqlx::query("SELECT data FROM agent_definitions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("get definition: {e}")))?;

        row.map(|row| {
            let data: String = column(&row, "data")?;
            serde_json::from_str(&data).map_err(|e| StoreError::Corrupt {
                id: id.to_string(),
                reason: format!("definition: {e}"),
            })
        })
        .transpose()
    }

    async fn create_instance(&self, instance: &AgentInstance) -> Result<(), StoreError> {
        self.write_instance(instance).await?;
        debug!(agent_id = %instance.id, definition_id = %instance.definition_id, "Created agent instance");
        Ok(())
    }

    async fn get_instance(&self, id: &str) -> Result<Option<InstanceRecord>, StoreError> {
        let Some(row) = sqlx::query("SELECT * FROM agent_instances WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("get instance: {e}")))?
        else {
            return Ok(None);
        };
        let instance = Self::row_to_instance(&row)?;

        let rows = sqlx::query(
            "SELECT * FROM agent_messages WHERE agent_id = ?1 ORDER BY modified ASC, iid ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("get messages: {e}")))?;
        let messages = rows
            .iter()
            .map(Self::row_to_message)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(InstanceRecord { instance, messages }))
    }

    async fn update_instance(
        &self,
        id: &str,
        patch: &InstancePatch,
    ) -> Result<Option<AgentInstance>, StoreError> {
        let Some(row) = sqlx::query("SELECT * FROM agent_instances WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("get instance: {e}")))?
        else {
            return Ok(None);
        };

        let mut instance = Self::row_to_instance(&row)?;
        instance.apply(patch);
        self.write_instance(&instance).await?;
        Ok(Some(instance))
    }

    async fn list_instances(&self, include_closed: bool) -> Result<Vec<AgentInstance>, StoreError> {
        let sql = if include_closed {
            "SELECT * FROM agent_instances ORDER BY created ASC"
        } else {
            "SELECT * FROM agent_instances WHERE closed = 0 ORDER BY created ASC"
        };
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("list instances: {e}")))?;
        rows.iter().map(Self::row_to_instance).collect()
    }

    async fn delete_instance(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM agent_instances WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_message(&self, message: &AgentMessage) -> Result<(), StoreError> {
        let metadata = serde_json::to_string(&message.metadata)
            .map_err(|e| StoreError::Storage(format!("metadata serialization: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO agent_messages (id, agent_id, role, content, content_type, duration, metadata, created, modified)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                content_type = excluded.content_type,
                duration = excluded.duration,
                metadata = excluded.metadata,
                modified = excluded.modified
            "#,
        )
        .bind(&message.id)
        .bind(&message.agent_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(&message.content_type)
        .bind(message.duration.map(i64::from))
        .bind(&metadata)
        .bind(format_time(&message.created))
        .bind(format_time(&message.modified))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("message write failed: {e}")))?;

        debug!(message_id = %message.id, agent_id = %message.agent_id, "Saved message");
        Ok(())
    }

    async fn get_message(&self, id: &str) -> Result<Option<AgentMessage>, StoreError> {
        let row = sqlx::query("SELECT * FROM agent_messages WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("get message: {e}")))?;
        row.as_ref().map(Self::row_to_message).transpose()
    }
}
