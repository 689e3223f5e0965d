use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use agentdesk_protocol::{AgentId, BoxFuture, ConversationId, MessageId, unix_timestamp_seconds};
use snafu::{OptionExt, ResultExt};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqliteConnection, SqlitePool};

use super::error::{
    CreateSqliteDirectorySnafu, InvalidIdSnafu, InvariantViolationSnafu, NotFoundSnafu,
    SqliteConnectOptionsSnafu, SqliteConnectSnafu, SqliteMigrateSnafu, SqlitePragmaSnafu,
    SqliteQuerySnafu, StorageError, StorageResult,
};
use super::types::{
    AgentRecord, ConversationRecord, MessageRecord, MessageRole, NewAgentRecord, NewConversation,
    NewMessage,
};
use super::{AgentStore, ConversationStore, MessageStore};

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    database_url: String,
}

impl SqliteStorage {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let in_memory = database_url.contains(":memory:");
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        let mut pool_options = SqlitePoolOptions::new().max_connections(1);
        if in_memory {
            // An in-memory database lives exactly as long as its only connection.
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        // Explicit PRAGMA writes make bootstrap behavior deterministic.
        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-foreign-keys",
                pragma: "foreign_keys",
            })?;
        sqlx::query("PRAGMA busy_timeout = 5000;")
            .execute(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-busy-timeout",
                pragma: "busy_timeout",
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        tracing::info!(database_url = %database_url, "opened sqlite storage");
        Ok(Self { pool, database_url })
    }

    /// Opens a private in-memory database, mostly useful for tests.
    pub async fn open_in_memory() -> StorageResult<Self> {
        Self::open(":memory:").await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }
}

impl AgentStore for SqliteStorage {
    fn create_agent(&self, input: NewAgentRecord) -> BoxFuture<'_, StorageResult<AgentRecord>> {
        Box::pin(async move {
            let record = AgentRecord {
                id: AgentId::new_v7(),
                name: input.name,
                api_url: input.api_url,
                auth_token: input.auth_token,
                project_id: input.project_id,
                created_at_unix_seconds: unix_timestamp_seconds(),
            };

            sqlx::query(
                "INSERT INTO agents (id, name, api_url, auth_token, project_id, created_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(record.id.to_string())
            .bind(&record.name)
            .bind(&record.api_url)
            .bind(&record.auth_token)
            .bind(&record.project_id)
            .bind(record.created_at_unix_seconds)
            .execute(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "agent-create-insert",
            })?;

            Ok(record)
        })
    }

    fn list_agents(&self) -> BoxFuture<'_, StorageResult<Vec<AgentRecord>>> {
        Box::pin(async move {
            let rows = sqlx::query_as::<_, AgentRow>(
                "SELECT id, name, api_url, auth_token, project_id, created_at FROM agents ORDER BY created_at DESC, id DESC",
            )
            .fetch_all(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "agent-list-query",
            })?;

            rows.into_iter().map(agent_row_to_record).collect()
        })
    }

    fn get_agent(&self, agent_id: AgentId) -> BoxFuture<'_, StorageResult<Option<AgentRecord>>> {
        Box::pin(async move {
            let row = sqlx::query_as::<_, AgentRow>(
                "SELECT id, name, api_url, auth_token, project_id, created_at FROM agents WHERE id = ?",
            )
            .bind(agent_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "agent-get-query",
            })?;

            row.map(agent_row_to_record).transpose()
        })
    }

    fn update_agent(&self, agent: AgentRecord) -> BoxFuture<'_, StorageResult<AgentRecord>> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE agents SET name = ?, api_url = ?, auth_token = ?, project_id = ? WHERE id = ?",
            )
            .bind(&agent.name)
            .bind(&agent.api_url)
            .bind(&agent.auth_token)
            .bind(&agent.project_id)
            .bind(agent.id.to_string())
            .execute(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "agent-update-apply",
            })?;

            if result.rows_affected() == 0 {
                return NotFoundSnafu {
                    stage: "agent-update-missing",
                    entity: "agent",
                    id: agent.id.to_string(),
                }
                .fail();
            }

            // Creation time is immutable; report the stored value rather than the caller's copy.
            let stored = self.get_agent(agent.id).await?.context(NotFoundSnafu {
                stage: "agent-update-load",
                entity: "agent",
                id: agent.id.to_string(),
            })?;
            Ok(stored)
        })
    }

    fn delete_agent(&self, agent_id: AgentId) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM agents WHERE id = ?")
                .bind(agent_id.to_string())
                .execute(&self.pool)
                .await
                .context(SqliteQuerySnafu {
                    stage: "agent-delete-apply",
                })?;

            if result.rows_affected() == 0 {
                return NotFoundSnafu {
                    stage: "agent-delete-missing",
                    entity: "agent",
                    id: agent_id.to_string(),
                }
                .fail();
            }

            Ok(())
        })
    }
}

impl ConversationStore for SqliteStorage {
    fn create_conversation(
        &self,
        input: NewConversation,
    ) -> BoxFuture<'_, StorageResult<ConversationRecord>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.context(SqliteQuerySnafu {
                stage: "conversation-create-begin",
            })?;

            if !agent_exists(&mut tx, input.agent_id).await? {
                return NotFoundSnafu {
                    stage: "conversation-create-missing-agent",
                    entity: "agent",
                    id: input.agent_id.to_string(),
                }
                .fail();
            }

            let record = ConversationRecord {
                id: ConversationId::new_v7(),
                agent_id: input.agent_id,
                title: normalize_title(input.title),
                created_at_unix_seconds: unix_timestamp_seconds(),
            };

            sqlx::query(
                "INSERT INTO conversations (id, agent_id, title, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(record.id.to_string())
            .bind(record.agent_id.to_string())
            .bind(record.title.clone())
            .bind(record.created_at_unix_seconds)
            .execute(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "conversation-create-insert",
            })?;

            tx.commit().await.context(SqliteQuerySnafu {
                stage: "conversation-create-commit",
            })?;

            Ok(record)
        })
    }

    fn list_conversations(
        &self,
        agent_id: AgentId,
    ) -> BoxFuture<'_, StorageResult<Vec<ConversationRecord>>> {
        Box::pin(async move {
            // UUIDv7 ids sort by creation time, which breaks ties inside one second.
            let rows = sqlx::query_as::<_, ConversationRow>(
                "SELECT id, agent_id, title, created_at FROM conversations WHERE agent_id = ? ORDER BY created_at DESC, id DESC",
            )
            .bind(agent_id.to_string())
            .fetch_all(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "conversation-list-query",
            })?;

            rows.into_iter().map(conversation_row_to_record).collect()
        })
    }

    fn get_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'_, StorageResult<Option<ConversationRecord>>> {
        Box::pin(async move {
            let row = sqlx::query_as::<_, ConversationRow>(
                "SELECT id, agent_id, title, created_at FROM conversations WHERE id = ?",
            )
            .bind(conversation_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "conversation-get-query",
            })?;

            row.map(conversation_row_to_record).transpose()
        })
    }

    fn set_conversation_title(
        &self,
        conversation_id: ConversationId,
        title: Option<String>,
    ) -> BoxFuture<'_, StorageResult<ConversationRecord>> {
        Box::pin(async move {
            let result = sqlx::query("UPDATE conversations SET title = ? WHERE id = ?")
                .bind(normalize_title(title))
                .bind(conversation_id.to_string())
                .execute(&self.pool)
                .await
                .context(SqliteQuerySnafu {
                    stage: "conversation-title-apply",
                })?;

            if result.rows_affected() == 0 {
                return NotFoundSnafu {
                    stage: "conversation-title-missing",
                    entity: "conversation",
                    id: conversation_id.to_string(),
                }
                .fail();
            }

            self.get_conversation(conversation_id)
                .await?
                .context(NotFoundSnafu {
                    stage: "conversation-title-load",
                    entity: "conversation",
                    id: conversation_id.to_string(),
                })
        })
    }

    fn delete_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM conversations WHERE id = ?")
                .bind(conversation_id.to_string())
                .execute(&self.pool)
                .await
                .context(SqliteQuerySnafu {
                    stage: "conversation-delete-apply",
                })?;

            if result.rows_affected() == 0 {
                return NotFoundSnafu {
                    stage: "conversation-delete-missing",
                    entity: "conversation",
                    id: conversation_id.to_string(),
                }
                .fail();
            }

            Ok(())
        })
    }
}

impl MessageStore for SqliteStorage {
    fn append_message(
        &self,
        conversation_id: ConversationId,
        input: NewMessage,
    ) -> BoxFuture<'_, StorageResult<MessageRecord>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.context(SqliteQuerySnafu {
                stage: "message-append-begin",
            })?;

            if !conversation_exists(&mut tx, conversation_id).await? {
                return NotFoundSnafu {
                    stage: "message-append-missing-conversation",
                    entity: "conversation",
                    id: conversation_id.to_string(),
                }
                .fail();
            }

            let next_seq = sqlx::query_scalar::<_, i64>(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE conversation_id = ?",
            )
            .bind(conversation_id.to_string())
            .fetch_one(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-append-next-seq",
            })?;

            let message_id = MessageId::new_v7();
            let now = unix_timestamp_seconds();

            sqlx::query(
                "INSERT INTO messages (id, conversation_id, seq, role, content, tool_calls, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(message_id.to_string())
            .bind(conversation_id.to_string())
            .bind(next_seq)
            .bind(role_to_sql(input.role))
            .bind(&input.content)
            .bind(input.tool_calls_json.clone())
            .bind(now)
            .execute(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-append-insert",
            })?;

            tx.commit().await.context(SqliteQuerySnafu {
                stage: "message-append-commit",
            })?;

            Ok(MessageRecord {
                id: message_id,
                conversation_id,
                seq: i64_to_u64(next_seq, "message-append-seq")?,
                role: input.role,
                content: input.content,
                tool_calls_json: input.tool_calls_json,
                created_at_unix_seconds: now,
            })
        })
    }

    fn list_messages(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'_, StorageResult<Vec<MessageRecord>>> {
        Box::pin(async move {
            let rows = sqlx::query_as::<_, MessageRow>(
                "SELECT id, conversation_id, seq, role, content, tool_calls, created_at FROM messages WHERE conversation_id = ? ORDER BY seq ASC, id ASC",
            )
            .bind(conversation_id.to_string())
            .fetch_all(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-list-query",
            })?;

            rows.into_iter().map(message_row_to_record).collect()
        })
    }
}

#[derive(Debug, FromRow)]
struct AgentRow {
    id: String,
    name: String,
    api_url: String,
    auth_token: String,
    project_id: String,
    created_at: i64,
}

#[derive(Debug, FromRow)]
struct ConversationRow {
    id: String,
    agent_id: String,
    title: Option<String>,
    created_at: i64,
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    conversation_id: String,
    seq: i64,
    role: String,
    content: String,
    tool_calls: Option<String>,
    created_at: i64,
}

fn agent_row_to_record(row: AgentRow) -> StorageResult<AgentRecord> {
    Ok(AgentRecord {
        id: AgentId::parse(&row.id).context(InvalidIdSnafu {
            stage: "agent-row-id",
        })?,
        name: row.name,
        api_url: row.api_url,
        auth_token: row.auth_token,
        project_id: row.project_id,
        created_at_unix_seconds: row.created_at,
    })
}

fn conversation_row_to_record(row: ConversationRow) -> StorageResult<ConversationRecord> {
    Ok(ConversationRecord {
        id: ConversationId::parse(&row.id).context(InvalidIdSnafu {
            stage: "conversation-row-id",
        })?,
        agent_id: AgentId::parse(&row.agent_id).context(InvalidIdSnafu {
            stage: "conversation-row-agent-id",
        })?,
        title: row.title,
        created_at_unix_seconds: row.created_at,
    })
}

fn message_row_to_record(row: MessageRow) -> StorageResult<MessageRecord> {
    Ok(MessageRecord {
        id: MessageId::parse(&row.id).context(InvalidIdSnafu {
            stage: "message-row-id",
        })?,
        conversation_id: ConversationId::parse(&row.conversation_id).context(InvalidIdSnafu {
            stage: "message-row-conversation-id",
        })?,
        seq: i64_to_u64(row.seq, "message-row-seq")?,
        role: role_from_sql(&row.role)?,
        content: row.content,
        tool_calls_json: row.tool_calls,
        created_at_unix_seconds: row.created_at,
    })
}

async fn agent_exists(connection: &mut SqliteConnection, agent_id: AgentId) -> StorageResult<bool> {
    let exists = sqlx::query_scalar::<_, i64>("SELECT EXISTS(SELECT 1 FROM agents WHERE id = ?)")
        .bind(agent_id.to_string())
        .fetch_one(&mut *connection)
        .await
        .context(SqliteQuerySnafu {
            stage: "agent-exists-query",
        })?;
    Ok(exists != 0)
}

async fn conversation_exists(
    connection: &mut SqliteConnection,
    conversation_id: ConversationId,
) -> StorageResult<bool> {
    let exists =
        sqlx::query_scalar::<_, i64>("SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?)")
            .bind(conversation_id.to_string())
            .fetch_one(&mut *connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "conversation-exists-query",
            })?;
    Ok(exists != 0)
}

fn normalize_title(title: Option<String>) -> Option<String> {
    title
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
}

fn role_to_sql(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    }
}

fn role_from_sql(raw: &str) -> StorageResult<MessageRole> {
    match raw {
        "user" => Ok(MessageRole::User),
        "assistant" => Ok(MessageRole::Assistant),
        _ => InvariantViolationSnafu {
            stage: "message-role-from-sql",
            details: format!("unknown message role '{raw}'"),
        }
        .fail(),
    }
}

fn i64_to_u64(value: i64, stage: &'static str) -> StorageResult<u64> {
    value
        .try_into()
        .map_err(|_| StorageError::InvariantViolation {
            stage,
            details: format!("negative sqlite integer '{value}' cannot map to u64"),
        })
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") || database_location == ":memory:" {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    if database_location == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    format!("sqlite://{database_location}")
}
