use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    AttachmentUrl, Emoji, HistoryQuery, Message, MessageId, MessageRepository, MessageText,
    NewMessage, Reaction, RecipientSet, RepositoryError, RepositoryResult, RoleDirectory,
    RoleName, Timestamp, UserId,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    RepositoryError::storage(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: i64,
    sender_id: Uuid,
    sender_name: String,
    text: String,
    attachment_url: Option<String>,
    sent_at: OffsetDateTime,
    edited_at: Option<OffsetDateTime>,
}

#[derive(Debug, FromRow)]
struct RecipientRecord {
    message_id: i64,
    user_id: Uuid,
}

#[derive(Debug, FromRow)]
struct ReactionRecord {
    message_id: i64,
    user_id: Uuid,
    emoji: String,
    created_at: OffsetDateTime,
}

impl TryFrom<ReactionRecord> for Reaction {
    type Error = RepositoryError;

    fn try_from(value: ReactionRecord) -> Result<Self, Self::Error> {
        let emoji = Emoji::parse(value.emoji).map_err(|err| invalid_data(err.to_string()))?;
        Ok(Reaction::new(
            UserId::from(value.user_id),
            emoji,
            value.created_at,
        ))
    }
}

impl MessageRecord {
    fn into_message(
        self,
        recipients: Vec<UserId>,
        reactions: Vec<Reaction>,
    ) -> Result<Message, RepositoryError> {
        let text = MessageText::parse(self.text).map_err(|err| invalid_data(err.to_string()))?;
        let attachment_url = self
            .attachment_url
            .map(AttachmentUrl::parse)
            .transpose()
            .map_err(|err| invalid_data(err.to_string()))?;
        let recipient_ids = RecipientSet::parse(recipients).map_err(|_| {
            invalid_data(format!("message {} has no recipients", self.id))
        })?;

        Ok(Message {
            id: MessageId::new(self.id),
            sender_id: UserId::from(self.sender_id),
            sender_name: self.sender_name,
            text,
            attachment_url,
            recipient_ids,
            sent_at: self.sent_at,
            edited_at: self.edited_at,
            reactions,
        })
    }
}

const MESSAGE_COLUMNS: &str =
    "m.id, m.sender_id, m.sender_name, m.text, m.attachment_url, m.sent_at, m.edited_at";

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 批量加载接收者与表情回应并组装消息，保持 `records` 的顺序
    async fn assemble(&self, records: Vec<MessageRecord>) -> RepositoryResult<Vec<Message>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = records.iter().map(|record| record.id).collect();

        let recipient_rows = sqlx::query_as::<_, RecipientRecord>(
            r#"SELECT message_id, user_id FROM chat_message_recipients WHERE message_id = ANY($1)"#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let reaction_rows = sqlx::query_as::<_, ReactionRecord>(
            r#"
            SELECT message_id, user_id, emoji, created_at
            FROM chat_message_reactions
            WHERE message_id = ANY($1)
            ORDER BY created_at, user_id, emoji
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let mut recipients: HashMap<i64, Vec<UserId>> = HashMap::new();
        for row in recipient_rows {
            recipients
                .entry(row.message_id)
                .or_default()
                .push(UserId::from(row.user_id));
        }

        let mut reactions: HashMap<i64, Vec<Reaction>> = HashMap::new();
        for row in reaction_rows {
            let message_id = row.message_id;
            reactions
                .entry(message_id)
                .or_default()
                .push(Reaction::try_from(row)?);
        }

        records
            .into_iter()
            .map(|record| {
                let id = record.id;
                record.into_message(
                    recipients.remove(&id).unwrap_or_default(),
                    reactions.remove(&id).unwrap_or_default(),
                )
            })
            .collect()
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn create_message(&self, message: NewMessage) -> RepositoryResult<Message> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO chat_messages (sender_id, sender_name, text, attachment_url, sent_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(Uuid::from(message.sender_id))
        .bind(&message.sender_name)
        .bind(message.text.as_str())
        .bind(message.attachment_url.as_ref().map(AttachmentUrl::as_str))
        .bind(message.sent_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        let recipients: Vec<Uuid> = message
            .recipient_ids
            .iter()
            .map(|user_id| Uuid::from(*user_id))
            .collect();
        sqlx::query(
            r#"
            INSERT INTO chat_message_recipients (message_id, user_id)
            SELECT $1, recipient FROM UNNEST($2::uuid[]) AS recipient
            "#,
        )
        .bind(id)
        .bind(&recipients)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;

        Ok(message.into_message(MessageId::new(id)))
    }

    async fn find_by_id(&self, id: MessageId) -> RepositoryResult<Option<Message>> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM chat_messages m WHERE m.id = $1"
        ))
        .bind(id.value())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        match record {
            Some(record) => Ok(self.assemble(vec![record]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn update_text(
        &self,
        id: MessageId,
        sender_id: UserId,
        text: MessageText,
        edited_at: Timestamp,
    ) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE chat_messages
            SET text = $3, edited_at = $4
            WHERE id = $1 AND sender_id = $2
            "#,
        )
        .bind(id.value())
        .bind(Uuid::from(sender_id))
        .bind(text.as_str())
        .bind(edited_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_message(&self, id: MessageId, sender_id: UserId) -> RepositoryResult<bool> {
        // 接收者与表情回应随外键级联删除
        let result = sqlx::query(r#"DELETE FROM chat_messages WHERE id = $1 AND sender_id = $2"#)
            .bind(id.value())
            .bind(Uuid::from(sender_id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn add_reaction(&self, id: MessageId, reaction: Reaction) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO chat_message_reactions (message_id, user_id, emoji, created_at)
            SELECT $1, $2, $3, $4
            WHERE EXISTS (SELECT 1 FROM chat_messages WHERE id = $1)
            ON CONFLICT (message_id, user_id, emoji) DO NOTHING
            "#,
        )
        .bind(id.value())
        .bind(Uuid::from(reaction.user_id))
        .bind(reaction.emoji.as_str())
        .bind(reaction.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(result) => Ok(result.rows_affected() == 1),
            // 消息在检查之后被并发删除
            Err(sqlx::Error::Database(err)) if err.is_foreign_key_violation() => Ok(false),
            Err(err) => Err(map_sqlx_err(err)),
        }
    }

    async fn remove_reaction(
        &self,
        id: MessageId,
        user_id: UserId,
        emoji: Emoji,
    ) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM chat_message_reactions
            WHERE message_id = $1 AND user_id = $2 AND emoji = $3
            "#,
        )
        .bind(id.value())
        .bind(Uuid::from(user_id))
        .bind(emoji.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn history(
        &self,
        user_id: UserId,
        query: HistoryQuery,
    ) -> RepositoryResult<Vec<Message>> {
        let mut records = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM chat_messages m
            WHERE (
                m.sender_id = $1
                OR EXISTS (
                    SELECT 1 FROM chat_message_recipients r
                    WHERE r.message_id = m.id AND r.user_id = $1
                )
            )
            AND ($2::BIGINT IS NULL OR m.id < $2)
            ORDER BY m.id DESC
            LIMIT $3
            "#
        ))
        .bind(Uuid::from(user_id))
        .bind(query.before.map(MessageId::value))
        .bind(i64::from(query.limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.reverse();
        self.assemble(records).await
    }
}

#[derive(Clone)]
pub struct PgRoleDirectory {
    pool: PgPool,
}

impl PgRoleDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn assign_role(&self, user_id: UserId, role: &RoleName) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, role_name) VALUES ($1, $2)
            ON CONFLICT (user_id, role_name) DO NOTHING
            "#,
        )
        .bind(Uuid::from(user_id))
        .bind(role.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    pub async fn revoke_role(&self, user_id: UserId, role: &RoleName) -> RepositoryResult<bool> {
        let result = sqlx::query(r#"DELETE FROM user_roles WHERE user_id = $1 AND role_name = $2"#)
            .bind(Uuid::from(user_id))
            .bind(role.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl RoleDirectory for PgRoleDirectory {
    async fn roles_of(&self, user_id: UserId) -> RepositoryResult<HashSet<RoleName>> {
        let roles: Vec<String> =
            sqlx::query_scalar(r#"SELECT role_name FROM user_roles WHERE user_id = $1"#)
                .bind(Uuid::from(user_id))
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_err)?;
        Ok(roles.into_iter().map(RoleName::new).collect())
    }

    async fn users_sharing_any_role(
        &self,
        roles: HashSet<RoleName>,
    ) -> RepositoryResult<HashSet<UserId>> {
        if roles.is_empty() {
            return Ok(HashSet::new());
        }
        let roles: Vec<String> = roles.iter().map(|role| role.as_str().to_owned()).collect();
        let users: Vec<Uuid> = sqlx::query_scalar(
            r#"SELECT DISTINCT user_id FROM user_roles WHERE role_name = ANY($1)"#,
        )
        .bind(&roles)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(users.into_iter().map(UserId::from).collect())
    }
}

#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub message_repository: Arc<PgMessageRepository>,
    pub role_directory: Arc<PgRoleDirectory>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            message_repository: Arc::new(PgMessageRepository::new(pool.clone())),
            role_directory: Arc::new(PgRoleDirectory::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
