//! SQLite implementation of [`ChatStore`].

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::BTreeSet;
use tracing::{debug, info};

use super::store::ChatStore;
use crate::entities::{
    CallRoom, ChatType, Conversation, Media, Member, MemberRole, NewConversation, NewMessage,
    PinnedMessage, ReactionCount, ReactionUpdate, ReadReceipt, StoredMessage,
};
use crate::types::{ChatError, ChatResult};
use crate::utils::Validator;

const CONVERSATION_COLUMNS: &str = r#"
    SELECT c.id, c.company_id, c.chat_type, c.title, c.description, c.creator_id,
           c.member_count, c.message_count, c.created_at, c.updated_at
    FROM conversations c
"#;

const MEMBER_COLUMNS: &str = r#"
    SELECT conversation_id, user_id, role, joined_at, last_read_message_id
    FROM conversation_members
"#;

const MESSAGE_COLUMNS: &str = r#"
    SELECT m.id, m.conversation_id, m.sender_id, m.kind, m.content, m.reply_to_id,
           m.forwarded_from_id, m.media_id, m.sticker_id, m.is_silent, m.extras,
           m.created_at, m.edited_at, m.deleted_at,
           EXISTS (SELECT 1 FROM pinned_messages p WHERE p.message_id = m.id) AS is_pinned
    FROM messages m
"#;

/// [`ChatStore`] backed by the shared SQLite pool.
#[derive(Clone)]
pub struct SqliteChatStore {
    pool: SqlitePool,
}

impl SqliteChatStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn conversation_from_row(row: &SqliteRow) -> ChatResult<Conversation> {
    let chat_type: String = row.try_get("chat_type")?;
    Ok(Conversation {
        id: row.try_get("id")?,
        company_id: row.try_get("company_id")?,
        chat_type: chat_type.parse()?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        creator_id: row.try_get("creator_id")?,
        member_count: row.try_get("member_count")?,
        message_count: row.try_get("message_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn member_from_row(row: &SqliteRow) -> ChatResult<Member> {
    let role: String = row.try_get("role")?;
    Ok(Member {
        conversation_id: row.try_get("conversation_id")?,
        user_id: row.try_get("user_id")?,
        role: role.parse()?,
        joined_at: row.try_get("joined_at")?,
        last_read_message_id: row.try_get("last_read_message_id")?,
    })
}

fn message_from_row(row: &SqliteRow) -> ChatResult<StoredMessage> {
    let kind: String = row.try_get("kind")?;
    let extras: Option<String> = row.try_get("extras")?;
    let extras = extras
        .map(|raw| serde_json::from_str::<Map<String, Value>>(&raw))
        .transpose()?;
    let is_silent: i64 = row.try_get("is_silent")?;
    let is_pinned: i64 = row.try_get("is_pinned")?;

    Ok(StoredMessage {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        sender_id: row.try_get("sender_id")?,
        kind: kind.parse()?,
        content: row.try_get("content")?,
        reply_to_id: row.try_get("reply_to_id")?,
        forwarded_from_id: row.try_get("forwarded_from_id")?,
        media_id: row.try_get("media_id")?,
        sticker_id: row.try_get("sticker_id")?,
        is_silent: is_silent != 0,
        extras,
        created_at: row.try_get("created_at")?,
        edited_at: row.try_get("edited_at")?,
        deleted_at: row.try_get("deleted_at")?,
        is_pinned: is_pinned != 0,
    })
}

async fn fetch_conversation(conn: &mut SqliteConnection, id: i64) -> ChatResult<Conversation> {
    let sql = format!("{CONVERSATION_COLUMNS} WHERE c.id = ?");
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ChatError::conversation_not_found(id))?;
    conversation_from_row(&row)
}

async fn fetch_member(
    conn: &mut SqliteConnection,
    conversation_id: i64,
    user_id: i64,
) -> ChatResult<Option<Member>> {
    let sql = format!(
        "{MEMBER_COLUMNS} WHERE conversation_id = ? AND user_id = ? AND left_at IS NULL"
    );
    let row = sqlx::query(&sql)
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(member_from_row).transpose()
}

/// Fetch a message that has not been deleted.
async fn fetch_live_message(conn: &mut SqliteConnection, id: i64) -> ChatResult<StoredMessage> {
    let sql = format!("{MESSAGE_COLUMNS} WHERE m.id = ? AND m.deleted_at IS NULL");
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ChatError::message_not_found(id))?;
    message_from_row(&row)
}

async fn fetch_any_message(conn: &mut SqliteConnection, id: i64) -> ChatResult<StoredMessage> {
    let sql = format!("{MESSAGE_COLUMNS} WHERE m.id = ?");
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ChatError::message_not_found(id))?;
    message_from_row(&row)
}

/// Every participant must exist and belong to the conversation's company.
async fn ensure_company_user(
    conn: &mut SqliteConnection,
    company_id: i64,
    user_id: i64,
) -> ChatResult<()> {
    let user_company: Option<i64> = sqlx::query_scalar("SELECT company_id FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;

    match user_company {
        None => Err(ChatError::validation(format!("unknown user {user_id}"))),
        Some(found) if found != company_id => Err(ChatError::access_denied(format!(
            "user {user_id} belongs to another company"
        ))),
        Some(_) => Ok(()),
    }
}

async fn insert_member(
    conn: &mut SqliteConnection,
    conversation_id: i64,
    user_id: i64,
    role: MemberRole,
    joined_at: &str,
) -> ChatResult<()> {
    sqlx::query(
        r#"
        INSERT INTO conversation_members (conversation_id, user_id, role, joined_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(conversation_id)
    .bind(user_id)
    .bind(role.as_str())
    .bind(joined_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn refresh_member_count(conn: &mut SqliteConnection, conversation_id: i64) -> ChatResult<()> {
    sqlx::query(
        r#"
        UPDATE conversations
        SET member_count = (
                SELECT COUNT(*) FROM conversation_members
                WHERE conversation_id = ? AND left_at IS NULL
            ),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(conversation_id)
    .bind(now())
    .bind(conversation_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for ch in query.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

#[async_trait]
impl ChatStore for SqliteChatStore {
    async fn create_conversation(&self, new: NewConversation) -> ChatResult<Conversation> {
        Validator::conversation_title(new.chat_type, &new.title)?;
        Validator::description(new.description.as_deref())?;

        let members: BTreeSet<i64> = new
            .members
            .iter()
            .copied()
            .filter(|id| *id != new.creator_id)
            .collect();

        if new.chat_type == ChatType::Direct && members.len() != 1 {
            return Err(ChatError::validation(
                "direct conversations need exactly one other member",
            ));
        }

        let now = now();
        let mut tx = self.pool.begin().await?;

        ensure_company_user(&mut tx, new.company_id, new.creator_id).await?;
        for user_id in &members {
            ensure_company_user(&mut tx, new.company_id, *user_id).await?;
        }

        let id = sqlx::query(
            r#"
            INSERT INTO conversations
                (company_id, chat_type, title, description, creator_id, member_count, message_count, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(new.company_id)
        .bind(new.chat_type.as_str())
        .bind(new.title.trim())
        .bind(&new.description)
        .bind(new.creator_id)
        .bind(members.len() as i64 + 1)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        insert_member(&mut tx, id, new.creator_id, MemberRole::Owner, &now).await?;
        for user_id in &members {
            insert_member(&mut tx, id, *user_id, MemberRole::Member, &now).await?;
        }

        let conversation = fetch_conversation(&mut tx, id).await?;
        tx.commit().await?;

        info!(
            conversation_id = id,
            company_id = new.company_id,
            chat_type = %new.chat_type,
            members = conversation.member_count,
            "created conversation"
        );
        Ok(conversation)
    }

    async fn get_conversation(&self, conversation_id: i64) -> ChatResult<Conversation> {
        let mut conn = self.pool.acquire().await?;
        fetch_conversation(&mut conn, conversation_id).await
    }

    async fn list_conversations(&self, user_id: i64) -> ChatResult<Vec<Conversation>> {
        let sql = format!(
            r#"{CONVERSATION_COLUMNS}
            JOIN conversation_members cm ON cm.conversation_id = c.id
            WHERE cm.user_id = ? AND cm.left_at IS NULL
            ORDER BY c.updated_at DESC, c.id DESC"#
        );
        let rows = sqlx::query(&sql).bind(user_id).fetch_all(&self.pool).await?;
        rows.iter().map(conversation_from_row).collect()
    }

    async fn update_conversation(
        &self,
        conversation_id: i64,
        title: Option<String>,
        description: Option<String>,
    ) -> ChatResult<Conversation> {
        let mut tx = self.pool.begin().await?;
        let existing = fetch_conversation(&mut tx, conversation_id).await?;

        if let Some(title) = &title {
            Validator::conversation_title(existing.chat_type, title)?;
        }
        Validator::description(description.as_deref())?;

        sqlx::query(
            r#"
            UPDATE conversations
            SET title = COALESCE(?, title),
                description = COALESCE(?, description),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(title.as_deref().map(str::trim))
        .bind(&description)
        .bind(now())
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;

        let updated = fetch_conversation(&mut tx, conversation_id).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn delete_conversation(&self, conversation_id: i64) -> ChatResult<()> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ChatError::conversation_not_found(conversation_id));
        }
        info!(conversation_id, "deleted conversation");
        Ok(())
    }

    async fn conversation_ids_for_user(&self, user_id: i64) -> ChatResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT conversation_id FROM conversation_members
            WHERE user_id = ? AND left_at IS NULL
            ORDER BY conversation_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn is_member(&self, user_id: i64, conversation_id: i64) -> ChatResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT 1 FROM conversation_members
            WHERE conversation_id = ? AND user_id = ? AND left_at IS NULL
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    async fn get_member(&self, conversation_id: i64, user_id: i64) -> ChatResult<Option<Member>> {
        let mut conn = self.pool.acquire().await?;
        fetch_member(&mut conn, conversation_id, user_id).await
    }

    async fn list_members(&self, conversation_id: i64) -> ChatResult<Vec<Member>> {
        let sql = format!(
            "{MEMBER_COLUMNS} WHERE conversation_id = ? AND left_at IS NULL ORDER BY joined_at, user_id"
        );
        let rows = sqlx::query(&sql)
            .bind(conversation_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(member_from_row).collect()
    }

    async fn add_members(
        &self,
        conversation_id: i64,
        user_ids: Vec<i64>,
    ) -> ChatResult<Vec<Member>> {
        let mut tx = self.pool.begin().await?;
        let conversation = fetch_conversation(&mut tx, conversation_id).await?;

        if conversation.chat_type == ChatType::Direct {
            return Err(ChatError::validation(
                "direct conversations have fixed membership",
            ));
        }

        let now = now();
        let unique: BTreeSet<i64> = user_ids.into_iter().collect();
        let mut added = Vec::with_capacity(unique.len());

        for user_id in unique {
            ensure_company_user(&mut tx, conversation.company_id, user_id).await?;

            let existing = sqlx::query(
                "SELECT left_at FROM conversation_members WHERE conversation_id = ? AND user_id = ?",
            )
            .bind(conversation_id)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;

            match existing {
                None => insert_member(&mut tx, conversation_id, user_id, MemberRole::Member, &now).await?,
                Some(row) => {
                    let left_at: Option<String> = row.try_get("left_at")?;
                    if left_at.is_none() {
                        continue;
                    }
                    sqlx::query(
                        r#"
                        UPDATE conversation_members
                        SET left_at = NULL, role = 'member', joined_at = ?, last_read_message_id = NULL, last_read_at = NULL
                        WHERE conversation_id = ? AND user_id = ?
                        "#,
                    )
                    .bind(&now)
                    .bind(conversation_id)
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await?;
                }
            }

            if let Some(member) = fetch_member(&mut tx, conversation_id, user_id).await? {
                added.push(member);
            }
        }

        refresh_member_count(&mut tx, conversation_id).await?;
        tx.commit().await?;

        debug!(conversation_id, added = added.len(), "added conversation members");
        Ok(added)
    }

    async fn set_member_role(
        &self,
        conversation_id: i64,
        user_id: i64,
        role: MemberRole,
    ) -> ChatResult<Member> {
        if role == MemberRole::Owner {
            return Err(ChatError::validation("ownership cannot be assigned"));
        }

        let mut tx = self.pool.begin().await?;
        let member = fetch_member(&mut tx, conversation_id, user_id)
            .await?
            .ok_or_else(|| ChatError::member_not_found(conversation_id, user_id))?;

        if member.role == MemberRole::Owner {
            return Err(ChatError::permission_denied("the owner's role cannot be changed"));
        }

        sqlx::query(
            "UPDATE conversation_members SET role = ? WHERE conversation_id = ? AND user_id = ?",
        )
        .bind(role.as_str())
        .bind(conversation_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let updated = fetch_member(&mut tx, conversation_id, user_id)
            .await?
            .ok_or_else(|| ChatError::member_not_found(conversation_id, user_id))?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn remove_member(&self, conversation_id: i64, user_id: i64) -> ChatResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE conversation_members SET left_at = ?
            WHERE conversation_id = ? AND user_id = ? AND left_at IS NULL
            "#,
        )
        .bind(now())
        .bind(conversation_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ChatError::member_not_found(conversation_id, user_id));
        }

        refresh_member_count(&mut tx, conversation_id).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn create_message(&self, new: NewMessage) -> ChatResult<StoredMessage> {
        if !new.kind.is_content() {
            return Err(ChatError::validation(format!(
                "'{}' is not a storable message kind",
                new.kind
            )));
        }
        let has_attachment =
            new.media_id.is_some() || new.sticker_id.is_some() || new.forwarded_from_id.is_some();
        Validator::message_content(&new.content, has_attachment)?;

        let mut tx = self.pool.begin().await?;
        fetch_conversation(&mut tx, new.conversation_id).await?;

        if let Some(reply_to) = new.reply_to_id {
            let target = fetch_live_message(&mut tx, reply_to).await?;
            if target.conversation_id != new.conversation_id {
                return Err(ChatError::validation(
                    "reply target belongs to another conversation",
                ));
            }
        }

        if let Some(forwarded) = new.forwarded_from_id {
            fetch_live_message(&mut tx, forwarded).await?;
        }

        if let Some(media_id) = new.media_id {
            let media = sqlx::query("SELECT owner_id, message_id FROM media WHERE id = ?")
                .bind(media_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| ChatError::media_not_found(media_id))?;

            let owner_id: i64 = media.try_get("owner_id")?;
            let linked: Option<i64> = media.try_get("message_id")?;
            if owner_id != new.sender_id {
                return Err(ChatError::access_denied("media belongs to another user"));
            }
            if linked.is_some() {
                return Err(ChatError::validation("media is already attached to a message"));
            }
        }

        let extras = new.extras.as_ref().map(serde_json::to_string).transpose()?;
        let now = now();

        let id = sqlx::query(
            r#"
            INSERT INTO messages
                (conversation_id, sender_id, kind, content, reply_to_id, forwarded_from_id,
                 media_id, sticker_id, is_silent, extras, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new.conversation_id)
        .bind(new.sender_id)
        .bind(new.kind.as_str())
        .bind(&new.content)
        .bind(new.reply_to_id)
        .bind(new.forwarded_from_id)
        .bind(new.media_id)
        .bind(new.sticker_id)
        .bind(new.is_silent)
        .bind(extras)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        if let Some(media_id) = new.media_id {
            sqlx::query("UPDATE media SET message_id = ? WHERE id = ?")
                .bind(id)
                .bind(media_id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            "UPDATE conversations SET message_count = message_count + 1, updated_at = ? WHERE id = ?",
        )
        .bind(&now)
        .bind(new.conversation_id)
        .execute(&mut *tx)
        .await?;

        let message = fetch_live_message(&mut tx, id).await?;
        tx.commit().await?;

        debug!(
            message_id = id,
            conversation_id = new.conversation_id,
            sender_id = new.sender_id,
            "stored message"
        );
        Ok(message)
    }

    async fn get_message(&self, message_id: i64) -> ChatResult<StoredMessage> {
        let mut conn = self.pool.acquire().await?;
        fetch_live_message(&mut conn, message_id).await
    }

    async fn list_messages(
        &self,
        conversation_id: i64,
        before: Option<i64>,
        limit: i64,
    ) -> ChatResult<Vec<StoredMessage>> {
        let sql = format!(
            r#"{MESSAGE_COLUMNS}
            WHERE m.conversation_id = ? AND m.deleted_at IS NULL AND (? IS NULL OR m.id < ?)
            ORDER BY m.id DESC
            LIMIT ?"#
        );
        let rows = sqlx::query(&sql)
            .bind(conversation_id)
            .bind(before)
            .bind(before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let mut messages = rows
            .iter()
            .map(message_from_row)
            .collect::<ChatResult<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn edit_message(&self, message_id: i64, content: String) -> ChatResult<StoredMessage> {
        let mut tx = self.pool.begin().await?;
        let existing = fetch_live_message(&mut tx, message_id).await?;
        Validator::message_content(
            &content,
            existing.media_id.is_some() || existing.sticker_id.is_some(),
        )?;

        sqlx::query("UPDATE messages SET content = ?, edited_at = ? WHERE id = ?")
            .bind(&content)
            .bind(now())
            .bind(message_id)
            .execute(&mut *tx)
            .await?;

        let updated = fetch_live_message(&mut tx, message_id).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn delete_message(&self, message_id: i64) -> ChatResult<StoredMessage> {
        let mut tx = self.pool.begin().await?;
        let existing = fetch_live_message(&mut tx, message_id).await?;
        let now = now();

        sqlx::query("UPDATE messages SET deleted_at = ? WHERE id = ?")
            .bind(&now)
            .bind(message_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM pinned_messages WHERE message_id = ?")
            .bind(message_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            UPDATE conversations
            SET message_count = MAX(message_count - 1, 0), updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&now)
        .bind(existing.conversation_id)
        .execute(&mut *tx)
        .await?;

        let deleted = fetch_any_message(&mut tx, message_id).await?;
        tx.commit().await?;
        Ok(deleted)
    }

    async fn mark_read(
        &self,
        conversation_id: i64,
        user_id: i64,
        message_id: Option<i64>,
    ) -> ChatResult<ReadReceipt> {
        let mut tx = self.pool.begin().await?;

        fetch_member(&mut tx, conversation_id, user_id)
            .await?
            .ok_or_else(|| ChatError::member_not_found(conversation_id, user_id))?;

        let target = match message_id {
            Some(id) => {
                let message = fetch_live_message(&mut tx, id).await?;
                if message.conversation_id != conversation_id {
                    return Err(ChatError::validation(
                        "message belongs to another conversation",
                    ));
                }
                Some(id)
            }
            None => {
                sqlx::query_scalar::<_, Option<i64>>(
                    "SELECT MAX(id) FROM messages WHERE conversation_id = ? AND deleted_at IS NULL",
                )
                .bind(conversation_id)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        let now = now();
        // Read positions only move forward.
        sqlx::query(
            r#"
            UPDATE conversation_members
            SET last_read_message_id = CASE
                    WHEN ? IS NULL THEN last_read_message_id
                    WHEN last_read_message_id IS NULL OR last_read_message_id < ? THEN ?
                    ELSE last_read_message_id
                END,
                last_read_at = ?
            WHERE conversation_id = ? AND user_id = ? AND left_at IS NULL
            "#,
        )
        .bind(target)
        .bind(target)
        .bind(target)
        .bind(&now)
        .bind(conversation_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let last_read_message_id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT last_read_message_id FROM conversation_members
            WHERE conversation_id = ? AND user_id = ?
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ReadReceipt {
            conversation_id,
            user_id,
            last_read_message_id,
            last_read_at: now,
        })
    }

    async fn toggle_reaction(
        &self,
        message_id: i64,
        user_id: i64,
        emoji: String,
    ) -> ChatResult<ReactionUpdate> {
        Validator::emoji(&emoji)?;
        let emoji = emoji.trim().to_owned();

        let mut tx = self.pool.begin().await?;
        fetch_live_message(&mut tx, message_id).await?;

        let removed = sqlx::query(
            "DELETE FROM message_reactions WHERE message_id = ? AND user_id = ? AND emoji = ?",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(&emoji)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let added = removed == 0;
        if added {
            sqlx::query(
                r#"
                INSERT INTO message_reactions (message_id, user_id, emoji, created_at)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(message_id)
            .bind(user_id)
            .bind(&emoji)
            .bind(now())
            .execute(&mut *tx)
            .await?;
        }

        let rows = sqlx::query(
            r#"
            SELECT emoji, COUNT(*) AS count FROM message_reactions
            WHERE message_id = ?
            GROUP BY emoji
            ORDER BY emoji
            "#,
        )
        .bind(message_id)
        .fetch_all(&mut *tx)
        .await?;

        let reactions = rows
            .iter()
            .map(|row| -> ChatResult<ReactionCount> {
                Ok(ReactionCount {
                    emoji: row.try_get("emoji")?,
                    count: row.try_get("count")?,
                })
            })
            .collect::<ChatResult<Vec<_>>>()?;

        tx.commit().await?;

        Ok(ReactionUpdate {
            message_id,
            emoji,
            added,
            reactions,
        })
    }

    async fn set_pinned(
        &self,
        message_id: i64,
        user_id: i64,
        pinned: bool,
    ) -> ChatResult<StoredMessage> {
        let mut tx = self.pool.begin().await?;
        let message = fetch_live_message(&mut tx, message_id).await?;

        if pinned {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO pinned_messages (conversation_id, message_id, pinned_by, pinned_at)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(message.conversation_id)
            .bind(message_id)
            .bind(user_id)
            .bind(now())
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query("DELETE FROM pinned_messages WHERE message_id = ?")
                .bind(message_id)
                .execute(&mut *tx)
                .await?;
        }

        let updated = fetch_live_message(&mut tx, message_id).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn list_pinned(&self, conversation_id: i64) -> ChatResult<Vec<PinnedMessage>> {
        let mut conn = self.pool.acquire().await?;

        let pins = sqlx::query(
            r#"
            SELECT message_id, pinned_by, pinned_at FROM pinned_messages
            WHERE conversation_id = ?
            ORDER BY pinned_at DESC, message_id DESC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&mut *conn)
        .await?;

        let mut pinned = Vec::with_capacity(pins.len());
        for row in &pins {
            let message_id: i64 = row.try_get("message_id")?;
            let message = fetch_any_message(&mut conn, message_id).await?;
            if message.is_deleted() {
                continue;
            }
            pinned.push(PinnedMessage {
                message,
                pinned_by: row.try_get("pinned_by")?,
                pinned_at: row.try_get("pinned_at")?,
            });
        }
        Ok(pinned)
    }

    async fn search_messages(
        &self,
        user_id: i64,
        query: String,
        limit: i64,
    ) -> ChatResult<Vec<StoredMessage>> {
        Validator::search_query(&query)?;

        let sql = format!(
            r#"{MESSAGE_COLUMNS}
            JOIN conversation_members cm
              ON cm.conversation_id = m.conversation_id AND cm.user_id = ? AND cm.left_at IS NULL
            WHERE m.deleted_at IS NULL AND m.content LIKE ? ESCAPE '\'
            ORDER BY m.id DESC
            LIMIT ?"#
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(escape_like(query.trim()))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn register_media(
        &self,
        owner_id: i64,
        file_name: String,
        content_type: String,
        size_bytes: i64,
    ) -> ChatResult<Media> {
        let created_at = now();
        let id = sqlx::query(
            r#"
            INSERT INTO media (owner_id, file_name, content_type, size_bytes, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(owner_id)
        .bind(&file_name)
        .bind(&content_type)
        .bind(size_bytes)
        .bind(&created_at)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(Media {
            id,
            owner_id,
            file_name,
            content_type,
            size_bytes,
            message_id: None,
            created_at,
        })
    }

    async fn call_room_token_exists(&self, token: String) -> ChatResult<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM call_rooms WHERE token = ?")
            .bind(&token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn create_call_room(
        &self,
        conversation_id: i64,
        created_by: i64,
        token: String,
    ) -> ChatResult<CallRoom> {
        let mut conn = self.pool.acquire().await?;
        fetch_conversation(&mut conn, conversation_id).await?;

        let created_at = now();
        let inserted = sqlx::query(
            r#"
            INSERT INTO call_rooms (conversation_id, token, created_by, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(conversation_id)
        .bind(&token)
        .bind(created_by)
        .bind(&created_at)
        .execute(&mut *conn)
        .await;

        let id = match inserted {
            Ok(result) => result.last_insert_rowid(),
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                return Err(ChatError::conflict("call room token already in use"));
            }
            Err(err) => return Err(err.into()),
        };

        info!(conversation_id, call_room_id = id, "started call room");
        Ok(CallRoom {
            id,
            conversation_id,
            token,
            created_by,
            created_at,
        })
    }
}
