//! Database operations for Crosspost
//!
//! Status columns only move through conditional updates
//! (`UPDATE ... WHERE status IN (...)`), so a transition that has already
//! happened reports `false` instead of being applied twice. Every change to
//! a provider outcome appends a row to `outcome_events` in the same
//! transaction.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::Row;

use crate::error::{CrosspostError, DbError, Result};
use crate::types::{
    ErrorClass, MediaAsset, Notification, NotificationKind, OutcomeEvent, OutcomeStatus,
    PlanTier, Post, PostStatus, ProviderOutcome, Subscription, SubscriptionStatus, User,
};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn corrupt(table: &'static str, reason: impl Into<String>) -> CrosspostError {
    DbError::CorruptRow {
        table,
        reason: reason.into(),
    }
    .into()
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn get<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column)
        .map_err(|e| DbError::SqlxError(e).into())
}

fn parse_column<T: FromStr<Err = String>>(
    row: &SqliteRow,
    table: &'static str,
    column: &str,
) -> Result<T> {
    let raw: String = get(row, column)?;
    raw.parse::<T>().map_err(|e| corrupt(table, e))
}

fn parse_optional<T: FromStr<Err = String>>(
    row: &SqliteRow,
    table: &'static str,
    column: &str,
) -> Result<Option<T>> {
    let raw: Option<String> = get(row, column)?;
    raw.map(|s| s.parse::<T>().map_err(|e| corrupt(table, e)))
        .transpose()
}

fn post_from_row(row: &SqliteRow) -> Result<Post> {
    let media_ids: String = get(row, "media_ids")?;
    let providers: String = get(row, "providers")?;

    Ok(Post {
        id: get(row, "id")?,
        owner_id: get(row, "owner_id")?,
        content: get(row, "content")?,
        media_ids: serde_json::from_str(&media_ids)
            .map_err(|e| corrupt("posts", format!("media_ids: {}", e)))?,
        providers: serde_json::from_str(&providers)
            .map_err(|e| corrupt("posts", format!("providers: {}", e)))?,
        scheduled_at: get(row, "scheduled_at")?,
        status: parse_column(row, "posts", "status")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn outcome_from_row(row: &SqliteRow) -> Result<ProviderOutcome> {
    let attempts: i64 = get(row, "attempts")?;
    Ok(ProviderOutcome {
        post_id: get(row, "post_id")?,
        provider: get(row, "provider")?,
        status: parse_column(row, "provider_outcomes", "status")?,
        error_class: parse_optional(row, "provider_outcomes", "error_class")?,
        error_message: get(row, "error_message")?,
        attempts: attempts as u32,
        external_id: get(row, "external_id")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn media_from_row(row: &SqliteRow) -> Result<MediaAsset> {
    let size: i64 = get(row, "size_bytes")?;
    Ok(MediaAsset {
        id: get(row, "id")?,
        owner_id: get(row, "owner_id")?,
        storage_key: get(row, "storage_key")?,
        file_name: get(row, "file_name")?,
        mime_type: get(row, "mime_type")?,
        size_bytes: size as u64,
        generated: get(row, "generated")?,
        created_at: get(row, "created_at")?,
    })
}

fn notification_from_row(row: &SqliteRow) -> Result<Notification> {
    Ok(Notification {
        id: get(row, "id")?,
        user_id: get(row, "user_id")?,
        post_id: get(row, "post_id")?,
        message: get(row, "message")?,
        kind: parse_column::<NotificationKind>(row, "notifications", "kind")?,
        read: get(row, "read")?,
        created_at: get(row, "created_at")?,
    })
}

const OUTCOME_COLUMNS: &str =
    "post_id, provider, status, error_class, error_message, attempts, external_id, updated_at";

async fn append_event(conn: &mut SqliteConnection, outcome: &ProviderOutcome) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO outcome_events
            (post_id, provider, status, error_class, error_message, attempts, external_id, recorded_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&outcome.post_id)
    .bind(&outcome.provider)
    .bind(outcome.status.as_str())
    .bind(outcome.error_class.map(|c| c.as_str()))
    .bind(&outcome.error_message)
    .bind(outcome.attempts as i64)
    .bind(&outcome.external_id)
    .bind(outcome.updated_at)
    .execute(conn)
    .await
    .map_err(DbError::SqlxError)?;
    Ok(())
}

impl Database {
    /// Open (creating if needed) the database at `db_path` and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ---- users & subscriptions ----

    pub async fn insert_user(&self, user: &User) -> Result<()> {
        sqlx::query("INSERT INTO users (id, username, email, created_at) VALUES (?, ?, ?, ?)")
            .bind(&user.id)
            .bind(&user.username)
            .bind(&user.email)
            .bind(user.created_at)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(())
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, username, email, created_at FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.map(|r| {
            Ok(User {
                id: get(&r, "id")?,
                username: get(&r, "username")?,
                email: get(&r, "email")?,
                created_at: get(&r, "created_at")?,
            })
        })
        .transpose()
    }

    /// Insert or replace a subscription mirrored from billing
    pub async fn upsert_subscription(&self, subscription: &Subscription) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (id, user_id, tier, status, next_billing_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                tier = excluded.tier,
                status = excluded.status,
                next_billing_at = excluded.next_billing_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&subscription.id)
        .bind(&subscription.user_id)
        .bind(subscription.tier.as_str())
        .bind(subscription.status.as_str())
        .bind(subscription.next_billing_at)
        .bind(subscription.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;
        Ok(())
    }

    pub async fn get_subscription(&self, id: &str) -> Result<Option<Subscription>> {
        let row = sqlx::query(
            "SELECT id, user_id, tier, status, next_billing_at, updated_at FROM subscriptions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(|r| {
            Ok(Subscription {
                id: get(&r, "id")?,
                user_id: get(&r, "user_id")?,
                tier: parse_column::<PlanTier>(&r, "subscriptions", "tier")?,
                status: parse_column::<SubscriptionStatus>(&r, "subscriptions", "status")?,
                next_billing_at: get(&r, "next_billing_at")?,
                updated_at: get(&r, "updated_at")?,
            })
        })
        .transpose()
    }

    /// Tier of the user's most recently updated active subscription
    pub async fn active_tier(&self, user_id: &str) -> Result<Option<PlanTier>> {
        let row = sqlx::query(
            r#"
            SELECT tier FROM subscriptions
            WHERE user_id = ? AND status = 'active'
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(|r| parse_column::<PlanTier>(&r, "subscriptions", "tier"))
            .transpose()
    }

    /// Mark every active subscription whose billing instant has passed as
    /// expired. Returns the ids that changed; a second call returns none.
    pub async fn expire_overdue_subscriptions(&self, now: i64) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'expired', updated_at = ?
            WHERE status = 'active' AND next_billing_at < ?
            RETURNING id
            "#,
        )
        .bind(now)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(|r| get(r, "id")).collect()
    }

    // ---- provider accounts ----

    pub async fn upsert_provider_account(
        &self,
        user_id: &str,
        provider: &str,
        account_id: &str,
        access_token: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO provider_accounts (user_id, provider, account_id, access_token, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id, provider) DO UPDATE SET
                account_id = excluded.account_id,
                access_token = excluded.access_token,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(provider)
        .bind(account_id)
        .bind(access_token)
        .bind(now())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;
        Ok(())
    }

    /// `(account_id, access_token)` for a linked account
    pub async fn get_provider_account(
        &self,
        user_id: &str,
        provider: &str,
    ) -> Result<Option<(String, String)>> {
        let row = sqlx::query(
            "SELECT account_id, access_token FROM provider_accounts WHERE user_id = ? AND provider = ?",
        )
        .bind(user_id)
        .bind(provider)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(|r| Ok((get(&r, "account_id")?, get(&r, "access_token")?)))
            .transpose()
    }

    // ---- media ----

    pub async fn insert_media_asset(&self, asset: &MediaAsset) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO media_assets
                (id, owner_id, storage_key, file_name, mime_type, size_bytes, generated, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&asset.id)
        .bind(&asset.owner_id)
        .bind(&asset.storage_key)
        .bind(&asset.file_name)
        .bind(&asset.mime_type)
        .bind(asset.size_bytes as i64)
        .bind(asset.generated)
        .bind(asset.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;
        Ok(())
    }

    pub async fn get_media_asset(&self, id: &str) -> Result<Option<MediaAsset>> {
        let row = sqlx::query("SELECT * FROM media_assets WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(media_from_row).transpose()
    }

    /// Fetch assets in the order of `ids`; any missing id is an error
    pub async fn get_media_assets(&self, ids: &[String]) -> Result<Vec<MediaAsset>> {
        let mut assets = Vec::with_capacity(ids.len());
        for id in ids {
            let asset = self
                .get_media_asset(id)
                .await?
                .ok_or_else(|| CrosspostError::NotFound(format!("media asset {}", id)))?;
            assets.push(asset);
        }
        Ok(assets)
    }

    pub async fn count_generated_media_since(&self, owner_id: &str, since: i64) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM media_assets WHERE owner_id = ? AND generated = 1 AND created_at >= ?",
        )
        .bind(owner_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;
        Ok(count as u32)
    }

    /// Drop asset rows whose object has been deleted
    pub async fn delete_media_assets_by_key(&self, storage_key: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM media_assets WHERE storage_key = ?")
            .bind(storage_key)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(result.rows_affected())
    }

    // ---- posts ----

    pub async fn create_post(&self, post: &Post) -> Result<()> {
        let media_ids = serde_json::to_string(&post.media_ids)
            .map_err(|e| CrosspostError::InvalidInput(e.to_string()))?;
        let providers = serde_json::to_string(&post.providers)
            .map_err(|e| CrosspostError::InvalidInput(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO posts
                (id, owner_id, content, media_ids, providers, scheduled_at, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.owner_id)
        .bind(&post.content)
        .bind(media_ids)
        .bind(providers)
        .bind(post.scheduled_at)
        .bind(post.status.as_str())
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_post(&self, post_id: &str) -> Result<Option<Post>> {
        let row = sqlx::query("SELECT * FROM posts WHERE id = ?")
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(post_from_row).transpose()
    }

    /// Move a post to `to` if it is currently in one of `from`
    pub async fn transition_post_status(
        &self,
        post_id: &str,
        from: &[PostStatus],
        to: PostStatus,
    ) -> Result<bool> {
        if from.is_empty() {
            return Ok(false);
        }
        let sql = format!(
            "UPDATE posts SET status = ?, updated_at = ? WHERE id = ? AND status IN ({})",
            placeholders(from.len())
        );
        let mut query = sqlx::query(&sql).bind(to.as_str()).bind(now()).bind(post_id);
        for status in from {
            query = query.bind(status.as_str());
        }

        let result = query.execute(&self.pool).await.map_err(DbError::SqlxError)?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn count_posts_since(
        &self,
        owner_id: &str,
        statuses: &[PostStatus],
        since: i64,
    ) -> Result<u32> {
        if statuses.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "SELECT COUNT(*) FROM posts WHERE owner_id = ? AND created_at >= ? AND status IN ({})",
            placeholders(statuses.len())
        );
        let mut query = sqlx::query_scalar::<_, i64>(&sql).bind(owner_id).bind(since);
        for status in statuses {
            query = query.bind(status.as_str());
        }

        let count = query
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(count as u32)
    }

    /// Ids of scheduled posts whose instant is at or before `now`
    pub async fn due_scheduled_posts(&self, now: i64) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM posts
            WHERE status = 'scheduled' AND scheduled_at IS NOT NULL AND scheduled_at <= ?
            ORDER BY scheduled_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(|r| get(r, "id")).collect()
    }

    pub async fn list_posts_by_owner(&self, owner_id: &str, limit: u32) -> Result<Vec<Post>> {
        let rows = sqlx::query(
            "SELECT * FROM posts WHERE owner_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(owner_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(post_from_row).collect()
    }

    // ---- provider outcomes ----

    /// Start fan-out: `QUEUED|SCHEDULED -> PUBLISHING` plus one pending
    /// outcome per provider, atomically. Returns false if the post was not
    /// in a startable state (already started, or never queued).
    pub async fn begin_publishing(&self, post_id: &str, providers: &[String]) -> Result<bool> {
        let now = now();
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let updated = sqlx::query(
            r#"
            UPDATE posts SET status = 'publishing', updated_at = ?
            WHERE id = ? AND status IN ('queued', 'scheduled')
            "#,
        )
        .bind(now)
        .bind(post_id)
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await.map_err(DbError::SqlxError)?;
            return Ok(false);
        }

        for provider in providers {
            let outcome = ProviderOutcome {
                post_id: post_id.to_string(),
                provider: provider.clone(),
                status: OutcomeStatus::Pending,
                error_class: None,
                error_message: None,
                attempts: 0,
                external_id: None,
                updated_at: now,
            };

            sqlx::query(&format!(
                "INSERT INTO provider_outcomes ({}) VALUES (?, ?, 'pending', NULL, NULL, 0, NULL, ?)",
                OUTCOME_COLUMNS
            ))
            .bind(post_id)
            .bind(provider)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;

            append_event(&mut tx, &outcome).await?;
        }

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(true)
    }

    pub async fn get_outcomes(&self, post_id: &str) -> Result<Vec<ProviderOutcome>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM provider_outcomes WHERE post_id = ? ORDER BY rowid",
            OUTCOME_COLUMNS
        ))
        .bind(post_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(outcome_from_row).collect()
    }

    pub async fn get_outcome(&self, post_id: &str, provider: &str) -> Result<Option<ProviderOutcome>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM provider_outcomes WHERE post_id = ? AND provider = ?",
            OUTCOME_COLUMNS
        ))
        .bind(post_id)
        .bind(provider)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(outcome_from_row).transpose()
    }

    /// Record a non-terminal step (uploading/publishing). Ignored once the
    /// outcome is terminal.
    pub async fn update_outcome_progress(
        &self,
        post_id: &str,
        provider: &str,
        status: OutcomeStatus,
        attempts: u32,
    ) -> Result<bool> {
        let now = now();
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE provider_outcomes SET status = ?, attempts = ?, updated_at = ?
            WHERE post_id = ? AND provider = ? AND status NOT IN ('succeeded', 'failed')
            RETURNING {}
            "#,
            OUTCOME_COLUMNS
        ))
        .bind(status.as_str())
        .bind(attempts as i64)
        .bind(now)
        .bind(post_id)
        .bind(provider)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        let Some(row) = row else {
            tx.rollback().await.map_err(DbError::SqlxError)?;
            return Ok(false);
        };

        let outcome = outcome_from_row(&row)?;
        append_event(&mut tx, &outcome).await?;
        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(true)
    }

    /// Write a terminal outcome. Returns false (and writes nothing) if the
    /// outcome was already terminal.
    pub async fn finalize_outcome(&self, outcome: &ProviderOutcome) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let updated = sqlx::query(
            r#"
            UPDATE provider_outcomes
            SET status = ?, error_class = ?, error_message = ?, attempts = ?, external_id = ?, updated_at = ?
            WHERE post_id = ? AND provider = ? AND status NOT IN ('succeeded', 'failed')
            "#,
        )
        .bind(outcome.status.as_str())
        .bind(outcome.error_class.map(|c| c.as_str()))
        .bind(&outcome.error_message)
        .bind(outcome.attempts as i64)
        .bind(&outcome.external_id)
        .bind(outcome.updated_at)
        .bind(&outcome.post_id)
        .bind(&outcome.provider)
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await.map_err(DbError::SqlxError)?;
            return Ok(false);
        }

        append_event(&mut tx, outcome).await?;
        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(true)
    }

    /// Fail every non-terminal outcome of a post with class `cancelled`.
    /// Returns the providers that were cancelled.
    pub async fn cancel_open_outcomes(&self, post_id: &str, message: &str) -> Result<Vec<String>> {
        let now = now();
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let rows = sqlx::query(&format!(
            r#"
            UPDATE provider_outcomes
            SET status = 'failed', error_class = ?, error_message = ?, updated_at = ?
            WHERE post_id = ? AND status NOT IN ('succeeded', 'failed')
            RETURNING {}
            "#,
            OUTCOME_COLUMNS
        ))
        .bind(ErrorClass::Cancelled.as_str())
        .bind(message)
        .bind(now)
        .bind(post_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        let mut cancelled = Vec::with_capacity(rows.len());
        for row in &rows {
            let outcome = outcome_from_row(row)?;
            append_event(&mut tx, &outcome).await?;
            cancelled.push(outcome.provider);
        }

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(cancelled)
    }

    /// `PUBLISHING -> terminal`. True only for the single caller that
    /// performed the transition.
    pub async fn complete_post(&self, post_id: &str, status: PostStatus) -> Result<bool> {
        if !status.is_terminal() {
            return Err(CrosspostError::InvalidState(format!(
                "cannot complete post with non-terminal status {}",
                status
            )));
        }
        self.transition_post_status(post_id, &[PostStatus::Publishing], status)
            .await
    }

    pub async fn list_outcome_events(&self, post_id: &str) -> Result<Vec<OutcomeEvent>> {
        let rows = sqlx::query("SELECT * FROM outcome_events WHERE post_id = ? ORDER BY id")
            .bind(post_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter()
            .map(|r| {
                let attempts: i64 = get(r, "attempts")?;
                Ok(OutcomeEvent {
                    id: get(r, "id")?,
                    post_id: get(r, "post_id")?,
                    provider: get(r, "provider")?,
                    status: parse_column(r, "outcome_events", "status")?,
                    error_class: parse_optional(r, "outcome_events", "error_class")?,
                    error_message: get(r, "error_message")?,
                    attempts: attempts as u32,
                    external_id: get(r, "external_id")?,
                    recorded_at: get(r, "recorded_at")?,
                })
            })
            .collect()
    }

    // ---- notifications ----

    pub async fn insert_notification(&self, notification: &Notification) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, post_id, message, kind, read, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&notification.id)
        .bind(&notification.user_id)
        .bind(&notification.post_id)
        .bind(&notification.message)
        .bind(notification.kind.as_str())
        .bind(notification.read)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;
        Ok(())
    }

    pub async fn list_notifications(
        &self,
        user_id: &str,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        let sql = if unread_only {
            "SELECT * FROM notifications WHERE user_id = ? AND read = 0 ORDER BY created_at DESC, rowid DESC"
        } else {
            "SELECT * FROM notifications WHERE user_id = ? ORDER BY created_at DESC, rowid DESC"
        };
        let rows = sqlx::query(sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(notification_from_row).collect()
    }

    pub async fn mark_notification_read(&self, user_id: &str, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE notifications SET read = 1 WHERE id = ? AND user_id = ? AND read = 0",
        )
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;
        Ok(result.rows_affected() == 1)
    }
}
