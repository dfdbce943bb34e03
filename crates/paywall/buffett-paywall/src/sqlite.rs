//! SQLite-backed account store.
//!
//! One `users` row per account plus an append-only `analysis_history` table.

use crate::error::{PaywallError, PaywallResult};
use crate::store::{Account, AccountStore, AnalysisRecord};
use crate::subscription::{Subscription, SubscriptionTier};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const SCHEMA_VERSION: i32 = 1;

pub struct SqliteAccountStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAccountStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> PaywallResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| PaywallError::Store(format!("{}: {e}", parent.display())))?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        let store = Self::from_connection(conn)?;

        info!("Account database opened at {:?}", path);
        Ok(store)
    }

    pub fn open_in_memory() -> PaywallResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> PaywallResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        create_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> PaywallResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> PaywallResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| PaywallError::Store("connection lock poisoned".to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| PaywallError::Store(e.to_string()))?
    }
}

fn create_schema(conn: &Connection) -> PaywallResult<()> {
    let current: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if current >= SCHEMA_VERSION {
        debug!("Account schema up to date (version {})", current);
        return Ok(());
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            email TEXT PRIMARY KEY,
            display_name TEXT,
            subscription_tier TEXT NOT NULL DEFAULT 'free',
            subscription_id TEXT,
            subscription_end_date TEXT,
            analysis_count_weekly INTEGER NOT NULL DEFAULT 0,
            last_weekly_reset TEXT,
            ai_count_daily INTEGER NOT NULL DEFAULT 0,
            last_daily_reset TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS analysis_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_email TEXT NOT NULL REFERENCES users(email) ON DELETE CASCADE,
            ticker TEXT NOT NULL,
            analysis_type TEXT NOT NULL,
            buffett_score REAL NOT NULL,
            owner_earnings REAL NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_analysis_history_user
            ON analysis_history(user_email, id);
        "#,
    )?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

    info!("Account schema created (version {})", SCHEMA_VERSION);
    Ok(())
}

fn parse_timestamp(value: &str) -> PaywallResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PaywallError::Store(format!("bad timestamp {value:?}: {e}")))
}

fn parse_date(value: Option<String>) -> PaywallResult<Option<NaiveDate>> {
    value
        .map(|v| {
            v.parse::<NaiveDate>()
                .map_err(|e| PaywallError::Store(format!("bad date {v:?}: {e}")))
        })
        .transpose()
}

struct UserRow {
    email: String,
    display_name: Option<String>,
    tier: String,
    subscription_id: Option<String>,
    end_date: Option<String>,
    analysis_count_weekly: u32,
    last_weekly_reset: Option<String>,
    ai_count_daily: u32,
    last_daily_reset: Option<String>,
    created_at: String,
}

fn load_account(conn: &Connection, email: &str) -> PaywallResult<Option<Account>> {
    let row = conn
        .query_row(
            r#"
            SELECT email, display_name, subscription_tier, subscription_id,
                   subscription_end_date, analysis_count_weekly, last_weekly_reset,
                   ai_count_daily, last_daily_reset, created_at
            FROM users WHERE email = ?1
            "#,
            params![email],
            |row| {
                Ok(UserRow {
                    email: row.get(0)?,
                    display_name: row.get(1)?,
                    tier: row.get(2)?,
                    subscription_id: row.get(3)?,
                    end_date: row.get(4)?,
                    analysis_count_weekly: row.get(5)?,
                    last_weekly_reset: row.get(6)?,
                    ai_count_daily: row.get(7)?,
                    last_daily_reset: row.get(8)?,
                    created_at: row.get(9)?,
                })
            },
        )
        .optional()?;
    let Some(row) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        r#"
        SELECT ticker, analysis_type, buffett_score, owner_earnings, created_at
        FROM analysis_history WHERE user_email = ?1 ORDER BY id
        "#,
    )?;
    let raw: Vec<(String, String, f64, f64, String)> = stmt
        .query_map(params![email], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
        })?
        .collect::<Result<_, _>>()?;
    let history = raw
        .into_iter()
        .map(|(ticker, analysis_type, buffett_score, owner_earnings, created_at)| {
            Ok(AnalysisRecord {
                ticker,
                analysis_type,
                buffett_score,
                owner_earnings,
                created_at: parse_timestamp(&created_at)?,
            })
        })
        .collect::<PaywallResult<Vec<_>>>()?;

    Ok(Some(Account {
        email: row.email,
        display_name: row.display_name,
        subscription: Subscription {
            tier: row.tier.parse::<SubscriptionTier>()?,
            subscription_id: row.subscription_id,
            end_date: row.end_date.as_deref().map(parse_timestamp).transpose()?,
        },
        analysis_count_weekly: row.analysis_count_weekly,
        last_weekly_reset: parse_date(row.last_weekly_reset)?,
        ai_count_daily: row.ai_count_daily,
        last_daily_reset: parse_date(row.last_daily_reset)?,
        history,
        created_at: parse_timestamp(&row.created_at)?,
    }))
}

/// Upsert the user row and append history entries not yet stored. History is
/// append-only, so rows beyond the stored count are the new ones.
fn save_account(conn: &mut Connection, account: &Account) -> PaywallResult<()> {
    let tx = conn.transaction()?;
    tx.execute(
        r#"
        INSERT INTO users (email, display_name, subscription_tier, subscription_id,
                           subscription_end_date, analysis_count_weekly, last_weekly_reset,
                           ai_count_daily, last_daily_reset, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(email) DO UPDATE SET
            display_name = excluded.display_name,
            subscription_tier = excluded.subscription_tier,
            subscription_id = excluded.subscription_id,
            subscription_end_date = excluded.subscription_end_date,
            analysis_count_weekly = excluded.analysis_count_weekly,
            last_weekly_reset = excluded.last_weekly_reset,
            ai_count_daily = excluded.ai_count_daily,
            last_daily_reset = excluded.last_daily_reset
        "#,
        params![
            account.email,
            account.display_name,
            account.subscription.tier.as_str(),
            account.subscription.subscription_id,
            account.subscription.end_date.map(|d| d.to_rfc3339()),
            account.analysis_count_weekly,
            account.last_weekly_reset.map(|d| d.to_string()),
            account.ai_count_daily,
            account.last_daily_reset.map(|d| d.to_string()),
            account.created_at.to_rfc3339(),
        ],
    )?;

    let stored: i64 = tx.query_row(
        "SELECT COUNT(*) FROM analysis_history WHERE user_email = ?1",
        params![account.email],
        |row| row.get(0),
    )?;
    let stored = usize::try_from(stored).unwrap_or(0);
    {
        let mut insert = tx.prepare(
            r#"
            INSERT INTO analysis_history
                (user_email, ticker, analysis_type, buffett_score, owner_earnings, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )?;
        for record in account.history.iter().skip(stored) {
            insert.execute(params![
                account.email,
                record.ticker,
                record.analysis_type,
                record.buffett_score,
                record.owner_earnings,
                record.created_at.to_rfc3339(),
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

#[async_trait]
impl AccountStore for SqliteAccountStore {
    async fn load(&self, email: &str) -> PaywallResult<Option<Account>> {
        let email = email.to_string();
        self.with_conn(move |conn| load_account(conn, &email)).await
    }

    async fn save(&self, account: Account) -> PaywallResult<()> {
        self.with_conn(move |conn| save_account(conn, &account)).await
    }
}
