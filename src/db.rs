use chrono::{DateTime, SubsecRound, Utc};
use rand::Rng;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::{Difficulty, NewAttempt, NewItem, ReviewAttempt, ReviewableItem};
use crate::scheduler::{self, ScheduleOutcome};

// How long a writer waits on another connection's lock before SQLITE_BUSY
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const ITEM_COLUMNS: &str = "id, owner_id, title, summary, difficulty, source_url, review_count, \
     last_performance, last_reviewed_at, next_review_at, created_at";

const ATTEMPT_COLUMNS: &str =
    "id, item_id, owner_id, score, total_questions, answers, time_taken_seconds, completed_at";

/// SQLite-backed store for reviewable items and their attempts.
///
/// The connection sits behind a mutex so an `Arc<Database>` can be shared
/// across threads. Timestamps are stored as UTC epoch milliseconds.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::LockPoisoned)
    }

    pub fn init(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id TEXT NOT NULL,
                title TEXT NOT NULL,
                summary TEXT,
                difficulty TEXT NOT NULL DEFAULT 'medium' CHECK(difficulty IN ('easy', 'medium', 'hard')),
                source_url TEXT,
                review_count INTEGER NOT NULL DEFAULT 0 CHECK(review_count >= 0),
                last_performance REAL,
                last_reviewed_at INTEGER,
                next_review_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            -- Append-only; rows go away only with their item
            CREATE TABLE IF NOT EXISTS attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                item_id INTEGER NOT NULL,
                owner_id TEXT NOT NULL,
                score INTEGER NOT NULL CHECK(score >= 0),
                total_questions INTEGER NOT NULL CHECK(total_questions > 0),
                answers TEXT NOT NULL DEFAULT '[]',
                time_taken_seconds REAL,
                completed_at INTEGER NOT NULL,
                CHECK(score <= total_questions),
                FOREIGN KEY (item_id) REFERENCES items(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_items_owner_next_review ON items(owner_id, next_review_at);
            CREATE INDEX IF NOT EXISTS idx_attempts_item ON attempts(item_id);
            CREATE INDEX IF NOT EXISTS idx_attempts_owner ON attempts(owner_id);
            "#,
        )?;

        Ok(())
    }

    // Item operations
    pub fn add_item(&self, owner_id: &str, item: &NewItem) -> Result<i64> {
        self.add_item_at(owner_id, item, now_millis())
    }

    pub fn add_item_at(&self, owner_id: &str, item: &NewItem, now: DateTime<Utc>) -> Result<i64> {
        if owner_id.trim().is_empty() {
            return Err(Error::invalid("owner id must not be empty"));
        }
        if item.title.trim().is_empty() {
            return Err(Error::invalid("item title must not be empty"));
        }

        let next_review_at = scheduler::initial_review_at(now);
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO items (owner_id, title, summary, difficulty, source_url,
                               review_count, next_review_at, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)
            "#,
            params![
                owner_id,
                item.title.trim(),
                item.summary,
                item.difficulty.as_str(),
                item.source_url,
                next_review_at.timestamp_millis(),
                now.timestamp_millis(),
            ],
        )?;
        let id = conn.last_insert_rowid();

        info!(item_id = id, owner_id, "created reviewable item");
        Ok(id)
    }

    pub fn get_item(&self, id: i64) -> Result<Option<ReviewableItem>> {
        let conn = self.conn()?;
        fetch_item(&conn, id)
    }

    pub fn list_items(&self, owner_id: &str) -> Result<Vec<ReviewableItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM items WHERE owner_id = ?1 ORDER BY created_at ASC, id ASC",
            ITEM_COLUMNS
        ))?;
        let rows = stmt.query_map(params![owner_id], item_from_row)?;
        let items = rows.collect::<rusqlite::Result<Vec<_>>>()?;

        debug!(owner_id, count = items.len(), "listed items");
        Ok(items)
    }

    pub fn delete_item(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn()?
            .execute("DELETE FROM items WHERE id = ?1", params![id])?;
        if rows > 0 {
            info!(item_id = id, "deleted item and its attempts");
        }
        Ok(rows > 0)
    }

    // Attempt operations
    pub fn record_attempt(&self, attempt: &NewAttempt) -> Result<i64> {
        self.record_attempt_at(attempt, now_millis())
    }

    /// Appends an attempt. The item's schedule is left untouched; callers
    /// follow up with [`Database::advance_schedule`].
    pub fn record_attempt_at(&self, attempt: &NewAttempt, now: DateTime<Utc>) -> Result<i64> {
        scheduler::validate_score(attempt.score, attempt.total_questions)?;
        if let Some(secs) = attempt.time_taken_seconds {
            if !secs.is_finite() || secs < 0.0 {
                return Err(Error::invalid(format!(
                    "time taken must be a non-negative number of seconds, got {}",
                    secs
                )));
            }
        }
        if attempt.owner_id.trim().is_empty() {
            return Err(Error::invalid("owner id must not be empty"));
        }

        let answers = serde_json::to_string(&attempt.answers)?;
        let conn = self.conn()?;

        let exists = conn
            .query_row(
                "SELECT 1 FROM items WHERE id = ?1",
                params![attempt.item_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !exists {
            warn!(item_id = attempt.item_id, "attempt recorded against missing item");
            return Err(Error::NotFound(attempt.item_id));
        }

        conn.execute(
            r#"
            INSERT INTO attempts (item_id, owner_id, score, total_questions, answers,
                                  time_taken_seconds, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                attempt.item_id,
                attempt.owner_id,
                attempt.score,
                attempt.total_questions,
                answers,
                attempt.time_taken_seconds,
                now.timestamp_millis(),
            ],
        )?;
        let id = conn.last_insert_rowid();

        info!(
            attempt_id = id,
            item_id = attempt.item_id,
            score = attempt.score,
            total = attempt.total_questions,
            "recorded attempt"
        );
        Ok(id)
    }

    pub fn list_attempts(&self, item_id: i64) -> Result<Vec<ReviewAttempt>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM attempts WHERE item_id = ?1 ORDER BY completed_at ASC, id ASC",
            ATTEMPT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![item_id], attempt_from_row)?;
        let attempts = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(attempts)
    }

    // Scheduling
    pub fn advance_schedule(
        &self,
        item_id: i64,
        score: u32,
        total_questions: u32,
    ) -> Result<ScheduleOutcome> {
        self.advance_schedule_at(item_id, score, total_questions, now_millis())
    }

    /// Applies the scheduler to an item and persists the result.
    ///
    /// The read of `review_count` and the write-back share one immediate
    /// transaction, which holds SQLite's write lock for the whole
    /// read-modify-write. Concurrent advances of the same item therefore
    /// apply one after another, never from the same stale count.
    pub fn advance_schedule_at(
        &self,
        item_id: i64,
        score: u32,
        total_questions: u32,
        now: DateTime<Utc>,
    ) -> Result<ScheduleOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<u32> = tx
            .query_row(
                "SELECT review_count FROM items WHERE id = ?1",
                params![item_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            warn!(item_id, "cannot advance schedule of missing item");
            return Err(Error::NotFound(item_id));
        };

        let outcome = scheduler::schedule_next_review(current, score, total_questions, now)?;
        let performance = scheduler::performance(score, total_questions)?;

        tx.execute(
            r#"
            UPDATE items
            SET review_count = ?1,
                last_reviewed_at = ?2,
                next_review_at = ?3,
                last_performance = ?4
            WHERE id = ?5
            "#,
            params![
                outcome.new_review_count,
                now.timestamp_millis(),
                outcome.next_review_at.timestamp_millis(),
                performance,
                item_id
            ],
        )?;
        tx.commit()?;

        info!(
            item_id,
            band = outcome.band.as_str(),
            review_count = outcome.new_review_count,
            interval_days = outcome.interval_days,
            "advanced review schedule"
        );
        Ok(outcome)
    }

    /// Every item of `owner_id` whose `next_review_at` is at or before `now`,
    /// earliest due first.
    pub fn list_due(&self, owner_id: &str, now: DateTime<Utc>) -> Result<Vec<ReviewableItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {}
            FROM items
            WHERE owner_id = ?1 AND next_review_at <= ?2
            ORDER BY next_review_at ASC, id ASC
            "#,
            ITEM_COLUMNS
        ))?;
        let rows = stmt.query_map(params![owner_id, now.timestamp_millis()], item_from_row)?;
        let items = rows.collect::<rusqlite::Result<Vec<_>>>()?;

        debug!(owner_id, due = items.len(), "listed due items");
        Ok(items)
    }

    // Stochastic selection for next item to review
    pub fn next_due(&self, owner_id: &str, now: DateTime<Utc>) -> Result<Option<ReviewableItem>> {
        let mut rng = rand::thread_rng();
        self.next_due_with(owner_id, now, &mut rng)
    }

    pub fn next_due_with<R: Rng>(
        &self,
        owner_id: &str,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<Option<ReviewableItem>> {
        let due = self.list_due(owner_id, now)?;
        Ok(pick_weighted(due, now, rng))
    }

    pub fn stats(&self, owner_id: &str, now: DateTime<Utc>) -> Result<Stats> {
        let conn = self.conn()?;

        let total_items: i64 = conn.query_row(
            "SELECT COUNT(*) FROM items WHERE owner_id = ?1",
            params![owner_id],
            |row| row.get(0),
        )?;

        let total_attempts: i64 = conn.query_row(
            "SELECT COUNT(*) FROM attempts WHERE owner_id = ?1",
            params![owner_id],
            |row| row.get(0),
        )?;

        let due_now: i64 = conn.query_row(
            "SELECT COUNT(*) FROM items WHERE owner_id = ?1 AND next_review_at <= ?2",
            params![owner_id, now.timestamp_millis()],
            |row| row.get(0),
        )?;

        let avg_performance: f64 = conn.query_row(
            "SELECT COALESCE(AVG(CAST(score AS REAL) / total_questions), 0.0) FROM attempts WHERE owner_id = ?1",
            params![owner_id],
            |row| row.get(0),
        )?;

        let max_review_count: u32 = conn.query_row(
            "SELECT COALESCE(MAX(review_count), 0) FROM items WHERE owner_id = ?1",
            params![owner_id],
            |row| row.get(0),
        )?;

        Ok(Stats {
            total_items,
            total_attempts,
            due_now,
            avg_performance,
            max_review_count,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub total_items: i64,
    pub total_attempts: i64,
    pub due_now: i64,
    pub avg_performance: f64,
    pub max_review_count: u32,
}

// Wall-clock time at the resolution timestamps are stored with
fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

fn fetch_item(conn: &Connection, id: i64) -> Result<Option<ReviewableItem>> {
    let item = conn
        .query_row(
            &format!("SELECT {} FROM items WHERE id = ?1", ITEM_COLUMNS),
            params![id],
            item_from_row,
        )
        .optional()?;

    debug!(item_id = id, found = item.is_some(), "fetched item");
    Ok(item)
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<ReviewableItem> {
    let difficulty: String = row.get(4)?;
    let last_reviewed_at: Option<i64> = row.get(8)?;

    Ok(ReviewableItem {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        title: row.get(2)?,
        summary: row.get(3)?,
        difficulty: Difficulty::from_str(&difficulty).unwrap_or_default(),
        source_url: row.get(5)?,
        review_count: row.get(6)?,
        last_performance: row.get(7)?,
        last_reviewed_at: last_reviewed_at
            .map(|millis| millis_to_datetime(8, millis))
            .transpose()?,
        next_review_at: millis_to_datetime(9, row.get(9)?)?,
        created_at: millis_to_datetime(10, row.get(10)?)?,
    })
}

fn attempt_from_row(row: &Row<'_>) -> rusqlite::Result<ReviewAttempt> {
    let answers_json: String = row.get(5)?;
    let answers = serde_json::from_str(&answers_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

    Ok(ReviewAttempt {
        id: row.get(0)?,
        item_id: row.get(1)?,
        owner_id: row.get(2)?,
        score: row.get(3)?,
        total_questions: row.get(4)?,
        answers,
        time_taken_seconds: row.get(6)?,
        completed_at: millis_to_datetime(7, row.get(7)?)?,
    })
}

fn millis_to_datetime(idx: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            Box::new(Error::InvalidTimestamp(millis)),
        )
    })
}

// Weight by overdue-ness and by how poorly the last attempt went
fn pick_weighted<R: Rng>(
    items: Vec<ReviewableItem>,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Option<ReviewableItem> {
    if items.len() <= 1 {
        return items.into_iter().next();
    }

    let weights: Vec<f64> = items
        .iter()
        .map(|item| {
            let overdue_days = now
                .signed_duration_since(item.next_review_at)
                .num_days()
                .max(0) as f64
                + 1.0;
            let performance_weight = 2.0 - item.last_performance.unwrap_or(0.0);
            overdue_days * performance_weight
        })
        .collect();

    let total_weight: f64 = weights.iter().sum();
    let mut random_point = rng.gen::<f64>() * total_weight;

    for (i, weight) in weights.iter().enumerate() {
        random_point -= weight;
        if random_point <= 0.0 {
            return items.into_iter().nth(i);
        }
    }

    // Floating point leftovers land on the last candidate
    items.into_iter().last()
}
