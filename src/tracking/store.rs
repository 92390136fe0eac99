//! Local LMS backed by SQLite.
//!
//! Implements the SCORM 1.2 runtime semantics the bridge relies on: values
//! set during a session are staged and only persisted on commit or finish,
//! every call made outside an open session fails with error 301, and
//! written values are checked against the CMI vocabulary.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::score::{LessonStatus, SCORE_MAX as MAX_SCORE, SCORE_MIN as MIN_SCORE};

use super::{
    migrations::run_migrations, ErrorCode, TrackingApi, LESSON_STATUS, SCORE_MAX, SCORE_MIN,
    SCORE_RAW, STUDENT_ID,
};

/// Persisted CMI fields for one learner.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAttempt {
    pub learner_id: String,
    pub lesson_status: String,
    pub score_raw: String,
    pub score_min: String,
    pub score_max: String,
    pub updated_at: DateTime<Utc>,
}

/// One initialize..finish span.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LmsSessionRecord {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub final_status: Option<String>,
    pub final_score: Option<String>,
}

struct StoreInner {
    conn: Connection,
    learner_id: String,
    session_id: Option<String>,
    pending: BTreeMap<&'static str, String>,
    last_error: ErrorCode,
}

pub struct SqliteLms {
    inner: Mutex<StoreInner>,
    path: Option<PathBuf>,
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| anyhow!("invalid datetime '{value}': {err}"))
}

/// Column backing a writable CMI element.
fn column_for(key: &str) -> Option<(&'static str, &'static str)> {
    match key {
        LESSON_STATUS => Some((LESSON_STATUS, "lesson_status")),
        SCORE_RAW => Some((SCORE_RAW, "score_raw")),
        SCORE_MIN => Some((SCORE_MIN, "score_min")),
        SCORE_MAX => Some((SCORE_MAX, "score_max")),
        _ => None,
    }
}

fn validate(key: &str, value: &str) -> Result<(), ErrorCode> {
    match key {
        LESSON_STATUS => match value {
            // LMS-owned; content may not write it
            "not attempted" => Err(ErrorCode::IncorrectDataType),
            _ if LessonStatus::parse(value).is_some() => Ok(()),
            _ => Err(ErrorCode::IncorrectDataType),
        },
        SCORE_RAW | SCORE_MIN | SCORE_MAX => {
            if value.is_empty() {
                return Ok(());
            }
            match value.parse::<f64>() {
                Ok(score) if score.is_finite() && (MIN_SCORE..=MAX_SCORE).contains(&score) => {
                    Ok(())
                }
                _ => Err(ErrorCode::IncorrectDataType),
            }
        }
        _ => Err(ErrorCode::NotImplemented),
    }
}

impl SqliteLms {
    pub fn open(path: PathBuf, learner_id: impl Into<String>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create tracking store directory {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("failed to open tracking store {}", path.display()))?;
        if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
            error!("Failed to enable WAL mode: {err}");
        }

        let store = Self::from_connection(conn, learner_id.into(), Some(path))?;
        info!(
            "Tracking store initialized at {}",
            store.path().map(Path::display).map(|d| d.to_string()).unwrap_or_default()
        );
        Ok(store)
    }

    pub fn open_in_memory(learner_id: impl Into<String>) -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory store")?;
        Self::from_connection(conn, learner_id.into(), None)
    }

    fn from_connection(
        mut conn: Connection,
        learner_id: String,
        path: Option<PathBuf>,
    ) -> Result<Self> {
        if let Err(err) = conn.pragma_update(None, "foreign_keys", "ON") {
            error!("Failed to enable foreign keys: {err}");
        }
        run_migrations(&mut conn).context("failed to run tracking store migrations")?;

        Ok(Self {
            inner: Mutex::new(StoreInner {
                conn,
                learner_id,
                session_id: None,
                pending: BTreeMap::new(),
                last_error: ErrorCode::NoError,
            }),
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Persisted fields, ignoring anything staged but not committed.
    pub fn attempt(&self) -> Result<Option<StoredAttempt>> {
        let inner = self.lock();
        load_attempt(&inner.conn, &inner.learner_id)
    }

    pub fn session_history(&self) -> Result<Vec<LmsSessionRecord>> {
        let inner = self.lock();
        let mut stmt = inner.conn.prepare(
            "SELECT id, started_at, finished_at, final_status, final_score
             FROM lms_sessions
             WHERE learner_id = ?1
             ORDER BY started_at ASC, rowid ASC",
        )?;
        let mut rows = stmt.query(params![inner.learner_id])?;
        let mut sessions = Vec::new();
        while let Some(row) = rows.next()? {
            let started_at: String = row.get(1)?;
            let finished_at: Option<String> = row.get(2)?;
            sessions.push(LmsSessionRecord {
                id: row.get(0)?,
                started_at: parse_datetime(&started_at)?,
                finished_at: finished_at.as_deref().map(parse_datetime).transpose()?,
                final_status: row.get(3)?,
                final_score: row.get(4)?,
            });
        }
        Ok(sessions)
    }
}

fn load_attempt(conn: &Connection, learner_id: &str) -> Result<Option<StoredAttempt>> {
    let row = conn
        .query_row(
            "SELECT learner_id, lesson_status, score_raw, score_min, score_max, updated_at
             FROM learners WHERE learner_id = ?1",
            params![learner_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        )
        .optional()
        .context("failed to load learner attempt")?;

    row.map(
        |(learner_id, lesson_status, score_raw, score_min, score_max, updated_at)| {
            Ok(StoredAttempt {
                learner_id,
                lesson_status,
                score_raw,
                score_min,
                score_max,
                updated_at: parse_datetime(&updated_at)?,
            })
        },
    )
    .transpose()
}

impl StoreInner {
    fn open_session(&mut self) -> Result<String> {
        let now = Utc::now().to_rfc3339();
        let session_id = Uuid::new_v4().to_string();
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO learners (learner_id, created_at, updated_at)
             VALUES (?1, ?2, ?2)",
            params![self.learner_id, now],
        )
        .context("failed to register learner")?;
        tx.execute(
            "INSERT INTO lms_sessions (id, learner_id, started_at) VALUES (?1, ?2, ?3)",
            params![session_id, self.learner_id, now],
        )
        .context("failed to open LMS session")?;
        tx.commit()?;
        Ok(session_id)
    }

    fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        for (key, value) in &self.pending {
            let (_, column) = column_for(key).ok_or_else(|| anyhow!("unknown element {key}"))?;
            tx.execute(
                &format!("UPDATE learners SET {column} = ?1, updated_at = ?2 WHERE learner_id = ?3"),
                params![value, now, self.learner_id],
            )
            .with_context(|| format!("failed to persist {key}"))?;
        }
        tx.commit()?;
        self.pending.clear();
        Ok(())
    }

    fn read(&self, key: &str) -> Result<String> {
        if let Some(value) = self.pending.get(key) {
            return Ok(value.clone());
        }
        let attempt = load_attempt(&self.conn, &self.learner_id)?
            .ok_or_else(|| anyhow!("learner {} not registered", self.learner_id))?;
        Ok(match key {
            LESSON_STATUS => attempt.lesson_status,
            SCORE_RAW => attempt.score_raw,
            SCORE_MIN => attempt.score_min,
            SCORE_MAX => attempt.score_max,
            _ => String::new(),
        })
    }

    fn close_session(&mut self, session_id: &str) -> Result<()> {
        self.flush()?;
        let status = self.read(LESSON_STATUS)?;
        let score = self.read(SCORE_RAW)?;
        self.conn
            .execute(
                "UPDATE lms_sessions
                 SET finished_at = ?1, final_status = ?2, final_score = ?3
                 WHERE id = ?4",
                params![Utc::now().to_rfc3339(), status, score, session_id],
            )
            .context("failed to close LMS session")?;
        Ok(())
    }
}

impl TrackingApi for SqliteLms {
    fn initialize(&self) -> bool {
        let mut inner = self.lock();
        if inner.session_id.is_some() {
            warn!("LMSInitialize called on an open session");
            inner.last_error = ErrorCode::General;
            return false;
        }
        match inner.open_session() {
            Ok(session_id) => {
                info!("LMS session {} opened for {}", session_id, inner.learner_id);
                inner.session_id = Some(session_id);
                inner.pending.clear();
                inner.last_error = ErrorCode::NoError;
                true
            }
            Err(err) => {
                error!("LMSInitialize failed: {err:?}");
                inner.last_error = ErrorCode::General;
                false
            }
        }
    }

    fn get_value(&self, key: &str) -> String {
        let mut inner = self.lock();
        if inner.session_id.is_none() {
            inner.last_error = ErrorCode::NotInitialized;
            return String::new();
        }
        if key == STUDENT_ID {
            inner.last_error = ErrorCode::NoError;
            return inner.learner_id.clone();
        }
        if column_for(key).is_none() {
            inner.last_error = ErrorCode::NotImplemented;
            return String::new();
        }
        match inner.read(key) {
            Ok(value) => {
                inner.last_error = ErrorCode::NoError;
                value
            }
            Err(err) => {
                error!("LMSGetValue({key}) failed: {err:?}");
                inner.last_error = ErrorCode::General;
                String::new()
            }
        }
    }

    fn set_value(&self, key: &str, value: &str) -> bool {
        let mut inner = self.lock();
        if inner.session_id.is_none() {
            inner.last_error = ErrorCode::NotInitialized;
            return false;
        }
        if key == STUDENT_ID {
            inner.last_error = ErrorCode::ReadOnly;
            return false;
        }
        if let Err(code) = validate(key, value) {
            warn!("LMSSetValue({key}, {value:?}) rejected: {}", code.description());
            inner.last_error = code;
            return false;
        }
        // validate() only accepts keys that have a column
        if let Some((element, _)) = column_for(key) {
            inner.pending.insert(element, value.to_string());
        }
        inner.last_error = ErrorCode::NoError;
        true
    }

    fn commit(&self) -> bool {
        let mut inner = self.lock();
        if inner.session_id.is_none() {
            inner.last_error = ErrorCode::NotInitialized;
            return false;
        }
        match inner.flush() {
            Ok(()) => {
                inner.last_error = ErrorCode::NoError;
                true
            }
            Err(err) => {
                error!("LMSCommit failed: {err:?}");
                inner.last_error = ErrorCode::General;
                false
            }
        }
    }

    fn terminate(&self) {
        let mut inner = self.lock();
        let session_id = match inner.session_id.take() {
            Some(session_id) => session_id,
            None => {
                inner.last_error = ErrorCode::NotInitialized;
                return;
            }
        };
        match inner.close_session(&session_id) {
            Ok(()) => {
                info!("LMS session {} finished", session_id);
                inner.last_error = ErrorCode::NoError;
            }
            Err(err) => {
                error!("LMSFinish failed: {err:?}");
                inner.last_error = ErrorCode::General;
            }
        }
        inner.pending.clear();
    }

    fn last_error(&self) -> u16 {
        self.lock().last_error.code()
    }

    fn error_string(&self, code: u16) -> String {
        ErrorCode::from_code(code)
            .map(|code| code.description().to_string())
            .unwrap_or_else(|| format!("Unknown error code {code}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> SqliteLms {
        SqliteLms::open_in_memory("learner-1").unwrap()
    }

    #[test]
    fn calls_before_initialize_fail_with_301() {
        let lms = open();
        assert!(!lms.set_value(LESSON_STATUS, "passed"));
        assert_eq!(lms.last_error(), 301);
        assert_eq!(lms.get_value(LESSON_STATUS), "");
        assert!(!lms.commit());
        assert_eq!(lms.last_error_string(), "Not initialized");
    }

    #[test]
    fn new_learner_starts_not_attempted() {
        let lms = open();
        assert!(lms.initialize());
        assert_eq!(lms.get_value(LESSON_STATUS), "not attempted");
        assert_eq!(lms.get_value(SCORE_RAW), "");
        assert_eq!(lms.get_value(STUDENT_ID), "learner-1");
    }

    #[test]
    fn double_initialize_is_rejected() {
        let lms = open();
        assert!(lms.initialize());
        assert!(!lms.initialize());
        assert_eq!(lms.last_error(), 101);
    }

    #[test]
    fn values_persist_only_on_commit() {
        let lms = open();
        lms.initialize();
        assert!(lms.set_value(SCORE_RAW, "85"));
        assert_eq!(lms.get_value(SCORE_RAW), "85");
        assert_eq!(lms.attempt().unwrap().unwrap().score_raw, "");

        assert!(lms.commit());
        assert_eq!(lms.attempt().unwrap().unwrap().score_raw, "85");
    }

    #[test]
    fn finish_flushes_and_next_session_reads_back() {
        let lms = open();
        lms.initialize();
        lms.set_value(LESSON_STATUS, "passed");
        lms.set_value(SCORE_RAW, "91.5");
        lms.terminate();

        assert!(lms.initialize());
        assert_eq!(lms.get_value(LESSON_STATUS), "passed");
        assert_eq!(lms.get_value(SCORE_RAW), "91.5");

        let history = lms.session_history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].final_status.as_deref(), Some("passed"));
        assert_eq!(history[0].final_score.as_deref(), Some("91.5"));
        assert!(history[0].finished_at.is_some());
        assert!(history[1].finished_at.is_none());
    }

    #[test]
    fn vocabulary_is_enforced() {
        let lms = open();
        lms.initialize();
        assert!(!lms.set_value(LESSON_STATUS, "great"));
        assert_eq!(lms.last_error(), 405);
        assert!(!lms.set_value(LESSON_STATUS, "not attempted"));
        assert!(!lms.set_value(SCORE_RAW, "101"));
        assert!(!lms.set_value(SCORE_RAW, "eighty"));
        assert!(lms.set_value(SCORE_RAW, ""));
        assert!(!lms.set_value("cmi.core.lesson_location", "page-2"));
        assert_eq!(lms.last_error(), 401);
        assert!(!lms.set_value(STUDENT_ID, "someone-else"));
        assert_eq!(lms.last_error(), 403);
        for status in ["passed", "failed", "completed", "incomplete", "browsed"] {
            assert!(lms.set_value(LESSON_STATUS, status));
        }
    }

    #[test]
    fn learners_are_isolated_in_a_shared_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lms.sqlite3");

        let first = SqliteLms::open(path.clone(), "a").unwrap();
        first.initialize();
        first.set_value(LESSON_STATUS, "failed");
        first.terminate();
        drop(first);

        let second = SqliteLms::open(path.clone(), "b").unwrap();
        second.initialize();
        assert_eq!(second.get_value(LESSON_STATUS), "not attempted");
        second.terminate();
        drop(second);

        let again = SqliteLms::open(path, "a").unwrap();
        again.initialize();
        assert_eq!(again.get_value(LESSON_STATUS), "failed");
    }
}
