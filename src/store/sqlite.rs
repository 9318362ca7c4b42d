use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use rusqlite::{params, Connection, Row, Transaction};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::models::{
    PomodoroCycle, Session, SessionBreak, SessionId, SessionKind, SessionState,
};

use super::{SessionStore, StoreError, StoreResult};

const CURRENT_SCHEMA_VERSION: i32 = 1;

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct StoreInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to store thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join store thread: {join_err:?}");
            }
        }
    }
}

/// SQLite-backed session store.
///
/// A dedicated worker thread owns the connection; callers hand it closures
/// over an mpsc channel and await the result on a oneshot, so the async
/// runtime never blocks on SQLite.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<StoreInner>,
    db_path: Arc<PathBuf>,
}

impl SqliteStore {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("focustrack-store".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite database")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }
                if let Err(err) = conn.pragma_update(None, "foreign_keys", "ON") {
                    error!("Failed to enable foreign keys: {err}");
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run database migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("Store initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Store thread shutting down");
            })
            .with_context(|| "failed to spawn store worker thread")?;

        ready_rx
            .recv()
            .context("store worker exited before signaling readiness")??;

        info!("Session store initialized at {}", db_path.display());

        Ok(Self {
            inner: Arc::new(StoreInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Store caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to store thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("store thread terminated unexpectedly"))?
    }

    /// Finalize sessions left live by a previous process (crash recovery).
    /// Returns how many records were closed out.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let recovered = self
            .execute(move |conn| {
                let now = Utc::now().to_rfc3339();
                let affected = conn.execute(
                    "UPDATE sessions
                     SET state = 'Ended',
                         end_time = ?1,
                         updated_at = ?1
                     WHERE end_time IS NULL",
                    params![now],
                )?;
                Ok(affected)
            })
            .await?;

        if recovered > 0 {
            warn!("Recovered {recovered} interrupted session(s); marked as ended");
        }
        Ok(recovered)
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn create_session(&self, session: &Session) -> StoreResult<()> {
        let record = session.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, document_id, topic_id, kind, name, state,
                     planned_ms, start_time, end_time, active_ms, idle_ms, break_ms,
                     starting_page, ending_page, pages_visited, pomodoro_cycles,
                     interruptions, focus_score, productivity_score, difficulty_rating,
                     energy_level, mood_rating, notes, goals_set, goals_achieved,
                     xp_earned, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                     ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28)",
                rusqlite::params_from_iter(session_params(&record)?),
            )
            .with_context(|| "failed to insert session")?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn get_session(&self, id: SessionId) -> StoreResult<Option<Session>> {
        let session = self
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, document_id, topic_id, kind, name, state, planned_ms,
                         start_time, end_time, active_ms, idle_ms, break_ms,
                         starting_page, ending_page, pages_visited, pomodoro_cycles,
                         interruptions, focus_score, productivity_score,
                         difficulty_rating, energy_level, mood_rating, notes,
                         goals_set, goals_achieved, xp_earned, created_at, updated_at
                     FROM sessions
                     WHERE id = ?1",
                )?;

                let mut rows = stmt.query(params![id.to_string()])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_session(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(session)
    }

    async fn update_session(&self, session: &Session) -> StoreResult<()> {
        let record = session.clone();
        let affected = self
            .execute(move |conn| {
                let fields = rusqlite::params_from_iter(session_params(&record)?);
                let affected = conn
                    .execute(
                        "UPDATE sessions
                         SET document_id = ?2, topic_id = ?3, kind = ?4, name = ?5,
                             state = ?6, planned_ms = ?7, start_time = ?8, end_time = ?9,
                             active_ms = ?10, idle_ms = ?11, break_ms = ?12,
                             starting_page = ?13, ending_page = ?14, pages_visited = ?15,
                             pomodoro_cycles = ?16, interruptions = ?17, focus_score = ?18,
                             productivity_score = ?19, difficulty_rating = ?20,
                             energy_level = ?21, mood_rating = ?22, notes = ?23,
                             goals_set = ?24, goals_achieved = ?25, xp_earned = ?26,
                             created_at = ?27, updated_at = ?28
                         WHERE id = ?1",
                        fields,
                    )
                    .with_context(|| "failed to update session")?;
                Ok(affected)
            })
            .await?;

        if affected == 0 {
            return Err(StoreError::NotFound(format!("session {}", session.id)));
        }
        Ok(())
    }

    async fn append_break(&self, brk: &SessionBreak) -> StoreResult<()> {
        let record = brk.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO session_breaks (id, session_id, kind, started_at, ended_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id.to_string(),
                    record.session_id.to_string(),
                    record.kind.as_str(),
                    record.started_at.to_rfc3339(),
                    record.ended_at.as_ref().map(|dt| dt.to_rfc3339()),
                ],
            )
            .with_context(|| "failed to insert break")?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn update_break(&self, brk: &SessionBreak) -> StoreResult<()> {
        let record = brk.clone();
        let affected = self
            .execute(move |conn| {
                let affected = conn
                    .execute(
                        "UPDATE session_breaks
                         SET kind = ?2, started_at = ?3, ended_at = ?4
                         WHERE id = ?1",
                        params![
                            record.id.to_string(),
                            record.kind.as_str(),
                            record.started_at.to_rfc3339(),
                            record.ended_at.as_ref().map(|dt| dt.to_rfc3339()),
                        ],
                    )
                    .with_context(|| "failed to update break")?;
                Ok(affected)
            })
            .await?;

        if affected == 0 {
            return Err(StoreError::NotFound(format!("break {}", brk.id)));
        }
        Ok(())
    }

    async fn append_cycle(&self, cycle: &PomodoroCycle) -> StoreResult<()> {
        let record = cycle.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO pomodoro_cycles (id, session_id, cycle_number, kind,
                     planned_ms, actual_ms, completed, interruptions,
                     effectiveness_rating, focus_rating, task_completed, notes,
                     xp_earned, started_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                rusqlite::params_from_iter(cycle_params(&record)?),
            )
            .with_context(|| "failed to insert pomodoro cycle")?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn update_cycle(&self, cycle: &PomodoroCycle) -> StoreResult<()> {
        let record = cycle.clone();
        let affected = self
            .execute(move |conn| {
                let fields = rusqlite::params_from_iter(cycle_params(&record)?);
                let affected = conn
                    .execute(
                        "UPDATE pomodoro_cycles
                         SET session_id = ?2, cycle_number = ?3, kind = ?4,
                             planned_ms = ?5, actual_ms = ?6, completed = ?7,
                             interruptions = ?8, effectiveness_rating = ?9,
                             focus_rating = ?10, task_completed = ?11, notes = ?12,
                             xp_earned = ?13, started_at = ?14, completed_at = ?15
                         WHERE id = ?1",
                        fields,
                    )
                    .with_context(|| "failed to update pomodoro cycle")?;
                Ok(affected)
            })
            .await?;

        if affected == 0 {
            return Err(StoreError::NotFound(format!("cycle {}", cycle.id)));
        }
        Ok(())
    }

    async fn update_document_progress(&self, document_id: Uuid, page: u32) -> StoreResult<()> {
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO document_progress (document_id, current_page, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (document_id) DO UPDATE
                 SET current_page = excluded.current_page,
                     updated_at = excluded.updated_at",
                params![
                    document_id.to_string(),
                    i64::from(page),
                    Utc::now().to_rfc3339(),
                ],
            )
            .with_context(|| "failed to update document progress")?;
            Ok(())
        })
        .await?;
        Ok(())
    }
}

fn run_migrations(conn: &mut Connection) -> Result<()> {
    let mut version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;

    if version > CURRENT_SCHEMA_VERSION {
        bail!(
            "database version ({}) is newer than supported schema ({})",
            version,
            CURRENT_SCHEMA_VERSION
        );
    }

    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;

    while version < CURRENT_SCHEMA_VERSION {
        let next_version = version + 1;
        apply_migration(&tx, next_version)
            .with_context(|| format!("migration to version {next_version} failed"))?;
        version = next_version;
    }

    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit migrations")?;

    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> Result<()> {
    match version {
        1 => {
            tx.execute_batch(include_str!("schema_v1.sql"))
                .context("failed to execute schema_v1.sql")?;
            Ok(())
        }
        _ => bail!("unknown migration target version: {version}"),
    }
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

fn to_u32(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("{field} out of range: {value}"))
}

fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

fn parse_optional_datetime(value: Option<String>, field: &str) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

fn parse_uuid(value: &str, field: &str) -> Result<Uuid> {
    Uuid::parse_str(value).with_context(|| format!("failed to parse {field}"))
}

fn parse_optional_uuid(value: Option<String>, field: &str) -> Result<Option<Uuid>> {
    match value {
        Some(raw) => parse_uuid(&raw, field).map(Some),
        None => Ok(None),
    }
}

fn parse_kind(value: &str) -> Result<SessionKind> {
    match value {
        "study" => Ok(SessionKind::Study),
        "exercise" => Ok(SessionKind::Exercise),
        "review" => Ok(SessionKind::Review),
        "research" => Ok(SessionKind::Research),
        other => Err(anyhow!("unknown session kind '{other}'")),
    }
}

fn parse_state(value: &str) -> Result<SessionState> {
    match value {
        "Active" => Ok(SessionState::Active),
        "Paused" => Ok(SessionState::Paused),
        "Ended" => Ok(SessionState::Ended),
        other => Err(anyhow!("unknown session state '{other}'")),
    }
}

fn optional_rating(value: Option<i64>, field: &str) -> Result<Option<u8>> {
    value
        .map(|raw| u8::try_from(raw).map_err(|_| anyhow!("{field} out of range: {raw}")))
        .transpose()
}

fn goals_to_json(goals: &[String]) -> Result<String> {
    serde_json::to_string(goals).context("failed to encode goals")
}

fn goals_from_json(raw: &str, field: &str) -> Result<Vec<String>> {
    serde_json::from_str(raw).with_context(|| format!("failed to decode {field}"))
}

fn session_params(record: &Session) -> Result<Vec<Box<dyn rusqlite::ToSql>>> {
    Ok(vec![
        Box::new(record.id.to_string()),
        Box::new(record.document_id.map(|id| id.to_string())),
        Box::new(record.topic_id.map(|id| id.to_string())),
        Box::new(record.kind.as_str()),
        Box::new(record.name.clone()),
        Box::new(record.state.as_str()),
        Box::new(to_i64(record.planned_ms)?),
        Box::new(record.start_time.to_rfc3339()),
        Box::new(record.end_time.as_ref().map(|dt| dt.to_rfc3339())),
        Box::new(to_i64(record.active_ms)?),
        Box::new(to_i64(record.idle_ms)?),
        Box::new(to_i64(record.break_ms)?),
        Box::new(record.starting_page.map(i64::from)),
        Box::new(record.ending_page.map(i64::from)),
        Box::new(i64::from(record.pages_visited)),
        Box::new(i64::from(record.pomodoro_cycles)),
        Box::new(i64::from(record.interruptions)),
        Box::new(record.focus_score),
        Box::new(record.productivity_score),
        Box::new(record.difficulty_rating.map(i64::from)),
        Box::new(record.energy_level.map(i64::from)),
        Box::new(record.mood_rating.map(i64::from)),
        Box::new(record.notes.clone()),
        Box::new(goals_to_json(&record.goals_set)?),
        Box::new(goals_to_json(&record.goals_achieved)?),
        Box::new(to_i64(record.xp_earned)?),
        Box::new(record.created_at.to_rfc3339()),
        Box::new(record.updated_at.to_rfc3339()),
    ])
}

fn cycle_params(record: &PomodoroCycle) -> Result<Vec<Box<dyn rusqlite::ToSql>>> {
    Ok(vec![
        Box::new(record.id.to_string()),
        Box::new(record.session_id.to_string()),
        Box::new(i64::from(record.cycle_number)),
        Box::new(record.kind.as_str()),
        Box::new(to_i64(record.planned_ms)?),
        Box::new(record.actual_ms.map(to_i64).transpose()?),
        Box::new(record.completed),
        Box::new(i64::from(record.interruptions)),
        Box::new(record.effectiveness_rating.map(i64::from)),
        Box::new(record.focus_rating.map(i64::from)),
        Box::new(record.task_completed),
        Box::new(record.notes.clone()),
        Box::new(to_i64(record.xp_earned)?),
        Box::new(record.started_at.to_rfc3339()),
        Box::new(record.completed_at.as_ref().map(|dt| dt.to_rfc3339())),
    ])
}

fn row_to_session(row: &Row) -> Result<Session> {
    let document_id: Option<String> = row.get("document_id")?;
    let topic_id: Option<String> = row.get("topic_id")?;
    let kind: String = row.get("kind")?;
    let state: String = row.get("state")?;
    let start_time: String = row.get("start_time")?;
    let end_time: Option<String> = row.get("end_time")?;
    let goals_set: String = row.get("goals_set")?;
    let goals_achieved: String = row.get("goals_achieved")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(Session {
        id: parse_uuid(&row.get::<_, String>("id")?, "id")?,
        document_id: parse_optional_uuid(document_id, "document_id")?,
        topic_id: parse_optional_uuid(topic_id, "topic_id")?,
        kind: parse_kind(&kind)?,
        name: row.get("name")?,
        state: parse_state(&state)?,
        planned_ms: to_u64(row.get("planned_ms")?, "planned_ms")?,
        start_time: parse_datetime(&start_time, "start_time")?,
        end_time: parse_optional_datetime(end_time, "end_time")?,
        active_ms: to_u64(row.get("active_ms")?, "active_ms")?,
        idle_ms: to_u64(row.get("idle_ms")?, "idle_ms")?,
        break_ms: to_u64(row.get("break_ms")?, "break_ms")?,
        starting_page: row
            .get::<_, Option<i64>>("starting_page")?
            .map(|page| to_u32(page, "starting_page"))
            .transpose()?,
        ending_page: row
            .get::<_, Option<i64>>("ending_page")?
            .map(|page| to_u32(page, "ending_page"))
            .transpose()?,
        pages_visited: to_u32(row.get("pages_visited")?, "pages_visited")?,
        pomodoro_cycles: to_u32(row.get("pomodoro_cycles")?, "pomodoro_cycles")?,
        interruptions: to_u32(row.get("interruptions")?, "interruptions")?,
        focus_score: row.get("focus_score")?,
        productivity_score: row.get("productivity_score")?,
        difficulty_rating: optional_rating(row.get("difficulty_rating")?, "difficulty_rating")?,
        energy_level: optional_rating(row.get("energy_level")?, "energy_level")?,
        mood_rating: optional_rating(row.get("mood_rating")?, "mood_rating")?,
        notes: row.get("notes")?,
        goals_set: goals_from_json(&goals_set, "goals_set")?,
        goals_achieved: goals_from_json(&goals_achieved, "goals_achieved")?,
        xp_earned: to_u64(row.get("xp_earned")?, "xp_earned")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}
