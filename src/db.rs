use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use sqlx::ConnectOptions;
use std::str::FromStr;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS submissions (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        topic TEXT NOT NULL,
        difficulty TEXT NOT NULL,
        problem_id TEXT NOT NULL,
        correct BOOLEAN NOT NULL,
        time_taken_seconds REAL NOT NULL DEFAULT 0,
        attempt_number INTEGER NOT NULL DEFAULT 1,
        is_retry BOOLEAN NOT NULL DEFAULT 0,
        submitted_at DATETIME NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_submissions_user_topic ON submissions (user_id, topic, submitted_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS topic_progress (
        user_id TEXT NOT NULL,
        topic TEXT NOT NULL,
        total_attempts INTEGER NOT NULL DEFAULT 0,
        correct_attempts INTEGER NOT NULL DEFAULT 0,
        proficiency INTEGER NOT NULL DEFAULT 0,
        mastered BOOLEAN NOT NULL DEFAULT 0,
        last_attempt_at DATETIME,
        PRIMARY KEY (user_id, topic)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS global_stats (
        user_id TEXT PRIMARY KEY,
        total_problems INTEGER NOT NULL DEFAULT 0,
        correct_count INTEGER NOT NULL DEFAULT 0,
        avg_accuracy INTEGER NOT NULL DEFAULT 0
    )
    "#,
    // The unique key is what makes concurrent re-analysis collapse onto one row.
    r#"
    CREATE TABLE IF NOT EXISTS weaknesses (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        topic_id TEXT NOT NULL,
        root_cause TEXT NOT NULL,
        severity TEXT NOT NULL,
        recent_accuracy INTEGER NOT NULL,
        recent_speed INTEGER NOT NULL,
        sample_size INTEGER NOT NULL,
        review_due_at DATETIME NOT NULL,
        review_count INTEGER NOT NULL DEFAULT 0,
        interval_days INTEGER NOT NULL DEFAULT 3,
        ease_factor REAL NOT NULL DEFAULT 2.5,
        created_at DATETIME NOT NULL,
        updated_at DATETIME NOT NULL,
        UNIQUE (user_id, topic_id, root_cause)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS review_schedules (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        topic_id TEXT NOT NULL,
        next_review_at DATETIME NOT NULL,
        review_count INTEGER NOT NULL DEFAULT 0,
        last_reviewed_at DATETIME,
        status TEXT NOT NULL DEFAULT 'scheduled',
        history TEXT NOT NULL DEFAULT '[]',
        UNIQUE (user_id, topic_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_review_schedules_due ON review_schedules (user_id, next_review_at)",
    r#"
    CREATE TABLE IF NOT EXISTS feedback (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        submission_id TEXT NOT NULL,
        rules_fired TEXT NOT NULL,
        created_at DATETIME NOT NULL,
        UNIQUE (user_id, submission_id)
    )
    "#,
];

#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .log_statements(log::LevelFilter::Trace);

        let pool = SqlitePoolOptions::new().max_connections(8).connect_with(options).await?;

        let db = Db { pool };
        db.migrate().await?;
        log::info!("database ready at {}", url);

        Ok(db)
    }

    /// Private in-memory database. Every connection to `:memory:` opens a
    /// fresh database, so the pool is pinned to one long-lived connection.
    #[cfg(test)]
    pub async fn in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .log_statements(log::LevelFilter::Trace);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Db { pool };
        db.migrate().await?;

        Ok(db)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// WAL database in a scratch file, removed on drop. Unlike `Db::in_memory`
/// it hands out several connections, so writers really contend.
#[cfg(test)]
pub struct TempDb {
    pub db: Db,
    path: std::path::PathBuf,
}

#[cfg(test)]
impl TempDb {
    pub async fn new() -> anyhow::Result<Self> {
        let path = std::env::temp_dir().join(format!("practice-tracker-{}.db", uuid::Uuid::new_v4()));
        let db = Db::connect(&format!("sqlite://{}?mode=rwc", path.display())).await?;
        Ok(Self { db, path })
    }
}

#[cfg(test)]
impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", self.path.display(), suffix));
        }
    }
}
