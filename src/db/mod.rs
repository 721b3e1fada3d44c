//! Job persistence.
//!
//! The engine only needs `load` at startup and `save` after every mutation;
//! the storage format is up to the implementation.

use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use tokio_rusqlite::Connection;

use crate::core::BackupJob;

pub mod jobs;

pub use jobs::SqliteJobStore;

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load(&self) -> Result<Vec<BackupJob>>;
    async fn save(&self, jobs: &[BackupJob]) -> Result<()>;
}

/// Open (or create) the SQLite database and apply the schema.
pub async fn init(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).await?;
    apply_schema(&conn).await?;
    Ok(conn)
}

pub async fn init_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().await?;
    apply_schema(&conn).await?;
    Ok(conn)
}

async fn apply_schema(conn: &Connection) -> Result<()> {
    conn.call(|conn| {
        let schema = include_str!("schema.sql");
        conn.execute_batch(schema)?;
        Ok::<(), tokio_rusqlite::rusqlite::Error>(())
    })
    .await?;
    Ok(())
}

/// Store that keeps the last saved list in memory.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<Vec<BackupJob>>,
    saves: Mutex<usize>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(jobs: Vec<BackupJob>) -> Self {
        Self {
            jobs: Mutex::new(jobs),
            saves: Mutex::new(0),
        }
    }

    /// How many times `save` has been called.
    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn load(&self) -> Result<Vec<BackupJob>> {
        Ok(self.jobs.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }

    async fn save(&self, jobs: &[BackupJob]) -> Result<()> {
        *self.jobs.lock().unwrap_or_else(|p| p.into_inner()) = jobs.to_vec();
        *self.saves.lock().unwrap_or_else(|p| p.into_inner()) += 1;
        Ok(())
    }
}
