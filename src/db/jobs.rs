use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use tokio_rusqlite::{Connection, params, rusqlite};
use uuid::Uuid;

use super::JobStore;
use crate::core::{BackupJob, BackupType};

/// Raw row as stored: id, name, source, target, backup_type, ordinal
type JobRow = (String, String, String, String, String, i64);

pub struct SqliteJobStore {
    conn: Connection,
}

impl SqliteJobStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn load(&self) -> Result<Vec<BackupJob>> {
        let rows = self
            .conn
            .call(|c| {
                let mut stmt = c.prepare(
                    "SELECT id, name, source, target, backup_type, ordinal
                     FROM jobs
                     ORDER BY ordinal",
                )?;

                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                        ))
                    })?
                    .collect::<Result<Vec<JobRow>, _>>()?;

                Ok::<Vec<JobRow>, rusqlite::Error>(rows)
            })
            .await
            .map_err(|e| anyhow!("Failed to load jobs: {}", e))?;

        rows.into_iter().map(job_from_row).collect()
    }

    async fn save(&self, jobs: &[BackupJob]) -> Result<()> {
        let jobs = jobs.to_vec();

        self.conn
            .call(move |c| {
                let tx = c.transaction()?;

                tx.execute("DELETE FROM jobs", [])?;
                for job in &jobs {
                    tx.execute(
                        "INSERT INTO jobs (id, name, source, target, backup_type, ordinal)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            job.id.to_string(),
                            &job.name,
                            job.source.to_string_lossy(),
                            job.target.to_string_lossy(),
                            job.backup_type.as_str(),
                            job.ordinal as i64
                        ],
                    )?;
                }

                tx.commit()?;
                Ok::<(), rusqlite::Error>(())
            })
            .await?;

        Ok(())
    }
}

fn job_from_row(row: JobRow) -> Result<BackupJob> {
    let (id, name, source, target, backup_type, ordinal) = row;

    Ok(BackupJob {
        id: Uuid::parse_str(&id).with_context(|| format!("Invalid job id in store: {id}"))?,
        name,
        source: source.into(),
        target: target.into(),
        backup_type: backup_type.parse::<BackupType>()?,
        ordinal: usize::try_from(ordinal).unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_in_memory;

    #[tokio::test]
    async fn test_save_then_load_keeps_order() {
        let store = SqliteJobStore::new(init_in_memory().await.unwrap());

        let mut a = BackupJob::new("docs", "/home/docs", "/mnt/docs", BackupType::Full);
        a.ordinal = 1;
        let mut b = BackupJob::new("photos", "/home/pics", "/mnt/pics", BackupType::Differential);
        b.ordinal = 2;

        store.save(&[b.clone(), a.clone()]).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, vec![a, b]);
    }

    #[tokio::test]
    async fn test_save_replaces_previous_contents() {
        let store = SqliteJobStore::new(init_in_memory().await.unwrap());

        let a = BackupJob::new("a", "/a", "/b", BackupType::Full);
        store.save(&[a]).await.unwrap();
        store.save(&[]).await.unwrap();

        assert!(store.load().await.unwrap().is_empty());
    }

    #[test]
    fn test_job_from_row_rejects_bad_type() {
        let row = (
            Uuid::now_v7().to_string(),
            "a".to_string(),
            "/a".to_string(),
            "/b".to_string(),
            "incremental".to_string(),
            1,
        );
        assert!(job_from_row(row).is_err());
    }
}
