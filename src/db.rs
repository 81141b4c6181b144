use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::StoreError;
use crate::ingest::JobStore;
use crate::models::{Company, CompanyFields, CompanyId, Job, JobFields, WriteOutcome};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS companies (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        location TEXT,
        description TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE IF NOT EXISTS jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        company_id INTEGER NOT NULL REFERENCES companies(id),
        title TEXT NOT NULL,
        link TEXT NOT NULL DEFAULT '',
        location TEXT NOT NULL DEFAULT '',
        experience TEXT NOT NULL DEFAULT '',
        education TEXT NOT NULL DEFAULT '',
        employment_type TEXT NOT NULL DEFAULT '',
        deadline TEXT NOT NULL DEFAULT '',
        sector TEXT NOT NULL DEFAULT '',
        salary TEXT NOT NULL DEFAULT '',
        sightings INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at TEXT NOT NULL DEFAULT (datetime('now')),
        UNIQUE (title, company_id)
    );

    CREATE INDEX IF NOT EXISTS idx_jobs_company ON jobs(company_id);
"#;

const JOB_COLUMNS: &str = "j.id, j.company_id, c.name, j.title, j.link, j.location, j.experience,
     j.education, j.employment_type, j.deadline, j.sector, j.salary, j.sightings,
     j.created_at, j.updated_at";

pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Fresh in-memory database with the schema already applied.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        };
        db.init()?;
        Ok(db)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Database connection lock poisoned"))
    }

    pub fn init(&self) -> Result<()> {
        self.conn()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('jobs', 'companies')",
            [],
            |row| row.get(0),
        )?;
        if tables < 2 {
            return Err(anyhow!(
                "Database not initialized. Run 'jobcrawl init' first."
            ));
        }
        Ok(())
    }

    // --- Read side for the CLI ---

    pub fn list_companies(&self) -> Result<Vec<(Company, i64)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT c.id, c.name, c.location, c.description, c.created_at, c.updated_at,
                    (SELECT COUNT(*) FROM jobs j WHERE j.company_id = c.id)
             FROM companies c
             ORDER BY c.name",
        )?;
        let rows = stmt.query_map([], |row| Ok((row_to_company(row)?, row.get(6)?)))?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list companies")
    }

    pub fn list_jobs(&self, company: Option<&str>) -> Result<Vec<Job>> {
        let mut sql = format!(
            "SELECT {} FROM jobs j JOIN companies c ON j.company_id = c.id",
            JOB_COLUMNS
        );
        if company.is_some() {
            sql.push_str(" WHERE c.name = ?1");
        }
        sql.push_str(" ORDER BY j.updated_at DESC, j.id DESC");

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = if let Some(name) = company {
            stmt.query_map([name], row_to_job)?
        } else {
            stmt.query_map([], row_to_job)?
        };

        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list jobs")
    }

    pub fn get_job(&self, id: i64) -> Result<Option<Job>> {
        let sql = format!(
            "SELECT {} FROM jobs j JOIN companies c ON j.company_id = c.id WHERE j.id = ?1",
            JOB_COLUMNS
        );
        let job = self.conn()?.query_row(&sql, [id], row_to_job).optional()?;
        Ok(job)
    }

    pub fn count_companies(&self) -> Result<i64> {
        let n = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM companies", [], |row| row.get(0))?;
        Ok(n)
    }

    pub fn count_jobs(&self) -> Result<i64> {
        let n = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))?;
        Ok(n)
    }

    /// Runs a storage call on the blocking pool so the crawler's workers are
    /// not stalled behind SQLite.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))?;
            f(&*guard).map_err(StoreError::classify)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("storage task failed: {}", e)))?
    }
}

#[async_trait]
impl JobStore for Database {
    async fn find_company_by_name(&self, name: &str) -> Result<Option<Company>, StoreError> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, name, location, description, created_at, updated_at
                 FROM companies WHERE name = ?1",
                [&name],
                row_to_company,
            )
            .optional()
        })
        .await
    }

    async fn upsert_company(
        &self,
        name: &str,
        fields: &CompanyFields,
    ) -> Result<CompanyId, StoreError> {
        let name = name.to_string();
        let fields = fields.clone();
        self.with_conn(move |conn| {
            conn.query_row(
                "INSERT INTO companies (name, location, description) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET
                     location = excluded.location,
                     description = excluded.description,
                     updated_at = datetime('now')
                 RETURNING id",
                params![name, fields.location, fields.description],
                |row| row.get(0),
            )
        })
        .await
    }

    async fn upsert_job(
        &self,
        title: &str,
        company_id: CompanyId,
        fields: &JobFields,
    ) -> Result<WriteOutcome, StoreError> {
        let title = title.to_string();
        let f = fields.clone();
        let (id, sightings): (i64, i64) = self
            .with_conn(move |conn| {
                conn.query_row(
                    "INSERT INTO jobs (company_id, title, link, location, experience, education,
                                       employment_type, deadline, sector, salary)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                     ON CONFLICT(title, company_id) DO UPDATE SET
                         link = excluded.link,
                         location = excluded.location,
                         experience = excluded.experience,
                         education = excluded.education,
                         employment_type = excluded.employment_type,
                         deadline = excluded.deadline,
                         sector = excluded.sector,
                         salary = excluded.salary,
                         sightings = jobs.sightings + 1,
                         updated_at = datetime('now')
                     RETURNING id, sightings",
                    params![
                        company_id,
                        title,
                        f.link,
                        f.location,
                        f.experience,
                        f.education,
                        f.employment_type,
                        f.deadline,
                        f.sector,
                        f.salary
                    ],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
            })
            .await?;

        Ok(if sightings == 1 {
            WriteOutcome::Inserted(id)
        } else {
            WriteOutcome::Updated(id)
        })
    }
}

fn row_to_company(row: &rusqlite::Row) -> rusqlite::Result<Company> {
    Ok(Company {
        id: row.get(0)?,
        name: row.get(1)?,
        location: row.get(2)?,
        description: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
    Ok(Job {
        id: row.get(0)?,
        company_id: row.get(1)?,
        company_name: row.get(2)?,
        title: row.get(3)?,
        link: row.get(4)?,
        location: row.get(5)?,
        experience: row.get(6)?,
        education: row.get(7)?,
        employment_type: row.get(8)?,
        deadline: row.get(9)?,
        sector: row.get(10)?,
        salary: row.get(11)?,
        sightings: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        db.ensure_initialized().unwrap();
        assert_eq!(db.count_jobs().unwrap(), 0);
    }

    #[test]
    fn test_ensure_initialized_fails_on_empty_file() {
        let dir = std::env::temp_dir().join(format!("jobcrawl-test-{}", std::process::id()));
        let path = dir.join("empty.db");
        let _ = std::fs::remove_file(&path);

        let db = Database::open(&path).unwrap();
        assert!(db.ensure_initialized().is_err());
        db.init().unwrap();
        assert!(db.ensure_initialized().is_ok());
        assert_eq!(db.path(), Some(path.as_path()));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_duplicate_company_name_is_a_constraint_violation() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn().unwrap();
        conn.execute("INSERT INTO companies (name) VALUES ('Acme')", []).unwrap();
        let err = conn
            .execute("INSERT INTO companies (name) VALUES ('Acme')", [])
            .unwrap_err();
        assert!(matches!(StoreError::classify(err), StoreError::Constraint(_)));
    }

    #[tokio::test]
    async fn test_job_must_reference_existing_company() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .upsert_job("Orphan", 999, &JobFields::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[tokio::test]
    async fn test_list_jobs_filters_by_company() {
        let db = Database::open_in_memory().unwrap();
        let acme = db.upsert_company("Acme", &CompanyFields::default()).await.unwrap();
        let beta = db.upsert_company("Beta", &CompanyFields::default()).await.unwrap();
        db.upsert_job("Engineer", acme, &JobFields::default()).await.unwrap();
        db.upsert_job("Designer", acme, &JobFields::default()).await.unwrap();
        db.upsert_job("Engineer", beta, &JobFields::default()).await.unwrap();

        assert_eq!(db.list_jobs(None).unwrap().len(), 3);
        let acme_jobs = db.list_jobs(Some("Acme")).unwrap();
        assert_eq!(acme_jobs.len(), 2);
        assert!(acme_jobs.iter().all(|j| j.company_name == "Acme"));

        let companies = db.list_companies().unwrap();
        assert_eq!(companies.len(), 2);
        assert_eq!(companies[0].0.name, "Acme");
        assert_eq!(companies[0].1, 2);
        assert_eq!(companies[1].1, 1);
    }

    #[tokio::test]
    async fn test_find_company_by_name() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.find_company_by_name("Acme").await.unwrap().is_none());

        let fields = CompanyFields {
            location: "서울".to_string(),
            description: "Python".to_string(),
        };
        let id = db.upsert_company("Acme", &fields).await.unwrap();
        let found = db.find_company_by_name("Acme").await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.location.as_deref(), Some("서울"));
    }
}
