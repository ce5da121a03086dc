use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::*;
use crate::reference::generate_reference_number;

/// Attempts made to find an unused reference number before giving up.
pub const REFERENCE_ATTEMPTS: usize = 8;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("conflict")] Conflict,
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Source of candidate reference numbers. Swappable so collisions can be forced in tests.
pub type ReferenceSource = Arc<dyn Fn() -> String + Send + Sync>;

pub fn default_reference_source() -> ReferenceSource {
    Arc::new(generate_reference_number)
}

/// Storage contract for claims. Lookups report absence as `Ok(None)`.
#[async_trait]
pub trait ReportRepo: Send + Sync {
    async fn create_report(&self, new: NewReport) -> RepoResult<Report>;
    async fn get_report(&self, id: &str) -> RepoResult<Option<Report>>;
    async fn get_report_by_reference(&self, reference: &str) -> RepoResult<Option<Report>>;
    /// Newest first.
    async fn list_reports(&self) -> RepoResult<Vec<Report>>;
    /// Case-insensitive substring search, newest first.
    async fn search_reports(&self, query: &str) -> RepoResult<Vec<Report>>;
    async fn update_status(&self, id: &str, status: &str) -> RepoResult<Option<Report>>;
    async fn report_stats(&self) -> RepoResult<ReportStats>;
}

/// Newest first; equal timestamps fall back to id so repeated listings agree.
pub fn sort_newest_first(reports: &mut [Report]) {
    reports.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}

fn new_id() -> Id {
    uuid::Uuid::new_v4().to_string()
}

fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Mutex, RwLock};

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        reports: HashMap<Id, Report>,
        #[serde(skip)]
        by_reference: HashMap<String, Id>,
    }

    impl State {
        fn reindex(&mut self) {
            self.by_reference = self
                .reports
                .values()
                .map(|r| (r.reference_number.clone(), r.id.clone()))
                .collect();
        }
    }

    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Option<Arc<PathBuf>>,
        persist_lock: Arc<Mutex<()>>,
        references: ReferenceSource,
    }

    fn snapshot_temp_path(path: &Path) -> PathBuf {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }

    impl InMemRepo {
        /// Purely in-memory store; nothing survives the process.
        pub fn new() -> Self {
            Self {
                state: Arc::new(RwLock::new(State::default())),
                snapshot_path: None,
                persist_lock: Arc::new(Mutex::new(())),
                references: default_reference_source(),
            }
        }

        /// Store backed by a JSON snapshot that is loaded now and rewritten after every write.
        pub fn with_snapshot(path: impl Into<PathBuf>) -> Self {
            let path = path.into();
            let state = Self::load_state_from(&path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Some(Arc::new(path)),
                persist_lock: Arc::new(Mutex::new(())),
                references: default_reference_source(),
            }
        }

        pub fn with_reference_source(mut self, source: ReferenceSource) -> Self {
            self.references = source;
            self
        }

        fn load_state_from(path: &Path) -> State {
            let mut state = match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        tracing::info!(path = %path.display(), reports = s.reports.len(), "loaded report snapshot");
                        s
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "unreadable report snapshot, starting empty");
                        State::default()
                    }
                },
                Err(e) => {
                    tracing::info!(path = %path.display(), error = %e, "no report snapshot, starting empty");
                    State::default()
                }
            };
            state.reindex();
            state
        }

        /// Rewrites the snapshot from the current state. Writers are serialised and each
        /// snapshot is written to a sibling temp file then renamed over the old one, so
        /// readers only ever see a complete file.
        fn persist(&self) {
            let Some(path) = self.snapshot_path.as_deref() else { return };
            let Ok(_guard) = self.persist_lock.lock() else {
                tracing::error!("report snapshot lock poisoned");
                return;
            };
            let bytes = match self.state.read() {
                Ok(s) => serde_json::to_vec_pretty(&*s),
                Err(_) => return,
            };
            let bytes = match bytes {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialise report snapshot");
                    return;
                }
            };
            if let Some(dir) = path.parent() {
                let _ = std::fs::create_dir_all(dir);
            }
            let tmp = snapshot_temp_path(path);
            if let Err(e) = std::fs::write(&tmp, bytes).and_then(|()| std::fs::rename(&tmp, path)) {
                tracing::error!(path = %path.display(), error = %e, "failed to write report snapshot");
                let _ = std::fs::remove_file(&tmp);
            }
        }

        fn read(&self) -> RepoResult<std::sync::RwLockReadGuard<'_, State>> {
            self.state.read().map_err(|_| RepoError::Internal("report store lock poisoned".into()))
        }

        fn write(&self) -> RepoResult<std::sync::RwLockWriteGuard<'_, State>> {
            self.state.write().map_err(|_| RepoError::Internal("report store lock poisoned".into()))
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self { Self::new() }
    }

    #[async_trait]
    impl ReportRepo for InMemRepo {
        async fn create_report(&self, new: NewReport) -> RepoResult<Report> {
            let mut s = self.write()?;
            let reference = (0..REFERENCE_ATTEMPTS)
                .map(|_| (self.references)())
                .find(|candidate| !s.by_reference.contains_key(candidate))
                .ok_or(RepoError::Conflict)?;
            let id = new_id();
            if s.reports.contains_key(&id) {
                return Err(RepoError::Conflict);
            }
            let report = Report::from_draft(id.clone(), reference.clone(), now(), new);
            s.by_reference.insert(reference, id.clone());
            s.reports.insert(id, report.clone());
            drop(s);                       // release lock before persisting
            self.persist();
            Ok(report)
        }

        async fn get_report(&self, id: &str) -> RepoResult<Option<Report>> {
            Ok(self.read()?.reports.get(id).cloned())
        }

        async fn get_report_by_reference(&self, reference: &str) -> RepoResult<Option<Report>> {
            let s = self.read()?;
            Ok(s.by_reference.get(reference).and_then(|id| s.reports.get(id)).cloned())
        }

        async fn list_reports(&self) -> RepoResult<Vec<Report>> {
            let mut v: Vec<_> = self.read()?.reports.values().cloned().collect();
            sort_newest_first(&mut v);
            Ok(v)
        }

        async fn search_reports(&self, query: &str) -> RepoResult<Vec<Report>> {
            let needle = query.to_lowercase();
            let mut v: Vec<_> = self
                .read()?
                .reports
                .values()
                .filter(|r| r.matches_search(&needle))
                .cloned()
                .collect();
            sort_newest_first(&mut v);
            Ok(v)
        }

        async fn update_status(&self, id: &str, status: &str) -> RepoResult<Option<Report>> {
            let mut s = self.write()?;
            let Some(report) = s.reports.get_mut(id) else { return Ok(None) };
            report.status = status.to_string();
            let updated = report.clone();
            drop(s);
            self.persist();
            Ok(Some(updated))
        }

        async fn report_stats(&self) -> RepoResult<ReportStats> {
            Ok(ReportStats::from_reports(self.read()?.reports.values()))
        }
    }

}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::types::Json;
    use sqlx::{FromRow, Pool, Postgres};

    const COLUMNS: &str = "id, reference_number, license_plate, vin, make, model, year, color, \
        incident_date, incident_time, location, description, reporter_name, reporter_phone, \
        reporter_email, photo_urls, status, created_at";

    #[derive(FromRow)]
    struct ReportRow {
        id: String,
        reference_number: String,
        license_plate: String,
        vin: Option<String>,
        make: String,
        model: String,
        year: String,
        color: Option<String>,
        incident_date: String,
        incident_time: Option<String>,
        location: Option<String>,
        description: String,
        reporter_name: String,
        reporter_phone: String,
        reporter_email: String,
        photo_urls: Json<Vec<String>>,
        status: String,
        created_at: DateTime<Utc>,
    }

    impl From<ReportRow> for Report {
        fn from(r: ReportRow) -> Self {
            Report {
                id: r.id,
                reference_number: r.reference_number,
                license_plate: r.license_plate,
                vin: r.vin,
                make: r.make,
                model: r.model,
                year: r.year,
                color: r.color,
                incident_date: r.incident_date,
                incident_time: r.incident_time,
                location: r.location,
                description: r.description,
                reporter_name: r.reporter_name,
                reporter_phone: r.reporter_phone,
                reporter_email: r.reporter_email,
                photo_urls: r.photo_urls.0,
                status: r.status,
                created_at: r.created_at,
            }
        }
    }

    fn internal(e: sqlx::Error) -> RepoError {
        RepoError::Internal(e.to_string())
    }

    fn is_unique_violation(e: &sqlx::Error) -> bool {
        matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
    }

    #[derive(Clone)]
    pub struct PgRepo {
        pool: Pool<Postgres>,
        references: ReferenceSource,
    }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self {
            Self { pool, references: default_reference_source() }
        }

        pub fn with_reference_source(mut self, source: ReferenceSource) -> Self {
            self.references = source;
            self
        }

        pub async fn migrate(&self) -> anyhow::Result<()> {
            sqlx::migrate!("./migrations").run(&self.pool).await?;
            Ok(())
        }

        async fn fetch_many(&self, sql: &str, bind: Option<&str>) -> RepoResult<Vec<Report>> {
            let mut q = sqlx::query_as::<_, ReportRow>(sql);
            if let Some(b) = bind {
                q = q.bind(b);
            }
            let rows = q.fetch_all(&self.pool).await.map_err(internal)?;
            let mut v: Vec<Report> = rows.into_iter().map(Report::from).collect();
            sort_newest_first(&mut v);
            Ok(v)
        }
    }

    #[async_trait]
    impl ReportRepo for PgRepo {
        async fn create_report(&self, new: NewReport) -> RepoResult<Report> {
            let sql = format!(
                "INSERT INTO reports ({COLUMNS}) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18) \
                 RETURNING {COLUMNS}"
            );
            // unique constraint on reference_number; retry with a fresh candidate
            for _ in 0..REFERENCE_ATTEMPTS {
                let report = Report::from_draft(new_id(), (self.references)(), now(), new.clone());
                let res = sqlx::query_as::<_, ReportRow>(&sql)
                    .bind(&report.id)
                    .bind(&report.reference_number)
                    .bind(&report.license_plate)
                    .bind(&report.vin)
                    .bind(&report.make)
                    .bind(&report.model)
                    .bind(&report.year)
                    .bind(&report.color)
                    .bind(&report.incident_date)
                    .bind(&report.incident_time)
                    .bind(&report.location)
                    .bind(&report.description)
                    .bind(&report.reporter_name)
                    .bind(&report.reporter_phone)
                    .bind(&report.reporter_email)
                    .bind(Json(&report.photo_urls))
                    .bind(&report.status)
                    .bind(report.created_at)
                    .fetch_one(&self.pool)
                    .await;
                match res {
                    Ok(row) => return Ok(row.into()),
                    Err(e) if is_unique_violation(&e) => continue,
                    Err(e) => return Err(internal(e)),
                }
            }
            Err(RepoError::Conflict)
        }

        async fn get_report(&self, id: &str) -> RepoResult<Option<Report>> {
            let row = sqlx::query_as::<_, ReportRow>(&format!("SELECT {COLUMNS} FROM reports WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?;
            Ok(row.map(Report::from))
        }

        async fn get_report_by_reference(&self, reference: &str) -> RepoResult<Option<Report>> {
            let row = sqlx::query_as::<_, ReportRow>(&format!(
                "SELECT {COLUMNS} FROM reports WHERE reference_number = $1"
            ))
            .bind(reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
            Ok(row.map(Report::from))
        }

        async fn list_reports(&self) -> RepoResult<Vec<Report>> {
            self.fetch_many(&format!("SELECT {COLUMNS} FROM reports"), None).await
        }

        async fn search_reports(&self, query: &str) -> RepoResult<Vec<Report>> {
            // strpos instead of ILIKE so % and _ in the query are literal
            let sql = format!(
                "SELECT {COLUMNS} FROM reports WHERE \
                 strpos(lower(reference_number), lower($1)) > 0 OR \
                 strpos(lower(license_plate), lower($1)) > 0 OR \
                 strpos(lower(reporter_name), lower($1)) > 0 OR \
                 strpos(lower(reporter_email), lower($1)) > 0 OR \
                 strpos(lower(make), lower($1)) > 0 OR \
                 strpos(lower(model), lower($1)) > 0"
            );
            self.fetch_many(&sql, Some(query)).await
        }

        async fn update_status(&self, id: &str, status: &str) -> RepoResult<Option<Report>> {
            let row = sqlx::query_as::<_, ReportRow>(&format!(
                "UPDATE reports SET status = $2 WHERE id = $1 RETURNING {COLUMNS}"
            ))
            .bind(id)
            .bind(status)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
            Ok(row.map(Report::from))
        }

        async fn report_stats(&self) -> RepoResult<ReportStats> {
            let rows: Vec<(String, i64)> =
                sqlx::query_as("SELECT status, COUNT(*) FROM reports GROUP BY status")
                    .fetch_all(&self.pool)
                    .await
                    .map_err(internal)?;
            let mut stats = ReportStats::default();
            for (status, count) in rows {
                let count = count.max(0) as usize;
                stats.total += count;
                stats.by_status.insert(status, count);
            }
            Ok(stats)
        }
    }
}
