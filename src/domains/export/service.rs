use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::fs::File;
use tokio::io::BufWriter;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::domains::export::csv_record::CsvRecord;
use crate::domains::export::queue_manager::{ExportQueueManager, JobProcessor};
use crate::domains::export::repository::ExportJobRepository;
use crate::domains::export::streaming::{stream_responses, to_records, RowStream};
use crate::domains::export::types::*;
use crate::domains::export::writers::{CsvConfig, StreamingCsvWriter};
use crate::domains::response::{ResponseFilter, ResponseRepository, ResponseRow};
use crate::errors::{DbError, DomainError, ServiceError, ServiceResult};

/// Where background exports go and how they are linked.
#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub export_dir: PathBuf,
    pub base_url: String,
    pub page_size: usize,
}

impl From<&AppConfig> for ExportSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            export_dir: config.export_dir.clone(),
            base_url: config.export_base_url.clone(),
            page_size: config.export_page_size,
        }
    }
}

/// Keeps ASCII letters, digits, `-`, `_` and `.`; anything else becomes `_`.
pub fn sanitize_file_component(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            c if c.is_ascii_alphanumeric() => c,
            '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}

/// `report_<survey>_<timestamp>.csv`, the download name of a response export.
pub fn report_file_name(survey: &str, at: DateTime<Utc>) -> String {
    format!(
        "report_{}_{}.csv",
        sanitize_file_component(survey),
        at.to_rfc3339_opts(SecondsFormat::Millis, true)
    )
}

pub fn form_data_file_name(survey: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}_{}.csv",
        sanitize_file_component(survey),
        at.to_rfc3339_opts(SecondsFormat::Millis, true)
    )
}

/// Like [`report_file_name`] without `:`, so it is safe on any file system.
/// The export id keeps two exports started in the same millisecond apart.
fn stored_file_name(survey: &str, export_id: &str, at: DateTime<Utc>) -> String {
    format!(
        "report_{}_{}_{}.csv",
        sanitize_file_component(survey),
        at.format("%Y%m%dT%H%M%S%.3fZ"),
        sanitize_file_component(export_id)
    )
}

/// Response export service: live streams for downloads and background jobs
/// that write CSV files and track them in `export_status`.
pub struct ExportService {
    job_repo: Arc<dyn ExportJobRepository>,
    response_repo: Arc<dyn ResponseRepository>,
    settings: ExportSettings,
}

impl ExportService {
    pub fn new(
        job_repo: Arc<dyn ExportJobRepository>,
        response_repo: Arc<dyn ResponseRepository>,
        settings: ExportSettings,
    ) -> Self {
        Self {
            job_repo,
            response_repo,
            settings,
        }
    }

    pub fn response_rows(&self, filter: ResponseFilter) -> RowStream {
        stream_responses(self.response_repo.clone(), filter, self.settings.page_size)
    }

    /// Records a new `pending` export with its own id and hands it to the
    /// queue. A queue that can't take it leaves the job in `error`.
    pub async fn request_export(
        &self,
        queue: &ExportQueueManager,
        user_id: &str,
        survey_id: &str,
    ) -> ServiceResult<ExportJob> {
        let export_id = Uuid::new_v4().to_string();
        let job = self.job_repo.create(&export_id, user_id, survey_id).await?;

        let request = ExportRequest {
            export_id: export_id.clone(),
            user_id: user_id.to_string(),
            survey_id: survey_id.to_string(),
        };
        if let Err(e) = queue.enqueue(request) {
            log::error!("Could not queue export {} of {} for {}: {}", export_id, survey_id, user_id, e);
            self.job_repo.update_status(&export_id, ExportStatus::Error).await?;
            return Err(ServiceError::ServiceUnavailable(e.to_string()));
        }

        log::info!("Queued export {} of {} for {}", export_id, survey_id, user_id);
        Ok(job)
    }

    /// The caller's jobs, optionally only those of one survey.
    pub async fn list_jobs(&self, user_id: &str, survey_id: Option<&str>) -> ServiceResult<Vec<ExportJob>> {
        let jobs = match survey_id {
            Some(survey_id) => self.job_repo.list_for_survey(user_id, survey_id).await?,
            None => self.job_repo.list_for_user(user_id).await?,
        };
        Ok(jobs)
    }

    /// Jobs left unfinished by a previous run can't complete any more.
    pub async fn fail_unfinished(&self) -> ServiceResult<u64> {
        let failed = self.job_repo.fail_unfinished().await?;
        if failed > 0 {
            log::warn!("Marked {} unfinished exports from a previous run as error", failed);
        }
        Ok(failed)
    }

    /// Opens the file of a finished export owned by `user_id`, with its name.
    ///
    /// Unknown ids, other owners' jobs and unfinished jobs all look the same
    /// to the caller.
    pub async fn open_export(&self, user_id: &str, export_id: &str) -> ServiceResult<(String, File)> {
        let not_found = || ServiceError::NotFound(format!("No finished export {}", export_id));

        let job = match self.job_repo.find(export_id).await {
            Ok(job) => job,
            Err(DomainError::Database(DbError::NotFound(_, _))) => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };
        if job.user_id != user_id || job.status != ExportStatus::Done {
            return Err(not_found());
        }
        let file_name = job.file_name.ok_or_else(not_found)?;

        let path = self.settings.export_dir.join(&file_name);
        match File::open(&path).await {
            Ok(file) => Ok((file_name, file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("Export {} is done but {} is gone", export_id, path.display());
                Err(not_found())
            }
            Err(e) => Err(ExportError::from(e).into()),
        }
    }

    fn export_link(&self, export_id: &str) -> String {
        format!("{}/{}/file", self.settings.base_url, export_id)
    }

    async fn write_export(&self, request: &ExportRequest) -> Result<(String, ExportStats), ExportError> {
        tokio::fs::create_dir_all(&self.settings.export_dir).await?;

        let file_name = stored_file_name(&request.survey_id, &request.export_id, Utc::now());
        let path = self.settings.export_dir.join(&file_name);
        let file = File::create(&path).await?;

        let mut writer = StreamingCsvWriter::new(
            BufWriter::new(file),
            CsvConfig::default(),
            ResponseRow::schema(),
        );
        let rows = self.response_rows(ResponseFilter::survey(&request.user_id, &request.survey_id));

        match writer.write_stream(to_records(rows)).await {
            Ok(stats) => Ok((file_name, stats)),
            Err(e) => {
                drop(writer);
                if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                    log::warn!("Failed to remove partial export {}: {}", path.display(), remove_err);
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl JobProcessor for ExportService {
    async fn process(&self, request: ExportRequest) -> Result<ExportJob, ExportError> {
        let export_id = request.export_id.as_str();
        self.job_repo
            .update_status(export_id, ExportStatus::Processing)
            .await?;

        match self.write_export(&request).await {
            Ok((file_name, stats)) => {
                log::info!(
                    "Exported {} rows ({} bytes) of {} in {}ms",
                    stats.records_written,
                    stats.bytes_written,
                    request.survey_id,
                    stats.duration_ms
                );
                Ok(self
                    .job_repo
                    .mark_done(export_id, &self.export_link(export_id), &file_name)
                    .await?)
            }
            Err(e) => {
                self.job_repo
                    .update_status(export_id, ExportStatus::Error)
                    .await?;
                Err(e)
            }
        }
    }

    async fn abandon(&self, request: ExportRequest) {
        if let Err(e) = self
            .job_repo
            .update_status(&request.export_id, ExportStatus::Error)
            .await
        {
            log::error!("Failed to mark abandoned export {} as error: {}", request.export_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::{insert_response, seeded_db, OWNER_EMAIL, SURVEY_NAME};
    use crate::database::Database;
    use crate::domains::export::repository::SqliteExportJobRepository;
    use crate::domains::response::{RespondentSpan, ResponseCursor, SqliteResponseRepository};
    use crate::errors::DomainResult;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio_util::sync::CancellationToken;

    fn settings(export_dir: PathBuf) -> ExportSettings {
        ExportSettings {
            export_dir,
            base_url: "/api/v1/exports".to_string(),
            page_size: 2,
        }
    }

    fn service(db: &Database, export_dir: PathBuf) -> ExportService {
        ExportService::new(
            Arc::new(SqliteExportJobRepository::new(db.pool().clone())),
            Arc::new(SqliteResponseRepository::new(db.pool().clone())),
            settings(export_dir),
        )
    }

    /// A pending job row plus the request that runs it.
    async fn pending_request(service: &ExportService, export_id: &str) -> ExportRequest {
        service
            .job_repo
            .create(export_id, OWNER_EMAIL, SURVEY_NAME)
            .await
            .unwrap();
        ExportRequest {
            export_id: export_id.to_string(),
            user_id: OWNER_EMAIL.to_string(),
            survey_id: SURVEY_NAME.to_string(),
        }
    }

    async fn wait_for_terminal(service: &ExportService, export_id: &str) -> ExportJob {
        for _ in 0..200 {
            let job = service.job_repo.find(export_id).await.unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("export {} never finished", export_id);
    }

    /// Every page takes a while and comes back empty.
    struct SlowRepository;

    #[async_trait]
    impl ResponseRepository for SlowRepository {
        async fn fetch_page(
            &self,
            _filter: &ResponseFilter,
            _after: Option<&ResponseCursor>,
            _limit: usize,
        ) -> DomainResult<Vec<ResponseRow>> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(Vec::new())
        }

        async fn first_and_last(
            &self,
            _email: &str,
            _survey_name: Option<&str>,
        ) -> DomainResult<Vec<RespondentSpan>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_file_names() {
        let at = DateTime::parse_from_rfc3339("2024-03-01T10:00:00.123Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            report_file_name("Baseline", at),
            "report_Baseline_2024-03-01T10:00:00.123Z.csv"
        );
        assert_eq!(
            form_data_file_name("Base line", at),
            "Base_line_2024-03-01T10:00:00.123Z.csv"
        );
        assert_eq!(
            stored_file_name("a/b\"c", "1f0e", at),
            "report_a_b_c_20240301T100000.123Z_1f0e.csv"
        );
    }

    #[tokio::test]
    async fn test_job_writes_file_and_marks_done() {
        let db = seeded_db().await;
        for (user, ts) in [("u1", "2024-03-01T10:00:00Z"), ("u2", "2024-03-01T11:00:00Z"), ("u3", "2024-03-01T12:00:00Z")] {
            insert_response(db.pool(), "survey-a", user, "q1", ts, Some("yes, sure")).await;
        }
        let dir = tempfile::tempdir().unwrap();
        let service = service(&db, dir.path().join("out"));
        let request = pending_request(&service, "export-1").await;

        let job = service.process(request).await.unwrap();

        assert_eq!(job.status, ExportStatus::Done);
        assert_eq!(job.export_link.as_deref(), Some("/api/v1/exports/export-1/file"));
        let file_name = job.file_name.unwrap();
        assert!(file_name.starts_with("report_Baseline_"));

        let contents = std::fs::read_to_string(dir.path().join("out").join(file_name)).unwrap();
        assert_eq!(contents.lines().count(), 4);
        assert!(contents.starts_with("parent_surveyid,parent_shortcode,surveyid,"));
        assert!(contents.contains("\"yes, sure\""));
    }

    #[tokio::test]
    async fn test_unwritable_dir_marks_error() {
        let db = seeded_db().await;
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let service = service(&db, blocker);
        let request = pending_request(&service, "export-1").await;

        let result = service.process(request).await;

        assert!(matches!(result, Err(ExportError::Io(_))));
        let jobs = service.list_jobs(OWNER_EMAIL, None).await.unwrap();
        assert_eq!(jobs[0].status, ExportStatus::Error);
        assert_eq!(jobs[0].export_link, None);
    }

    #[tokio::test]
    async fn test_requested_exports_run_through_queue() {
        let db = seeded_db().await;
        insert_response(db.pool(), "survey-b", "u1", "q1", "2024-03-01T10:00:00Z", Some("no")).await;
        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(service(&db, dir.path().to_path_buf()));
        let shutdown = CancellationToken::new();
        let (queue, handle) = ExportQueueManager::start(service.clone(), 1, 4, shutdown.clone());

        let first = service
            .request_export(&queue, OWNER_EMAIL, SURVEY_NAME)
            .await
            .unwrap();
        assert_eq!(first.status, ExportStatus::Pending);
        assert_eq!(wait_for_terminal(&service, &first.export_id).await.status, ExportStatus::Done);

        // Asking again makes a new job; the finished one keeps its file
        let second = service
            .request_export(&queue, OWNER_EMAIL, SURVEY_NAME)
            .await
            .unwrap();
        assert_ne!(first.export_id, second.export_id);
        wait_for_terminal(&service, &second.export_id).await;

        let jobs = service.list_jobs(OWNER_EMAIL, Some(SURVEY_NAME)).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|job| job.status == ExportStatus::Done));
        assert!(service.list_jobs(OWNER_EMAIL, Some("Other")).await.unwrap().is_empty());

        let (file_name, mut file) = service.open_export(OWNER_EMAIL, &first.export_id).await.unwrap();
        assert!(file_name.starts_with("report_Baseline_"));
        let mut contents = String::new();
        file.read_to_string(&mut contents).await.unwrap();
        assert_eq!(contents.lines().count(), 2);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_open_export_only_serves_own_finished_jobs() {
        let db = seeded_db().await;
        let dir = tempfile::tempdir().unwrap();
        let service = service(&db, dir.path().to_path_buf());

        let request = pending_request(&service, "export-1").await;
        assert!(matches!(
            service.open_export(OWNER_EMAIL, "export-1").await,
            Err(ServiceError::NotFound(_))
        ));

        service.process(request).await.unwrap();
        assert!(service.open_export(OWNER_EMAIL, "export-1").await.is_ok());
        assert!(matches!(
            service.open_export("other@example.com", "export-1").await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            service.open_export(OWNER_EMAIL, "missing").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_fails_export_waiting_for_worker() {
        let db = seeded_db().await;
        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(ExportService::new(
            Arc::new(SqliteExportJobRepository::new(db.pool().clone())),
            Arc::new(SlowRepository),
            settings(dir.path().to_path_buf()),
        ));
        let shutdown = CancellationToken::new();
        let (queue, handle) = ExportQueueManager::start(service.clone(), 1, 4, shutdown.clone());

        let running = service.request_export(&queue, OWNER_EMAIL, SURVEY_NAME).await.unwrap();
        for _ in 0..100 {
            if queue.stats().active == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let waiting = service.request_export(&queue, OWNER_EMAIL, SURVEY_NAME).await.unwrap();

        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(service.job_repo.find(&running.export_id).await.unwrap().status, ExportStatus::Done);
        assert_eq!(service.job_repo.find(&waiting.export_id).await.unwrap().status, ExportStatus::Error);
    }

    #[tokio::test]
    async fn test_fail_unfinished_on_startup() {
        let db = seeded_db().await;
        let dir = tempfile::tempdir().unwrap();
        let service = service(&db, dir.path().to_path_buf());
        pending_request(&service, "left-over").await;

        assert_eq!(service.fail_unfinished().await.unwrap(), 1);
        assert_eq!(service.job_repo.find("left-over").await.unwrap().status, ExportStatus::Error);
    }
}
