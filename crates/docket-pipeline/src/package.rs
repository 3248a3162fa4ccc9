//! Archive packaging.
//!
//! On a download request the packager assembles a ZIP containing every
//! renamed page blob under `processed/` plus one summary table, spooled
//! through a temporary file so the whole archive is never held in memory.
//! Jobs without a renamed artifact fall back to their original page blob
//! under the most specific name available; failed pages appear only as
//! summary rows.

use std::collections::HashSet;
use std::io::Write;

use bytes::Bytes;
use futures::StreamExt;
use serde_json::Value;
use tempfile::NamedTempFile;
use tokio_util::io::ReaderStream;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use docket_core::fields::CONFIDENCE_KEY;
use docket_core::{Error, ErrorKind, Result};
use docket_data::{BoxedStore, Job, JobStatus, Session};
use docket_opendal::{StorageBackend, StorageError};

use crate::postprocess::loose_key;

/// Tracing target for packaging operations.
const TRACING_TARGET: &str = "docket_pipeline::package";

/// Validity of presigned archive download links.
const EXPORT_URL_TTL: std::time::Duration = std::time::Duration::from_secs(60 * 60);

/// Fixed, allow-listed summary columns for the known ticket model.
pub const SUMMARY_FIELDS: [&str; 16] = [
    "Company Name",
    "Ticket Number",
    "Date",
    "Job Number",
    "Truck Number",
    "Material",
    "Quantity",
    "Unit",
    "Unit Price",
    "Total Amount",
    "Driver Name",
    "Customer Name",
    "PO Number",
    "Origin",
    "Destination",
    "Notes",
];

/// Sensitive field names that never reach the summary.
pub const DENY_FIELDS: [&str; 4] = ["Driver License", "SSN", "Account Number", "Routing Number"];

/// A built archive spooled to disk.
pub struct ArchiveSpool {
    temp: NamedTempFile,
    size: u64,
}

impl ArchiveSpool {
    /// Archive size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Opens a fresh read stream over the spooled archive.
    pub async fn open_stream(
        &self,
    ) -> Result<ReaderStream<tokio::fs::File>> {
        let file = tokio::fs::File::open(self.temp.path())
            .await
            .map_err(|err| Error::with_source(ErrorKind::StorageUnavailable, Box::new(err)))?;
        Ok(ReaderStream::new(file))
    }
}

/// Builds session archives on demand.
#[derive(Clone)]
pub struct Packager {
    store: BoxedStore,
    storage: StorageBackend,
}

impl Packager {
    /// Creates a packager over the given store and storage.
    pub fn new(store: BoxedStore, storage: StorageBackend) -> Self {
        Self { store, storage }
    }

    /// Assembles the archive for a session: renamed pages plus summary.
    ///
    /// Deterministic for a fixed session state: same file set, identical
    /// per-entry bytes.
    #[tracing::instrument(skip(self, session), fields(session_id = %session.id), target = TRACING_TARGET)]
    pub async fn build_archive(&self, session: &Session) -> Result<ArchiveSpool> {
        let jobs = self.store.list_jobs(session.id).await?;
        let mut children: Vec<&Job> = jobs.iter().filter(|job| job.is_child()).collect();
        children.sort_by_key(|job| (job.created_at, job.split_page_number, job.id));

        let temp = NamedTempFile::new()
            .map_err(|err| Error::with_source(ErrorKind::StorageUnavailable, Box::new(err)))?;
        let file = temp
            .reopen()
            .map_err(|err| Error::with_source(ErrorKind::StorageUnavailable, Box::new(err)))?;

        // One entry in flight at a time: the writer thread owns the file,
        // the async side fetches blobs and feeds it.
        let (sender, mut receiver) = tokio::sync::mpsc::channel::<(String, Bytes)>(2);
        let writer = tokio::task::spawn_blocking(move || -> Result<u64> {
            let mut zip = ZipWriter::new(file);
            let options = SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated);

            while let Some((name, bytes)) = receiver.blocking_recv() {
                zip.start_file(name, options)
                    .map_err(|err| Error::with_source(ErrorKind::StorageUnavailable, Box::new(err)))?;
                zip.write_all(&bytes)
                    .map_err(|err| Error::with_source(ErrorKind::StorageUnavailable, Box::new(err)))?;
            }

            let file = zip
                .finish()
                .map_err(|err| Error::with_source(ErrorKind::StorageUnavailable, Box::new(err)))?;
            let size = file
                .metadata()
                .map(|meta| meta.len())
                .unwrap_or_default();
            Ok(size)
        });

        let mut used_names: HashSet<String> = HashSet::new();
        for job in &children {
            if job.status != JobStatus::Completed {
                continue;
            }

            let (source, name) = match (&job.processed_file_url, &job.new_file_name) {
                (Some(url), Some(name)) => (url.clone(), name.clone()),
                // Post-processing did not produce an artifact: fall back
                // to the original page blob under its stored name.
                _ => match &job.blob_url {
                    Some(url) => (url.clone(), job.file_name.clone()),
                    None => continue,
                },
            };

            let entry_name = unique_entry_name(&mut used_names, &name);
            let bytes = match self.storage.get(&source).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!(
                        target: TRACING_TARGET,
                        job_id = %job.id,
                        source = %source,
                        error = %err,
                        "skipping unreadable page blob"
                    );
                    continue;
                }
            };

            sender
                .send((format!("processed/{entry_name}"), bytes))
                .await
                .map_err(|_| Error::new(ErrorKind::StorageUnavailable).with_detail("archive writer stopped"))?;
        }

        let summary = summary_csv(&children)?;
        sender
            .send((format!("summary_{}.csv", session.id), summary))
            .await
            .map_err(|_| Error::new(ErrorKind::StorageUnavailable).with_detail("archive writer stopped"))?;
        drop(sender);

        let size = writer
            .await
            .map_err(|err| Error::with_source(ErrorKind::StorageUnavailable, Box::new(err)))??;

        tracing::debug!(
            target: TRACING_TARGET,
            session_id = %session.id,
            size,
            "archive built"
        );

        Ok(ArchiveSpool { temp, size })
    }

    /// Streams the spooled archive into the session's exports location and
    /// records it as the session download artifact.
    ///
    /// The stored URL is presigned when the storage service supports it;
    /// otherwise the blob path itself is recorded.
    pub async fn export(&self, session: &Session, spool: &ArchiveSpool) -> Result<String> {
        let export_path = session.prefix().export_path(session.created_at);

        let stream = spool
            .open_stream()
            .await?
            .map(|chunk| chunk.map_err(StorageError::Io));
        self.storage
            .write_stream(&export_path, Box::pin(stream))
            .await
            .map_err(Error::from)?;

        let zip_url = self
            .storage
            .presigned_url(&export_path, EXPORT_URL_TTL)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| export_path.clone());
        self.store.set_zip_url(session.id, zip_url).await?;

        Ok(export_path)
    }
}

/// Returns a name unique within the archive, suffixing duplicates.
fn unique_entry_name(used: &mut HashSet<String>, name: &str) -> String {
    if used.insert(name.to_string()) {
        return name.to_string();
    }
    let (stem, extension) = docket_core::path::split_extension(name);
    let mut counter = 2;
    loop {
        let candidate = format!("{stem}_{counter}{extension}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}

/// Renders the summary table: allow-listed columns, one row per page.
fn summary_csv(children: &[&Job]) -> Result<Bytes> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header: Vec<&str> = SUMMARY_FIELDS.to_vec();
    header.extend(["File Name", "Status", "Confidence"]);
    writer
        .write_record(&header)
        .map_err(|err| Error::with_source(ErrorKind::StorageUnavailable, Box::new(err)))?;

    let denied: HashSet<String> = DENY_FIELDS.iter().map(|name| loose_key(name)).collect();

    for job in children {
        let fields = job
            .extracted_fields
            .as_ref()
            .and_then(Value::as_object);

        let mut record: Vec<String> = SUMMARY_FIELDS
            .iter()
            .map(|column| {
                if denied.contains(&loose_key(column)) {
                    return String::new();
                }
                fields
                    .and_then(|map| field_display(map, column))
                    .unwrap_or_default()
            })
            .collect();

        record.push(
            job.new_file_name
                .clone()
                .unwrap_or_else(|| job.file_name.clone()),
        );
        record.push(job.status.to_string().to_lowercase());
        record.push(
            fields
                .and_then(|map| map.get(CONFIDENCE_KEY))
                .and_then(Value::as_f64)
                .map(|confidence| format!("{confidence:.2}"))
                .unwrap_or_default(),
        );

        writer
            .write_record(&record)
            .map_err(|err| Error::with_source(ErrorKind::StorageUnavailable, Box::new(err)))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|err| Error::with_source(ErrorKind::StorageUnavailable, Box::new(err)))?;
    Ok(Bytes::from(bytes))
}

/// Looks up one allow-listed column in the stored field map.
fn field_display(map: &serde_json::Map<String, Value>, column: &str) -> Option<String> {
    let wanted = loose_key(column);
    map.iter().find_map(|(key, value)| {
        if key == CONFIDENCE_KEY || loose_key(key) != wanted {
            return None;
        }
        value.as_str().map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::sync::Arc;
    use std::time::Duration;

    use docket_data::{MemoryStore, SessionStore};
    use serde_json::json;
    use uuid::Uuid;

    use docket_opendal::StorageConfig;

    use super::*;

    struct Fixture {
        store: Arc<MemoryStore>,
        storage: StorageBackend,
        session: Session,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let storage = StorageBackend::new(StorageConfig::Memory).unwrap();
        let mut session = Session::new("u-1", "model-a", Duration::from_secs(3600));
        session.total_files = 1;
        session.total_pages = 3;
        store.create_session(session.clone()).await.unwrap();
        Fixture {
            store,
            storage,
            session,
        }
    }

    async fn seed_job(
        fixture: &Fixture,
        parent: &Job,
        page: u32,
        status: JobStatus,
        processed: Option<&str>,
        fields: Option<Value>,
    ) -> Job {
        let mut job = Job::child(parent, format!("scan_page_{page}.pdf"), page);
        job.status = status;

        let blob = format!("{}pages/scan_page_{page}.pdf", fixture.session.blob_prefix);
        fixture
            .storage
            .put(&blob, Bytes::from(format!("page-{page}")))
            .await
            .unwrap();
        job.blob_url = Some(blob);

        if let Some(name) = processed {
            let path = format!("{}processed/{name}", fixture.session.blob_prefix);
            fixture
                .storage
                .put(&path, Bytes::from(format!("renamed-{page}")))
                .await
                .unwrap();
            job.processed_file_url = Some(path);
            job.new_file_name = Some(name.to_string());
        }
        job.extracted_fields = fields;
        job
    }

    async fn read_archive(spool: &ArchiveSpool) -> zip::ZipArchive<std::io::Cursor<Vec<u8>>> {
        let mut stream = spool.open_stream().await.unwrap();
        let mut bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            bytes.extend_from_slice(&chunk.unwrap());
        }
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap()
    }

    fn entry_names(archive: &zip::ZipArchive<std::io::Cursor<Vec<u8>>>) -> Vec<String> {
        let mut names: Vec<String> = (0..archive.len())
            .map(|i| archive.name_for_index(i).unwrap_or_default().to_string())
            .collect();
        names.sort();
        names
    }

    fn entry_string(
        archive: &mut zip::ZipArchive<std::io::Cursor<Vec<u8>>>,
        name: &str,
    ) -> String {
        let mut entry = archive.by_name(name).unwrap();
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        content
    }

    #[tokio::test]
    async fn archive_contains_pages_and_summary() {
        let fixture = fixture().await;
        let parent = Job::parent(fixture.session.id, "scan.pdf", 3);

        let completed = seed_job(
            &fixture,
            &parent,
            1,
            JobStatus::Completed,
            Some("Acme_1_2025-06-05.pdf"),
            Some(json!({"Company Name": "Acme", "Ticket Number": "1", "_confidence": 0.9})),
        )
        .await;
        // Post-processing failed for page 2: falls back to the original.
        let fallback = seed_job(&fixture, &parent, 2, JobStatus::Completed, None, None).await;
        let mut failed = seed_job(&fixture, &parent, 3, JobStatus::Failed, None, None).await;
        failed.error = Some("POLL_TIMEOUT".into());

        fixture
            .store
            .insert_jobs(vec![parent, completed, fallback.clone(), failed])
            .await
            .unwrap();

        let packager = Packager::new(fixture.store.clone(), fixture.storage.clone());
        let spool = packager.build_archive(&fixture.session).await.unwrap();
        let mut archive = read_archive(&spool).await;

        assert_eq!(
            entry_names(&archive),
            vec![
                "processed/Acme_1_2025-06-05.pdf".to_string(),
                "processed/scan_page_2.pdf".to_string(),
                format!("summary_{}.csv", fixture.session.id),
            ]
        );

        // Renamed artifact wins; fallback carries the original page bytes.
        assert_eq!(
            entry_string(&mut archive, "processed/Acme_1_2025-06-05.pdf"),
            "renamed-1"
        );
        assert_eq!(
            entry_string(&mut archive, "processed/scan_page_2.pdf"),
            "page-2"
        );

        let summary = entry_string(&mut archive, &format!("summary_{}.csv", fixture.session.id));
        let rows: Vec<&str> = summary.lines().collect();
        assert_eq!(rows.len(), 4, "header plus one row per page");
        assert!(rows[0].starts_with("Company Name,Ticket Number,Date"));
        assert!(rows[0].ends_with("File Name,Status,Confidence"));
        assert!(rows[1].contains("Acme") && rows[1].contains("completed") && rows[1].contains("0.90"));
        assert!(rows[3].contains("failed"));
    }

    #[tokio::test]
    async fn empty_session_archives_summary_only() {
        let fixture = fixture().await;
        let packager = Packager::new(fixture.store.clone(), fixture.storage.clone());

        let spool = packager.build_archive(&fixture.session).await.unwrap();
        let archive = read_archive(&spool).await;

        assert_eq!(
            entry_names(&archive),
            vec![format!("summary_{}.csv", fixture.session.id)]
        );
    }

    #[tokio::test]
    async fn packaging_is_deterministic() {
        let fixture = fixture().await;
        let parent = Job::parent(fixture.session.id, "scan.pdf", 2);
        let one = seed_job(
            &fixture,
            &parent,
            1,
            JobStatus::Completed,
            Some("Acme_1_2025-06-05.pdf"),
            Some(json!({"Company Name": "Acme"})),
        )
        .await;
        let two = seed_job(&fixture, &parent, 2, JobStatus::Completed, None, None).await;
        fixture
            .store
            .insert_jobs(vec![parent, one, two])
            .await
            .unwrap();

        let packager = Packager::new(fixture.store.clone(), fixture.storage.clone());
        let first = packager.build_archive(&fixture.session).await.unwrap();
        let second = packager.build_archive(&fixture.session).await.unwrap();

        let mut archive_a = read_archive(&first).await;
        let mut archive_b = read_archive(&second).await;
        assert_eq!(entry_names(&archive_a), entry_names(&archive_b));

        for name in entry_names(&archive_a) {
            assert_eq!(
                entry_string(&mut archive_a, &name),
                entry_string(&mut archive_b, &name),
                "entry {name} differs between runs"
            );
        }
    }

    #[tokio::test]
    async fn export_records_zip_url() {
        let fixture = fixture().await;
        let packager = Packager::new(fixture.store.clone(), fixture.storage.clone());

        let spool = packager.build_archive(&fixture.session).await.unwrap();
        let path = packager.export(&fixture.session, &spool).await.unwrap();

        assert!(path.starts_with(&fixture.session.blob_prefix));
        assert!(path.contains("exports/session_"));
        assert!(fixture.storage.exists(&path).await.unwrap());

        let session = fixture
            .store
            .get_session(fixture.session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.zip_url.as_deref(), Some(path.as_str()));
    }

    #[test]
    fn deny_list_blanks_sensitive_columns() {
        // A model variant that leaks a denied field under an allow-listed
        // name must still render an empty cell.
        let parent = Job::parent(Uuid::now_v7(), "scan.pdf", 1);
        let mut job = Job::child(&parent, "scan_page_1.pdf", 1);
        job.status = JobStatus::Completed;
        job.extracted_fields = Some(json!({"Driver License": "D-123", "Company Name": "Acme"}));

        let children = [&job];
        let csv = summary_csv(&children[..]).unwrap();
        let text = String::from_utf8(csv.to_vec()).unwrap();
        assert!(!text.contains("D-123"));
        assert!(text.contains("Acme"));
    }
}
