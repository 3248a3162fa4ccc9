//! Filename post-processing.
//!
//! For each successful page job, derives a canonical file name from the
//! extracted fields and copies the source page blob to the processed
//! location. Naming is deterministic: jobs are visited in page order and
//! collisions within a session resolve to `_2`, `_3`, … suffixes.
//!
//! Post-processing failures are local to the job: it stays completed, the
//! processed URL stays null and the packager falls back to the original.

use std::collections::HashMap;
use std::sync::Arc;

use jiff::civil::Date;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use docket_core::path::split_extension;
use docket_core::{Error, Result, normalize_date};
use docket_data::{BoxedStore, Job, JobStatus};
use docket_opendal::StorageBackend;

use crate::config::PipelineConfig;
use crate::limiter::RateLimiter;

/// Tracing target for post-processing operations.
const TRACING_TARGET: &str = "docket_pipeline::postprocess";

/// Field names recognized as the company segment, probed in order.
const COMPANY_FIELDS: [&str; 7] = [
    "Company Name",
    "Company",
    "Vendor Name",
    "Vendor",
    "Supplier",
    "Hauler",
    "Contractor",
];

/// Field names recognized as the ticket segment, probed in order.
const TICKET_FIELDS: [&str; 8] = [
    "Ticket Number",
    "Ticket No",
    "Ticket #",
    "Ticket",
    "Invoice Number",
    "Invoice No",
    "Invoice #",
    "Load Number",
];

/// Field names recognized as the date segment, probed in order.
const DATE_FIELDS: [&str; 5] = [
    "Date",
    "Ticket Date",
    "Invoice Date",
    "Delivery Date",
    "Service Date",
];

/// Fallback company segment when no company-like field is present.
const COMPANY_FALLBACK: &str = "UnknownCompany";

/// Fallback ticket segment when no ticket-like field is present.
const TICKET_FALLBACK: &str = "NoTicket";

/// Derives the canonical base name (no extension) for one page.
///
/// `today` supplies the date fallback for unparseable or absent dates; the
/// epoch never appears here because the fallback is always the current day.
pub fn derive_base_name(fields: &serde_json::Map<String, Value>, template: &str, today: Date) -> String {
    let company = sanitize_company(&lookup(fields, &COMPANY_FIELDS).unwrap_or_default());
    let ticket = sanitize_ticket(&lookup(fields, &TICKET_FIELDS).unwrap_or_default());
    let date = lookup(fields, &DATE_FIELDS)
        .and_then(|raw| normalize_date(&raw))
        .unwrap_or_else(|| today.to_string());

    template
        .replace("{company}", &company)
        .replace("{ticket}", &ticket)
        .replace("{date}", &date)
}

/// First non-empty value among `candidates`, matched loosely on the key.
fn lookup(fields: &serde_json::Map<String, Value>, candidates: &[&str]) -> Option<String> {
    for candidate in candidates {
        let wanted = loose_key(candidate);
        let found = fields.iter().find_map(|(key, value)| {
            if loose_key(key) != wanted {
                return None;
            }
            let text = value.as_str()?.trim();
            (!text.is_empty()).then(|| text.to_string())
        });
        if found.is_some() {
            return found;
        }
    }
    None
}

/// Case/punctuation-insensitive key form used for field recognition.
pub(crate) fn loose_key(key: &str) -> String {
    key.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Company segment: alphanumerics and spaces kept, whitespace runs become
/// underscores, capped at 50 characters.
pub fn sanitize_company(raw: &str) -> String {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect();
    let joined = kept.split_whitespace().collect::<Vec<_>>().join("_");
    let capped: String = joined.chars().take(50).collect();

    if capped.is_empty() {
        COMPANY_FALLBACK.to_string()
    } else {
        capped
    }
}

/// Ticket segment: alphanumerics only, capped at 20 characters.
pub fn sanitize_ticket(raw: &str) -> String {
    let kept: String = raw
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(20)
        .collect();

    if kept.is_empty() {
        TICKET_FALLBACK.to_string()
    } else {
        kept
    }
}

/// Assigns final file names for `base_names` in order, resolving
/// collisions with `_2`, `_3`, … suffixes against `reserved`.
pub fn resolve_collisions(
    base_names: Vec<(String, String)>,
    reserved: &mut HashMap<String, u32>,
) -> Vec<String> {
    base_names
        .into_iter()
        .map(|(base, extension)| {
            let mut candidate = format!("{base}{extension}");
            loop {
                let seen = reserved.entry(candidate.clone()).or_insert(0);
                *seen += 1;
                if *seen == 1 {
                    break candidate;
                }
                candidate = format!("{base}_{}{extension}", *seen);
            }
        })
        .collect()
}

/// Writes renamed artifacts for every completed page job of a session.
pub struct PostProcessor {
    store: BoxedStore,
    storage: StorageBackend,
    limiter: Arc<RateLimiter>,
    config: PipelineConfig,
}

impl PostProcessor {
    /// Creates a post-processor sharing the dispatcher's limiter.
    pub fn new(
        store: BoxedStore,
        storage: StorageBackend,
        limiter: Arc<RateLimiter>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            storage,
            limiter,
            config,
        }
    }

    /// Runs the batch stage over every completed child job that has no
    /// renamed artifact yet. Per-job failures are recorded and skipped.
    #[tracing::instrument(skip(self, cancel), target = TRACING_TARGET)]
    pub async fn post_process_session(
        &self,
        session_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(Error::not_found)?;

        self.store.begin_post_processing(session_id).await?;

        let prefix = session.prefix();
        let today = jiff::Timestamp::now()
            .to_zoned(jiff::tz::TimeZone::UTC)
            .date();

        let jobs = self.store.list_jobs(session_id).await?;
        let parents: HashMap<Uuid, &Job> =
            jobs.iter().filter(|job| !job.is_child()).map(|job| (job.id, job)).collect();

        let mut children: Vec<&Job> = jobs
            .iter()
            .filter(|job| job.is_child() && job.status == JobStatus::Completed)
            .collect();
        children.sort_by_key(|job| (job.created_at, job.split_page_number, job.id));

        // Names already assigned on a prior pass stay reserved so re-entry
        // cannot reshuffle suffixes.
        let mut reserved: HashMap<String, u32> = HashMap::new();
        for job in &children {
            if let Some(existing) = &job.new_file_name {
                reserved.insert(existing.clone(), 1);
            }
        }

        let pending: Vec<&Job> = children
            .iter()
            .copied()
            .filter(|job| job.processed_file_url.is_none())
            .collect();

        let base_names: Vec<(String, String)> = pending
            .iter()
            .map(|job| {
                let fields = job
                    .extracted_fields
                    .as_ref()
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                let extension = parents
                    .get(&job.parent_job_id.unwrap_or_default())
                    .map(|parent| split_extension(&parent.file_name).1)
                    .unwrap_or_else(|| ".pdf".to_string());
                let base = derive_base_name(&fields, &self.config.naming_template, today);
                (base, extension)
            })
            .collect();

        let final_names = resolve_collisions(base_names, &mut reserved);

        for (job, final_name) in pending.iter().zip(final_names) {
            self.limiter.acquire(cancel).await?;

            let Some(source) = job.blob_url.as_deref() else {
                tracing::warn!(
                    target: TRACING_TARGET,
                    job_id = %job.id,
                    "completed job has no input blob; skipping rename"
                );
                continue;
            };

            let destination = prefix.processed_path(&final_name);
            match self.storage.copy(source, &destination).await {
                Ok(()) => {
                    self.store
                        .set_processed_file(job.id, destination, final_name)
                        .await?;
                    self.store.bump_post_processed(session_id).await?;
                }
                Err(err) => {
                    // Job-local failure: the packager falls back to the
                    // original page blob.
                    tracing::warn!(
                        target: TRACING_TARGET,
                        job_id = %job.id,
                        error = %err,
                        "post-processing failed"
                    );
                }
            }
        }

        self.store.finish_post_processing(session_id).await?;
        Ok(())
    }
}
