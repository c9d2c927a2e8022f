//! External Uploader (`spec.md` §4.6, C6): batched, rate-limited,
//! field-type-aware replication of unsynced records to a Lark/Feishu
//! Bitable table.
//!
//! Batching, token caching, and schema discovery are split into their own
//! modules the way `casparian_sinks` splits format-specific writers from
//! its shared batching/error-enum shape; here the "formats" are the four
//! marshalling rules of `spec.md` §4.6 rather than Parquet/CSV/DuckDB.

pub mod auth;
pub mod error;
pub mod marshal;
pub mod schema;
pub mod transport;

use std::collections::HashMap;
use std::sync::Arc;

use harvestflow_db::RecordStore;
use harvestflow_governor::{backoff_delay, RateGovernor};
use harvestflow_ids::JobId;
use harvestflow_protocol::{HasErrorKind, Record};
use serde_json::Value;
use tracing::{info, warn};

use auth::TokenCache;
use error::UploadError;
use schema::{FieldMeta, SchemaCache};
use transport::{BatchOutcome, BitableTransport};

/// Records are grouped into batches of up to 500 per remote call
/// (`spec.md` §4.6).
const BATCH_SIZE: usize = 500;
/// Upper bound on how many unsynced rows one `upload` call pulls from the
/// Record Store before batching. Large enough that a single call drains a
/// job's backlog in practice; the next `trigger-upload` call picks up
/// whatever didn't fit.
const MAX_PULL: i64 = 50_000;

/// Local record fields the uploader knows how to marshal. Anything in a
/// record's payload outside this set has no remote counterpart to drop —
/// `spec.md` §4.6's "unknown fields are silently dropped" applies the other
/// direction, to local fields absent from the *remote* schema.
const LOCAL_FIELD_NAMES: &[&str] = &[
    "author",
    "content",
    "published_at",
    "likes",
    "replies",
    "reposts",
    "canonical_link",
    "hashtags",
    "media",
    "category",
];

#[derive(Debug, Clone)]
pub struct UploaderConfig {
    pub doc_token: String,
    pub table_id: String,
    /// Maximum retries for transient/5xx errors before a batch is left
    /// unsynced for a later run (`spec.md` §4.6, default 3).
    pub max_retries: u32,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self { doc_token: String::new(), table_id: String::new(), max_retries: 3 }
    }
}

/// Outcome of one `upload_job`/`upload_all` call.
#[derive(Debug, Default, Clone)]
pub struct UploadReport {
    pub confirmed: usize,
    pub unconfirmed: usize,
    /// Set when at least one batch failed this run; surfaced via
    /// `RecordStore::set_last_upload_error` as the job's aggregate upload
    /// error metadata (`spec.md` §4.6).
    pub last_error: Option<String>,
}

pub struct Uploader {
    record_store: Arc<RecordStore>,
    transport: Arc<dyn BitableTransport>,
    governor: Arc<RateGovernor>,
    tokens: TokenCache,
    schema: SchemaCache,
    config: UploaderConfig,
}

impl Uploader {
    pub fn new(
        record_store: Arc<RecordStore>,
        transport: Arc<dyn BitableTransport>,
        governor: Arc<RateGovernor>,
        app_id: impl Into<String>,
        app_secret: impl Into<String>,
        config: UploaderConfig,
    ) -> Self {
        let tokens = TokenCache::new(app_id, app_secret, governor.clone());
        Self {
            record_store,
            transport,
            governor,
            tokens,
            schema: SchemaCache::new(),
            config,
        }
    }

    /// `Upload(jobId)` (`spec.md` §4.6).
    pub async fn upload_job(&self, job_id: JobId) -> Result<UploadReport, UploadError> {
        self.upload(Some(job_id)).await
    }

    /// `Upload(all)` (`spec.md` §4.6): pulls unsynced records across every
    /// job.
    pub async fn upload_all(&self) -> Result<UploadReport, UploadError> {
        self.upload(None).await
    }

    async fn upload(&self, job_id: Option<JobId>) -> Result<UploadReport, UploadError> {
        let records = self.record_store.list_unsynced(job_id, MAX_PULL).await?;
        let mut report = UploadReport::default();
        if records.is_empty() {
            return Ok(report);
        }

        let doc_table_key = format!("{}/{}", self.config.doc_token, self.config.table_id);

        for batch in records.chunks(BATCH_SIZE) {
            match self.upload_batch(batch, &doc_table_key).await {
                Ok(confirmed_ids) => {
                    report.confirmed += confirmed_ids.len();
                    report.unconfirmed += batch.len() - confirmed_ids.len();
                    self.record_store.mark_synced(&confirmed_ids).await?;
                }
                Err(err) => {
                    warn!(error = %err, batch_len = batch.len(), "batch left unsynced this run");
                    report.unconfirmed += batch.len();
                    report.last_error = Some(err.to_string());
                }
            }
        }

        if let Some(job_id) = job_id {
            self.record_store
                .set_last_upload_error(job_id, report.last_error.as_deref())
                .await?;
        }
        info!(confirmed = report.confirmed, unconfirmed = report.unconfirmed, "upload run complete");
        Ok(report)
    }

    /// Uploads one batch, retrying per `spec.md` §4.6's error-handling
    /// table, and returns the record ids the remote confirmed.
    async fn upload_batch(&self, batch: &[Record], doc_table_key: &str) -> Result<Vec<i64>, UploadError> {
        let mut token = self.tokens.get(self.transport.as_ref()).await?;
        let fields = self
            .schema
            .fields_for(self.transport.as_ref(), &token, &self.config.doc_token, &self.config.table_id)
            .await?;

        for name in LOCAL_FIELD_NAMES {
            if !fields.contains_key(*name) {
                self.schema.warn_absent_once(doc_table_key, name).await;
            }
        }

        let payload: Vec<Value> = batch.iter().map(|r| build_payload_row(r, &fields)).collect();

        let mut attempt = 0u32;
        loop {
            self.governor.acquire_doc(doc_table_key).await;
            let outcome = self
                .transport
                .batch_create(&token, &self.config.doc_token, &self.config.table_id, &payload)
                .await;
            self.governor.record_doc(doc_table_key).await;

            match outcome {
                Ok(BatchOutcome::Success { confirmed }) => {
                    let ids = batch
                        .iter()
                        .zip(confirmed.iter())
                        .filter(|(_, &ok)| ok)
                        .map(|(r, _)| r.id)
                        .collect();
                    return Ok(ids);
                }
                Ok(BatchOutcome::RateLimited) => {
                    let delay = backoff_delay(attempt);
                    attempt += 1;
                    warn!(?delay, "rate limited, retrying same batch");
                    tokio::time::sleep(delay).await;
                }
                Ok(BatchOutcome::AuthExpired) => {
                    // Transparent refresh; does not count toward maxRetries
                    // (`spec.md` §4.6).
                    token = self.tokens.refresh(self.transport.as_ref()).await?;
                }
                Ok(BatchOutcome::Rejected(msg)) => {
                    return Err(UploadError::RemoteRejected(msg));
                }
                Ok(BatchOutcome::ServerError(msg)) => {
                    if attempt + 1 >= self.config.max_retries {
                        return Err(UploadError::ServerError(msg));
                    }
                    attempt += 1;
                    tokio::time::sleep(backoff_delay(attempt)).await;
                }
                Err(err) if err.kind().is_retryable() => {
                    if attempt + 1 >= self.config.max_retries {
                        return Err(err);
                    }
                    attempt += 1;
                    tokio::time::sleep(backoff_delay(attempt)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Builds one record's payload object: only fields present in the remote
/// schema are included, marshalled per that field's remote type
/// (`spec.md` §4.6).
fn build_payload_row(record: &Record, fields: &HashMap<String, FieldMeta>) -> Value {
    let mut out = serde_json::Map::new();
    for name in LOCAL_FIELD_NAMES {
        let Some(meta) = fields.get(*name) else { continue };
        let local_value = local_field_value(record, name);
        if let Some(marshalled) = marshal::marshal_field(&local_value, meta.field_type) {
            out.insert(name.to_string(), marshalled);
        }
    }
    Value::Object(out)
}

fn local_field_value(record: &Record, field_name: &str) -> Value {
    match field_name {
        "author" => Value::String(record.author.clone()),
        "content" => Value::String(record.content.clone()),
        "published_at" => record
            .published_at
            .map(|ts| Value::String(ts.to_rfc3339()))
            .unwrap_or(Value::Null),
        "likes" => Value::from(record.likes),
        "replies" => Value::from(record.replies),
        "reposts" => Value::from(record.reposts),
        "canonical_link" => record.canonical_link.clone().map(Value::String).unwrap_or(Value::Null),
        "hashtags" => record
            .hashtags
            .clone()
            .map(|tags| Value::Array(tags.into_iter().map(Value::String).collect()))
            .unwrap_or(Value::Null),
        "media" => record
            .media
            .clone()
            .map(|media| Value::Array(media.into_iter().map(Value::String).collect()))
            .unwrap_or(Value::Null),
        "category" => record.category.clone().map(Value::String).unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvestflow_ids::Fingerprint;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use transport::{FieldType, RemoteField, TokenResponse};

    struct MockTransport {
        fields: Vec<RemoteField>,
        batch_calls: AtomicUsize,
        responses: StdMutex<Vec<BatchOutcome>>,
    }

    #[async_trait::async_trait]
    impl BitableTransport for MockTransport {
        async fn fetch_token(&self, _app_id: &str, _app_secret: &str) -> Result<TokenResponse, UploadError> {
            Ok(TokenResponse { token: "tok".into(), expires_in_secs: 3600 })
        }

        async fn fetch_fields(&self, _token: &str, _doc: &str, _table: &str) -> Result<Vec<RemoteField>, UploadError> {
            Ok(self.fields.clone())
        }

        async fn batch_create(
            &self,
            _token: &str,
            _doc: &str,
            _table: &str,
            records: &[Value],
        ) -> Result<BatchOutcome, UploadError> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(BatchOutcome::Success { confirmed: vec![true; records.len()] });
            }
            Ok(responses.remove(0))
        }
    }

    fn field(name: &str, ty: FieldType) -> RemoteField {
        RemoteField { field_id: format!("fld_{name}"), field_name: name.into(), field_type: ty }
    }

    #[test]
    fn build_payload_row_drops_fields_absent_from_remote_schema() {
        let fields: HashMap<String, FieldMeta> = [(
            "author".to_string(),
            FieldMeta { field_id: "fld_author".into(), field_type: FieldType::Text },
        )]
        .into_iter()
        .collect();

        let record = Record {
            id: 1,
            job_id: JobId::from(1),
            fingerprint: Fingerprint::compute("alice", "x"),
            target_key: "alice".into(),
            author: "alice".into(),
            content: "hello".into(),
            published_at: None,
            likes: 10,
            replies: 0,
            reposts: 0,
            canonical_link: None,
            hashtags: None,
            media: None,
            category: None,
            synced: false,
            created_at: chrono::Utc::now(),
        };

        let row = build_payload_row(&record, &fields);
        let obj = row.as_object().unwrap();
        assert_eq!(obj.len(), 1);
        assert_eq!(obj.get("author").unwrap(), "alice");
    }

    #[test]
    fn missing_publish_time_omits_datetime_field_entirely() {
        let fields: HashMap<String, FieldMeta> = [(
            "published_at".to_string(),
            FieldMeta { field_id: "fld_pub".into(), field_type: FieldType::DateTime },
        )]
        .into_iter()
        .collect();

        let record = Record {
            id: 1,
            job_id: JobId::from(1),
            fingerprint: Fingerprint::compute("alice", "x"),
            target_key: "alice".into(),
            author: "alice".into(),
            content: "hello".into(),
            published_at: None,
            likes: 0,
            replies: 0,
            reposts: 0,
            canonical_link: None,
            hashtags: None,
            media: None,
            category: None,
            synced: false,
            created_at: chrono::Utc::now(),
        };

        let row = build_payload_row(&record, &fields);
        assert!(row.as_object().unwrap().get("published_at").is_none());
    }

    #[tokio::test]
    async fn rate_limited_batch_retries_until_success() {
        let transport = Arc::new(MockTransport {
            fields: vec![field("author", FieldType::Text)],
            batch_calls: AtomicUsize::new(0),
            responses: StdMutex::new(vec![BatchOutcome::RateLimited]),
        });
        let governor = Arc::new(RateGovernor::new());
        let store = Arc::new(RecordStore::connect("sqlite::memory:").await.unwrap());
        let job_id = store
            .create_job(&harvestflow_protocol::JobSpec {
                name: "J".into(),
                accounts: vec!["alice".into()],
                keywords: vec![],
                thresholds: Default::default(),
                max_records: 5,
                priority: None,
                auto_upload: false,
            })
            .await
            .unwrap();
        store
            .append_records(
                job_id,
                "alice",
                &[harvestflow_protocol::CandidateRecord {
                    author: "alice".into(),
                    content: "hi".into(),
                    published_at: None,
                    likes: 10,
                    replies: 0,
                    reposts: 0,
                    canonical_link: Some("https://x.example/1".into()),
                    hashtags: None,
                    media: None,
                }],
            )
            .await
            .unwrap();

        let uploader = Uploader::new(
            store.clone(),
            transport.clone(),
            governor,
            "app",
            "secret",
            UploaderConfig { doc_token: "doc".into(), table_id: "tbl".into(), max_retries: 3 },
        );

        let report = uploader.upload_job(job_id).await.unwrap();
        assert_eq!(report.confirmed, 1);
        assert!(transport.batch_calls.load(Ordering::SeqCst) >= 2);
    }
}
