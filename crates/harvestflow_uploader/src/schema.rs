//! Remote schema discovery and caching (`spec.md` §4.6). Fetched once per
//! process start per target document; subsequent uploads reuse the cached
//! `fieldName -> (fieldId, fieldType)` map.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use crate::error::UploadError;
use crate::transport::{BitableTransport, FieldType, RemoteField};

#[derive(Debug, Clone)]
pub struct FieldMeta {
    pub field_id: String,
    pub field_type: FieldType,
}

struct CachedSchema {
    fields: HashMap<String, FieldMeta>,
    /// Fields this process has already logged as absent, so repeated
    /// uploads of the same job don't spam the log (`spec.md` §4.6).
    warned_absent: HashSet<String>,
}

/// Caches one document+table's field list across the process lifetime.
/// Keyed by `"{doc_token}/{table_id}"` so distinct destination tables don't
/// share a schema.
#[derive(Default)]
pub struct SchemaCache {
    by_doc: Mutex<HashMap<String, CachedSchema>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fields_for(
        &self,
        transport: &dyn BitableTransport,
        token: &str,
        doc_token: &str,
        table_id: &str,
    ) -> Result<Arc<HashMap<String, FieldMeta>>, UploadError> {
        let key = format!("{doc_token}/{table_id}");
        {
            let guard = self.by_doc.lock().await;
            if let Some(cached) = guard.get(&key) {
                return Ok(Arc::new(cached.fields.clone()));
            }
        }

        let remote_fields = transport.fetch_fields(token, doc_token, table_id).await?;
        let fields: HashMap<String, FieldMeta> = remote_fields
            .into_iter()
            .map(|f: RemoteField| {
                (
                    f.field_name,
                    FieldMeta { field_id: f.field_id, field_type: f.field_type },
                )
            })
            .collect();

        let mut guard = self.by_doc.lock().await;
        let entry = guard.entry(key).or_insert_with(|| CachedSchema {
            fields: fields.clone(),
            warned_absent: HashSet::new(),
        });
        Ok(Arc::new(entry.fields.clone()))
    }

    /// Logs a field's absence from the remote schema, once per field per
    /// process per document (`spec.md` §4.6).
    pub async fn warn_absent_once(&self, doc_table_key: &str, field_name: &str) {
        let mut guard = self.by_doc.lock().await;
        if let Some(cached) = guard.get_mut(doc_table_key) {
            if cached.warned_absent.insert(field_name.to_string()) {
                warn!(field = field_name, doc_table = doc_table_key, "local field absent from remote schema, dropping");
            }
        }
    }
}
