//! The Bitable REST surface the uploader speaks (`spec.md` §6). Kept behind
//! a trait so the batching/retry logic in [`crate::Uploader`] can be driven
//! against a fixture transport in tests, the way `harvestflow_driver`
//! isolates `BrowserSession` from its scroll loop.

use serde::Deserialize;

use crate::error::UploadError;

/// One remote field as returned by the fields-discovery endpoint.
#[derive(Debug, Clone)]
pub struct RemoteField {
    pub field_id: String,
    pub field_name: String,
    pub field_type: FieldType,
}

/// The marshalling rule a remote field type selects (`spec.md` §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Number,
    DateTime,
    Other,
}

impl FieldType {
    /// Lark/Feishu Bitable's numeric field-type codes. Anything unrecognized
    /// falls back to `Other` (coerced to string), never a hard error — an
    /// unknown remote field type should not fail an upload.
    fn from_remote_code(code: i64) -> Self {
        match code {
            1 => FieldType::Text,
            2 => FieldType::Number,
            5 => FieldType::DateTime,
            _ => FieldType::Other,
        }
    }
}

/// Outcome of dispatching one batch, including the rate-limit/auth-expiry
/// signalling `spec.md` §6 prescribes.
#[derive(Debug)]
pub enum BatchOutcome {
    /// All records confirmed, in request order.
    Success { confirmed: Vec<bool> },
    RateLimited,
    AuthExpired,
    /// Any other 4xx: the batch is not retried this run.
    Rejected(String),
    ServerError(String),
}

/// The REST operations the uploader needs from the external tabular service
/// (`spec.md` §6). `docToken`/`tableId` are opaque identifiers supplied by
/// the caller's configuration, not interpreted here.
#[async_trait::async_trait]
pub trait BitableTransport: Send + Sync {
    async fn fetch_token(&self, app_id: &str, app_secret: &str) -> Result<TokenResponse, UploadError>;

    async fn fetch_fields(&self, token: &str, doc_token: &str, table_id: &str) -> Result<Vec<RemoteField>, UploadError>;

    async fn batch_create(
        &self,
        token: &str,
        doc_token: &str,
        table_id: &str,
        records: &[serde_json::Value],
    ) -> Result<BatchOutcome, UploadError>;
}

#[derive(Debug, Clone)]
pub struct TokenResponse {
    pub token: String,
    pub expires_in_secs: i64,
}

/// Default transport: plain `reqwest` calls against the real (or a
/// test-pointed) Bitable base URL.
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[derive(Deserialize)]
struct TenantTokenResponse {
    code: i64,
    msg: Option<String>,
    tenant_access_token: Option<String>,
    expire: Option<i64>,
}

#[derive(Deserialize)]
struct FieldsResponse {
    code: i64,
    msg: Option<String>,
    data: Option<FieldsData>,
}

#[derive(Deserialize)]
struct FieldsData {
    items: Vec<FieldItem>,
}

#[derive(Deserialize)]
struct FieldItem {
    field_id: String,
    field_name: String,
    #[serde(rename = "type")]
    ty: i64,
}

#[derive(Deserialize)]
struct BatchCreateResponse {
    code: i64,
    msg: Option<String>,
    data: Option<BatchCreateData>,
}

#[derive(Deserialize)]
struct BatchCreateData {
    records: Vec<serde_json::Value>,
}

/// `spec.md` §6: HTTP 400 with `code = 99991400`, or HTTP 429.
const RATE_LIMIT_CODE: i64 = 99991400;

#[async_trait::async_trait]
impl BitableTransport for ReqwestTransport {
    async fn fetch_token(&self, app_id: &str, app_secret: &str) -> Result<TokenResponse, UploadError> {
        let url = format!("{}/auth/v3/tenant_access_token/internal", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "app_id": app_id, "app_secret": app_secret }))
            .send()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(UploadError::ServerError(format!("token endpoint returned {status}")));
        }
        let body: TenantTokenResponse = resp
            .json()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        if body.code == RATE_LIMIT_CODE || status.as_u16() == 429 {
            return Err(UploadError::RateLimit(body.msg.unwrap_or_default()));
        }
        if status.is_client_error() {
            return Err(UploadError::PermissionDenied(body.msg.unwrap_or_default()));
        }
        match body.tenant_access_token {
            Some(token) => Ok(TokenResponse {
                token,
                expires_in_secs: body.expire.unwrap_or(7200),
            }),
            None => Err(UploadError::PermissionDenied(body.msg.unwrap_or_else(|| "no token in response".into()))),
        }
    }

    async fn fetch_fields(&self, token: &str, doc_token: &str, table_id: &str) -> Result<Vec<RemoteField>, UploadError> {
        let url = format!("{}/bitable/v1/apps/{doc_token}/tables/{table_id}/fields", self.base_url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 401 {
            return Err(UploadError::AuthExpired);
        }
        if status.is_server_error() {
            return Err(UploadError::ServerError(format!("fields endpoint returned {status}")));
        }
        let body: FieldsResponse = resp
            .json()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        if body.code == RATE_LIMIT_CODE {
            return Err(UploadError::RateLimit(body.msg.unwrap_or_default()));
        }
        if status.is_client_error() || body.code != 0 {
            return Err(UploadError::RemoteRejected(body.msg.unwrap_or_default()));
        }

        let items = body.data.map(|d| d.items).unwrap_or_default();
        Ok(items
            .into_iter()
            .map(|f| RemoteField {
                field_id: f.field_id,
                field_name: f.field_name,
                field_type: FieldType::from_remote_code(f.ty),
            })
            .collect())
    }

    async fn batch_create(
        &self,
        token: &str,
        doc_token: &str,
        table_id: &str,
        records: &[serde_json::Value],
    ) -> Result<BatchOutcome, UploadError> {
        let url = format!(
            "{}/bitable/v1/apps/{doc_token}/tables/{table_id}/records/batch_create",
            self.base_url
        );
        let payload = serde_json::json!({
            "records": records.iter().map(|fields| serde_json::json!({ "fields": fields })).collect::<Vec<_>>(),
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 401 {
            return Ok(BatchOutcome::AuthExpired);
        }
        if status.as_u16() == 429 {
            return Ok(BatchOutcome::RateLimited);
        }
        if status.is_server_error() {
            return Ok(BatchOutcome::ServerError(format!("batch_create returned {status}")));
        }

        let body: BatchCreateResponse = resp
            .json()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        if body.code == RATE_LIMIT_CODE {
            return Ok(BatchOutcome::RateLimited);
        }
        if status.is_client_error() || body.code != 0 {
            return Ok(BatchOutcome::Rejected(body.msg.unwrap_or_default()));
        }

        let confirmed_count = body.data.map(|d| d.records.len()).unwrap_or(0);
        // `spec.md` §4.6/§9 Open Question 3: if the remote payload doesn't
        // echo a per-row status, and the confirmed count matches the
        // request, treat the whole batch as confirmed; otherwise leave
        // every row unconfirmed rather than guess which ones landed.
        let confirmed = if confirmed_count == records.len() {
            vec![true; records.len()]
        } else {
            vec![false; records.len()]
        };
        Ok(BatchOutcome::Success { confirmed })
    }
}
