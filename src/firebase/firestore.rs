use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::{json, Map, Value};

use super::oauth::{OAuthError, ServiceAccountAuth};
use crate::config::FirebaseConfig;

/// A decoded Firestore document: plain JSON fields plus `id`.
pub type Document = Map<String, Value>;

const PAGE_SIZE: u32 = 300;

/// Firestore REST v1 client for the project's default database.
pub struct FirestoreClient {
    client: reqwest::Client,
    documents_url: String,
    /// `None` when talking to the emulator, which accepts any bearer.
    auth: Option<ServiceAccountAuth>,
}

impl FirestoreClient {
    pub fn new(client: reqwest::Client, config: &FirebaseConfig) -> Self {
        let (root, auth) = match config.emulator_host {
            Some(ref host) => {
                tracing::info!(host = %host, "Using Firestore emulator");
                (format!("http://{host}"), None)
            }
            None => (
                "https://firestore.googleapis.com".to_string(),
                Some(ServiceAccountAuth::new(client.clone(), config)),
            ),
        };

        Self {
            client,
            documents_url: format!(
                "{root}/v1/projects/{}/databases/(default)/documents",
                config.project_id
            ),
            auth,
        }
    }

    /// List every document in a collection, following page tokens.
    ///
    /// `order_by` takes Firestore's syntax, e.g. `"timestamp desc"`.
    pub async fn list(
        &self,
        collection: &str,
        order_by: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<Document>, FirestoreError> {
        let url = format!("{}/{collection}", self.documents_url);
        let mut docs = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page_size = limit
                .map(|l| l.saturating_sub(docs.len() as u32).min(PAGE_SIZE))
                .unwrap_or(PAGE_SIZE);
            let mut query: Vec<(&str, String)> = vec![("pageSize", page_size.to_string())];
            if let Some(order) = order_by {
                query.push(("orderBy", order.to_string()));
            }
            if let Some(ref token) = page_token {
                query.push(("pageToken", token.clone()));
            }

            let req = self.request(Method::GET, &url).await?.query(&query);
            let body = send(req, collection).await?;

            if let Some(items) = body.get("documents").and_then(|d| d.as_array()) {
                for item in items {
                    docs.push(decode_document(item)?);
                }
            }

            page_token = body
                .get("nextPageToken")
                .and_then(|t| t.as_str())
                .filter(|t| !t.is_empty())
                .map(String::from);

            let reached_limit = limit.is_some_and(|l| docs.len() as u32 >= l);
            if page_token.is_none() || reached_limit {
                break;
            }
        }

        tracing::debug!(collection, count = docs.len(), "Listed documents");
        Ok(docs)
    }

    pub async fn get(&self, collection: &str, id: &str) -> Result<Document, FirestoreError> {
        let path = doc_path(collection, id)?;
        let url = format!("{}/{path}", self.documents_url);
        let req = self.request(Method::GET, &url).await?;
        let body = send(req, &path).await?;
        decode_document(&body)
    }

    /// Like [`get`](Self::get), but a missing document is `Ok(None)`.
    pub async fn get_optional(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, FirestoreError> {
        match self.get(collection, id).await {
            Ok(doc) => Ok(Some(doc)),
            Err(FirestoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create a document with a server-assigned id.
    pub async fn create(
        &self,
        collection: &str,
        fields: &Document,
    ) -> Result<Document, FirestoreError> {
        let url = format!("{}/{collection}", self.documents_url);
        let req = self
            .request(Method::POST, &url)
            .await?
            .json(&encode_fields(fields));
        let body = send(req, collection).await?;
        decode_document(&body)
    }

    /// Create or fully replace a document at a known id.
    pub async fn set(
        &self,
        collection: &str,
        id: &str,
        fields: &Document,
    ) -> Result<Document, FirestoreError> {
        let path = doc_path(collection, id)?;
        let url = format!("{}/{path}", self.documents_url);
        let req = self
            .request(Method::PATCH, &url)
            .await?
            .json(&encode_fields(fields));
        let body = send(req, &path).await?;
        decode_document(&body)
    }

    /// Merge `fields` into an existing document. Fails with `NotFound` if the
    /// document does not exist.
    pub async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: &Document,
    ) -> Result<Document, FirestoreError> {
        let path = doc_path(collection, id)?;
        let url = format!("{}/{path}", self.documents_url);
        let mut query: Vec<(&str, &str)> = fields
            .keys()
            .filter(|k| k.as_str() != "id")
            .map(|k| ("updateMask.fieldPaths", k.as_str()))
            .collect();
        query.push(("currentDocument.exists", "true"));

        let req = self
            .request(Method::PATCH, &url)
            .await?
            .query(&query)
            .json(&encode_fields(fields));
        let body = send(req, &path).await?;
        decode_document(&body)
    }

    pub async fn delete(&self, collection: &str, id: &str) -> Result<(), FirestoreError> {
        let path = doc_path(collection, id)?;
        let url = format!("{}/{path}", self.documents_url);
        let req = self.request(Method::DELETE, &url).await?;
        send(req, &path).await?;
        Ok(())
    }

    async fn request(&self, method: Method, url: &str) -> Result<RequestBuilder, FirestoreError> {
        let token = match self.auth {
            Some(ref auth) => auth.access_token().await?,
            None => "owner".to_string(),
        };
        Ok(self.client.request(method, url).bearer_auth(token))
    }
}

/// `collection/id`, refusing ids that would address a different document.
pub fn doc_path(collection: &str, id: &str) -> Result<String, FirestoreError> {
    let bad = id.is_empty()
        || id == "."
        || id == ".."
        || id.chars().any(|c| matches!(c, '/' | '\\' | '?' | '#' | '%') || c.is_control());
    if bad {
        return Err(FirestoreError::InvalidId(id.to_string()));
    }
    Ok(format!("{collection}/{id}"))
}

async fn send(req: RequestBuilder, path: &str) -> Result<Value, FirestoreError> {
    let resp = req
        .send()
        .await
        .map_err(|e| FirestoreError::Request(e.to_string()))?;

    let status = resp.status();
    if status == StatusCode::NOT_FOUND {
        return Err(FirestoreError::NotFound(path.to_string()));
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(FirestoreError::Api(format!("{status}: {body}")));
    }

    let text = resp
        .text()
        .await
        .map_err(|e| FirestoreError::Request(e.to_string()))?;
    if text.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(&text).map_err(|e| FirestoreError::Parse(e.to_string()))
}

/// Wrap plain JSON fields as a Firestore `{"fields": {...}}` body. `id` is
/// never written back as a field.
pub fn encode_fields(fields: &Document) -> Value {
    let encoded: Map<String, Value> = fields
        .iter()
        .filter(|(k, _)| k.as_str() != "id")
        .map(|(k, v)| (k.clone(), encode_value(v)))
        .collect();
    json!({ "fields": encoded })
}

pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64().unwrap_or_default() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() }
        }),
        Value::Object(map) => {
            let fields: Map<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), encode_value(v)))
                .collect();
            json!({ "mapValue": { "fields": fields } })
        }
    }
}

pub fn decode_value(value: &Value) -> Value {
    let Some(obj) = value.as_object() else {
        return Value::Null;
    };
    let Some((kind, inner)) = obj.iter().next() else {
        return Value::Null;
    };

    match kind.as_str() {
        "integerValue" => match inner {
            Value::String(s) => s
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(s.clone())),
            other => other.clone(),
        },
        "doubleValue" => match inner {
            Value::Number(_) => inner.clone(),
            Value::String(s) => s
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            _ => Value::Null,
        },
        "booleanValue" | "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => {
            inner.clone()
        }
        "geoPointValue" => inner.clone(),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(|v| v.as_array())
                .map(|vals| vals.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => Value::Object(
            inner
                .get("fields")
                .and_then(|f| f.as_object())
                .map(|fields| {
                    fields
                        .iter()
                        .map(|(k, v)| (k.clone(), decode_value(v)))
                        .collect()
                })
                .unwrap_or_default(),
        ),
        _ => Value::Null,
    }
}

/// Turn a Firestore document resource into a flat [`Document`].
pub fn decode_document(doc: &Value) -> Result<Document, FirestoreError> {
    let name = doc
        .get("name")
        .and_then(|n| n.as_str())
        .ok_or_else(|| FirestoreError::Parse("document without a name".into()))?;
    let id = name.rsplit('/').next().unwrap_or(name);

    let mut out = Map::new();
    out.insert("id".to_string(), Value::String(id.to_string()));
    if let Some(fields) = doc.get("fields").and_then(|f| f.as_object()) {
        for (k, v) in fields {
            out.insert(k.clone(), decode_value(v));
        }
    }
    Ok(out)
}

#[derive(Debug, thiserror::Error)]
pub enum FirestoreError {
    #[error("Firestore auth failed: {0}")]
    Auth(#[from] OAuthError),
    #[error("HTTP request failed: {0}")]
    Request(String),
    #[error("Firestore API error: {0}")]
    Api(String),
    #[error("Document not found: {0}")]
    NotFound(String),
    #[error("Unexpected Firestore response: {0}")]
    Parse(String),
    #[error("Invalid document id {0:?}")]
    InvalidId(String),
}
