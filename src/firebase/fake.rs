//! In-process stand-in for the Firestore emulator so handlers can be driven
//! end to end in tests. Supports the subset of the REST API the client uses.

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;

use super::firestore::{decode_document, encode_fields, Document};
use crate::config::{Config, TEST_CONFIG};
use crate::AppState;

#[derive(Default)]
struct Store {
    /// `collection/id` to encoded Firestore fields.
    docs: BTreeMap<String, Map<String, Value>>,
    failing: HashSet<String>,
    requests: Vec<String>,
    next_id: u64,
}

#[derive(Clone)]
pub struct FakeFirestore {
    addr: SocketAddr,
    store: Arc<Mutex<Store>>,
}

impl FakeFirestore {
    pub async fn start() -> Self {
        let store = Arc::new(Mutex::new(Store::default()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().fallback(handle).with_state(store.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, store }
    }

    /// App state from the test config, pointed at this store.
    pub fn state(&self) -> AppState {
        let mut config = Config::from_toml_str(TEST_CONFIG).unwrap();
        config.firebase.emulator_host = Some(self.addr.to_string());
        AppState::new(config, reqwest::Client::new()).unwrap()
    }

    pub async fn put(&self, collection: &str, id: &str, fields: Value) {
        let Value::Object(fields) = fields else {
            panic!("fields must be an object");
        };
        let encoded = encode_fields(&fields)["fields"]
            .as_object()
            .cloned()
            .unwrap_or_default();
        self.store
            .lock()
            .await
            .docs
            .insert(format!("{collection}/{id}"), encoded);
    }

    pub async fn doc(&self, collection: &str, id: &str) -> Option<Document> {
        let path = format!("{collection}/{id}");
        let store = self.store.lock().await;
        let fields = store.docs.get(&path)?;
        decode_document(&resource(&path, fields)).ok()
    }

    pub async fn list(&self, collection: &str) -> Vec<Document> {
        let store = self.store.lock().await;
        in_collection(&store, collection)
            .filter_map(|(path, fields)| decode_document(&resource(path, fields)).ok())
            .collect()
    }

    /// Make every write to `collection` fail with 500.
    pub async fn fail_writes(&self, collection: &str) {
        self.store.lock().await.failing.insert(collection.to_string());
    }

    /// `"METHOD collection/id"` for every request received.
    pub async fn requests(&self) -> Vec<String> {
        self.store.lock().await.requests.clone()
    }
}

fn resource(path: &str, fields: &Map<String, Value>) -> Value {
    json!({
        "name": format!("projects/rental-test/databases/(default)/documents/{path}"),
        "fields": fields,
    })
}

fn in_collection<'a>(
    store: &'a Store,
    collection: &'a str,
) -> impl Iterator<Item = (&'a String, &'a Map<String, Value>)> + 'a {
    store.docs.iter().filter(move |(path, _)| {
        path.split_once('/')
            .is_some_and(|(c, rest)| c == collection && !rest.contains('/'))
    })
}

async fn handle(
    State(store): State<Arc<Mutex<Store>>>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    let Some((_, path)) = uri.path().split_once("/documents/") else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let path = path.to_string();
    let collection = path.split('/').next().unwrap_or_default().to_string();
    let is_document = path.contains('/');
    let query: Vec<(String, String)> =
        url::form_urlencoded::parse(uri.query().unwrap_or_default().as_bytes())
            .into_owned()
            .collect();
    let body_fields = serde_json::from_slice::<Value>(&body)
        .ok()
        .and_then(|v| v.get("fields").and_then(Value::as_object).cloned())
        .unwrap_or_default();

    let mut store = store.lock().await;
    store.requests.push(format!("{method} {path}"));
    if method != Method::GET && store.failing.contains(&collection) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "injected failure").into_response();
    }

    match (method, is_document) {
        (Method::GET, false) => {
            let documents: Vec<Value> = in_collection(&store, &collection)
                .map(|(p, f)| resource(p, f))
                .collect();
            Json(json!({ "documents": documents })).into_response()
        }
        (Method::GET, true) => match store.docs.get(&path) {
            Some(fields) => Json(resource(&path, fields)).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        },
        (Method::POST, false) => {
            store.next_id += 1;
            let path = format!("{collection}/doc{}", store.next_id);
            store.docs.insert(path.clone(), body_fields.clone());
            Json(resource(&path, &body_fields)).into_response()
        }
        (Method::PATCH, true) => {
            let mask: Vec<&str> = query
                .iter()
                .filter(|(k, _)| k == "updateMask.fieldPaths")
                .map(|(_, v)| v.as_str())
                .collect();
            if mask.is_empty() {
                store.docs.insert(path.clone(), body_fields.clone());
                return Json(resource(&path, &body_fields)).into_response();
            }
            let Some(existing) = store.docs.get_mut(&path) else {
                return StatusCode::NOT_FOUND.into_response();
            };
            for field in mask {
                match body_fields.get(field) {
                    Some(v) => existing.insert(field.to_string(), v.clone()),
                    None => existing.remove(field),
                };
            }
            let merged = existing.clone();
            Json(resource(&path, &merged)).into_response()
        }
        (Method::DELETE, true) => {
            store.docs.remove(&path);
            Json(json!({})).into_response()
        }
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}
