use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::Rng;
use tokio::sync::Mutex;

/// A synthesized audio clip waiting for Twilio to `<Play>` it.
#[derive(Clone)]
pub struct Clip {
    pub audio: Bytes,
    pub content_type: &'static str,
    created: Instant,
}

/// Short-lived store of synthesized clips, keyed by random id.
///
/// Twilio fetches a clip once, right after receiving the TwiML that
/// references it, so clips only need to live for a few minutes.
#[derive(Clone)]
pub struct ClipStore {
    inner: Arc<Mutex<HashMap<String, Clip>>>,
    ttl: Duration,
}

impl ClipStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Store MP3 audio and return its id.
    pub async fn insert(&self, audio: Bytes) -> String {
        let id = new_clip_id();
        tracing::debug!(clip_id = %id, bytes = audio.len(), "Clip stored");
        self.inner.lock().await.insert(
            id.clone(),
            Clip {
                audio,
                content_type: "audio/mpeg",
                created: Instant::now(),
            },
        );
        id
    }

    /// Look up a clip that has not expired.
    pub async fn get(&self, id: &str) -> Option<Clip> {
        self.inner
            .lock()
            .await
            .get(id)
            .filter(|c| c.created.elapsed() < self.ttl)
            .cloned()
    }

    /// Drop expired clips. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let before = inner.len();
        inner.retain(|_, c| c.created.elapsed() < self.ttl);
        before - inner.len()
    }
}

/// 128 random bits as hex.
fn new_clip_id() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    hex::encode(bytes)
}
