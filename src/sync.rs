use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::remote::RemoteStore;

#[derive(Debug)]
struct SyncJob {
    token: String,
    data: Value,
}

/// Handle held by the session; cheap to clone.
#[derive(Clone)]
pub struct RemoteSync {
    tx: mpsc::UnboundedSender<SyncJob>,
    revoked: Arc<AtomicBool>,
}

impl RemoteSync {
    /// Start the upload worker on the current tokio runtime.
    pub fn spawn(remote: Arc<dyn RemoteStore>, debounce: Duration) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let revoked = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(run(rx, remote, debounce, revoked.clone()));
        (Self { tx, revoked }, handle)
    }

    /// Queue `data` for upload. Fire-and-forget.
    pub fn schedule(&self, token: &str, data: Value) {
        let job = SyncJob {
            token: token.to_string(),
            data,
        };
        if self.tx.send(job).is_err() {
            tracing::debug!("sync worker stopped, dropping snapshot");
        }
    }

    /// Returns true once after the server rejected the session token.
    pub fn take_revoked(&self) -> bool {
        self.revoked.swap(false, Ordering::SeqCst)
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<SyncJob>,
    remote: Arc<dyn RemoteStore>,
    debounce: Duration,
    revoked: Arc<AtomicBool>,
) {
    while let Some(mut job) = rx.recv().await {
        let mut coalesced = 0usize;
        loop {
            tokio::select! {
                next = rx.recv() => match next {
                    Some(newer) => {
                        job = newer;
                        coalesced += 1;
                    }
                    None => break,
                },
                _ = tokio::time::sleep(debounce) => break,
            }
        }

        tracing::debug!(coalesced, "uploading local record");
        match remote.put_user_data(&job.token, &job.data).await {
            Ok(updated_at) => tracing::debug!(%updated_at, "remote copy updated"),
            Err(e) if e.is_auth_failure() => {
                tracing::warn!(error = %e, "session token rejected by server");
                revoked.store(true, Ordering::SeqCst);
            }
            Err(e) => tracing::warn!(error = %e, "remote sync failed, keeping local copy"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{AuthResponse, RemoteError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        puts: Mutex<Vec<(String, Value)>>,
        reject_token: bool,
    }

    #[async_trait]
    impl RemoteStore for RecordingStore {
        async fn register(&self, _: &str, _: &str, _: &str, _: &Value) -> Result<AuthResponse, RemoteError> {
            Err(RemoteError::InvalidResponse)
        }

        async fn login(&self, _: &str, _: &str) -> Result<AuthResponse, RemoteError> {
            Err(RemoteError::InvalidResponse)
        }

        async fn get_user_data(&self, _: &str) -> Result<Value, RemoteError> {
            Ok(Value::Null)
        }

        async fn put_user_data(&self, token: &str, data: &Value) -> Result<String, RemoteError> {
            if self.reject_token {
                return Err(RemoteError::Api {
                    status: 401,
                    code: "INVALID_TOKEN".into(),
                    message: "expired".into(),
                });
            }
            self.puts.lock().unwrap().push((token.to_string(), data.clone()));
            Ok("now".into())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_coalesces_into_one_write() {
        let store = Arc::new(RecordingStore::default());
        let (sync, handle) = RemoteSync::spawn(store.clone(), Duration::from_millis(650));

        for n in 0..5 {
            sync.schedule("tok", json!({ "n": n }));
        }
        drop(sync);
        handle.await.unwrap();

        let puts = store.puts.lock().unwrap();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].1, json!({ "n": 4 }));
    }

    #[tokio::test(start_paused = true)]
    async fn separate_windows_write_separately() {
        let store = Arc::new(RecordingStore::default());
        let (sync, handle) = RemoteSync::spawn(store.clone(), Duration::from_millis(100));

        sync.schedule("tok", json!({ "n": 1 }));
        tokio::time::sleep(Duration::from_millis(500)).await;
        sync.schedule("tok", json!({ "n": 2 }));
        drop(sync);
        handle.await.unwrap();

        assert_eq!(store.puts.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_token_raises_revocation_once() {
        let store = Arc::new(RecordingStore {
            reject_token: true,
            ..Default::default()
        });
        let (sync, handle) = RemoteSync::spawn(store, Duration::from_millis(10));
        let observer = sync.clone();

        sync.schedule("stale", json!({}));
        drop(sync);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(observer.take_revoked());
        assert!(!observer.take_revoked());
        drop(observer);
        handle.await.unwrap();
    }
}
