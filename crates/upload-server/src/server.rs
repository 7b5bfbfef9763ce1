//! Upload HTTP server.
//!
//! Binds a TCP listener and serves the upload router until shut down.
//! In-flight requests are allowed to finish on shutdown.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use ferry_store::ChunkStore;

use crate::ServerError;
use crate::routes::{AppState, router};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind.
    pub bind: IpAddr,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
        }
    }
}

/// The upload server.
pub struct UploadServer {
    addr: SocketAddr,
    state: AppState,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl UploadServer {
    pub fn new(config: ServerConfig, store: ChunkStore) -> Arc<Self> {
        Arc::new(Self {
            addr: SocketAddr::new(config.bind, config.port),
            state: AppState::new(store),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Gracefully shuts down the server.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the server until [`shutdown`](Self::shutdown) is called.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        {
            let guard = self.local_addr.lock().await;
            if guard.is_some() {
                return Err(ServerError::AlreadyRunning);
            }
        }

        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);

        let store = self.state.store().config();
        tracing::info!(
            public_dir = %store.public_dir.display(),
            temp_dir = %store.temp_dir.display(),
            chunk_size = store.chunk_size,
            "upload server listening on {local_addr}"
        );

        let cancel = self.cancel.clone();
        axum::serve(listener, router(self.state.clone()))
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;

        tracing::info!("server shut down");
        *self.local_addr.lock().await = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use ferry_protocol::ContentKey;
    use ferry_protocol::messages::{CheckResponse, MergeResponse, UploadResponse};
    use ferry_store::StoreConfig;
    use tempfile::TempDir;

    struct Running {
        server: Arc<UploadServer>,
        base: String,
        _dir: TempDir,
        handle: tokio::task::JoinHandle<Result<(), ServerError>>,
    }

    async fn start() -> Running {
        let dir = TempDir::new().unwrap();
        let mut config = StoreConfig::rooted_at(dir.path());
        config.chunk_size = 100;
        let server = UploadServer::new(
            ServerConfig {
                bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
                port: 0,
            },
            ChunkStore::new(config),
        );

        let s = Arc::clone(&server);
        let handle = tokio::spawn(async move { s.run().await });

        let mut addr = None;
        for _ in 0..100 {
            addr = server.local_addr().await;
            if addr.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let addr = addr.expect("server did not bind");

        Running {
            server,
            base: format!("http://{addr}"),
            _dir: dir,
            handle,
        }
    }

    fn key() -> ContentKey {
        ContentKey::new("abc123", "png").unwrap()
    }

    #[tokio::test]
    async fn check_unknown_upload() {
        let running = start().await;
        let client = reqwest::Client::new();

        let resp: CheckResponse = client
            .get(format!("{}/api/check", running.base))
            .query(&[("filename", key().as_str())])
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(resp.success);
        assert!(!resp.exists);
        assert!(!resp.uploading);
        assert!(resp.uploaded_list.is_empty());

        running.server.shutdown();
        running.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn missing_filename_is_bad_request() {
        let running = start().await;
        let resp = reqwest::get(format!("{}/api/check", running.base)).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "No filename provided.");
        running.server.shutdown();
    }

    #[tokio::test]
    async fn upload_check_merge_and_fetch() {
        let running = start().await;
        let client = reqwest::Client::new();
        let key = key();
        let data: Vec<u8> = (0..250u32).map(|i| i as u8).collect();

        for (index, piece) in data.chunks(100).enumerate() {
            let name = key.chunk_name(index as u64);
            let resp: UploadResponse = client
                .post(format!("{}/api/upload", running.base))
                .query(&[("filename", key.as_str()), ("chunkFileName", name.as_str())])
                .body(piece.to_vec())
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            assert_eq!(resp.size, piece.len() as u64);
            assert_eq!(resp.filename, name);
        }

        let check: CheckResponse = client
            .get(format!("{}/api/check", running.base))
            .query(&[("filename", key.as_str())])
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(check.uploading);
        let sizes: Vec<u64> = check.uploaded_list.iter().map(|c| c.size).collect();
        assert_eq!(sizes, vec![100, 100, 50]);

        let merged: MergeResponse = client
            .get(format!("{}/api/merge", running.base))
            .query(&[("filename", key.as_str()), ("size", "250")])
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(merged.success);
        assert_eq!(merged.filename, key.as_str());

        let fetched = client
            .get(format!("{}/static/{}", running.base, key))
            .send()
            .await
            .unwrap();
        assert_eq!(
            fetched.headers()[reqwest::header::CONTENT_TYPE],
            "image/png"
        );
        assert_eq!(fetched.bytes().await.unwrap().as_ref(), data.as_slice());

        running.server.shutdown();
    }

    #[tokio::test]
    async fn stale_offset_is_conflict() {
        let running = start().await;
        let client = reqwest::Client::new();
        let key = key();
        let name = key.chunk_name(0);
        let url = format!("{}/api/upload", running.base);

        client
            .post(&url)
            .query(&[("filename", key.as_str()), ("chunkFileName", name.as_str())])
            .body(vec![1u8; 40])
            .send()
            .await
            .unwrap();

        let resp = client
            .post(&url)
            .query(&[
                ("filename", key.as_str()),
                ("chunkFileName", name.as_str()),
                ("offset", "0"),
            ])
            .body(vec![1u8; 60])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::CONFLICT);

        running.server.shutdown();
    }

    #[tokio::test]
    async fn merge_unknown_is_not_found() {
        let running = start().await;
        let resp = reqwest::Client::new()
            .get(format!("{}/api/merge", running.base))
            .query(&[("filename", key().as_str()), ("size", "10")])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

        let fetched = reqwest::get(format!("{}/static/{}", running.base, key()))
            .await
            .unwrap();
        assert_eq!(fetched.status(), reqwest::StatusCode::NOT_FOUND);
        running.server.shutdown();
    }

    #[tokio::test]
    async fn incomplete_merge_is_conflict() {
        let running = start().await;
        let client = reqwest::Client::new();
        let key = key();
        let name = key.chunk_name(1);
        client
            .post(format!("{}/api/upload", running.base))
            .query(&[("filename", key.as_str()), ("chunkFileName", name.as_str())])
            .body(vec![0u8; 100])
            .send()
            .await
            .unwrap();

        let resp = client
            .get(format!("{}/api/merge", running.base))
            .query(&[("filename", key.as_str()), ("size", "200")])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::CONFLICT);
        running.server.shutdown();
    }
}
