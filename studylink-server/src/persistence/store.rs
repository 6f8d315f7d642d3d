//! Snapshot stores
//!
//! A store keeps exactly one document per participant, named `<id>.json`.
//! Writing again replaces the previous document.
//!
//! The persistence writer applies uploads one at a time, so a remote that
//! stops answering holds back every queued snapshot until the upload
//! deadline expires. Remote stores therefore use a short deadline
//! ([`UPLOAD_TIMEOUT`]) and report the timeout as a failed write.

use std::collections::HashMap;
use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ssh2::Session;
use studylink_common::config::StoreConfig;
use studylink_common::{Error, Result};
use uuid::Uuid;

/// Deadline for one remote upload, connection setup included
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Destination for participant snapshot documents
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Replace the stored document for `participant`
    async fn write(&self, participant: Uuid, document: Vec<u8>) -> Result<()>;
}

fn file_name(participant: Uuid) -> String {
    format!("{}.json", participant)
}

/// Build the store described by the configuration
pub fn from_config(config: &StoreConfig) -> Result<Arc<dyn SnapshotStore>> {
    let store: Arc<dyn SnapshotStore> = match config {
        StoreConfig::Directory { path } => Arc::new(DirectoryStore::new(path.clone())),
        StoreConfig::Http {
            url,
            username,
            password,
        } => {
            let credentials = match (username, password) {
                (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
                (None, None) => None,
                _ => {
                    return Err(Error::Config(
                        "store.username and store.password must be set together".to_string(),
                    ))
                }
            };
            Arc::new(HttpStore::new(url.clone(), credentials)?)
        }
        StoreConfig::Scp {
            host,
            port,
            username,
            password,
            path,
        } => Arc::new(ScpStore::new(
            host.clone(),
            *port,
            username.clone(),
            password.clone(),
            path.clone(),
        )),
        StoreConfig::Memory => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}

/// Writes `<dir>/<id>.json`
///
/// Point `dir` at a mounted share to land snapshots on the lab file server.
pub struct DirectoryStore {
    dir: PathBuf,
}

impl DirectoryStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn path_for(&self, participant: Uuid) -> PathBuf {
        self.dir.join(file_name(participant))
    }
}

#[async_trait]
impl SnapshotStore for DirectoryStore {
    fn name(&self) -> &'static str {
        "directory"
    }

    async fn write(&self, participant: Uuid, document: Vec<u8>) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        // Write then rename so readers never see a half-written file
        let target = self.path_for(participant);
        let partial = self.dir.join(format!("{}.partial", file_name(participant)));
        tokio::fs::write(&partial, &document).await?;
        tokio::fs::rename(&partial, &target).await?;
        Ok(())
    }
}

/// `PUT <base_url>/<id>.json` on a remote file store
pub struct HttpStore {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<(String, String)>,
}

impl HttpStore {
    pub fn new(base_url: String, credentials: Option<(String, String)>) -> Result<Self> {
        Self::with_timeout(base_url, credentials, UPLOAD_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: String,
        credentials: Option<(String, String)>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    pub fn url_for(&self, participant: Uuid) -> String {
        format!("{}/{}", self.base_url, file_name(participant))
    }
}

#[async_trait]
impl SnapshotStore for HttpStore {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn write(&self, participant: Uuid, document: Vec<u8>) -> Result<()> {
        let mut request = self
            .client
            .put(self.url_for(participant))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(document);

        if let Some((user, pass)) = &self.credentials {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Persistence(format!("upload failed: {}", e)))?;

        response
            .error_for_status()
            .map(|_| ())
            .map_err(|e| Error::Persistence(format!("upload rejected: {}", e)))
    }
}

/// `scp` upload of `<remote_dir>/<id>.json`, password authentication
///
/// libssh2 is blocking; each upload runs on the blocking thread pool with
/// a fresh session.
#[derive(Debug, Clone)]
pub struct ScpStore {
    host: String,
    port: u16,
    username: String,
    password: String,
    remote_dir: String,
    timeout: Duration,
}

fn scp_error(step: &str, e: impl std::fmt::Display) -> Error {
    Error::Persistence(format!("scp {} failed: {}", step, e))
}

impl ScpStore {
    pub fn new(
        host: String,
        port: u16,
        username: String,
        password: String,
        remote_dir: String,
    ) -> Self {
        Self {
            host,
            port,
            username,
            password,
            remote_dir,
            timeout: UPLOAD_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn remote_path(&self, participant: Uuid) -> String {
        let dir = self.remote_dir.trim_end_matches('/');
        if dir.is_empty() {
            file_name(participant)
        } else {
            format!("{}/{}", dir, file_name(participant))
        }
    }

    fn upload(&self, remote_path: &str, document: &[u8]) -> Result<()> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| scp_error("resolve", e))?
            .next()
            .ok_or_else(|| scp_error("resolve", format!("no address for {}", self.host)))?;
        let tcp = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|e| scp_error("connect", e))?;

        let mut session = Session::new().map_err(|e| scp_error("session", e))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(u32::try_from(self.timeout.as_millis()).unwrap_or(u32::MAX));
        session.handshake().map_err(|e| scp_error("handshake", e))?;
        session
            .userauth_password(&self.username, &self.password)
            .map_err(|e| scp_error("authentication", e))?;

        let mut channel = session
            .scp_send(Path::new(remote_path), 0o644, document.len() as u64, None)
            .map_err(|e| scp_error("open", e))?;
        channel.write_all(document).map_err(|e| scp_error("send", e))?;
        channel.send_eof().map_err(|e| scp_error("send", e))?;
        channel.wait_eof().map_err(|e| scp_error("send", e))?;
        channel.close().map_err(|e| scp_error("close", e))?;
        channel.wait_close().map_err(|e| scp_error("close", e))?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for ScpStore {
    fn name(&self) -> &'static str {
        "scp"
    }

    async fn write(&self, participant: Uuid, document: Vec<u8>) -> Result<()> {
        let store = self.clone();
        let remote_path = self.remote_path(participant);
        tokio::task::spawn_blocking(move || store.upload(&remote_path, &document))
            .await
            .map_err(|e| Error::Internal(format!("scp upload task failed: {}", e)))?
    }
}

/// Keeps the latest document per participant in memory
#[derive(Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<Uuid, Vec<u8>>>,
    writes: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest document for `participant`, parsed
    pub fn document(&self, participant: Uuid) -> Option<serde_json::Value> {
        let documents = self.documents.lock().ok()?;
        documents
            .get(&participant)
            .and_then(|bytes| serde_json::from_slice(bytes).ok())
    }

    /// Total writes since creation, including overwrites
    pub fn write_count(&self) -> usize {
        self.writes.lock().map(|n| *n).unwrap_or(0)
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn write(&self, participant: Uuid, document: Vec<u8>) -> Result<()> {
        let mut documents = self
            .documents
            .lock()
            .map_err(|_| Error::Internal("snapshot store lock poisoned".to_string()))?;
        documents.insert(participant, document);
        drop(documents);

        let mut writes = self
            .writes
            .lock()
            .map_err(|_| Error::Internal("snapshot store lock poisoned".to_string()))?;
        *writes += 1;
        Ok(())
    }
}
