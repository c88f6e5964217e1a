//! Reassembly of response bodies posted in numbered chunks by the iOS
//! upload script.
//!
//! Buffers are keyed by upload id. A buffer is assembled and removed once
//! every index up to `total` has arrived; incomplete buffers expire after
//! [`CHUNK_TTL_SECS`](haruki_shared::constants::CHUNK_TTL_SECS).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use reqwest::Url;
use tokio::sync::Mutex;
use tracing::{debug, info};

use haruki_shared::constants::CHUNK_TTL_SECS;
use haruki_shared::{Server, UploadDataType};

use crate::config::SekaiClientConfig;
use crate::error::ServerError;
use crate::patterns;

// ---------------------------------------------------------------------------
// Buffer
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ChunkBuffer {
    total: usize,
    /// Keyed by chunk index; a resent chunk replaces the earlier copy.
    chunks: BTreeMap<usize, Bytes>,
    created_at: Instant,
}

impl ChunkBuffer {
    fn new(total: usize) -> Self {
        Self {
            total,
            chunks: BTreeMap::new(),
            created_at: Instant::now(),
        }
    }

    fn is_stale(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() >= ttl
    }

    fn is_complete(&self) -> bool {
        self.chunks.len() == self.total
    }

    fn assemble(self) -> Bytes {
        let size = self.chunks.values().map(Bytes::len).sum();
        let mut out = BytesMut::with_capacity(size);
        for chunk in self.chunks.into_values() {
            out.extend_from_slice(&chunk);
        }
        out.freeze()
    }
}

// ---------------------------------------------------------------------------
// Assembler
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ChunkAssembler {
    buffers: Arc<Mutex<HashMap<String, ChunkBuffer>>>,
    ttl: Duration,
}

impl ChunkAssembler {
    pub fn new(ttl: Duration) -> Self {
        Self {
            buffers: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Stores one chunk. Returns the whole body when this chunk completed it;
    /// the buffer is removed before returning.
    pub async fn push(
        &self,
        upload_id: &str,
        index: usize,
        total: usize,
        data: Bytes,
    ) -> Result<Option<Bytes>, ServerError> {
        if upload_id.is_empty() {
            return Err(ServerError::BadRequest("missing upload id".into()));
        }
        if total == 0 || index >= total {
            return Err(ServerError::BadRequest(format!(
                "chunk index {index} out of range for {total} chunks"
            )));
        }

        let mut buffers = self.buffers.lock().await;
        if buffers
            .get(upload_id)
            .is_some_and(|b| b.is_stale(self.ttl) || b.total != total)
        {
            debug!(%upload_id, "Discarding stale chunk buffer");
            buffers.remove(upload_id);
        }

        let buffer = buffers
            .entry(upload_id.to_string())
            .or_insert_with(|| ChunkBuffer::new(total));
        buffer.chunks.insert(index, data);
        debug!(%upload_id, index, total, received = buffer.chunks.len(), "Chunk stored");

        if !buffer.is_complete() {
            return Ok(None);
        }
        match buffers.remove(upload_id) {
            Some(buffer) => {
                let body = buffer.assemble();
                info!(%upload_id, size = body.len(), "Chunked upload assembled");
                Ok(Some(body))
            }
            None => Ok(None),
        }
    }

    /// Whether an unexpired buffer exists for `upload_id`.
    #[cfg(test)]
    pub async fn contains(&self, upload_id: &str) -> bool {
        let buffers = self.buffers.lock().await;
        buffers
            .get(upload_id)
            .is_some_and(|b| !b.is_stale(self.ttl))
    }

    /// Drops buffers older than the TTL.
    pub async fn sweep(&self) {
        let mut buffers = self.buffers.lock().await;
        let before = buffers.len();
        buffers.retain(|_, b| !b.is_stale(self.ttl));
        let dropped = before - buffers.len();
        if dropped > 0 {
            info!(dropped, remaining = buffers.len(), "Expired incomplete chunk uploads");
        }
    }
}

impl Default for ChunkAssembler {
    fn default() -> Self {
        Self::new(Duration::from_secs(CHUNK_TTL_SECS))
    }
}

// ---------------------------------------------------------------------------
// Origin
// ---------------------------------------------------------------------------

/// What an intercepted game API call carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOrigin {
    pub server: Server,
    pub data_type: UploadDataType,
    pub user_id: i64,
}

/// Classifies a game API path relative to `/api`.
pub fn classify_api_path(path: &str) -> Option<(UploadDataType, i64)> {
    let path = path.split('?').next().unwrap_or_default();
    let shapes = [
        (patterns::suite_path(), UploadDataType::Suite),
        (patterns::mysekai_path(), UploadDataType::Mysekai),
        (patterns::birthday_party_path(), UploadDataType::MysekaiBirthdayParty),
    ];
    shapes.into_iter().find_map(|(re, data_type)| {
        let caps = re?.captures(path)?;
        let user_id = caps.get(1)?.as_str().parse().ok()?;
        Some((data_type, user_id))
    })
}

/// Server owning `host`, primary or secondary.
pub fn server_for_host(host: &str, hosts: &SekaiClientConfig) -> Option<Server> {
    Server::ALL
        .into_iter()
        .find(|s| hosts.api_hosts(*s).iter().any(|h| h.eq_ignore_ascii_case(host)))
}

/// Derives server, data type and user from the `X-Original-Url` the script
/// reports. The data type is resolved before the server.
pub fn resolve_origin(original_url: &str, hosts: &SekaiClientConfig) -> Result<UploadOrigin, ServerError> {
    let unknown_type = || ServerError::BadRequest("Unknown upload type".into());
    let url = Url::parse(original_url).map_err(|_| unknown_type())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(unknown_type());
    }
    let (data_type, user_id) = url
        .path()
        .strip_prefix("/api/")
        .and_then(classify_api_path)
        .ok_or_else(unknown_type)?;
    let host = url.host_str().ok_or_else(unknown_type)?;
    let server = server_for_host(host, hosts)
        .ok_or_else(|| ServerError::BadRequest("Unknown game server".into()))?;
    Ok(UploadOrigin {
        server,
        data_type,
        user_id,
    })
}
