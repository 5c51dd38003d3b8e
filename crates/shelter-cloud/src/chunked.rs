//! Sequential range-bounded upload into a provider-issued session URL.
//!
//! The file is sent as contiguous chunks of a fixed size covering
//! `[0, size)`, each a `PUT` with `Content-Range: bytes <start>-<end>/<size>`.
//! What counts as an accepted response differs per provider and per position
//! (intermediate or final chunk), so callers pass an acceptance predicate.
//! The first rejected chunk aborts the upload.

use reqwest::{Client, StatusCode};
use shelter_core::{BackupError, BackupResult};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::http::error_body;

/// Chunk size together with the provider's alignment unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    chunk_size: u64,
    alignment: u64,
}

impl ChunkPlan {
    /// `chunk_size` must be a non-zero multiple of `alignment`.
    pub fn new(chunk_size: u64, alignment: u64) -> BackupResult<Self> {
        if alignment == 0 || chunk_size == 0 || chunk_size % alignment != 0 {
            return Err(BackupError::Config(format!(
                "Chunk size {} is not a non-zero multiple of {}",
                chunk_size, alignment
            )));
        }
        Ok(Self {
            chunk_size,
            alignment,
        })
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    /// Inclusive byte ranges tiling `[0, total)`
    pub fn ranges(&self, total: u64) -> Vec<(u64, u64)> {
        (0..total)
            .step_by(self.chunk_size as usize)
            .map(|start| (start, (start + self.chunk_size).min(total) - 1))
            .collect()
    }
}

/// Result of a completed chunked transfer
#[derive(Debug, Clone)]
pub struct ChunkedOutcome {
    pub bytes: u64,
    pub chunks: usize,
    /// Parsed body of the final response, if it was JSON
    pub final_body: Option<serde_json::Value>,
}

/// Chunk loop bound to one provider's client and plan
pub struct ChunkedUpload<'a> {
    client: &'a Client,
    provider: &'static str,
    plan: ChunkPlan,
}

impl<'a> ChunkedUpload<'a> {
    pub fn new(client: &'a Client, provider: &'static str, plan: ChunkPlan) -> Self {
        Self {
            client,
            provider,
            plan,
        }
    }

    /// Upload `path` to `session_url`.
    ///
    /// `accept(status, is_final)` decides whether a chunk response lets the
    /// transfer continue. Empty files are rejected: a session cannot be
    /// completed without at least one byte.
    pub async fn send<F>(
        &self,
        session_url: &str,
        path: &Path,
        accept: F,
    ) -> BackupResult<ChunkedOutcome>
    where
        F: Fn(StatusCode, bool) -> bool,
    {
        let mut file = File::open(path).await.map_err(|e| {
            let message = format!("Cannot open {}: {}", path.display(), e);
            BackupError::cloud_transfer(self.provider, 0, message)
        })?;
        let total = file
            .metadata()
            .await
            .map_err(|e| BackupError::cloud_transfer(self.provider, 0, e.to_string()))?
            .len();
        if total == 0 {
            return Err(BackupError::cloud_transfer(
                self.provider,
                0,
                "Refusing to upload an empty file",
            ));
        }

        let ranges = self.plan.ranges(total);
        let last_index = ranges.len() - 1;
        let mut final_body = None;

        for (index, (start, end)) in ranges.iter().copied().enumerate() {
            let mut buffer = vec![0u8; (end - start + 1) as usize];
            file.read_exact(&mut buffer).await.map_err(|e| {
                BackupError::cloud_transfer(self.provider, start, format!("Read failed: {}", e))
            })?;

            let range = format!("bytes {}-{}/{}", start, end, total);
            let response = self
                .client
                .put(session_url)
                .header("Content-Range", range)
                .body(buffer)
                .send()
                .await
                .map_err(|e| {
                    let message = format!("Chunk request failed: {}", e);
                    BackupError::cloud_transfer(self.provider, start, message)
                })?;

            let status = response.status();
            let is_final = index == last_index;
            if !accept(status, is_final) {
                let body = error_body(response).await;
                return Err(BackupError::cloud_transfer(
                    self.provider,
                    start,
                    format!("Chunk {}-{} rejected with {}: {}", start, end, status, body),
                ));
            }

            tracing::debug!(
                provider = self.provider,
                start,
                end,
                total,
                status = status.as_u16(),
                "Chunk accepted"
            );

            if is_final {
                final_body = response.json::<serde_json::Value>().await.ok();
            }
        }

        Ok(ChunkedOutcome {
            bytes: total,
            chunks: ranges.len(),
            final_body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accept_202_then_201(status: StatusCode, is_final: bool) -> bool {
        if is_final {
            status == StatusCode::OK || status == StatusCode::CREATED
        } else {
            status == StatusCode::ACCEPTED
        }
    }

    #[test]
    fn test_plan_validation_and_ranges() {
        assert!(ChunkPlan::new(3_276_800, 327_680).is_ok());
        assert!(ChunkPlan::new(10_485_760, 262_144).is_ok());
        assert!(ChunkPlan::new(1_000_000, 327_680).is_err());
        assert!(ChunkPlan::new(0, 1).is_err());

        let plan = ChunkPlan::new(4, 2).unwrap();
        assert_eq!(plan.ranges(10), vec![(0, 3), (4, 7), (8, 9)]);
        assert_eq!(plan.ranges(8), vec![(0, 3), (4, 7)]);
        assert_eq!(plan.ranges(1), vec![(0, 0)]);
        assert!(plan.ranges(0).is_empty());
    }

    #[tokio::test]
    async fn test_tiles_file_with_ceil_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.zip");
        std::fs::write(&path, b"0123456789").unwrap();

        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("PUT", "/session")
            .match_header("content-range", "bytes 0-3/10")
            .match_body("0123")
            .with_status(202)
            .create_async()
            .await;
        let second = server
            .mock("PUT", "/session")
            .match_header("content-range", "bytes 4-7/10")
            .match_body("4567")
            .with_status(202)
            .create_async()
            .await;
        let last = server
            .mock("PUT", "/session")
            .match_header("content-range", "bytes 8-9/10")
            .match_body("89")
            .with_status(201)
            .with_body(r#"{"id":"file-1"}"#)
            .create_async()
            .await;

        let client = Client::new();
        let upload = ChunkedUpload::new(&client, "onedrive", ChunkPlan::new(4, 2).unwrap());
        let session_url = format!("{}/session", server.url());
        let outcome = upload
            .send(&session_url, &path, accept_202_then_201)
            .await
            .unwrap();

        first.assert_async().await;
        second.assert_async().await;
        last.assert_async().await;
        assert_eq!(outcome.bytes, 10);
        assert_eq!(outcome.chunks, 3);
        assert_eq!(outcome.final_body.unwrap()["id"], "file-1");
    }

    #[tokio::test]
    async fn test_rejected_chunk_aborts_with_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.zip");
        std::fs::write(&path, b"0123456789").unwrap();

        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/session")
            .match_header("content-range", "bytes 0-3/10")
            .with_status(202)
            .create_async()
            .await;
        server
            .mock("PUT", "/session")
            .match_header("content-range", "bytes 4-7/10")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;
        let never = server
            .mock("PUT", "/session")
            .match_header("content-range", "bytes 8-9/10")
            .with_status(201)
            .expect(0)
            .create_async()
            .await;

        let client = Client::new();
        let upload = ChunkedUpload::new(&client, "onedrive", ChunkPlan::new(4, 2).unwrap());
        let session_url = format!("{}/session", server.url());
        let err = upload
            .send(&session_url, &path, accept_202_then_201)
            .await
            .unwrap_err();

        never.assert_async().await;
        match err {
            BackupError::CloudTransfer { offset, message, .. } => {
                assert_eq!(offset, 4);
                assert!(message.contains("500"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.zip");
        std::fs::write(&path, b"").unwrap();

        let client = Client::new();
        let upload = ChunkedUpload::new(&client, "gdrive", ChunkPlan::new(4, 2).unwrap());
        let err = upload
            .send("http://127.0.0.1:9/unused", &path, |_, _| true)
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::CloudTransfer { offset: 0, .. }));
    }
}
