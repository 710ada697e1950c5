//! File transfer with integrity verification and atomic replacement.
//!
//! Downloads stream into a temporary file in 8 KiB chunks while a
//! running digest and the rate tracker are updated; only a matching
//! digest promotes the temporary file over the destination with an
//! atomic rename. A mismatch leaves the temporary file in place and
//! raises a client-blamed error carrying both hash values.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use kestrel_common::hash::{HashAlgorithm, Hasher};
use kestrel_common::ids::AssetId;

use crate::error::ClientError;
use crate::stats::{RateTracker, StatisticsBroadcaster, StatisticsConsumer};
use crate::transport::Transport;

/// Fixed transfer chunk size.
pub const TRANSFER_CHUNK_SIZE: usize = 8192;

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub asset_id: AssetId,
    pub destination: PathBuf,
    pub temporary: PathBuf,
    pub expected_size: u64,
    pub hash_algorithm: String,
    pub hash_value: String,
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub asset_id: AssetId,
    pub source: PathBuf,
    pub media_type: String,
    pub description: String,
}

/// Download an asset's content to `request.destination`.
pub async fn download(
    transport: &Transport,
    request: &DownloadRequest,
    consumer: StatisticsConsumer,
    timeout: Duration,
) -> Result<(), ClientError> {
    let algorithm = HashAlgorithm::from_name(&request.hash_algorithm)
        .map_err(|e| ClientError::UnsupportedAlgorithm(e.0))?;

    let (head, mut body) = transport.file_get_stream(&request.asset_id, timeout).await?;
    if head.content_length != request.expected_size {
        tracing::warn!(
            declared = head.content_length,
            expected = request.expected_size,
            "server declared a different content length than expected"
        );
    }

    let tracker = Arc::new(RateTracker::new(request.expected_size));
    let broadcaster = StatisticsBroadcaster::start(tracker.clone(), consumer);

    let mut hasher = Hasher::new(algorithm);
    let mut file = tokio::fs::File::create(&request.temporary).await?;
    let mut chunk = [0u8; TRANSFER_CHUNK_SIZE];
    loop {
        let n = body.read_chunk(&mut chunk).await?;
        if n == 0 {
            break;
        }
        file.write_all(&chunk[..n]).await?;
        hasher.update(&chunk[..n]);
        tracker.add(n as u64);
    }
    file.sync_all().await?;
    drop(file);

    let received = hasher.finish_hex();
    if received != request.hash_value {
        // The temporary file is left in place; the destination is never
        // touched.
        broadcaster.stop();
        return Err(ClientError::HashMismatch {
            algorithm: algorithm.name().to_string(),
            expected: request.hash_value.clone(),
            received,
        });
    }

    tracker.completed();
    broadcaster.stop();

    // Atomic replace: no partial file is ever visible at the
    // destination path.
    tokio::fs::rename(&request.temporary, &request.destination).await?;
    Ok(())
}

/// Upload a local file as the asset's content. The digest is computed
/// in a first pass so it can be declared ahead of the body; the second
/// pass streams the content with rate tracking.
pub async fn upload(
    transport: &Transport,
    request: &UploadRequest,
    consumer: StatisticsConsumer,
    timeout: Duration,
) -> Result<(), ClientError> {
    let size = tokio::fs::metadata(&request.source).await?.len();

    let mut hasher = Hasher::new(HashAlgorithm::Sha256);
    let mut file = tokio::fs::File::open(&request.source).await?;
    let mut chunk = [0u8; TRANSFER_CHUNK_SIZE];
    loop {
        let n = file.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
    }
    let hash_value = hasher.finish_hex();

    let tracker = Arc::new(RateTracker::new(size));
    let broadcaster = StatisticsBroadcaster::start(tracker.clone(), consumer);

    let mut stream = transport
        .begin_file_put(
            &request.asset_id,
            &request.media_type,
            &request.description,
            HashAlgorithm::Sha256.name(),
            &hash_value,
            size,
            timeout,
        )
        .await?;

    let mut file = tokio::fs::File::open(&request.source).await?;
    loop {
        let n = file.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        stream.write_all(&chunk[..n]).await?;
        tracker.add(n as u64);
    }

    tracker.completed();
    broadcaster.stop();
    transport.finish_file_put(stream, timeout).await
}
