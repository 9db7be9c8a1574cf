// =============================================================================
// Point-in-time snapshot store — cold tier, immutable write-once records
// =============================================================================
//
// Cold-tier reads never hit a venue; they replay gzip-compressed JSON
// payloads written once at fetch time. Writes use the same atomic
// tmp-then-rename pattern as config persistence, plus a sha256 digest
// recorded in a sidecar `.meta.json` so a corrupted snapshot is detectable
// rather than silently replayed.
// =============================================================================

use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::types::{PitSnapshotMeta, Symbol};

pub struct PitStore {
    root: PathBuf,
}

impl PitStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn snapshot_dir(&self, symbol: &Symbol, ts_ms: i64) -> PathBuf {
        let date = chrono::DateTime::from_timestamp_millis(ts_ms)
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "unknown-date".to_string());
        self.root.join(symbol.as_str()).join(date)
    }

    /// Write a snapshot for `symbol` at `ts_ms`, gzip-compressed, with an
    /// accompanying sha256 meta sidecar. Atomic: writes to `.tmp` paths
    /// first, then renames both files into place.
    pub fn write<T: Serialize>(
        &self,
        symbol: &Symbol,
        ts_ms: i64,
        record_count: usize,
        payload: &T,
    ) -> Result<PitSnapshotMeta> {
        let dir = self.snapshot_dir(symbol, ts_ms);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create PIT dir {}", dir.display()))?;

        let json = serde_json::to_vec(payload).context("failed to serialize PIT payload")?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json).context("failed to gzip PIT payload")?;
        let compressed = encoder.finish().context("failed to finalize gzip stream")?;

        let mut hasher = Sha256::new();
        hasher.update(&compressed);
        let sha256 = hex::encode(hasher.finalize());

        let payload_path = dir.join(format!("{ts_ms}.payload.gz"));
        let meta_path = dir.join(format!("{ts_ms}.meta.json"));

        let payload_tmp = payload_path.with_extension("gz.tmp");
        std::fs::write(&payload_tmp, &compressed)
            .with_context(|| format!("failed to write tmp PIT payload {}", payload_tmp.display()))?;
        std::fs::rename(&payload_tmp, &payload_path)
            .with_context(|| format!("failed to rename PIT payload into {}", payload_path.display()))?;

        let meta = PitSnapshotMeta {
            symbol: symbol.clone(),
            ts_ms,
            sha256,
            record_count,
            written_at_ms: chrono::Utc::now().timestamp_millis(),
        };
        let meta_json = serde_json::to_string_pretty(&meta).context("failed to serialize PIT meta")?;
        let meta_tmp = meta_path.with_extension("json.tmp");
        std::fs::write(&meta_tmp, &meta_json)
            .with_context(|| format!("failed to write tmp PIT meta {}", meta_tmp.display()))?;
        std::fs::rename(&meta_tmp, &meta_path)
            .with_context(|| format!("failed to rename PIT meta into {}", meta_path.display()))?;

        info!(symbol = %symbol, ts_ms, path = %payload_path.display(), "PIT snapshot written");
        Ok(meta)
    }

    /// Read and verify a previously written snapshot.
    pub fn read<T: DeserializeOwned>(&self, symbol: &Symbol, ts_ms: i64) -> Result<T> {
        let dir = self.snapshot_dir(symbol, ts_ms);
        let payload_path = dir.join(format!("{ts_ms}.payload.gz"));
        let meta_path = dir.join(format!("{ts_ms}.meta.json"));

        let compressed = std::fs::read(&payload_path)
            .with_context(|| format!("failed to read PIT payload {}", payload_path.display()))?;

        let meta_json = std::fs::read_to_string(&meta_path)
            .with_context(|| format!("failed to read PIT meta {}", meta_path.display()))?;
        let meta: PitSnapshotMeta =
            serde_json::from_str(&meta_json).context("failed to parse PIT meta")?;

        let mut hasher = Sha256::new();
        hasher.update(&compressed);
        let actual_sha = hex::encode(hasher.finalize());
        anyhow::ensure!(
            actual_sha == meta.sha256,
            "PIT snapshot checksum mismatch for {symbol} at {ts_ms}: expected {}, got {actual_sha}",
            meta.sha256
        );

        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut json = Vec::new();
        decoder.read_to_end(&mut json).context("failed to decompress PIT payload")?;

        serde_json::from_slice(&json).context("failed to deserialize PIT payload")
    }

    pub fn exists(&self, symbol: &Symbol, ts_ms: i64) -> bool {
        self.snapshot_dir(symbol, ts_ms)
            .join(format!("{ts_ms}.payload.gz"))
            .is_file()
    }
}
