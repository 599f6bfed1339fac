// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Byte-level persistence for the feature snapshot.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::CacheError;

/// Key under which the coordinator stores the feature snapshot.
pub const FEATURES_CACHE_KEY: &str = "loom.features.snapshot";

#[async_trait]
pub trait CacheStore: Send + Sync {
	/// Returns the stored blob, or `None` if nothing is stored under `key`.
	async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

	/// Replaces the blob stored under `key`.
	async fn put(&self, key: &str, content: &[u8]) -> Result<(), CacheError>;
}

/// In-process cache store. Contents do not survive a restart.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
	entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryCacheStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
	async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
		Ok(self.entries.read().await.get(key).cloned())
	}

	async fn put(&self, key: &str, content: &[u8]) -> Result<(), CacheError> {
		self.entries
			.write()
			.await
			.insert(key.to_string(), content.to_vec());
		Ok(())
	}
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Cache store keeping one file per key in a directory.
///
/// Writes go to a temporary file that is renamed over the target, so readers
/// never observe a partially written blob.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
	cache_dir: PathBuf,
}

impl FileCacheStore {
	pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
		Self {
			cache_dir: cache_dir.into(),
		}
	}

	/// Uses `$XDG_CACHE_HOME/loom/features` (or the platform equivalent).
	pub fn from_xdg() -> Result<Self, CacheError> {
		let cache_dir = dirs::cache_dir()
			.ok_or(CacheError::NoCacheDir)?
			.join("loom")
			.join("features");

		std::fs::create_dir_all(&cache_dir)?;

		info!(cache_dir = %cache_dir.display(), "initialized feature cache store");

		Ok(Self::new(cache_dir))
	}

	pub fn cache_dir(&self) -> &Path {
		&self.cache_dir
	}

	fn entry_path(&self, key: &str) -> PathBuf {
		self.cache_dir.join(format!("{}.cache", file_stem(key)))
	}
}

/// Maps a cache key to a safe file name.
fn file_stem(key: &str) -> String {
	key.chars()
		.map(|c| match c {
			'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
			_ => '_',
		})
		.collect()
}

#[async_trait]
impl CacheStore for FileCacheStore {
	async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
		let path = self.entry_path(key);

		match tokio::fs::read(&path).await {
			Ok(content) => {
				debug!(key, path = %path.display(), bytes = content.len(), "read cache entry");
				Ok(Some(content))
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				debug!(key, path = %path.display(), "cache entry not found");
				Ok(None)
			}
			Err(e) => Err(e.into()),
		}
	}

	async fn put(&self, key: &str, content: &[u8]) -> Result<(), CacheError> {
		tokio::fs::create_dir_all(&self.cache_dir).await?;

		let path = self.entry_path(key);
		let tmp_path = self.cache_dir.join(format!(
			"{}.{}.{}.tmp",
			file_stem(key),
			std::process::id(),
			TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
		));

		tokio::fs::write(&tmp_path, content).await?;
		if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
			let _ = tokio::fs::remove_file(&tmp_path).await;
			return Err(e.into());
		}

		debug!(key, path = %path.display(), bytes = content.len(), "wrote cache entry");

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[tokio::test]
	async fn memory_store_roundtrip() {
		let store = MemoryCacheStore::new();
		assert_eq!(store.get(FEATURES_CACHE_KEY).await.unwrap(), None);

		store.put(FEATURES_CACHE_KEY, b"{\"a\":1}").await.unwrap();
		assert_eq!(
			store.get(FEATURES_CACHE_KEY).await.unwrap(),
			Some(b"{\"a\":1}".to_vec())
		);

		store.put(FEATURES_CACHE_KEY, b"{\"b\":2}").await.unwrap();
		assert_eq!(
			store.get(FEATURES_CACHE_KEY).await.unwrap(),
			Some(b"{\"b\":2}".to_vec())
		);
	}

	#[tokio::test]
	async fn file_store_roundtrip() {
		let tmp = TempDir::new().unwrap();
		let store = FileCacheStore::new(tmp.path());

		assert_eq!(store.get(FEATURES_CACHE_KEY).await.unwrap(), None);

		store.put(FEATURES_CACHE_KEY, b"snapshot").await.unwrap();
		assert_eq!(
			store.get(FEATURES_CACHE_KEY).await.unwrap(),
			Some(b"snapshot".to_vec())
		);
	}

	#[tokio::test]
	async fn file_store_leaves_no_tmp_files() {
		let tmp = TempDir::new().unwrap();
		let store = FileCacheStore::new(tmp.path().join("nested"));

		store.put("k", b"one").await.unwrap();
		store.put("k", b"two").await.unwrap();

		let names: Vec<String> = std::fs::read_dir(store.cache_dir())
			.unwrap()
			.map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
			.collect();
		assert_eq!(names, vec!["k.cache".to_string()]);
		assert_eq!(store.get("k").await.unwrap(), Some(b"two".to_vec()));
	}

	#[test]
	fn file_stem_replaces_path_separators() {
		assert_eq!(file_stem("loom.features.snapshot"), "loom.features.snapshot");
		assert_eq!(file_stem("../etc/passwd"), ".._etc_passwd");
		assert_eq!(file_stem("a b:c"), "a_b_c");
	}
}
