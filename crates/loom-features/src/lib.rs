// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Feature retrieval Rust SDK for Loom.
//!
//! [`FeatureCoordinator`] keeps an application's feature set current by
//! reconciling three sources:
//!
//! - **Cache**: the last known snapshot, reported first on every call
//! - **Fetch**: a one-shot request for the current payload
//! - **Stream**: a live subscription pushing payload updates
//!
//! Remote payloads may carry plain features or an encrypted blob. Usable
//! features are persisted back to the cache and every outcome reaches the
//! application through an [`Observer`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use loom_features::{CoordinatorConfig, FeatureCoordinator, FileCacheStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CoordinatorConfig::builder()
//!         .encryption_key(std::env::var("FEATURES_KEY")?)
//!         .background_sync(true)
//!         .stream_header("Authorization", "Bearer loom_sdk_xxx")
//!         .build();
//!
//!     let coordinator = FeatureCoordinator::builder()
//!         .config(config)
//!         .cache_store(Arc::new(FileCacheStore::from_xdg()?))
//!         .observer(MyObserver::default())
//!         .build()?;
//!
//!     if let Some(fetch) = coordinator
//!         .fetch_features(
//!             Some("https://loom.example.com/api/features"),
//!             Some("https://loom.example.com/api/features/stream"),
//!         )
//!         .await
//!     {
//!         fetch.await?;
//!     }
//!
//!     Ok(())
//! }
//! ```

mod cache;
mod config;
mod coordinator;
mod crypto;
mod error;
mod fetch;
mod observer;
mod sse;
mod stream;

pub use cache::{CacheStore, FileCacheStore, MemoryCacheStore, FEATURES_CACHE_KEY};
pub use config::{
	CoordinatorConfig, CoordinatorConfigBuilder, DecryptFailurePolicy, EncryptionKey,
	ENV_BACKGROUND_SYNC, ENV_ENCRYPTION_KEY, ENV_REPORT_DECRYPT_FAILURES,
};
pub use coordinator::{FeatureCoordinator, FeatureCoordinatorBuilder, STREAM_EVENT_BUFFER};
pub use crypto::{AesGcmCrypto, CryptoService, NONCE_SIZE};
pub use error::{
	CacheError, ConfigError, CryptoError, FeaturesError, MergeError, Result, TransportError,
};
pub use fetch::{FetchTransport, HttpFetchConfig, HttpFetchTransport};
pub use observer::{NoOpObserver, Observer, SharedObserver};
pub use sse::{SseConfig, SseStreamFactory, SseStreamTransport};
pub use stream::{StreamFactory, StreamHandler, StreamState, StreamTransport};

// Re-export core types for convenience
pub use loom_features_core::{
	codec, CodecError, ErrorKind, Feature, FeatureSet, PayloadContent, StreamEvent, WirePayload,
	FEATURES_EVENT,
};
