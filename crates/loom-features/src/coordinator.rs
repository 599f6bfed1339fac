// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Reconciles the cached snapshot, the one-shot fetch and the live stream.
//!
//! # Merge rules
//!
//! Every remote payload, whether it came from the fetch or from a stream
//! event, goes through [`FeatureCoordinator::merge_and_cache`]:
//!
//! | Payload | Outcome |
//! |---------|---------|
//! | non-empty `features` | persisted, reported as fetched |
//! | `encryptedFeatures` and a usable key | decrypted, persisted, reported as fetched |
//! | `encryptedFeatures` and a usable key, decryption fails | [`DecryptFailurePolicy`] decides |
//! | `encryptedFeatures` and no usable key | `MissingEncryptionKey` |
//! | nothing usable, or undecodable | `ParseFailure` |
//!
//! The cache is written only with a non-empty feature set, and writes are
//! serialized so concurrent payloads never interleave.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use loom_features_core::{
	codec, ErrorKind, FeatureSet, PayloadContent, StreamEvent, WirePayload, FEATURES_EVENT,
};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{CacheStore, MemoryCacheStore, FEATURES_CACHE_KEY};
use crate::config::{CoordinatorConfig, DecryptFailurePolicy};
use crate::crypto::{AesGcmCrypto, CryptoService};
use crate::error::{FeaturesError, MergeError, Result};
use crate::fetch::{FetchTransport, HttpFetchConfig, HttpFetchTransport};
use crate::observer::{NoOpObserver, Observer, SharedObserver};
use crate::sse::{SseConfig, SseStreamFactory};
use crate::stream::{StreamFactory, StreamHandler, StreamState, StreamTransport};

/// Stream events buffered per subscription while a merge is in progress.
///
/// Events arriving while the buffer is full are dropped with a warning.
pub const STREAM_EVENT_BUFFER: usize = 64;

/// Builder for constructing a [`FeatureCoordinator`].
///
/// Every collaborator has a default: an in-memory cache, HTTP fetch, SSE
/// stream, AES-GCM decryption and an observer that discards everything.
/// The default fetch and stream send [`CoordinatorConfig::fetch_headers`] and
/// [`CoordinatorConfig::stream_headers`] respectively.
pub struct FeatureCoordinatorBuilder {
	config: CoordinatorConfig,
	cache: Option<Arc<dyn CacheStore>>,
	fetcher: Option<Arc<dyn FetchTransport>>,
	streams: Option<Arc<dyn StreamFactory>>,
	crypto: Option<Arc<dyn CryptoService>>,
	observer: Option<SharedObserver>,
	runtime: Option<Handle>,
}

impl FeatureCoordinatorBuilder {
	pub fn new() -> Self {
		Self {
			config: CoordinatorConfig::default(),
			cache: None,
			fetcher: None,
			streams: None,
			crypto: None,
			observer: None,
			runtime: None,
		}
	}

	pub fn config(mut self, config: CoordinatorConfig) -> Self {
		self.config = config;
		self
	}

	pub fn cache_store(mut self, cache: Arc<dyn CacheStore>) -> Self {
		self.cache = Some(cache);
		self
	}

	pub fn fetch_transport(mut self, fetcher: Arc<dyn FetchTransport>) -> Self {
		self.fetcher = Some(fetcher);
		self
	}

	pub fn stream_factory(mut self, streams: Arc<dyn StreamFactory>) -> Self {
		self.streams = Some(streams);
		self
	}

	pub fn crypto(mut self, crypto: Arc<dyn CryptoService>) -> Self {
		self.crypto = Some(crypto);
		self
	}

	pub fn observer(mut self, observer: impl Observer) -> Self {
		self.observer = Some(Arc::new(observer));
		self
	}

	pub fn shared_observer(mut self, observer: SharedObserver) -> Self {
		self.observer = Some(observer);
		self
	}

	/// Runtime used for the fetch task and the stream worker.
	///
	/// Defaults to the runtime `build` is called from.
	pub fn runtime(mut self, runtime: Handle) -> Self {
		self.runtime = Some(runtime);
		self
	}

	pub fn build(self) -> Result<FeatureCoordinator> {
		let runtime = match self.runtime {
			Some(runtime) => runtime,
			None => Handle::try_current().map_err(|_| FeaturesError::NoRuntime)?,
		};

		let fetcher = match self.fetcher {
			Some(fetcher) => fetcher,
			None => Arc::new(HttpFetchTransport::new(HttpFetchConfig {
				headers: self.config.fetch_headers.clone(),
				..HttpFetchConfig::default()
			})?),
		};

		let streams = match self.streams {
			Some(streams) => streams,
			None => Arc::new(SseStreamFactory::with_runtime(
				SseConfig::default(),
				runtime.clone(),
			)),
		};

		let inner = Arc::new(CoordinatorInner {
			config: self.config,
			cache: self.cache.unwrap_or_else(|| Arc::new(MemoryCacheStore::new())),
			fetcher,
			streams,
			crypto: self.crypto.unwrap_or_else(|| Arc::new(AesGcmCrypto::new())),
			observer: self.observer.unwrap_or_else(|| Arc::new(NoOpObserver)),
			runtime,
			cache_write: tokio::sync::Mutex::new(()),
			stream: Mutex::new(None),
		});

		debug!(
			background_sync = inner.config.background_sync,
			has_encryption_key = inner.config.usable_encryption_key().is_some(),
			"feature coordinator initialized"
		);

		Ok(FeatureCoordinator { inner })
	}
}

impl Default for FeatureCoordinatorBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// The stream subscription currently owned by the coordinator.
struct ActiveStream {
	url: Url,
	transport: Arc<dyn StreamTransport>,
	worker: JoinHandle<()>,
}

struct CoordinatorInner {
	config: CoordinatorConfig,
	cache: Arc<dyn CacheStore>,
	fetcher: Arc<dyn FetchTransport>,
	streams: Arc<dyn StreamFactory>,
	crypto: Arc<dyn CryptoService>,
	observer: SharedObserver,
	runtime: Handle,
	/// Held across every cache write.
	cache_write: tokio::sync::Mutex<()>,
	stream: Mutex<Option<ActiveStream>>,
}

/// Feature retrieval coordinator.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use loom_features::{CoordinatorConfig, FeatureCoordinator, FileCacheStore};
///
/// let coordinator = FeatureCoordinator::builder()
///     .config(CoordinatorConfig::from_env()?)
///     .cache_store(Arc::new(FileCacheStore::from_xdg()?))
///     .observer(MyObserver::new())
///     .build()?;
///
/// // Reports the cached snapshot before returning, then fetches and
/// // subscribes in the background.
/// coordinator
///     .fetch_features(
///         Some("https://loom.example.com/api/features"),
///         Some("https://loom.example.com/api/features/stream"),
///     )
///     .await;
/// ```
pub struct FeatureCoordinator {
	inner: Arc<CoordinatorInner>,
}

impl FeatureCoordinator {
	pub fn builder() -> FeatureCoordinatorBuilder {
		FeatureCoordinatorBuilder::new()
	}

	pub fn config(&self) -> &CoordinatorConfig {
		&self.inner.config
	}

	/// Loads the cached snapshot, refreshes from `api_url` and syncs the
	/// stream at `stream_url`.
	///
	/// The cache notification is delivered before this returns. The fetch and
	/// stream run in the background; the returned handle resolves once the
	/// fetch has been merged and reported. Dropping it does not cancel the
	/// fetch.
	pub async fn fetch_features(
		&self,
		api_url: Option<&str>,
		stream_url: Option<&str>,
	) -> Option<JoinHandle<()>> {
		self.inner.report_cached().await;

		let fetch = api_url.map(|url| {
			let inner = Arc::clone(&self.inner);
			let url = url.to_string();
			self.inner.runtime.spawn(async move {
				inner.run_fetch(url).await;
			})
		});

		if let Some(raw) = stream_url {
			match Url::parse(raw) {
				Ok(url) if self.inner.config.background_sync => self.open_stream(url),
				Ok(_) => self.inner.close_stream(),
				Err(e) => debug!(stream_url = raw, error = %e, "ignoring unparseable stream URL"),
			}
		}

		fetch
	}

	/// Decodes a payload, persists it if usable and reports the outcome.
	///
	/// This is the pipeline used by the fetch and by every stream event; it can
	/// also be fed payloads obtained elsewhere, e.g. from a push notification.
	pub async fn merge_and_cache(
		&self,
		raw: &[u8],
		is_remote: bool,
	) -> std::result::Result<FeatureSet, MergeError> {
		self.inner.merge_and_cache(raw, is_remote).await
	}

	/// Reads the cached snapshot without notifying the observer.
	pub async fn load_cached(&self) -> std::result::Result<FeatureSet, ErrorKind> {
		self.inner.load_cached().await
	}

	pub fn stream_state(&self) -> StreamState {
		self.inner
			.stream
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.as_ref()
			.map(|active| active.transport.state())
			.unwrap_or(StreamState::Disconnected)
	}

	/// Closes the live stream, if one is open.
	pub fn disconnect_stream(&self) {
		self.inner.close_stream();
	}

	fn open_stream(&self, url: Url) {
		let mut slot = self
			.inner
			.stream
			.lock()
			.unwrap_or_else(PoisonError::into_inner);

		if let Some(active) = slot.as_ref().filter(|active| active.url == url) {
			if active.transport.state() == StreamState::Connected {
				debug!(url = %url, "feature stream already connected");
			} else {
				info!(url = %url, "reconnecting feature stream");
				active.transport.connect();
			}
			return;
		}

		if let Some(previous) = slot.take() {
			info!(old_url = %previous.url, new_url = %url, "replacing feature stream");
			previous.close();
		}

		let transport = match self.inner.streams.create(&url, &self.inner.config.stream_headers) {
			Ok(transport) => transport,
			Err(e) => {
				error!(url = %url, error = %e, "failed to create feature stream");
				return;
			}
		};

		// Events are queued to one worker so they merge in delivery order.
		let (tx, rx) = mpsc::channel::<StreamEvent>(STREAM_EVENT_BUFFER);
		let handler_owner = Arc::downgrade(&self.inner);
		let handler: StreamHandler = Arc::new(move |event: StreamEvent| {
			if handler_owner.strong_count() == 0 {
				return;
			}
			if let Err(TrySendError::Full(event)) = tx.try_send(event) {
				warn!(
					event_id = ?event.id,
					capacity = STREAM_EVENT_BUFFER,
					"feature stream backlog full, dropping event"
				);
			}
		});
		transport.on(FEATURES_EVENT, handler);

		let worker = self
			.inner
			.runtime
			.spawn(run_stream_worker(Arc::downgrade(&self.inner), rx));

		transport.connect();
		info!(url = %url, "feature stream connected");

		*slot = Some(ActiveStream {
			url,
			transport,
			worker,
		});
	}
}

impl ActiveStream {
	fn close(self) {
		self.transport.disconnect();
		self.worker.abort();
	}
}

impl CoordinatorInner {
	async fn report_cached(&self) {
		match self.load_cached().await {
			Ok(features) => {
				info!(count = features.len(), "loaded features from cache");
				self.observer.on_features_fetched(features, false);
			}
			Err(kind) => self.observer.on_features_fetch_failed(kind, false),
		}
	}

	async fn load_cached(&self) -> std::result::Result<FeatureSet, ErrorKind> {
		match self.cache.get(FEATURES_CACHE_KEY).await {
			Ok(Some(blob)) => codec::decode_feature_set(&blob).map_err(|e| {
				warn!(error = %e, bytes = blob.len(), "cached features are corrupt");
				ErrorKind::ParseFailure
			}),
			Ok(None) => {
				debug!("no cached features");
				Err(ErrorKind::LoadFailure)
			}
			Err(e) => {
				warn!(error = %e, "failed to read feature cache");
				Err(ErrorKind::LoadFailure)
			}
		}
	}

	async fn run_fetch(&self, url: String) {
		match self.fetcher.fetch(&url).await {
			Ok(body) => {
				debug!(url = %url, bytes = body.len(), "feature fetch completed");
				let _ = self.merge_and_cache(&body, true).await;
			}
			Err(e) => {
				warn!(url = %url, error = %e, "feature fetch failed");
				self.observer.on_features_fetch_failed(ErrorKind::LoadFailure, true);
			}
		}
	}

	async fn handle_stream_event(&self, event: StreamEvent) {
		let Some(payload) = event.payload() else {
			debug!(event_id = ?event.id, "skipping feature stream event without data");
			return;
		};
		debug!(event_id = ?event.id, bytes = payload.len(), "processing feature stream event");
		let _ = self.merge_and_cache(payload, true).await;
	}

	async fn merge_and_cache(
		&self,
		raw: &[u8],
		is_remote: bool,
	) -> std::result::Result<FeatureSet, MergeError> {
		let outcome = self.merge(raw).await;

		match &outcome {
			Ok(features) => self.observer.on_features_fetched(features.clone(), is_remote),
			Err(MergeError::Rejected(kind)) => self.observer.on_features_fetch_failed(*kind, is_remote),
			Err(MergeError::DecryptFailed(_)) => match self.config.decrypt_failure_policy {
				DecryptFailurePolicy::Silent => {}
				DecryptFailurePolicy::Report => self
					.observer
					.on_features_fetch_failed(ErrorKind::ParseFailure, is_remote),
			},
		}

		outcome
	}

	async fn merge(&self, raw: &[u8]) -> std::result::Result<FeatureSet, MergeError> {
		let payload = codec::decode_payload(raw).unwrap_or_else(|e| {
			debug!(error = %e, bytes = raw.len(), "feature payload did not decode");
			WirePayload::default()
		});

		let features = match payload.content() {
			PayloadContent::Plain(features) => features.clone(),
			PayloadContent::Encrypted(ciphertext) => {
				let Some(key) = self.config.usable_encryption_key() else {
					warn!("received encrypted features but no encryption key is configured");
					return Err(MergeError::Rejected(ErrorKind::MissingEncryptionKey));
				};

				match self.crypto.decrypt(ciphertext, key) {
					Ok(features) => features,
					Err(e) => {
						warn!(
							error = %e,
							policy = ?self.config.decrypt_failure_policy,
							"failed to decrypt features"
						);
						return Err(MergeError::DecryptFailed(e));
					}
				}
			}
			PayloadContent::Empty => {
				debug!("feature payload carried no features");
				return Err(MergeError::Rejected(ErrorKind::ParseFailure));
			}
		};

		if features.is_empty() {
			debug!("decrypted feature set is empty");
			return Err(MergeError::Rejected(ErrorKind::ParseFailure));
		}

		self.persist(&features).await;
		Ok(features)
	}

	/// Writes the snapshot. Failures are logged; the features are still valid.
	async fn persist(&self, features: &FeatureSet) {
		let blob = match codec::encode_feature_set(features) {
			Ok(blob) => blob,
			Err(e) => {
				error!(error = %e, "failed to encode features for cache");
				return;
			}
		};

		let _guard = self.cache_write.lock().await;
		match self.cache.put(FEATURES_CACHE_KEY, &blob).await {
			Ok(()) => debug!(count = features.len(), bytes = blob.len(), "cached features"),
			Err(e) => error!(error = %e, "failed to write feature cache"),
		}
	}

	fn close_stream(&self) {
		let active = self
			.stream
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.take();

		match active {
			Some(active) => {
				info!(url = %active.url, "disconnecting feature stream");
				active.close();
			}
			None => debug!("no feature stream to disconnect"),
		}
	}
}

impl Drop for CoordinatorInner {
	fn drop(&mut self) {
		let active = self
			.stream
			.get_mut()
			.unwrap_or_else(PoisonError::into_inner)
			.take();
		if let Some(active) = active {
			debug!(url = %active.url, "coordinator dropped, closing feature stream");
			active.close();
		}
	}
}

/// Merges stream events in delivery order while the coordinator is alive.
async fn run_stream_worker(owner: Weak<CoordinatorInner>, mut rx: mpsc::Receiver<StreamEvent>) {
	while let Some(event) = rx.recv().await {
		let Some(inner) = owner.upgrade() else {
			debug!("coordinator dropped, ignoring feature stream event");
			break;
		};
		inner.handle_stream_event(event).await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::crypto::MockCryptoService;
	use crate::error::CryptoError;
	use loom_features_core::Feature;
	use std::sync::Mutex as StdMutex;

	#[derive(Default)]
	struct RecordingObserver {
		events: StdMutex<Vec<std::result::Result<(FeatureSet, bool), (ErrorKind, bool)>>>,
	}

	impl RecordingObserver {
		fn events(&self) -> Vec<std::result::Result<(FeatureSet, bool), (ErrorKind, bool)>> {
			self.events.lock().unwrap().clone()
		}
	}

	impl Observer for RecordingObserver {
		fn on_features_fetched(&self, features: FeatureSet, is_remote: bool) {
			self.events.lock().unwrap().push(Ok((features, is_remote)));
		}

		fn on_features_fetch_failed(&self, error: ErrorKind, is_remote: bool) {
			self.events.lock().unwrap().push(Err((error, is_remote)));
		}
	}

	fn coordinator(
		config: CoordinatorConfig,
		crypto: MockCryptoService,
	) -> (FeatureCoordinator, Arc<RecordingObserver>, Arc<MemoryCacheStore>) {
		let observer = Arc::new(RecordingObserver::default());
		let cache = Arc::new(MemoryCacheStore::new());
		let coordinator = FeatureCoordinator::builder()
			.config(config)
			.cache_store(cache.clone())
			.crypto(Arc::new(crypto))
			.shared_observer(observer.clone())
			.build()
			.unwrap();
		(coordinator, observer, cache)
	}

	fn set(name: &str, value: i64) -> FeatureSet {
		[Feature::new(name, value)].into_iter().collect()
	}

	#[tokio::test]
	async fn decrypts_with_configured_key() {
		let mut crypto = MockCryptoService::new();
		crypto
			.expect_decrypt()
			.withf(|ciphertext, key| ciphertext.to_string() == "ENC" && key.to_string() == "k")
			.times(1)
			.returning(|_, _| Ok(set("c", 3)));

		let config = CoordinatorConfig::builder().encryption_key("k").build();
		let (coordinator, observer, cache) = coordinator(config, crypto);

		let merged = coordinator
			.merge_and_cache(br#"{"encryptedFeatures": "ENC"}"#, true)
			.await
			.unwrap();

		assert_eq!(merged, set("c", 3));
		assert_eq!(observer.events(), vec![Ok((set("c", 3), true))]);
		assert_eq!(
			cache.get(FEATURES_CACHE_KEY).await.unwrap(),
			Some(br#"{"c":3}"#.to_vec())
		);
	}

	#[tokio::test]
	async fn plain_features_skip_decryption() {
		let mut crypto = MockCryptoService::new();
		crypto.expect_decrypt().never();

		let config = CoordinatorConfig::builder().encryption_key("k").build();
		let (coordinator, observer, _cache) = coordinator(config, crypto);

		coordinator
			.merge_and_cache(br#"{"features": {"b": 2}, "encryptedFeatures": "ENC"}"#, true)
			.await
			.unwrap();

		assert_eq!(observer.events(), vec![Ok((set("b", 2), true))]);
	}

	#[tokio::test]
	async fn missing_key_never_calls_crypto() {
		let mut crypto = MockCryptoService::new();
		crypto.expect_decrypt().never();

		let config = CoordinatorConfig::builder().encryption_key("").build();
		let (coordinator, observer, cache) = coordinator(config, crypto);

		let err = coordinator
			.merge_and_cache(br#"{"encryptedFeatures": "ENC"}"#, true)
			.await
			.unwrap_err();

		assert_eq!(err.kind(), Some(ErrorKind::MissingEncryptionKey));
		assert_eq!(
			observer.events(),
			vec![Err((ErrorKind::MissingEncryptionKey, true))]
		);
		assert_eq!(cache.get(FEATURES_CACHE_KEY).await.unwrap(), None);
	}

	#[tokio::test]
	async fn decrypt_failure_is_silent_by_default() {
		let mut crypto = MockCryptoService::new();
		crypto
			.expect_decrypt()
			.returning(|_, _| Err(CryptoError::DecryptionFailed));

		let config = CoordinatorConfig::builder().encryption_key("k").build();
		let (coordinator, observer, cache) = coordinator(config, crypto);

		let err = coordinator
			.merge_and_cache(br#"{"encryptedFeatures": "ENC"}"#, true)
			.await
			.unwrap_err();

		assert!(matches!(err, MergeError::DecryptFailed(_)));
		assert!(observer.events().is_empty());
		assert_eq!(cache.get(FEATURES_CACHE_KEY).await.unwrap(), None);
	}

	#[tokio::test]
	async fn decrypt_failure_reported_when_configured() {
		let mut crypto = MockCryptoService::new();
		crypto
			.expect_decrypt()
			.returning(|_, _| Err(CryptoError::DecryptionFailed));

		let config = CoordinatorConfig::builder()
			.encryption_key("k")
			.decrypt_failure_policy(DecryptFailurePolicy::Report)
			.build();
		let (coordinator, observer, _cache) = coordinator(config, crypto);

		let _ = coordinator
			.merge_and_cache(br#"{"encryptedFeatures": "ENC"}"#, false)
			.await;

		assert_eq!(observer.events(), vec![Err((ErrorKind::ParseFailure, false))]);
	}

	#[tokio::test]
	async fn empty_decrypted_set_is_not_cached() {
		let mut crypto = MockCryptoService::new();
		crypto
			.expect_decrypt()
			.returning(|_, _| Ok(FeatureSet::new()));

		let config = CoordinatorConfig::builder().encryption_key("k").build();
		let (coordinator, observer, cache) = coordinator(config, crypto);
		cache.put(FEATURES_CACHE_KEY, br#"{"a":1}"#).await.unwrap();

		let _ = coordinator
			.merge_and_cache(br#"{"encryptedFeatures": "ENC"}"#, true)
			.await;

		assert_eq!(observer.events(), vec![Err((ErrorKind::ParseFailure, true))]);
		assert_eq!(
			cache.get(FEATURES_CACHE_KEY).await.unwrap(),
			Some(br#"{"a":1}"#.to_vec())
		);
	}

	#[tokio::test]
	async fn malformed_payload_is_parse_failure() {
		let (coordinator, observer, _cache) =
			coordinator(CoordinatorConfig::default(), MockCryptoService::new());

		for raw in [b"garbage".as_slice(), b"[]", b"{}", br#"{"features": {}}"#] {
			let err = coordinator.merge_and_cache(raw, true).await.unwrap_err();
			assert_eq!(err.kind(), Some(ErrorKind::ParseFailure));
		}

		assert_eq!(observer.events().len(), 4);
		assert!(observer
			.events()
			.iter()
			.all(|event| *event == Err((ErrorKind::ParseFailure, true))));
	}

	#[tokio::test]
	async fn load_cached_does_not_notify() {
		let (coordinator, observer, cache) =
			coordinator(CoordinatorConfig::default(), MockCryptoService::new());

		assert_eq!(coordinator.load_cached().await, Err(ErrorKind::LoadFailure));

		cache.put(FEATURES_CACHE_KEY, br#"{"a":1}"#).await.unwrap();
		assert_eq!(coordinator.load_cached().await, Ok(set("a", 1)));

		assert!(observer.events().is_empty());
	}

	#[test]
	fn build_without_runtime_fails() {
		let result = FeatureCoordinator::builder().build();
		assert!(matches!(result, Err(FeaturesError::NoRuntime)));
	}
}
