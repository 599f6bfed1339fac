// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SSE (Server-Sent Events) stream transport.
//!
//! Runs the subscription in a background task that reconnects with
//! exponential backoff and dispatches each event to the handlers registered
//! for its name.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use eventsource_stream::{Event, Eventsource};
use futures::StreamExt;
use loom_features_core::StreamEvent;
use reqwest::header::{HeaderValue, ACCEPT, CACHE_CONTROL};
use reqwest::Client;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::TransportError;
use crate::fetch::{header_map, user_agent};
use crate::stream::{StreamFactory, StreamHandler, StreamState, StreamTransport};

/// Configuration for SSE connection behavior.
#[derive(Debug, Clone)]
pub struct SseConfig {
	/// Base delay for reconnection attempts.
	pub reconnect_base_delay: Duration,
	/// Maximum delay for reconnection attempts.
	pub reconnect_max_delay: Duration,
	/// Maximum number of consecutive failed attempts (0 = unlimited).
	pub max_reconnect_attempts: u32,
	/// Whether to use exponential backoff for reconnection.
	pub use_exponential_backoff: bool,
}

impl Default for SseConfig {
	fn default() -> Self {
		Self {
			reconnect_base_delay: Duration::from_secs(1),
			reconnect_max_delay: Duration::from_secs(30),
			max_reconnect_attempts: 0, // Unlimited
			use_exponential_backoff: true,
		}
	}
}

type HandlerMap = RwLock<HashMap<String, Vec<StreamHandler>>>;

/// State shared between the transport and its background task.
struct Shared {
	url: Url,
	client: Client,
	config: SseConfig,
	handlers: HandlerMap,
	/// Whether the HTTP stream is currently open.
	established: AtomicBool,
	reconnect_attempts: AtomicU64,
	events_received: AtomicU64,
}

struct RunningTask {
	handle: JoinHandle<()>,
	shutdown_tx: mpsc::Sender<()>,
}

/// [`StreamTransport`] over an SSE endpoint.
pub struct SseStreamTransport {
	shared: Arc<Shared>,
	runtime: Handle,
	task: Mutex<Option<RunningTask>>,
}

impl SseStreamTransport {
	/// Creates a transport bound to the current Tokio runtime.
	pub fn new(
		url: Url,
		headers: &HashMap<String, String>,
		config: SseConfig,
	) -> Result<Self, TransportError> {
		let runtime = Handle::try_current().map_err(|_| TransportError::NoRuntime)?;
		Self::with_runtime(url, headers, config, runtime)
	}

	pub fn with_runtime(
		url: Url,
		headers: &HashMap<String, String>,
		config: SseConfig,
		runtime: Handle,
	) -> Result<Self, TransportError> {
		let mut default_headers = header_map(headers)?;
		default_headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
		default_headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

		let client = Client::builder()
			.user_agent(user_agent())
			.default_headers(default_headers)
			.build()?;

		Ok(Self {
			shared: Arc::new(Shared {
				url,
				client,
				config,
				handlers: RwLock::new(HashMap::new()),
				established: AtomicBool::new(false),
				reconnect_attempts: AtomicU64::new(0),
				events_received: AtomicU64::new(0),
			}),
			runtime,
			task: Mutex::new(None),
		})
	}

	pub fn url(&self) -> &Url {
		&self.shared.url
	}

	/// Returns true while the HTTP event stream is open.
	pub fn is_established(&self) -> bool {
		self.shared.established.load(Ordering::SeqCst)
	}

	/// Returns the number of reconnection attempts since the transport was created.
	pub fn reconnect_attempts(&self) -> u64 {
		self.shared.reconnect_attempts.load(Ordering::SeqCst)
	}

	/// Returns the number of events received since the transport was created.
	pub fn events_received(&self) -> u64 {
		self.shared.events_received.load(Ordering::SeqCst)
	}
}

impl StreamTransport for SseStreamTransport {
	fn on(&self, event_name: &str, handler: StreamHandler) {
		self.shared
			.handlers
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.entry(event_name.to_string())
			.or_default()
			.push(handler);
	}

	fn connect(&self) {
		let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);

		if task.as_ref().is_some_and(|running| !running.handle.is_finished()) {
			debug!(url = %self.shared.url, "SSE stream already connected");
			return;
		}

		let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
		let shared = Arc::clone(&self.shared);
		let handle = self.runtime.spawn(async move {
			run_sse_loop(shared, shutdown_rx).await;
		});

		*task = Some(RunningTask {
			handle,
			shutdown_tx,
		});
		info!(url = %self.shared.url, "SSE stream started");
	}

	fn disconnect(&self) {
		let running = self
			.task
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.take();

		let Some(running) = running else {
			debug!(url = %self.shared.url, "SSE stream already disconnected");
			return;
		};

		let _ = running.shutdown_tx.try_send(());
		running.handle.abort();
		self.shared.established.store(false, Ordering::SeqCst);
		info!(url = %self.shared.url, "SSE stream stopped");
	}

	fn state(&self) -> StreamState {
		let task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
		match task.as_ref() {
			Some(running) if !running.handle.is_finished() => StreamState::Connected,
			_ => StreamState::Disconnected,
		}
	}
}

impl fmt::Debug for SseStreamTransport {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SseStreamTransport")
			.field("url", &self.shared.url.as_str())
			.field("state", &self.state())
			.field("established", &self.is_established())
			.finish()
	}
}

impl Drop for SseStreamTransport {
	fn drop(&mut self) {
		let task = self
			.task
			.get_mut()
			.unwrap_or_else(PoisonError::into_inner)
			.take();
		if let Some(running) = task {
			running.handle.abort();
		}
	}
}

/// Creates [`SseStreamTransport`]s on a fixed runtime.
#[derive(Debug, Clone)]
pub struct SseStreamFactory {
	config: SseConfig,
	runtime: Handle,
}

impl SseStreamFactory {
	/// Creates a factory bound to the current Tokio runtime.
	pub fn new(config: SseConfig) -> Result<Self, TransportError> {
		let runtime = Handle::try_current().map_err(|_| TransportError::NoRuntime)?;
		Ok(Self::with_runtime(config, runtime))
	}

	pub fn with_runtime(config: SseConfig, runtime: Handle) -> Self {
		Self { config, runtime }
	}
}

impl StreamFactory for SseStreamFactory {
	fn create(
		&self,
		url: &Url,
		headers: &HashMap<String, String>,
	) -> Result<Arc<dyn StreamTransport>, TransportError> {
		let transport = SseStreamTransport::with_runtime(
			url.clone(),
			headers,
			self.config.clone(),
			self.runtime.clone(),
		)?;
		Ok(Arc::new(transport))
	}
}

/// Delay before the next connection attempt.
fn backoff_delay(config: &SseConfig, consecutive_failures: u32) -> Duration {
	if !config.use_exponential_backoff {
		return config.reconnect_base_delay;
	}

	let factor = 2u64.saturating_pow(consecutive_failures.min(10));
	let delay_ms = (config.reconnect_base_delay.as_millis() as u64).saturating_mul(factor);
	Duration::from_millis(delay_ms.min(config.reconnect_max_delay.as_millis() as u64))
}

/// Runs the SSE connection loop with reconnection logic.
async fn run_sse_loop(shared: Arc<Shared>, mut shutdown_rx: mpsc::Receiver<()>) {
	let mut consecutive_failures: u32 = 0;

	loop {
		// Check for shutdown signal
		if shutdown_rx.try_recv().is_ok() {
			info!("SSE stream received shutdown signal");
			break;
		}

		info!(url = %shared.url, "Connecting to SSE stream");

		match connect_and_process(&shared).await {
			Ok(()) => {
				// Normal disconnect (e.g., server closed connection)
				debug!("SSE stream ended normally");
				consecutive_failures = 0;
			}
			Err(e) => {
				error!(error = %e, "SSE connection error");
				consecutive_failures += 1;
			}
		}

		shared.established.store(false, Ordering::SeqCst);

		if shared.config.max_reconnect_attempts > 0
			&& consecutive_failures >= shared.config.max_reconnect_attempts
		{
			error!(
				attempts = consecutive_failures,
				"Max reconnection attempts reached, stopping SSE"
			);
			break;
		}

		let delay = backoff_delay(&shared.config, consecutive_failures);

		shared.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
		warn!(
			delay_ms = delay.as_millis(),
			attempts = consecutive_failures,
			"Reconnecting to SSE stream"
		);

		// Wait with shutdown check
		tokio::select! {
			_ = tokio::time::sleep(delay) => {}
			_ = shutdown_rx.recv() => {
				info!("SSE stream received shutdown signal during reconnect wait");
				break;
			}
		}
	}
}

/// Connects to the SSE stream and dispatches events until disconnection.
async fn connect_and_process(shared: &Shared) -> Result<(), TransportError> {
	let response = shared.client.get(shared.url.clone()).send().await?;

	if !response.status().is_success() {
		return Err(TransportError::ServerError {
			status: response.status().as_u16(),
			message: response.text().await.unwrap_or_default(),
		});
	}

	shared.established.store(true, Ordering::SeqCst);
	info!(url = %shared.url, "SSE connection established");

	let mut event_stream = response.bytes_stream().eventsource();

	while let Some(event_result) = event_stream.next().await {
		match event_result {
			Ok(event) => {
				shared.events_received.fetch_add(1, Ordering::SeqCst);
				dispatch(&shared.handlers, event);
			}
			Err(e) => {
				return Err(TransportError::SseStreamError(e.to_string()));
			}
		}
	}

	Ok(())
}

/// Hands an event to every handler registered for its name.
fn dispatch(handlers: &HandlerMap, event: Event) {
	let Event { id, event, data, .. } = event;

	let registered = handlers
		.read()
		.unwrap_or_else(PoisonError::into_inner)
		.get(&event)
		.cloned();

	let Some(registered) = registered else {
		debug!(event = %event, "No handler for SSE event");
		return;
	};

	let stream_event = StreamEvent {
		id: (!id.is_empty()).then_some(id),
		event,
		data: (!data.is_empty()).then_some(data),
	};

	for handler in registered {
		handler(stream_event.clone());
	}
}
