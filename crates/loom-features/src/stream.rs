// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Live update subscription.

use std::collections::HashMap;
use std::sync::Arc;

use loom_features_core::StreamEvent;
use url::Url;

use crate::error::TransportError;

/// Callback invoked for every event with a registered name.
pub type StreamHandler = Arc<dyn Fn(StreamEvent) + Send + Sync>;

/// Subscription lifecycle as seen by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
	Disconnected,
	Connected,
}

/// A long-lived event subscription.
///
/// `connect` and `disconnect` are both idempotent: connecting twice must not
/// duplicate event delivery and disconnecting while disconnected is a no-op.
/// An event already in flight when `disconnect` is called may still be
/// delivered.
pub trait StreamTransport: Send + Sync {
	/// Registers a handler for events named `event_name`.
	fn on(&self, event_name: &str, handler: StreamHandler);

	fn connect(&self);

	fn disconnect(&self);

	fn state(&self) -> StreamState;
}

/// Creates a stream transport for a URL.
pub trait StreamFactory: Send + Sync {
	fn create(
		&self,
		url: &Url,
		headers: &HashMap<String, String>,
	) -> Result<Arc<dyn StreamTransport>, TransportError>;
}
