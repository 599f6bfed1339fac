// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Outcome notifications for the application.
//!
//! Every notification carries `is_remote`: `false` for the cached snapshot,
//! `true` for the one-shot fetch and for stream events.
//!
//! # Example
//!
//! ```ignore
//! use loom_features::{ErrorKind, FeatureSet, Observer};
//!
//! struct UiObserver {
//!     tx: tokio::sync::watch::Sender<FeatureSet>,
//! }
//!
//! impl Observer for UiObserver {
//!     fn on_features_fetched(&self, features: FeatureSet, _is_remote: bool) {
//!         let _ = self.tx.send(features);
//!     }
//!
//!     fn on_features_fetch_failed(&self, error: ErrorKind, is_remote: bool) {
//!         tracing::warn!(%error, is_remote, "features unavailable");
//!     }
//! }
//! ```

use std::sync::Arc;

use loom_features_core::{ErrorKind, FeatureSet};

/// Receives the outcome of every cache load, fetch and stream event.
///
/// Methods may be called concurrently from the caller's task and from
/// transport tasks. Implementations should return quickly; hand expensive work
/// to a channel or background task.
pub trait Observer: Send + Sync + 'static {
	/// Features were loaded from the cache or merged from a remote payload.
	fn on_features_fetched(&self, features: FeatureSet, is_remote: bool);

	/// A cache load, fetch or stream event produced no features.
	fn on_features_fetch_failed(&self, error: ErrorKind, is_remote: bool);
}

/// Type alias for a shared observer.
pub type SharedObserver = Arc<dyn Observer>;

/// An observer that discards all notifications.
///
/// This is used when no observer is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpObserver;

impl Observer for NoOpObserver {
	fn on_features_fetched(&self, _features: FeatureSet, _is_remote: bool) {}

	fn on_features_fetch_failed(&self, _error: ErrorKind, _is_remote: bool) {}
}
