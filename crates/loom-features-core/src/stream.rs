// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Live stream event types.
//!
//! The server pushes full payloads on the `features` event:
//!
//! ```text
//! event: features
//! id: 42
//! data: {"features": {"checkout.new_flow": true}}
//! ```

use serde::{Deserialize, Serialize};

/// Name of the stream event that carries a [`WirePayload`](crate::WirePayload).
pub const FEATURES_EVENT: &str = "features";

/// A single event delivered by a stream transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
	pub id: Option<String>,
	pub event: String,
	/// UTF-8 event body, absent for comment-only or empty events.
	pub data: Option<String>,
}

impl StreamEvent {
	pub fn new(event: impl Into<String>, data: Option<String>) -> Self {
		Self {
			id: None,
			event: event.into(),
			data,
		}
	}

	pub fn with_id(mut self, id: impl Into<String>) -> Self {
		self.id = Some(id.into());
		self
	}

	pub fn is_features(&self) -> bool {
		self.event == FEATURES_EVENT
	}

	/// The event body, if the event carried a data field.
	pub fn payload(&self) -> Option<&[u8]> {
		self.data.as_deref().map(str::as_bytes)
	}
}
