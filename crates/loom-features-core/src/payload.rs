// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Inbound payload shape shared by the one-shot fetch and the live stream.
//!
//! ```json
//! { "features": { "checkout.new_flow": true } }
//! { "encryptedFeatures": "q83vEjRWeJCrze8S..." }
//! ```

use serde::{Deserialize, Serialize};

use crate::FeatureSet;

/// Decoded fetch response or stream event body.
///
/// At most one member is meaningfully populated. Unknown members are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WirePayload {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub features: Option<FeatureSet>,

	#[serde(
		default,
		rename = "encryptedFeatures",
		skip_serializing_if = "Option::is_none"
	)]
	pub encrypted_features: Option<String>,
}

/// What a payload actually carries once empty members are discounted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PayloadContent<'a> {
	/// A non-empty plain feature set.
	Plain(&'a FeatureSet),
	/// A non-empty ciphertext; only reported when there are no plain features.
	Encrypted(&'a str),
	/// Neither member is populated.
	Empty,
}

impl WirePayload {
	pub fn plain(features: FeatureSet) -> Self {
		Self {
			features: Some(features),
			encrypted_features: None,
		}
	}

	pub fn encrypted(ciphertext: impl Into<String>) -> Self {
		Self {
			features: None,
			encrypted_features: Some(ciphertext.into()),
		}
	}

	/// Classifies the payload. Plain features take precedence over ciphertext.
	pub fn content(&self) -> PayloadContent<'_> {
		if let Some(features) = self.features.as_ref().filter(|f| !f.is_empty()) {
			return PayloadContent::Plain(features);
		}

		match self.encrypted_features.as_deref() {
			Some(ciphertext) if !ciphertext.is_empty() => PayloadContent::Encrypted(ciphertext),
			_ => PayloadContent::Empty,
		}
	}
}
