// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! JSON codecs for the cache blob and the wire payload.

use thiserror::Error;

use crate::{FeatureSet, WirePayload};

/// Errors produced while encoding or decoding feature data.
#[derive(Debug, Error)]
pub enum CodecError {
	#[error("invalid feature JSON: {0}")]
	Json(#[from] serde_json::Error),
}

pub fn encode_feature_set(features: &FeatureSet) -> Result<Vec<u8>, CodecError> {
	Ok(serde_json::to_vec(features)?)
}

/// Decodes a cache blob. Anything other than a JSON object is rejected.
pub fn decode_feature_set(bytes: &[u8]) -> Result<FeatureSet, CodecError> {
	Ok(serde_json::from_slice(bytes)?)
}

pub fn encode_payload(payload: &WirePayload) -> Result<Vec<u8>, CodecError> {
	Ok(serde_json::to_vec(payload)?)
}

/// Decodes a fetch response or stream event body.
pub fn decode_payload(bytes: &[u8]) -> Result<WirePayload, CodecError> {
	Ok(serde_json::from_slice(bytes)?)
}
