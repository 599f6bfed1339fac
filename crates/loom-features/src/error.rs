// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the features SDK.

use loom_features_core::{CodecError, ErrorKind};
use thiserror::Error;

/// Result type alias for SDK operations.
pub type Result<T> = std::result::Result<T, FeaturesError>;

/// Errors surfaced while building or wiring the SDK.
///
/// Failures that happen while fetching or merging features are reported to
/// the [`Observer`](crate::Observer) as an [`ErrorKind`] instead.
#[derive(Debug, Error)]
pub enum FeaturesError {
	#[error("transport error: {0}")]
	Transport(#[from] TransportError),

	#[error("cache error: {0}")]
	Cache(#[from] CacheError),

	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),

	/// The coordinator needs a Tokio runtime to run fetches and stream workers.
	#[error("no Tokio runtime available; build the coordinator inside a runtime or pass a handle")]
	NoRuntime,
}

/// Failures of the fetch and stream transports.
#[derive(Debug, Error)]
pub enum TransportError {
	#[error("invalid URL: {0}")]
	InvalidUrl(String),

	#[error("invalid header {name}: {reason}")]
	InvalidHeader { name: String, reason: String },

	#[error("HTTP request failed: {0}")]
	RequestFailed(#[from] reqwest::Error),

	#[error("server error (status {status}): {message}")]
	ServerError { status: u16, message: String },

	#[error("SSE stream error: {0}")]
	SseStreamError(String),

	#[error("no Tokio runtime available for the stream task")]
	NoRuntime,
}

/// Failures of a [`CacheStore`](crate::CacheStore) backend.
#[derive(Debug, Error)]
pub enum CacheError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("could not determine cache directory")]
	NoCacheDir,

	#[error("cache backend error: {0}")]
	Backend(String),
}

/// Failures of a [`CryptoService`](crate::CryptoService).
#[derive(Debug, Error)]
pub enum CryptoError {
	#[error("ciphertext is not valid base64: {0}")]
	InvalidEncoding(String),

	#[error("ciphertext too short: {len} bytes")]
	CiphertextTooShort { len: usize },

	#[error("decryption failed")]
	DecryptionFailed,

	#[error("encryption failed")]
	EncryptionFailed,

	#[error("decrypted data is not a feature set: {0}")]
	InvalidPlaintext(#[from] CodecError),
}

/// Failures while reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("invalid boolean for {var}: {value:?}")]
	InvalidBool { var: String, value: String },
}

/// Why the merge pipeline did not produce features.
#[derive(Debug, Error)]
pub enum MergeError {
	/// The payload was rejected; the kind is reported to the observer.
	#[error("payload rejected: {0}")]
	Rejected(ErrorKind),

	/// The ciphertext could not be decrypted with the configured key.
	#[error("failed to decrypt encrypted features: {0}")]
	DecryptFailed(#[source] CryptoError),
}

impl MergeError {
	/// The observer-facing kind, if this error maps to one directly.
	pub fn kind(&self) -> Option<ErrorKind> {
		match self {
			MergeError::Rejected(kind) => Some(*kind),
			MergeError::DecryptFailed(_) => None,
		}
	}
}
