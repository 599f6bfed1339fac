// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a cache load, fetch or stream event produced no features.
///
/// Observers receive this together with a provenance flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
	/// The cache or the remote source was unreachable or had nothing stored.
	LoadFailure,
	/// Data was present but did not decode to a usable, non-empty feature set.
	ParseFailure,
	/// An encrypted payload arrived but no usable encryption key is configured.
	MissingEncryptionKey,
}

impl ErrorKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			ErrorKind::LoadFailure => "load_failure",
			ErrorKind::ParseFailure => "parse_failure",
			ErrorKind::MissingEncryptionKey => "missing_encryption_key",
		}
	}
}

impl fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
