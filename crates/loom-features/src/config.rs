// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Coordinator configuration.
//!
//! | Setting | Env var | Default |
//! |---------|---------|---------|
//! | `encryption_key` | `LOOM_FEATURES_ENCRYPTION_KEY` | absent: encrypted payloads fail with `MissingEncryptionKey` |
//! | `background_sync` | `LOOM_FEATURES_BACKGROUND_SYNC` | `false`: the stream is explicitly closed |
//! | `decrypt_failure_policy` | `LOOM_FEATURES_REPORT_DECRYPT_FAILURES` | `Silent` |

use std::collections::HashMap;
use std::fmt;

use zeroize::Zeroizing;

use crate::error::ConfigError;

pub const ENV_ENCRYPTION_KEY: &str = "LOOM_FEATURES_ENCRYPTION_KEY";
pub const ENV_BACKGROUND_SYNC: &str = "LOOM_FEATURES_BACKGROUND_SYNC";
pub const ENV_REPORT_DECRYPT_FAILURES: &str = "LOOM_FEATURES_REPORT_DECRYPT_FAILURES";

/// Key used to decrypt `encryptedFeatures` payloads.
///
/// Zeroed on drop and never printed by `Debug`.
#[derive(Clone)]
pub struct EncryptionKey(Zeroizing<String>);

impl EncryptionKey {
	pub fn new(key: impl Into<String>) -> Self {
		Self(Zeroizing::new(key.into()))
	}

	pub fn expose(&self) -> &str {
		self.0.as_str()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl fmt::Debug for EncryptionKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("EncryptionKey([REDACTED])")
	}
}

impl From<&str> for EncryptionKey {
	fn from(key: &str) -> Self {
		Self::new(key)
	}
}

impl From<String> for EncryptionKey {
	fn from(key: String) -> Self {
		Self::new(key)
	}
}

/// What the coordinator tells the observer when a ciphertext fails to decrypt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecryptFailurePolicy {
	/// Log the failure and notify nobody. Avoids flapping the UI while keys rotate.
	#[default]
	Silent,
	/// Report the failure as [`ErrorKind::ParseFailure`](loom_features_core::ErrorKind::ParseFailure).
	Report,
}

/// Settings supplied at construction and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorConfig {
	pub encryption_key: Option<EncryptionKey>,
	/// Keep the live stream open to receive pushed updates.
	pub background_sync: bool,
	pub decrypt_failure_policy: DecryptFailurePolicy,
	/// Extra headers for the default HTTP fetch, e.g. `Authorization`.
	///
	/// Ignored when a fetch transport is supplied to the coordinator builder.
	pub fetch_headers: HashMap<String, String>,
	/// Extra headers for the stream subscription.
	pub stream_headers: HashMap<String, String>,
}

impl CoordinatorConfig {
	pub fn builder() -> CoordinatorConfigBuilder {
		CoordinatorConfigBuilder::default()
	}

	/// Reads configuration from `LOOM_FEATURES_*` environment variables.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
		let encryption_key = lookup(ENV_ENCRYPTION_KEY).map(EncryptionKey::new);

		let background_sync = match lookup(ENV_BACKGROUND_SYNC) {
			Some(value) => parse_bool(ENV_BACKGROUND_SYNC, &value)?,
			None => false,
		};

		let decrypt_failure_policy = match lookup(ENV_REPORT_DECRYPT_FAILURES) {
			Some(value) if parse_bool(ENV_REPORT_DECRYPT_FAILURES, &value)? => {
				DecryptFailurePolicy::Report
			}
			_ => DecryptFailurePolicy::Silent,
		};

		Ok(Self {
			encryption_key,
			background_sync,
			decrypt_failure_policy,
			fetch_headers: HashMap::new(),
			stream_headers: HashMap::new(),
		})
	}

	/// The encryption key, unless it is absent or empty.
	pub fn usable_encryption_key(&self) -> Option<&str> {
		self.encryption_key
			.as_ref()
			.filter(|key| !key.is_empty())
			.map(EncryptionKey::expose)
	}
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
	match value.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Ok(true),
		"0" | "false" | "no" | "off" | "" => Ok(false),
		_ => Err(ConfigError::InvalidBool {
			var: var.to_string(),
			value: value.to_string(),
		}),
	}
}

/// Builder for [`CoordinatorConfig`].
#[derive(Debug, Default)]
pub struct CoordinatorConfigBuilder {
	config: CoordinatorConfig,
}

impl CoordinatorConfigBuilder {
	pub fn encryption_key(mut self, key: impl Into<EncryptionKey>) -> Self {
		self.config.encryption_key = Some(key.into());
		self
	}

	pub fn background_sync(mut self, enabled: bool) -> Self {
		self.config.background_sync = enabled;
		self
	}

	pub fn decrypt_failure_policy(mut self, policy: DecryptFailurePolicy) -> Self {
		self.config.decrypt_failure_policy = policy;
		self
	}

	pub fn fetch_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.config.fetch_headers.insert(name.into(), value.into());
		self
	}

	pub fn stream_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.config.stream_headers.insert(name.into(), value.into());
		self
	}

	pub fn build(self) -> CoordinatorConfig {
		self.config
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
		let vars: HashMap<String, String> = vars
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect();
		move |name| vars.get(name).cloned()
	}

	#[test]
	fn defaults() {
		let config = CoordinatorConfig::default();
		assert!(config.encryption_key.is_none());
		assert!(!config.background_sync);
		assert_eq!(config.decrypt_failure_policy, DecryptFailurePolicy::Silent);
		assert!(config.fetch_headers.is_empty());
		assert!(config.stream_headers.is_empty());
	}

	#[test]
	fn builder_keeps_fetch_and_stream_headers_apart() {
		let config = CoordinatorConfig::builder()
			.fetch_header("Authorization", "Bearer fetch")
			.stream_header("Authorization", "Bearer stream")
			.build();

		assert_eq!(
			config.fetch_headers.get("Authorization").map(String::as_str),
			Some("Bearer fetch")
		);
		assert_eq!(
			config.stream_headers.get("Authorization").map(String::as_str),
			Some("Bearer stream")
		);
	}

	#[test]
	fn empty_key_is_not_usable() {
		let config = CoordinatorConfig::builder().encryption_key("").build();
		assert!(config.encryption_key.is_some());
		assert_eq!(config.usable_encryption_key(), None);

		let config = CoordinatorConfig::builder().encryption_key("k").build();
		assert_eq!(config.usable_encryption_key(), Some("k"));
	}

	#[test]
	fn debug_redacts_key() {
		let config = CoordinatorConfig::builder()
			.encryption_key("super-secret")
			.build();
		let debug = format!("{config:?}");
		assert!(!debug.contains("super-secret"));
		assert!(debug.contains("REDACTED"));
	}

	#[test]
	fn builder_sets_everything() {
		let config = CoordinatorConfig::builder()
			.background_sync(true)
			.decrypt_failure_policy(DecryptFailurePolicy::Report)
			.stream_header("Authorization", "Bearer abc")
			.build();
		assert!(config.background_sync);
		assert_eq!(config.decrypt_failure_policy, DecryptFailurePolicy::Report);
		assert_eq!(
			config.stream_headers.get("Authorization").map(String::as_str),
			Some("Bearer abc")
		);
	}

	#[test]
	fn from_lookup_reads_all_vars() {
		let config = CoordinatorConfig::from_lookup(lookup_from(&[
			(ENV_ENCRYPTION_KEY, "k"),
			(ENV_BACKGROUND_SYNC, "true"),
			(ENV_REPORT_DECRYPT_FAILURES, "1"),
		]))
		.unwrap();

		assert_eq!(config.usable_encryption_key(), Some("k"));
		assert!(config.background_sync);
		assert_eq!(config.decrypt_failure_policy, DecryptFailurePolicy::Report);
	}

	#[test]
	fn from_lookup_defaults_when_unset() {
		let config = CoordinatorConfig::from_lookup(lookup_from(&[])).unwrap();
		assert!(config.encryption_key.is_none());
		assert!(!config.background_sync);
		assert_eq!(config.decrypt_failure_policy, DecryptFailurePolicy::Silent);
	}

	#[test]
	fn from_lookup_rejects_bad_bool() {
		let err = CoordinatorConfig::from_lookup(lookup_from(&[(ENV_BACKGROUND_SYNC, "maybe")]))
			.unwrap_err();
		assert!(matches!(err, ConfigError::InvalidBool { .. }));
	}

	#[test]
	fn parse_bool_variants() {
		for value in ["1", "true", "TRUE", "yes", "on", " On "] {
			assert!(parse_bool("X", value).unwrap(), "{value}");
		}
		for value in ["0", "false", "no", "off", ""] {
			assert!(!parse_bool("X", value).unwrap(), "{value}");
		}
	}
}
