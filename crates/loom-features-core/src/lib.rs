// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Loom features SDK.
//!
//! This crate provides the data model shared by the client SDK (`loom-features`)
//! and anything that produces feature payloads for it:
//!
//! - [`Feature`] and [`FeatureSet`]: named flag values as the client sees them
//! - [`WirePayload`]: the shape of every fetch response and stream event body,
//!   carrying either plain features or an encrypted blob
//! - [`ErrorKind`]: the flat failure taxonomy reported to observers
//! - codec helpers for the cache blob and the wire payload
//!
//! Nothing in here performs I/O.
//!
//! # Example
//!
//! ```
//! use loom_features_core::{codec, Feature, FeatureSet, PayloadContent};
//!
//! let payload = codec::decode_payload(br#"{"features": {"checkout.new_flow": true}}"#).unwrap();
//!
//! match payload.content() {
//!     PayloadContent::Plain(features) => {
//!         assert_eq!(features.get_bool("checkout.new_flow"), Some(true));
//!     }
//!     _ => unreachable!(),
//! }
//!
//! let set: FeatureSet = [Feature::new("ui.theme", "dark")].into_iter().collect();
//! let blob = codec::encode_feature_set(&set).unwrap();
//! assert_eq!(codec::decode_feature_set(&blob).unwrap(), set);
//! ```

pub mod codec;
pub mod error;
pub mod feature;
pub mod payload;
pub mod stream;

pub use codec::CodecError;
pub use error::ErrorKind;
pub use feature::{Feature, FeatureSet};
pub use payload::{PayloadContent, WirePayload};
pub use stream::{StreamEvent, FEATURES_EVENT};

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;
	use serde_json::Value;

	fn feature_value() -> impl Strategy<Value = Value> {
		prop_oneof![
			any::<bool>().prop_map(Value::from),
			any::<i64>().prop_map(Value::from),
			"[a-zA-Z0-9 _-]{0,24}".prop_map(Value::from),
			Just(Value::Null),
			prop::collection::vec(any::<i32>(), 0..4).prop_map(Value::from),
		]
	}

	fn feature_set() -> impl Strategy<Value = FeatureSet> {
		prop::collection::btree_map("[a-z][a-z0-9_.]{0,30}", feature_value(), 0..16)
			.prop_map(|map| map.into_iter().collect())
	}

	// Property-based tests for the cache blob codec
	proptest! {
		#[test]
		fn feature_set_codec_roundtrip(set in feature_set()) {
			let blob = codec::encode_feature_set(&set).unwrap();
			let decoded = codec::decode_feature_set(&blob).unwrap();
			prop_assert_eq!(decoded, set);
		}

		#[test]
		fn plain_payload_roundtrip(set in feature_set()) {
			let bytes = codec::encode_payload(&WirePayload::plain(set.clone())).unwrap();
			let decoded = codec::decode_payload(&bytes).unwrap();
			prop_assert_eq!(decoded.features, Some(set));
			prop_assert!(decoded.encrypted_features.is_none());
		}
	}

	// Property-based tests for payload precedence
	proptest! {
		#[test]
		fn non_empty_features_always_win_over_ciphertext(
			set in feature_set(),
			ciphertext in "[A-Za-z0-9+/=]{1,64}",
		) {
			let payload = WirePayload {
				features: Some(set.clone()),
				encrypted_features: Some(ciphertext.clone()),
			};

			match payload.content() {
				PayloadContent::Plain(features) => {
					prop_assert!(!set.is_empty());
					prop_assert_eq!(features, &set);
				}
				PayloadContent::Encrypted(found) => {
					prop_assert!(set.is_empty());
					prop_assert_eq!(found, ciphertext.as_str());
				}
				PayloadContent::Empty => prop_assert!(false, "ciphertext was present"),
			}
		}

		#[test]
		fn arbitrary_bytes_never_panic_decoding(bytes in prop::collection::vec(any::<u8>(), 0..128)) {
			let _ = codec::decode_payload(&bytes);
			let _ = codec::decode_feature_set(&bytes);
		}
	}
}
