// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Decryption of `encryptedFeatures` payloads.
//!
//! [`AesGcmCrypto`] expects `base64(nonce || ciphertext)` where the nonce is
//! 12 bytes and the ciphertext is AES-256-GCM over the JSON feature set. The
//! AES key is the SHA-256 digest of the configured key string.

use aes_gcm::{
	aead::{Aead, KeyInit, OsRng},
	Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use loom_features_core::{codec, FeatureSet};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Size of AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Turns a ciphertext string into a feature set.
///
/// The coordinator treats every error the same way; the variants exist for
/// logging.
#[cfg_attr(test, mockall::automock)]
pub trait CryptoService: Send + Sync {
	fn decrypt(&self, ciphertext: &str, key: &str) -> Result<FeatureSet, CryptoError>;
}

/// AES-256-GCM implementation of [`CryptoService`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AesGcmCrypto;

impl AesGcmCrypto {
	pub fn new() -> Self {
		Self
	}

	/// Encrypts a feature set into the `encryptedFeatures` wire format.
	pub fn encrypt(&self, features: &FeatureSet, key: &str) -> Result<String, CryptoError> {
		let cipher = cipher_for(key);
		let plaintext = Zeroizing::new(codec::encode_feature_set(features)?);

		let mut nonce_bytes = [0u8; NONCE_SIZE];
		OsRng.fill_bytes(&mut nonce_bytes);
		let nonce = Nonce::from_slice(&nonce_bytes);

		let ciphertext = cipher
			.encrypt(nonce, plaintext.as_slice())
			.map_err(|_| CryptoError::EncryptionFailed)?;

		let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
		blob.extend_from_slice(&nonce_bytes);
		blob.extend_from_slice(&ciphertext);

		Ok(STANDARD.encode(blob))
	}
}

impl CryptoService for AesGcmCrypto {
	fn decrypt(&self, ciphertext: &str, key: &str) -> Result<FeatureSet, CryptoError> {
		let blob = STANDARD
			.decode(ciphertext.trim())
			.map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;

		// A GCM tag alone is 16 bytes.
		if blob.len() <= NONCE_SIZE + 16 {
			return Err(CryptoError::CiphertextTooShort { len: blob.len() });
		}

		let (nonce_bytes, sealed) = blob.split_at(NONCE_SIZE);
		let plaintext = Zeroizing::new(
			cipher_for(key)
				.decrypt(Nonce::from_slice(nonce_bytes), sealed)
				.map_err(|_| CryptoError::DecryptionFailed)?,
		);

		Ok(codec::decode_feature_set(&plaintext)?)
	}
}

fn cipher_for(key: &str) -> Aes256Gcm {
	let digest = Sha256::digest(key.as_bytes());
	Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(digest.as_slice()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use loom_features_core::Feature;
	use proptest::prelude::*;

	fn features() -> FeatureSet {
		[Feature::new("c", 3), Feature::new("ui.theme", "dark")]
			.into_iter()
			.collect()
	}

	#[test]
	fn encrypt_decrypt_roundtrip() {
		let crypto = AesGcmCrypto::new();
		let ciphertext = crypto.encrypt(&features(), "k").unwrap();
		assert_eq!(crypto.decrypt(&ciphertext, "k").unwrap(), features());
	}

	#[test]
	fn encryption_uses_fresh_nonces() {
		let crypto = AesGcmCrypto::new();
		let a = crypto.encrypt(&features(), "k").unwrap();
		let b = crypto.encrypt(&features(), "k").unwrap();
		assert_ne!(a, b);
	}

	#[test]
	fn wrong_key_fails_decryption() {
		let crypto = AesGcmCrypto::new();
		let ciphertext = crypto.encrypt(&features(), "k").unwrap();
		assert!(matches!(
			crypto.decrypt(&ciphertext, "other"),
			Err(CryptoError::DecryptionFailed)
		));
	}

	#[test]
	fn tampered_ciphertext_fails() {
		let crypto = AesGcmCrypto::new();
		let ciphertext = crypto.encrypt(&features(), "k").unwrap();

		let mut blob = STANDARD.decode(&ciphertext).unwrap();
		let last = blob.len() - 1;
		blob[last] ^= 0xFF;

		assert!(matches!(
			crypto.decrypt(&STANDARD.encode(blob), "k"),
			Err(CryptoError::DecryptionFailed)
		));
	}

	#[test]
	fn malformed_input_is_rejected() {
		let crypto = AesGcmCrypto::new();
		assert!(matches!(
			crypto.decrypt("not base64!!", "k"),
			Err(CryptoError::InvalidEncoding(_))
		));
		assert!(matches!(
			crypto.decrypt(&STANDARD.encode([0u8; 20]), "k"),
			Err(CryptoError::CiphertextTooShort { len: 20 })
		));
	}

	#[test]
	fn non_feature_plaintext_is_rejected() {
		let cipher = cipher_for("k");
		let nonce_bytes = [7u8; NONCE_SIZE];
		let sealed = cipher
			.encrypt(Nonce::from_slice(&nonce_bytes), b"[1,2,3]".as_slice())
			.unwrap();
		let mut blob = nonce_bytes.to_vec();
		blob.extend_from_slice(&sealed);

		assert!(matches!(
			AesGcmCrypto::new().decrypt(&STANDARD.encode(blob), "k"),
			Err(CryptoError::InvalidPlaintext(_))
		));
	}

	proptest! {
		#[test]
		fn roundtrip_any_key(key in ".{1,64}", value in any::<i64>()) {
			let crypto = AesGcmCrypto::new();
			let set: FeatureSet = [Feature::new("n", value)].into_iter().collect();
			let ciphertext = crypto.encrypt(&set, &key).unwrap();
			prop_assert_eq!(crypto.decrypt(&ciphertext, &key).unwrap(), set);
		}
	}
}
