// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Named feature values.
//!
//! A [`FeatureSet`] serializes as a flat JSON object mapping feature name to
//! value, which is both the cache blob format and the `features` member of a
//! wire payload:
//!
//! ```json
//! { "checkout.new_flow": true, "ui.theme": "dark", "search.max_results": 25 }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single named feature and its value.
///
/// The value is opaque to the SDK; typed accessors are provided for the
/// common boolean, string and numeric cases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
	/// Unique feature name, e.g. `checkout.new_flow`.
	pub name: String,
	/// The feature's value as delivered by the server.
	pub value: Value,
}

impl Feature {
	pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
		Self {
			name: name.into(),
			value: value.into(),
		}
	}

	pub fn as_bool(&self) -> Option<bool> {
		self.value.as_bool()
	}

	pub fn as_str(&self) -> Option<&str> {
		self.value.as_str()
	}

	pub fn as_i64(&self) -> Option<i64> {
		self.value.as_i64()
	}
}

/// The complete set of features known at one point in time.
///
/// Names are unique; inserting a feature with an existing name replaces the
/// previous value. Equality is structural and ignores insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSet {
	features: BTreeMap<String, Value>,
}

impl FeatureSet {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.features.len()
	}

	pub fn is_empty(&self) -> bool {
		self.features.is_empty()
	}

	pub fn contains(&self, name: &str) -> bool {
		self.features.contains_key(name)
	}

	/// Inserts a feature, returning the value it replaced.
	pub fn insert(&mut self, feature: Feature) -> Option<Value> {
		self.features.insert(feature.name, feature.value)
	}

	pub fn remove(&mut self, name: &str) -> Option<Feature> {
		self.features
			.remove_entry(name)
			.map(|(name, value)| Feature { name, value })
	}

	/// Returns the raw value of a feature.
	pub fn get(&self, name: &str) -> Option<&Value> {
		self.features.get(name)
	}

	/// Returns an owned copy of a feature.
	pub fn feature(&self, name: &str) -> Option<Feature> {
		self.features.get(name).map(|value| Feature {
			name: name.to_string(),
			value: value.clone(),
		})
	}

	pub fn get_bool(&self, name: &str) -> Option<bool> {
		self.get(name).and_then(Value::as_bool)
	}

	pub fn get_str(&self, name: &str) -> Option<&str> {
		self.get(name).and_then(Value::as_str)
	}

	pub fn get_i64(&self, name: &str) -> Option<i64> {
		self.get(name).and_then(Value::as_i64)
	}

	/// Feature names in sorted order.
	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.features.keys().map(String::as_str)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
		self.features.iter().map(|(name, value)| (name.as_str(), value))
	}

	pub fn into_features(self) -> Vec<Feature> {
		self.features
			.into_iter()
			.map(|(name, value)| Feature { name, value })
			.collect()
	}
}

impl FromIterator<Feature> for FeatureSet {
	fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
		let mut set = FeatureSet::new();
		set.extend(iter);
		set
	}
}

impl FromIterator<(String, Value)> for FeatureSet {
	fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
		Self {
			features: iter.into_iter().collect(),
		}
	}
}

impl Extend<Feature> for FeatureSet {
	fn extend<I: IntoIterator<Item = Feature>>(&mut self, iter: I) {
		for feature in iter {
			self.insert(feature);
		}
	}
}
