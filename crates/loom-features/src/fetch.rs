// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! One-shot remote fetch.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::error::TransportError;

/// SDK version for identification.
pub(crate) const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
/// SDK name for identification.
pub(crate) const SDK_NAME: &str = "loom-features-rust";

pub(crate) fn user_agent() -> String {
	format!("{SDK_NAME}/{SDK_VERSION}")
}

/// Performs a single request for a feature payload.
///
/// Every call completes exactly once, with the raw response body or an error.
/// Retries, if any, are the transport's business.
#[async_trait]
pub trait FetchTransport: Send + Sync {
	async fn fetch(&self, url: &str) -> Result<Vec<u8>, TransportError>;
}

/// Configuration for [`HttpFetchTransport`].
#[derive(Debug, Clone)]
pub struct HttpFetchConfig {
	/// Timeout for the whole request.
	pub request_timeout: Duration,
	/// Headers added to every request, e.g. `Authorization`.
	pub headers: HashMap<String, String>,
}

impl Default for HttpFetchConfig {
	fn default() -> Self {
		Self {
			request_timeout: Duration::from_secs(30),
			headers: HashMap::new(),
		}
	}
}

/// [`FetchTransport`] backed by a `reqwest` GET request.
#[derive(Debug, Clone)]
pub struct HttpFetchTransport {
	client: Client,
}

impl HttpFetchTransport {
	pub fn new(config: HttpFetchConfig) -> Result<Self, TransportError> {
		let mut headers = header_map(&config.headers)?;
		headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

		let client = Client::builder()
			.user_agent(user_agent())
			.timeout(config.request_timeout)
			.default_headers(headers)
			.build()?;

		Ok(Self { client })
	}

	/// Wraps an existing client; its default headers and timeout are used as-is.
	pub fn with_client(client: Client) -> Self {
		Self { client }
	}
}

#[async_trait]
impl FetchTransport for HttpFetchTransport {
	async fn fetch(&self, url: &str) -> Result<Vec<u8>, TransportError> {
		let url = Url::parse(url).map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))?;

		debug!(url = %url, "fetching features");

		let response = self.client.get(url.clone()).send().await?;
		let status = response.status();

		if !status.is_success() {
			return Err(TransportError::ServerError {
				status: status.as_u16(),
				message: response.text().await.unwrap_or_default(),
			});
		}

		let body = response.bytes().await?;
		debug!(url = %url, bytes = body.len(), "fetched features");

		Ok(body.to_vec())
	}
}

pub(crate) fn header_map(headers: &HashMap<String, String>) -> Result<HeaderMap, TransportError> {
	let mut map = HeaderMap::with_capacity(headers.len());
	for (name, value) in headers {
		let header_name =
			HeaderName::from_bytes(name.as_bytes()).map_err(|e| TransportError::InvalidHeader {
				name: name.clone(),
				reason: e.to_string(),
			})?;
		let header_value = HeaderValue::from_str(value).map_err(|e| TransportError::InvalidHeader {
			name: name.clone(),
			reason: e.to_string(),
		})?;
		map.insert(header_name, header_value);
	}
	Ok(map)
}
