//! JSON-RPC browser driver client.
//!
//! The browser itself (and its fingerprinting) lives in a separate driver
//! daemon. This client speaks to it over HTTP with four methods:
//!
//! | method            | params                  | result            |
//! |-------------------|-------------------------|-------------------|
//! | `driver.open`     | `[headless]`            | handle id         |
//! | `driver.navigate` | `[handle, url]`         | `null`            |
//! | `driver.interact` | `[handle, action]`      | `InteractOutcome` |
//! | `driver.close`    | `[handle]`              | `null`            |
//!
//! `action` and the outcome use the tagged JSON forms of
//! [`booker::Action`] and [`booker::InteractOutcome`].

use std::time::Duration;

use async_trait::async_trait;
use booker::{Action, BrowserDriver, DriverError, DriverHandle, InteractOutcome};
use jsonrpsee::core::ClientError;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use tracing::{debug, trace};

/// Default endpoint of the driver daemon.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:9515";

/// [`BrowserDriver`] backed by a JSON-RPC driver daemon.
pub struct RpcDriver {
	client: HttpClient,
	endpoint: String,
}

impl std::fmt::Debug for RpcDriver {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RpcDriver").field("endpoint", &self.endpoint).finish_non_exhaustive()
	}
}

impl RpcDriver {
	/// Builds a client for `endpoint`; every call is bounded by `request_timeout`.
	pub fn connect(endpoint: &str, request_timeout: Duration) -> Result<Self, DriverError> {
		let client = HttpClientBuilder::default()
			.request_timeout(request_timeout)
			.build(endpoint)
			.map_err(map_error)?;
		debug!(target = "booker.rpc", endpoint, timeout_ms = request_timeout.as_millis() as u64, "driver client ready");
		Ok(Self {
			client,
			endpoint: endpoint.to_string(),
		})
	}

	pub fn endpoint(&self) -> &str {
		&self.endpoint
	}
}

/// Maps a JSON-RPC client error onto driver errors.
///
/// A daemon-side error object whose message mentions a closed or unknown
/// context means the handle is gone.
pub fn map_error(err: ClientError) -> DriverError {
	match err {
		ClientError::RequestTimeout => DriverError::Timeout,
		ClientError::Call(obj) => {
			let message = obj.message().to_string();
			let lower = message.to_ascii_lowercase();
			if lower.contains("closed") || lower.contains("unknown handle") {
				DriverError::Closed(message)
			} else {
				DriverError::Protocol(format!("{} ({})", message, obj.code()))
			}
		}
		ClientError::ParseError(err) => DriverError::Protocol(err.to_string()),
		other => DriverError::Network(other.to_string()),
	}
}

#[async_trait]
impl BrowserDriver for RpcDriver {
	async fn open(&self, headless: bool) -> Result<DriverHandle, DriverError> {
		let id: String = self.client.request("driver.open", rpc_params![headless]).await.map_err(map_error)?;
		trace!(target = "booker.rpc", handle = %id, "opened");
		Ok(DriverHandle::new(id))
	}

	async fn navigate(&self, handle: &DriverHandle, url: &str) -> Result<(), DriverError> {
		let _: serde_json::Value = self
			.client
			.request("driver.navigate", rpc_params![handle.id(), url])
			.await
			.map_err(map_error)?;
		Ok(())
	}

	async fn interact(&self, handle: &DriverHandle, action: &Action) -> Result<InteractOutcome, DriverError> {
		trace!(target = "booker.rpc", %handle, action = action.name(), "interact");
		self.client
			.request("driver.interact", rpc_params![handle.id(), action])
			.await
			.map_err(map_error)
	}

	async fn close(&self, handle: DriverHandle) -> Result<(), DriverError> {
		let _: serde_json::Value = self
			.client
			.request("driver.close", rpc_params![handle.id()])
			.await
			.map_err(map_error)?;
		Ok(())
	}
}
