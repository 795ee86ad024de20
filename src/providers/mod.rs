//! Bridge provider clients
//!
//! Two external services move funds for a bridge operation:
//! - the relay service ferries BCH <-> SmartBCH (`hop`)
//! - the exchange service converts another asset into BCH first (`sideshift`)
//!
//! The tracker only talks to them through the traits below. Each client is
//! rebuilt from its persisted snapshot and bumps its revision on every
//! state change so the tracker knows when the record needs writing.

pub mod hop;
pub mod sideshift;

pub use hop::HopClient;
pub use sideshift::SideShiftClient;

use crate::config::ProvidersConfig;
use crate::error::TrackerResult;
use crate::record::{HopStage, HopStatus, ShiftStage, ShiftStatus};

use async_trait::async_trait;
use ethers::providers::{Http, Provider};
use std::time::Duration;

/// Relay service client
#[async_trait]
pub trait RelayClient: Send {
    fn stage(&self) -> HopStage;
    fn deposit_address(&self) -> Option<&str>;
    fn bch_tx_id(&self) -> Option<&str>;
    fn sbch_tx_id(&self) -> Option<&str>;
    fn error_message(&self) -> Option<&str>;

    /// Advance the relay leg. Failures are kept inside the client and
    /// surfaced through `error_message`.
    async fn work(&mut self);

    fn cancel(&mut self, reason: &str);

    fn snapshot(&self) -> HopStatus;

    fn revision(&self) -> u64;
}

/// Exchange service client
#[async_trait]
pub trait ExchangeClient: Send {
    fn stage(&self) -> ShiftStage;
    fn order_id(&self) -> Option<&str>;
    fn deposit_address(&self) -> Option<&str>;
    fn memo(&self) -> Option<&str>;
    fn destination_tag(&self) -> Option<u64>;

    fn set_destination_address(&mut self, address: Option<&str>);

    /// Advance the exchange leg
    async fn work(&mut self) -> TrackerResult<()>;

    fn cancel(&mut self, reason: &str);

    fn snapshot(&self) -> ShiftStatus;

    fn revision(&self) -> u64;
}

/// Builds provider clients from persisted snapshots
pub trait ProviderFactory: Send + Sync {
    fn relay(&self, status: &HopStatus) -> Box<dyn RelayClient>;
    fn exchange(&self, status: &ShiftStatus) -> Box<dyn ExchangeClient>;
}

/// Factory for the HTTP backed clients
pub struct HttpProviderFactory {
    config: ProvidersConfig,
    relay_http: reqwest::Client,
    exchange_http: reqwest::Client,
    sbch: Provider<Http>,
}

impl HttpProviderFactory {
    pub fn new(config: ProvidersConfig) -> TrackerResult<Self> {
        let relay_http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.relay.request_timeout_ms))
            .build()?;
        let exchange_http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.exchange.request_timeout_ms))
            .build()?;
        let sbch = Provider::<Http>::try_from(config.relay.sbch_rpc_url.as_str()).map_err(|e| {
            crate::error::TrackerError::Config(format!(
                "invalid SmartBCH RPC url {}: {}",
                config.relay.sbch_rpc_url, e
            ))
        })?;

        Ok(Self {
            config,
            relay_http,
            exchange_http,
            sbch,
        })
    }
}

impl ProviderFactory for HttpProviderFactory {
    fn relay(&self, status: &HopStatus) -> Box<dyn RelayClient> {
        Box::new(HopClient::from_status(
            status.clone(),
            self.relay_http.clone(),
            self.sbch.clone(),
            &self.config.relay,
        ))
    }

    fn exchange(&self, status: &ShiftStatus) -> Box<dyn ExchangeClient> {
        Box::new(SideShiftClient::from_status(
            status.clone(),
            self.exchange_http.clone(),
            &self.config.exchange,
        ))
    }
}

/// Error body shared by both services: `{"error": {"message": "..."}}`
#[derive(Debug, serde::Deserialize)]
pub(crate) struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct ApiErrorMessage {
    pub message: String,
}

/// Turn a non-success response into its error message
pub(crate) async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    match response.json::<ApiErrorBody>().await {
        Ok(body) => body.error.message,
        Err(_) => format!("request failed with status {}", status),
    }
}

/// Store `value` in `slot`, reporting whether anything changed
pub(crate) fn replace_if_changed<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

/// Local HTTP server replaying scripted provider replies
#[cfg(test)]
pub(crate) mod testing {
    use axum::{http::StatusCode, Json, Router};
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replies served in order, one per request. Request bodies are kept.
    #[derive(Clone, Default)]
    pub struct Replies {
        replies: Arc<Mutex<VecDeque<(StatusCode, Value)>>>,
        requests: Arc<Mutex<Vec<Value>>>,
    }

    impl Replies {
        pub fn new(replies: Vec<(StatusCode, Value)>) -> Self {
            Self {
                replies: Arc::new(Mutex::new(replies.into())),
                requests: Arc::default(),
            }
        }

        pub fn ok(bodies: Vec<Value>) -> Self {
            Self::new(bodies.into_iter().map(|b| (StatusCode::OK, b)).collect())
        }

        pub fn next(&self, request: Option<Value>) -> (StatusCode, Json<Value>) {
            if let Some(request) = request {
                self.requests.lock().unwrap().push(request);
            }
            match self.replies.lock().unwrap().pop_front() {
                Some((status, body)) => (status, Json(body)),
                None => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": { "message": "no scripted reply" } })),
                ),
            }
        }

        pub fn requests(&self) -> Vec<Value> {
            self.requests.lock().unwrap().clone()
        }

        pub fn remaining(&self) -> usize {
            self.replies.lock().unwrap().len()
        }
    }

    /// Serve `router` on an ephemeral local port and return its base url
    pub async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }
}
