//! Relay service client (hop.cash)
//!
//! Registers a transfer with the relay, then follows it until the funds
//! land on the destination chain. Transfers into SmartBCH are only
//! considered settled once the SmartBCH receipt is confirmed on chain.

use super::{error_message, replace_if_changed, RelayClient};
use crate::config::RelayConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::record::{HopDirection, HopStage, HopStatus};

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::H256;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, info, warn};

pub struct HopClient {
    status: HopStatus,
    http: reqwest::Client,
    sbch: Provider<Http>,
    api_url: String,
    max_consecutive_failures: u32,
    failures: u32,
    revision: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterTransferRequest<'a> {
    direction: &'a str,
    destination_address: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisteredTransfer {
    id: String,
    deposit_address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum TransferStatus {
    Waiting,
    Sent,
    Settled,
    Failed,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferState {
    status: TransferStatus,
    bch_tx_id: Option<String>,
    sbch_tx_id: Option<String>,
    error: Option<String>,
}

impl HopClient {
    pub fn from_status(
        status: HopStatus,
        http: reqwest::Client,
        sbch: Provider<Http>,
        config: &RelayConfig,
    ) -> Self {
        Self {
            status,
            http,
            sbch,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            max_consecutive_failures: config.max_consecutive_failures.max(1),
            failures: 0,
            revision: 0,
        }
    }

    fn bump(&mut self, changed: bool) {
        if changed {
            self.revision += 1;
        }
    }

    fn advance(&mut self, stage: HopStage) {
        let changed = self.status.stage.advance_to(stage);
        if changed {
            debug!("Relay transfer moved to {:?}", stage);
        }
        self.bump(changed);
    }

    /// Record transaction ids as they become known; known ids are kept
    fn record_tx_ids(&mut self, bch_tx_id: Option<String>, sbch_tx_id: Option<String>) {
        let mut changed = false;
        if bch_tx_id.is_some() {
            changed |= replace_if_changed(&mut self.status.bch_tx_id, bch_tx_id);
        }
        if sbch_tx_id.is_some() {
            changed |= replace_if_changed(&mut self.status.sbch_tx_id, sbch_tx_id);
        }
        self.bump(changed);
    }

    async fn register(&mut self) -> TrackerResult<()> {
        let destination = self
            .status
            .destination_address
            .clone()
            .ok_or_else(|| TrackerError::Relay("transfer has no destination address".into()))?;

        let request = RegisterTransferRequest {
            direction: self.status.direction.as_str(),
            destination_address: &destination,
        };

        let response = self
            .http
            .post(format!("{}/v1/transfers", self.api_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(relay_error(response).await);
        }

        let transfer: RegisteredTransfer = response.json().await?;
        info!(
            "Registered relay transfer {} ({})",
            transfer.id,
            self.status.direction.as_str()
        );

        self.status.transfer_id = Some(transfer.id);
        self.status.deposit_address = Some(transfer.deposit_address);
        self.bump(true);
        self.advance(HopStage::Deposit);

        Ok(())
    }

    async fn poll(&mut self, transfer_id: String) -> TrackerResult<()> {
        let response = self
            .http
            .get(format!("{}/v1/transfers/{}", self.api_url, transfer_id))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(relay_error(response).await);
        }

        let state: TransferState = response.json().await?;
        self.record_tx_ids(state.bch_tx_id, state.sbch_tx_id);

        match state.status {
            TransferStatus::Waiting => {}
            TransferStatus::Sent => self.advance(HopStage::Sent),
            TransferStatus::Settled => {
                if self.destination_confirmed().await? {
                    self.advance(HopStage::Settled);
                } else {
                    self.advance(HopStage::Sent);
                }
            }
            TransferStatus::Failed => {
                let reason = state
                    .error
                    .unwrap_or_else(|| "relay transfer failed".to_string());
                warn!("Relay transfer {} failed: {}", transfer_id, reason);
                self.cancel(&reason);
            }
        }

        Ok(())
    }

    /// Transfers into SmartBCH need a successful receipt on chain
    async fn destination_confirmed(&self) -> TrackerResult<bool> {
        if self.status.direction == HopDirection::Out {
            return Ok(true);
        }

        let tx_id = match self.status.sbch_tx_id.as_deref() {
            Some(tx_id) => tx_id,
            None => return Ok(false),
        };

        let hash = H256::from_str(tx_id)
            .map_err(|e| TrackerError::ChainRpc(format!("invalid SmartBCH tx id {}: {}", tx_id, e)))?;

        let receipt = self
            .sbch
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| TrackerError::ChainRpc(e.to_string()))?;

        Ok(receipt.map(|r| r.status == Some(1.into())).unwrap_or(false))
    }
}

/// Server errors are retried up to the failure threshold, anything else
/// is reported at once
async fn relay_error(response: reqwest::Response) -> TrackerError {
    let server_error = response.status().is_server_error();
    let message = error_message(response).await;
    if server_error {
        TrackerError::Unavailable(message)
    } else {
        TrackerError::Relay(message)
    }
}

#[async_trait]
impl RelayClient for HopClient {
    fn stage(&self) -> HopStage {
        self.status.stage
    }

    fn deposit_address(&self) -> Option<&str> {
        self.status.deposit_address.as_deref()
    }

    fn bch_tx_id(&self) -> Option<&str> {
        self.status.bch_tx_id.as_deref()
    }

    fn sbch_tx_id(&self) -> Option<&str> {
        self.status.sbch_tx_id.as_deref()
    }

    fn error_message(&self) -> Option<&str> {
        self.status.error_message.as_deref()
    }

    async fn work(&mut self) {
        let result = match (self.status.stage, self.status.transfer_id.clone()) {
            (stage, _) if stage.is_terminal() => return,
            (HopStage::Init, _) | (_, None) => self.register().await,
            (_, Some(transfer_id)) => self.poll(transfer_id).await,
        };

        match result {
            Ok(()) => {
                self.failures = 0;
                if self.status.stage != HopStage::Cancelled {
                    let changed = replace_if_changed(&mut self.status.error_message, None);
                    self.bump(changed);
                }
            }
            Err(e) => {
                self.failures += 1;
                warn!("Relay step failed ({} in a row): {}", self.failures, e);

                if !e.is_retryable() || self.failures >= self.max_consecutive_failures {
                    let changed =
                        replace_if_changed(&mut self.status.error_message, Some(e.to_string()));
                    self.bump(changed);
                }
            }
        }
    }

    fn cancel(&mut self, reason: &str) {
        let changed =
            replace_if_changed(&mut self.status.error_message, Some(reason.to_string()));
        self.bump(changed);
        self.advance(HopStage::Cancelled);
    }

    fn snapshot(&self) -> HopStatus {
        self.status.clone()
    }

    fn revision(&self) -> u64 {
        self.revision
    }
}
