//! Exchange service client (sideshift.ai)
//!
//! Creates a variable-rate shift from the user's asset into BCH, settling
//! at the relay's deposit address, then follows the shift until it
//! settles.

use super::{error_message, replace_if_changed, ExchangeClient};
use crate::config::ExchangeConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::record::{ShiftStage, ShiftStatus};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Deposit methods whose memo is a numeric destination tag
const DESTINATION_TAG_METHODS: &[&str] = &["xrp"];

pub struct SideShiftClient {
    status: ShiftStatus,
    http: reqwest::Client,
    api_url: String,
    affiliate_id: String,
    revision: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateShiftRequest<'a> {
    settle_address: &'a str,
    deposit_coin: &'a str,
    settle_coin: &'a str,
    affiliate_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedShift {
    id: String,
    deposit_address: String,
    deposit_memo: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShiftState {
    status: String,
}

impl SideShiftClient {
    pub fn from_status(status: ShiftStatus, http: reqwest::Client, config: &ExchangeConfig) -> Self {
        Self {
            status,
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            affiliate_id: config.affiliate_id.clone(),
            revision: 0,
        }
    }

    fn bump(&mut self, changed: bool) {
        if changed {
            self.revision += 1;
        }
    }

    async fn create_shift(&mut self, settle_address: String) -> TrackerResult<()> {
        let request = CreateShiftRequest {
            settle_address: &settle_address,
            deposit_coin: &self.status.deposit_method,
            settle_coin: &self.status.settle_method,
            affiliate_id: &self.affiliate_id,
        };

        let response = self
            .http
            .post(format!("{}/v2/shifts/variable", self.api_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TrackerError::Exchange(error_message(response).await));
        }

        let shift: CreatedShift = response.json().await?;
        info!(
            "Created shift {} ({} -> {})",
            shift.id, self.status.deposit_method, self.status.settle_method
        );

        let (memo, destination_tag) =
            deposit_instructions(&self.status.deposit_method, shift.deposit_memo);

        self.status.order_id = Some(shift.id);
        self.status.deposit_address = Some(shift.deposit_address);
        self.status.memo = memo;
        self.status.destination_tag = destination_tag;
        self.status.stage.advance_to(ShiftStage::Deposit);
        self.bump(true);

        Ok(())
    }

    async fn poll_shift(&mut self, order_id: String) -> TrackerResult<()> {
        let response = self
            .http
            .get(format!("{}/v2/shifts/{}", self.api_url, order_id))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TrackerError::Exchange(error_message(response).await));
        }

        let state: ShiftState = response.json().await?;
        match stage_for_status(&state.status)? {
            Some(stage) => {
                let changed = self.status.stage.advance_to(stage);
                if changed {
                    debug!("Shift {} moved to {:?}", order_id, stage);
                }
                self.bump(changed);
            }
            None => warn!("Unknown shift status {} for {}", state.status, order_id),
        }

        Ok(())
    }
}

/// Map a shift status onto a stage; refunds and expiry are failures
fn stage_for_status(status: &str) -> TrackerResult<Option<ShiftStage>> {
    match status {
        "waiting" => Ok(Some(ShiftStage::Deposit)),
        "pending" | "processing" | "review" | "settling" => Ok(Some(ShiftStage::Confirmation)),
        "settled" => Ok(Some(ShiftStage::Settled)),
        "expired" => Err(TrackerError::Exchange("shift expired".to_string())),
        "refund" | "refunding" | "refunded" => {
            Err(TrackerError::Exchange(format!("shift {}", status)))
        }
        _ => Ok(None),
    }
}

/// Split a deposit memo into a text memo or a numeric destination tag
fn deposit_instructions(method: &str, memo: Option<String>) -> (Option<String>, Option<u64>) {
    let memo = memo.filter(|m| !m.is_empty());
    if DESTINATION_TAG_METHODS.contains(&method) {
        if let Some(tag) = memo.as_deref().and_then(|m| m.parse::<u64>().ok()) {
            return (None, Some(tag));
        }
    }
    (memo, None)
}

#[async_trait]
impl ExchangeClient for SideShiftClient {
    fn stage(&self) -> ShiftStage {
        self.status.stage
    }

    fn order_id(&self) -> Option<&str> {
        self.status.order_id.as_deref()
    }

    fn deposit_address(&self) -> Option<&str> {
        self.status.deposit_address.as_deref()
    }

    fn memo(&self) -> Option<&str> {
        self.status.memo.as_deref()
    }

    fn destination_tag(&self) -> Option<u64> {
        self.status.destination_tag
    }

    fn set_destination_address(&mut self, address: Option<&str>) {
        let changed =
            replace_if_changed(&mut self.status.destination_address, address.map(String::from));
        self.bump(changed);
    }

    async fn work(&mut self) -> TrackerResult<()> {
        // cancelled shifts are left alone
        if self.status.error_message.is_some() {
            return Ok(());
        }

        match self.status.stage {
            ShiftStage::Init => match self.status.destination_address.clone() {
                Some(address) => self.create_shift(address).await,
                None => {
                    debug!("Shift waiting for a destination address");
                    Ok(())
                }
            },
            ShiftStage::Deposit | ShiftStage::Confirmation => match self.status.order_id.clone() {
                Some(order_id) => self.poll_shift(order_id).await,
                None => Err(TrackerError::Exchange(
                    "shift has no order id".to_string(),
                )),
            },
            ShiftStage::Settled => Ok(()),
        }
    }

    fn cancel(&mut self, reason: &str) {
        let changed =
            replace_if_changed(&mut self.status.error_message, Some(reason.to_string()));
        self.bump(changed);
    }

    fn snapshot(&self) -> ShiftStatus {
        self.status.clone()
    }

    fn revision(&self) -> u64 {
        self.revision
    }
}
