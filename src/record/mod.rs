//! Bridge transaction records
//!
//! A record is the persisted snapshot of one user-initiated bridge
//! operation. It holds the immutable parameters chosen when the bridge was
//! started plus the serialized state of both provider clients.

use crate::error::{TrackerError, TrackerResult};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Method that goes straight to the relay without an exchange step
pub const DIRECT_METHOD: &str = "bch";

/// Direction of the relay leg
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HopDirection {
    /// BCH -> SmartBCH
    #[default]
    In,
    /// SmartBCH -> BCH
    Out,
}

impl HopDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            HopDirection::In => "in",
            HopDirection::Out => "out",
        }
    }
}

/// Relay service stages. Declaration order is the progression order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HopStage {
    #[default]
    Init,
    Deposit,
    Sent,
    Settled,
    Cancelled,
}

impl HopStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, HopStage::Settled | HopStage::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HopStage::Init => "init",
            HopStage::Deposit => "deposit",
            HopStage::Sent => "sent",
            HopStage::Settled => "settled",
            HopStage::Cancelled => "cancelled",
        }
    }

    /// Move forward to `next`. Regressions and moves out of a terminal
    /// stage are ignored; cancellation wins from any non-terminal stage.
    /// Returns whether the stage changed.
    pub fn advance_to(&mut self, next: HopStage) -> bool {
        if self.is_terminal() || next <= *self {
            if next < *self {
                debug!("Ignoring relay stage regression {:?} -> {:?}", self, next);
            }
            return false;
        }
        *self = next;
        true
    }
}

/// Exchange service stages. Declaration order is the progression order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShiftStage {
    #[default]
    Init,
    Deposit,
    Confirmation,
    Settled,
}

impl ShiftStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShiftStage::Init => "init",
            ShiftStage::Deposit => "deposit",
            ShiftStage::Confirmation => "confirmation",
            ShiftStage::Settled => "settled",
        }
    }

    /// Same contract as [`HopStage::advance_to`]
    pub fn advance_to(&mut self, next: ShiftStage) -> bool {
        if next <= *self {
            return false;
        }
        *self = next;
        true
    }
}

/// Serialized relay client state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HopStatus {
    pub direction: HopDirection,
    pub stage: HopStage,
    pub transfer_id: Option<String>,
    pub deposit_address: Option<String>,
    pub destination_address: Option<String>,
    pub bch_tx_id: Option<String>,
    pub sbch_tx_id: Option<String>,
    pub error_message: Option<String>,
}

/// Serialized exchange client state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShiftStatus {
    pub stage: ShiftStage,
    pub order_id: Option<String>,
    pub deposit_address: Option<String>,
    pub memo: Option<String>,
    pub destination_tag: Option<u64>,
    pub destination_address: Option<String>,
    pub deposit_method: String,
    pub settle_method: String,
    pub error_message: Option<String>,
}

/// One user-initiated bridge operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeTransactionRecord {
    pub hash: String,
    pub method_id: String,
    pub src_chain_id: u64,
    pub symbol: String,
    pub initial_amount: String,
    pub hop_status: HopStatus,
    pub shift_status: ShiftStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BridgeTransactionRecord {
    /// Placeholder returned for unknown hashes. It has no hash, so it is
    /// never written back.
    pub fn placeholder() -> Self {
        Self::default()
    }

    pub fn is_placeholder(&self) -> bool {
        self.hash.is_empty()
    }

    /// Whether the pathway needs the exchange step before the relay leg
    pub fn needs_exchange(&self) -> bool {
        self.method_id != DIRECT_METHOD
    }

    /// Merge an update into this record. The hash and creation parameters
    /// never change.
    pub fn apply(&mut self, update: RecordUpdate) {
        if let Some(hop_status) = update.hop_status {
            self.hop_status = hop_status;
        }
        if let Some(shift_status) = update.shift_status {
            self.shift_status = shift_status;
        }
        self.updated_at = Utc::now();
    }
}

/// Partial write keyed by hash; absent fields keep their stored value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordUpdate {
    pub hash: String,
    pub hop_status: Option<HopStatus>,
    pub shift_status: Option<ShiftStatus>,
}

impl From<&BridgeTransactionRecord> for RecordUpdate {
    fn from(record: &BridgeTransactionRecord) -> Self {
        Self {
            hash: record.hash.clone(),
            hop_status: Some(record.hop_status.clone()),
            shift_status: Some(record.shift_status.clone()),
        }
    }
}

/// Parameters for starting to track a bridge operation
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBridgeTransaction {
    pub hash: String,
    pub method_id: String,
    pub src_chain_id: u64,
    pub symbol: String,
    pub initial_amount: String,
    #[serde(default)]
    pub direction: HopDirection,
    pub destination_address: String,
}

impl NewBridgeTransaction {
    /// Validate and build the initial record
    pub fn into_record(self, settle_method: &str) -> TrackerResult<BridgeTransactionRecord> {
        validate_hash(&self.hash)?;

        if self.method_id.is_empty() {
            return Err(TrackerError::InvalidTransaction("methodId is empty".into()));
        }
        if self.destination_address.is_empty() {
            return Err(TrackerError::InvalidTransaction(
                "destinationAddress is empty".into(),
            ));
        }
        if self
            .initial_amount
            .parse::<f64>()
            .map(|a| !a.is_finite() || a <= 0.0)
            .unwrap_or(true)
        {
            return Err(TrackerError::InvalidTransaction(format!(
                "invalid amount {}",
                self.initial_amount
            )));
        }

        let now = Utc::now();
        let method_id = self.method_id.to_lowercase();

        Ok(BridgeTransactionRecord {
            hash: self.hash,
            hop_status: HopStatus {
                direction: self.direction,
                destination_address: Some(self.destination_address),
                ..Default::default()
            },
            shift_status: ShiftStatus {
                deposit_method: method_id.clone(),
                settle_method: settle_method.to_string(),
                ..Default::default()
            },
            method_id,
            src_chain_id: self.src_chain_id,
            symbol: self.symbol,
            initial_amount: self.initial_amount,
            created_at: now,
            updated_at: now,
        })
    }
}

/// A transaction hash is 32 bytes of hex, with or without a `0x` prefix
pub fn validate_hash(hash: &str) -> TrackerResult<()> {
    let digits = hash.strip_prefix("0x").unwrap_or(hash);
    match hex::decode(digits) {
        Ok(bytes) if bytes.len() == 32 => Ok(()),
        _ => Err(TrackerError::InvalidTransaction(format!(
            "malformed transaction hash {}",
            hash
        ))),
    }
}
