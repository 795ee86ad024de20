//! What a bridge progress view shows
//!
//! `DisplayState` holds the fields the merge step updates as stages move;
//! `BridgeView` is the rendered, serializable form served to clients.

use crate::record::{BridgeTransactionRecord, HopStage, ShiftStage};

use serde::Serialize;

pub const STATUS_INITIALIZING: &str = "Initializing";
pub const STATUS_INITIALIZING_SHIFT: &str = "Initializing side shift";
pub const STATUS_WAITING_FOR_DEPOSIT: &str = "Waiting for deposit";
pub const STATUS_SENT: &str = "Funds sent to the cross-chain bridge";
pub const STATUS_ARRIVED: &str = "Funds arrived to destination";
pub const STATUS_CANCELLED: &str = "Bridge process cancelled";

const ORDER_URL: &str = "https://sideshift.ai/orders/";
const BCH_TX_URL: &str = "https://blockchair.com/bitcoin-cash/transaction/";
const SBCH_TX_URL: &str = "https://www.smartscan.cash/transaction/";

pub fn waiting_for_confirmations(symbol: &str) -> String {
    format!("Waiting for {} confirmations", symbol)
}

/// Display fields updated by the merge step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayState {
    pub status_text: Option<String>,
    pub deposit_address: Option<String>,
    pub memo: Option<String>,
    pub destination_tag: Option<u64>,
    pub order_id: Option<String>,
    pub bch_tx_id: Option<String>,
    pub sbch_tx_id: Option<String>,
}

impl DisplayState {
    /// Seed the display from a stored record
    pub fn from_record(record: &BridgeTransactionRecord) -> Self {
        let deposit_address = record
            .shift_status
            .deposit_address
            .clone()
            .or_else(|| record.hop_status.deposit_address.clone());

        Self {
            status_text: Some(STATUS_INITIALIZING.to_string()),
            deposit_address,
            memo: record.shift_status.memo.clone(),
            destination_tag: record.shift_status.destination_tag,
            order_id: record.shift_status.order_id.clone(),
            bch_tx_id: record.hop_status.bch_tx_id.clone(),
            sbch_tx_id: record.hop_status.sbch_tx_id.clone(),
        }
    }

    pub fn set_status(&mut self, text: impl Into<String>) {
        self.status_text = Some(text.into());
    }
}

/// Merged progress of both legs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BridgePhase {
    #[default]
    Init,
    AwaitingDeposit,
    InTransit,
    Settled,
    Cancelled,
}

impl From<HopStage> for BridgePhase {
    fn from(stage: HopStage) -> Self {
        match stage {
            HopStage::Init => BridgePhase::Init,
            HopStage::Deposit => BridgePhase::AwaitingDeposit,
            HopStage::Sent => BridgePhase::InTransit,
            HopStage::Settled => BridgePhase::Settled,
            HopStage::Cancelled => BridgePhase::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositInstructions {
    pub address: String,
    pub short_address: String,
    pub memo: Option<String>,
    pub destination_tag: Option<u64>,
    pub notices: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplorerLink {
    pub label: String,
    pub url: String,
}

/// Rendered bridge progress
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeView {
    pub hash: String,
    pub title: String,
    pub summary: String,
    pub status_text: Option<String>,
    pub phase: BridgePhase,
    pub exchange_stage: Option<ShiftStage>,
    pub in_progress: bool,
    pub settled: bool,
    pub deposit: Option<DepositInstructions>,
    pub order_link: Option<ExplorerLink>,
    pub bch_tx_link: Option<ExplorerLink>,
    pub sbch_tx_link: Option<ExplorerLink>,
    pub error_message: Option<String>,
}

/// Inputs of [`BridgeView::render`] besides the record and display state
pub struct RenderContext<'a> {
    pub relay_stage: HopStage,
    pub exchange_stage: ShiftStage,
    pub relay_error: Option<&'a str>,
    pub chain_name: Option<&'a str>,
}

impl BridgeView {
    pub fn render(
        record: &BridgeTransactionRecord,
        display: &DisplayState,
        ctx: RenderContext<'_>,
    ) -> Self {
        let chain = ctx.chain_name.unwrap_or("unknown");
        let deposit = display.deposit_address.as_ref().map(|address| {
            let mut notices = Vec::new();
            if let Some(memo) = &display.memo {
                notices.push(format!(
                    "Your {} deposit must contain the memo: \"{}\", otherwise the deposit might be lost",
                    record.method_id.to_uppercase(),
                    memo
                ));
            }
            if let Some(tag) = display.destination_tag {
                notices.push(format!(
                    "Your {} deposit must contain the Destination Tag: \"{}\", otherwise the deposit will be rejected by the network",
                    record.method_id.to_uppercase(),
                    tag
                ));
            }

            DepositInstructions {
                address: address.clone(),
                short_address: shorten(address, 10),
                memo: display.memo.clone(),
                destination_tag: display.destination_tag,
                notices,
            }
        });

        Self {
            hash: record.hash.clone(),
            title: format!("Bridge {}", record.symbol),
            summary: format!(
                "Sending {} {} from {} network",
                record.initial_amount, record.symbol, chain
            ),
            in_progress: display
                .status_text
                .as_deref()
                .map(shows_progress)
                .unwrap_or(false),
            status_text: display.status_text.clone(),
            phase: ctx.relay_stage.into(),
            exchange_stage: record.needs_exchange().then_some(ctx.exchange_stage),
            settled: ctx.relay_stage == HopStage::Settled,
            deposit,
            order_link: display.order_id.as_ref().map(|id| ExplorerLink {
                label: format!("sideshift.ai order {}", id),
                url: format!("{}{}", ORDER_URL, id),
            }),
            bch_tx_link: display.bch_tx_id.as_ref().map(|id| ExplorerLink {
                label: format!("BCH cross-chain tx {}", shorten(id, 5)),
                url: format!("{}{}", BCH_TX_URL, id),
            }),
            sbch_tx_link: display.sbch_tx_id.as_ref().map(|id| ExplorerLink {
                label: format!("SmartBCH cross-chain tx {}", shorten(id, 5)),
                url: format!("{}{}", SBCH_TX_URL, id),
            }),
            error_message: ctx.relay_error.map(String::from),
        }
    }
}

/// Progress indicator is shown until the bridge is cancelled or arrived
pub fn shows_progress(status: &str) -> bool {
    !(status.contains("cancelled") || status.contains("arrived to destination"))
}

/// Keep `size` characters at each end of text longer than 20 characters
pub fn shorten(text: &str, size: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() > 20 {
        let head: String = chars[..size.min(chars.len())].iter().collect();
        let tail: String = chars[chars.len().saturating_sub(size)..].iter().collect();
        return format!("{}...{}", head, tail);
    }
    text.to_string()
}
