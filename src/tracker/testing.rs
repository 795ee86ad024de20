//! Scripted provider clients for tracker tests

use crate::error::{TrackerError, TrackerResult};
use crate::providers::{ExchangeClient, ProviderFactory, RelayClient};
use crate::record::{
    BridgeTransactionRecord, HopStage, HopStatus, NewBridgeTransaction, ShiftStage, ShiftStatus,
};

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const HASH: &str = "0x7d1f6d1c0f3b1a9e6b0b3c3fa7f8b0c51d2f7a8e9c0b1d2e3f405162738495a6";

pub fn record(method_id: &str) -> BridgeTransactionRecord {
    record_with_hash(method_id, HASH)
}

pub fn record_with_hash(method_id: &str, hash: &str) -> BridgeTransactionRecord {
    NewBridgeTransaction {
        hash: hash.to_string(),
        method_id: method_id.to_string(),
        src_chain_id: 1,
        symbol: method_id.to_uppercase(),
        initial_amount: "0.5".to_string(),
        direction: Default::default(),
        destination_address: "0xdestination".to_string(),
    }
    .into_record("bch")
    .unwrap()
}

/// Observations shared between a factory and the clients it built
#[derive(Clone, Default)]
pub struct Calls {
    relay_work: Arc<AtomicUsize>,
    relay_in_flight: Arc<AtomicUsize>,
    relay_max_in_flight: Arc<AtomicUsize>,
    exchange_work: Arc<AtomicUsize>,
    relay_cancels: Arc<Mutex<Vec<String>>>,
    exchange_cancels: Arc<Mutex<Vec<String>>>,
    exchange_destination: Arc<Mutex<Option<String>>>,
}

impl Calls {
    pub fn relay_work_calls(&self) -> usize {
        self.relay_work.load(Ordering::SeqCst)
    }

    /// Most relay `work` calls that were running at the same time
    pub fn relay_max_in_flight(&self) -> usize {
        self.relay_max_in_flight.load(Ordering::SeqCst)
    }

    pub fn exchange_work_calls(&self) -> usize {
        self.exchange_work.load(Ordering::SeqCst)
    }

    pub fn relay_cancels(&self) -> Vec<String> {
        self.relay_cancels.lock().unwrap().clone()
    }

    pub fn exchange_cancels(&self) -> Vec<String> {
        self.exchange_cancels.lock().unwrap().clone()
    }

    pub fn exchange_destination(&self) -> Option<String> {
        self.exchange_destination.lock().unwrap().clone()
    }
}

/// Relay that moves through a fixed list of stages, one per `work` call
pub struct ScriptedRelay {
    status: HopStatus,
    script: VecDeque<HopStage>,
    delay: Option<Duration>,
    calls: Calls,
    revision: u64,
}

#[async_trait]
impl RelayClient for ScriptedRelay {
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
        self.calls.relay_work.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.calls.relay_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.calls
            .relay_max_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.relay_in_flight.fetch_sub(1, Ordering::SeqCst);

        let Some(next) = self.script.pop_front() else {
            return;
        };
        if self.status.stage.advance_to(next) {
            match next {
                HopStage::Deposit => {
                    self.status.deposit_address = Some("relay-deposit".to_string())
                }
                HopStage::Sent | HopStage::Settled => {
                    self.status.bch_tx_id = Some("bch-tx".to_string());
                    self.status.sbch_tx_id = Some("sbch-tx".to_string());
                }
                _ => {}
            }
            self.revision += 1;
        }
    }

    fn cancel(&mut self, reason: &str) {
        self.calls
            .relay_cancels
            .lock()
            .unwrap()
            .push(reason.to_string());
        self.status.error_message = Some(reason.to_string());
        self.status.stage.advance_to(HopStage::Cancelled);
        self.revision += 1;
    }

    fn snapshot(&self) -> HopStatus {
        self.status.clone()
    }

    fn revision(&self) -> u64 {
        self.revision
    }
}

/// Exchange that returns scripted stages or errors, one per `work` call
pub struct ScriptedExchange {
    status: ShiftStatus,
    script: VecDeque<Result<ShiftStage, String>>,
    calls: Calls,
    revision: u64,
}

#[async_trait]
impl ExchangeClient for ScriptedExchange {
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
        *self.calls.exchange_destination.lock().unwrap() = address.map(String::from);
        if self.status.destination_address.as_deref() != address {
            self.status.destination_address = address.map(String::from);
            self.revision += 1;
        }
    }

    async fn work(&mut self) -> TrackerResult<()> {
        self.calls.exchange_work.fetch_add(1, Ordering::SeqCst);

        match self.script.pop_front() {
            Some(Ok(next)) => {
                if self.status.stage.advance_to(next) {
                    if next == ShiftStage::Deposit {
                        self.status.order_id = Some("order-1".to_string());
                        self.status.deposit_address = Some("shift-deposit".to_string());
                        self.status.memo = Some("memo-1".to_string());
                    }
                    self.revision += 1;
                }
                Ok(())
            }
            Some(Err(message)) => Err(TrackerError::Exchange(message)),
            None => Ok(()),
        }
    }

    fn cancel(&mut self, reason: &str) {
        self.calls
            .exchange_cancels
            .lock()
            .unwrap()
            .push(reason.to_string());
        self.status.error_message = Some(reason.to_string());
        self.revision += 1;
    }

    fn snapshot(&self) -> ShiftStatus {
        self.status.clone()
    }

    fn revision(&self) -> u64 {
        self.revision
    }
}

/// Builds scripted clients; every client shares the factory's calls
pub struct ScriptedFactory {
    relay_script: Vec<HopStage>,
    exchange_script: Vec<Result<ShiftStage, String>>,
    relay_delay: Option<Duration>,
    pub calls: Calls,
}

impl ScriptedFactory {
    pub fn new(
        relay_script: Vec<HopStage>,
        exchange_script: Vec<Result<ShiftStage, String>>,
    ) -> Self {
        Self {
            relay_script,
            exchange_script,
            relay_delay: None,
            calls: Calls::default(),
        }
    }

    /// Make every relay `work` call take `delay`
    pub fn with_relay_delay(mut self, delay: Duration) -> Self {
        self.relay_delay = Some(delay);
        self
    }
}

impl ProviderFactory for ScriptedFactory {
    fn relay(&self, status: &HopStatus) -> Box<dyn RelayClient> {
        Box::new(ScriptedRelay {
            status: status.clone(),
            script: self.relay_script.iter().copied().collect(),
            delay: self.relay_delay,
            calls: self.calls.clone(),
            revision: 0,
        })
    }

    fn exchange(&self, status: &ShiftStatus) -> Box<dyn ExchangeClient> {
        Box::new(ScriptedExchange {
            status: status.clone(),
            script: self.exchange_script.iter().cloned().collect(),
            calls: self.calls.clone(),
            revision: 0,
        })
    }
}
