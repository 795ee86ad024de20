//! One bridge operation being advanced
//!
//! A session owns the record and both provider clients. Each cycle drives
//! the relay, merges both legs' stages into the display state, then writes
//! the record back when either client changed since the last write.

use super::view::{
    waiting_for_confirmations, BridgeView, DisplayState, RenderContext, STATUS_ARRIVED,
    STATUS_CANCELLED, STATUS_INITIALIZING, STATUS_INITIALIZING_SHIFT, STATUS_SENT,
    STATUS_WAITING_FOR_DEPOSIT,
};
use crate::error::TrackerResult;
use crate::providers::{ExchangeClient, ProviderFactory, RelayClient};
use crate::record::{BridgeTransactionRecord, HopStage, RecordUpdate, ShiftStage};
use crate::state::TransactionStore;

use tracing::{debug, warn};

/// Result of one advance cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Another cycle should follow
    pub reschedule: bool,
    /// The record was written
    pub persisted: bool,
}

pub struct BridgeSession {
    record: BridgeTransactionRecord,
    relay: Box<dyn RelayClient>,
    exchange: Box<dyn ExchangeClient>,
    display: DisplayState,
    chain_name: Option<String>,
    /// Client revisions at the last write
    written: (u64, u64),
}

impl BridgeSession {
    pub fn new(
        record: BridgeTransactionRecord,
        factory: &dyn ProviderFactory,
        chain_name: Option<String>,
    ) -> Self {
        let relay = factory.relay(&record.hop_status);
        let exchange = factory.exchange(&record.shift_status);
        let display = DisplayState::from_record(&record);

        Self {
            record,
            relay,
            exchange,
            display,
            chain_name,
            written: (0, 0),
        }
    }

    pub fn hash(&self) -> &str {
        &self.record.hash
    }

    pub fn relay_stage(&self) -> HopStage {
        self.relay.stage()
    }

    pub fn display(&self) -> &DisplayState {
        &self.display
    }

    /// Run one cycle
    pub async fn advance(&mut self, store: &dyn TransactionStore) -> TrackerResult<CycleOutcome> {
        let relay_before = self.relay.stage();
        self.relay.work().await;
        if self.relay.stage() != relay_before {
            crate::metrics::record_stage("relay", self.relay.stage().as_str());
        }

        let exchange_before = self.exchange.stage();
        if let Err(e) = self.merge(true).await {
            let reason = e.to_string();
            warn!("Exchange step failed for {}: {}", self.record.hash, reason);
            crate::metrics::record_exchange_failure();

            self.exchange.cancel(&reason);
            self.relay.cancel(&reason);
            crate::metrics::record_stage("relay", self.relay.stage().as_str());

            // reflect the cancellation without driving the exchange again
            self.merge(false).await?;
        }
        if self.exchange.stage() != exchange_before {
            crate::metrics::record_stage("exchange", self.exchange.stage().as_str());
        }

        let reschedule = !self.relay.stage().is_terminal();
        let persisted = self.write_if_changed(store).await?;

        Ok(CycleOutcome {
            reschedule,
            persisted,
        })
    }

    /// Merge both legs' stages into the display state
    async fn merge(&mut self, drive_exchange: bool) -> TrackerResult<()> {
        match self.relay.stage() {
            HopStage::Init => self.display.set_status(STATUS_INITIALIZING),
            HopStage::Deposit if self.record.needs_exchange() => {
                if drive_exchange {
                    self.exchange
                        .set_destination_address(self.relay.deposit_address());
                    self.exchange.work().await?;
                }

                match self.exchange.stage() {
                    ShiftStage::Init => self.display.set_status(STATUS_INITIALIZING_SHIFT),
                    ShiftStage::Deposit => {
                        self.display.order_id = self.exchange.order_id().map(String::from);
                        self.display.deposit_address =
                            self.exchange.deposit_address().map(String::from);
                        if let Some(memo) = self.exchange.memo() {
                            self.display.memo = Some(memo.to_string());
                        }
                        if let Some(tag) = self.exchange.destination_tag() {
                            self.display.destination_tag = Some(tag);
                        }
                        self.display.set_status(STATUS_WAITING_FOR_DEPOSIT);
                    }
                    ShiftStage::Confirmation => {
                        self.display
                            .set_status(waiting_for_confirmations(&self.record.symbol));
                        self.display.deposit_address = None;
                    }
                    // the relay picks up from here on its own
                    ShiftStage::Settled => {}
                }
            }
            HopStage::Deposit => {
                self.display.deposit_address = self.relay.deposit_address().map(String::from);
                self.display.set_status(STATUS_WAITING_FOR_DEPOSIT);
            }
            HopStage::Sent => {
                self.capture_tx_ids();
                self.display.set_status(STATUS_SENT);
            }
            HopStage::Settled => {
                self.capture_tx_ids();
                self.display.set_status(STATUS_ARRIVED);
            }
            HopStage::Cancelled => self.display.set_status(STATUS_CANCELLED),
        }

        Ok(())
    }

    fn capture_tx_ids(&mut self) {
        self.display.deposit_address = None;
        self.display.bch_tx_id = self.relay.bch_tx_id().map(String::from);
        self.display.sbch_tx_id = self.relay.sbch_tx_id().map(String::from);
    }

    async fn write_if_changed(&mut self, store: &dyn TransactionStore) -> TrackerResult<bool> {
        let revisions = (self.relay.revision(), self.exchange.revision());
        if revisions == self.written {
            return Ok(false);
        }

        self.record.hop_status = self.relay.snapshot();
        self.record.shift_status = self.exchange.snapshot();

        if self.record.is_placeholder() {
            self.written = revisions;
            return Ok(false);
        }

        store.persist(RecordUpdate::from(&self.record)).await?;
        self.written = revisions;
        crate::metrics::record_write();
        debug!("Persisted bridge transaction {}", self.record.hash);

        Ok(true)
    }

    pub fn view(&self) -> BridgeView {
        BridgeView::render(
            &self.record,
            &self.display,
            RenderContext {
                relay_stage: self.relay.stage(),
                exchange_stage: self.exchange.stage(),
                relay_error: self.relay.error_message(),
                chain_name: self.chain_name.as_deref(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{MemoryStore, MockTransactionStore};
    use crate::tracker::testing::{record, ScriptedFactory};

    async fn run_cycles(
        session: &mut BridgeSession,
        store: &dyn TransactionStore,
        max: usize,
    ) -> Vec<CycleOutcome> {
        let mut outcomes = Vec::new();
        for _ in 0..max {
            let outcome = session.advance(store).await.unwrap();
            outcomes.push(outcome);
            if !outcome.reschedule {
                break;
            }
        }
        outcomes
    }

    #[tokio::test]
    async fn test_direct_method_shows_relay_deposit_address() {
        let store = MemoryStore::new();
        let record = record("bch");
        store.create(record.clone()).await.unwrap();

        let factory = ScriptedFactory::new(vec![HopStage::Deposit], vec![]);
        let mut session = BridgeSession::new(record, &factory, None);

        session.advance(&store).await.unwrap();
        assert_eq!(session.display().status_text.as_deref(), Some(STATUS_WAITING_FOR_DEPOSIT));
        assert_eq!(session.display().deposit_address.as_deref(), Some("relay-deposit"));
        assert_eq!(factory.calls.exchange_work_calls(), 0);
    }

    #[tokio::test]
    async fn test_exchange_method_shows_exchange_deposit_address() {
        let store = MemoryStore::new();
        let record = record("xlm");
        store.create(record.clone()).await.unwrap();

        let factory = ScriptedFactory::new(
            vec![HopStage::Deposit, HopStage::Deposit],
            vec![Ok(ShiftStage::Init), Ok(ShiftStage::Deposit)],
        );
        let mut session = BridgeSession::new(record, &factory, None);

        session.advance(&store).await.unwrap();
        assert_eq!(
            session.display().status_text.as_deref(),
            Some(STATUS_INITIALIZING_SHIFT)
        );

        session.advance(&store).await.unwrap();
        let display = session.display();
        assert_eq!(display.deposit_address.as_deref(), Some("shift-deposit"));
        assert_eq!(display.order_id.as_deref(), Some("order-1"));
        assert_eq!(display.memo.as_deref(), Some("memo-1"));
        assert_eq!(display.status_text.as_deref(), Some(STATUS_WAITING_FOR_DEPOSIT));
        assert_eq!(
            factory.calls.exchange_destination().as_deref(),
            Some("relay-deposit")
        );
    }

    #[tokio::test]
    async fn test_lockstep_scenario_arrives() {
        let store = MemoryStore::new();
        let record = record("btc");
        store.create(record.clone()).await.unwrap();

        let factory = ScriptedFactory::new(
            vec![
                HopStage::Init,
                HopStage::Deposit,
                HopStage::Deposit,
                HopStage::Deposit,
                HopStage::Sent,
                HopStage::Settled,
            ],
            vec![
                Ok(ShiftStage::Deposit),
                Ok(ShiftStage::Confirmation),
                Ok(ShiftStage::Settled),
            ],
        );
        let mut session = BridgeSession::new(record.clone(), &factory, Some("Bitcoin".into()));

        let outcomes = run_cycles(&mut session, &store, 20).await;
        assert_eq!(outcomes.len(), 6);
        assert!(!outcomes.last().unwrap().reschedule);

        let view = session.view();
        assert_eq!(view.status_text.as_deref(), Some(STATUS_ARRIVED));
        assert!(view.deposit.is_none());
        assert!(view.settled);
        assert_eq!(view.summary, "Sending 0.5 BTC from Bitcoin network");

        let stored = store.get(&record.hash).await.unwrap().unwrap();
        assert_eq!(stored.hop_status.stage, HopStage::Settled);
        assert_eq!(stored.shift_status.stage, ShiftStage::Settled);
        assert_eq!(stored.hop_status.bch_tx_id.as_deref(), Some("bch-tx"));
    }

    #[tokio::test]
    async fn test_confirmation_clears_deposit_address() {
        let store = MemoryStore::new();
        let record = record("btc");
        store.create(record.clone()).await.unwrap();

        let factory = ScriptedFactory::new(
            vec![HopStage::Deposit, HopStage::Deposit],
            vec![Ok(ShiftStage::Deposit), Ok(ShiftStage::Confirmation)],
        );
        let mut session = BridgeSession::new(record, &factory, None);

        session.advance(&store).await.unwrap();
        assert!(session.display().deposit_address.is_some());

        session.advance(&store).await.unwrap();
        assert!(session.display().deposit_address.is_none());
        assert_eq!(
            session.display().status_text.as_deref(),
            Some("Waiting for BTC confirmations")
        );
    }

    #[tokio::test]
    async fn test_exchange_failure_cancels_both_legs() {
        let store = MemoryStore::new();
        let record = record("eth");
        store.create(record.clone()).await.unwrap();

        let factory = ScriptedFactory::new(
            vec![HopStage::Deposit],
            vec![Err("rate expired".to_string())],
        );
        let mut session = BridgeSession::new(record.clone(), &factory, None);

        let outcome = session.advance(&store).await.unwrap();
        assert!(!outcome.reschedule);
        assert!(outcome.persisted);
        assert_eq!(session.relay_stage(), HopStage::Cancelled);
        assert_eq!(session.display().status_text.as_deref(), Some(STATUS_CANCELLED));
        assert_eq!(factory.calls.relay_cancels(), vec!["rate expired".to_string()]);
        assert_eq!(factory.calls.exchange_cancels(), vec!["rate expired".to_string()]);
        assert_eq!(factory.calls.exchange_work_calls(), 1);

        let stored = store.get(&record.hash).await.unwrap().unwrap();
        assert_eq!(stored.hop_status.stage, HopStage::Cancelled);
        assert_eq!(
            stored.shift_status.error_message.as_deref(),
            Some("rate expired")
        );
        assert_eq!(session.view().error_message.as_deref(), Some("rate expired"));
    }

    #[tokio::test]
    async fn test_persists_only_on_change() {
        let factory = ScriptedFactory::new(
            vec![HopStage::Init, HopStage::Deposit, HopStage::Deposit],
            vec![],
        );
        let record = record("bch");

        let mut store = MockTransactionStore::new();
        store
            .expect_persist()
            .times(1)
            .returning(|update| {
                assert_eq!(update.hop_status.unwrap().stage, HopStage::Deposit);
                Ok(BridgeTransactionRecord::default())
            });

        let mut session = BridgeSession::new(record, &factory, None);
        let first = session.advance(&store).await.unwrap();
        let second = session.advance(&store).await.unwrap();
        let third = session.advance(&store).await.unwrap();

        assert!(!first.persisted);
        assert!(second.persisted);
        assert!(!third.persisted);
    }

    #[tokio::test]
    async fn test_placeholder_is_never_written() {
        let factory = ScriptedFactory::new(vec![HopStage::Deposit], vec![]);
        let mut store = MockTransactionStore::new();
        store.expect_persist().never();

        let mut session = BridgeSession::new(BridgeTransactionRecord::placeholder(), &factory, None);
        let outcome = session.advance(&store).await.unwrap();
        assert!(!outcome.persisted);
    }

    #[tokio::test]
    async fn test_failed_write_is_retried_next_cycle() {
        let factory = ScriptedFactory::new(vec![HopStage::Deposit, HopStage::Deposit], vec![]);
        let mut store = MockTransactionStore::new();
        let mut seq = mockall::Sequence::new();
        store
            .expect_persist()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(crate::error::TrackerError::Internal("disk full".into())));
        store
            .expect_persist()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(BridgeTransactionRecord::default()));

        let mut session = BridgeSession::new(record("bch"), &factory, None);
        assert!(session.advance(&store).await.is_err());
        assert!(session.advance(&store).await.unwrap().persisted);
    }
}
