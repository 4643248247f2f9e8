use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use broker_trait::{BrokerPosition, OrderRequest};
use notification_service::{Alert, AlertType, NotificationService};
use risk_manager::{OrderSizer, SizedOrder};
use signal_parser::ParsedSignal;

use crate::audit::AuditStore;
use crate::broker::SharedBroker;
use crate::metrics::AgentMetrics;
use crate::types::{
    action_to_side, ChannelContext, ExecutionOutcome, ExecutionRequest, TrackedPosition,
};

#[derive(Debug, Clone)]
pub struct ExecutionPolicy {
    /// Hard cap on orders per signal in full-margin mode. The margin
    /// check alone is not a bound — margin data can lag reality.
    pub full_margin_max_orders: u32,
    /// How long to wait before polling for the resulting position.
    pub verify_delay: Duration,
}

/// Turns one parsed signal into one (standard) or several (full-margin)
/// broker orders: VALIDATE → SIZE → SUBMIT → VERIFY, all states terminal
/// after one pass. Retries belong to the connectivity layer — re-sending
/// an order here could double-fill.
pub struct TradeExecutor {
    broker: SharedBroker,
    sizer: OrderSizer,
    policy: ExecutionPolicy,
    tracker_tx: mpsc::Sender<TrackedPosition>,
}

impl TradeExecutor {
    pub fn new(
        broker: SharedBroker,
        sizer: OrderSizer,
        policy: ExecutionPolicy,
        tracker_tx: mpsc::Sender<TrackedPosition>,
    ) -> Self {
        Self {
            broker,
            sizer,
            policy,
            tracker_tx,
        }
    }

    pub async fn execute(
        &self,
        signal: &ParsedSignal,
        context: &ChannelContext,
    ) -> ExecutionOutcome {
        // 1. VALIDATE: connectivity and symbol tradability.
        if !self.broker.is_connected().await {
            match self.broker.connect().await {
                Ok(true) => {}
                Ok(false) => return ExecutionOutcome::failure("broker login refused"),
                Err(e) => {
                    return ExecutionOutcome::failure(format!("broker unreachable: {e}"));
                }
            }
        }

        let symbol_spec = match self.broker.ensure_symbol(&signal.symbol).await {
            Ok(spec) => spec,
            Err(e) => {
                return ExecutionOutcome::failure(format!(
                    "symbol {} not tradable: {e}",
                    signal.symbol
                ));
            }
        };
        let quote = match self.broker.get_quote(&signal.symbol).await {
            Ok(quote) => quote,
            Err(e) => return ExecutionOutcome::failure(format!("quote unavailable: {e}")),
        };
        let account = match self.broker.get_account().await {
            Ok(account) => account,
            Err(e) => return ExecutionOutcome::failure(format!("account unavailable: {e}")),
        };

        // 2. SIZE.
        let sized = match self.sizer.size(signal, &quote, &symbol_spec, &account) {
            Ok(sized) => sized,
            Err(e) => return ExecutionOutcome::failure(format!("sizing rejected: {e}")),
        };

        let order = build_order(signal, context, &sized);

        // 3. SUBMIT (+ 4. VERIFY).
        if context.full_margin {
            self.submit_full_margin(signal, context, &order).await
        } else {
            self.submit_single(signal, context, &order).await
        }
    }

    async fn submit_single(
        &self,
        signal: &ParsedSignal,
        context: &ChannelContext,
        order: &OrderRequest,
    ) -> ExecutionOutcome {
        let result = match self.broker.submit_order(order).await {
            Ok(result) => result,
            Err(e) => return ExecutionOutcome::failure(format!("order submission failed: {e}")),
        };
        if !result.accepted {
            return ExecutionOutcome::failure(format!("order rejected: {}", result.reason));
        }
        let ticket = result.ticket.unwrap_or_default();

        let verified = self.verify_tickets(&[ticket]).await;
        match verified.first() {
            Some(position) => {
                self.register(position, signal, context).await;
                ExecutionOutcome {
                    success: true,
                    reason: "order filled".to_string(),
                    tickets: vec![ticket],
                    total_volume: position.volume,
                }
            }
            None => ExecutionOutcome::failure(format!(
                "order {ticket} accepted but no open position found"
            )),
        }
    }

    /// Full-margin mode: keep submitting identical orders while the
    /// margin for one more stays within free balance, stopping at the
    /// first rejection or the configured order cap. One filled order is
    /// enough to count the signal as executed.
    async fn submit_full_margin(
        &self,
        signal: &ParsedSignal,
        context: &ChannelContext,
        order: &OrderRequest,
    ) -> ExecutionOutcome {
        let mut tickets: Vec<u64> = Vec::new();
        let mut total_volume = 0.0;
        let mut stop_reason = format!("order cap of {} reached", self.policy.full_margin_max_orders);

        for iteration in 0..self.policy.full_margin_max_orders {
            let account = match self.broker.get_account().await {
                Ok(account) => account,
                Err(e) => {
                    stop_reason = format!("account query failed: {e}");
                    break;
                }
            };
            let margin = match self
                .broker
                .margin_required(&order.symbol, order.volume)
                .await
            {
                Ok(margin) => margin,
                Err(e) => {
                    stop_reason = format!("margin query failed: {e}");
                    break;
                }
            };
            if margin > account.margin_free {
                stop_reason = format!(
                    "insufficient free margin ({:.2} needed, {:.2} available)",
                    margin, account.margin_free
                );
                break;
            }

            match self.broker.submit_order(order).await {
                Ok(result) if result.accepted => {
                    let ticket = result.ticket.unwrap_or_default();
                    tracing::info!(
                        "Full-margin order {}/{} accepted, ticket {}",
                        iteration + 1,
                        self.policy.full_margin_max_orders,
                        ticket
                    );
                    tickets.push(ticket);
                    total_volume += order.volume;
                }
                Ok(result) => {
                    stop_reason = format!("order rejected: {}", result.reason);
                    break;
                }
                Err(e) => {
                    stop_reason = format!("order submission failed: {e}");
                    break;
                }
            }
        }

        if tickets.is_empty() {
            return ExecutionOutcome::failure(format!("no orders filled ({stop_reason})"));
        }

        let verified = self.verify_tickets(&tickets).await;
        if verified.is_empty() {
            return ExecutionOutcome::failure(format!(
                "{} orders accepted but no open positions found",
                tickets.len()
            ));
        }
        for position in &verified {
            self.register(position, signal, context).await;
        }

        ExecutionOutcome {
            success: true,
            reason: format!("filled {} orders; stopped: {}", tickets.len(), stop_reason),
            tickets,
            total_volume,
        }
    }

    /// One bounded delay, then a positions poll. An accepted order with
    /// no resulting position is broker/client state divergence and is
    /// reported as a failure, never ignored.
    async fn verify_tickets(&self, tickets: &[u64]) -> Vec<BrokerPosition> {
        tokio::time::sleep(self.policy.verify_delay).await;

        match self.broker.get_positions().await {
            Ok(positions) => positions
                .into_iter()
                .filter(|p| tickets.contains(&p.ticket))
                .collect(),
            Err(e) => {
                tracing::warn!("Verification poll failed: {}", e);
                Vec::new()
            }
        }
    }

    async fn register(
        &self,
        position: &BrokerPosition,
        signal: &ParsedSignal,
        context: &ChannelContext,
    ) {
        let tracked = TrackedPosition {
            ticket: position.ticket,
            symbol: position.symbol.clone(),
            side: position.side,
            volume: position.volume,
            entry_price: position.price_open,
            stop_loss: signal.stop_loss,
            take_profit: signal.first_take_profit(),
            channel_name: context.name.clone(),
            opened_at: position.opened_at,
        };

        if self.tracker_tx.send(tracked).await.is_err() {
            tracing::warn!(
                "Position tracker is gone, ticket {} is not supervised",
                position.ticket
            );
        }
    }
}

fn build_order(
    signal: &ParsedSignal,
    context: &ChannelContext,
    sized: &SizedOrder,
) -> OrderRequest {
    OrderRequest {
        symbol: signal.symbol.clone(),
        side: action_to_side(signal.action),
        volume: sized.volume,
        price: sized.entry_price,
        stop_loss: signal.stop_loss,
        // The broker-side resting exit uses the nearest target.
        take_profit: Some(signal.first_take_profit()),
        deviation_points: sized.deviation_points,
        comment: format!("signal:{}", context.name),
    }
}

/// Dedicated execution task: consumes queued signals in arrival order,
/// records outcomes exactly once and surfaces failures to the operator.
pub async fn run_execution_queue(
    mut requests: mpsc::Receiver<ExecutionRequest>,
    executor: TradeExecutor,
    audit: Arc<AuditStore>,
    notifications: Arc<NotificationService>,
    metrics: Arc<Mutex<AgentMetrics>>,
) {
    while let Some(request) = requests.recv().await {
        let ExecutionRequest {
            signal,
            context,
            audit_id,
        } = request;

        tracing::info!(
            "Executing {} {} from {} ({})",
            signal.action,
            signal.symbol,
            context.name,
            if context.full_margin {
                "full-margin"
            } else {
                "standard"
            },
        );

        let outcome = executor.execute(&signal, &context).await;

        if audit_id >= 0 {
            if let Err(e) = audit.record_outcome(audit_id, &outcome).await {
                tracing::warn!("Failed to record execution outcome: {}", e);
            }
        }

        {
            let mut m = metrics.lock().unwrap();
            if outcome.success {
                m.trades_executed += 1;
                m.orders_submitted += outcome.tickets.len() as u64;
            } else {
                m.trades_failed += 1;
            }
        }

        let alert = if outcome.success {
            tracing::info!(
                "Executed {} {}: {} ({} order(s), {:.2} lots)",
                signal.action,
                signal.symbol,
                outcome.reason,
                outcome.tickets.len(),
                outcome.total_volume,
            );
            Alert::new(
                AlertType::TradeExecuted {
                    symbol: signal.symbol.clone(),
                    action: signal.action.to_string(),
                    orders: outcome.tickets.len(),
                    total_volume: outcome.total_volume,
                },
                "Trade Executed",
                format!(
                    "{} {} x{:.2} from {}\nSL {} | TP {:?}\n{}",
                    signal.action,
                    signal.symbol,
                    outcome.total_volume,
                    context.name,
                    signal.stop_loss,
                    signal.take_profits,
                    outcome.reason,
                ),
            )
        } else {
            tracing::warn!(
                "Execution failed for {} {} from {}: {}",
                signal.action,
                signal.symbol,
                context.name,
                outcome.reason,
            );
            Alert::new(
                AlertType::TradeFailed {
                    symbol: signal.symbol.clone(),
                    reason: outcome.reason.clone(),
                },
                "Trade Failed",
                format!(
                    "{} {} from {}: {}",
                    signal.action, signal.symbol, context.name, outcome.reason
                ),
            )
        };
        notifications.send_alert(alert);
    }

    tracing::info!("Execution queue drained, executor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex as StdMutex;

    use broker_trait::{
        AccountSummary, BrokerClient, Deal, OrderResult, OrderSide, Quote, SymbolSpec,
    };
    use risk_manager::SizingConfig;
    use signal_parser::{Parser, ParserConfig};

    /// Scriptable in-memory broker for executor tests.
    struct MockBroker {
        state: Arc<StdMutex<MockState>>,
    }

    #[derive(Default)]
    struct MockState {
        /// Pre-programmed replies for submit_order, consumed in order;
        /// when exhausted every submission is accepted.
        submissions: Vec<OrderResult>,
        next_ticket: u64,
        margin_free: f64,
        margin_per_lot: f64,
        /// Tickets that will show up in the verification poll.
        open_tickets: Vec<u64>,
        submitted: u64,
    }

    impl MockBroker {
        fn accepting(margin_free: f64) -> (Self, Arc<StdMutex<MockState>>) {
            let state = Arc::new(StdMutex::new(MockState {
                submissions: Vec::new(),
                next_ticket: 100,
                margin_free,
                margin_per_lot: 50.0,
                open_tickets: Vec::new(),
                submitted: 0,
            }));
            (
                Self {
                    state: Arc::clone(&state),
                },
                state,
            )
        }
    }

    #[async_trait]
    impl BrokerClient for MockBroker {
        async fn connect(&self) -> Result<bool> {
            Ok(true)
        }
        async fn is_connected(&self) -> bool {
            true
        }
        async fn get_quote(&self, _symbol: &str) -> Result<Quote> {
            Ok(Quote {
                bid: 3344.8,
                ask: 3345.1,
            })
        }
        async fn ensure_symbol(&self, _symbol: &str) -> Result<SymbolSpec> {
            Ok(SymbolSpec {
                point: 0.01,
                contract_size: 100.0,
                volume_min: 0.01,
                volume_max: 50.0,
                volume_step: 0.01,
                min_stop_distance_points: 30,
            })
        }
        async fn submit_order(&self, _order: &OrderRequest) -> Result<OrderResult> {
            let mut state = self.state.lock().unwrap();
            state.submitted += 1;
            if !state.submissions.is_empty() {
                return Ok(state.submissions.remove(0));
            }
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            state.open_tickets.push(ticket);
            // A fill consumes margin, like the real account would.
            let used = state.margin_per_lot;
            state.margin_free -= used;
            Ok(OrderResult {
                accepted: true,
                ticket: Some(ticket),
                reason: String::new(),
            })
        }
        async fn get_positions(&self) -> Result<Vec<BrokerPosition>> {
            let state = self.state.lock().unwrap();
            Ok(state
                .open_tickets
                .iter()
                .map(|&ticket| BrokerPosition {
                    ticket,
                    symbol: "XAUUSD".to_string(),
                    side: OrderSide::Buy,
                    volume: 0.01,
                    price_open: 3345.0,
                    price_current: 3345.0,
                    stop_loss: 3335.0,
                    take_profit: 3350.0,
                    profit: 0.0,
                    opened_at: Utc::now(),
                })
                .collect())
        }
        async fn get_deals(&self, _from: DateTime<Utc>, _to: DateTime<Utc>) -> Result<Vec<Deal>> {
            Ok(Vec::new())
        }
        async fn get_account(&self) -> Result<AccountSummary> {
            let state = self.state.lock().unwrap();
            Ok(AccountSummary {
                balance: 10_000.0,
                equity: 10_000.0,
                margin_free: state.margin_free,
            })
        }
        async fn margin_required(&self, _symbol: &str, _volume: f64) -> Result<f64> {
            Ok(self.state.lock().unwrap().margin_per_lot)
        }
        fn is_demo(&self) -> bool {
            true
        }
        fn broker_name(&self) -> &str {
            "mock"
        }
    }

    fn executor_for(broker: MockBroker) -> (TradeExecutor, mpsc::Receiver<TrackedPosition>) {
        let (tracker_tx, tracker_rx) = mpsc::channel(64);
        let executor = TradeExecutor::new(
            SharedBroker::new(Box::new(broker)),
            OrderSizer::new(SizingConfig::default()),
            ExecutionPolicy {
                full_margin_max_orders: 5,
                verify_delay: Duration::from_millis(0),
            },
            tracker_tx,
        );
        (executor, tracker_rx)
    }

    fn buy_signal() -> ParsedSignal {
        Parser::new(ParserConfig::default())
            .parse("BUY XAUUSD Entry: 3344-3346 SL: 3340 TP1: 3352 TP2: 3358")
            .unwrap()
    }

    fn context(full_margin: bool) -> ChannelContext {
        ChannelContext {
            channel_id: -1,
            name: "Test Channel".to_string(),
            trust_tier: crate::types::TrustTier::Standard,
            full_margin,
        }
    }

    #[tokio::test]
    async fn standard_mode_submits_once_and_registers() {
        let (broker, state) = MockBroker::accepting(10_000.0);
        let (executor, mut tracker_rx) = executor_for(broker);

        let outcome = executor.execute(&buy_signal(), &context(false)).await;

        assert!(outcome.success, "{}", outcome.reason);
        assert_eq!(outcome.tickets.len(), 1);
        assert_eq!(state.lock().unwrap().submitted, 1);

        let tracked = tracker_rx.recv().await.unwrap();
        assert_eq!(tracked.ticket, outcome.tickets[0]);
        assert_eq!(tracked.stop_loss, 3340.0);
        assert_eq!(tracked.take_profit, 3352.0);
    }

    #[tokio::test]
    async fn rejection_on_first_full_margin_order_is_overall_failure() {
        let (broker, state) = MockBroker::accepting(10_000.0);
        state.lock().unwrap().submissions.push(OrderResult {
            accepted: false,
            ticket: None,
            reason: "market closed".to_string(),
        });
        let (executor, _tracker_rx) = executor_for(broker);

        let outcome = executor.execute(&buy_signal(), &context(true)).await;

        assert!(!outcome.success);
        assert!(outcome.tickets.is_empty());
        assert!(outcome.reason.contains("market closed"));
    }

    #[tokio::test]
    async fn full_margin_never_exceeds_the_order_cap() {
        // Effectively unlimited margin: only the cap can stop the loop.
        let (broker, state) = MockBroker::accepting(f64::MAX);
        let (executor, _tracker_rx) = executor_for(broker);

        let outcome = executor.execute(&buy_signal(), &context(true)).await;

        assert!(outcome.success);
        assert_eq!(outcome.tickets.len(), 5);
        assert_eq!(state.lock().unwrap().submitted, 5);
        assert!(outcome.reason.contains("cap"));
    }

    #[tokio::test]
    async fn full_margin_stops_when_margin_runs_out() {
        // 50 per lot, 120 free: two orders fit, the third does not.
        let (broker, state) = MockBroker::accepting(120.0);
        let (executor, _tracker_rx) = executor_for(broker);

        let outcome = executor.execute(&buy_signal(), &context(true)).await;

        assert!(outcome.success, "{}", outcome.reason);
        assert_eq!(outcome.tickets.len(), 2);
        assert_eq!(state.lock().unwrap().submitted, 2);
        assert!(outcome.reason.contains("insufficient free margin"));
    }

    #[tokio::test]
    async fn accepted_but_unverified_order_is_a_failure() {
        let (broker, state) = MockBroker::accepting(10_000.0);
        // Broker accepts but the position never materializes.
        state.lock().unwrap().submissions.push(OrderResult {
            accepted: true,
            ticket: Some(777),
            reason: String::new(),
        });
        let (executor, _tracker_rx) = executor_for(broker);

        let outcome = executor.execute(&buy_signal(), &context(false)).await;

        assert!(!outcome.success);
        assert!(outcome.reason.contains("no open position"));
    }
}
