use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::{mpsc, Notify};

use broker_trait::{BrokerPosition, OrderSide};
use notification_service::{Alert, AlertType, NotificationService};

use crate::broker::SharedBroker;
use crate::metrics::AgentMetrics;
use crate::types::TrackedPosition;

/// Why a supervised ticket left the active set. Terminal — a ticket
/// produces exactly one of these and is never reinstated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Closure {
    TakeProfit,
    StopLoss,
    Manual,
}

/// Supervises open tickets on a fixed interval. This is an early-warning
/// reporter: the broker's own resting TP/SL orders do the closing, the
/// tracker only detects and announces it.
///
/// The active set lives exclusively inside this task; the execution
/// engine hands positions over through an mpsc channel.
pub struct PositionTracker {
    broker: SharedBroker,
    notifications: Arc<NotificationService>,
    metrics: Arc<Mutex<AgentMetrics>>,
    active: HashMap<u64, TrackedPosition>,
    deals_lookback: chrono::Duration,
}

impl PositionTracker {
    pub fn new(
        broker: SharedBroker,
        notifications: Arc<NotificationService>,
        metrics: Arc<Mutex<AgentMetrics>>,
        deals_lookback_days: i64,
    ) -> Self {
        Self {
            broker,
            notifications,
            metrics,
            active: HashMap::new(),
            deals_lookback: chrono::Duration::days(deals_lookback_days),
        }
    }

    pub async fn run(
        mut self,
        mut registrations: mpsc::Receiver<TrackedPosition>,
        interval_seconds: u64,
        metrics_log_interval_ticks: u64,
        shutdown: Arc<Notify>,
    ) {
        let mut timer = tokio::time::interval(Duration::from_secs(interval_seconds));
        let mut ticks: u64 = 0;

        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    tracing::info!(
                        "Position tracker stopping ({} positions still open)",
                        self.active_count()
                    );
                    break;
                }
                Some(position) = registrations.recv() => {
                    self.register(position);
                }
                _ = timer.tick() => {
                    self.tick().await;
                    ticks += 1;
                    if metrics_log_interval_ticks > 0 && ticks % metrics_log_interval_ticks == 0 {
                        self.metrics.lock().unwrap().log_metrics();
                    }
                }
            }
        }
    }

    pub fn register(&mut self, position: TrackedPosition) {
        tracing::info!(
            "Tracking ticket {}: {} {} x{:.2} @ {:.5} (sl {:.5}, tp {:.5}) from {}",
            position.ticket,
            position.side,
            position.symbol,
            position.volume,
            position.entry_price,
            position.stop_loss,
            position.take_profit,
            position.channel_name,
        );
        self.active.insert(position.ticket, position);
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// One supervision sweep. A failed broker poll keeps the whole set
    /// intact — losing oversight of real exposure is worse than a late
    /// notification. Individual bad records are skipped, the sweep
    /// continues.
    pub async fn tick(&mut self) {
        if self.active.is_empty() {
            return;
        }

        let positions = match self.broker.get_positions().await {
            Ok(positions) => positions,
            Err(e) => {
                tracing::warn!(
                    "Position poll failed, keeping {} tracked tickets: {}",
                    self.active.len(),
                    e
                );
                return;
            }
        };
        let open: HashMap<u64, BrokerPosition> =
            positions.into_iter().map(|p| (p.ticket, p)).collect();

        let tickets: Vec<u64> = self.active.keys().copied().collect();
        for ticket in tickets {
            let Some(tracked) = self.active.get(&ticket).cloned() else {
                continue;
            };

            let event = match open.get(&ticket) {
                Some(position) => check_levels(&tracked, position)
                    .map(|closure| (closure, position.profit, position.price_current)),
                None => match self.realized_profit(ticket).await {
                    Ok(profit) => Some((Closure::Manual, profit, 0.0)),
                    Err(e) => {
                        // Can't tell yet what happened to this ticket —
                        // keep it and look again next tick.
                        tracing::warn!("History lookup failed for ticket {}: {}", ticket, e);
                        None
                    }
                },
            };

            if let Some((closure, profit, exit_price)) = event {
                self.close(tracked, closure, profit, exit_price);
            }
        }
    }

    /// Realized profit of a closed position, summed over its deals in
    /// the recent history window.
    async fn realized_profit(&self, ticket: u64) -> Result<f64> {
        let to = Utc::now();
        let from = to - self.deals_lookback;
        let deals = self.broker.get_deals(from, to).await?;

        Ok(deals
            .iter()
            .filter(|d| d.position_id == ticket)
            .map(|d| d.profit)
            .sum())
    }

    fn close(&mut self, tracked: TrackedPosition, closure: Closure, profit: f64, exit_price: f64) {
        self.active.remove(&tracked.ticket);

        let held = Utc::now() - tracked.opened_at;
        let held_minutes = held.num_minutes();

        let alert = match closure {
            Closure::TakeProfit => {
                self.metrics.lock().unwrap().tp_hits += 1;
                tracing::info!(
                    "TP hit on ticket {} ({} {}): profit {:.2}",
                    tracked.ticket,
                    tracked.side,
                    tracked.symbol,
                    profit
                );
                Alert::new(
                    AlertType::TakeProfitHit {
                        symbol: tracked.symbol.clone(),
                        profit,
                    },
                    "Take Profit Hit",
                    format!(
                        "{} {} from {}\nEntry: {:.5}\nExit: {:.5}\nProfit: ${:.2}",
                        tracked.side,
                        tracked.symbol,
                        tracked.channel_name,
                        tracked.entry_price,
                        exit_price,
                        profit,
                    ),
                )
            }
            Closure::StopLoss => {
                self.metrics.lock().unwrap().sl_hits += 1;
                tracing::info!(
                    "SL hit on ticket {} ({} {}): loss {:.2}",
                    tracked.ticket,
                    tracked.side,
                    tracked.symbol,
                    profit
                );
                Alert::new(
                    AlertType::StopLossHit {
                        symbol: tracked.symbol.clone(),
                        loss: profit.abs(),
                    },
                    "Stop Loss Hit",
                    format!(
                        "{} {} from {}\nEntry: {:.5}\nExit: {:.5}\nLoss: ${:.2}",
                        tracked.side,
                        tracked.symbol,
                        tracked.channel_name,
                        tracked.entry_price,
                        exit_price,
                        profit.abs(),
                    ),
                )
            }
            Closure::Manual => {
                self.metrics.lock().unwrap().manual_closes += 1;
                tracing::info!(
                    "Ticket {} ({} {}) closed outside the bot: profit {:.2}",
                    tracked.ticket,
                    tracked.side,
                    tracked.symbol,
                    profit
                );
                Alert::new(
                    AlertType::TradeClosedManually {
                        symbol: tracked.symbol.clone(),
                        profit,
                    },
                    "Trade Closed",
                    format!(
                        "{} {} from {} closed manually\nProfit/Loss: ${:.2}\nHeld: {}m",
                        tracked.side, tracked.symbol, tracked.channel_name, profit, held_minutes,
                    ),
                )
            }
        };

        self.notifications.send_alert(alert);
    }
}

/// Direction-aware threshold check against the levels the signal asked
/// for. BUY: TP at or above target, SL at or below stop; SELL mirrored.
fn check_levels(tracked: &TrackedPosition, position: &BrokerPosition) -> Option<Closure> {
    let price = position.price_current;
    match tracked.side {
        OrderSide::Buy => {
            if price >= tracked.take_profit {
                Some(Closure::TakeProfit)
            } else if price <= tracked.stop_loss {
                Some(Closure::StopLoss)
            } else {
                None
            }
        }
        OrderSide::Sell => {
            if price <= tracked.take_profit {
                Some(Closure::TakeProfit)
            } else if price >= tracked.stop_loss {
                Some(Closure::StopLoss)
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use broker_trait::{
        AccountSummary, BrokerClient, Deal, OrderRequest, OrderResult, Quote, SymbolSpec,
    };
    use chrono::DateTime;
    use notification_service::NotificationConfig;
    use std::sync::Mutex as StdMutex;

    struct MockBroker {
        positions: Arc<StdMutex<Vec<BrokerPosition>>>,
        deals: Arc<StdMutex<Vec<Deal>>>,
        fail_polls: Arc<StdMutex<bool>>,
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
            Ok(Quote { bid: 0.0, ask: 0.0 })
        }
        async fn ensure_symbol(&self, _symbol: &str) -> Result<SymbolSpec> {
            unimplemented!("not used by the tracker")
        }
        async fn submit_order(&self, _order: &OrderRequest) -> Result<OrderResult> {
            unimplemented!("not used by the tracker")
        }
        async fn get_positions(&self) -> Result<Vec<BrokerPosition>> {
            if *self.fail_polls.lock().unwrap() {
                anyhow::bail!("terminal unreachable");
            }
            Ok(self.positions.lock().unwrap().clone())
        }
        async fn get_deals(&self, _from: DateTime<Utc>, _to: DateTime<Utc>) -> Result<Vec<Deal>> {
            Ok(self.deals.lock().unwrap().clone())
        }
        async fn get_account(&self) -> Result<AccountSummary> {
            Ok(AccountSummary {
                balance: 0.0,
                equity: 0.0,
                margin_free: 0.0,
            })
        }
        async fn margin_required(&self, _symbol: &str, _volume: f64) -> Result<f64> {
            Ok(0.0)
        }
        fn is_demo(&self) -> bool {
            true
        }
        fn broker_name(&self) -> &str {
            "mock"
        }
    }

    struct Fixture {
        tracker: PositionTracker,
        positions: Arc<StdMutex<Vec<BrokerPosition>>>,
        deals: Arc<StdMutex<Vec<Deal>>>,
        fail_polls: Arc<StdMutex<bool>>,
        metrics: Arc<Mutex<AgentMetrics>>,
    }

    fn fixture() -> Fixture {
        let positions = Arc::new(StdMutex::new(Vec::new()));
        let deals = Arc::new(StdMutex::new(Vec::new()));
        let fail_polls = Arc::new(StdMutex::new(false));
        let metrics = Arc::new(Mutex::new(AgentMetrics::default()));

        let broker = MockBroker {
            positions: Arc::clone(&positions),
            deals: Arc::clone(&deals),
            fail_polls: Arc::clone(&fail_polls),
        };
        // No channels configured — alerts become no-ops.
        let notifications = Arc::new(NotificationService::new(&NotificationConfig::default()));

        let tracker = PositionTracker::new(
            SharedBroker::new(Box::new(broker)),
            notifications,
            Arc::clone(&metrics),
            7,
        );

        Fixture {
            tracker,
            positions,
            deals,
            fail_polls,
            metrics,
        }
    }

    fn buy_position(ticket: u64, price_current: f64) -> BrokerPosition {
        BrokerPosition {
            ticket,
            symbol: "EURUSD".to_string(),
            side: OrderSide::Buy,
            volume: 0.01,
            price_open: 1.1950,
            price_current,
            stop_loss: 1.1900,
            take_profit: 1.2000,
            profit: 5.0,
            opened_at: Utc::now(),
        }
    }

    fn tracked(ticket: u64) -> TrackedPosition {
        TrackedPosition {
            ticket,
            symbol: "EURUSD".to_string(),
            side: OrderSide::Buy,
            volume: 0.01,
            entry_price: 1.1950,
            stop_loss: 1.1900,
            take_profit: 1.2000,
            channel_name: "Test Channel".to_string(),
            opened_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn tp_cross_emits_once_and_removes_the_ticket() {
        let mut f = fixture();
        f.tracker.register(tracked(1));
        f.positions.lock().unwrap().push(buy_position(1, 1.2001));

        f.tracker.tick().await;
        assert_eq!(f.tracker.active_count(), 0);
        assert_eq!(f.metrics.lock().unwrap().tp_hits, 1);

        // Ticket is gone — a second sweep must not report anything more.
        f.tracker.tick().await;
        assert_eq!(f.metrics.lock().unwrap().tp_hits, 1);
        assert_eq!(f.metrics.lock().unwrap().manual_closes, 0);
    }

    #[tokio::test]
    async fn buy_stop_cross_is_a_stop_loss() {
        let mut f = fixture();
        f.tracker.register(tracked(2));
        f.positions.lock().unwrap().push(buy_position(2, 1.1899));

        f.tracker.tick().await;
        assert_eq!(f.tracker.active_count(), 0);
        assert_eq!(f.metrics.lock().unwrap().sl_hits, 1);
    }

    #[tokio::test]
    async fn sell_thresholds_are_mirrored() {
        let mut f = fixture();
        let mut short = tracked(3);
        short.side = OrderSide::Sell;
        short.stop_loss = 1.2000;
        short.take_profit = 1.1900;
        f.tracker.register(short);

        let mut position = buy_position(3, 1.1899);
        position.side = OrderSide::Sell;
        f.positions.lock().unwrap().push(position);

        f.tracker.tick().await;
        assert_eq!(f.metrics.lock().unwrap().tp_hits, 1);
        assert_eq!(f.metrics.lock().unwrap().sl_hits, 0);
    }

    #[tokio::test]
    async fn disappeared_ticket_is_a_manual_close_with_history_profit() {
        let mut f = fixture();
        f.tracker.register(tracked(4));
        // Not in the open set; history has its deals.
        f.deals.lock().unwrap().extend([
            Deal {
                ticket: 900,
                position_id: 4,
                symbol: "EURUSD".to_string(),
                profit: 0.0,
                executed_at: Utc::now(),
            },
            Deal {
                ticket: 901,
                position_id: 4,
                symbol: "EURUSD".to_string(),
                profit: 12.5,
                executed_at: Utc::now(),
            },
            Deal {
                ticket: 902,
                position_id: 999, // someone else's position
                symbol: "EURUSD".to_string(),
                profit: 99.0,
                executed_at: Utc::now(),
            },
        ]);

        f.tracker.tick().await;
        assert_eq!(f.tracker.active_count(), 0);
        assert_eq!(f.metrics.lock().unwrap().manual_closes, 1);
        assert_eq!(f.metrics.lock().unwrap().tp_hits, 0);
    }

    #[tokio::test]
    async fn failed_poll_never_drops_tracked_positions() {
        let mut f = fixture();
        f.tracker.register(tracked(5));
        *f.fail_polls.lock().unwrap() = true;

        f.tracker.tick().await;
        assert_eq!(f.tracker.active_count(), 1);

        // Poll recovers, position still supervised and closable.
        *f.fail_polls.lock().unwrap() = false;
        f.positions.lock().unwrap().push(buy_position(5, 1.2005));
        f.tracker.tick().await;
        assert_eq!(f.tracker.active_count(), 0);
        assert_eq!(f.metrics.lock().unwrap().tp_hits, 1);
    }

    #[tokio::test]
    async fn untouched_levels_keep_the_position_open() {
        let mut f = fixture();
        f.tracker.register(tracked(6));
        f.positions.lock().unwrap().push(buy_position(6, 1.1950));

        f.tracker.tick().await;
        assert_eq!(f.tracker.active_count(), 1);
        let m = f.metrics.lock().unwrap();
        assert_eq!(m.tp_hits + m.sl_hits + m.manual_closes, 0);
    }
}
