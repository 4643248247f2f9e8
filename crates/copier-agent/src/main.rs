use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tokio::signal::unix::SignalKind;
use tokio::sync::{mpsc, Notify};

use broker_trait::BrokerClient;
use mt5_bridge::Mt5BridgeClient;
use notification_service::{Alert, AlertType, NotificationConfig, NotificationService};
use risk_manager::OrderSizer;
use signal_parser::Parser;

mod audit;
mod broker;
mod config;
mod executor;
mod gateway;
mod metrics;
mod monitor;
mod tracker;
mod types;

use audit::AuditStore;
use broker::SharedBroker;
use config::{AgentConfig, ChannelDirectory};
use executor::{ExecutionPolicy, TradeExecutor};
use gateway::{GatewayClient, ReconnectPolicy};
use metrics::AgentMetrics;
use monitor::ChannelMonitor;
use tracker::PositionTracker;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    // Panic hook: log panic info before crashing
    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting Signal Copier Agent");

    // 2. Load configuration and the channel allow-list
    let config = AgentConfig::from_env()?;
    tracing::info!("Configuration loaded and validated");
    tracing::info!("  Gateway: {}", config.gateway_url);
    tracing::info!(
        "  Volume: {}",
        if config.use_risk_sizing {
            format!("{}% of equity per trade", config.risk_fraction * 100.0)
        } else {
            format!("fixed {} lots", config.lot_size)
        }
    );
    tracing::info!(
        "  Slippage: {} pips (x{} on {:?})",
        config.base_deviation_pips,
        config.volatility_multiplier,
        config.high_volatility_symbols
    );
    tracing::info!(
        "  Full margin: {} (max {} orders per signal)",
        config.full_margin_enabled,
        config.full_margin_max_orders
    );
    tracing::info!(
        "  Missing stop policy: {}",
        if config.estimate_missing_stop {
            "estimate"
        } else {
            "reject"
        }
    );
    tracing::info!("  Tracker interval: {}s", config.tracker_interval_seconds);

    let directory = ChannelDirectory::load(&config.channels_file)?;
    anyhow::ensure!(
        !directory.is_empty(),
        "channel allow-list {} is empty — nothing to monitor",
        config.channels_file
    );
    let channel_count = directory.len();
    tracing::info!(
        "Loaded {} allow-listed channels from {}",
        channel_count,
        config.channels_file
    );

    // 3. Broker client
    let bridge = Mt5BridgeClient::from_env()?;

    // 4. Safety gate: demo by default, live requires LIVE_TRADING_APPROVED=yes
    if !bridge.is_demo() {
        let approved = std::env::var("LIVE_TRADING_APPROVED")
            .map(|v| v.eq_ignore_ascii_case("yes"))
            .unwrap_or(false);
        if !approved {
            tracing::error!(
                "MT5_DEMO_ACCOUNT=false but live trading is not approved. \
                 Set LIVE_TRADING_APPROVED=yes to enable."
            );
            std::process::exit(1);
        }
        tracing::warn!("LIVE TRADING MODE — REAL MONEY AT RISK");
    } else {
        tracing::info!("Demo account mode");
    }
    let broker = SharedBroker::new(Box::new(bridge));

    // 5. Audit store + metrics restore
    sqlx::any::install_default_drivers();
    let pool = sqlx::AnyPool::connect(&config.database_url).await?;
    let audit = Arc::new(AuditStore::new(pool));
    audit.init_tables().await?;
    tracing::info!("Audit store initialized ({})", config.database_url);

    let mut restored = AgentMetrics::default();
    if let Ok(Some(saved)) = audit.load_state("metrics").await {
        restored.restore_from_json(&saved);
    }
    let metrics = Arc::new(Mutex::new(restored));

    let notifications = Arc::new(NotificationService::new(&NotificationConfig::from_env()));

    // 6. Startup connectivity check — no point monitoring signals we
    // cannot execute.
    match broker.connect().await {
        Ok(true) => {}
        Ok(false) => {
            notifications
                .send_alert_async(&Alert::new(
                    AlertType::ConnectivityLost {
                        component: "broker".to_string(),
                    },
                    "Startup Failed",
                    "Broker login refused. Agent is not running.",
                ))
                .await;
            anyhow::bail!("broker login refused");
        }
        Err(e) => {
            notifications
                .send_alert_async(&Alert::new(
                    AlertType::ConnectivityLost {
                        component: "broker".to_string(),
                    },
                    "Startup Failed",
                    format!("Broker unreachable: {e}. Agent is not running."),
                ))
                .await;
            return Err(e.context("broker connectivity check failed"));
        }
    }
    let account = broker
        .get_account()
        .await
        .map_err(|e| anyhow::anyhow!("account query failed at startup: {e}"))?;
    tracing::info!(
        "Startup check: {} OK (balance ${:.2}, equity ${:.2}, free margin ${:.2})",
        broker.broker_name().await,
        account.balance,
        account.equity,
        account.margin_free
    );

    // 7. Wire the tasks together
    let reconnect = ReconnectPolicy {
        base_delay: Duration::from_millis(config.reconnect_base_delay_ms),
        max_delay: Duration::from_secs(config.reconnect_max_delay_seconds),
        max_attempts: config.reconnect_max_attempts,
    };
    let (gateway, message_rx) = GatewayClient::new(config.gateway_url.clone(), reconnect);
    let gateway = Arc::new(gateway);

    let (exec_tx, exec_rx) = mpsc::channel(64);
    let (tracker_tx, tracker_rx) = mpsc::channel(128);

    let executor = TradeExecutor::new(
        broker.clone(),
        OrderSizer::new(config.sizing_config()),
        ExecutionPolicy {
            full_margin_max_orders: config.full_margin_max_orders,
            verify_delay: Duration::from_millis(config.verify_delay_ms),
        },
        tracker_tx,
    );
    let monitor = ChannelMonitor::new(
        directory,
        Parser::new(config.parser_config()),
        config.full_margin_enabled,
        Arc::clone(&audit),
        Arc::clone(&metrics),
        exec_tx,
    );
    let tracker = PositionTracker::new(
        broker.clone(),
        Arc::clone(&notifications),
        Arc::clone(&metrics),
        config.deals_lookback_days,
    );

    let monitor_shutdown = Arc::new(Notify::new());
    let tracker_shutdown = Arc::new(Notify::new());

    let gateway_task = tokio::spawn(Arc::clone(&gateway).run(Arc::clone(&notifications)));
    let monitor_task = tokio::spawn(monitor.run(message_rx, Arc::clone(&monitor_shutdown)));
    let execution_task = tokio::spawn(executor::run_execution_queue(
        exec_rx,
        executor,
        Arc::clone(&audit),
        Arc::clone(&notifications),
        Arc::clone(&metrics),
    ));
    let tracker_task = tokio::spawn(tracker.run(
        tracker_rx,
        config.tracker_interval_seconds,
        config.metrics_log_interval_ticks,
        Arc::clone(&tracker_shutdown),
    ));

    // 8. Startup notification
    notifications
        .send_alert_async(&Alert::new(
            AlertType::AgentStatus,
            "Signal Copier Started",
            format!(
                "Balance: ${:.2} | Free margin: ${:.2}\n\
                 Channels: {} | Full margin: {} (cap {})",
                account.balance,
                account.margin_free,
                channel_count,
                config.full_margin_enabled,
                config.full_margin_max_orders
            ),
        ))
        .await;

    tracing::info!("Agent is running. Press Ctrl+C to stop.");

    // 9. Wait for a shutdown signal (SIGINT + SIGTERM)
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT");
        }
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
    }

    // 10. Ordered shutdown: stop intake first, then drain in-flight
    // executions so no broker call is cut off mid-submission, and only
    // then stop supervision.
    tracing::info!("Shutting down: stopping intake, draining in-flight work...");
    gateway.shutdown();
    let _ = gateway_task.await;
    monitor_shutdown.notify_one();
    let _ = monitor_task.await; // dropping the queue sender lets the executor drain
    let _ = execution_task.await;
    tracker_shutdown.notify_one();
    let _ = tracker_task.await;

    // 11. Final metrics persist + stop notification
    let snapshot = metrics.lock().unwrap().clone();
    snapshot.log_metrics();
    audit.save_state("metrics", &snapshot.to_json()).await.ok();

    notifications
        .send_alert_async(&Alert::new(
            AlertType::AgentStatus,
            "Signal Copier Stopped",
            "Graceful shutdown complete",
        ))
        .await;

    tracing::info!("Signal copier shut down.");
    Ok(())
}
