use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;

use broker_trait::{
    AccountSummary, BrokerClient, BrokerPosition, Deal, OrderRequest, OrderResult, OrderSide,
    Quote, SymbolSpec,
};

use crate::models::*;

/// HTTP client for an MT5 bridge terminal — a sidecar process that owns
/// the actual terminal session and exposes it over a local REST API.
pub struct Mt5BridgeClient {
    client: Client,
    base_url: String,
    login: i64,
    password: String,
    server: String,
    demo: bool,
    connected: AtomicBool,
}

impl Mt5BridgeClient {
    pub fn new(
        base_url: String,
        login: i64,
        password: String,
        server: String,
        demo: bool,
    ) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;

        Ok(Self {
            client,
            base_url,
            login,
            password,
            server,
            demo,
            connected: AtomicBool::new(false),
        })
    }

    /// Create client from environment variables.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("MT5_BRIDGE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:5050".to_string());
        let login = std::env::var("MT5_LOGIN")
            .map_err(|_| anyhow!("MT5_LOGIN not set"))?
            .parse::<i64>()
            .map_err(|_| anyhow!("MT5_LOGIN is not a number"))?;
        let password = std::env::var("MT5_PASSWORD").map_err(|_| anyhow!("MT5_PASSWORD not set"))?;
        let server = std::env::var("MT5_SERVER").map_err(|_| anyhow!("MT5_SERVER not set"))?;
        let demo = std::env::var("MT5_DEMO_ACCOUNT")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(true);

        Self::new(base_url, login, password, server, demo)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("MT5 bridge error on {}: {}", path, error_text));
        }
        Ok(response.json::<T>().await?)
    }

    async fn post_json<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url).json(body).send().await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("MT5 bridge error on {}: {}", path, error_text));
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl BrokerClient for Mt5BridgeClient {
    async fn connect(&self) -> Result<bool> {
        let request = ConnectRequest {
            login: self.login,
            password: self.password.clone(),
            server: self.server.clone(),
        };

        let reply: ConnectReply = self.post_json("/connect", &request).await?;
        if !reply.authorized {
            self.connected.store(false, Ordering::SeqCst);
            tracing::error!("MT5 login failed: {}", reply.message);
            return Ok(false);
        }

        self.connected.store(true, Ordering::SeqCst);
        tracing::info!("Connected to MT5 ({} @ {})", self.login, self.server);
        Ok(true)
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn get_quote(&self, symbol: &str) -> Result<Quote> {
        let tick: TickInfo = self.get_json(&format!("/tick/{symbol}")).await?;
        Ok(tick.into())
    }

    async fn ensure_symbol(&self, symbol: &str) -> Result<SymbolSpec> {
        let info: SymbolInfo = self.get_json(&format!("/symbol/{symbol}")).await?;

        if !info.visible {
            let selected: serde_json::Value = self
                .post_json(&format!("/symbol/{symbol}/select"), &serde_json::json!({}))
                .await?;
            if !selected
                .get("selected")
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
            {
                return Err(anyhow!("failed to select symbol {symbol}"));
            }
            tracing::info!("Selected symbol {} in the terminal", symbol);
        }

        Ok(info.into())
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderResult> {
        let request = OrderSendRequest {
            symbol: order.symbol.clone(),
            volume: order.volume,
            order_type: match order.side {
                OrderSide::Buy => ORDER_TYPE_BUY,
                OrderSide::Sell => ORDER_TYPE_SELL,
            },
            price: order.price,
            sl: order.stop_loss,
            tp: order.take_profit.unwrap_or(0.0),
            deviation: order.deviation_points,
            comment: order.comment.clone(),
        };

        tracing::info!(
            "Submitting {} {} x{:.2} @ {:.5} (sl {:.5}, tp {:.5})",
            order.side,
            order.symbol,
            order.volume,
            order.price,
            order.stop_loss,
            request.tp,
        );

        let reply: TradeReply = self.post_json("/order", &request).await?;
        if reply.retcode != TRADE_RETCODE_DONE {
            return Ok(OrderResult {
                accepted: false,
                ticket: None,
                reason: format!("retcode {}: {}", reply.retcode, reply.comment),
            });
        }

        tracing::info!("Order accepted, ticket {}", reply.order);
        Ok(OrderResult {
            accepted: true,
            ticket: Some(reply.order),
            reason: reply.comment,
        })
    }

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>> {
        let positions: Vec<PositionInfo> = self.get_json("/positions").await?;
        Ok(positions.into_iter().map(Into::into).collect())
    }

    async fn get_deals(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Deal>> {
        let path = format!("/deals?from={}&to={}", from.timestamp(), to.timestamp());
        let deals: Vec<DealInfo> = self.get_json(&path).await?;
        Ok(deals.into_iter().map(Into::into).collect())
    }

    async fn get_account(&self) -> Result<AccountSummary> {
        let account: AccountInfo = self.get_json("/account").await?;
        Ok(account.into())
    }

    async fn margin_required(&self, symbol: &str, volume: f64) -> Result<f64> {
        let path = format!("/margin?symbol={symbol}&volume={volume}");
        let reply: MarginReply = self.get_json(&path).await?;
        Ok(reply.margin)
    }

    fn is_demo(&self) -> bool {
        self.demo
    }

    fn broker_name(&self) -> &str {
        "mt5-bridge"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Only run with a bridge terminal listening locally
    async fn test_connect_and_account() {
        let client = Mt5BridgeClient::from_env().unwrap();
        assert!(client.connect().await.unwrap());

        let account = client.get_account().await.unwrap();
        println!("Balance: ${:.2}", account.balance);
        println!("Equity: ${:.2}", account.equity);
        println!("Free margin: ${:.2}", account.margin_free);

        assert!(account.balance >= 0.0);
    }

    #[tokio::test]
    #[ignore] // Only run with a bridge terminal listening locally
    async fn test_quote_roundtrip() {
        let client = Mt5BridgeClient::from_env().unwrap();
        client.connect().await.unwrap();

        let spec = client.ensure_symbol("XAUUSD").await.unwrap();
        assert!(spec.volume_min > 0.0);

        let quote = client.get_quote("XAUUSD").await.unwrap();
        assert!(quote.ask >= quote.bid);
    }
}
