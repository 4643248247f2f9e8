use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use broker_trait::{
    AccountSummary, BrokerClient, BrokerPosition, Deal, OrderRequest, OrderResult, Quote,
    SymbolSpec,
};

/// The trading account is a single serialized resource. The execution
/// engine and the position tracker both reach the terminal through this
/// wrapper, so no two broker round-trips ever overlap.
#[derive(Clone)]
pub struct SharedBroker {
    inner: Arc<Mutex<Box<dyn BrokerClient>>>,
}

impl SharedBroker {
    pub fn new(client: Box<dyn BrokerClient>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(client)),
        }
    }

    pub async fn connect(&self) -> Result<bool> {
        self.inner.lock().await.connect().await
    }

    pub async fn is_connected(&self) -> bool {
        let guard = self.inner.lock().await;
        guard.is_connected().await
    }

    pub async fn get_quote(&self, symbol: &str) -> Result<Quote> {
        self.inner.lock().await.get_quote(symbol).await
    }

    pub async fn ensure_symbol(&self, symbol: &str) -> Result<SymbolSpec> {
        self.inner.lock().await.ensure_symbol(symbol).await
    }

    pub async fn submit_order(&self, order: &OrderRequest) -> Result<OrderResult> {
        self.inner.lock().await.submit_order(order).await
    }

    pub async fn get_positions(&self) -> Result<Vec<BrokerPosition>> {
        self.inner.lock().await.get_positions().await
    }

    pub async fn get_deals(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Deal>> {
        self.inner.lock().await.get_deals(from, to).await
    }

    pub async fn get_account(&self) -> Result<AccountSummary> {
        self.inner.lock().await.get_account().await
    }

    pub async fn margin_required(&self, symbol: &str, volume: f64) -> Result<f64> {
        self.inner.lock().await.margin_required(symbol, volume).await
    }

    pub async fn broker_name(&self) -> String {
        self.inner.lock().await.broker_name().to_string()
    }
}
