use async_trait::async_trait;

use crate::{Alert, NotificationChannel, NotificationError};

const PUSHOVER_API: &str = "https://api.pushover.net/1/messages.json";

/// Push notifications to the operator's phone via Pushover.
pub struct PushoverNotifier {
    client: reqwest::Client,
    app_token: String,
    user_key: String,
}

impl PushoverNotifier {
    pub fn new(app_token: String, user_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            app_token,
            user_key,
        }
    }
}

#[async_trait]
impl NotificationChannel for PushoverNotifier {
    async fn send(&self, alert: &Alert) -> Result<(), NotificationError> {
        let priority = if alert.is_urgent() { "1" } else { "0" };
        let params = [
            ("token", self.app_token.as_str()),
            ("user", self.user_key.as_str()),
            ("title", alert.title.as_str()),
            ("message", alert.message.as_str()),
            ("priority", priority),
        ];

        let response = self
            .client
            .post(PUSHOVER_API)
            .form(&params)
            .send()
            .await
            .map_err(|e| NotificationError::Pushover(e.to_string()))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Pushover(body));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "pushover"
    }
}
