//! Invitation delivery through a transactional-mail webhook.

use serde::Serialize;
use tracing::instrument;

use campus_enrollment::ContactAddress;

use super::{Invitation, MessagingError, NotificationSender};
use crate::config::NotifierSettings;

#[derive(Debug, Serialize)]
struct OutgoingMail<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
}

#[derive(Debug, Clone)]
pub struct WebhookNotificationSender {
    client: reqwest::Client,
    url: Option<String>,
    api_key: Option<String>,
    from: String,
}

impl WebhookNotificationSender {
    pub fn new(settings: &NotifierSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: settings.webhook_url.clone(),
            api_key: settings.api_key.clone(),
            from: settings.from.clone(),
        }
    }
}

#[async_trait::async_trait]
impl NotificationSender for WebhookNotificationSender {
    fn is_configured(&self) -> bool {
        self.url.is_some() && self.api_key.is_some()
    }

    #[instrument(skip(self, invitation), fields(to = %to), err)]
    async fn send_invitation(
        &self,
        to: &ContactAddress,
        invitation: &Invitation,
    ) -> Result<bool, MessagingError> {
        let (Some(url), Some(key)) = (&self.url, &self.api_key) else {
            return Ok(false);
        };

        let resp = self
            .client
            .post(url)
            .bearer_auth(key)
            .json(&OutgoingMail {
                from: &self.from,
                to: to.as_str(),
                subject: &invitation.subject,
                html: &invitation.html,
            })
            .send()
            .await
            .map_err(|e| MessagingError::Delivery(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MessagingError::Delivery(format!("HTTP {status}: {body}")));
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_only_with_url_and_key() {
        let mut settings = NotifierSettings {
            webhook_url: Some("https://mail.example/send".to_string()),
            api_key: None,
            from: "cursos@example.org".to_string(),
        };
        assert!(!WebhookNotificationSender::new(&settings).is_configured());

        settings.api_key = Some("key".to_string());
        assert!(WebhookNotificationSender::new(&settings).is_configured());
    }
}
