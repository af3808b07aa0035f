use serde::Serialize;

use super::{NotificationChannel, NotificationSettings, NotifyError};
use crate::models::enums::ChannelKind;

/// Default sender when the settings row has none.
const DEFAULT_SENDER: &str = "carewatch";

/// SMS and email delivery through HTTP gateways that accept JSON POSTs.
///
/// Gateway URLs come from the settings snapshot, so a provider change takes
/// effect on the next cycle without a restart.
pub struct HttpGateway {
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct SmsRequest<'a> {
    from: &'a str,
    to: &'a str,
    body: &'a str,
}

#[derive(Serialize)]
struct EmailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

impl HttpGateway {
    /// Build the blocking client. Must not be called from inside an async runtime.
    pub fn new(timeout_secs: u64) -> Result<Self, NotifyError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| NotifyError::HttpClient(e.to_string()))?;
        Ok(Self {
            client,
            timeout_secs,
        })
    }

    fn post<T: Serialize>(&self, url: &str, body: &T) -> Result<(), NotifyError> {
        let response = self.client.post(url).json(body).send().map_err(|e| {
            if e.is_connect() {
                NotifyError::HttpClient(format!("cannot connect to {url}"))
            } else if e.is_timeout() {
                NotifyError::HttpClient(format!("request timed out after {}s", self.timeout_secs))
            } else {
                NotifyError::HttpClient(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(NotifyError::Gateway(format!("{} {}", status.as_u16(), body.trim())));
        }
        Ok(())
    }
}

fn gateway_url(settings: &NotificationSettings, channel: ChannelKind) -> Result<&str, NotifyError> {
    if !settings.is_enabled(channel) {
        return Err(NotifyError::ChannelDisabled(channel));
    }
    let url = match channel {
        ChannelKind::Sms => settings.sms_gateway_url.as_deref(),
        ChannelKind::Email => settings.email_gateway_url.as_deref(),
    };
    url.filter(|u| !u.trim().is_empty())
        .ok_or_else(|| NotifyError::Gateway(format!("no {channel} gateway URL configured")))
}

impl NotificationChannel for HttpGateway {
    fn send_sms(&self, settings: &NotificationSettings, to: &str, body: &str) -> Result<(), NotifyError> {
        let url = gateway_url(settings, ChannelKind::Sms)?;
        let from = settings.sender_address.as_deref().unwrap_or(DEFAULT_SENDER);
        tracing::debug!(to, "Sending SMS");
        self.post(url, &SmsRequest { from, to, body })
    }

    fn send_email(
        &self,
        settings: &NotificationSettings,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        let url = gateway_url(settings, ChannelKind::Email)?;
        let from = settings.sender_address.as_deref().unwrap_or(DEFAULT_SENDER);
        tracing::debug!(to, subject, "Sending email");
        self.post(url, &EmailRequest { from, to, subject, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::testing::enabled_settings;

    #[test]
    fn disabled_channel_short_circuits() {
        let gateway = HttpGateway::new(1).unwrap();
        let mut settings = enabled_settings();
        settings.sms_enabled = false;

        let err = gateway.send_sms(&settings, "+15550001", "hello").unwrap_err();
        assert!(matches!(err, NotifyError::ChannelDisabled(ChannelKind::Sms)));
    }

    #[test]
    fn missing_url_is_gateway_error() {
        let gateway = HttpGateway::new(1).unwrap();
        let mut settings = enabled_settings();
        settings.email_gateway_url = Some("  ".into());

        let err = gateway
            .send_email(&settings, "a@example.org", "subject", "body")
            .unwrap_err();
        assert!(matches!(err, NotifyError::Gateway(_)));
    }

    #[test]
    fn unreachable_gateway_is_http_client_error() {
        let gateway = HttpGateway::new(2).unwrap();
        let mut settings = enabled_settings();
        settings.sms_gateway_url = Some("http://127.0.0.1:1/sms".into());

        let err = gateway.send_sms(&settings, "+15550001", "hello").unwrap_err();
        assert!(matches!(err, NotifyError::HttpClient(_)));
    }

    #[test]
    fn sms_request_serializes_expected_fields() {
        let json = serde_json::to_value(SmsRequest {
            from: "care",
            to: "+15550001",
            body: "Dose due",
        })
        .unwrap();
        assert_eq!(json["to"], "+15550001");
        assert_eq!(json["body"], "Dose due");
    }
}
