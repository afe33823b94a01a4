//! Outbound verification email delivery.

use crate::error::{Result, ToolError};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::json;
use std::time::Duration;

const GMAIL_SEND_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me/messages/send";

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Returns false when delivery failed. Callers treat that as non-fatal.
    async fn send_verification_email(
        &self,
        order_id: &str,
        code: &str,
        recipient_email: &str,
        recipient_name: &str,
    ) -> bool;

    fn backend(&self) -> &'static str;
}

/// Development backend: writes the code to the log instead of mailing it.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_verification_email(
        &self,
        order_id: &str,
        code: &str,
        recipient_email: &str,
        recipient_name: &str,
    ) -> bool {
        tracing::warn!(
            order_id,
            recipient_email,
            recipient_name,
            code,
            "log notifier: verification email not sent, code logged instead"
        );
        true
    }

    fn backend(&self) -> &'static str {
        "log"
    }
}

#[derive(Clone)]
pub struct GmailNotifier {
    http: reqwest::Client,
    access_token: String,
}

impl GmailNotifier {
    pub fn new(access_token: &str) -> Result<Self> {
        let token = access_token.trim();
        if token.is_empty() {
            return Err(ToolError::Notification(
                "gmail access token is required".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ToolError::Notification(e.to_string()))?;
        Ok(Self {
            http,
            access_token: token.to_string(),
        })
    }

    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<String> {
        let mime = build_mime_message(to, subject, body);
        let raw = URL_SAFE_NO_PAD.encode(mime.as_bytes());

        let resp = self
            .http
            .post(GMAIL_SEND_URL)
            .bearer_auth(&self.access_token)
            .json(&json!({ "raw": raw }))
            .send()
            .await
            .map_err(|e| ToolError::Notification(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read response body>".to_string());
            return Err(ToolError::Notification(format!(
                "gmail send failed: status={status} body={body}"
            )));
        }

        #[derive(serde::Deserialize)]
        struct GmailSendResponse {
            id: String,
        }

        let sent: GmailSendResponse = resp
            .json()
            .await
            .map_err(|e| ToolError::Notification(e.to_string()))?;
        Ok(sent.id)
    }
}

#[async_trait]
impl Notifier for GmailNotifier {
    async fn send_verification_email(
        &self,
        order_id: &str,
        code: &str,
        recipient_email: &str,
        recipient_name: &str,
    ) -> bool {
        let subject = verification_subject(order_id);
        let body = verification_body(order_id, code, recipient_name);
        match self.send(recipient_email, &subject, &body).await {
            Ok(message_id) => {
                tracing::info!(order_id, recipient_email, message_id = %message_id, "verification email sent");
                true
            }
            Err(e) => {
                tracing::error!(order_id, recipient_email, error = %e, "verification email failed");
                false
            }
        }
    }

    fn backend(&self) -> &'static str {
        "gmail"
    }
}

fn verification_subject(order_id: &str) -> String {
    format!("Order Cancellation Verification - {order_id}")
}

fn verification_body(order_id: &str, code: &str, recipient_name: &str) -> String {
    let greeting = match recipient_name.trim() {
        "" => "Hello,".to_string(),
        name => format!("Hello {name},"),
    };
    format!(
        "{greeting}\n\n\
         We received a request to cancel order {order_id}.\n\n\
         Your verification code is: {code}\n\n\
         Enter this code in the chat to confirm the cancellation. \
         If you did not request this, you can ignore this email and the order will not change.\n"
    )
}

fn build_mime_message(to: &str, subject: &str, body: &str) -> String {
    let normalized = body.replace('\r', "");
    format!(
        "To: {to}\r\nSubject: {subject}\r\nContent-Type: text/plain; charset=\"UTF-8\"\r\nMIME-Version: 1.0\r\n\r\n{normalized}\r\n"
    )
}
