// Transactional email dispatch for completed tips.
// Fire-and-forget relative to the HTTP response already computed for the
// payer: every failure here is logged and audited, never propagated.

use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::store::{NotificationRecord, Store, TipRecord};

const EMAIL_API_BASE: &str = "https://api.resend.com";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("email provider not configured")]
    NotConfigured,
    #[error("http error: {0}")]
    Http(String),
    #[error("provider rejected message: status={status} body={body}")]
    Rejected { status: u16, body: String },
}

#[derive(Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
}

#[derive(Clone)]
pub struct Mailer {
    http: Client,
    api_key: String,
    from: String,
    base_url: String,
}

impl Mailer {
    pub fn new(http: Client, api_key: String, from: String) -> Self {
        Self {
            http,
            api_key,
            from,
            base_url: EMAIL_API_BASE.to_string(),
        }
    }

    /// Point the client at a different API host. Test hook.
    #[allow(dead_code)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.from.is_empty()
    }

    /// One outbound send, no retry. A failed send for one recipient never
    /// affects the others.
    pub async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), NotifyError> {
        if !self.is_configured() {
            return Err(NotifyError::NotConfigured);
        }
        let body = SendEmailRequest {
            from: &self.from,
            to,
            subject,
            html,
        };
        let resp = self
            .http
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::Http(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// Subject/body pair for one outbound notification.
struct TipEmail {
    subject: String,
    html: String,
}

fn guide_email(record: &TipRecord) -> TipEmail {
    let sender = display_sender(record);
    let mut html = format!(
        "<p>Hi {name},</p><p>{sender} left you a tip of {amount:.2} {currency}.</p>",
        name = record.recipient_name,
        amount = record.amount,
        currency = record.currency.to_ascii_uppercase(),
    );
    if !record.message.is_empty() {
        html.push_str(&format!("<p>Their message: \"{}\"</p>", record.message));
    }
    TipEmail {
        subject: format!("You received a tip from {sender}"),
        html,
    }
}

fn admin_email(record: &TipRecord) -> TipEmail {
    let target = if record.recipient_type == "guide" {
        format!("guide {}", record.recipient_name)
    } else {
        "the company pool".to_string()
    };
    TipEmail {
        subject: format!(
            "Tip received: {:.2} {} for {}",
            record.amount,
            record.currency.to_ascii_uppercase(),
            target
        ),
        html: format!(
            "<p>{sender} tipped {amount:.2} {currency} to {target}.</p>\
             <p>Payment reference: {reference}</p>",
            sender = display_sender(record),
            amount = record.amount,
            currency = record.currency.to_ascii_uppercase(),
            reference = record.payment_intent_id,
        ),
    }
}

fn display_sender(record: &TipRecord) -> &str {
    if record.sender_name.is_empty() {
        "A guest"
    } else {
        &record.sender_name
    }
}

async fn send_and_audit(mailer: &Mailer, store: &Store, record: &TipRecord, to: &str, email: &TipEmail) {
    let status = match mailer.send(to, &email.subject, &email.html).await {
        Ok(()) => {
            info!(to = %to, payment_intent_id = %record.payment_intent_id, "tip notification sent");
            "sent"
        }
        Err(e) => {
            warn!(
                to = %to,
                payment_intent_id = %record.payment_intent_id,
                error = %e,
                "tip notification failed"
            );
            "failed"
        }
    };
    let audit = NotificationRecord {
        to: to.to_string(),
        subject: email.subject.clone(),
        status: status.to_string(),
        created_at: Utc::now(),
    };
    if let Err(e) = store.append_notification(&record.payment_intent_id, &audit) {
        warn!(
            payment_intent_id = %record.payment_intent_id,
            error = %e,
            "failed to append notification audit row"
        );
    }
}

/// Dispatch the notification set for one verified tip: the recipient email
/// (resolved guide address when there is one) plus an admin copy per
/// configured address. Each target is independent; there is no retry.
pub async fn dispatch_tip_notifications(
    mailer: &Mailer,
    store: &Store,
    admin_recipients: &[String],
    record: &TipRecord,
    guide_address: Option<&str>,
) {
    if !mailer.is_configured() {
        warn!(
            payment_intent_id = %record.payment_intent_id,
            "email provider not configured, skipping tip notifications"
        );
        return;
    }

    if record.recipient_type == "guide" {
        match guide_address {
            Some(address) => {
                let email = guide_email(record);
                send_and_audit(mailer, store, record, address, &email).await;
            }
            None => {
                warn!(
                    payment_intent_id = %record.payment_intent_id,
                    recipient_name = %record.recipient_name,
                    "no address for tipped guide, admin copy only"
                );
            }
        }
    }

    let admin = admin_email(record);
    for address in admin_recipients {
        send_and_audit(mailer, store, record, address, &admin).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(recipient_type: &str) -> TipRecord {
        TipRecord {
            payment_intent_id: "pi_9".to_string(),
            session_id: "cs_9".to_string(),
            amount: 12.5,
            currency: "gbp".to_string(),
            recipient_type: recipient_type.to_string(),
            recipient_id: "g1".to_string(),
            recipient_name: "Alex".to_string(),
            sender_id: "u1".to_string(),
            sender_name: String::new(),
            message: "Great trip!".to_string(),
            status: "completed".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn guide_email_includes_amount_and_message() {
        let email = guide_email(&record("guide"));
        assert!(email.subject.contains("A guest"));
        assert!(email.html.contains("12.50 GBP"));
        assert!(email.html.contains("Great trip!"));
    }

    #[test]
    fn admin_email_distinguishes_company_pool() {
        let email = admin_email(&record("company"));
        assert!(email.subject.contains("company pool"));
        let email = admin_email(&record("guide"));
        assert!(email.subject.contains("guide Alex"));
    }

    #[tokio::test]
    async fn unconfigured_mailer_refuses_send() {
        let mailer = Mailer::new(Client::new(), String::new(), String::new());
        let err = mailer.send("a@b.c", "s", "<p>x</p>").await.unwrap_err();
        assert!(matches!(err, NotifyError::NotConfigured));
    }
}
