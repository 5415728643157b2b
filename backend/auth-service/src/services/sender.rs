//! Outbound OTP and password-reset delivery.
//!
//! Both channels hide behind traits so the orchestrator (and the test suite)
//! never touches SMTP or SNS directly. Each production implementation has a
//! no-op development mode: with SMTP unconfigured or SMS disabled, the code
//! is logged instead of sent.

use crate::config::{EmailSettings, SmsSettings};
use crate::error::{AuthError, Result};
use async_trait::async_trait;
use aws_sdk_sns::Client as SnsClient;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_otp(&self, recipient: &str, code: &str, window_minutes: i64) -> Result<()>;
    async fn send_password_reset(&self, recipient: &str, token: &str) -> Result<()>;
}

#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send_otp(&self, phone_number: &str, code: &str, window_minutes: i64) -> Result<()>;
}

/// SMTP transport wrapper (or no-op when no host is configured).
#[derive(Clone)]
pub struct LettreEmailSender {
    transport: Option<Arc<AsyncSmtpTransport<Tokio1Executor>>>,
    from: Mailbox,
}

impl LettreEmailSender {
    pub fn new(config: &EmailSettings) -> Result<Self> {
        let from = config
            .smtp_from
            .parse::<Mailbox>()
            .map_err(|e| AuthError::Internal(format!("Invalid SMTP_FROM address: {}", e)))?;

        let transport = if config.smtp_host.trim().is_empty() {
            warn!("SMTP host not configured; email sender will operate in no-op mode");
            None
        } else {
            let builder = if config.use_starttls {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            } else {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            }
            .map_err(|e| {
                AuthError::Internal(format!("Failed to configure SMTP transport: {}", e))
            })?
            .port(config.smtp_port)
            .timeout(Some(Duration::from_secs(config.timeout_seconds)));

            let builder = if let (Some(username), Some(password)) =
                (&config.smtp_username, &config.smtp_password)
            {
                builder.credentials(Credentials::new(username.to_string(), password.to_string()))
            } else {
                builder
            };

            Some(Arc::new(builder.build()))
        };

        Ok(Self { transport, from })
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    async fn send_mail(&self, recipient: &str, subject: &str, body: &str) -> Result<()> {
        let Some(transport) = &self.transport else {
            info!(recipient = %mask_email(recipient), subject, "email not sent (no-op mode)");
            return Ok(());
        };

        let to = recipient
            .parse::<Mailbox>()
            .map_err(|e| AuthError::Validation(format!("Invalid recipient address: {}", e)))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| AuthError::Internal(format!("Failed to build email: {}", e)))?;

        transport.send(message).await.map_err(|e| {
            error!(recipient = %mask_email(recipient), error = %e, "failed to send email");
            AuthError::OtpDeliveryFailed
        })?;

        info!(recipient = %mask_email(recipient), "email sent");
        Ok(())
    }
}

#[async_trait]
impl EmailSender for LettreEmailSender {
    async fn send_otp(&self, recipient: &str, code: &str, window_minutes: i64) -> Result<()> {
        let subject = "Your sign-in verification code";
        let body = format!(
            "Your verification code is: {}\n\nThe code expires in {} minutes.\n\nIf you did not try to sign in, please change your password.",
            code, window_minutes
        );
        self.send_mail(recipient, subject, &body).await
    }

    async fn send_password_reset(&self, recipient: &str, token: &str) -> Result<()> {
        let subject = "Password reset request";
        let body = format!(
            "We received a request to reset your password.\n\nUse the following code to continue: {}\n\nThis code expires in 1 hour. If you did not request this, you can ignore this email.",
            token
        );
        self.send_mail(recipient, subject, &body).await
    }
}

/// SMS delivery via AWS SNS, with a development no-op fallback.
#[derive(Clone)]
pub struct SnsSmsSender {
    client: Option<SnsClient>,
    sender_id: Option<String>,
}

impl SnsSmsSender {
    pub fn new(client: Option<SnsClient>, settings: &SmsSettings) -> Self {
        if client.is_none() || !settings.enabled {
            warn!("SMS delivery not configured; codes will be logged instead");
        }
        Self {
            client: if settings.enabled { client } else { None },
            sender_id: settings.sender_id.clone(),
        }
    }
}

#[async_trait]
impl SmsSender for SnsSmsSender {
    async fn send_otp(&self, phone_number: &str, code: &str, window_minutes: i64) -> Result<()> {
        let message = format!(
            "Your verification code is: {}. This code expires in {} minutes.",
            code, window_minutes
        );

        let Some(sns) = &self.client else {
            // Development mode: log the code instead of sending SMS
            warn!(
                phone = %mask_phone(phone_number),
                code = %code,
                "SMS not configured - verification code logged for development"
            );
            return Ok(());
        };

        let mut request = sns
            .publish()
            .phone_number(phone_number)
            .message(&message)
            .message_attributes(
                "AWS.SNS.SMS.SMSType",
                aws_sdk_sns::types::MessageAttributeValue::builder()
                    .data_type("String")
                    .string_value("Transactional")
                    .build()
                    .map_err(|e| {
                        AuthError::Internal(format!("Failed to build SMS attribute: {}", e))
                    })?,
            );

        if let Some(sender_id) = &self.sender_id {
            request = request.message_attributes(
                "AWS.SNS.SMS.SenderID",
                aws_sdk_sns::types::MessageAttributeValue::builder()
                    .data_type("String")
                    .string_value(sender_id)
                    .build()
                    .map_err(|e| {
                        AuthError::Internal(format!("Failed to build SMS attribute: {}", e))
                    })?,
            );
        }

        match request.send().await {
            Ok(output) => {
                info!(
                    phone = %mask_phone(phone_number),
                    message_id = ?output.message_id(),
                    "SMS sent"
                );
                Ok(())
            }
            Err(e) => {
                error!(phone = %mask_phone(phone_number), error = %e, "failed to send SMS");
                Err(AuthError::OtpDeliveryFailed)
            }
        }
    }
}

/// Keep the last four characters; mask the rest.
pub fn mask_phone(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

/// Keep the first character of the local part and the domain.
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{}***@{}", first, domain)
        }
        _ => "***".to_string(),
    }
}
