//! HTML email notifications over SMTP (STARTTLS + login).

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::error::AppError;

pub const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// Relay settings as read from the environment. Credentials stay optional
/// here so the server can start without them; sending requires both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Defaults to `user` when unset.
    pub from: Option<String>,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_SMTP_HOST.to_string(),
            port: DEFAULT_SMTP_PORT,
            user: None,
            password: None,
            from: None,
        }
    }
}

#[async_trait]
pub trait NotificationSink {
    async fn send(&self, recipients: &[String], subject: &str, html_body: &str) -> Result<(), AppError>;
}

pub struct SmtpMailer {
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(settings: &SmtpSettings) -> Result<Self, AppError> {
        let (user, password) = match (&settings.user, &settings.password) {
            (Some(user), Some(password)) if !user.is_empty() && !password.is_empty() => (user, password),
            _ => {
                tracing::error!("SMTP credentials not configured");
                return Err(AppError::Config("SMTP credentials not configured".to_string()));
            }
        };

        let from = settings
            .from
            .as_deref()
            .unwrap_or(user)
            .parse::<Mailbox>()
            .map_err(|err| AppError::Config(format!("Invalid FROM_EMAIL: {}", err)))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .map_err(|err| AppError::Config(format!("Invalid SMTP relay {}: {}", settings.host, err)))?
            .port(settings.port)
            .credentials(Credentials::new(user.clone(), password.clone()))
            .build();

        Ok(Self { from, transport })
    }
}

/// Build the HTML message addressed to every recipient.
pub fn build_message(
    from: &Mailbox,
    recipients: &[String],
    subject: &str,
    html_body: &str,
) -> Result<Message, AppError> {
    if recipients.is_empty() {
        return Err(AppError::InvalidInput("At least one recipient is required".to_string()));
    }

    let mut builder = Message::builder()
        .from(from.clone())
        .subject(subject)
        .header(ContentType::TEXT_HTML);

    for recipient in recipients {
        let mailbox = recipient
            .trim()
            .parse::<Mailbox>()
            .map_err(|err| AppError::InvalidInput(format!("Invalid recipient {}: {}", recipient, err)))?;
        builder = builder.to(mailbox);
    }

    builder
        .body(html_body.to_string())
        .map_err(|err| AppError::Delivery(err.to_string()))
}

#[async_trait]
impl NotificationSink for SmtpMailer {
    async fn send(&self, recipients: &[String], subject: &str, html_body: &str) -> Result<(), AppError> {
        let message = build_message(&self.from, recipients, subject, html_body)?;

        match self.transport.send(message).await {
            Ok(_) => {
                tracing::info!("Email sent successfully to {}", recipients.join(", "));
                Ok(())
            }
            Err(err) => {
                tracing::error!("Failed to send email: {}", err);
                Err(AppError::Delivery(err.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SmtpSettings {
        SmtpSettings {
            user: Some("monitor@example.com".into()),
            password: Some("app-password".into()),
            ..SmtpSettings::default()
        }
    }

    fn rendered(message: &Message) -> String {
        String::from_utf8(message.formatted()).unwrap()
    }

    #[test]
    fn missing_credentials_are_a_configuration_error() {
        let err = SmtpMailer::new(&SmtpSettings::default()).err().unwrap();
        assert!(matches!(err, AppError::Config(_)));

        let no_password = SmtpSettings {
            password: None,
            ..settings()
        };
        assert!(matches!(SmtpMailer::new(&no_password), Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn mailer_builds_with_credentials() {
        assert!(SmtpMailer::new(&settings()).is_ok());
    }

    #[tokio::test]
    async fn unreachable_relay_is_a_delivery_error() {
        let mailer = SmtpMailer::new(&SmtpSettings {
            host: "127.0.0.1".into(),
            port: 1,
            ..settings()
        })
        .unwrap();

        let err = mailer
            .send(&["ops@example.com".to_string()], "Report", "<p>hi</p>")
            .await
            .err()
            .unwrap();

        assert!(matches!(err, AppError::Delivery(_)), "got {:?}", err);
    }

    #[test]
    fn message_is_html_and_addressed_to_all_recipients() {
        let from: Mailbox = "monitor@example.com".parse().unwrap();
        let recipients = vec!["ops@example.com".to_string(), "sales@example.com".to_string()];

        let message = build_message(&from, &recipients, "Child publisher report", "<p>3 ready</p>").unwrap();
        let text = rendered(&message);

        assert!(text.contains("Subject: Child publisher report"));
        assert!(text.contains("Content-Type: text/html"));
        assert!(text.contains("ops@example.com"));
        assert!(text.contains("sales@example.com"));
        assert!(text.contains("<p>3 ready</p>"));
    }

    #[test]
    fn empty_or_invalid_recipients_are_rejected() {
        let from: Mailbox = "monitor@example.com".parse().unwrap();
        assert!(matches!(
            build_message(&from, &[], "s", "b"),
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            build_message(&from, &["not an address".to_string()], "s", "b"),
            Err(AppError::InvalidInput(_))
        ));
    }
}
