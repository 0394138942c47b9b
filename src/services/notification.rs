//! Notification service implementation
//!
//! This service renders mail templates and hands the messages to a [`Mailer`].
//! Production uses SMTP through lettre; tests use the in-memory mailer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{SmtpConfig, SmtpTls};
use crate::models::{Event, ReminderDue, User};
use crate::utils::errors::{MailError, MailResult};
use crate::utils::helpers::{escape_html, format_timestamp};

/// A file attached to a mail
#[derive(Debug, Clone, PartialEq)]
pub struct MailAttachment {
    pub filename: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

/// A fully rendered mail
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMail {
    pub to_name: String,
    pub to_email: String,
    pub subject: String,
    pub text: String,
    pub html: String,
    pub attachments: Vec<MailAttachment>,
}

/// Something that can deliver mail
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> MailResult<()>;
}

/// SMTP delivery through lettre
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> MailResult<Self> {
        let builder = match config.tls {
            SmtpTls::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| MailError::Transport(e.to_string()))?,
            SmtpTls::Starttls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| MailError::Transport(e.to_string()))?,
            SmtpTls::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host),
        };

        let builder = builder.port(config.port);
        let builder = match (&config.username, &config.password) {
            (Some(username), Some(password)) => {
                builder.credentials(Credentials::new(username.clone(), password.clone()))
            }
            _ => builder,
        };

        let from = mailbox(&config.from_name, &config.from_address)?;

        info!(host = %config.host, port = config.port, tls = ?config.tls, "SMTP mailer configured");
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    fn build_message(&self, mail: &OutgoingMail) -> MailResult<Message> {
        let body = MultiPart::alternative_plain_html(mail.text.clone(), mail.html.clone());
        let body = mail.attachments.iter().try_fold(MultiPart::mixed().multipart(body), |parts, attachment| {
            let content_type = ContentType::parse(&attachment.content_type)
                .map_err(|e| MailError::Build(e.to_string()))?;
            Ok::<_, MailError>(parts.singlepart(
                Attachment::new(attachment.filename.clone()).body(attachment.body.clone(), content_type),
            ))
        })?;

        Message::builder()
            .from(self.from.clone())
            .to(mailbox(&mail.to_name, &mail.to_email)?)
            .subject(mail.subject.clone())
            .multipart(body)
            .map_err(|e| MailError::Build(e.to_string()))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: &OutgoingMail) -> MailResult<()> {
        let message = self.build_message(mail)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;
        Ok(())
    }
}

fn mailbox(name: &str, address: &str) -> MailResult<Mailbox> {
    let address = address
        .parse()
        .map_err(|_| MailError::InvalidAddress(address.to_string()))?;
    let name = if name.trim().is_empty() { None } else { Some(name.to_string()) };
    Ok(Mailbox::new(name, address))
}

/// Keeps mail in memory. Addresses in `failing` are rejected.
#[derive(Debug, Clone, Default)]
pub struct MemoryMailer {
    sent: Arc<Mutex<Vec<OutgoingMail>>>,
    failing: Arc<Mutex<Vec<String>>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make delivery to `email` fail
    pub fn fail_for(&self, email: &str) {
        self.failing.lock().unwrap_or_else(|p| p.into_inner()).push(email.to_string());
    }

    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, mail: &OutgoingMail) -> MailResult<()> {
        let failing = self.failing.lock().unwrap_or_else(|p| p.into_inner()).contains(&mail.to_email);
        if failing {
            return Err(MailError::Transport(format!("delivery to {} refused", mail.to_email)));
        }
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).push(mail.clone());
        Ok(())
    }
}

/// Mail template: `{name}` placeholders are substituted, HTML-escaped in the HTML part
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub key: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Notification statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationStats {
    pub total_sent: u64,
    pub total_failed: u64,
    pub sent_by_template: HashMap<String, u64>,
}

/// Notification service for rendering and sending mail
#[derive(Clone)]
pub struct NotificationService {
    mailer: Arc<dyn Mailer>,
    templates: Arc<HashMap<String, MessageTemplate>>,
    stats: Arc<Mutex<NotificationStats>>,
}

impl NotificationService {
    /// Create a new NotificationService instance
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self {
            mailer,
            templates: Arc::new(Self::load_default_templates()),
            stats: Arc::new(Mutex::new(NotificationStats::default())),
        }
    }

    /// Render a template for one recipient
    pub fn render(
        &self,
        template_key: &str,
        to_name: &str,
        to_email: &str,
        parameters: &HashMap<&str, String>,
    ) -> MailResult<OutgoingMail> {
        let template = self
            .templates
            .get(template_key)
            .ok_or_else(|| MailError::Build(format!("Template not found: {}", template_key)))?;

        let mut subject = template.subject.clone();
        let mut text = template.text.clone();
        let mut html = template.html.clone();
        for (key, value) in parameters {
            let placeholder = format!("{{{}}}", key);
            subject = subject.replace(&placeholder, value);
            text = text.replace(&placeholder, value);
            html = html.replace(&placeholder, &escape_html(value));
        }

        Ok(OutgoingMail {
            to_name: to_name.to_string(),
            to_email: to_email.to_string(),
            subject,
            text,
            html,
            attachments: Vec::new(),
        })
    }

    /// Deliver one mail
    pub async fn send(&self, template_key: &str, mail: OutgoingMail) -> MailResult<()> {
        debug!(to = %mail.to_email, template_key, "Sending mail");
        match self.mailer.send(&mail).await {
            Ok(()) => {
                self.update_stats(template_key, true);
                info!(to = %mail.to_email, template_key, "Mail sent");
                Ok(())
            }
            Err(e) => {
                self.update_stats(template_key, false);
                warn!(to = %mail.to_email, template_key, error = %e, "Failed to send mail");
                Err(e)
            }
        }
    }

    /// Deliver a batch; one result per recipient, in order
    pub async fn send_bulk(&self, template_key: &str, mails: Vec<OutgoingMail>) -> Vec<(String, MailResult<()>)> {
        info!(count = mails.len(), template_key, "Sending mail batch");
        let mut results = Vec::with_capacity(mails.len());
        for mail in mails {
            let email = mail.to_email.clone();
            let result = self.send(template_key, mail).await;
            results.push((email, result));
        }

        let successful = results.iter().filter(|(_, result)| result.is_ok()).count();
        info!(total = results.len(), successful, template_key, "Mail batch completed");
        results
    }

    fn event_parameters(event: &Event) -> HashMap<&'static str, String> {
        HashMap::from([
            ("event_title", event.title.clone()),
            ("event_date", format_timestamp(event.start_date)),
            ("event_location", event.location.clone().unwrap_or_else(|| "TBA".to_string())),
        ])
    }

    /// Invitation with the link to accept or decline
    pub fn invitation_mail(&self, user: &User, event: &Event, link: &str) -> MailResult<OutgoingMail> {
        let mut parameters = Self::event_parameters(event);
        parameters.insert("name", user.name.clone());
        parameters.insert("link", link.to_string());
        self.render("invitation", &user.name, &user.email, &parameters)
    }

    /// Registration confirmation carrying the ticket QR code
    pub fn confirmation_mail(&self, user: &User, event: &Event, ticket_url: &str, qr_svg: &str) -> MailResult<OutgoingMail> {
        let mut parameters = Self::event_parameters(event);
        parameters.insert("name", user.name.clone());
        parameters.insert("ticket_url", ticket_url.to_string());
        let mut mail = self.render("confirmation", &user.name, &user.email, &parameters)?;
        mail.attachments.push(MailAttachment {
            filename: "ticket.svg".to_string(),
            content_type: "image/svg+xml".to_string(),
            body: qr_svg.as_bytes().to_vec(),
        });
        Ok(mail)
    }

    pub fn revocation_mail(&self, name: &str, email: &str, event: &Event) -> MailResult<OutgoingMail> {
        let mut parameters = Self::event_parameters(event);
        parameters.insert("name", name.to_string());
        self.render("revocation", name, email, &parameters)
    }

    pub fn cancellation_mail(&self, name: &str, email: &str, event: &Event) -> MailResult<OutgoingMail> {
        let mut parameters = Self::event_parameters(event);
        parameters.insert("name", name.to_string());
        self.render("event_cancelled", name, email, &parameters)
    }

    pub fn reminder_mail(&self, due: &ReminderDue, ticket_url: &str) -> MailResult<OutgoingMail> {
        let parameters = HashMap::from([
            ("name", due.user_name.clone()),
            ("event_title", due.event_title.clone()),
            ("event_date", format_timestamp(due.event_start)),
            ("event_location", due.event_location.clone().unwrap_or_else(|| "TBA".to_string())),
            ("ticket_url", ticket_url.to_string()),
        ]);
        self.render("reminder", &due.user_name, &due.user_email, &parameters)
    }

    fn update_stats(&self, template_key: &str, success: bool) {
        let mut stats = self.stats.lock().unwrap_or_else(|p| p.into_inner());
        if success {
            stats.total_sent += 1;
            *stats.sent_by_template.entry(template_key.to_string()).or_insert(0) += 1;
        } else {
            stats.total_failed += 1;
        }
    }

    /// Get notification statistics
    pub fn get_stats(&self) -> NotificationStats {
        self.stats.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Get available template keys
    pub fn get_template_keys(&self) -> Vec<String> {
        self.templates.keys().cloned().collect()
    }

    /// Load default mail templates
    fn load_default_templates() -> HashMap<String, MessageTemplate> {
        let templates = [
            MessageTemplate {
                key: "invitation".to_string(),
                subject: "You're invited: {event_title}".to_string(),
                text: "Hi {name},\n\nYou are invited to {event_title} on {event_date} at {event_location}.\n\nAccept or decline here: {link}\n".to_string(),
                html: "<p>Hi {name},</p><p>You are invited to <b>{event_title}</b> on {event_date} at {event_location}.</p><p><a href=\"{link}\">Accept or decline the invitation</a></p>".to_string(),
            },
            MessageTemplate {
                key: "confirmation".to_string(),
                subject: "Your ticket for {event_title}".to_string(),
                text: "Hi {name},\n\nYou are registered for {event_title} on {event_date} at {event_location}.\nYour ticket QR code is attached. Ticket link: {ticket_url}\n".to_string(),
                html: "<p>Hi {name},</p><p>You are registered for <b>{event_title}</b> on {event_date} at {event_location}.</p><p>Your ticket QR code is attached. Show it at the door.</p><p><a href=\"{ticket_url}\">Ticket link</a></p>".to_string(),
            },
            MessageTemplate {
                key: "revocation".to_string(),
                subject: "Your registration for {event_title} was revoked".to_string(),
                text: "Hi {name},\n\nThe organizer revoked your registration for {event_title} on {event_date}.\n".to_string(),
                html: "<p>Hi {name},</p><p>The organizer revoked your registration for <b>{event_title}</b> on {event_date}.</p>".to_string(),
            },
            MessageTemplate {
                key: "event_cancelled".to_string(),
                subject: "{event_title} has been cancelled".to_string(),
                text: "Hi {name},\n\n{event_title}, planned for {event_date} at {event_location}, has been cancelled.\n".to_string(),
                html: "<p>Hi {name},</p><p><b>{event_title}</b>, planned for {event_date} at {event_location}, has been cancelled.</p>".to_string(),
            },
            MessageTemplate {
                key: "reminder".to_string(),
                subject: "Reminder: {event_title} is coming up".to_string(),
                text: "Hi {name},\n\nA reminder that {event_title} starts on {event_date} at {event_location}.\nYour ticket: {ticket_url}\n".to_string(),
                html: "<p>Hi {name},</p><p>A reminder that <b>{event_title}</b> starts on {event_date} at {event_location}.</p><p><a href=\"{ticket_url}\">Your ticket</a></p>".to_string(),
            },
        ];

        templates.into_iter().map(|template| (template.key.clone(), template)).collect()
    }
}
