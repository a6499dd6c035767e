use chrono::NaiveDate;
use chrono_tz::Tz;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use thiserror::Error;
use tracing::info;

use crate::config::MailConfig;
use crate::models::StoredLaunch;

const TIME_FORMAT: &str = "%a %d %b %Y %H:%M %Z";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("mail address error: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("mail build error: {0}")]
    Build(String),
    #[error("smtp error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Digest {
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Builds the mail body for today's changes, or `None` when nothing changed.
pub fn render_digest(changes: &[StoredLaunch], today: NaiveDate, tz: Tz) -> Option<Digest> {
    if changes.is_empty() {
        return None;
    }

    let mut sorted: Vec<&StoredLaunch> = changes.iter().collect();
    sorted.sort_by(|a, b| {
        a.launch
            .scheduled_time
            .cmp(&b.launch.scheduled_time)
            .then_with(|| a.launch.id.cmp(&b.launch.id))
    });

    let plural = if sorted.len() == 1 { "" } else { "s" };
    let subject = format!("{} launch update{plural} for {today}", sorted.len());

    let mut text = String::new();
    let mut html = String::from("<html><body><ul>\n");
    for row in sorted {
        let launch = &row.launch;
        let when = launch
            .scheduled_time
            .with_timezone(&tz)
            .format(TIME_FORMAT)
            .to_string();
        let line = format!(
            "{when} | {} | {} | {}",
            launch.name, launch.provider_name, launch.location_name
        );

        if row.is_cancelled() {
            text.push_str(&format!("[CANCELLED] {line}\n"));
            html.push_str(&format!("  <li><s>{}</s></li>\n", escape_html(&line)));
        } else {
            text.push_str(&format!("{line}\n"));
            let image = if launch.image_url.is_empty() {
                String::new()
            } else {
                format!(
                    "<br><img src=\"{}\" alt=\"\" width=\"240\">",
                    escape_html(&launch.image_url)
                )
            };
            html.push_str(&format!("  <li>{}{image}</li>\n", escape_html(&line)));
        }
    }
    html.push_str("</ul></body></html>\n");

    Some(Digest {
        subject,
        text,
        html,
    })
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

pub struct Mailer {
    config: MailConfig,
}

impl Mailer {
    pub fn new(config: MailConfig) -> Self {
        Self { config }
    }

    pub fn build_message(&self, digest: &Digest) -> Result<Message, NotifyError> {
        let mut builder = Message::builder()
            .from(self.config.from.parse::<Mailbox>()?)
            .subject(digest.subject.clone());
        for recipient in &self.config.to {
            builder = builder.to(recipient.parse::<Mailbox>()?);
        }
        builder
            .multipart(MultiPart::alternative_plain_html(
                digest.text.clone(),
                digest.html.clone(),
            ))
            .map_err(|err| NotifyError::Build(err.to_string()))
    }

    pub fn send(&self, digest: &Digest) -> Result<(), NotifyError> {
        let message = self.build_message(digest)?;

        let mut transport =
            SmtpTransport::starttls_relay(&self.config.smtp_host)?.port(self.config.smtp_port);
        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            transport = transport.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        transport.build().send(&message)?;

        info!(
            recipients = self.config.to.len(),
            subject = %digest.subject,
            "launch digest sent"
        );
        Ok(())
    }
}
