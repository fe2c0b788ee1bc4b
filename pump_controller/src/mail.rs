//! Notification mail. Plain text to each configured address through the
//! local SMTP relay; failures are logged and swallowed, mail is best effort.

use std::time::Duration;

use lettre::{Message, SmtpTransport, Transport};
use tracing::{debug, warn};

use crate::util::retry_async;

const MAIL_TRIES: u32 = 6;
const MAIL_RETRY_PAUSE: Duration = Duration::from_secs(3);

pub struct Mailer {
    addresses: Vec<String>,
    server: String,
}

impl Mailer {
    pub fn new(addresses: Vec<String>, server: String) -> Self {
        Self { addresses, server }
    }

    pub async fn send(&self, subject: &str, body: &str) {
        for address in &self.addresses {
            let result = retry_async(MAIL_TRIES, MAIL_RETRY_PAUSE, move || async move {
                self.send_one(address, subject, body)
            })
            .await;
            match result {
                Ok(()) => debug!(to = %address, subject, "mail sent"),
                Err(e) => warn!(to = %address, subject, error = %e, "mail failed"),
            }
        }
    }

    fn send_one(&self, address: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        let message = Message::builder()
            .from(address.parse()?)
            .to(address.parse()?)
            .subject(subject)
            .body(body.to_string())?;
        let transport = SmtpTransport::builder_dangerous(&self.server).build();
        transport.send(&message)?;
        Ok(())
    }
}
