//! Outbound email capability.
//!
//! The portal only composes messages; delivery belongs to whichever
//! transport the deployment wires in behind [`Mailer`]. When no transport is
//! configured the issuer skips sending entirely.

use async_trait::async_trait;
use std::fmt;

#[derive(Debug)]
pub struct MailError(pub String);

impl fmt::Display for MailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mail delivery failed: {}", self.0)
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), MailError>;
}

/// Compose the magic-link message. `ttl_minutes` is surfaced in the copy so
/// the recipient knows how long the link stays valid.
pub fn magic_link_email(link: &str, ttl_minutes: i64) -> (String, String) {
    let subject = "Your StudentHub sign-in link".to_string();
    let html = format!(
        "<p>Hi,</p>\
         <p><a href=\"{}\">Click here to sign in to StudentHub</a>.</p>\
         <p>The link works once and expires in {} minutes. \
         If you did not request it you can ignore this email.</p>",
        link, ttl_minutes
    );
    (subject, html)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every send; optionally fails them all.
    pub struct RecordingMailer {
        pub sent: Mutex<Vec<(String, String, String)>>,
        pub fail: bool,
    }

    impl RecordingMailer {
        pub fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        pub fn failing() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), MailError> {
            if self.fail {
                return Err(MailError("smtp unreachable".to_string()));
            }
            self.sent.lock().unwrap().push((
                to.to_string(),
                subject.to_string(),
                html.to_string(),
            ));
            Ok(())
        }
    }
}
