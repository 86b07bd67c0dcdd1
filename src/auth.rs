use axum::{Extension, Json};
use chrono::{DateTime, Duration, Utc};
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::ops::Add;
use uuid::Uuid;

use crate::err::Error;
use crate::mail::magic_link_email;
use crate::models::{find_student_by_email, StudentIdentity};
use crate::{breaks, proceeds, App, Payload};

/// Magic links stay redeemable this long.
pub const TOKEN_TTL_MINUTES: i64 = 15;

/// Sessions are long-lived bearer credentials; roughly six months.
pub const SESSION_LIFETIME_DAYS: i64 = 180;

/// Long-lived opaque credential handed to the client after redemption. No
/// server-side session table exists; validating the token on later requests
/// is the downstream gateway's concern, not ours.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Authorized {
    pub session: Session,
    pub student: StudentIdentity,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MagicLinkIssued {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magic_link: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MagicLinkRequest {
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyRequest {
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DevLoginRequest {
    pub email: Option<String>,
}

/// All email matching is case-insensitive on trimmed input.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Mint a fresh session: 32 random bytes hashed to an opaque hex token.
pub fn mint_session() -> Session {
    let seed: [u8; 32] = thread_rng().gen();

    let mut hasher: Sha256 = Digest::new();
    hasher.update(seed);
    let token = hex::encode(hasher.finalize());

    Session {
        token,
        expires_at: Utc::now().add(Duration::days(SESSION_LIFETIME_DAYS)),
    }
}

pub async fn request_magic_link(
    Json(body): Json<MagicLinkRequest>,
    Extension(app): Extension<App>,
) -> Payload<MagicLinkIssued> {
    let email = match body.email.as_deref().map(normalize_email) {
        Some(email) if !email.is_empty() => email,
        _ => {
            return breaks(Error::validation("`email` parameter was empty"));
        }
    };

    let student = find_student_by_email(app.records.as_ref(), &email).await?;
    if student.is_none() {
        return breaks(Error::not_found(format!(
            "Student with email `{}` does not exist!",
            email
        )));
    }

    let token = Uuid::new_v4().to_string();
    let expires_at = Utc::now().add(Duration::minutes(TOKEN_TTL_MINUTES));
    app.tokens.put(&token, &email, expires_at);

    let link = format!(
        "{}/auth/verify?token={}",
        app.config.base_url.trim_end_matches('/'),
        token
    );
    log::info!("issued magic link for `{}`, expires {}", email, expires_at);

    let message = if let Some(mailer) = &app.mailer {
        let (subject, html) = magic_link_email(&link, TOKEN_TTL_MINUTES);
        mailer.send(&email, &subject, &html).await?;
        "Magic link sent! Check your inbox.".to_string()
    } else if app.config.dev_mode {
        "Mailer not configured; magic link returned for development.".to_string()
    } else {
        log::warn!("no mailer configured, magic link for `{}` was not delivered", email);
        "Magic link issued. Contact support if no email arrives.".to_string()
    };

    // The raw link leaves the process only under the explicit dev flag and
    // never when real delivery is configured. Absence of a mailer alone is
    // not treated as "we are in development".
    let magic_link = if app.config.dev_mode && app.mailer.is_none() {
        Some(link)
    } else {
        None
    };

    proceeds(MagicLinkIssued {
        message,
        magic_link,
        expires_at,
    })
}

pub async fn verify_magic_link(
    Json(body): Json<VerifyRequest>,
    Extension(app): Extension<App>,
) -> Payload<Authorized> {
    let token = match body.token.as_deref().map(str::trim) {
        Some(token) if !token.is_empty() => token.to_string(),
        _ => {
            return breaks(Error::validation("`token` parameter was empty"));
        }
    };

    // One-time use: the entry leaves the store before anything else can
    // happen, and a second redemption of the same token finds nothing.
    let pending = match app.tokens.take(&token) {
        Some(pending) => pending,
        None => {
            return breaks(Error::unauthorized("Magic link is invalid or expired!"));
        }
    };
    if Utc::now() > pending.expires_at {
        return breaks(Error::unauthorized("Magic link is invalid or expired!"));
    }

    let student = match find_student_by_email(app.records.as_ref(), &pending.email).await? {
        Some(record) => record,
        None => {
            // The token was legitimately consumed; the account is what's gone.
            return breaks(Error::not_found(format!(
                "Student with email `{}` no longer exists!",
                pending.email
            )));
        }
    };

    let session = mint_session();
    log::info!("magic link redeemed for `{}`", pending.email);
    proceeds(Authorized {
        session,
        student: StudentIdentity::from_record(&student),
    })
}

/// Development bypass: mint a session without a token. Hard-fails unless the
/// deployment set the explicit dev flag; shares nothing with redemption
/// beyond [`mint_session`].
pub async fn dev_login(
    Json(body): Json<DevLoginRequest>,
    Extension(app): Extension<App>,
) -> Payload<Authorized> {
    if !app.config.dev_mode {
        return breaks(Error::forbidden("Developer login is disabled!"));
    }

    let email = normalize_email(
        body.email
            .as_deref()
            .unwrap_or(&app.config.dev_email),
    );
    let student = match find_student_by_email(app.records.as_ref(), &email).await? {
        Some(record) => record,
        None => {
            return breaks(Error::not_found(format!(
                "Student with email `{}` does not exist!",
                email
            )));
        }
    };

    let session = mint_session();
    log::info!("dev login as `{}`", email);
    proceeds(Authorized {
        session,
        student: StudentIdentity::from_record(&student),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::err::Maybe;
    use crate::mail::testing::RecordingMailer;
    use crate::models::collections;
    use crate::store::testing::student_fields;
    use crate::testutil::harness;
    use crate::tokens::TokenStore;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn issued(result: Payload<MagicLinkIssued>) -> MagicLinkIssued {
        match result.unwrap() {
            Maybe::Fine(success) => success.into_value(),
            Maybe::Nothing(err) => panic!("unexpected error: {:?}", err),
        }
    }

    fn token_of(link: &str) -> String {
        link.split("token=").nth(1).unwrap().to_string()
    }

    #[tokio::test]
    async fn unknown_email_yields_not_found() {
        let h = harness(true);
        let result = request_magic_link(
            Json(MagicLinkRequest {
                email: Some("ghost@example.com".to_string()),
            }),
            Extension(h.app.clone()),
        )
        .await
        .unwrap();
        assert!(matches!(result, Maybe::Nothing(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn missing_email_is_rejected() {
        let h = harness(true);
        let result = request_magic_link(
            Json(MagicLinkRequest { email: None }),
            Extension(h.app.clone()),
        )
        .await
        .unwrap();
        assert!(matches!(
            result,
            Maybe::Nothing(Error::ValidationError { .. })
        ));
    }

    #[tokio::test]
    async fn issuance_stores_a_bound_token_and_exposes_link_in_dev() {
        let h = harness(true);
        h.records.insert(
            collections::STUDENTS,
            "rec1",
            student_fields("Jane@Example.com ", "Jane Doe"),
        );

        let body = issue(&h, " JANE@example.COM ").await;
        let link = body.magic_link.expect("dev mode exposes the link");
        assert!(link.starts_with("http://portal.test/auth/verify?token="));

        let pending = h.tokens.peek(&token_of(&link)).unwrap();
        assert_eq!(pending.email, "jane@example.com");
        assert_eq!(pending.expires_at, body.expires_at);

        let now = Utc::now();
        assert!(pending.expires_at > now.add(Duration::minutes(14)));
        assert!(pending.expires_at < now.add(Duration::minutes(16)));
    }

    #[tokio::test]
    async fn issuance_never_exposes_link_outside_dev() {
        let h = harness(false);
        h.records.insert(
            collections::STUDENTS,
            "rec1",
            student_fields("jane@example.com", "Jane Doe"),
        );
        let body = issue(&h, "jane@example.com").await;
        assert!(body.magic_link.is_none());
    }

    #[tokio::test]
    async fn issuance_never_exposes_link_when_delivery_is_configured() {
        let h = harness(true);
        h.records.insert(
            collections::STUDENTS,
            "rec1",
            student_fields("jane@example.com", "Jane Doe"),
        );
        let mut app = h.app.clone();
        app.mailer = Some(Arc::new(RecordingMailer::new()));
        let result = request_magic_link(
            Json(MagicLinkRequest {
                email: Some("jane@example.com".to_string()),
            }),
            Extension(app),
        )
        .await;
        let body = issued(result);
        assert!(body.magic_link.is_none());
    }

    #[tokio::test]
    async fn issued_tokens_are_unique() {
        let h = harness(true);
        h.records.insert(
            collections::STUDENTS,
            "rec1",
            student_fields("jane@example.com", "Jane Doe"),
        );

        let mut seen = HashSet::new();
        for _ in 0..10 {
            let body = issue(&h, "jane@example.com").await;
            assert!(seen.insert(token_of(&body.magic_link.unwrap())));
        }
        assert_eq!(seen.len(), 10);
    }

    #[tokio::test]
    async fn mailer_receives_the_link_and_failures_are_distinct() {
        let h = harness(false);
        h.records.insert(
            collections::STUDENTS,
            "rec1",
            student_fields("jane@example.com", "Jane Doe"),
        );

        let mailer = Arc::new(RecordingMailer::new());
        let mut app = h.app.clone();
        app.mailer = Some(mailer.clone());
        let result = request_magic_link(
            Json(MagicLinkRequest {
                email: Some("jane@example.com".to_string()),
            }),
            Extension(app),
        )
        .await
        .unwrap();
        assert!(matches!(result, Maybe::Fine(_)));

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (to, _, html) = &sent[0];
        assert_eq!(to, "jane@example.com");
        assert!(html.contains("/auth/verify?token="));
        drop(sent);

        let mut failing_app = h.app.clone();
        failing_app.mailer = Some(Arc::new(RecordingMailer::failing()));
        match request_magic_link(
            Json(MagicLinkRequest {
                email: Some("jane@example.com".to_string()),
            }),
            Extension(failing_app),
        )
        .await
        {
            Err(Error::UpstreamFailure { kind, .. }) => assert_eq!(kind, "Mailer"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn redemption_works_exactly_once() {
        let h = harness(true);
        h.records.insert(
            collections::STUDENTS,
            "rec1",
            student_fields("jane@example.com", "Jane Doe"),
        );
        let body = issue(&h, "jane@example.com").await;
        let token = token_of(&body.magic_link.unwrap());

        let first = verify(&h, &token).await;
        let authorized = match first {
            Maybe::Fine(success) => success.into_value(),
            Maybe::Nothing(err) => panic!("first redemption failed: {:?}", err),
        };
        assert_eq!(authorized.student.email, "jane@example.com");
        assert_eq!(authorized.session.token.len(), 64);
        assert!(h.tokens.peek(&token).is_none());

        let second = verify(&h, &token).await;
        assert!(matches!(second, Maybe::Nothing(Error::Unauthorized { .. })));
    }

    #[tokio::test]
    async fn expiry_is_checked_at_redemption_time() {
        let h = harness(true);
        h.records.insert(
            collections::STUDENTS,
            "rec1",
            student_fields("jane@example.com", "Jane Doe"),
        );

        // Redeemed one second past the window.
        h.tokens.put(
            "stale",
            "jane@example.com",
            Utc::now() - Duration::seconds(1),
        );
        let expired = verify(&h, "stale").await;
        assert!(matches!(
            expired,
            Maybe::Nothing(Error::Unauthorized { .. })
        ));
        assert!(h.tokens.peek("stale").is_none());

        // Redeemed just inside the window.
        h.tokens.put(
            "fresh",
            "jane@example.com",
            Utc::now().add(Duration::seconds(1)),
        );
        let ok = verify(&h, "fresh").await;
        assert!(matches!(ok, Maybe::Fine(_)));
    }

    #[tokio::test]
    async fn deleted_student_fails_with_not_found_after_consuming_the_token() {
        let h = harness(true);
        h.records.insert(
            collections::STUDENTS,
            "rec1",
            student_fields("jane@example.com", "Jane Doe"),
        );
        let body = issue(&h, "jane@example.com").await;
        let token = token_of(&body.magic_link.unwrap());

        h.records.remove(collections::STUDENTS, "rec1");

        let result = verify(&h, &token).await;
        assert!(matches!(result, Maybe::Nothing(Error::NotFound { .. })));
        // Consumed regardless of the lookup outcome.
        assert!(h.tokens.peek(&token).is_none());
    }

    #[tokio::test]
    async fn dev_login_is_forbidden_without_the_flag() {
        let h = harness(false);
        h.records.insert(
            collections::STUDENTS,
            "rec1",
            student_fields("test@example.com", "Test Student"),
        );
        let result = dev_login(
            Json(DevLoginRequest {
                email: Some("test@example.com".to_string()),
            }),
            Extension(h.app.clone()),
        )
        .await
        .unwrap();
        assert!(matches!(result, Maybe::Nothing(Error::Forbidden { .. })));
    }

    #[tokio::test]
    async fn dev_login_defaults_to_the_configured_email() {
        let h = harness(true);
        h.records.insert(
            collections::STUDENTS,
            "rec1",
            student_fields("test@example.com", "Test Student"),
        );
        let result = dev_login(Json(DevLoginRequest { email: None }), Extension(h.app.clone()))
            .await
            .unwrap();
        assert!(matches!(result, Maybe::Fine(_)));

        let unknown = dev_login(
            Json(DevLoginRequest {
                email: Some("ghost@example.com".to_string()),
            }),
            Extension(h.app.clone()),
        )
        .await
        .unwrap();
        assert!(matches!(unknown, Maybe::Nothing(Error::NotFound { .. })));
    }

    #[test]
    fn sessions_are_opaque_unique_and_long_lived() {
        let a = mint_session();
        let b = mint_session();
        assert_ne!(a.token, b.token);
        assert_eq!(a.token.len(), 64);
        assert!(a.token.chars().all(|c| c.is_ascii_hexdigit()));

        let now = Utc::now();
        assert!(a.expires_at > now.add(Duration::days(SESSION_LIFETIME_DAYS - 1)));
        assert!(a.expires_at < now.add(Duration::days(SESSION_LIFETIME_DAYS + 1)));
    }

    async fn issue(h: &crate::testutil::Harness, email: &str) -> MagicLinkIssued {
        let result = request_magic_link(
            Json(MagicLinkRequest {
                email: Some(email.to_string()),
            }),
            Extension(h.app.clone()),
        )
        .await;
        issued(result)
    }

    async fn verify(h: &crate::testutil::Harness, token: &str) -> Maybe<Authorized> {
        verify_magic_link(
            Json(VerifyRequest {
                token: Some(token.to_string()),
            }),
            Extension(h.app.clone()),
        )
        .await
        .unwrap()
    }
}
