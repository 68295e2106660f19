//! JSON routes. `/api/admin/*` handlers start with [`require_admin`].

pub mod activity;
pub mod bookings;
pub mod payments;
pub mod public;
pub mod settings;
pub mod stripe_webhook;
pub mod vehicles;

use axum::http::HeaderMap;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::firebase::auth::{is_allowed, IdTokenClaims};
use crate::models::{now_rfc3339, ACTIVITY};
use crate::AppState;

/// A verified, allow-listed admin.
#[derive(Debug, Clone)]
pub struct AdminUser {
    pub uid: String,
    pub email: String,
}

/// Verify the bearer ID token and check the email allow-list.
pub async fn require_admin(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<AdminUser, ApiError> {
    let Some(token) = bearer_token(headers) else {
        tracing::warn!("Admin request without bearer token");
        return Err(ApiError::Unauthorized(
            "Invalid or missing bearer token".to_string(),
        ));
    };

    let claims = state.verifier.verify(token).await.map_err(|e| {
        tracing::warn!("Rejected ID token: {e}");
        ApiError::Unauthorized(e.to_string())
    })?;

    authorize(claims, &state.config.admin.emails)
}

/// An allow-listed email only counts once Firebase has verified it.
fn authorize(claims: IdTokenClaims, allow_list: &[String]) -> Result<AdminUser, ApiError> {
    let verified = claims.email_verified == Some(true);
    if !verified || !is_allowed(claims.email.as_deref(), allow_list) {
        tracing::warn!(
            uid = %claims.sub,
            email = claims.email.as_deref().unwrap_or("<none>"),
            verified,
            "Admin access denied"
        );
        return Err(ApiError::Forbidden("Not an admin account".to_string()));
    }

    Ok(AdminUser {
        uid: claims.sub,
        email: claims.email.unwrap_or_default(),
    })
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Append to `admin_activity`. A failed write is logged and otherwise ignored
/// so the admin action it describes still succeeds.
pub async fn log_activity(
    state: &AppState,
    admin: &AdminUser,
    action: &str,
    target: &str,
    details: Value,
) {
    let entry = json!({
        "action": action,
        "actor": admin.email,
        "actor_uid": admin.uid,
        "target": target,
        "details": details,
        "timestamp": now_rfc3339(),
    });
    let Value::Object(fields) = entry else {
        return;
    };
    if let Err(e) = state.db.create(ACTIVITY, &fields).await {
        tracing::warn!(action, target, "Failed to write admin activity: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};
    use axum::response::IntoResponse;

    use crate::firebase::fake::FakeFirestore;

    fn claims(email: &str, verified: Option<bool>) -> IdTokenClaims {
        IdTokenClaims {
            sub: "uid-1".to_string(),
            email: Some(email.to_string()),
            email_verified: verified,
        }
    }

    fn admin() -> AdminUser {
        AdminUser {
            uid: "uid-1".to_string(),
            email: "owner@example.com".to_string(),
        }
    }

    fn headers(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert("authorization", HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn bearer_token_is_extracted() {
        assert_eq!(bearer_token(&headers("Bearer abc.def.ghi")), Some("abc.def.ghi"));
    }

    #[test]
    fn other_schemes_and_empty_tokens_are_ignored() {
        assert_eq!(bearer_token(&headers("Basic dXNlcjpwYXNz")), None);
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&headers("bearer abc")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn verified_allow_listed_email_is_admitted() {
        let list = vec!["Owner@Example.com".to_string()];
        let admin = authorize(claims("owner@example.com", Some(true)), &list).unwrap();
        assert_eq!(admin.uid, "uid-1");
        assert_eq!(admin.email, "owner@example.com");
    }

    #[test]
    fn unverified_email_is_forbidden_even_when_listed() {
        let list = vec!["owner@example.com".to_string()];
        for verified in [Some(false), None] {
            let err = authorize(claims("owner@example.com", verified), &list).unwrap_err();
            assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
        }
    }

    #[test]
    fn unlisted_email_is_forbidden() {
        let list = vec!["owner@example.com".to_string()];
        let err = authorize(claims("mallory@example.com", Some(true)), &list).unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn activity_entry_is_written() {
        let fake = FakeFirestore::start().await;
        let state = fake.state();

        log_activity(&state, &admin(), "vehicle_created", "civic", json!({ "price": 50 })).await;

        let entries = fake.list(ACTIVITY).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["action"], "vehicle_created");
        assert_eq!(entries[0]["actor"], "owner@example.com");
        assert_eq!(entries[0]["target"], "civic");
        assert_eq!(entries[0]["details"]["price"], 50);
    }

    #[tokio::test]
    async fn failed_activity_write_does_not_fail_the_action() {
        let fake = FakeFirestore::start().await;
        fake.fail_writes(ACTIVITY).await;
        let state = fake.state();

        log_activity(&state, &admin(), "booking_deleted", "b1", json!({})).await;

        assert!(fake.list(ACTIVITY).await.is_empty());
        assert!(fake
            .requests()
            .await
            .contains(&format!("POST {ACTIVITY}")));
    }
}
