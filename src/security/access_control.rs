//! Identity extraction middleware.
//!
//! The gateway sits behind an edge authenticator that stamps verified
//! identity headers onto each request. This middleware lifts them into a
//! typed [`UserContext`] extension for the rate limiter and the proxy
//! handler. Requests without identity headers pass through as anonymous
//! unless the config demands authentication.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::config::AuthConfig;

/// Header carrying the authenticated subject identifier.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header carrying comma-separated role claims.
pub const USER_ROLES_HEADER: &str = "x-user-roles";

/// Context attached to authenticated requests.
#[derive(Clone, Debug)]
pub struct UserContext {
    pub subject: String,
    pub roles: Vec<String>,
}

impl UserContext {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case("admin"))
    }
}

pub async fn access_control_middleware(
    State(config): State<AuthConfig>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let subject = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    match subject {
        Some(subject) => {
            let roles: Vec<String> = req
                .headers()
                .get(USER_ROLES_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(|v| {
                    v.split(',')
                        .map(|r| r.trim().to_string())
                        .filter(|r| !r.is_empty())
                        .collect()
                })
                .unwrap_or_default();

            req.extensions_mut().insert(UserContext { subject, roles });
            next.run(req).await
        }
        None if config.required => {
            (StatusCode::UNAUTHORIZED, "Missing X-User-Id header").into_response()
        }
        None => next.run(req).await,
    }
}
