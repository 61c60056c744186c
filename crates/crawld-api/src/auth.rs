//! HTTP basic authentication for the whole API.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use tracing::debug;

use crate::error::ApiError;

const CHALLENGE: &str = "Basic realm=\"crawld\"";

/// A single username/password pair every request must present.
#[derive(Clone)]
pub struct BasicAuth {
    username: String,
    password: String,
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl BasicAuth {
    /// The username may not contain `:`, which separates it from the
    /// password in the `Authorization` header.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Result<Self, ApiError> {
        let username = username.into();
        if username.contains(':') {
            return Err(ApiError::InvalidRequest(
                "basic auth username cannot contain ':'".into(),
            ));
        }
        Ok(Self {
            username,
            password: password.into(),
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    fn allows(&self, headers: &HeaderMap) -> bool {
        let Some(value) = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
        else {
            return false;
        };
        let Some((scheme, encoded)) = value.split_once(' ') else {
            return false;
        };
        if !scheme.eq_ignore_ascii_case("basic") {
            return false;
        }
        let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };
        match decoded.split_once(':') {
            Some((user, pass)) => user == self.username && pass == self.password,
            None => false,
        }
    }
}

/// Middleware for `axum::middleware::from_fn_with_state`.
pub(crate) async fn require_basic_auth(
    State(auth): State<Arc<BasicAuth>>,
    request: Request,
    next: Next,
) -> Response {
    if auth.allows(request.headers()) {
        return next.run(request).await;
    }
    debug!(target: "crawld.api", method = %request.method(), path = %request.uri().path(), "missing or wrong credentials");
    let mut resp = ApiError::Unauthorized.into_response();
    resp.headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(CHALLENGE));
    resp
}

#[cfg(test)]
mod tests {
    use axum::{Router, body::Body, http::StatusCode, middleware, routing::get};
    use tower::ServiceExt;

    use super::*;

    fn app() -> Router {
        let auth = Arc::new(BasicAuth::new("alice", "s3cret:with:colons").unwrap());
        Router::new()
            .route("/ping", get(|| async { "pong" }))
            .layer(middleware::from_fn_with_state(auth, require_basic_auth))
    }

    fn request(authorization: Option<String>) -> Request {
        let mut builder = axum::http::Request::builder().uri("/ping");
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn basic(user_pass: &str) -> Option<String> {
        Some(format!("Basic {}", STANDARD.encode(user_pass)))
    }

    #[test]
    fn username_with_colon_is_rejected() {
        assert!(BasicAuth::new("a:b", "pw").is_err());
        assert!(BasicAuth::new("ab", "p:w").is_ok());
    }

    #[tokio::test]
    async fn missing_credentials_get_a_challenge() {
        let resp = app().oneshot(request(None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            resp.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            CHALLENGE
        );
    }

    #[tokio::test]
    async fn wrong_credentials_are_refused() {
        for value in [
            basic("alice:nope"),
            basic("bob:s3cret:with:colons"),
            basic("alice"),
            Some("Basic !!not-base64!!".into()),
            Some("Bearer abc".into()),
        ] {
            let resp = app().oneshot(request(value)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn right_credentials_pass_through() {
        let resp = app()
            .oneshot(request(basic("alice:s3cret:with:colons")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let lower = request(Some(format!(
            "basic {}",
            STANDARD.encode("alice:s3cret:with:colons")
        )));
        let resp = app().oneshot(lower).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
