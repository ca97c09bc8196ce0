//! Origin allow-list and the middleware that enforces it.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

/// Which request origins may use the server.
///
/// Entries match exactly, ignoring ASCII case and a trailing `/`. The entry
/// `*` admits any origin. A request without an `Origin` header never passes.
#[derive(Clone, Debug, Default)]
pub struct OriginPolicy {
    allowed: Vec<String>,
    any: bool,
}

impl OriginPolicy {
    /// Build a policy from configured entries. Blank entries are ignored.
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut policy = Self::default();
        for origin in origins {
            let origin = normalize(origin.as_ref());
            if origin == "*" {
                policy.any = true;
            } else if !origin.is_empty() {
                policy.allowed.push(origin.to_ascii_lowercase());
            }
        }
        policy
    }

    /// Whether `origin` (the raw header value, if any) is admitted.
    pub fn allows(&self, origin: Option<&str>) -> bool {
        let Some(origin) = origin.map(normalize).filter(|o| !o.is_empty()) else {
            return false;
        };
        self.any || self.allowed.iter().any(|a| a.eq_ignore_ascii_case(origin))
    }

    /// Same as [`allows`](Self::allows) for a header value.
    pub fn allows_header(&self, origin: &HeaderValue) -> bool {
        self.allows(origin.to_str().ok())
    }

    /// Whether no origin can ever pass.
    pub fn is_closed(&self) -> bool {
        !self.any && self.allowed.is_empty()
    }
}

fn normalize(origin: &str) -> &str {
    let origin = origin.trim();
    origin.strip_suffix('/').unwrap_or(origin)
}

/// Reject requests from origins outside the policy with `403 Forbidden`.
pub async fn require_allowed_origin(
    State(policy): State<Arc<OriginPolicy>>,
    request: Request,
    next: Next,
) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok());
    if policy.allows(origin) {
        return next.run(request).await;
    }
    debug!(
        origin = origin.unwrap_or("<none>"),
        path = request.uri().path(),
        "rejected request from disallowed origin"
    );
    (StatusCode::FORBIDDEN, "Forbidden").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_allowed() {
        let policy = OriginPolicy::new(["https://plaza.example"]);
        assert!(policy.allows(Some("https://plaza.example")));
        assert!(!policy.allows(Some("https://other.example")));
    }

    #[test]
    fn prefix_is_not_enough() {
        let policy = OriginPolicy::new(["https://plaza.example"]);
        assert!(!policy.allows(Some("https://plaza.example.evil.test")));
        assert!(!policy.allows(Some("https://plaza.exampl")));
    }

    #[test]
    fn trailing_slash_and_case_ignored() {
        let policy = OriginPolicy::new(["http://localhost:5173/"]);
        assert!(policy.allows(Some("http://localhost:5173")));
        assert!(policy.allows(Some("HTTP://LOCALHOST:5173/")));
    }

    #[test]
    fn missing_origin_is_forbidden() {
        assert!(!OriginPolicy::new(["https://plaza.example"]).allows(None));
        assert!(!OriginPolicy::new(["*"]).allows(None));
        assert!(!OriginPolicy::new(["*"]).allows(Some("  ")));
    }

    #[test]
    fn wildcard_allows_any_origin() {
        let policy = OriginPolicy::new(["*"]);
        assert!(policy.allows(Some("https://anything.test")));
        assert!(!policy.is_closed());
    }

    #[test]
    fn empty_policy_is_closed() {
        let policy = OriginPolicy::new(Vec::<String>::new());
        assert!(policy.is_closed());
        assert!(!policy.allows(Some("http://localhost:5173")));

        let blank = OriginPolicy::new(["", " "]);
        assert!(blank.is_closed());
    }

    #[test]
    fn header_values() {
        let policy = OriginPolicy::new(["http://localhost:5173"]);
        assert!(policy.allows_header(&HeaderValue::from_static("http://localhost:5173")));
        assert!(!policy.allows_header(&HeaderValue::from_static("null")));
    }
}
