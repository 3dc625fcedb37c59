//! Cross-origin resource sharing.
//!
//! Only origins on the configured list (exact string match) are granted
//! access. A genuine preflight from a trusted origin is answered here and
//! never reaches the router.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

const PREFLIGHT_ALLOW_METHODS: &str = "OPTIONS, PUT, PATCH, DELETE";
const PREFLIGHT_ALLOW_HEADERS: &str = "Authorization, Content-Type";

#[derive(Debug, Clone, Default)]
pub struct CorsPolicy {
    trusted_origins: HashSet<String>,
}

impl CorsPolicy {
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            trusted_origins: origins.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_trusted(&self, origin: &str) -> bool {
        self.trusted_origins.contains(origin)
    }

    fn trusted_origin(&self, request: &Request<Body>) -> Option<HeaderValue> {
        let origin = request.headers().get(header::ORIGIN)?;
        let trusted = origin.to_str().ok().is_some_and(|o| self.is_trusted(o));
        trusted.then(|| origin.clone())
    }
}

fn is_preflight(request: &Request<Body>) -> bool {
    request.method() == Method::OPTIONS
        && request.headers().contains_key(header::ORIGIN)
        && request
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD)
}

pub async fn enable_cors(
    State(policy): State<Arc<CorsPolicy>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let trusted = policy.trusted_origin(&request);

    let mut response = match &trusted {
        Some(_) if is_preflight(&request) => {
            let mut response = StatusCode::NO_CONTENT.into_response();
            let headers = response.headers_mut();
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static(PREFLIGHT_ALLOW_METHODS),
            );
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static(PREFLIGHT_ALLOW_HEADERS),
            );
            response
        }
        _ => next.run(request).await,
    };

    let headers = response.headers_mut();
    headers.append(header::VARY, HeaderValue::from_static("Origin"));
    headers.append(
        header::VARY,
        HeaderValue::from_static("Access-Control-Request-Method"),
    );
    if let Some(origin) = trusted {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware, routing::get, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    const TRUSTED: &str = "http://localhost:3000";

    fn app(hits: Arc<AtomicUsize>) -> Router {
        let policy = Arc::new(CorsPolicy::new([TRUSTED]));
        Router::new()
            .route(
                "/",
                get({
                    let hits = hits.clone();
                    move || async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        "OK"
                    }
                })
                .put(|| async { "OK" }),
            )
            .layer(middleware::from_fn_with_state(policy, enable_cors))
    }

    fn request(method: Method, origin: Option<&str>, preflight_method: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri("/");
        if let Some(origin) = origin {
            builder = builder.header(header::ORIGIN, origin);
        }
        if let Some(m) = preflight_method {
            builder = builder.header(header::ACCESS_CONTROL_REQUEST_METHOD, m);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_preflight_short_circuits() {
        let hits = Arc::new(AtomicUsize::new(0));
        let response = app(hits.clone())
            .oneshot(request(Method::OPTIONS, Some(TRUSTED), Some("PUT")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], TRUSTED);
        assert!(headers[header::ACCESS_CONTROL_ALLOW_METHODS]
            .to_str()
            .unwrap()
            .contains("PUT"));
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], PREFLIGHT_ALLOW_HEADERS);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_simple_request_is_annotated() {
        let hits = Arc::new(AtomicUsize::new(0));
        let response = app(hits.clone())
            .oneshot(request(Method::GET, Some(TRUSTED), Some("PUT")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], TRUSTED);
        assert!(response.headers().get(header::ACCESS_CONTROL_ALLOW_METHODS).is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_options_without_request_method_is_not_preflight() {
        let hits = Arc::new(AtomicUsize::new(0));
        let response = app(hits)
            .oneshot(request(Method::OPTIONS, Some(TRUSTED), None))
            .await
            .unwrap();

        assert_ne!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], TRUSTED);
    }

    #[tokio::test]
    async fn test_untrusted_origin() {
        let hits = Arc::new(AtomicUsize::new(0));
        let response = app(hits.clone())
            .oneshot(request(Method::GET, Some("http://evil.example"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());

        let vary: Vec<_> = response.headers().get_all(header::VARY).iter().collect();
        assert_eq!(vary, ["Origin", "Access-Control-Request-Method"]);

        // Untrusted preflight is passed through, not answered.
        let response = app(hits)
            .oneshot(request(Method::OPTIONS, Some("http://evil.example"), Some("PUT")))
            .await
            .unwrap();
        assert_ne!(response.status(), StatusCode::NO_CONTENT);
        assert!(response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[test]
    fn test_exact_match_only() {
        let policy = CorsPolicy::new([TRUSTED]);
        assert!(policy.is_trusted(TRUSTED));
        assert!(!policy.is_trusted("http://localhost:3000/"));
        assert!(!policy.is_trusted("HTTP://LOCALHOST:3000"));
    }
}
