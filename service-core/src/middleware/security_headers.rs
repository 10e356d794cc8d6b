use axum::{
    extract::{Request, State},
    http::{HeaderValue, header},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Response header policy. `frame_ancestors` lists the origins allowed to
/// embed HTML pages; an empty list forbids framing.
#[derive(Debug, Clone, Default)]
pub struct SecurityHeaders {
    frame_ancestors: Vec<String>,
}

impl SecurityHeaders {
    pub fn new(frame_ancestors: Vec<String>) -> Self {
        Self {
            frame_ancestors: frame_ancestors
                .into_iter()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty() && !a.contains([';', ',', '\r', '\n']))
                .collect(),
        }
    }

    fn html_csp(&self) -> String {
        let ancestors = if self.frame_ancestors.is_empty() {
            "'none'".to_string()
        } else {
            self.frame_ancestors.join(" ")
        };
        format!(
            "default-src 'self'; style-src 'self' 'unsafe-inline'; img-src 'self' data:; \
             form-action 'self'; base-uri 'none'; frame-ancestors {}",
            ancestors
        )
    }
}

fn is_html(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/html"))
}

pub async fn security_headers_middleware(
    State(policy): State<Arc<SecurityHeaders>>,
    req: Request,
    next: Next,
) -> Response {
    let mut response = next.run(req).await;
    let html = is_html(&response);
    let headers = response.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    // keeps redemption URLs out of outbound Referer headers
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("no-referrer"),
    );

    if html {
        if let Ok(csp) = HeaderValue::from_str(&policy.html_csp()) {
            headers.insert(header::CONTENT_SECURITY_POLICY, csp);
        }
        if policy.frame_ancestors.is_empty() {
            headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
        }
    } else {
        headers.insert(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
        );
        headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router, body::Body, middleware::from_fn_with_state, response::Html, routing::get,
    };
    use tower::ServiceExt;

    fn app(policy: SecurityHeaders) -> Router {
        Router::new()
            .route("/page", get(|| async { Html("<p>hi</p>") }))
            .route("/api", get(|| async { "{}" }))
            .layer(from_fn_with_state(
                Arc::new(policy),
                security_headers_middleware,
            ))
    }

    async fn get_headers(app: Router, uri: &str) -> axum::http::HeaderMap {
        app.oneshot(axum::http::Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .headers()
            .clone()
    }

    #[tokio::test]
    async fn html_pages_allow_configured_frame_ancestors() {
        let policy = SecurityHeaders::new(vec![
            "https://admin.shopify.com".into(),
            "https://*.myshopify.com".into(),
        ]);
        let headers = get_headers(app(policy), "/page").await;

        let csp = headers[header::CONTENT_SECURITY_POLICY].to_str().unwrap();
        assert!(csp.ends_with("frame-ancestors https://admin.shopify.com https://*.myshopify.com"));
        assert!(headers.get(header::X_FRAME_OPTIONS).is_none());
        assert_eq!(headers[header::REFERRER_POLICY], "no-referrer");
    }

    #[tokio::test]
    async fn api_responses_are_never_framed() {
        let policy = SecurityHeaders::new(vec!["https://admin.shopify.com".into()]);
        let headers = get_headers(app(policy), "/api").await;

        assert_eq!(
            headers[header::CONTENT_SECURITY_POLICY],
            "default-src 'none'; frame-ancestors 'none'"
        );
        assert_eq!(headers[header::X_FRAME_OPTIONS], "DENY");
    }

    #[test]
    fn directive_injection_is_dropped() {
        let policy = SecurityHeaders::new(vec!["https://a.com; script-src *".into()]);
        assert!(policy.html_csp().ends_with("frame-ancestors 'none'"));
    }
}
