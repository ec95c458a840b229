use http::header::{
    HeaderName, HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, EXPIRES, PRAGMA,
};
use http::Method;

/// Content description for a response that carries a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyInfo<'a> {
    pub content_type: &'a str,
    pub content_length: u64,
}

/// Decides the headers attached to every response, independent of the resource.
pub trait ResponsePolicy: Send + Sync {
    fn headers_for(
        &self,
        method: &Method,
        body: Option<BodyInfo<'_>>,
    ) -> Vec<(HeaderName, HeaderValue)>;
}

/// Permissive CORS plus aggressive no-cache headers, suited to iterating on
/// assets in a browser.
#[derive(Debug, Clone)]
pub struct DevResponsePolicy {
    cors: Vec<(HeaderName, HeaderValue)>,
    caching: Vec<(HeaderName, HeaderValue)>,
}

impl Default for DevResponsePolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl DevResponsePolicy {
    pub fn new() -> Self {
        let cors = vec![
            (ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*")),
            (
                ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static("GET, OPTIONS"),
            ),
            (
                ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static("Content-Type"),
            ),
        ];
        let caching = vec![
            (
                CACHE_CONTROL,
                HeaderValue::from_static("no-cache, no-store, must-revalidate"),
            ),
            (PRAGMA, HeaderValue::from_static("no-cache")),
            (EXPIRES, HeaderValue::from_static("0")),
        ];
        Self { cors, caching }
    }
}

impl ResponsePolicy for DevResponsePolicy {
    fn headers_for(
        &self,
        method: &Method,
        body: Option<BodyInfo<'_>>,
    ) -> Vec<(HeaderName, HeaderValue)> {
        let mut headers = self.cors.clone();
        if method == Method::OPTIONS {
            return headers;
        }

        headers.extend(self.caching.iter().cloned());
        if let Some(body) = body {
            let content_type = HeaderValue::from_str(body.content_type)
                .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
            headers.push((CONTENT_TYPE, content_type));
            headers.push((CONTENT_LENGTH, HeaderValue::from(body.content_length)));
        }
        headers
    }
}
