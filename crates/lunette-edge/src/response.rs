use bytes::Bytes;
use http::{
    header::{HeaderName, HeaderValue},
    HeaderMap, StatusCode,
};

/// Represents a response produced by the request handler.
#[derive(Debug, Clone)]
pub struct EdgeResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl EdgeResponse {
    /// Create a new response with the provided status code and empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Build a response from an ordered header list, as returned by a
    /// [`ResponsePolicy`](crate::policy::ResponsePolicy).
    pub fn with_headers(
        status: StatusCode,
        headers: impl IntoIterator<Item = (HeaderName, HeaderValue)>,
    ) -> Self {
        let mut response = Self::new(status);
        for (name, value) in headers {
            response.append_header(name, value);
        }
        response
    }

    /// Set the response body directly from bytes.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Update the status code.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Insert or replace a header value.
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    /// Append a header without removing existing values.
    pub fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.append(name, value);
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, Bytes) {
        (self.status, self.headers, self.body)
    }
}
