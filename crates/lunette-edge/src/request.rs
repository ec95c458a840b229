use std::net::SocketAddr;

use http::Method;

/// The parts of an HTTP request the file server acts on.
#[derive(Clone, Debug)]
pub struct EdgeRequest {
    method: Method,
    target: String,
    peer: SocketAddr,
}

impl EdgeRequest {
    pub fn new(method: Method, target: impl Into<String>, peer: SocketAddr) -> Self {
        Self {
            method,
            target: target.into(),
            peer,
        }
    }

    /// Build from an `http` request head, keeping the raw path and query.
    pub fn from_http<B>(request: &http::Request<B>, peer: SocketAddr) -> Self {
        let target = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| request.uri().path().to_string());
        Self::new(request.method().clone(), target, peer)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_http_keeps_query() {
        let request = http::Request::builder()
            .method(Method::GET)
            .uri("/models/a.glb?v=2")
            .body(())
            .expect("request");
        let peer: SocketAddr = "127.0.0.1:5555".parse().expect("peer");
        let edge = EdgeRequest::from_http(&request, peer);
        assert_eq!(edge.method(), &Method::GET);
        assert_eq!(edge.target(), "/models/a.glb?v=2");
        assert_eq!(edge.peer(), peer);
    }

    #[test]
    fn asterisk_form_target_is_preserved() {
        let request = http::Request::builder()
            .method(Method::OPTIONS)
            .uri("*")
            .body(())
            .expect("request");
        let peer: SocketAddr = "127.0.0.1:5555".parse().expect("peer");
        let edge = EdgeRequest::from_http(&request, peer);
        assert_eq!(edge.target(), "*");
    }
}
