//! Opaque request and response carriers
//!
//! Body construction and payload parsing are the caller's concern; the
//! client core only routes these between nodes.

use bytes::Bytes;
use std::fmt;
use url::Url;

/// HTTP method for a cluster request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Head,
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Head => "HEAD",
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One logical request to be routed to some node in the cluster
#[derive(Debug, Clone)]
pub struct RequestSpec {
    /// HTTP method
    pub method: Method,
    /// Path relative to the node endpoint, e.g. "/index/_search"
    pub path: String,
    /// Query string parameters appended to every dispatch
    pub query: Vec<(String, String)>,
    /// Raw request body, if any
    pub body: Option<Bytes>,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Bytes) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// Raw response from the node that served a request
#[derive(Debug, Clone)]
pub struct NodeResponse {
    /// HTTP status code returned by the node
    pub status: u16,
    /// Raw response body
    pub body: Bytes,
    /// Endpoint of the node that produced this response
    pub endpoint: Url,
}

impl NodeResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_spec_builders() {
        let request = RequestSpec::get("/_search").with_query("size", "10");
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.path, "/_search");
        assert_eq!(request.query.len(), 1);
        assert!(request.body.is_none());
    }

    #[test]
    fn test_response_success_range() {
        let endpoint: Url = "http://localhost:9200".parse().unwrap();
        let ok = NodeResponse {
            status: 201,
            body: Bytes::new(),
            endpoint: endpoint.clone(),
        };
        let not_ok = NodeResponse {
            status: 404,
            body: Bytes::new(),
            endpoint,
        };
        assert!(ok.is_success());
        assert!(!not_ok.is_success());
    }
}
