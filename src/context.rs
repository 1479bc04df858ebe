use http::{HeaderMap, Method, Uri};
use std::{
    collections::HashMap,
    net::IpAddr,
    time::Instant,
};

/// Per-request state shared by the middleware chain. The request itself is
/// forwarded downstream untouched; this is a read-only view of its head.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub client_ip: Option<IpAddr>,
    pub started_at: Instant,
    pub metadata: HashMap<&'static str, String>,
}

impl RequestContext {
    pub fn new(
        request_id: String,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        client_ip: Option<IpAddr>,
    ) -> Self {
        Self {
            request_id,
            method,
            uri,
            headers,
            client_ip,
            started_at: Instant::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }
}
