//! Request context handed to triggers and bypass rules
//!
//! The hosting protocol layer owns the actual HTTP exchange; the engine
//! only sees the parts that policies inspect.

use http::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::net::IpAddr;

/// Request context for context validation
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Query/form parameters
    pub parameters: HashMap<String, String>,
    /// HTTP headers
    pub headers: HeaderMap,
    /// Source IP address
    pub client_ip: Option<IpAddr>,
}

impl RequestContext {
    /// Create an empty request context
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a request parameter
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Append a header. Names or values that are not valid HTTP are dropped.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => tracing::warn!(header = name, "Ignoring malformed request header"),
        }
        self
    }

    /// Set source IP
    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    /// Get a request parameter
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// Get the first value of a header, if it is valid UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// All header values that are valid UTF-8
    pub fn header_values(&self) -> impl Iterator<Item = &str> {
        self.headers.values().filter_map(|v| v.to_str().ok())
    }

    /// Get User-Agent header value
    pub fn user_agent(&self) -> Option<&str> {
        self.header("user-agent")
    }
}
