//! HTTP transport types for the host-does-IO pattern.
//!
//! # Design
//! These types describe HTTP requests and responses as plain data. The REST
//! client builds `HttpRequest` values and parses `HttpResponse` values without
//! touching the network; an `HttpExecutor` supplied by the host performs the
//! actual round-trip. Keeping the executor at the edge makes every entity and
//! query operation testable with a scripted executor.

use crate::error::StoreError;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// POST and PUT carry their payload as a JSON body; the others encode it
    /// into the query string.
    pub fn has_body(self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put)
    }
}

/// An HTTP request described as plain data.
///
/// `url` is absolute and already carries the encoded query string for
/// GET and DELETE requests.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// An HTTP response described as plain data.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// Performs the network round-trip for a prepared request.
///
/// Non-2xx statuses are responses, not errors: an executor should only fail
/// when no response was obtained at all.
pub trait HttpExecutor {
    fn execute(&mut self, request: HttpRequest) -> Result<HttpResponse, StoreError>;
}

impl<F> HttpExecutor for F
where
    F: FnMut(HttpRequest) -> Result<HttpResponse, StoreError>,
{
    fn execute(&mut self, request: HttpRequest) -> Result<HttpResponse, StoreError> {
        self(request)
    }
}
