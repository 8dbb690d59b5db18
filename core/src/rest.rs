//! `Transport` over HTTP, with the round-trip delegated to the host.
//!
//! # Design
//! `RestClient` owns the configuration, the session token and the outcome of
//! the last call. For each request it builds an `HttpRequest`, passes it to
//! its `HttpExecutor`, and interprets the `HttpResponse`. The build and parse
//! halves are public so they can be tested without any executor.

use serde_json::Value as Json;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::http::{HttpExecutor, HttpMethod, HttpRequest, HttpResponse};
use crate::transport::{Outcome, Transport};

pub const HEADER_APPLICATION_ID: &str = "X-Parse-Application-Id";
pub const HEADER_REST_API_KEY: &str = "X-Parse-REST-API-Key";
pub const HEADER_SESSION_TOKEN: &str = "X-Parse-Session-Token";

/// The only query parameter whose value is JSON-encoded.
const WHERE_PARAM: &str = "where";

pub struct RestClient<E> {
    config: ClientConfig,
    executor: E,
    session_token: Option<String>,
    outcome: Outcome,
}

impl<E: HttpExecutor> RestClient<E> {
    pub fn new(config: ClientConfig, executor: E) -> Self {
        Self {
            config,
            executor,
            session_token: None,
            outcome: Outcome::default(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// Describe a store request as plain data.
    pub fn build_request(&self, method: HttpMethod, path: &str, payload: Option<&Json>) -> HttpRequest {
        let mut url = format!("{}/{}", self.config.base_url, path.trim_start_matches('/'));
        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("User-Agent".to_string(), self.config.user_agent.clone()),
        ];
        if let Some(id) = &self.config.application_id {
            headers.push((HEADER_APPLICATION_ID.to_string(), id.clone()));
        }
        if let Some(key) = &self.config.rest_api_key {
            headers.push((HEADER_REST_API_KEY.to_string(), key.clone()));
        }
        if let Some(token) = &self.session_token {
            headers.push((HEADER_SESSION_TOKEN.to_string(), token.clone()));
        }

        let body = if method.has_body() {
            // An absent payload still sends an empty JSON object.
            Some(payload.cloned().unwrap_or_else(|| Json::Object(Default::default())).to_string())
        } else {
            if let Some(query) = payload.and_then(encode_query) {
                url.push('?');
                url.push_str(&query);
            }
            None
        };

        HttpRequest {
            method,
            url,
            headers,
            body,
        }
    }

    /// Interpret a response; any status is accepted.
    pub fn parse_response(&self, response: &HttpResponse) -> Outcome {
        Outcome::from_body(response.status, &response.body)
    }
}

impl<E: HttpExecutor> Transport for RestClient<E> {
    fn request(&mut self, method: HttpMethod, path: &str, payload: Option<&Json>) -> Option<Json> {
        let request = self.build_request(method, path, payload);
        debug!(method = method.as_str(), path, "store request");
        self.outcome = match self.executor.execute(request) {
            Ok(response) => self.parse_response(&response),
            Err(err) => {
                warn!(method = method.as_str(), path, error = %err, "store unreachable");
                Outcome::unreachable(None)
            }
        };
        if let Some(error) = &self.outcome.error {
            debug!(status = self.outcome.status, code = ?self.outcome.error_code, error = %error, "store reported an error");
        }
        self.outcome.results.clone()
    }

    fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    fn set_session_token(&mut self, token: Option<String>) {
        self.session_token = token;
    }
}

/// `key=value&...` for an object payload; `where` is JSON-encoded, strings go
/// in raw, other scalars by their JSON text.
fn encode_query(payload: &Json) -> Option<String> {
    let map = payload.as_object().filter(|m| !m.is_empty())?;
    let pairs: Vec<String> = map
        .iter()
        .map(|(key, value)| {
            let raw = match value {
                Json::String(s) if key != WHERE_PARAM => s.clone(),
                other => other.to_string(),
            };
            format!("{}={}", urlencoding::encode(key), urlencoding::encode(&raw))
        })
        .collect();
    Some(pairs.join("&"))
}
