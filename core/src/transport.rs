//! The transport contract entities and queries talk through.
//!
//! # Design
//! A `Transport` performs one request at a time and remembers what happened
//! on the most recent call as an `Outcome`. Entity and query operations read
//! the outcome to decide success, so failures never surface as `Err`: a
//! caller that wants details inspects `outcome()` after a `false` or empty
//! return.

use serde_json::Value as Json;

use crate::http::HttpMethod;

pub const CLASSES_PATH: &str = "classes";
pub const USERS_PATH: &str = "users";
pub const LOGIN_PATH: &str = "login";
pub const FUNCTIONS_PATH: &str = "functions";

pub const STATUS_OK: u16 = 200;
pub const STATUS_CREATED: u16 = 201;

/// Status reported when no response could be obtained.
pub const STATUS_UNREACHABLE: u16 = 500;
pub const UNREACHABLE_MESSAGE: &str = "could not connect to the object store";

/// What the most recent request produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    pub status: u16,
    /// The `results` array of a list response, or the whole body otherwise.
    /// `None` when the body carried an `error`.
    pub results: Option<Json>,
    pub error: Option<String>,
    pub error_code: Option<i64>,
    /// The server-reported `count` field, if any.
    pub count: Option<u64>,
}

impl Outcome {
    /// Interpret a response body the way the store's REST dialect shapes it.
    pub fn from_body(status: u16, body: &str) -> Self {
        let mut outcome = Outcome {
            status,
            ..Outcome::default()
        };
        let decoded: Json = match serde_json::from_str(body) {
            Ok(decoded) => decoded,
            Err(_) => return outcome,
        };
        match decoded {
            Json::Object(mut map) => {
                if let Some(count) = map.get("count") {
                    outcome.count = count
                        .as_u64()
                        .or_else(|| count.as_str().and_then(|s| s.parse().ok()));
                }
                if let Some(results) = map.remove("results") {
                    outcome.results = Some(results);
                } else if let Some(error) = map.get("error") {
                    outcome.error = Some(match error {
                        Json::String(message) => message.clone(),
                        other => other.to_string(),
                    });
                    outcome.error_code = map.get("code").and_then(Json::as_i64);
                } else {
                    outcome.results = Some(Json::Object(map));
                }
            }
            Json::Array(items) => outcome.results = Some(Json::Array(items)),
            _ => {}
        }
        outcome
    }

    /// The fixed outcome recorded when the executor could not reach the server.
    pub fn unreachable(message: Option<&str>) -> Self {
        Outcome {
            status: STATUS_UNREACHABLE,
            results: None,
            error: Some(message.unwrap_or(UNREACHABLE_MESSAGE).to_string()),
            error_code: Some(i64::from(STATUS_UNREACHABLE)),
            count: None,
        }
    }

    pub fn is(&self, status: u16) -> bool {
        self.status == status
    }

    /// Server count when reported, otherwise the number of result rows.
    pub fn result_count(&self) -> u64 {
        if let Some(count) = self.count {
            return count;
        }
        match &self.results {
            Some(Json::Array(rows)) => rows.len() as u64,
            _ => 0,
        }
    }
}

/// Executes store requests and exposes the outcome of the latest one.
pub trait Transport {
    /// Perform `method` on `path` (relative to the store root).
    ///
    /// GET and DELETE payloads are encoded as query parameters, with `where`
    /// JSON-encoded; POST and PUT payloads become the JSON body. Returns the
    /// decoded results, `None` on error.
    fn request(&mut self, method: HttpMethod, path: &str, payload: Option<&Json>) -> Option<Json>;

    fn outcome(&self) -> &Outcome;

    /// Attach (or drop) the session token sent with subsequent requests.
    fn set_session_token(&mut self, token: Option<String>);

    fn status_code(&self) -> u16 {
        self.outcome().status
    }

    fn error(&self) -> Option<&str> {
        self.outcome().error.as_deref()
    }

    fn error_code(&self) -> Option<i64> {
        self.outcome().error_code
    }
}

/// Join path segments, skipping empty ones.
/// Join path segments with `/`, percent-encoding each one and skipping
/// empty ones.
pub fn join_path(segments: &[&str]) -> String {
    segments
        .iter()
        .filter(|s| !s.is_empty())
        .map(|s| urlencoding::encode(s))
        .collect::<Vec<_>>()
        .join("/")
}
