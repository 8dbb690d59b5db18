//! Server-side function calls.

use serde_json::Value as Json;

use crate::http::HttpMethod;
use crate::transport::{join_path, Transport, FUNCTIONS_PATH};

/// Call the server function `name` with `data` and return its `result`.
///
/// `None` when the call failed or the response carried no `result`.
pub fn run_function(name: &str, data: &Json, transport: &mut impl Transport) -> Option<Json> {
    let path = join_path(&[FUNCTIONS_PATH, name]);
    match transport.request(HttpMethod::Post, &path, Some(data)) {
        Some(Json::Object(mut body)) => body.remove("result"),
        _ => None,
    }
}
