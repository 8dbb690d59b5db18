//! In-memory stand-in for the remote object store.
//!
//! Speaks the same REST dialect as the real service: `classes/{class}`
//! collections, the `users` collection with sign-up and `login`, and
//! `functions/{name}`. List endpoints honour `where`, `order`, `limit`,
//! `skip`, `count` and `include`.

pub mod filter;

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::debug;
use uuid::Uuid;

use filter::Row;

pub const USER_CLASS: &str = "_User";
pub const SESSION_HEADER: &str = "x-parse-session-token";
const DEFAULT_LIMIT: usize = 100;
const RESERVED_KEYS: [&str; 3] = ["objectId", "createdAt", "updatedAt"];

/// Error codes in the store's numbering.
pub mod codes {
    pub const OBJECT_NOT_FOUND: i64 = 101;
    pub const INVALID_QUERY: i64 = 102;
    pub const INVALID_JSON: i64 = 107;
    pub const SCRIPT_FAILED: i64 = 141;
    pub const USERNAME_MISSING: i64 = 200;
    pub const PASSWORD_MISSING: i64 = 201;
    pub const USERNAME_TAKEN: i64 = 202;
    pub const SESSION_MISSING: i64 = 206;
}

#[derive(Debug, Default)]
pub struct Store {
    classes: HashMap<String, Vec<Row>>,
    sessions: HashMap<String, String>,
}

impl Store {
    /// Rows of `class` matching `clause`, in insertion order.
    pub fn find(&self, class: &str, clause: &Row) -> Vec<Row> {
        self.classes
            .get(class)
            .map(|rows| {
                rows.iter()
                    .filter(|row| filter::matches(self, row, clause))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get(&self, class: &str, id: &str) -> Option<&Row> {
        self.classes.get(class)?.iter().find(|row| row_id(row) == Some(id))
    }

    fn get_mut(&mut self, class: &str, id: &str) -> Option<&mut Row> {
        self.classes
            .get_mut(class)?
            .iter_mut()
            .find(|row| row_id(row) == Some(id))
    }

    /// Store a new row, stamping id and timestamps.
    fn insert(&mut self, class: &str, mut row: Row) -> Row {
        for key in RESERVED_KEYS {
            row.remove(key);
        }
        let id = Uuid::new_v4().simple().to_string()[..10].to_string();
        let now = timestamp();
        row.insert("objectId".into(), Value::from(id));
        row.insert("createdAt".into(), Value::from(now.clone()));
        row.insert("updatedAt".into(), Value::from(now));
        self.classes.entry(class.to_string()).or_default().push(row.clone());
        row
    }

    fn remove(&mut self, class: &str, id: &str) -> bool {
        let Some(rows) = self.classes.get_mut(class) else {
            return false;
        };
        let before = rows.len();
        rows.retain(|row| row_id(row) != Some(id));
        rows.len() != before
    }

    fn open_session(&mut self, user_id: &str) -> String {
        let token = format!("r:{}", Uuid::new_v4().simple());
        self.sessions.insert(token.clone(), user_id.to_string());
        token
    }

    fn session_user(&self, headers: &HeaderMap) -> Option<&str> {
        let token = headers.get(SESSION_HEADER)?.to_str().ok()?;
        self.sessions.get(token).map(String::as_str)
    }

    /// Replace pointers under the `include` keys with the objects they name.
    fn expand(&self, mut row: Row, includes: &[&str]) -> Row {
        for key in includes {
            let target = row.get(*key).and_then(|pointer| {
                let class = pointer.get("className")?.as_str()?;
                let id = pointer.get("objectId")?.as_str()?;
                let mut expanded = public(self.get(class, id)?.clone());
                expanded.insert("__type".into(), Value::from("Object"));
                expanded.insert("className".into(), Value::from(class));
                Some(expanded)
            });
            if let Some(expanded) = target {
                row.insert(key.to_string(), Value::Object(expanded));
            }
        }
        row
    }
}

pub type Db = Arc<RwLock<Store>>;

type Reply = (StatusCode, Json<Value>);

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(Store::default()));
    Router::new()
        .route("/classes/{class}", get(list_objects).post(create_object))
        .route(
            "/classes/{class}/{id}",
            get(get_object).put(update_object).delete(delete_object),
        )
        .route("/users", get(list_users).post(sign_up))
        .route("/users/{id}", get(get_user).put(update_user).delete(delete_user))
        .route("/login", get(log_in))
        .route("/functions/{name}", post(run_function))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

// ---------------------------------------------------------------------------
// Classes
// ---------------------------------------------------------------------------

async fn list_objects(
    State(db): State<Db>,
    Path(class): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Reply {
    list(&*db.read().await, &class, &params)
}

async fn create_object(
    State(db): State<Db>,
    Path(class): Path<String>,
    Json(body): Json<Row>,
) -> Reply {
    let row = db.write().await.insert(&class, body);
    debug!(class = %class, id = ?row.get("objectId"), "created object");
    (
        StatusCode::CREATED,
        Json(json!({"objectId": row["objectId"], "createdAt": row["createdAt"]})),
    )
}

async fn get_object(State(db): State<Db>, Path((class, id)): Path<(String, String)>) -> Reply {
    match db.read().await.get(&class, &id) {
        Some(row) => (StatusCode::OK, Json(Value::Object(public(row.clone())))),
        None => not_found(),
    }
}

async fn update_object(
    State(db): State<Db>,
    Path((class, id)): Path<(String, String)>,
    Json(body): Json<Row>,
) -> Reply {
    update(&mut *db.write().await, &class, &id, body)
}

async fn delete_object(State(db): State<Db>, Path((class, id)): Path<(String, String)>) -> Reply {
    delete(&mut *db.write().await, &class, &id)
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

async fn list_users(
    State(db): State<Db>,
    Query(params): Query<HashMap<String, String>>,
) -> Reply {
    list(&*db.read().await, USER_CLASS, &params)
}

async fn sign_up(State(db): State<Db>, Json(body): Json<Row>) -> Reply {
    let username = body.get("username").and_then(Value::as_str).unwrap_or_default().to_string();
    if username.is_empty() {
        return failure(StatusCode::BAD_REQUEST, codes::USERNAME_MISSING, "bad or missing username");
    }
    if body.get("password").and_then(Value::as_str).unwrap_or_default().is_empty() {
        return failure(StatusCode::BAD_REQUEST, codes::PASSWORD_MISSING, "password is required");
    }
    let mut store = db.write().await;
    let mut taken = Row::new();
    taken.insert("username".into(), Value::from(username.clone()));
    if !store.find(USER_CLASS, &taken).is_empty() {
        return failure(
            StatusCode::BAD_REQUEST,
            codes::USERNAME_TAKEN,
            &format!("username {username} already taken"),
        );
    }
    let row = store.insert(USER_CLASS, body);
    let id = row_id(&row).unwrap_or_default().to_string();
    let token = store.open_session(&id);
    debug!(id = %id, "signed up user");
    (
        StatusCode::CREATED,
        Json(json!({"objectId": id, "createdAt": row["createdAt"], "sessionToken": token})),
    )
}

#[derive(Debug, Deserialize)]
struct Credentials {
    username: Option<String>,
    password: Option<String>,
}

async fn log_in(State(db): State<Db>, Query(credentials): Query<Credentials>) -> Reply {
    let (Some(username), Some(password)) = (credentials.username, credentials.password) else {
        return failure(StatusCode::BAD_REQUEST, codes::USERNAME_MISSING, "username and password are required");
    };
    let mut store = db.write().await;
    let mut clause = Row::new();
    clause.insert("username".into(), Value::from(username));
    clause.insert("password".into(), Value::from(password));
    let Some(row) = store.find(USER_CLASS, &clause).into_iter().next() else {
        return failure(StatusCode::NOT_FOUND, codes::OBJECT_NOT_FOUND, "invalid login parameters");
    };
    let token = store.open_session(row_id(&row).unwrap_or_default());
    let mut user = public(row);
    user.insert("sessionToken".into(), Value::from(token));
    (StatusCode::OK, Json(Value::Object(user)))
}

async fn get_user(State(db): State<Db>, Path(id): Path<String>) -> Reply {
    match db.read().await.get(USER_CLASS, &id) {
        Some(row) => (StatusCode::OK, Json(Value::Object(public(row.clone())))),
        None => not_found(),
    }
}

async fn update_user(
    State(db): State<Db>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Row>,
) -> Reply {
    let mut store = db.write().await;
    if store.session_user(&headers) != Some(id.as_str()) {
        return failure(StatusCode::BAD_REQUEST, codes::SESSION_MISSING, "cannot modify user without its session");
    }
    update(&mut store, USER_CLASS, &id, body)
}

async fn delete_user(State(db): State<Db>, Path(id): Path<String>, headers: HeaderMap) -> Reply {
    let mut store = db.write().await;
    if store.session_user(&headers) != Some(id.as_str()) {
        return failure(StatusCode::BAD_REQUEST, codes::SESSION_MISSING, "cannot delete user without its session");
    }
    delete(&mut store, USER_CLASS, &id)
}

// ---------------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------------

/// `echo` returns its input; every other name is unknown.
async fn run_function(Path(name): Path<String>, Json(body): Json<Value>) -> Reply {
    match name.as_str() {
        "echo" => (StatusCode::OK, Json(json!({"result": body}))),
        _ => failure(StatusCode::BAD_REQUEST, codes::SCRIPT_FAILED, &format!("invalid function: {name}")),
    }
}

// ---------------------------------------------------------------------------
// Shared handlers
// ---------------------------------------------------------------------------

fn list(store: &Store, class: &str, params: &HashMap<String, String>) -> Reply {
    let clause = match params.get("where") {
        Some(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(clause)) => clause,
            _ => return failure(StatusCode::BAD_REQUEST, codes::INVALID_JSON, "invalid JSON in where"),
        },
        None => Row::new(),
    };
    let limit = match parse_number(params, "limit", DEFAULT_LIMIT) {
        Ok(n) => n,
        Err(reply) => return reply,
    };
    let skip = match parse_number(params, "skip", 0) {
        Ok(n) => n,
        Err(reply) => return reply,
    };

    let mut rows = store.find(class, &clause);
    if let Some(order) = params.get("order") {
        filter::sort_rows(&mut rows, order);
    }
    let total = rows.len();
    let includes: Vec<&str> = params
        .get("include")
        .map(|raw| raw.split(',').filter(|k| !k.is_empty()).collect())
        .unwrap_or_default();
    let results: Vec<Value> = rows
        .into_iter()
        .skip(skip)
        .take(limit)
        .map(|row| Value::Object(public(store.expand(row, &includes))))
        .collect();

    let mut body = Map::new();
    body.insert("results".into(), Value::Array(results));
    if params.get("count").is_some_and(|c| c == "1") {
        body.insert("count".into(), Value::from(total));
    }
    (StatusCode::OK, Json(Value::Object(body)))
}

fn update(store: &mut Store, class: &str, id: &str, body: Row) -> Reply {
    let Some(row) = store.get_mut(class, id) else {
        return not_found();
    };
    for (key, value) in body {
        if !RESERVED_KEYS.contains(&key.as_str()) {
            row.insert(key, value);
        }
    }
    let now = timestamp();
    row.insert("updatedAt".into(), Value::from(now.clone()));
    (StatusCode::OK, Json(json!({"updatedAt": now})))
}

fn delete(store: &mut Store, class: &str, id: &str) -> Reply {
    if store.remove(class, id) {
        debug!(class = %class, id = %id, "deleted object");
        (StatusCode::OK, Json(json!({})))
    } else {
        not_found()
    }
}

fn parse_number(params: &HashMap<String, String>, key: &str, default: usize) -> Result<usize, Reply> {
    match params.get(key) {
        Some(raw) => raw.parse().map_err(|_| {
            failure(StatusCode::BAD_REQUEST, codes::INVALID_QUERY, &format!("invalid {key}: {raw}"))
        }),
        None => Ok(default),
    }
}

fn failure(status: StatusCode, code: i64, message: &str) -> Reply {
    (status, Json(json!({"code": code, "error": message})))
}

fn not_found() -> Reply {
    failure(StatusCode::NOT_FOUND, codes::OBJECT_NOT_FOUND, "object not found")
}

/// The row as clients may see it.
fn public(mut row: Row) -> Row {
    row.remove("password");
    row
}

fn row_id(row: &Row) -> Option<&str> {
    row.get("objectId").and_then(Value::as_str)
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
