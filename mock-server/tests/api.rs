use axum::body::Body;
use axum::http::{self, Request, StatusCode};
use axum::routing::RouterIntoService;
use http_body_util::BodyExt;
use mock_server::{app, codes, SESSION_HEADER};
use serde_json::{json, Value};
use tower::{Service, ServiceExt};

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Percent-encode a query value.
fn encode(raw: &str) -> String {
    raw.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => (b as char).to_string(),
            _ => format!("%{b:02X}"),
        })
        .collect()
}

async fn send(app: &mut RouterIntoService<Body>, request: Request<Body>) -> (StatusCode, Value) {
    let resp = ServiceExt::ready(app).await.unwrap().call(request).await.unwrap();
    let status = resp.status();
    (status, body_json(resp).await)
}

async fn create(app: &mut RouterIntoService<Body>, class: &str, body: Value) -> String {
    let (status, created) = send(app, json_request("POST", &format!("/classes/{class}"), &body.to_string())).await;
    assert_eq!(status, StatusCode::CREATED);
    created["objectId"].as_str().unwrap().to_string()
}

// --- classes ---

#[tokio::test]
async fn list_empty_class() {
    let resp = app().oneshot(get_request("/classes/Post")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, json!({"results": []}));
}

#[tokio::test]
async fn create_returns_201_with_id() {
    let resp = app()
        .oneshot(json_request("POST", "/classes/Post", r#"{"title":"hello"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created = body_json(resp).await;
    assert!(created["objectId"].is_string());
    assert!(created["createdAt"].is_string());
}

#[tokio::test]
async fn create_malformed_json_is_rejected() {
    let resp = app()
        .oneshot(json_request("POST", "/classes/Post", r#"{"title":"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_missing_object_is_404() {
    let resp = app().oneshot(get_request("/classes/Post/nope")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body = body_json(resp).await;
    assert_eq!(body["code"], codes::OBJECT_NOT_FOUND);
}

#[tokio::test]
async fn bad_where_is_rejected() {
    let resp = app()
        .oneshot(get_request(&format!("/classes/Post?where={}", encode("[1,2]"))))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["code"], codes::INVALID_JSON);
}

#[tokio::test]
async fn object_lifecycle() {
    let mut app = app().into_service();

    let id = create(&mut app, "Post", json!({"title": "a", "views": 1})).await;

    let (status, fetched) = send(&mut app, get_request(&format!("/classes/Post/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["title"], "a");
    assert_eq!(fetched["objectId"], id.as_str());

    // update ignores reserved keys
    let (status, updated) = send(
        &mut app,
        json_request("PUT", &format!("/classes/Post/{id}"), r#"{"views":2,"objectId":"x"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(updated["updatedAt"].is_string());

    let (_, fetched) = send(&mut app, get_request(&format!("/classes/Post/{id}"))).await;
    assert_eq!(fetched["views"], 2);
    assert_eq!(fetched["objectId"], id.as_str());

    let req = Request::builder()
        .method("DELETE")
        .uri(format!("/classes/Post/{id}"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&mut app, req).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&mut app, get_request(&format!("/classes/Post/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_filters_orders_and_pages() {
    let mut app = app().into_service();
    for (name, score) in [("a", 10), ("b", 30), ("c", 20), ("d", 5)] {
        create(&mut app, "Game", json!({"name": name, "score": score})).await;
    }

    let clause = encode(r#"{"score":{"$gte":10}}"#);
    let uri = format!("/classes/Game?where={clause}&order=-score&limit=2&skip=1&count=1");
    let (status, body) = send(&mut app, get_request(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 3);
    let names: Vec<_> = body["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["c", "a"]);
}

#[tokio::test]
async fn include_expands_pointers_and_in_query_filters() {
    let mut app = app().into_service();
    let published = create(&mut app, "Post", json!({"published": true})).await;
    let draft = create(&mut app, "Post", json!({"published": false})).await;
    for post in [&published, &draft] {
        create(
            &mut app,
            "Comment",
            json!({"post": {"__type": "Pointer", "className": "Post", "objectId": post}}),
        )
        .await;
    }

    let clause = encode(
        &json!({"post": {"$inQuery": {"where": {"published": true}, "className": "Post"}}}).to_string(),
    );
    let (_, body) = send(&mut app, get_request(&format!("/classes/Comment?where={clause}&include=post"))).await;
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["post"]["__type"], "Object");
    assert_eq!(results[0]["post"]["objectId"], published.as_str());
    assert_eq!(results[0]["post"]["published"], true);
}

// --- users ---

#[tokio::test]
async fn sign_up_requires_username_and_password() {
    let resp = app()
        .oneshot(json_request("POST", "/users", r#"{"password":"x"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["code"], codes::USERNAME_MISSING);

    let resp = app()
        .oneshot(json_request("POST", "/users", r#"{"username":"ann"}"#))
        .await
        .unwrap();
    assert_eq!(body_json(resp).await["code"], codes::PASSWORD_MISSING);
}

#[tokio::test]
async fn user_lifecycle() {
    let mut app = app().into_service();

    let (status, created) = send(
        &mut app,
        json_request("POST", "/users", r#"{"username":"ann","password":"secret","email":"a@x"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["objectId"].as_str().unwrap().to_string();
    assert!(created["sessionToken"].as_str().unwrap().starts_with("r:"));

    let (status, taken) = send(
        &mut app,
        json_request("POST", "/users", r#"{"username":"ann","password":"other"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(taken["code"], codes::USERNAME_TAKEN);

    let (status, _) = send(&mut app, get_request("/login?username=ann&password=wrong")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, user) = send(&mut app, get_request("/login?username=ann&password=secret")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["objectId"], id.as_str());
    assert!(user.get("password").is_none());
    let token = user["sessionToken"].as_str().unwrap().to_string();

    // updates need the user's own session
    let (status, denied) = send(
        &mut app,
        json_request("PUT", &format!("/users/{id}"), r#"{"email":"b@x"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(denied["code"], codes::SESSION_MISSING);

    let mut req = json_request("PUT", &format!("/users/{id}"), r#"{"email":"b@x"}"#);
    req.headers_mut().insert(SESSION_HEADER, token.parse().unwrap());
    let (status, _) = send(&mut app, req).await;
    assert_eq!(status, StatusCode::OK);

    let (_, fetched) = send(&mut app, get_request(&format!("/users/{id}"))).await;
    assert_eq!(fetched["email"], "b@x");
    assert!(fetched.get("password").is_none());
}

// --- functions ---

#[tokio::test]
async fn echo_function_returns_result() {
    let resp = app()
        .oneshot(json_request("POST", "/functions/echo", r#"{"a":1}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, json!({"result": {"a": 1}}));
}

#[tokio::test]
async fn unknown_function_fails() {
    let resp = app()
        .oneshot(json_request("POST", "/functions/nope", "{}"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["code"], codes::SCRIPT_FAILED);
}
