//! Record CRUD, listing and search over HTTP

mod common;

use common::TestServer;
use record_admin::storage::{JsonFileStore, RecordStore};
use serde_json::{json, Value};

async fn get_json(server: &TestServer, path: &str) -> (u16, Value) {
    let response = server.client.get(server.url(path)).send().await.unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

fn keys(value: &Value) -> Vec<&str> {
    value
        .as_object()
        .unwrap()
        .keys()
        .map(String::as_str)
        .collect()
}

#[tokio::test]
async fn test_create_assigns_sequential_ids() {
    let server = TestServer::start().await;
    let token = server.login().await;

    let first = server.create(&token, json!({"name": "a"}), &["name"]).await;
    let second = server.create(&token, json!({"name": "b"}), &["name"]).await;
    assert_eq!(first, "data_1");
    assert_eq!(second, "data_2");

    // Deleting the lower id never hands it out again while a higher one exists.
    let response = server
        .client
        .delete(server.url("/api/item/data_1"))
        .header("X-CSRFToken", &token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let third = server.create(&token, json!({"name": "c"}), &["name"]).await;
    assert_eq!(third, "data_3");
}

#[tokio::test]
async fn test_create_follows_fields_order() {
    let server = TestServer::start().await;
    let token = server.login().await;

    let id = server
        .create(
            &token,
            json!({"color": "red", "size": 3, "name": "ball", "extra": "dropped"}),
            &["size", "color"],
        )
        .await;

    let (status, body) = get_json(&server, &format!("/data/{id}")).await;
    assert_eq!(status, 200);
    assert_eq!(body["id"], id.as_str());
    assert_eq!(keys(&body["data"]), ["name", "size", "color"]);
}

#[tokio::test]
async fn test_create_rejects_bad_input() {
    let server = TestServer::start().await;
    let token = server.login().await;

    let cases = [
        // no fieldsOrder
        reqwest::multipart::Form::new()
            .text("data", r#"{"name":"a"}"#)
            .text("csrf_token", token.clone()),
        // data is not JSON
        reqwest::multipart::Form::new()
            .text("data", "{nope")
            .text("fieldsOrder", r#"["name"]"#)
            .text("csrf_token", token.clone()),
        // missing name
        reqwest::multipart::Form::new()
            .text("data", r#"{"color":"red"}"#)
            .text("fieldsOrder", r#"["color"]"#)
            .text("csrf_token", token.clone()),
        // data is not an object
        reqwest::multipart::Form::new()
            .text("data", "[1,2]")
            .text("fieldsOrder", r#"["name"]"#)
            .text("csrf_token", token.clone()),
    ];

    for form in cases {
        let response = server
            .client
            .post(server.url("/api/item"))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
    }
    assert!(!server.data_file().exists());
}

#[tokio::test]
async fn test_index_lists_summaries() {
    let server = TestServer::start().await;
    let token = server.login().await;
    server
        .create(&token, json!({"name": "a", "color": "red"}), &["name", "color"])
        .await;
    server.create(&token, json!({"name": "b"}), &["name"]).await;

    let (status, body) = get_json(&server, "/").await;
    assert_eq!(status, 200);
    assert_eq!(
        body,
        json!({
            "data_1": {"name": "a", "first_value": "red"},
            "data_2": {"name": "b", "first_value": null},
        })
    );
}

#[tokio::test]
async fn test_detail_of_unknown_record_is_404() {
    let server = TestServer::start().await;
    server.login().await;
    let (status, body) = get_json(&server, "/data/data_42").await;
    assert_eq!(status, 404);
    assert_eq!(body["code"], "NotFound");
}

#[tokio::test]
async fn test_search() {
    let server = TestServer::start().await;
    let token = server.login().await;
    server
        .create(&token, json!({"name": "Red Ball", "size": 3}), &["name", "size"])
        .await;
    server
        .create(&token, json!({"name": "Blue Cube", "size": 12}), &["name", "size"])
        .await;

    let (_, body) = get_json(&server, "/search?q=").await;
    assert_eq!(body, json!(["data_1", "data_2"]));

    let (_, body) = get_json(&server, "/search?q=ball").await;
    assert_eq!(keys(&body), ["data_1"]);
    assert_eq!(body["data_1"]["name"], "Red Ball");

    // Numbers match through their JSON text.
    let (_, body) = get_json(&server, "/search?q=12").await;
    assert_eq!(keys(&body), ["data_2"]);

    let (_, body) = get_json(&server, "/search?q=missing").await;
    assert_eq!(body, json!({}));
}

#[tokio::test]
async fn test_update_preserves_layout() {
    let server = TestServer::start().await;
    let token = server.login().await;
    let id = server
        .create(
            &token,
            json!({"name": "a", "color": "red", "size": 1}),
            &["name", "color", "size"],
        )
        .await;

    let response = server
        .client
        .put(server.url(&format!("/api/item/{id}")))
        .header("X-CSRFToken", &token)
        .json(&json!({"weight": 2, "size": 5, "name": "b"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(keys(&body["data"]), ["name", "size", "weight"]);
    assert_eq!(body["data"]["name"], "b");

    let (_, detail) = get_json(&server, &format!("/data/{id}")).await;
    assert_eq!(detail["data"], body["data"]);
}

#[tokio::test]
async fn test_update_errors() {
    let server = TestServer::start().await;
    let token = server.login().await;
    let id = server.create(&token, json!({"name": "a"}), &["name"]).await;

    let put = |path: String, body: &'static str| {
        server
            .client
            .put(server.url(&path))
            .header("X-CSRFToken", &token)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
    };

    let response = put("/api/item/data_99".into(), r#"{"name":"x"}"#).await.unwrap();
    assert_eq!(response.status(), 404);

    let response = put(format!("/api/item/{id}"), "not json").await.unwrap();
    assert_eq!(response.status(), 400);

    let response = put(format!("/api/item/{id}"), r#"{"name":""}"#).await.unwrap();
    assert_eq!(response.status(), 400);

    let (_, detail) = get_json(&server, &format!("/data/{id}")).await;
    assert_eq!(detail["data"]["name"], "a");
}

#[tokio::test]
async fn test_delete_unknown_record_is_404() {
    let server = TestServer::start().await;
    let token = server.login().await;
    let response = server
        .client
        .delete(server.url("/api/item/data_5"))
        .header("X-CSRFToken", &token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_data_file_format() {
    let server = TestServer::start().await;
    let token = server.login().await;
    server
        .create(&token, json!({"name": "a", "n": 1}), &["name", "n"])
        .await;

    let text = std::fs::read_to_string(server.data_file()).unwrap();
    assert!(text.ends_with('\n'));
    assert!(!text.contains("csrf_token"));
    let parsed: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed, json!({"data_1": {"name": "a", "n": 1}}));
}

#[tokio::test]
async fn test_data_file_reloads() {
    let server = TestServer::start().await;
    let token = server.login().await;
    server.create(&token, json!({"name": "kept"}), &["name"]).await;

    let store = JsonFileStore::open(server.data_file()).await.unwrap();
    assert_eq!(store.ids().await.unwrap(), ["data_1"]);
    let record = store.get("data_1").await.unwrap().unwrap();
    assert_eq!(record["name"], "kept");
}
