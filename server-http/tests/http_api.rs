use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{Request, StatusCode, header};
use axum::routing::get;
use memo::{CacheAside, CacheBackend};
use serde_json::{Value, json};
use server_http::{AppState, build_app};
use shared::config::Config;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use storage_engine::{BackendFactory, MokaBackend};
use tower::ServiceExt; // for `oneshot`
use tower_http::normalize_path::NormalizePath;

const DUMP: &str = r#"{
    "data": [
        {
            "id": "154398",
            "type": "radios",
            "attributes": {
                "title": "Older", "desc": null, "excerpt": "", "thumb": "", "cover": "",
                "comments-count": 3, "likes-count": 90, "bookmarks-count": 1,
                "duration": 3600, "is-free": true,
                "published-at": "2023-05-01T20:00:00.000+08:00"
            },
            "relationships": {
                "category": {"data": {"type": "categories", "id": "42"}},
                "djs": {"data": [{"type": "users", "id": "13701"}, {"type": "users", "id": "3"}]},
                "albums": {"data": [{"type": "albums", "id": "12"}]}
            }
        },
        {
            "id": "154399",
            "type": "radios",
            "attributes": {
                "title": "Newer", "desc": "d", "excerpt": "", "thumb": "", "cover": "",
                "comments-count": 0, "likes-count": 10, "bookmarks-count": 0,
                "duration": 1200, "is-free": false,
                "published-at": "2023-06-01T20:00:00.000+08:00"
            },
            "relationships": {
                "category": {"data": {"type": "categories", "id": "5"}},
                "djs": {"data": [{"type": "users", "id": "13701"}]}
            }
        }
    ],
    "included": [
        {"id": "13701", "type": "users", "attributes": {"nickname": "Nadya", "thumb": null, "followers-count": 5000, "followees-count": 10}},
        {"id": "3", "type": "users", "attributes": {"nickname": "Simon", "thumb": "s.jpg", "followers-count": 9000, "followees-count": 1}},
        {"id": "42", "type": "categories", "attributes": {"name": "Games", "desc": "", "logo": "", "background": "", "subscriptions-count": 7}},
        {"id": "5", "type": "categories", "attributes": {"name": "Culture", "desc": "", "logo": "", "background": "", "subscriptions-count": 70}},
        {"id": "12", "type": "albums", "attributes": {"title": "Night shift", "description": "", "author": "Nadya", "cover": "", "published-at": "2022-01-01T00:00:00.000+08:00", "radios-count": 1}},
        {"id": "13", "type": "albums", "attributes": {"title": "Morning", "description": "", "author": "Simon", "cover": "", "published-at": "2022-06-01T00:00:00.000+08:00", "radios-count": 0}}
    ]
}"#;

fn memory_cache() -> CacheAside<dyn CacheBackend> {
    let backend: Arc<dyn CacheBackend> = Arc::new(MokaBackend::unbounded());
    CacheAside::new(backend)
}

fn seeded_store(dir: &tempfile::TempDir) -> catalog::CatalogStore {
    let store = catalog::CatalogStore::open(dir.path().join("catalog.sled")).unwrap();
    catalog::import_json(&store, DUMP).unwrap();
    store
}

fn state(dir: &tempfile::TempDir, featured: Vec<i64>) -> AppState {
    AppState::new(seeded_store(dir), memory_cache(), featured)
}

fn app(state: &AppState) -> NormalizePath<Router> {
    build_app(state.clone(), &["*".to_string()])
}

async fn get_json(state: &AppState, uri: &str) -> (StatusCode, Value) {
    let response = app(state)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn ids(body: &Value) -> Vec<i64> {
    body.as_array()
        .unwrap()
        .iter()
        .map(|item| item["id"].as_i64().unwrap())
        .collect()
}

#[tokio::test]
async fn test_health() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = state(&temp_dir, vec![]);

    let (status, body) = get_json(&state, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_list_episodes_by_host_newest_first() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = state(&temp_dir, vec![]);

    let (status, body) = get_json(&state, "/episodes?user_id=13701").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), vec![154399, 154398]);
    assert_eq!(body[1]["desc"], "");

    let (status, body) = get_json(&state, "/episodes/?user_id=3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), vec![154398]);
}

#[tokio::test]
async fn test_list_episodes_sorting_and_filters() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = state(&temp_dir, vec![]);

    let (_, body) = get_json(&state, "/episodes?sort_field=likes_count&asc=true").await;
    assert_eq!(ids(&body), vec![154399, 154398]);

    let (_, body) = get_json(&state, "/episodes?sort_field=bogus&asc=true").await;
    assert_eq!(ids(&body), vec![154398, 154399]);

    let (_, body) = get_json(&state, "/episodes?category_id=42").await;
    assert_eq!(ids(&body), vec![154398]);

    let (_, body) = get_json(&state, "/episodes?limit=1&offset=1").await;
    assert_eq!(ids(&body), vec![154398]);
}

#[tokio::test]
async fn test_list_episodes_rejects_bad_params() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = state(&temp_dir, vec![]);

    let (status, body) = get_json(&state, "/episodes?limit=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "limit");

    let (status, body) = get_json(&state, "/episodes?user_id=abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "user_id");

    let (status, body) = get_json(&state, "/episodes?limit=-1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "limit");
    assert!(body["error"].as_str().unwrap().contains("out of range"));

    let (status, body) = get_json(&state, "/episodes?asc=sometimes").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "asc");
}

#[tokio::test]
async fn test_bad_path_id_is_json_error() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = state(&temp_dir, vec![]);

    let (status, body) = get_json(&state, "/users/abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "id");
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_episode_detail() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = state(&temp_dir, vec![]);

    let (status, body) = get_json(&state, "/episodes/154398").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Older");
    assert_eq!(body["user_ids"], json!([3, 13701]));
    assert_eq!(body["category_id"], 42);

    let (status, _) = get_json(&state, "/episodes/1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_users_sorted_and_featured() {
    let temp_dir = tempfile::tempdir().unwrap();

    let everyone = state(&temp_dir, vec![]);
    let (_, body) = get_json(&everyone, "/users").await;
    assert_eq!(ids(&body), vec![3, 13701]);

    let (status, body) = get_json(&everyone, "/users/13701").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["nickname"], "Nadya");

    let featured = AppState::new(everyone.store.clone(), memory_cache(), vec![13701]);
    let (_, body) = get_json(&featured, "/users").await;
    assert_eq!(ids(&body), vec![13701]);
}

#[tokio::test]
async fn test_categories_sorted_by_subscriptions() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = state(&temp_dir, vec![]);

    let (status, body) = get_json(&state, "/categories").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), vec![5, 42]);

    let (status, body) = get_json(&state, "/categories/42").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Games");

    let (status, _) = get_json(&state, "/categories/7").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_albums() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = state(&temp_dir, vec![]);

    let (status, body) = get_json(&state, "/albums").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), vec![13, 12]);

    let (status, body) = get_json(&state, "/albums/12").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Night shift");
    assert_eq!(body["episode_ids"], json!([154398]));

    let (status, _) = get_json(&state, "/albums/99").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_repeated_request_is_a_cache_hit() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = state(&temp_dir, vec![]);
    let mut events = state.event_channel.subscribe();

    get_json(&state, "/categories").await;
    get_json(&state, "/categories").await;

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.key() == "get_all_categories:" {
            kinds.push(event.kind());
        }
    }
    assert_eq!(kinds, vec!["miss", "stored", "hit"]);
}

#[tokio::test]
async fn test_events_endpoint_streams_sse() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state = state(&temp_dir, vec![]);

    let response = app(&state)
        .oneshot(
            Request::builder()
                .uri("/events?type=hit")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );
}

type KvStore = Arc<Mutex<HashMap<String, String>>>;

async fn kv_get(
    State(kv): State<KvStore>,
    Path((_account, _ns, key)): Path<(String, String, String)>,
) -> (StatusCode, String) {
    match kv.lock().unwrap().get(&key) {
        Some(value) => (StatusCode::OK, value.clone()),
        None => (StatusCode::NOT_FOUND, String::new()),
    }
}

async fn kv_put(
    State(kv): State<KvStore>,
    Path((_account, _ns, key)): Path<(String, String, String)>,
    body: String,
) -> StatusCode {
    kv.lock().unwrap().insert(key, body);
    StatusCode::OK
}

async fn kv_delete(
    State(kv): State<KvStore>,
    Path((_account, _ns, key)): Path<(String, String, String)>,
) -> StatusCode {
    match kv.lock().unwrap().remove(&key) {
        Some(_) => StatusCode::OK,
        None => StatusCode::NOT_FOUND,
    }
}

/// In-process edge KV API; returns its base URL and backing map.
async fn spawn_kv_api() -> (String, KvStore) {
    let kv: KvStore = Arc::new(Mutex::new(HashMap::new()));
    let app = Router::new()
        .route(
            "/accounts/{account}/storage/kv/namespaces/{ns}/values/{key}",
            get(kv_get).put(kv_put).delete(kv_delete),
        )
        .with_state(kv.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), kv)
}

fn edge_config(api_base: &str) -> Config {
    let vars: HashMap<&str, String> = [
        ("PODCAST_CACHE_BACKEND", "edge".to_string()),
        ("CLOUDFLARE_API_BASE", api_base.to_string()),
        ("CLOUDFLARE_ACCOUNT_ID", "acct".to_string()),
        ("CLOUDFLARE_EMAIL", "ops@example.com".to_string()),
        ("CLOUDFLARE_API_KEY", "key".to_string()),
        ("CLOUDFLARE_NAMESPACE_ID", "ns".to_string()),
    ]
    .into_iter()
    .collect();
    Config::from_lookup(|name| vars.get(name).cloned()).unwrap()
}

#[tokio::test]
async fn test_edge_backend_does_not_pin_missing_rows() {
    let (base, kv) = spawn_kv_api().await;
    let temp_dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&temp_dir);
    let cache = BackendFactory::create_cache(&edge_config(&base)).unwrap();
    let state = AppState::new(store.clone(), cache, vec![]);

    let (status, _) = get_json(&state, "/users/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(!kv.lock().unwrap().contains_key("cache:get_user:user_id:999"));

    let (status, _) = get_json(&state, "/users/13701").await;
    assert_eq!(status, StatusCode::OK);
    assert!(kv.lock().unwrap().contains_key("cache:get_user:user_id:13701"));

    catalog::import_json(
        &store,
        r#"{"id": "999", "type": "users", "attributes": {"nickname": "Late", "thumb": null, "followers-count": 1, "followees-count": 0}}"#,
    )
    .unwrap();

    let (status, body) = get_json(&state, "/users/999").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["nickname"], "Late");
}
