#[cfg(test)]
mod tests {
    use axum::{
        body::{Body, Bytes},
        http::{header, HeaderMap, Method, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use std::{net::SocketAddr, time::Duration};
    use tokio::task::JoinHandle;
    use tower::ServiceExt;

    use crate::events::kinds;
    use crate::routes;
    use crate::tests::{test_env, test_env_with, touch, TestEnv};
    use crate::types::{CachedFolder, ProcessedFile};

    struct Reply {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    }

    impl Reply {
        fn json(&self) -> Value {
            serde_json::from_slice(&self.body).unwrap()
        }

        fn header(&self, name: &str) -> Option<&str> {
            self.headers.get(name).and_then(|v| v.to_str().ok())
        }
    }

    async fn send(env: &TestEnv, req: Request<Body>) -> Reply {
        let response = routes::app(env.state.clone()).oneshot(req).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        Reply { status, headers, body }
    }

    async fn get(env: &TestEnv, uri: &str) -> Reply {
        send(env, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
    }

    async fn post_json(env: &TestEnv, method: Method, uri: &str, body: Value) -> Reply {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        send(env, req).await
    }

    async fn post(env: &TestEnv, uri: &str, body: Value) -> Reply {
        post_json(env, Method::POST, uri, body).await
    }

    fn folder_row(parent: &str, name: &str, tmdb: Option<&str>) -> CachedFolder {
        CachedFolder {
            folder_name: name.to_string(),
            folder_path: format!("{}/{}", parent, name),
            parent_path: parent.to_string(),
            tmdb_id: tmdb.map(str::to_string),
            media_type: tmdb.map(|_| "movie".to_string()),
            last_updated: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn health_is_public_and_carries_security_headers() {
        let env = test_env().await;
        let reply = get(&env, "/api/health").await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.json()["status"], "ok");
        assert!(reply.json()["timestamp"].as_i64().unwrap() > 0);
        assert_eq!(reply.header("x-content-type-options"), Some("nosniff"));
    }

    #[tokio::test]
    async fn bearer_token_guards_protected_routes() {
        let env = test_env_with(|cfg, _| {
            cfg.auth.enabled = true;
            cfg.auth.token = "secret".to_string();
        })
        .await;

        let reply = get(&env, "/api/files").await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
        assert_eq!(reply.json()["error"]["code"], "UNAUTHORIZED");

        let wrong = Request::builder()
            .uri("/api/auth-test")
            .header(header::AUTHORIZATION, "Bearer nope")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&env, wrong).await.status, StatusCode::UNAUTHORIZED);

        let ok = Request::builder()
            .uri("/api/files")
            .header(header::AUTHORIZATION, "Bearer secret")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&env, ok).await.status, StatusCode::OK);

        // EventSource clients pass the token in the query string
        assert_eq!(get(&env, "/api/auth-test?token=secret").await.status, StatusCode::OK);

        assert_eq!(get(&env, "/api/health").await.status, StatusCode::OK);
        let reply = get(&env, "/api/auth-enabled").await;
        assert_eq!(reply.json(), json!({ "enabled": true }));
    }

    #[tokio::test]
    async fn auth_disabled_lets_everything_through() {
        let env = test_env().await;
        assert_eq!(get(&env, "/api/auth-enabled").await.json(), json!({ "enabled": false }));
        assert_eq!(get(&env, "/api/auth-test").await.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn listing_reports_pagination_headers() {
        let env = test_env().await;
        touch(env.root(), "Movies/Heat (1995)/heat.mkv");
        touch(env.root(), "Movies/Alien (1979)/alien.mkv");

        let reply = get(&env, "/api/files/Movies?limit=1&page=2").await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.header("x-total-count"), Some("2"));
        assert_eq!(reply.header("x-page"), Some("2"));
        assert_eq!(reply.header("x-limit"), Some("1"));
        assert_eq!(reply.header("x-total-pages"), Some("2"));
        assert_eq!(reply.header("x-has-allowed-extensions"), Some("false"));
        let body = reply.json();
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["name"], "Heat (1995)");
        assert_eq!(body[0]["type"], "directory");
        assert_eq!(body[0]["path"], "/Movies/Heat (1995)");

        let reply = get(&env, "/api/files/Movies/Heat%20(1995)").await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.json()[0]["name"], "heat.mkv");
        assert_eq!(reply.json()[0]["size"], "5 B");

        let reply = get(&env, "/api/files/Movies?limit=abc&page=-1").await;
        assert_eq!(reply.header("x-limit"), Some("100"));
        assert_eq!(reply.header("x-page"), Some("1"));
    }

    #[tokio::test]
    async fn listing_errors_use_the_envelope() {
        let env = test_env().await;
        let reply = get(&env, "/api/files/Missing").await;
        assert_eq!(reply.status, StatusCode::NOT_FOUND);
        assert_eq!(reply.json()["error"]["code"], "NOT_FOUND");
        assert_eq!(reply.json()["status"], 404);

        let reply = get(&env, "/api/files/%2e%2e/etc").await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.json()["error"]["code"], "INVALID_INPUT");
    }

    #[tokio::test]
    async fn placeholder_destination_needs_configuration() {
        let env = test_env_with(|cfg, _| cfg.library.destination_dir = "/path/to/destination".to_string()).await;

        let reply = get(&env, "/api/files").await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.header("x-needs-configuration"), Some("true"));
        assert_eq!(reply.json(), json!([]));

        let status = get(&env, "/api/config-status").await.json();
        assert_eq!(status["isPlaceholder"], true);
        assert_eq!(status["needsConfiguration"], true);
        assert_eq!(status["destinationDir"], "/path/to/destination");
    }

    #[tokio::test]
    async fn config_status_for_a_configured_library() {
        let env = test_env().await;
        let status = get(&env, "/api/config-status").await.json();
        assert_eq!(status["isPlaceholder"], false);
        assert_eq!(status["needsConfiguration"], false);
        assert_eq!(status["effectiveRootDir"], env.library.path().to_string_lossy().as_ref());
    }

    #[tokio::test]
    async fn bulk_delete_reports_partial_failures() {
        let env = test_env().await;
        touch(env.root(), "a");
        touch(env.root(), "b");

        let reply = post(&env, "/api/delete", json!({ "paths": ["a", "missing", "b"] })).await;
        assert_eq!(reply.status, StatusCode::OK);
        let body = reply.json();
        assert_eq!(body["success"], true);
        assert_eq!(body["deletedCount"], 2);
        assert_eq!(body["errors"].as_array().unwrap().len(), 1);
        assert_eq!(body["error"], "Deleted 2 files with 1 errors.");
        assert!(!env.root().join("a").exists());
        assert!(!env.root().join("b").exists());

        let reply = post(&env, "/api/delete", json!({ "paths": ["gone"] })).await;
        assert_eq!(reply.status, StatusCode::OK);
        let body = reply.json();
        assert_eq!(body["success"], false);
        assert_eq!(body["deletedCount"], 0);
        assert_eq!(body["error"], "Failed to delete any files. 1 errors occurred.");
    }

    #[tokio::test]
    async fn single_delete_validates_input() {
        let env = test_env().await;
        touch(env.root(), "Movies/keep.mkv");

        let reply = post(&env, "/api/delete", json!({ "path": "../etc" })).await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.json()["error"]["code"], "INVALID_INPUT");

        let reply = post(&env, "/api/delete", json!({ "path": "Movies/nope.mkv" })).await;
        assert_eq!(reply.status, StatusCode::NOT_FOUND);

        let reply = post(&env, "/api/delete", json!({})).await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.json()["error"]["code"], "VALIDATION_ERROR");

        let reply = post_json(&env, Method::DELETE, "/api/delete", json!({ "path": "Movies/keep.mkv" })).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.json(), json!({ "success": true }));
        assert!(!env.root().join("Movies").exists());
    }

    #[tokio::test]
    async fn delete_clears_database_rows_and_notifies() {
        let env = test_env().await;
        touch(env.root(), "Movies/Heat/heat.mkv");
        touch(env.root(), "Movies/Alien/");
        env.store().upsert_folder(&folder_row("/Movies", "Heat", Some("949"))).await.unwrap();
        let dest = env.root().join("Movies/Heat/heat.mkv");
        env.store()
            .upsert_processed(&ProcessedFile {
                file_path: "/src/heat.mkv".to_string(),
                destination_path: Some(dest.to_string_lossy().into_owned()),
                file_size: Some(10),
                ..Default::default()
            })
            .await
            .unwrap();
        let mut events = env.state.hub.subscribe();
        assert!(events.recv().await.unwrap().contains(kinds::CONNECTED));

        let reply = post(&env, "/api/delete", json!({ "path": "Movies/Heat" })).await;
        assert_eq!(reply.status, StatusCode::OK);

        let outside = post(&env, "/api/delete", json!({ "path": "/Movies/Alien" })).await;
        assert_eq!(outside.status, StatusCode::BAD_REQUEST);
        assert!(env.root().join("Movies/Alien").exists());

        assert!(env.store().folder_by_path("/Movies/Heat").await.unwrap().is_none());
        assert!(env.store().processed_for_path("/src/heat.mkv").await.unwrap().is_none());
        let first = events.try_recv().unwrap();
        let second = events.try_recv().unwrap();
        assert!(first.contains(kinds::DASHBOARD_STATS_CHANGED));
        assert!(second.contains(kinds::FILE_OPERATION_CHANGED));
        assert!(second.contains("/Movies/Heat"));

        let names: Vec<Value> =
            get(&env, "/api/files/Movies").await.json().as_array().unwrap().iter().map(|e| e["name"].clone()).collect();
        assert_eq!(names, vec![json!("Alien")]);
    }

    #[tokio::test]
    async fn rename_updates_disk_and_folder_mirror() {
        let env = test_env().await;
        touch(env.root(), "Movies/Old/");
        touch(env.root(), "Movies/Taken/");
        env.store().upsert_folder(&folder_row("/Movies", "Old", Some("1"))).await.unwrap();

        let reply = post(&env, "/api/rename", json!({ "oldPath": "Movies/Old", "newName": "New" })).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.json(), json!({ "success": true, "newPath": "/Movies/New" }));
        assert!(env.root().join("Movies/New").is_dir());
        let row = env.store().folder_by_path("/Movies/New").await.unwrap().unwrap();
        assert_eq!(row.folder_name, "New");
        assert_eq!(row.tmdb_id.as_deref(), Some("1"));

        let reply = post(&env, "/api/rename", json!({ "oldPath": "Movies/New", "newName": "Taken" })).await;
        assert_eq!(reply.status, StatusCode::CONFLICT);
        assert_eq!(reply.json()["error"]["code"], "CONFLICT");

        let reply = post(&env, "/api/rename", json!({ "oldPath": "Movies/New", "newName": "a/b" })).await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);

        let reply = post(&env, "/api/rename", json!({ "oldPath": "Movies/New" })).await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.json()["error"]["details"]["field"], "newName");
    }

    #[tokio::test]
    async fn metadata_cache_round_trip_is_byte_exact() {
        let env = test_env().await;
        let raw = r#"{"id":949, "title":"Heat","poster_path":"/p.jpg","extra":[1,2,3]}"#;

        let reply = post(&env, "/api/tmdb-cache", json!({ "query": "Heat|1995|movie", "result": raw })).await;
        assert_eq!(reply.status, StatusCode::OK);

        let reply = get(&env, "/api/tmdb-cache?query=Heat%7C1995%7Cmovie").await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.header("x-tmdb-cache"), Some("HIT"));
        assert_eq!(reply.header("content-type"), Some("application/json"));
        assert_eq!(&reply.body[..], raw.as_bytes());
    }

    #[tokio::test]
    async fn metadata_cache_secondary_hits_and_misses() {
        let env = test_env().await;
        let raw = r#"{"id":70523,"name":"Dark","media_type":"tv"}"#;
        post(&env, "/api/tmdb-cache", json!({ "query": "Dark||tv", "result": raw })).await;

        let reply = get(&env, "/api/tmdb-cache?query=id:70523:tv").await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.header("x-tmdb-cache"), Some("HIT-SECONDARY"));
        assert_eq!(&reply.body[..], raw.as_bytes());
        assert_eq!(get(&env, "/api/tmdb-cache?query=id:70523:tv").await.header("x-tmdb-cache"), Some("HIT"));

        // Nothing answers on the configured upstream
        let reply = get(&env, "/api/tmdb-cache?query=Nope%7C2000%7Cmovie").await;
        assert_eq!(reply.status, StatusCode::NOT_FOUND);

        assert_eq!(get(&env, "/api/tmdb-cache").await.status, StatusCode::BAD_REQUEST);
        let reply = post(&env, "/api/tmdb-cache", json!({ "query": "x" })).await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);

        let reply = send(&env, Request::builder().method(Method::DELETE).uri("/api/tmdb-cache").body(Body::empty()).unwrap()).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert!(env.state.metadata.lookup("Dark||tv").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn secondary_hit_is_served_when_the_cache_write_fails() {
        let env = test_env().await;
        let raw = r#"{"id":70523,"name":"Dark","media_type":"tv"}"#;
        post(&env, "/api/tmdb-cache", json!({ "query": "Dark||tv", "result": raw })).await;
        sqlx::query(
            "CREATE TRIGGER tmdb_cache_read_only BEFORE INSERT ON tmdb_cache \
             BEGIN SELECT RAISE(ABORT, 'read only'); END",
        )
        .execute(&env.state.db)
        .await
        .unwrap();

        let reply = get(&env, "/api/tmdb-cache?query=id:70523:tv").await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.header("x-tmdb-cache"), Some("HIT-SECONDARY"));
        assert_eq!(&reply.body[..], raw.as_bytes());
        // The id key was never stored
        assert!(env.state.metadata.lookup("id:70523:tv").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_details_crud() {
        let env = test_env().await;
        let detail = json!({ "path": "/Movies/Heat/heat.mkv", "name": "heat.mkv", "type": "file", "size": 10 });
        assert_eq!(post(&env, "/api/file-details", detail).await.status, StatusCode::OK);

        let reply = get(&env, "/api/file-details?path=%2FMovies%2FHeat%2Fheat.mkv").await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.json()["name"], "heat.mkv");
        assert_eq!(reply.json()["size"], 10);

        let reply = get(&env, "/api/file-details?prefix=%2FMovies").await;
        assert_eq!(reply.json().as_array().unwrap().len(), 1);

        assert_eq!(get(&env, "/api/file-details").await.status, StatusCode::BAD_REQUEST);

        let del = Request::builder()
            .method(Method::DELETE)
            .uri("/api/file-details?path=%2FMovies%2FHeat%2Fheat.mkv")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&env, del).await.status, StatusCode::OK);
        let reply = get(&env, "/api/file-details?path=%2FMovies%2FHeat%2Fheat.mkv").await;
        assert_eq!(reply.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn readlink_joins_processed_rows() {
        let env = test_env().await;
        touch(env.root(), "Movies/Heat/heat.mkv");
        let abs = env.root().join("Movies/Heat/heat.mkv");
        let real = std::fs::canonicalize(&abs).unwrap();

        let reply = post(&env, "/api/readlink", json!({ "path": "/Movies/Heat/heat.mkv" })).await;
        assert_eq!(reply.status, StatusCode::OK);
        let body = reply.json();
        assert_eq!(body["realPath"], real.to_string_lossy().as_ref());
        assert_eq!(body["foundInDb"], false);

        env.store()
            .upsert_processed(&ProcessedFile {
                file_path: "/src/heat.mkv".to_string(),
                destination_path: Some(real.to_string_lossy().into_owned()),
                tmdb_id: Some("949".to_string()),
                file_size: Some(2048),
                ..Default::default()
            })
            .await
            .unwrap();
        let body = post(&env, "/api/readlink", json!({ "path": "/Movies/Heat/heat.mkv" })).await.json();
        assert_eq!(body["foundInDb"], true);
        assert_eq!(body["tmdbId"], "949");
        assert_eq!(body["formattedSize"], "2.0 KB");

        let body = post(&env, "/api/readlink", json!({ "path": "/Movies/missing.mkv" })).await.json();
        assert!(body["error"].is_string());
        assert_eq!(body["foundInDb"], false);

        assert_eq!(post(&env, "/api/readlink", json!({ "path": "" })).await.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn source_browse_without_sources() {
        let env = test_env().await;
        let reply = get(&env, "/api/source-browse").await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.header("x-needs-configuration"), Some("true"));
        assert_eq!(reply.json()["error"], "No source directories configured");
        assert_eq!(reply.json()["data"], json!([]));
    }

    #[tokio::test]
    async fn source_browse_hides_processed_files() {
        let source = TempDir::new().unwrap();
        let src = source.path().to_path_buf();
        touch(&src, "done.mkv");
        touch(&src, "todo.mkv");
        touch(&src, "Extras/");
        touch(&src, ".hidden");
        let env = test_env_with(|cfg, _| cfg.library.source_dir = src.to_string_lossy().into_owned()).await;
        env.store()
            .upsert_processed(&ProcessedFile {
                file_path: src.join("done.mkv").to_string_lossy().into_owned(),
                ..Default::default()
            })
            .await
            .unwrap();

        let reply = get(&env, "/api/source-browse").await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.header("x-source-index"), Some("0"));
        assert_eq!(reply.header("x-source-directory"), Some(src.to_string_lossy().as_ref()));
        let body = reply.json();
        let names: Vec<&str> = body.as_array().unwrap().iter().map(|e| e["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["Extras", "todo.mkv"]);
        assert_eq!(body[1]["isMediaFile"], true);
        assert_eq!(body[1]["isSourceFile"], true);
    }

    #[tokio::test]
    async fn source_browse_lists_roots_for_multiple_sources() {
        let (one, two) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        touch(two.path(), "Show/e1.mkv");
        let dirs = format!("{},{}", one.path().display(), two.path().display());
        let env = test_env_with(|cfg, _| cfg.library.source_dir = dirs).await;

        let reply = get(&env, "/api/source-browse").await;
        assert_eq!(reply.header("x-total-count"), Some("2"));
        assert_eq!(reply.header("x-source-directories").map(|v| v.split(',').count()), Some(2));
        assert_eq!(reply.json()[0]["isSourceRoot"], true);

        let reply = get(&env, "/api/source-browse/Show?source=1").await;
        assert_eq!(reply.header("x-source-index"), Some("1"));
        assert_eq!(reply.json()[0]["name"], "e1.mkv");
        assert_eq!(reply.json()[0]["fullPath"], "/Show/e1.mkv?source=1");
    }

    #[tokio::test]
    async fn pipeline_message_is_relayed_and_recorded() {
        let env = test_env().await;
        let mut events = env.state.hub.subscribe();
        events.recv().await.unwrap();

        let dest = env.root().join("Movies/Heat (1995)/heat.mkv");
        let message = json!({
            "type": "symlink_created",
            "data": {
                "media_name": "Heat (1995)",
                "media_type": "movie",
                "source_file": "/src/heat.mkv",
                "destination_file": dest.to_string_lossy(),
                "tmdb_id": 949,
            }
        });
        let reply = post(&env, "/api/mediahub-message", message).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.json(), json!({ "success": true }));

        let mut seen = Vec::new();
        while let Some(text) = events.try_recv() {
            let value: Value = serde_json::from_str(&text).unwrap();
            seen.push(value["type"].as_str().unwrap().to_string());
            if value["type"] == kinds::SYMLINK_CREATED {
                assert!(value["timestamp"].as_f64().unwrap() > 0.0);
            }
        }
        assert!(seen.contains(&kinds::SYMLINK_CREATED.to_string()));
        assert!(seen.contains(&kinds::FILE_PROCESSED.to_string()));

        let recent = get(&env, "/api/recent-media").await.json();
        assert_eq!(recent.as_array().unwrap().len(), 1);
        assert_eq!(recent[0]["name"], "Heat (1995)");
        assert_eq!(recent[0]["folderName"], "Movies");
        assert_eq!(recent[0]["tmdbId"], "949");
    }

    #[tokio::test]
    async fn pipeline_message_without_type_is_still_relayed() {
        let env = test_env().await;
        let mut events = env.state.hub.subscribe();
        events.recv().await.unwrap();

        let reply = post(&env, "/api/mediahub-message", json!({ "type": "", "data": { "note": "x" } })).await;
        assert_eq!(reply.status, StatusCode::OK);
        let reply = post(&env, "/api/mediahub-message", json!({ "data": {} })).await;
        assert_eq!(reply.status, StatusCode::OK);

        let first: Value = serde_json::from_str(&events.try_recv().unwrap()).unwrap();
        assert_eq!(first["type"], "");
        assert_eq!(first["data"]["note"], "x");
        assert!(events.try_recv().is_some());
        assert!(env.store().recent_media(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stats_refresh_counts_processed_files() {
        let env = test_env().await;
        assert_eq!(get(&env, "/api/stats").await.json()["totalFiles"], 0);

        env.store()
            .upsert_processed(&ProcessedFile {
                file_path: "/src/heat.mkv".to_string(),
                media_type: Some("movie".to_string()),
                file_size: Some(1024),
                ..Default::default()
            })
            .await
            .unwrap();
        // Cached until refreshed
        assert_eq!(get(&env, "/api/stats").await.json()["totalFiles"], 0);
        let stats = get(&env, "/api/stats?refresh=true").await.json();
        assert_eq!(stats["totalFiles"], 1);
        assert_eq!(stats["totalSize"], "1.0 KB");
        assert_eq!(stats["webdavStatus"], "Active");
    }

    #[tokio::test]
    async fn metrics_count_listings() {
        let env = test_env().await;
        get(&env, "/api/files").await;
        get(&env, "/api/files").await;
        assert_eq!(get(&env, "/api/metrics").await.json()["listings_served"], 2);

        let reply = get(&env, "/api/metrics/prometheus").await;
        assert!(reply.header("content-type").unwrap().starts_with("text/plain"));
        assert!(String::from_utf8_lossy(&reply.body).contains("webdavhub_listings_served 2"));
    }

    #[tokio::test]
    async fn wrong_method_is_rejected() {
        let env = test_env().await;
        assert_eq!(get(&env, "/api/delete").await.status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(get(&env, "/api/rename").await.status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(post(&env, "/api/health", json!({})).await.status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(get(&env, "/api/unknown").await.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn restart_cancels_the_shutdown_token() {
        let env = test_env().await;
        let reply = post(&env, "/api/restart", json!({})).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.json()["status"], "success");
        tokio::time::timeout(std::time::Duration::from_secs(5), env.state.shutdown.cancelled()).await.unwrap();
    }

    async fn serve(env: &TestEnv) -> (SocketAddr, JoinHandle<std::io::Result<()>>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = routes::app(env.state.clone());
        let token = env.state.shutdown.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
        });
        (addr, server)
    }

    /// Next `data:` frame of an event stream; keep-alive comments are skipped.
    async fn next_event(response: &mut reqwest::Response, buf: &mut String) -> Option<Value> {
        loop {
            if let Some(end) = buf.find("\n\n") {
                let frame: String = buf.drain(..end + 2).collect();
                if let Some(data) = frame.lines().find_map(|l| l.strip_prefix("data:")) {
                    return Some(serde_json::from_str(data.trim_start()).unwrap());
                }
                continue;
            }
            let chunk = tokio::time::timeout(Duration::from_secs(5), response.chunk()).await.unwrap().unwrap()?;
            buf.push_str(&String::from_utf8_lossy(&chunk));
        }
    }

    #[tokio::test]
    async fn event_stream_sends_connected_then_relayed_messages() {
        let env = test_env().await;
        let (addr, server) = serve(&env).await;

        let mut response = reqwest::get(format!("http://{}/api/mediahub-events", addr)).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
        assert!(content_type.starts_with("text/event-stream"), "{}", content_type);

        let mut buf = String::new();
        let hello = next_event(&mut response, &mut buf).await.unwrap();
        assert_eq!(hello["type"], kinds::CONNECTED);

        let reply = reqwest::Client::new()
            .post(format!("http://{}/api/mediahub-message", addr))
            .json(&json!({ "type": "scan_progress", "data": { "processed": 3 } }))
            .send()
            .await
            .unwrap();
        assert_eq!(reply.status().as_u16(), 200);

        let relayed = next_event(&mut response, &mut buf).await.unwrap();
        assert_eq!(relayed["type"], "scan_progress");
        assert_eq!(relayed["data"]["processed"], 3);
        assert!(relayed["timestamp"].as_f64().unwrap() > 0.0);

        env.state.shutdown.cancel();
        assert!(next_event(&mut response, &mut buf).await.is_none());
        tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_is_not_held_up_by_open_streams() {
        let env = test_env().await;
        let (addr, server) = serve(&env).await;

        let mut events = reqwest::get(format!("http://{}/api/mediahub-events", addr)).await.unwrap();
        let mut buf = String::new();
        assert_eq!(next_event(&mut events, &mut buf).await.unwrap()["type"], kinds::CONNECTED);
        let bridge = reqwest::get(format!("http://{}/api/mediahub-bridge", addr)).await.unwrap();
        assert_eq!(bridge.status().as_u16(), 200);
        assert!(env.state.bridge.is_active());

        let reply = reqwest::Client::new().post(format!("http://{}/api/restart", addr)).send().await.unwrap();
        assert_eq!(reply.status().as_u16(), 200);

        let stopped = tokio::time::timeout(Duration::from_secs(5), server).await;
        assert!(stopped.is_ok(), "server still running with open streams");
        assert!(next_event(&mut events, &mut buf).await.is_none());
    }
}
