#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use crate::events::{kinds, BroadcastMessage};
    use crate::tests::{test_env, touch};
    use crate::types::CachedFolder;

    fn drain(sub: &mut crate::events::hub::Subscription) -> Vec<Value> {
        let mut out = Vec::new();
        while let Some(text) = sub.try_recv() {
            out.push(serde_json::from_str(&text).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn episode_link_records_everything() {
        let env = test_env().await;
        touch(env.root(), "TV Shows/Dark (2017) {tmdb-70523}/Season 1/e1.mkv");
        let dest = env.root().join("TV Shows/Dark (2017) {tmdb-70523}/Season 1/e1.mkv");
        let mut sub = env.state.hub.subscribe();

        let msg = BroadcastMessage::new(
            kinds::SYMLINK_CREATED,
            json!({
                "media_name": "Dark",
                "media_type": "tv",
                "source_file": "/src/dark/s01e01.mkv",
                "destination_file": dest.to_string_lossy(),
                "filename": "e1.mkv",
                "tmdb_id": "70523",
                "season_number": 1,
                "episode_number": 1,
                "proper_show_name": "Dark (2017) {tmdb-70523}",
                "episode_title": "S01E01 - Secrets",
            }),
        );
        env.state.ingest.apply(&msg).await;

        let store = env.store();
        assert_eq!(store.source_status("/src/dark/s01e01.mkv").await.unwrap().as_deref(), Some("processed"));

        let processed = store.processed_for_path("/src/dark/s01e01.mkv").await.unwrap().unwrap();
        assert_eq!(processed.base_path.as_deref(), Some("TV Shows"));
        assert_eq!(processed.proper_name.as_deref(), Some("Dark"));
        assert_eq!(processed.year.as_deref(), Some("2017"));
        assert_eq!(processed.file_size, Some(5));
        assert_eq!(processed.season_number, Some(1));

        let recent = store.recent_media(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].name, "Dark");
        assert_eq!(recent[0].folder_name, "TV Shows");
        assert_eq!(recent[0].show_name.as_deref(), Some("Dark (2017)"));
        assert_eq!(recent[0].episode_title.as_deref(), Some("Secrets"));
        assert_eq!(recent[0].episode_number, Some(1));

        let kinds_seen: Vec<String> =
            drain(&mut sub).iter().map(|m| m["type"].as_str().unwrap_or_default().to_string()).collect();
        assert_eq!(kinds_seen, vec![kinds::CONNECTED, kinds::FILE_PROCESSED, kinds::DASHBOARD_STATS_CHANGED]);
    }

    #[tokio::test]
    async fn movie_link_keeps_episode_fields_empty() {
        let env = test_env().await;
        let dest = env.root().join("Movies/Heat (1995)/heat.mkv");
        let msg = BroadcastMessage::new(
            kinds::SYMLINK_CREATED,
            json!({
                "media_name": "Heat (1995)",
                "media_type": "movie",
                "destination_file": dest.to_string_lossy(),
                "season_number": 3,
                "episode_title": "ignored",
            }),
        );
        env.state.ingest.apply(&msg).await;

        let recent = env.store().recent_media(10).await.unwrap();
        assert_eq!(recent[0].folder_name, "Movies");
        assert_eq!(recent[0].season_number, None);
        assert_eq!(recent[0].episode_title, None);
        // No source file, nothing marked as processed
        assert!(env.store().processed_for_path(&dest.to_string_lossy()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn force_mode_rebuilds_the_category_mirror() {
        let env = test_env().await;
        let stale = CachedFolder {
            folder_name: "Old Movie".to_string(),
            folder_path: "/Movies/Old Movie".to_string(),
            parent_path: "/Movies".to_string(),
            last_updated: "2024-01-01T00:00:00Z".to_string(),
            ..Default::default()
        };
        env.store().upsert_folder(&stale).await.unwrap();

        let dest = env.root().join("Movies/Heat (1995)/heat.mkv");
        let msg = BroadcastMessage::new(
            kinds::SYMLINK_CREATED,
            json!({
                "media_name": "Heat (1995)",
                "media_type": "movie",
                "destination_file": dest.to_string_lossy(),
                "tmdb_id": 949,
                "force_mode": "true",
            }),
        );
        env.state.ingest.apply(&msg).await;

        let store = env.store();
        assert!(store.folder_by_path("/Movies/Old Movie").await.unwrap().is_none());
        let row = store.folder_by_path("/Movies/Heat (1995)").await.unwrap().unwrap();
        assert_eq!(row.parent_path, "/Movies");
        assert_eq!(row.tmdb_id.as_deref(), Some("949"));
        assert_eq!(row.media_type.as_deref(), Some("movie"));
    }

    #[tokio::test]
    async fn incomplete_or_foreign_messages_are_ignored() {
        let env = test_env().await;
        let mut sub = env.state.hub.subscribe();

        let no_type = BroadcastMessage::new(kinds::SYMLINK_CREATED, json!({ "media_name": "Heat" }));
        env.state.ingest.apply(&no_type).await;
        let other = BroadcastMessage::new("scan_progress", json!({ "media_name": "Heat", "media_type": "movie" }));
        env.state.ingest.apply(&other).await;

        assert!(env.store().recent_media(10).await.unwrap().is_empty());
        assert_eq!(drain(&mut sub).len(), 1);
    }

    #[tokio::test]
    async fn processed_base_path_becomes_a_category() {
        let env = test_env().await;
        touch(env.root(), "Documentaries/Planet Earth/");
        assert!(!env.state.categories.folders(env.store()).await.contains("documentaries"));

        let dest = env.root().join("Documentaries/Planet Earth/pe.mkv");
        let msg = BroadcastMessage::new(
            kinds::SYMLINK_CREATED,
            json!({
                "media_name": "Planet Earth",
                "media_type": "movie",
                "source_file": "/src/pe.mkv",
                "destination_file": dest.to_string_lossy(),
            }),
        );
        env.state.ingest.apply(&msg).await;

        assert!(env.state.categories.folders(env.store()).await.contains("documentaries"));
    }
}
