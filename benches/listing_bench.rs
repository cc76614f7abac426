use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use sqlx::sqlite::SqlitePoolOptions;
use std::fs;
use std::hint::black_box;
use std::path::Path;
use tempfile::TempDir;
use tokio::runtime::Runtime;
use webdavhub::config::AppConfig;
use webdavhub::db;
use webdavhub::library::listing::{paginate, sort_entries, ListQuery};
use webdavhub::library::resolve::resolve_directory;
use webdavhub::state::AppState;
use webdavhub::types::{CachedFolder, DirectoryEntry, EntryKind};

fn create_library(folders: usize, files_per_folder: usize) -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let movies = temp_dir.path().join("Movies");
    for i in 0..folders {
        let dir = movies.join(format!("Movie {:04} ({}) {{tmdb-{}}}", i, 1950 + i % 70, i + 1));
        fs::create_dir_all(&dir).unwrap();
        for j in 0..files_per_folder {
            fs::write(dir.join(format!("part{}.mkv", j)), b"x").unwrap();
        }
    }
    temp_dir
}

fn entries(count: usize) -> Vec<DirectoryEntry> {
    (0..count)
        .map(|i| DirectoryEntry {
            // Reverse order so the sort has work to do
            name: format!("Entry {:05}", count - i),
            kind: if i % 3 == 0 { EntryKind::File } else { EntryKind::Directory },
            ..Default::default()
        })
        .collect()
}

fn benchmark_sort_and_paginate(c: &mut Criterion) {
    let mut group = c.benchmark_group("sort_and_paginate");
    for size in [100usize, 1_000, 10_000] {
        let input = entries(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &input, |b, input| {
            b.iter(|| {
                let mut items = input.clone();
                sort_entries(&mut items);
                black_box(paginate(items, 2, 100))
            })
        });
    }
    group.finish();
}

fn benchmark_resolve(c: &mut Criterion) {
    let library = create_library(500, 0);
    let root = library.path();

    c.bench_function("resolve_exact", |b| b.iter(|| black_box(resolve_directory(root, "/Movies"))));
    c.bench_function("resolve_decorated", |b| {
        b.iter(|| black_box(resolve_directory(root, "/Movies/Movie 0250 (1970)")))
    });
}

async fn seed_folders(state: &AppState, root: &Path) {
    for entry in fs::read_dir(root.join("Movies")).unwrap().flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        state
            .store
            .upsert_folder(&CachedFolder {
                folder_path: format!("/Movies/{}", name),
                parent_path: "/Movies".to_string(),
                tmdb_id: Some("1".to_string()),
                media_type: Some("movie".to_string()),
                last_updated: "2024-01-01T00:00:00Z".to_string(),
                folder_name: name,
            })
            .await
            .unwrap();
    }
}

fn benchmark_listing(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let library = create_library(1_000, 1);
    let state = rt.block_on(async {
        let url = format!("sqlite://{}?mode=rwc", library.path().join("bench.db").display());
        let pool = SqlitePoolOptions::new().max_connections(1).connect(&url).await.unwrap();
        db::init_db(&pool).await.unwrap();
        let mut cfg = AppConfig::default();
        cfg.library.destination_dir = library.path().to_string_lossy().into_owned();
        cfg.library.source_dir = String::new();
        let state = AppState::new(pool, cfg).unwrap();
        seed_folders(&state, library.path()).await;
        state
    });

    let mut group = c.benchmark_group("listing");
    group.bench_function("first_page", |b| {
        b.iter(|| rt.block_on(async { black_box(state.lister.list("/Movies", &ListQuery::default()).await.unwrap()) }))
    });
    group.bench_function("search", |b| {
        let query = ListQuery { search: Some("0999".to_string()), ..Default::default() };
        b.iter(|| rt.block_on(async { black_box(state.lister.list("/Movies", &query).await.unwrap()) }))
    });
    group.bench_function("letter", |b| {
        let query = ListQuery { letter: Some("m".to_string()), ..Default::default() };
        b.iter(|| rt.block_on(async { black_box(state.lister.list("/Movies", &query).await.unwrap()) }))
    });
    group.finish();
}

criterion_group!(benches, benchmark_sort_and_paginate, benchmark_resolve, benchmark_listing);
criterion_main!(benches);
