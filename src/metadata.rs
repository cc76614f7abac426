//! Read-through cache for TMDB-shaped metadata records.
//!
//! Records are stored verbatim under composite keys. Lookups walk an ordered
//! list of key variants; on a complete miss the HTTP surface may ask the
//! upstream search endpoint and store a minimal synthesized record.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::config::MetadataConfig;
use crate::store::Store;

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("metadata store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("metadata search failed: {0}")]
    Upstream(String),
    #[error("no metadata results for {0}")]
    NoResults(String),
}

fn lenient_string<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(d)?;
    Ok(match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// The fields the backend reads from a cached record. Everything is optional
/// and tolerant of numbers where strings are expected.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct MetadataRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub poster_path: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub release_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub first_air_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub media_type: Option<String>,
}

impl MetadataRecord {
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    pub fn has_poster(&self) -> bool {
        self.poster_path.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// `title` for movies, `name` for shows.
    pub fn display_title(&self) -> Option<&str> {
        self.title.as_deref().or(self.name.as_deref())
    }
}

/// Minimal record stored after an upstream search.
#[derive(Debug, Serialize)]
struct SynthesizedRecord<'a> {
    id: i64,
    title: &'a str,
    poster_path: &'a str,
    release_date: &'a str,
    media_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<Value>,
}

/// How a cache request was satisfied, reported in the `X-TMDB-Cache` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit(String),
    HitSecondary(String),
    Miss(String),
}

impl CacheOutcome {
    pub fn header_value(&self) -> &'static str {
        match self {
            CacheOutcome::Hit(_) => "HIT",
            CacheOutcome::HitSecondary(_) => "HIT-SECONDARY",
            CacheOutcome::Miss(_) => "MISS",
        }
    }

    pub fn into_body(self) -> String {
        match self {
            CacheOutcome::Hit(b) | CacheOutcome::HitSecondary(b) | CacheOutcome::Miss(b) => b,
        }
    }
}

/// Name keys in lookup order: `n||movie`, `n||tv`, `n||`, `n`, then the same lowercased.
pub fn name_keys(name: &str) -> Vec<String> {
    let lower = name.to_lowercase();
    [name, lower.as_str()]
        .iter()
        .flat_map(|n| [format!("{}||movie", n), format!("{}||tv", n), format!("{}||", n), n.to_string()])
        .collect()
}

/// Id keys in lookup order. TV kinds additionally try the spellings older
/// pipeline versions wrote.
pub fn id_keys(tmdb_id: &str, kind: &str) -> Vec<String> {
    let lower = kind.to_lowercase();
    let mut kinds = vec![lower.clone(), kind.to_string(), kind.to_uppercase()];
    if lower == "tv" || lower == "tvshow" {
        kinds.extend(["tv", "TV", "tvshow", "tvShow", "TvShow"].map(String::from));
    }
    let mut keys: Vec<String> = Vec::with_capacity(kinds.len());
    for k in kinds {
        let key = format!("id:{}:{}", tmdb_id, k);
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

/// Extracts `(id, kind)` from an `id:<id>:<kind>` key.
fn parse_id_key(key: &str) -> Option<(&str, &str)> {
    let rest = key.strip_prefix("id:")?;
    let (id, kind) = rest.split_once(':')?;
    (!id.is_empty() && !kind.is_empty()).then_some((id, kind))
}

#[derive(Clone)]
pub struct MetadataGateway {
    store: Store,
    client: reqwest::Client,
    api_host: String,
}

impl MetadataGateway {
    pub fn new(store: Store, cfg: &MetadataConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
        Ok(Self { store, client, api_host: cfg.api_host.trim_end_matches('/').to_string() })
    }

    /// Raw stored value for `key`.
    pub async fn lookup(&self, key: &str) -> Result<Option<String>, MetadataError> {
        Ok(self.store.tmdb_get(key).await?.filter(|r| !r.is_empty()))
    }

    /// First parseable record stored under any id key variant.
    pub async fn by_id(&self, tmdb_id: &str, kind: &str) -> Option<MetadataRecord> {
        for key in id_keys(tmdb_id, kind) {
            match self.store.tmdb_get(&key).await {
                Ok(Some(raw)) => {
                    if let Some(record) = MetadataRecord::parse(&raw) {
                        return Some(record);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("TMDB cache lookup failed for {}: {}", key, e);
                    return None;
                }
            }
        }
        None
    }

    /// First record with a poster stored under any name key variant.
    pub async fn by_name(&self, name: &str) -> Option<MetadataRecord> {
        for key in name_keys(name) {
            match self.store.tmdb_get(&key).await {
                Ok(Some(raw)) => {
                    if let Some(record) = MetadataRecord::parse(&raw).filter(MetadataRecord::has_poster) {
                        return Some(record);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("TMDB cache lookup failed for {}: {}", key, e);
                    return None;
                }
            }
        }
        None
    }

    /// Poster-bearing record for a folder: its own id and kind, then the id as
    /// movie and as tv, then the folder name.
    pub async fn enrich(&self, tmdb_id: Option<&str>, kind: Option<&str>, name: &str) -> Option<MetadataRecord> {
        if let Some(id) = tmdb_id.filter(|id| !id.is_empty()) {
            let mut kinds: Vec<&str> = Vec::with_capacity(3);
            if let Some(k) = kind.filter(|k| !k.is_empty()) {
                kinds.push(k);
            }
            kinds.extend(["movie", "tv"]);
            for k in kinds {
                if let Some(record) = self.by_id(id, k).await.filter(MetadataRecord::has_poster) {
                    return Some(record);
                }
            }
        }
        self.by_name(name).await
    }

    /// Stores `result` under `key`, indexing it by id and kind for secondary lookups.
    pub async fn upsert(&self, key: &str, result: &str) -> Result<(), MetadataError> {
        let record = MetadataRecord::parse(result).unwrap_or_default();
        let key_parts = parse_id_key(key);
        let tmdb_id = record.id.as_deref().or(key_parts.map(|(id, _)| id));
        let media_type = record.media_type.as_deref().or(key_parts.map(|(_, kind)| kind));
        self.store.tmdb_upsert(key, result, tmdb_id, media_type).await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<u64, MetadataError> {
        Ok(self.store.tmdb_clear().await?)
    }

    /// Full read-through path used by `GET /api/tmdb-cache`.
    pub async fn resolve(&self, key: &str, authorization: Option<&str>) -> Result<CacheOutcome, MetadataError> {
        if let Some(raw) = self.lookup(key).await? {
            return Ok(CacheOutcome::Hit(raw));
        }

        if let Some((tmdb_id, kind)) = parse_id_key(key) {
            if let Some(raw) = self.store.tmdb_find_by_id(tmdb_id, kind).await? {
                if let Err(e) = self.upsert(key, &raw).await {
                    tracing::warn!("Failed to re-store metadata under {}: {}", key, e);
                }
                return Ok(CacheOutcome::HitSecondary(raw));
            }
        }

        let raw = self.search_upstream(key, authorization).await?;
        if let Err(e) = self.upsert(key, &raw).await {
            tracing::warn!("Failed to cache upstream metadata for {}: {}", key, e);
        }
        Ok(CacheOutcome::Miss(raw))
    }

    /// Queries `<api_host>/api/tmdb/search` for a `query|year|kind` key and
    /// returns the synthesized record for the first result.
    async fn search_upstream(&self, key: &str, authorization: Option<&str>) -> Result<String, MetadataError> {
        let parts: Vec<&str> = key.split('|').collect();
        let query = parts.first().copied().unwrap_or_default();
        let year = parts.get(1).copied().unwrap_or_default();
        let kind = parts.get(2).copied().unwrap_or_default();

        let mut params = vec![("query", query), ("include_adult", "false")];
        if !year.is_empty() {
            params.push(("year", year));
        }
        if !kind.is_empty() {
            params.push(("mediaType", kind));
        }

        let url = format!("{}/api/tmdb/search", self.api_host);
        let mut request = self.client.get(&url).query(&params);
        if let Some(auth) = authorization {
            request = request.header(reqwest::header::AUTHORIZATION, auth);
        }
        let response = request.send().await.map_err(|e| MetadataError::Upstream(e.to_string()))?;
        if !response.status().is_success() {
            return Err(MetadataError::Upstream(format!("search returned {}", response.status())));
        }
        let body: SearchResponse = response.json().await.map_err(|e| MetadataError::Upstream(e.to_string()))?;
        let best = body.results.into_iter().next().ok_or_else(|| MetadataError::NoResults(key.to_string()))?;

        let text = |field: &str| best.get(field).and_then(Value::as_str).unwrap_or_default().to_string();
        let id = match best.get("id") {
            Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
            Some(Value::String(s)) => s.parse().unwrap_or(0),
            _ => 0,
        };
        let title = Some(text("title")).filter(|t| !t.is_empty()).unwrap_or_else(|| text("name"));
        let release_date =
            Some(text("release_date")).filter(|d| !d.is_empty()).unwrap_or_else(|| text("first_air_date"));
        let media_type = Some(text("media_type")).filter(|m| !m.is_empty()).unwrap_or_else(|| {
            let last = parts.last().copied().unwrap_or_default().to_lowercase();
            if last == "tv" { "tv".to_string() } else { "movie".to_string() }
        });
        let poster_path = text("poster_path");

        let record = SynthesizedRecord {
            id,
            title: &title,
            poster_path: &poster_path,
            release_date: &release_date,
            media_type: &media_type,
        };
        serde_json::to_string(&record).map_err(|e| MetadataError::Upstream(e.to_string()))
    }
}
