use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// What a searchable entry was built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Transcript,
    Frame,
    Chapter,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Transcript => "transcript",
            EntryKind::Frame => "frame",
            EntryKind::Chapter => "chapter",
        }
    }
}

/// One searchable span of a video
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub kind: EntryKind,
    pub text: String,
    pub start_secs: f64,
    pub end_secs: f64,

    /// Embedding vector; absent when the embedding call was skipped
    #[serde(default)]
    pub vector: Option<Vec<f32>>,
}

impl IndexEntry {
    pub fn new(
        video_id: &str,
        kind: EntryKind,
        text: String,
        start_secs: f64,
        end_secs: f64,
    ) -> Self {
        let digest = md5::compute(format!("{}:{}:{:.3}", video_id, kind.as_str(), start_secs));
        Self {
            id: format!("{:x}", digest),
            kind,
            text,
            start_secs,
            end_secs,
            vector: None,
        }
    }
}

/// An entry with its relevance to a query
#[derive(Debug, Clone, Serialize)]
pub struct ScoredEntry {
    pub entry: IndexEntry,
    pub score: f32,
}

/// Per-video retrieval index, persisted as index.json beside the video's
/// other artifacts and cached in memory after first load
#[derive(Debug)]
pub struct SearchIndex {
    base_dir: PathBuf,
    cache: RwLock<HashMap<String, Arc<Vec<IndexEntry>>>>,
}

impl SearchIndex {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn index_path(&self, video_id: &str) -> PathBuf {
        self.base_dir.join(video_id).join("index.json")
    }

    /// Replace a video's index and persist it
    pub async fn put(&self, video_id: &str, entries: Vec<IndexEntry>) -> Result<()> {
        let path = self.index_path(video_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string(&entries)?;
        fs::write(&path, json).await?;

        info!("💾 Indexed {} entries for video {}", entries.len(), video_id);
        self.cache
            .write()
            .await
            .insert(video_id.to_string(), Arc::new(entries));
        Ok(())
    }

    /// Entries for a video, loading from disk on first use
    pub async fn get(&self, video_id: &str) -> Result<Arc<Vec<IndexEntry>>> {
        if let Some(entries) = self.cache.read().await.get(video_id) {
            return Ok(Arc::clone(entries));
        }

        let path = self.index_path(video_id);
        let entries: Vec<IndexEntry> = match fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(_) => Vec::new(),
        };
        debug!("📁 Loaded {} index entries for {}", entries.len(), video_id);

        let entries = Arc::new(entries);
        self.cache
            .write()
            .await
            .insert(video_id.to_string(), Arc::clone(&entries));
        Ok(entries)
    }

    /// Drop a video's cached entries, after its directory is removed
    pub async fn evict(&self, video_id: &str) {
        self.cache.write().await.remove(video_id);
    }

    /// Rank a video's entries against a query. Uses cosine similarity
    /// when a query vector is available, keyword overlap otherwise.
    pub async fn query(
        &self,
        video_id: &str,
        query_text: &str,
        query_vector: Option<&[f32]>,
        kind_filter: Option<EntryKind>,
        top_k: usize,
    ) -> Result<Vec<ScoredEntry>> {
        let entries = self.get(video_id).await?;

        let mut scored: Vec<ScoredEntry> = entries
            .iter()
            .filter(|e| kind_filter.map_or(true, |k| e.kind == k))
            .map(|entry| {
                let score = match (query_vector, entry.vector.as_deref()) {
                    (Some(query), Some(vector)) => cosine_similarity(query, vector),
                    _ => keyword_score(&entry.text, query_text),
                };
                ScoredEntry {
                    entry: entry.clone(),
                    score,
                }
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }
}

/// Cosine similarity with a zero-norm guard
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Fraction of query terms that appear in the text
pub fn keyword_score(text: &str, query: &str) -> f32 {
    let haystack = text.to_lowercase();
    let terms: Vec<&str> = query
        .split_whitespace()
        .filter(|t| t.len() > 2)
        .collect();
    if terms.is_empty() {
        return 0.0;
    }
    let hits = terms
        .iter()
        .filter(|t| haystack.contains(&t.to_lowercase()))
        .count();
    hits as f32 / terms.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_entry_ids_are_stable_and_distinct() {
        let a = IndexEntry::new("vid1", EntryKind::Transcript, "text".to_string(), 0.0, 30.0);
        let b = IndexEntry::new("vid1", EntryKind::Transcript, "text".to_string(), 0.0, 30.0);
        let c = IndexEntry::new("vid1", EntryKind::Frame, "text".to_string(), 0.0, 30.0);

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_keyword_score() {
        let text = "The speaker explains gradient descent on a whiteboard";
        assert!(keyword_score(text, "gradient descent") > 0.9);
        assert!((keyword_score(text, "gradient ascent") - 0.5).abs() < 1e-6);
        assert_eq!(keyword_score(text, "quantum chemistry"), 0.0);
        // Short stop-words are ignored
        assert_eq!(keyword_score(text, "on a"), 0.0);
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let temp = TempDir::new().unwrap();
        let index = SearchIndex::new(temp.path().to_path_buf());

        let entries = vec![IndexEntry::new(
            "vid1",
            EntryKind::Transcript,
            "hello world".to_string(),
            0.0,
            30.0,
        )];
        index.put("vid1", entries).await.unwrap();
        assert!(temp.path().join("vid1/index.json").exists());

        // A fresh instance reads back from disk
        let fresh = SearchIndex::new(temp.path().to_path_buf());
        let loaded = fresh.get("vid1").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].text, "hello world");
    }

    #[tokio::test]
    async fn test_query_ranks_by_vector_when_present() {
        let temp = TempDir::new().unwrap();
        let index = SearchIndex::new(temp.path().to_path_buf());

        let mut near = IndexEntry::new("v", EntryKind::Transcript, "near".to_string(), 0.0, 30.0);
        near.vector = Some(vec![1.0, 0.0]);
        let mut far = IndexEntry::new("v", EntryKind::Transcript, "far".to_string(), 30.0, 60.0);
        far.vector = Some(vec![0.0, 1.0]);
        index.put("v", vec![far, near]).await.unwrap();

        let hits = index
            .query("v", "ignored", Some(&[1.0, 0.0]), None, 10)
            .await
            .unwrap();
        assert_eq!(hits[0].entry.text, "near");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_query_falls_back_to_keywords_and_filters_kind() {
        let temp = TempDir::new().unwrap();
        let index = SearchIndex::new(temp.path().to_path_buf());

        let entries = vec![
            IndexEntry::new(
                "v",
                EntryKind::Transcript,
                "talking about rust lifetimes".to_string(),
                0.0,
                30.0,
            ),
            IndexEntry::new(
                "v",
                EntryKind::Frame,
                "whiteboard with rust code".to_string(),
                15.0,
                15.0,
            ),
        ];
        index.put("v", entries).await.unwrap();

        let hits = index
            .query("v", "rust code", None, Some(EntryKind::Frame), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry.kind, EntryKind::Frame);
        assert!(hits[0].score > 0.9);

        let missing = index.query("absent", "rust", None, None, 10).await.unwrap();
        assert!(missing.is_empty());
    }
}
