//! 进程内向量索引：余弦相似度线性扫描

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{RetrievalError, RetrievalMatch, SemanticRetriever, VectorRecord};

#[derive(Default)]
pub struct InMemoryRetriever {
    entries: RwLock<Vec<VectorRecord>>,
}

impl InMemoryRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl SemanticRetriever for InMemoryRetriever {
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<RetrievalMatch>, RetrievalError> {
        let entries = self.entries.read().await;
        let mut scored: Vec<(f32, &VectorRecord)> = entries
            .iter()
            .map(|r| (cosine_similarity(vector, &r.values), r))
            .filter(|(score, _)| *score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, r)| RetrievalMatch {
                id: r.id.clone(),
                score,
                metadata: r.metadata.clone(),
            })
            .collect())
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<usize, RetrievalError> {
        let mut entries = self.entries.write().await;
        let n = records.len();
        for record in records {
            match entries.iter_mut().find(|e| e.id == record.id) {
                Some(existing) => *existing = record,
                None => entries.push(record),
            }
        }
        Ok(n)
    }

    async fn existing_ids(&self, ids: &[String]) -> Result<Vec<String>, RetrievalError> {
        let entries = self.entries.read().await;
        Ok(ids
            .iter()
            .filter(|id| entries.iter().any(|e| &e.id == *id))
            .cloned()
            .collect())
    }
}
