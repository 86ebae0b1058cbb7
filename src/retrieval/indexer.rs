//! 供应商文档入库：读取目录下的 *.txt，只为索引中尚不存在的文件生成嵌入并写入

use std::path::Path;

use crate::llm::{EmbeddingProvider, LlmError};

use super::{RetrievalError, SemanticRetriever, VectorRecord};

/// 一份待索引文档；id 为文件名
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexReport {
    pub total: usize,
    pub skipped: usize,
    pub uploaded: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("failed to read documents: {0}")]
    Io(#[from] std::io::Error),
    #[error("embedding failed for {id}: {source}")]
    Embedding {
        id: String,
        #[source]
        source: LlmError,
    },
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
}

/// 读取目录中的 .txt 文件（不递归），按文件名排序
pub fn load_documents(dir: impl AsRef<Path>) -> Result<Vec<Document>, std::io::Error> {
    let mut docs = Vec::new();
    for entry in std::fs::read_dir(dir.as_ref())? {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }
        let Some(id) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
            continue;
        };
        let text = std::fs::read_to_string(&path)?;
        docs.push(Document { id, text });
    }
    docs.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(docs)
}

/// 嵌入并写入索引中缺失的文档；已存在的 id 跳过
pub async fn index_documents(
    docs: Vec<Document>,
    embedder: &dyn EmbeddingProvider,
    retriever: &dyn SemanticRetriever,
) -> Result<IndexReport, IndexError> {
    let ids: Vec<String> = docs.iter().map(|d| d.id.clone()).collect();
    let existing = retriever.existing_ids(&ids).await?;

    let mut report = IndexReport {
        total: docs.len(),
        skipped: existing.len(),
        uploaded: 0,
    };

    let to_upload: Vec<Document> = docs.into_iter().filter(|d| !existing.contains(&d.id)).collect();
    if to_upload.is_empty() {
        tracing::info!("Embeddings already exist, nothing to upload");
        return Ok(report);
    }
    tracing::info!("{} new documents found, uploading", to_upload.len());

    let mut records = Vec::with_capacity(to_upload.len());
    for doc in to_upload {
        let values = embedder
            .embed(&doc.text)
            .await
            .map_err(|source| IndexError::Embedding {
                id: doc.id.clone(),
                source,
            })?;
        let mut metadata = serde_json::Map::new();
        metadata.insert("source".into(), doc.id.clone().into());
        metadata.insert("text".into(), doc.text.into());
        records.push(VectorRecord {
            id: doc.id,
            values,
            metadata,
        });
    }

    report.uploaded = retriever.upsert(records).await?;
    Ok(report)
}

/// 启动时补齐索引；目录不可读或入库失败只记录警告，不中断启动
pub async fn seed_documents(
    dir: impl AsRef<Path>,
    embedder: &dyn EmbeddingProvider,
    retriever: &dyn SemanticRetriever,
) -> Option<IndexReport> {
    let dir = dir.as_ref();
    let docs = match load_documents(dir) {
        Ok(docs) => docs,
        Err(e) => {
            tracing::warn!("Error reading provider documents {:?}: {}", dir, e);
            return None;
        }
    };

    match index_documents(docs, embedder, retriever).await {
        Ok(report) => {
            tracing::info!(
                total = report.total,
                skipped = report.skipped,
                uploaded = report.uploaded,
                "Provider documents indexed from {:?}",
                dir
            );
            Some(report)
        }
        Err(e) => {
            tracing::warn!("Failed to index provider documents: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockEmbedder;
    use crate::retrieval::InMemoryRetriever;

    #[test]
    fn test_load_documents_only_txt() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("shyamoli.txt"), "Shyamoli Paribahan").unwrap();
        std::fs::write(dir.path().join("hanif.txt"), "Hanif Enterprise").unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let docs = load_documents(dir.path()).unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["hanif.txt", "shyamoli.txt"]);
    }

    #[tokio::test]
    async fn test_index_skips_existing() {
        let embedder = MockEmbedder::default();
        let retriever = InMemoryRetriever::new();
        let docs = vec![
            Document { id: "hanif.txt".into(), text: "Hanif Enterprise runs AC buses".into() },
            Document { id: "ena.txt".into(), text: "Ena Transport covers Sylhet".into() },
        ];

        let first = index_documents(docs.clone(), &embedder, &retriever).await.unwrap();
        assert_eq!(first, IndexReport { total: 2, skipped: 0, uploaded: 2 });

        let second = index_documents(docs, &embedder, &retriever).await.unwrap();
        assert_eq!(second, IndexReport { total: 2, skipped: 2, uploaded: 0 });

        let q = embedder.embed("Hanif Enterprise").await.unwrap();
        let hits = retriever.query(&q, 1).await.unwrap();
        assert_eq!(hits[0].id, "hanif.txt");
        assert_eq!(hits[0].metadata["source"], "hanif.txt");
    }

    #[tokio::test]
    async fn test_seed_documents_is_repeatable() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("hanif.txt"), "Hanif Enterprise runs AC buses").unwrap();
        let embedder = MockEmbedder::default();
        let retriever = InMemoryRetriever::new();

        let first = seed_documents(dir.path(), &embedder, &retriever).await;
        assert_eq!(first, Some(IndexReport { total: 1, skipped: 0, uploaded: 1 }));
        let second = seed_documents(dir.path(), &embedder, &retriever).await;
        assert_eq!(second, Some(IndexReport { total: 1, skipped: 1, uploaded: 0 }));
        assert_eq!(retriever.len().await, 1);
    }

    #[tokio::test]
    async fn test_seed_documents_missing_dir_is_not_fatal() {
        let dir = tempfile::TempDir::new().unwrap();
        let embedder = MockEmbedder::default();
        let retriever = InMemoryRetriever::new();
        assert_eq!(seed_documents(dir.path().join("nope"), &embedder, &retriever).await, None);
        assert!(retriever.is_empty().await);
    }
}
