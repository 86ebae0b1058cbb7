//! Pinecone 兼容的向量索引（数据面 REST API）
//!
//! - POST {host}/query          {vector, topK, includeMetadata}
//! - POST {host}/vectors/upsert {vectors: [...]}
//! - GET  {host}/vectors/fetch?ids=..&ids=..

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{RetrievalError, RetrievalMatch, SemanticRetriever, VectorRecord};

/// fetch 单次携带的 id 上限
const FETCH_BATCH: usize = 100;

pub struct PineconeRetriever {
    client: Client,
    host: String,
    api_key: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<RetrievalMatch>,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [VectorRecord],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: Option<usize>,
}

#[derive(Deserialize)]
struct FetchResponse {
    #[serde(default)]
    vectors: HashMap<String, serde_json::Value>,
}

/// host 缺少协议时补 https://，去掉末尾斜杠
fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

impl PineconeRetriever {
    pub fn new(host: &str, api_key: &str, timeout: Duration) -> Result<Self, RetrievalError> {
        if host.trim().is_empty() {
            return Err(RetrievalError::NotConfigured("empty index host".to_string()));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            host: normalize_host(host),
            api_key: api_key.to_string(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, RetrievalError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(RetrievalError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl SemanticRetriever for PineconeRetriever {
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<RetrievalMatch>, RetrievalError> {
        let req = QueryRequest {
            vector,
            top_k,
            include_metadata: true,
        };
        let resp = self
            .client
            .post(format!("{}/query", self.host))
            .header("Api-Key", &self.api_key)
            .json(&req)
            .send()
            .await?;
        let body: QueryResponse = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| RetrievalError::InvalidResponse(e.to_string()))?;
        tracing::debug!(matches = body.matches.len(), "pinecone query");
        Ok(body.matches)
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<usize, RetrievalError> {
        if records.is_empty() {
            return Ok(0);
        }
        let resp = self
            .client
            .post(format!("{}/vectors/upsert", self.host))
            .header("Api-Key", &self.api_key)
            .json(&UpsertRequest { vectors: &records })
            .send()
            .await?;
        let body: UpsertResponse = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| RetrievalError::InvalidResponse(e.to_string()))?;
        Ok(body.upserted_count.unwrap_or(records.len()))
    }

    async fn existing_ids(&self, ids: &[String]) -> Result<Vec<String>, RetrievalError> {
        let mut existing = Vec::new();
        for batch in ids.chunks(FETCH_BATCH) {
            let params: Vec<(&str, &str)> = batch.iter().map(|id| ("ids", id.as_str())).collect();
            let resp = self
                .client
                .get(format!("{}/vectors/fetch", self.host))
                .header("Api-Key", &self.api_key)
                .query(&params)
                .send()
                .await?;
            let body: FetchResponse = Self::check(resp)
                .await?
                .json()
                .await
                .map_err(|e| RetrievalError::InvalidResponse(e.to_string()))?;
            existing.extend(batch.iter().filter(|id| body.vectors.contains_key(*id)).cloned());
        }
        Ok(existing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("idx-abc.svc.pinecone.io/"), "https://idx-abc.svc.pinecone.io");
        assert_eq!(normalize_host("http://localhost:5080"), "http://localhost:5080");
    }

    #[test]
    fn test_query_request_shape() {
        let v = [0.5f32, 0.25];
        let body = serde_json::to_value(QueryRequest {
            vector: &v,
            top_k: 1,
            include_metadata: true,
        })
        .unwrap();
        assert_eq!(body["topK"], 1);
        assert_eq!(body["includeMetadata"], true);
        assert_eq!(body["vector"][1], 0.25);
    }

    #[test]
    fn test_query_response_parses_matches() {
        let body: QueryResponse = serde_json::from_str(
            r#"{"matches":[{"id":"hanif.txt","score":0.91,"metadata":{"source":"hanif.txt","text":"Hanif Enterprise ..."}}],"namespace":""}"#,
        )
        .unwrap();
        assert_eq!(body.matches.len(), 1);
        assert_eq!(body.matches[0].text(), "Hanif Enterprise ...");

        let empty: QueryResponse = serde_json::from_str(r#"{"namespace":""}"#).unwrap();
        assert!(empty.matches.is_empty());
    }

    #[test]
    fn test_empty_host_rejected() {
        assert!(PineconeRetriever::new("  ", "key", Duration::from_secs(1)).is_err());
    }
}
