//! HTTP client wrapper for interacting with Qdrant.

use crate::qdrant::types::{
    CountResponse, QdrantError, QdrantSettings, QueryResponse, QueryResponseResult, ScoredPoint,
    ScrollResponse,
};
use reqwest::{Client, Method, StatusCode};
use serde_json::{Map, Value, json};

/// Lightweight HTTP client bound to one Qdrant collection.
pub struct QdrantService {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) collection: String,
}

impl QdrantService {
    /// Construct a new client from explicit settings.
    pub fn new(settings: QdrantSettings) -> Result<Self, QdrantError> {
        let client = Client::builder()
            .user_agent("policy-qa/0.1")
            .timeout(settings.timeout)
            .build()?;

        let base_url = normalize_base_url(&settings.url).map_err(QdrantError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            collection = %settings.collection,
            has_api_key = %settings
                .api_key
                .as_deref()
                .map(|value| !value.is_empty())
                .unwrap_or(false),
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key: settings.api_key,
            collection: settings.collection,
        })
    }

    /// Name of the collection this client targets.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Create the collection with Euclidean distance when it does not exist yet.
    pub async fn ensure_collection(&self, vector_size: u64) -> Result<(), QdrantError> {
        if self.collection_exists().await? {
            return Ok(());
        }

        tracing::debug!(
            collection = %self.collection,
            vector_size,
            "Creating collection"
        );
        let body = json!({
            "vectors": {
                "size": vector_size,
                "distance": "Euclid"
            }
        });
        let response = self
            .request(Method::PUT, &format!("collections/{}", self.collection))?
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!("Collection created");
        })
        .await
    }

    /// Ensure a keyword payload index exists for `field`.
    pub async fn ensure_keyword_index(&self, field: &str) -> Result<(), QdrantError> {
        let body = json!({
            "field_name": field,
            "field_schema": "keyword",
        });

        let response = self
            .request(Method::PUT, &format!("collections/{}/index", self.collection))?
            .json(&body)
            .send()
            .await?;

        if response.status().is_success() || response.status() == StatusCode::CONFLICT {
            tracing::debug!(collection = %self.collection, field, "Payload index ensured");
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(collection = %self.collection, field, error = %error, "Failed to ensure payload index");
            Err(error)
        }
    }

    /// Exact number of points stored in the collection.
    pub async fn count_points(&self) -> Result<u64, QdrantError> {
        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/count", self.collection),
            )?
            .json(&json!({ "exact": true }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(collection = %self.collection, error = %error, "Qdrant count failed");
            return Err(error);
        }

        let payload: CountResponse = response.json().await?;
        Ok(payload.result.count)
    }

    /// Upload prepared points in a single request, waiting until they are applied.
    pub async fn upsert_points(&self, points: Vec<Value>) -> Result<(), QdrantError> {
        if points.is_empty() {
            return Ok(());
        }

        let point_count = points.len();
        let response = self
            .request(
                Method::PUT,
                &format!("collections/{}/points", self.collection),
            )?
            .query(&[("wait", true)])
            .json(&json!({ "points": points }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(points = point_count, "Points indexed");
        })
        .await
    }

    /// Perform a similarity search, returning scored payloads.
    pub async fn query_points(
        &self,
        vector: &[f32],
        filter: Option<Value>,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, QdrantError> {
        let mut body = Map::new();
        body.insert("query".into(), json!(vector));
        body.insert("limit".into(), Value::from(limit));
        body.insert("with_payload".into(), Value::Bool(true));
        if let Some(filter_value) = filter {
            body.insert("filter".into(), filter_value);
        }

        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/query", self.collection),
            )?
            .json(&Value::Object(body))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(collection = %self.collection, error = %error, "Qdrant search failed");
            return Err(error);
        }

        let payload: QueryResponse = response.json().await?;
        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        };
        Ok(points
            .into_iter()
            .map(|point| ScoredPoint {
                id: stringify_point_id(point.id),
                score: point.score,
                payload: point.payload,
            })
            .collect())
    }

    /// Scroll every payload matching `filter`.
    pub async fn scroll_payloads(
        &self,
        filter: Value,
    ) -> Result<Vec<Map<String, Value>>, QdrantError> {
        let mut offset: Option<Value> = None;
        let mut payloads = Vec::new();

        loop {
            let mut body = Map::new();
            body.insert("with_payload".into(), Value::Bool(true));
            body.insert("with_vector".into(), Value::Bool(false));
            body.insert("limit".into(), Value::from(512));
            body.insert("filter".into(), filter.clone());
            if let Some(next) = offset.take() {
                body.insert("offset".into(), next);
            }

            let response = self
                .request(
                    Method::POST,
                    &format!("collections/{}/points/scroll", self.collection),
                )?
                .json(&Value::Object(body))
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::error!(collection = %self.collection, error = %error, "Failed to scroll payloads");
                return Err(error);
            }

            let ScrollResponse { result } = response.json().await?;
            payloads.extend(result.points.into_iter().filter_map(|point| point.payload));

            match result.next_page_offset {
                Some(next) if !next.is_null() => offset = Some(next),
                _ => break,
            }
        }

        Ok(payloads)
    }

    async fn collection_exists(&self) -> Result<bool, QdrantError> {
        let response = self
            .request(Method::GET, &format!("collections/{}", self.collection))?
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::error!(collection = %self.collection, error = %error, "Collection existence check failed");
                Err(error)
            }
        }
    }

    fn request(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder, QdrantError> {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        Ok(req)
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), QdrantError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(collection = %self.collection, error = %error, "Qdrant request failed");
            Err(error)
        }
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

fn stringify_point_id(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};
    use std::time::Duration;

    fn service(server: &MockServer) -> QdrantService {
        QdrantService::new(QdrantSettings {
            url: server.base_url(),
            collection: "demo".into(),
            api_key: Some("secret".into()),
            timeout: Duration::from_secs(5),
        })
        .expect("client")
    }

    #[tokio::test]
    async fn query_points_sends_filter_and_api_key() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/demo/points/query")
                    .header("api-key", "secret")
                    .body_contains("\"document_id\"");
                then.status(200).json_body(json!({
                    "status": "ok",
                    "time": 0.0,
                    "result": {
                        "points": [
                            { "id": 4, "score": 0.25, "payload": { "text": "Example" } }
                        ]
                    }
                }));
            })
            .await;

        let hits = service(&server)
            .query_points(&[0.1, 0.2], Some(crate::qdrant::document_filter("doc")), 3)
            .await
            .expect("query");

        mock.assert_async().await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "4");
        assert!((hits[0].score - 0.25).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn scroll_follows_next_page_offset() {
        let server = MockServer::start_async().await;
        let second = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/demo/points/scroll")
                    .body_contains("\"offset\"");
                then.status(200).json_body(json!({
                    "result": {
                        "points": [{ "id": 1, "payload": { "text": "b" } }],
                        "next_page_offset": null
                    }
                }));
            })
            .await;
        let first = server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/demo/points/scroll");
                then.status(200).json_body(json!({
                    "result": {
                        "points": [{ "id": 0, "payload": { "text": "a" } }],
                        "next_page_offset": 1
                    }
                }));
            })
            .await;

        let payloads = service(&server)
            .scroll_payloads(crate::qdrant::document_filter("doc"))
            .await
            .expect("scroll");

        first.assert_async().await;
        second.assert_async().await;
        let texts: Vec<_> = payloads.iter().map(|p| p["text"].clone()).collect();
        assert_eq!(texts, vec![json!("a"), json!("b")]);
    }
}
