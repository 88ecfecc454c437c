//! Thin HTTP client over the coordinator's REST surface. Every call here is a single request/response pair,
//! mirroring how the teacher's `mvirt` CLI wraps its generated gRPC
//! client stubs one-call-per-subcommand.

use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, serde::Deserialize)]
struct ApiError {
    error: String,
    #[allow(dead_code)]
    code: u16,
}

pub struct ApiClient {
    http: reqwest::Client,
    base: String,
    api_key: Option<String>,
}

impl ApiClient {
    pub fn new(server: String, api_key: Option<String>) -> Self {
        let base = format!("{}/api/v1", server.trim_end_matches('/'));
        Self { http: reqwest::Client::new(), base, api_key }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, format!("{}{path}", self.base));
        if let Some(key) = &self.api_key {
            builder = builder.header("X-Api-Key", key);
        }
        builder
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        self.send(self.request(reqwest::Method::GET, path)).await
    }

    pub async fn get_query<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> anyhow::Result<T> {
        self.send(self.request(reqwest::Method::GET, path).query(query)).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> anyhow::Result<T> {
        self.send(self.request(reqwest::Method::POST, path).json(body)).await
    }

    pub async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        self.send(self.request(reqwest::Method::POST, path)).await
    }

    /// A `202 Accepted`/`200 OK` with no (or uninteresting) response body
    /// — the `domain-state`/`coordinator-state` request endpoints.
    pub async fn post_status<B: Serialize>(&self, path: &str, body: &B) -> anyhow::Result<()> {
        let response = self.request(reqwest::Method::POST, path).json(body).send().await?;
        if response.status().is_success() {
            return Ok(());
        }
        Err(anyhow::anyhow!(Self::error_message(response).await))
    }

    pub async fn put_empty<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        self.send(self.request(reqwest::Method::PUT, path)).await
    }

    pub async fn delete(&self, path: &str) -> anyhow::Result<()> {
        let response = self.request(reqwest::Method::DELETE, path).send().await?;
        if response.status().is_success() {
            return Ok(());
        }
        Err(anyhow::anyhow!(Self::error_message(response).await))
    }

    /// A `DELETE` that, like `osd.remove`, returns a `TaskAccepted` body
    /// rather than an empty `204`.
    pub async fn delete_with_response<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> anyhow::Result<T> {
        self.send(self.request(reqwest::Method::DELETE, path).query(query)).await
    }

    async fn send<T: DeserializeOwned>(&self, builder: reqwest::RequestBuilder) -> anyhow::Result<T> {
        let response = builder.send().await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(anyhow::anyhow!(Self::error_message(response).await))
        }
    }

    async fn error_message(response: reqwest::Response) -> String {
        let status = response.status();
        match response.json::<ApiError>().await {
            Ok(e) => e.error,
            Err(_) => format!("request failed with status {status}"),
        }
    }
}

/// `osd.add`/`osd.remove`-style `202 Accepted` responses carry the
/// submitted task id so the caller can poll `pvc task get <id>`.
#[derive(Debug, serde::Deserialize, tabled::Tabled)]
pub struct TaskAccepted {
    pub task_id: String,
    pub task_name: String,
    pub run_on: String,
}
