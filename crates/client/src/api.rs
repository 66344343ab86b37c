//! The slice of the task API the delivery subsystem talks to

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use ricloud_config::Settings;
use ricloud_core::{Error, Result, RetrievalProtocol, StreamEndpoint};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Account information served by the API
#[derive(Debug, Clone, Deserialize)]
pub struct AccountInfo {
    pub stream_endpoints: Vec<StreamEndpoint>,
    #[serde(default)]
    pub task_submission_endpoint: Option<StreamEndpoint>,
    #[serde(default)]
    pub retrieval_protocol: Option<String>,
    #[serde(default)]
    pub services: Vec<Value>,
}

impl AccountInfo {
    #[must_use]
    pub fn protocol(&self) -> RetrievalProtocol {
        RetrievalProtocol::from_announced(self.retrieval_protocol.as_deref())
    }
}

/// A unit of work for the remote API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest {
    pub service: String,
    pub action: String,
    pub account: String,
    /// Action specific fields, sent alongside the three above
    pub payload: BTreeMap<String, String>,
}

impl TaskRequest {
    #[must_use]
    pub fn new(service: impl Into<String>, action: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            action: action.into(),
            account: account.into(),
            payload: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.payload.insert(name.into(), value.into());
        self
    }

    fn form(&self) -> Vec<(String, String)> {
        let mut form = vec![
            ("service".to_string(), self.service.clone()),
            ("action".to_string(), self.action.clone()),
            ("account".to_string(), self.account.clone()),
        ];
        form.extend(self.payload.iter().map(|(k, v)| (k.clone(), v.clone())));
        form
    }
}

/// Remote task API used by the session, the handlers and the poller
#[async_trait]
pub trait TaskApi: Send + Sync {
    /// Stream endpoints, submission endpoint and retrieval protocol
    async fn account_info(&self) -> Result<AccountInfo>;

    /// Submit a task and return its id
    async fn submit(&self, request: &TaskRequest) -> Result<String>;

    /// Raw status entries keyed by task id
    async fn task_status(&self, task_ids: &[String]) -> Result<HashMap<String, Value>>;

    /// Report a result as consumed so the API stops offering it
    async fn result_consumed(&self, task_id: &str) -> Result<()>;

    /// Download a result parked in the object store
    async fn fetch_result(&self, url: &str) -> Result<Bytes>;
}

/// [`TaskApi`] over HTTP with form-encoded POSTs
pub struct HttpTaskApi {
    client: reqwest::Client,
    token: String,
    account_info_url: String,
    task_status_url: String,
    result_consumed_url: String,
    submission_url: RwLock<Option<String>>,
}

impl HttpTaskApi {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| Error::configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            token: settings.token.clone(),
            account_info_url: settings.account_information_url(),
            task_status_url: settings.task_status_url(),
            result_consumed_url: settings.result_consumed_url(),
            submission_url: RwLock::new(None),
        })
    }

    fn authorization(&self) -> String {
        format!("Token {}", self.token)
    }

    async fn post_form(&self, url: &str, form: &[(String, String)]) -> Result<Map<String, Value>> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .form(form)
            .send()
            .await
            .map_err(|e| Error::network(url, e.to_string()))?;

        let data = parse_response(url, response).await?;
        if data.get("success").and_then(Value::as_bool) != Some(true) {
            let message = data
                .get("error")
                .map_or_else(|| "request was not successful".to_string(), Value::to_string);
            return Err(Error::api(url, 200, message));
        }
        Ok(data)
    }
}

async fn parse_response(url: &str, response: reqwest::Response) -> Result<Map<String, Value>> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| Error::network(url, e.to_string()))?;

    if !status.is_success() {
        return Err(Error::api(url, status.as_u16(), text));
    }
    match serde_json::from_str(&text)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::api(
            url,
            status.as_u16(),
            format!("expected a JSON object, got {other}"),
        )),
    }
}

#[async_trait]
impl TaskApi for HttpTaskApi {
    async fn account_info(&self) -> Result<AccountInfo> {
        let url = &self.account_info_url;
        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .send()
            .await
            .map_err(|e| Error::network(url, e.to_string()))?;

        let data = parse_response(url, response).await?;
        let info: AccountInfo = serde_json::from_value(Value::Object(data))?;

        if let Some(endpoint) = &info.task_submission_endpoint {
            *self.submission_url.write() = Some(endpoint.url());
        }
        tracing::debug!(
            stream_endpoints = info.stream_endpoints.len(),
            retrieval_protocol = ?info.retrieval_protocol,
            "account information loaded"
        );
        Ok(info)
    }

    async fn submit(&self, request: &TaskRequest) -> Result<String> {
        let url = self.submission_url.read().clone().ok_or_else(|| {
            Error::configuration("task submission endpoint unknown, fetch account information first")
        })?;

        let data = self.post_form(&url, &request.form()).await?;
        let task_id = match data.get("task_id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(Error::api(&url, 200, "response carries no task_id")),
        };
        tracing::info!(
            task_id = %task_id,
            service = %request.service,
            action = %request.action,
            "task submitted"
        );
        Ok(task_id)
    }

    async fn task_status(&self, task_ids: &[String]) -> Result<HashMap<String, Value>> {
        let form: Vec<(String, String)> = task_ids
            .iter()
            .map(|id| ("task_ids".to_string(), id.clone()))
            .collect();
        let mut data = self.post_form(&self.task_status_url, &form).await?;
        data.remove("success");
        Ok(data.into_iter().collect())
    }

    async fn result_consumed(&self, task_id: &str) -> Result<()> {
        let form = [("task_ids".to_string(), task_id.to_string())];
        self.post_form(&self.result_consumed_url, &form).await?;
        tracing::debug!(task_id = %task_id, "result consumed");
        Ok(())
    }

    async fn fetch_result(&self, url: &str) -> Result<Bytes> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .send()
            .await
            .map_err(|e| Error::network(url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::api(url, status.as_u16(), "result download failed"));
        }
        response
            .bytes()
            .await
            .map_err(|e| Error::network(url, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(server: &MockServer) -> Settings {
        Settings {
            api_host: server.uri(),
            token: "secret".to_string(),
            ..Settings::default()
        }
    }

    async fn mount_account_info(server: &MockServer) {
        let address = server.address();
        Mock::given(method("GET"))
            .and(path("/account/information/"))
            .and(header("Authorization", "Token secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "stream_endpoints": [{"protocol": "http", "host": address.to_string(), "uri": "/stream/"}],
                "task_submission_endpoint": {"protocol": "http", "host": address.to_string(), "uri": "/submit-task/"},
                "retrieval_protocol": "aspush",
                "services": [],
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_account_info_then_submit() {
        let server = MockServer::start().await;
        mount_account_info(&server).await;
        Mock::given(method("POST"))
            .and(path("/submit-task/"))
            .and(body_string_contains("service=icloud"))
            .and(body_string_contains("since=2024"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"success": true, "task_id": "T1"})),
            )
            .mount(&server)
            .await;

        let api = HttpTaskApi::new(&settings(&server)).unwrap();
        let request = TaskRequest::new("icloud", "fetch-data", "1").with_field("since", "2024");

        // Submission needs the endpoint from account information
        assert!(matches!(
            api.submit(&request).await,
            Err(Error::Configuration { .. })
        ));

        let info = api.account_info().await.unwrap();
        assert_eq!(info.protocol(), RetrievalProtocol::Push);
        assert_eq!(info.stream_endpoints.len(), 1);
        assert_eq!(api.submit(&request).await.unwrap(), "T1");
    }

    #[tokio::test]
    async fn test_unsuccessful_post_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/task/result-consumed/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"success": false, "error": "unknown task"})),
            )
            .mount(&server)
            .await;

        let api = HttpTaskApi::new(&settings(&server)).unwrap();
        let err = api.result_consumed("T1").await.unwrap_err();

        assert!(matches!(err, Error::Api { ref message, .. } if message.contains("unknown task")));
    }

    #[tokio::test]
    async fn test_task_status_drops_success_flag() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/task/status/"))
            .and(body_string_contains("task_ids=a"))
            .and(body_string_contains("task_ids=b"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "a": {"status": "completed", "result_retrieved": false, "retrieval_endpoint": "x"},
                "b": {"status": "pending", "result_retrieved": false},
            })))
            .mount(&server)
            .await;

        let api = HttpTaskApi::new(&settings(&server)).unwrap();
        let status = api
            .task_status(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        assert_eq!(status.len(), 2);
        assert_eq!(status["b"]["status"], "pending");
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/account/information/"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .mount(&server)
            .await;

        let api = HttpTaskApi::new(&settings(&server)).unwrap();
        let err = api.account_info().await.unwrap_err();

        assert!(matches!(err, Error::Api { status: 401, .. }));
    }
}
