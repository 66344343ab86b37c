use ricloud_config::Settings;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TOKEN: &str = "test-token";
pub const CHANNEL: &str = "test-channel";

/// Settings pointing every endpoint at the mock server
pub fn settings(server: &MockServer) -> Settings {
    let mut settings = Settings {
        api_host: server.uri(),
        token: TOKEN.to_string(),
        ..Settings::default()
    };
    settings.stream.channel = CHANNEL.to_string();
    settings.object_store.idle_interval = std::time::Duration::from_millis(50);
    settings.object_store.busy_interval = std::time::Duration::from_millis(50);
    settings.watchdog_interval = std::time::Duration::from_millis(100);
    settings
}

/// Account information announcing the mock server as stream and
/// submission host
pub async fn mount_account(server: &MockServer, retrieval_protocol: &str) {
    let host = server.address().to_string();
    Mock::given(method("GET"))
        .and(path("/account/information/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "stream_endpoints": [{"protocol": "http", "host": host, "uri": "/stream/"}],
            "task_submission_endpoint": {"protocol": "http", "host": host, "uri": "/submit-task/"},
            "retrieval_protocol": retrieval_protocol,
            "services": [{"name": "icloud", "actions": [{"name": "fetch-data"}]}],
        })))
        .mount(server)
        .await;
}

pub async fn mount_submit(server: &MockServer, task_id: &str) {
    Mock::given(method("POST"))
        .and(path("/submit-task/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"success": true, "task_id": task_id})),
        )
        .mount(server)
        .await;
}

pub async fn mount_result_consumed(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/task/result-consumed/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"success": true})))
        .mount(server)
        .await;
}
