use roundtable_types::WorkerSettings;
use roundtable_util::http::{WorkerHttpClient, WorkerHttpError, WorkerResponse};
use serde_json::Value;

/// What a step sees of a worker: identity, base URL, and its configuration bag.
#[derive(Debug, Clone)]
pub struct Worker {
    name: String,
    port: u16,
    settings: WorkerSettings,
    client: WorkerHttpClient,
}

impl Worker {
    pub fn new(name: impl Into<String>, port: u16, settings: WorkerSettings) -> Self {
        Self {
            name: name.into(),
            port,
            settings,
            client: WorkerHttpClient::new(format!("http://localhost:{port}")),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `http://localhost:<port>`
    pub fn url(&self) -> &str {
        self.client.base_url()
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Pass-through configuration value.
    pub fn setting(&self, key: &str) -> Option<&Value> {
        self.settings.extra.get(key)
    }

    pub async fn get(&self, path: &str) -> Result<WorkerResponse, WorkerHttpError> {
        self.client.get(path).await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> Result<WorkerResponse, WorkerHttpError> {
        self.client.post_json(path, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn exposes_url_and_settings() {
        let mut settings = WorkerSettings::default();
        settings.extra.insert("repo_owner".into(), json!("octo"));

        let worker = Worker::new("worker1", 5001, settings);
        assert_eq!(worker.url(), "http://localhost:5001");
        assert_eq!(worker.setting("repo_owner"), Some(&json!("octo")));
        assert_eq!(worker.setting("missing"), None);
    }
}
