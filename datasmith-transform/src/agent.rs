// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Remote agent adapter.
//!
//! Invokes `POST {base_url}/agents/{agent_id}/invoke` with `{"input": item}`
//! and reads `{"output": ...}` back. Each call carries its own deadline.

use crate::error::TransformError;
use crate::transformer::{normalize_output, Item, Transformer};
use datasmith_core::AgentConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct InvokeRequest<'a> {
    input: &'a Item,
}

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    output: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Connection settings for the agent service
#[derive(Debug, Clone)]
pub struct AgentEndpoint {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl AgentEndpoint {
    pub fn from_config(config: &AgentConfig) -> Result<Self, TransformError> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| TransformError::NotConfigured("agent.base_url".into()))?;
        Ok(Self {
            base_url,
            api_key: config.api_key.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

pub struct AgentTransformer {
    agent_id: String,
    url: String,
    endpoint: AgentEndpoint,
    client: reqwest::blocking::Client,
}

impl AgentTransformer {
    pub fn new(agent_id: impl Into<String>, endpoint: AgentEndpoint) -> Result<Self, TransformError> {
        let agent_id = agent_id.into();
        let client = reqwest::blocking::Client::builder()
            .timeout(endpoint.timeout)
            .build()
            .map_err(|e| TransformError::Agent(format!("client setup failed: {}", e)))?;
        let url = format!(
            "{}/agents/{}/invoke",
            endpoint.base_url.trim_end_matches('/'),
            agent_id
        );
        Ok(Self {
            agent_id,
            url,
            endpoint,
            client,
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn invoke(&self, item: &Item) -> Result<serde_json::Value, TransformError> {
        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&InvokeRequest { input: item });
        if let Some(key) = &self.endpoint.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().map_err(|e| self.classify(e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(TransformError::Agent(format!("{}: {}", status, body)));
        }

        let body: InvokeResponse = response
            .json()
            .map_err(|e| TransformError::InvalidResponse(e.to_string()))?;
        if let Some(error) = body.error {
            return Err(TransformError::Agent(error));
        }
        body.output
            .ok_or_else(|| TransformError::InvalidResponse("missing output".into()))
    }

    fn classify(&self, e: reqwest::Error) -> TransformError {
        if e.is_timeout() {
            TransformError::Timeout(self.endpoint.timeout)
        } else {
            TransformError::Agent(e.to_string())
        }
    }
}

impl Transformer for AgentTransformer {
    fn name(&self) -> &str {
        &self.agent_id
    }

    fn apply(&self, item: &Item) -> Result<Vec<Item>, TransformError> {
        self.invoke(item).map(normalize_output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    /// Serve one canned HTTP response on a local port
    fn serve_once(status: &'static str, body: &'static str, delay: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf);
                std::thread::sleep(delay);
                let reply = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(reply.as_bytes());
            }
        });
        format!("http://{}", addr)
    }

    fn endpoint(base_url: String, timeout: Duration) -> AgentEndpoint {
        AgentEndpoint {
            base_url,
            api_key: Some("k".into()),
            timeout,
        }
    }

    #[test]
    fn test_invoke_returns_output() {
        let url = serve_once("200 OK", r#"{"output": [{"q": "a"}, {"q": "b"}]}"#, Duration::ZERO);
        let agent = AgentTransformer::new("rewriter", endpoint(url, Duration::from_secs(5))).unwrap();
        let out = agent.apply(&json!({"q": "x"})).unwrap();
        assert_eq!(out, vec![json!({"q": "a"}), json!({"q": "b"})]);
    }

    #[test]
    fn test_error_status_is_failure() {
        let url = serve_once("500 Internal Server Error", r#"{"error": "boom"}"#, Duration::ZERO);
        let agent = AgentTransformer::new("a", endpoint(url, Duration::from_secs(5))).unwrap();
        assert!(matches!(agent.apply(&json!({})), Err(TransformError::Agent(_))));
    }

    #[test]
    fn test_deadline_exceeded() {
        let url = serve_once("200 OK", r#"{"output": 1}"#, Duration::from_millis(800));
        let agent = AgentTransformer::new("slow", endpoint(url, Duration::from_millis(100))).unwrap();
        assert!(matches!(agent.apply(&json!({})), Err(TransformError::Timeout(_))));
    }

    #[test]
    fn test_url_and_config() {
        let config = AgentConfig {
            base_url: Some("http://agents.local/".into()),
            api_key: None,
            timeout_secs: 3,
        };
        let agent = AgentTransformer::new("x1", AgentEndpoint::from_config(&config).unwrap()).unwrap();
        assert_eq!(agent.url(), "http://agents.local/agents/x1/invoke");

        let missing = AgentConfig::default();
        assert!(AgentEndpoint::from_config(&missing).is_err());
    }
}
