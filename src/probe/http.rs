//! HTTP probe engine.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;

use crate::domain::{HttpConfig, HttpEndpoint};
use crate::error::ProbeError;

use super::condition::{self, EndpointFacts};
use super::jsonpath;
use super::ProbeEngine;

const DEFAULT_USER_AGENT: &str = "Sentinel-Monitor/1.0";

pub fn build_client() -> reqwest::Result<Client> {
    Client::builder().build()
}

pub struct HttpEngine {
    client: Client,
    config: HttpConfig,
}

impl HttpEngine {
    pub fn new(client: Client, config: HttpConfig) -> Self {
        Self { client, config }
    }

    async fn probe_endpoint(&self, ep: &HttpEndpoint, timeout: Duration) -> (String, EndpointFacts) {
        let start = Instant::now();
        let mut req = self
            .client
            .request(ep.method.as_reqwest(), &ep.url)
            .timeout(timeout)
            .header("User-Agent", DEFAULT_USER_AGENT)
            .header("Connection", "close");
        for (k, v) in &ep.headers {
            req = req.header(k, v);
        }
        if !ep.body.is_empty() {
            req = req.body(ep.body.clone());
        }
        if let Some(auth) = &ep.basic_auth {
            req = req.basic_auth(&auth.username, Some(&auth.password));
        }

        let outcome = req.send().await;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        let facts = match outcome {
            Ok(resp) => {
                let status = resp.status();
                if status.as_u16() != ep.expected_status {
                    EndpointFacts {
                        success: false,
                        value: None,
                        error: Some(format!(
                            "expected status {}, got {}",
                            ep.expected_status,
                            status.as_u16()
                        )),
                        response: None,
                        duration_ms,
                    }
                } else {
                    match resp.text().await {
                        Ok(body) => extract_facts(ep, &body, duration_ms),
                        Err(e) => EndpointFacts {
                            success: false,
                            value: None,
                            error: Some(format!("failed to read response body: {e}")),
                            response: None,
                            duration_ms,
                        },
                    }
                }
            }
            Err(e) => EndpointFacts {
                success: false,
                value: None,
                error: Some(classify_reqwest_error(&e)),
                response: None,
                duration_ms,
            },
        };
        (ep.name.clone(), facts)
    }
}

fn extract_facts(ep: &HttpEndpoint, body: &str, duration_ms: f64) -> EndpointFacts {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();

    let Some(path) = &ep.json_path else {
        return EndpointFacts {
            success: true,
            value: None,
            error: None,
            response: parsed,
            duration_ms,
        };
    };

    match &parsed {
        Some(json) => match jsonpath::resolve(json, path) {
            Ok(value) => EndpointFacts {
                success: true,
                value: Some(value.clone()),
                error: None,
                response: parsed.clone(),
                duration_ms,
            },
            Err(e) => EndpointFacts {
                success: false,
                value: None,
                error: Some(format!("jsonpath '{path}': {e}")),
                response: parsed.clone(),
                duration_ms,
            },
        },
        None => EndpointFacts {
            success: false,
            value: None,
            error: Some("response body is not valid JSON".to_string()),
            response: None,
            duration_ms,
        },
    }
}

fn classify_reqwest_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "timeout".to_string()
    } else if e.is_connect() {
        format!("connect failed: {e}")
    } else if e.is_body() || e.is_decode() {
        format!("body error: {e}")
    } else {
        format!("request failed: {e}")
    }
}

fn error_class_for(facts: &EndpointFacts) -> crate::error::ProbeErrorClass {
    use crate::error::ProbeErrorClass;
    match &facts.error {
        Some(msg) if msg.starts_with("timeout") => ProbeErrorClass::Timeout,
        Some(msg) if msg.starts_with("connect failed") => ProbeErrorClass::Dial,
        Some(msg) if msg.starts_with("jsonpath") || msg.contains("not valid JSON") => {
            ProbeErrorClass::Parse
        }
        _ => ProbeErrorClass::Protocol,
    }
}

#[async_trait]
impl ProbeEngine for HttpEngine {
    #[tracing::instrument(skip(self), fields(endpoints = self.config.endpoints.len()))]
    async fn check(&self, timeout: Duration) -> Result<(), ProbeError> {
        let deadline = Instant::now() + timeout;
        let futures = self
            .config
            .endpoints
            .iter()
            .map(|ep| self.probe_endpoint(ep, timeout));
        let outcomes = futures::future::join_all(futures).await;

        let mut results: BTreeMap<String, EndpointFacts> = BTreeMap::new();
        let mut failures = Vec::new();
        for (name, facts) in outcomes {
            if !facts.success {
                let url = self
                    .config
                    .endpoints
                    .iter()
                    .find(|e| e.name == name)
                    .map(|e| e.url.as_str())
                    .unwrap_or("");
                let reason = facts.error.clone().unwrap_or_else(|| "unknown error".to_string());
                failures.push((name.clone(), url.to_string(), reason, error_class_for(&facts)));
            }
            results.insert(name, facts);
        }

        if !failures.is_empty() {
            let class = failures[0].3;
            let message = failures
                .iter()
                .map(|(name, url, reason, _)| format!("{name} ({url}): {reason}"))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ProbeError::new(class, message));
        }

        if Instant::now() > deadline {
            return Err(ProbeError::timeout("service deadline exceeded while probing endpoints"));
        }

        if let Some(expr) = &self.config.condition {
            let anomaly = condition::evaluate(expr, &results)?;
            if anomaly {
                return Err(ProbeError::condition(format!(
                    "condition '{expr}' matched an anomaly"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{HttpMethod, ProtocolConfig};
    use httpmock::Method::GET;
    use httpmock::MockServer;
    use std::collections::HashMap;

    fn endpoint(name: &str, url: String, expected_status: u16, json_path: Option<&str>) -> HttpEndpoint {
        HttpEndpoint {
            name: name.to_string(),
            url,
            method: HttpMethod::Get,
            headers: HashMap::new(),
            body: String::new(),
            expected_status,
            json_path: json_path.map(str::to_string),
            basic_auth: None,
        }
    }

    #[tokio::test]
    async fn single_endpoint_success() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/ok");
                then.status(200).body("ok");
            })
            .await;

        let engine = HttpEngine::new(
            build_client().unwrap(),
            HttpConfig {
                timeout: None,
                condition: None,
                endpoints: vec![endpoint("a", format!("{}/ok", server.base_url()), 200, None)],
            },
        );
        assert!(engine.check(Duration::from_secs(2)).await.is_ok());
    }

    #[tokio::test]
    async fn unexpected_status_is_a_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/err");
                then.status(500);
            })
            .await;

        let engine = HttpEngine::new(
            build_client().unwrap(),
            HttpConfig {
                timeout: None,
                condition: None,
                endpoints: vec![endpoint("a", format!("{}/err", server.base_url()), 200, None)],
            },
        );
        let err = engine.check(Duration::from_secs(2)).await.unwrap_err();
        assert!(err.message.contains("a ("));
    }

    #[tokio::test]
    async fn jsonpath_extraction_and_condition_anomaly() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/a");
                then.status(200).body(r#"{"n": 10}"#);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/b");
                then.status(200).body(r#"{"n": 25}"#);
            })
            .await;

        let engine = HttpEngine::new(
            build_client().unwrap(),
            HttpConfig {
                timeout: None,
                condition: Some(
                    "Math.abs(results.a.value - results.b.value) > 10".to_string(),
                ),
                endpoints: vec![
                    endpoint("a", format!("{}/a", server.base_url()), 200, Some("n")),
                    endpoint("b", format!("{}/b", server.base_url()), 200, Some("n")),
                ],
            },
        );
        let err = engine.check(Duration::from_secs(2)).await.unwrap_err();
        assert_eq!(err.class, crate::error::ProbeErrorClass::Condition);
    }

    #[tokio::test]
    async fn protocol_config_validates_through_the_tagged_enum() {
        let cfg = ProtocolConfig::Http(HttpConfig {
            timeout: None,
            condition: None,
            endpoints: vec![endpoint("a", "http://example.com".into(), 200, None)],
        });
        assert!(cfg.validate().is_ok());
    }
}
