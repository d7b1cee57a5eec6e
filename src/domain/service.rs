//! `Service` and its protocol-specific configuration.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::ids::new_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Tcp,
    Grpc,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Protocol::Http => "http",
            Protocol::Tcp => "tcp",
            Protocol::Grpc => "grpc",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMethod {
    #[serde(rename = "GET")]
    Get,
    #[serde(rename = "POST")]
    Post,
    #[serde(rename = "PUT")]
    Put,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(rename = "HEAD")]
    Head,
    #[serde(rename = "OPTIONS")]
    Options,
}

impl HttpMethod {
    pub fn as_reqwest(&self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Options => reqwest::Method::OPTIONS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// One HTTP endpoint within an `HttpConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpEndpoint {
    pub name: String,
    pub url: String,
    #[serde(default = "default_http_method")]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
    pub expected_status: u16,
    /// Dotted path (object keys / array indices) extracted from the JSON
    /// response body.
    #[serde(default)]
    pub json_path: Option<String>,
    #[serde(default)]
    pub basic_auth: Option<BasicAuth>,
}

fn default_http_method() -> HttpMethod {
    HttpMethod::Get
}

/// HTTP protocol config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default)]
    pub timeout: Option<Duration>,
    /// JavaScript-like anomaly condition; a truthy result *fails* the check.
    #[serde(default)]
    pub condition: Option<String>,
    pub endpoints: Vec<HttpEndpoint>,
}

/// TCP protocol config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    pub endpoint: String,
    #[serde(default)]
    pub send_data: Option<String>,
    #[serde(default)]
    pub expect_data: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrpcCheckType {
    Health,
    Reflection,
    Connectivity,
}

/// gRPC protocol config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrpcConfig {
    pub endpoint: String,
    pub check_type: GrpcCheckType,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub insecure_tls: bool,
}

/// Tagged sum dispatched on `Protocol`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum ProtocolConfig {
    Http(HttpConfig),
    Tcp(TcpConfig),
    Grpc(GrpcConfig),
}

impl ProtocolConfig {
    pub fn protocol(&self) -> Protocol {
        match self {
            ProtocolConfig::Http(_) => Protocol::Http,
            ProtocolConfig::Tcp(_) => Protocol::Tcp,
            ProtocolConfig::Grpc(_) => Protocol::Grpc,
        }
    }

    /// Validate this config against its own variant.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            ProtocolConfig::Http(cfg) => {
                if cfg.endpoints.is_empty() {
                    return Err(ValidationError::new(
                        "config.endpoints",
                        "HTTP config requires at least one endpoint",
                    ));
                }
                for ep in &cfg.endpoints {
                    if ep.name.trim().is_empty() {
                        return Err(ValidationError::new(
                            "config.endpoints[].name",
                            "endpoint name must not be empty",
                        ));
                    }
                    url::Url::parse(&ep.url).map_err(|e| {
                        ValidationError::new(
                            "config.endpoints[].url",
                            format!("invalid URL '{}': {e}", ep.url),
                        )
                    })?;
                    if !(100..=599).contains(&ep.expected_status) {
                        return Err(ValidationError::new(
                            "config.endpoints[].expected_status",
                            format!("{} is not a valid HTTP status", ep.expected_status),
                        ));
                    }
                }
                Ok(())
            }
            ProtocolConfig::Tcp(cfg) => {
                if cfg.endpoint.trim().is_empty() {
                    return Err(ValidationError::new(
                        "config.endpoint",
                        "TCP endpoint must not be empty",
                    ));
                }
                if cfg.endpoint.parse::<std::net::SocketAddr>().is_err()
                    && cfg.endpoint.rsplit_once(':').is_none()
                {
                    return Err(ValidationError::new(
                        "config.endpoint",
                        format!("'{}' is not a host:port", cfg.endpoint),
                    ));
                }
                Ok(())
            }
            ProtocolConfig::Grpc(cfg) => {
                if cfg.endpoint.trim().is_empty() {
                    return Err(ValidationError::new(
                        "config.endpoint",
                        "gRPC endpoint must not be empty",
                    ));
                }
                Ok(())
            }
        }
    }
}

/// A monitored target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    pub retries: u32,
    pub tags: HashSet<String>,
    pub config: ProtocolConfig,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Service {
    pub fn protocol(&self) -> Protocol {
        self.config.protocol()
    }
}

/// Everything an operator supplies to create or update a service; `id` and
/// timestamps are server-assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub name: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub retries: u32,
    #[serde(default)]
    pub tags: HashSet<String>,
    pub config: ProtocolConfig,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl ServiceRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::new("name", "name must not be empty"));
        }
        if self.interval.is_zero() {
            return Err(ValidationError::new(
                "interval",
                "interval must be >= 1s",
            ));
        }
        if self.timeout.is_zero() {
            return Err(ValidationError::new("timeout", "timeout must be >= 1s"));
        }
        if self.retries < 1 {
            return Err(ValidationError::new("retries", "retries must be >= 1"));
        }
        self.config.validate()?;
        Ok(())
    }

    pub fn into_service(self, now: DateTime<Utc>) -> Service {
        Service {
            id: new_id(),
            name: self.name,
            interval: self.interval,
            timeout: self.timeout,
            retries: self.retries,
            tags: self.tags,
            config: self.config,
            is_enabled: self.is_enabled,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply_to(self, service: &mut Service, now: DateTime<Utc>) {
        service.name = self.name;
        service.interval = self.interval;
        service.timeout = self.timeout;
        service.retries = self.retries;
        service.tags = self.tags;
        service.config = self.config;
        service.is_enabled = self.is_enabled;
        service.updated_at = now;
    }
}

/// Ordering / filter criteria for `findPaged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceOrderBy {
    #[default]
    Name,
    CreatedAt,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceFilter {
    pub name_contains: Option<String>,
    pub tags_any_of: Vec<String>,
    pub status: Option<crate::domain::state::Status>,
    pub is_enabled: Option<bool>,
    pub protocol: Option<Protocol>,
    pub order_by: ServiceOrderBy,
}

#[derive(Debug, Clone, Copy)]
pub struct Paging {
    pub page: u32,
    pub page_size: u32,
}

impl Default for Paging {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

/// `serde(with = ...)` helper: (de)serialize `Duration` as whole seconds,
/// matching the wire shape operators configure.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
