//! Core data model: `Service`, `ServiceState`, `Incident`, and the
//! protocol-specific configuration each service carries.

pub mod incident;
pub mod service;
pub mod state;

pub use incident::{Incident, IncidentFilter};
pub use service::{
    BasicAuth, GrpcCheckType, GrpcConfig, HttpConfig, HttpEndpoint, HttpMethod, Page, Paging,
    Protocol, ProtocolConfig, Service, ServiceFilter, ServiceOrderBy, ServiceRequest, TcpConfig,
};
pub use state::{ServiceState, Status};
