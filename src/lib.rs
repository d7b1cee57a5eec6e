//! Sentinel: a multi-protocol service-availability monitor — scheduler,
//! protocol probe engines, a state/incident machine, and an event broker
//! consumers can subscribe to.

pub mod broadcaster;
pub mod broker;
pub mod config;
pub mod domain;
pub mod error;
pub mod ids;
pub mod monitor;
pub mod notification;
pub mod persistence;
pub mod probe;
pub mod scheduler;

pub use broker::{Broker, TriggerEvent};
pub use domain::{Incident, Protocol, ProtocolConfig, Service, ServiceRequest, ServiceState, Status};
pub use error::SentinelError;
pub use monitor::{MonitorCore, Statistics};
pub use notification::{FanoutNotifier, LoggingSink, NotificationPort, NotificationSink};
pub use persistence::{InMemoryPersistence, PersistencePort};
pub use scheduler::Scheduler;
