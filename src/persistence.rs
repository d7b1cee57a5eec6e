//! Persistence port and an in-memory implementation used by the
//! demo binary and the test suite.
//!
//! `InMemoryPersistence` is not a production backend; it exists so this
//! crate is runnable and testable without an external SQL engine — a real,
//! behaviorally-correct double rather than a mocked trait, the same role
//! the HTTP engine's mock server plays for its own tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::{
    Incident, IncidentFilter, Page, Paging, Service, ServiceFilter, ServiceOrderBy, ServiceState,
};
use crate::error::{NotFoundError, PersistenceError};

/// Everything the monitor core needs from a storage backend.
///
/// Index note: a production implementation should index services on
/// `(name)` and `(is_enabled)`, state on `(service_id)` as its primary key,
/// and incidents on `(service_id, resolved)` and `(start_time)` to support
/// `find_incidents_paged`'s time-range filter efficiently.
///
/// Schema note: a production implementation owns an append-only version
/// table — each migration numbered, applied inside a transaction, recorded
/// only after it commits, so replaying migrations against an
/// already-migrated database is a no-op rather than an error.
#[async_trait]
pub trait PersistencePort: Send + Sync {
    async fn create_service(&self, service: Service) -> Result<Service, PersistenceError>;
    async fn get_service(&self, id: &str) -> Result<Option<Service>, PersistenceError>;
    async fn update_service(&self, service: Service) -> Result<Service, PersistenceError>;
    /// Cascades: removes the service's state and all its incidents too
    ///.
    async fn delete_service(&self, id: &str) -> Result<(), PersistenceError>;
    async fn find_services_paged(
        &self,
        filter: &ServiceFilter,
        paging: Paging,
    ) -> Result<Page<Service>, PersistenceError>;

    async fn get_state(&self, service_id: &str) -> Result<Option<ServiceState>, PersistenceError>;
    async fn upsert_state(&self, state: ServiceState) -> Result<(), PersistenceError>;
    async fn list_states(&self) -> Result<Vec<ServiceState>, PersistenceError>;

    async fn save_incident(&self, incident: Incident) -> Result<Incident, PersistenceError>;
    async fn update_incident(&self, incident: Incident) -> Result<Incident, PersistenceError>;
    async fn delete_incident(&self, id: &str) -> Result<(), PersistenceError>;
    async fn find_incidents_paged(
        &self,
        filter: &IncidentFilter,
        paging: Paging,
    ) -> Result<Page<Incident>, PersistenceError>;
    async fn list_unresolved_incidents(
        &self,
        service_id: &str,
    ) -> Result<Vec<Incident>, PersistenceError>;

    /// Atomically persist a DOWN transition: the new `state` and, if the
    /// UP->DOWN edge just occurred, the freshly opened `incident`.
    async fn apply_failure_transition(
        &self,
        state: ServiceState,
        new_incident: Option<Incident>,
    ) -> Result<(), PersistenceError>;

    /// Atomically persist an UP transition: the new `state` and, if a DOWN
    /// incident was resolved, the resolved `incident`.
    async fn apply_success_transition(
        &self,
        state: ServiceState,
        resolved_incident: Option<Incident>,
    ) -> Result<(), PersistenceError>;

    async fn tag_catalog(&self) -> Result<Vec<String>, PersistenceError>;
    async fn tag_histogram(&self) -> Result<BTreeMap<String, u64>, PersistenceError>;
    /// Informational only.
    async fn engine_version(&self) -> Result<String, PersistenceError>;
}

#[derive(Default)]
struct Store {
    services: HashMap<String, Service>,
    states: HashMap<String, ServiceState>,
    incidents: HashMap<String, Incident>,
}

/// Single-writer-via-mutex, concurrent-reads-via-`RwLock` in-memory store
///.
pub struct InMemoryPersistence {
    store: Arc<RwLock<Store>>,
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(Store::default())),
        }
    }

    /// Seed a service for the demo binary / tests without going through
    /// `create_service`'s validation.
    pub fn seed_service(&self, service: Service) {
        self.store.write().services.insert(service.id.clone(), service);
    }
}

fn paginate<T: Clone>(mut items: Vec<T>, paging: Paging) -> Page<T> {
    let total = items.len() as u64;
    let page = paging.page.max(1);
    let page_size = paging.page_size.max(1) as usize;
    let start = ((page - 1) as usize) * page_size;
    if start >= items.len() {
        items.clear();
    } else {
        let end = (start + page_size).min(items.len());
        items = items[start..end].to_vec();
    }
    Page { items, total }
}

#[async_trait]
impl PersistencePort for InMemoryPersistence {
    async fn create_service(&self, service: Service) -> Result<Service, PersistenceError> {
        let mut store = self.store.write();
        if store.services.contains_key(&service.id) {
            return Err(PersistenceError::new(format!(
                "service {} already exists",
                service.id
            )));
        }
        store.services.insert(service.id.clone(), service.clone());
        Ok(service)
    }

    async fn get_service(&self, id: &str) -> Result<Option<Service>, PersistenceError> {
        Ok(self.store.read().services.get(id).cloned())
    }

    async fn update_service(&self, service: Service) -> Result<Service, PersistenceError> {
        let mut store = self.store.write();
        if !store.services.contains_key(&service.id) {
            return Err(PersistenceError::new(format!("service {} not found", service.id)));
        }
        store.services.insert(service.id.clone(), service.clone());
        Ok(service)
    }

    async fn delete_service(&self, id: &str) -> Result<(), PersistenceError> {
        let mut store = self.store.write();
        if store.services.remove(id).is_none() {
            return Err(NotFoundError::new("service", id).into());
        }
        store.states.remove(id);
        store
            .incidents
            .retain(|_, incident| incident.service_id != id);
        Ok(())
    }

    async fn find_services_paged(
        &self,
        filter: &ServiceFilter,
        paging: Paging,
    ) -> Result<Page<Service>, PersistenceError> {
        let store = self.store.read();
        let mut matched: Vec<Service> = store
            .services
            .values()
            .filter(|s| {
                if let Some(needle) = &filter.name_contains {
                    if !s.name.to_lowercase().contains(&needle.to_lowercase()) {
                        return false;
                    }
                }
                if !filter.tags_any_of.is_empty()
                    && !filter.tags_any_of.iter().any(|t| s.tags.contains(t))
                {
                    return false;
                }
                if let Some(enabled) = filter.is_enabled {
                    if s.is_enabled != enabled {
                        return false;
                    }
                }
                if let Some(protocol) = filter.protocol {
                    if s.protocol() != protocol {
                        return false;
                    }
                }
                if let Some(status) = filter.status {
                    match store.states.get(&s.id) {
                        Some(state) if state.status == status => {}
                        _ => return false,
                    }
                }
                true
            })
            .cloned()
            .collect();

        match filter.order_by {
            ServiceOrderBy::Name => matched.sort_by(|a, b| a.name.cmp(&b.name)),
            ServiceOrderBy::CreatedAt => matched.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        }

        Ok(paginate(matched, paging))
    }

    async fn get_state(&self, service_id: &str) -> Result<Option<ServiceState>, PersistenceError> {
        Ok(self.store.read().states.get(service_id).cloned())
    }

    async fn upsert_state(&self, state: ServiceState) -> Result<(), PersistenceError> {
        self.store.write().states.insert(state.service_id.clone(), state);
        Ok(())
    }

    async fn list_states(&self) -> Result<Vec<ServiceState>, PersistenceError> {
        Ok(self.store.read().states.values().cloned().collect())
    }

    async fn save_incident(&self, incident: Incident) -> Result<Incident, PersistenceError> {
        self.store
            .write()
            .incidents
            .insert(incident.id.clone(), incident.clone());
        Ok(incident)
    }

    async fn update_incident(&self, incident: Incident) -> Result<Incident, PersistenceError> {
        let mut store = self.store.write();
        if !store.incidents.contains_key(&incident.id) {
            return Err(NotFoundError::new("incident", incident.id.clone()).into());
        }
        store.incidents.insert(incident.id.clone(), incident.clone());
        Ok(incident)
    }

    async fn delete_incident(&self, id: &str) -> Result<(), PersistenceError> {
        if self.store.write().incidents.remove(id).is_none() {
            return Err(NotFoundError::new("incident", id).into());
        }
        Ok(())
    }

    async fn find_incidents_paged(
        &self,
        filter: &IncidentFilter,
        paging: Paging,
    ) -> Result<Page<Incident>, PersistenceError> {
        let store = self.store.read();
        let mut matched: Vec<Incident> = store
            .incidents
            .values()
            .filter(|i| {
                if let Some(service_id) = &filter.service_id {
                    if &i.service_id != service_id {
                        return false;
                    }
                }
                if let Some(resolved) = filter.resolved {
                    if i.resolved != resolved {
                        return false;
                    }
                }
                if let Some(since) = filter.since {
                    if i.start_time < since {
                        return false;
                    }
                }
                if let Some(until) = filter.until {
                    if i.start_time > until {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        Ok(paginate(matched, paging))
    }

    async fn list_unresolved_incidents(
        &self,
        service_id: &str,
    ) -> Result<Vec<Incident>, PersistenceError> {
        Ok(self
            .store
            .read()
            .incidents
            .values()
            .filter(|i| i.service_id == service_id && !i.resolved)
            .cloned()
            .collect())
    }

    async fn apply_failure_transition(
        &self,
        state: ServiceState,
        new_incident: Option<Incident>,
    ) -> Result<(), PersistenceError> {
        let mut store = self.store.write();
        if let Some(incident) = new_incident {
            store.incidents.insert(incident.id.clone(), incident);
        }
        store.states.insert(state.service_id.clone(), state);
        Ok(())
    }

    async fn apply_success_transition(
        &self,
        state: ServiceState,
        resolved_incident: Option<Incident>,
    ) -> Result<(), PersistenceError> {
        let mut store = self.store.write();
        if let Some(incident) = resolved_incident {
            store.incidents.insert(incident.id.clone(), incident);
        }
        store.states.insert(state.service_id.clone(), state);
        Ok(())
    }

    async fn tag_catalog(&self) -> Result<Vec<String>, PersistenceError> {
        let store = self.store.read();
        let mut tags: Vec<String> = store
            .services
            .values()
            .flat_map(|s| s.tags.iter().cloned())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        tags.sort();
        Ok(tags)
    }

    async fn tag_histogram(&self) -> Result<BTreeMap<String, u64>, PersistenceError> {
        let store = self.store.read();
        let mut histogram: BTreeMap<String, u64> = BTreeMap::new();
        for service in store.services.values() {
            for tag in &service.tags {
                *histogram.entry(tag.clone()).or_insert(0) += 1;
            }
        }
        Ok(histogram)
    }

    async fn engine_version(&self) -> Result<String, PersistenceError> {
        Ok("in-memory-0".to_string())
    }
}
