use std::collections::HashMap;
use std::ops::Add;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::warn;

/// Health reporting for the asynchronous loops of a service.
///
/// Each loop registers itself with a deadline and must report healthy more
/// often than that deadline, otherwise the probe fails. The process status is
/// the conjunction of all component statuses: one stalled or unhealthy
/// component fails the whole probe.
#[derive(Clone)]
pub struct HealthRegistry {
    name: &'static str,
    components: Arc<RwLock<HashMap<String, TrackedComponent>>>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Automatically set when a component is newly registered
    Starting,
    /// Recently reported healthy, will need to report again before the date
    HealthyUntil(time::OffsetDateTime),
    /// Reported unhealthy
    Unhealthy,
}

impl ComponentStatus {
    fn is_healthy(&self) -> bool {
        match self {
            ComponentStatus::Starting => false,
            ComponentStatus::HealthyUntil(until) => until.gt(&time::OffsetDateTime::now_utc()),
            ComponentStatus::Unhealthy => false,
        }
    }
}

#[derive(Debug, Clone)]
struct TrackedComponent {
    status: ComponentStatus,
}

#[derive(Default, Debug)]
pub struct HealthStatus {
    /// The overall status: true if all components are healthy
    pub healthy: bool,
    /// Current status of each registered component, for display
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    /// Computes the status code from the overall health, and prints each
    /// component status in the body for debugging.
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

/// Handle held by one component, used to report its own status.
#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: Arc<RwLock<HashMap<String, TrackedComponent>>>,
}

impl HealthHandle {
    /// Report healthy. Must be called more frequently than the registered
    /// deadline for the probe to keep passing.
    pub async fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            time::OffsetDateTime::now_utc().add(self.deadline),
        ))
        .await
    }

    pub async fn report_status(&self, status: ComponentStatus) {
        match self.components.write() {
            Ok(mut components) => {
                components.insert(self.component.clone(), TrackedComponent { status });
            }
            Err(err) => warn!("failed to report health status: {}", err),
        }
    }
}

impl HealthRegistry {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            components: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a new component, returning the handle it reports through.
    pub async fn register(&self, component: String, deadline: time::Duration) -> HealthHandle {
        let deadline = Duration::from_millis(deadline.whole_milliseconds().max(0) as u64);
        if let Ok(mut components) = self.components.write() {
            components.insert(
                component.clone(),
                TrackedComponent {
                    status: ComponentStatus::Starting,
                },
            );
        }
        HealthHandle {
            component,
            deadline,
            components: self.components.clone(),
        }
    }

    pub fn get_status(&self) -> HealthStatus {
        let components = match self.components.read() {
            Ok(components) => components,
            Err(err) => {
                warn!("could not read {} health registry: {}", self.name, err);
                return HealthStatus::default();
            }
        };

        let mut status = HealthStatus {
            healthy: !components.is_empty(),
            components: HashMap::with_capacity(components.len()),
        };
        for (name, component) in components.iter() {
            if !component.status.is_healthy() {
                status.healthy = false;
            }
            status.components.insert(name.clone(), component.status.clone());
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_registry_is_unhealthy() {
        let registry = HealthRegistry::new("liveness");
        assert!(!registry.get_status().healthy);
    }

    #[tokio::test]
    async fn starting_component_is_unhealthy_until_it_reports() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry
            .register("worker".to_string(), time::Duration::seconds(60))
            .await;
        assert!(!registry.get_status().healthy);

        handle.report_healthy().await;
        assert!(registry.get_status().healthy);
    }

    #[tokio::test]
    async fn unhealthy_report_fails_the_probe() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry
            .register("worker".to_string(), time::Duration::seconds(60))
            .await;
        handle.report_healthy().await;
        handle.report_status(ComponentStatus::Unhealthy).await;
        assert!(!registry.get_status().healthy);
    }

    #[tokio::test]
    async fn expired_deadline_fails_the_probe() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry
            .register("worker".to_string(), time::Duration::milliseconds(0))
            .await;
        handle.report_healthy().await;
        assert!(!registry.get_status().healthy);
    }
}
