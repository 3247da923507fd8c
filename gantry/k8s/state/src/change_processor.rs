use crate::{
    configuration::{build_configuration, Configuration},
    graph::build_graph,
    object::{Object, ResourceKind},
    relationship::{backend_services_for_route, Capturer},
    resolver::{ServiceResolver, ServiceStore},
    resource_id::NamespacedName,
    secrets::SecretMaterializer,
    statuses::{build_statuses, Statuses},
    store::Store,
};
use gantry_k8s_api::{self as k8s, endpoint_slice_service_owner, ResourceExt};
use parking_lot::Mutex;
use std::sync::Arc;

/// Configuration of a [`ChangeProcessor`].
#[derive(Clone)]
pub struct ChangeProcessorConfig {
    /// The controller name GatewayClasses must carry to be accepted.
    pub controller_name: String,
    /// The one GatewayClass this processor manages. Feeding it a class with
    /// any other name is a programming error in the watch layer.
    pub gateway_class_name: String,
    pub secrets: Arc<dyn SecretMaterializer>,
    pub services: Arc<dyn ServiceStore>,
    pub resolver: Arc<dyn ServiceResolver>,
}

/// Ingests resource change events and turns them into a [`Configuration`] and
/// [`Statuses`] on demand.
///
/// The processor is a monitor: captures and [`process`](Self::process) all
/// serialize on one lock, so a processing cycle always sees a stable store
/// snapshot, and captures that complete before `process` starts are fully
/// reflected in its output. Captures are cheap; the graph is only rebuilt by
/// `process`, and only when a semantically relevant change was captured since
/// the previous cycle.
pub struct ChangeProcessor {
    config: ChangeProcessorConfig,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    store: Store,
    relationships: Capturer,
    /// Sticky across captures; cleared only by a processing cycle that
    /// observes it set.
    store_changed: bool,
}

impl ChangeProcessor {
    pub fn new(config: ChangeProcessorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
        }
    }

    /// Captures an upsert of one of the supported resources.
    ///
    /// An upsert whose generation equals the stored one replaces the stored
    /// spec without scheduling a rebuild; status-only updates are filtered out
    /// this way. Service and EndpointSlice events only schedule a rebuild when
    /// they can affect the configuration.
    ///
    /// # Panics
    ///
    /// Panics if a GatewayClass other than the managed one is fed in.
    pub fn capture_upsert_change(&self, obj: Object) {
        let mut state = self.state.lock();

        let kind = obj.kind();
        let name = obj.name();
        let changed = match obj {
            Object::GatewayClass(gc) => state.capture_gateway_class(gc, &self.config.gateway_class_name),
            Object::Gateway(gw) => state.capture_gateway(gw),
            Object::HttpRoute(hr) => state.capture_http_route(hr),
            Object::Service(svc) => state.capture_service(&svc),
            Object::EndpointSlice(slice) => state.capture_endpoint_slice(slice),
            Object::Secret(secret) => state.capture_secret(secret),
        };

        tracing::debug!(?kind, %name, changed, "captured upsert");
        state.store_changed |= changed;
    }

    /// Captures a delete of one of the supported resources.
    ///
    /// # Panics
    ///
    /// Panics if a GatewayClass other than the managed one is named.
    pub fn capture_delete_change(&self, kind: ResourceKind, name: &NamespacedName) {
        let mut state = self.state.lock();

        let changed = match kind {
            ResourceKind::GatewayClass => {
                assert!(
                    name.name == self.config.gateway_class_name,
                    "GatewayClass must be named {}, got {}",
                    self.config.gateway_class_name,
                    name.name,
                );
                state.store.gateway_class = None;
                true
            }
            ResourceKind::Gateway => {
                state.store.gateways.remove(name);
                true
            }
            ResourceKind::HttpRoute => {
                if let Some(route) = state.store.http_routes.remove(name) {
                    state.remove_route_from_services(name, &route);
                }
                state.relationships.remove(ResourceKind::HttpRoute, name);
                true
            }
            ResourceKind::Service => state.store.services.contains_key(name),
            ResourceKind::EndpointSlice => {
                let changed = state.relationships.exists(ResourceKind::EndpointSlice, name);
                state.store.endpoint_slices.remove(name);
                state.relationships.remove(ResourceKind::EndpointSlice, name);
                changed
            }
            ResourceKind::Secret => state.store.secrets.remove(name).is_some(),
        };

        tracing::debug!(?kind, %name, changed, "captured delete");
        state.store_changed |= changed;
    }

    /// Rebuilds the configuration and statuses from the captured state, or
    /// returns `None` when nothing relevant changed since the last cycle.
    pub fn process(&self) -> Option<(Configuration, Statuses)> {
        let mut state = self.state.lock();

        if !state.store_changed {
            return None;
        }
        state.store_changed = false;

        let graph = build_graph(
            &state.store,
            &self.config.controller_name,
            &self.config.gateway_class_name,
            self.config.secrets.as_ref(),
            self.config.services.as_ref(),
            self.config.resolver.as_ref(),
        );

        Some((build_configuration(&graph), build_statuses(&graph)))
    }
}

impl State {
    fn capture_gateway_class(
        &mut self,
        gc: k8s::gateway::GatewayClass,
        expected_name: &str,
    ) -> bool {
        let name = gc.name_unchecked();
        assert!(
            name == expected_name,
            "GatewayClass must be named {expected_name}, got {name}",
        );

        let unchanged = self
            .store
            .gateway_class
            .as_ref()
            .map_or(false, |prev| prev.metadata.generation == gc.metadata.generation);
        self.store.gateway_class = Some(gc);
        !unchanged
    }

    fn capture_gateway(&mut self, gw: k8s::gateway::Gateway) -> bool {
        let name = NamespacedName::of(&gw);
        let unchanged = self
            .store
            .gateways
            .get(&name)
            .map_or(false, |prev| prev.metadata.generation == gw.metadata.generation);
        self.store.gateways.insert(name, gw);
        !unchanged
    }

    fn capture_http_route(&mut self, hr: k8s::gateway::HttpRoute) -> bool {
        let name = NamespacedName::of(&hr);
        let prev = self.store.http_routes.remove(&name);
        let unchanged = prev
            .as_ref()
            .map_or(false, |prev| prev.metadata.generation == hr.metadata.generation);

        // Re-derive the Service index entries of this route from scratch so
        // that Services it no longer references are pruned.
        if let Some(prev) = prev {
            self.remove_route_from_services(&name, &prev);
        }
        self.relationships.capture_http_route(&hr);
        for service in backend_services_for_route(&hr) {
            self.store
                .services
                .entry(service)
                .or_default()
                .insert(name.clone());
        }
        self.store.http_routes.insert(name, hr);
        !unchanged
    }

    /// The store holds no Service specs; an upsert is only relevant when some
    /// stored route references the Service.
    fn capture_service(&mut self, svc: &k8s::Service) -> bool {
        self.store.services.contains_key(&NamespacedName::of(svc))
    }

    fn capture_endpoint_slice(&mut self, slice: k8s::discovery::EndpointSlice) -> bool {
        self.relationships.capture_endpoint_slice(&slice);
        if !self.endpoint_slice_is_relevant(&slice) {
            return false;
        }
        self.store
            .endpoint_slices
            .insert(NamespacedName::of(&slice), slice);
        true
    }

    /// Secret data carries no meaningful generation, so every upsert may
    /// change the materialized files.
    fn capture_secret(&mut self, secret: k8s::Secret) -> bool {
        self.store.secrets.insert(NamespacedName::of(&secret), secret);
        true
    }

    fn endpoint_slice_is_relevant(&self, slice: &k8s::discovery::EndpointSlice) -> bool {
        endpoint_slice_service_owner(slice).map_or(false, |owner| {
            let service = NamespacedName::new(slice.namespace().unwrap_or_default(), owner);
            self.store.services.contains_key(&service)
        })
    }

    fn remove_route_from_services(&mut self, name: &NamespacedName, route: &k8s::gateway::HttpRoute) {
        for service in backend_services_for_route(route) {
            if let Some(routes) = self.store.services.get_mut(&service) {
                routes.remove(name);
                if routes.is_empty() {
                    self.store.services.remove(&service);
                }
            }
        }
    }
}
