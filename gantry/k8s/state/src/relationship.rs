use crate::{
    object::{Object, ResourceKind},
    resource_id::NamespacedName,
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use gantry_k8s_api::{self as k8s, endpoint_slice_service_owner, ResourceExt};

/// Tracks the relationships between the resources the engine ingests, so that
/// Service and EndpointSlice events can be tested for relevance in O(1).
///
/// HTTPRoute→Service references are many-to-one and tracked with a refcount:
/// a Service is live while at least one route references it. An EndpointSlice
/// is live while its owning Service is live.
#[derive(Debug, Default)]
pub struct Capturer {
    routes_to_services: HashMap<NamespacedName, HashSet<NamespacedName>>,
    service_ref_count: HashMap<NamespacedName, usize>,
    endpoint_slice_owners: HashMap<NamespacedName, NamespacedName>,
}

impl Capturer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures the relationships declared by the object. Kinds without
    /// tracked relationships are ignored.
    pub fn capture(&mut self, obj: &Object) {
        match obj {
            Object::HttpRoute(route) => self.capture_http_route(route),
            Object::EndpointSlice(slice) => self.capture_endpoint_slice(slice),
            _ => {}
        }
    }

    /// Forgets the relationships last captured for the named object.
    pub fn remove(&mut self, kind: ResourceKind, name: &NamespacedName) {
        match kind {
            ResourceKind::HttpRoute => {
                for service in self.routes_to_services.remove(name).unwrap_or_default() {
                    self.decrement_ref_count(&service);
                }
            }
            ResourceKind::EndpointSlice => {
                self.endpoint_slice_owners.remove(name);
            }
            _ => {}
        }
    }

    /// Returns whether the named object is related to a stored route, i.e.
    /// whether its changes can affect the configuration.
    pub fn exists(&self, kind: ResourceKind, name: &NamespacedName) -> bool {
        match kind {
            ResourceKind::Service => self.service_ref_count.contains_key(name),
            ResourceKind::EndpointSlice => self
                .endpoint_slice_owners
                .get(name)
                .map_or(false, |owner| self.service_ref_count.contains_key(owner)),
            _ => false,
        }
    }

    pub(crate) fn capture_http_route(&mut self, route: &k8s::gateway::HttpRoute) {
        let name = NamespacedName::of(route);
        let new_services = backend_services_for_route(route);
        let old_services = self.routes_to_services.remove(&name).unwrap_or_default();

        for service in old_services.difference(&new_services) {
            self.decrement_ref_count(service);
        }
        for service in new_services.difference(&old_services) {
            *self.service_ref_count.entry(service.clone()).or_insert(0) += 1;
        }

        self.routes_to_services.insert(name, new_services);
    }

    pub(crate) fn capture_endpoint_slice(&mut self, slice: &k8s::discovery::EndpointSlice) {
        if let Some(owner) = endpoint_slice_service_owner(slice) {
            let service = NamespacedName::new(slice.namespace().unwrap_or_default(), owner);
            self.endpoint_slice_owners
                .insert(NamespacedName::of(slice), service);
        }
    }

    fn decrement_ref_count(&mut self, service: &NamespacedName) {
        match self.service_ref_count.get_mut(service) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                self.service_ref_count.remove(service);
            }
            None => {}
        }
    }
}

/// Returns the backend Services referenced by the route's rules, deduplicated.
///
/// Only the first backend ref of each rule is consumed, and only refs of kind
/// Service (the default) count. A ref without an explicit namespace targets
/// the route's namespace.
// TODO: consume all backend refs of a rule once weighted backends are supported.
pub(crate) fn backend_services_for_route(
    route: &k8s::gateway::HttpRoute,
) -> HashSet<NamespacedName> {
    let route_namespace = route.namespace().unwrap_or_default();
    let mut services = HashSet::new();

    for rule in route.spec.rules.iter().flatten() {
        let Some(backend_ref) = rule
            .backend_refs
            .as_deref()
            .unwrap_or_default()
            .first()
            .and_then(|backend| backend.backend_ref.as_ref())
        else {
            continue;
        };
        let reference = &backend_ref.inner;
        if reference
            .kind
            .as_deref()
            .map_or(false, |kind| kind != "Service")
        {
            continue;
        }

        let namespace = reference
            .namespace
            .clone()
            .unwrap_or_else(|| route_namespace.clone());
        services.insert(NamespacedName::new(namespace, &reference.name));
    }

    services
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_k8s_api::gateway::{
        BackendObjectReference, BackendRef, HttpBackendRef, HttpRoute, HttpRouteRule, HttpRouteSpec,
    };
    use gantry_k8s_api::{discovery::EndpointSlice, ObjectMeta, OwnerReference};

    fn backend_ref(name: &str, namespace: Option<&str>, kind: Option<&str>) -> HttpBackendRef {
        HttpBackendRef {
            backend_ref: Some(BackendRef {
                weight: None,
                inner: BackendObjectReference {
                    kind: kind.map(Into::into),
                    name: name.into(),
                    namespace: namespace.map(Into::into),
                    port: Some(80),
                    ..Default::default()
                },
            }),
        }
    }

    fn route_with_backends(namespace: &str, name: &str, backends: &[&str]) -> HttpRoute {
        let rules = backends
            .iter()
            .map(|svc| HttpRouteRule {
                backend_refs: Some(vec![backend_ref(svc, Some("test"), Some("Service"))]),
                ..Default::default()
            })
            .collect();
        HttpRoute {
            metadata: ObjectMeta {
                namespace: Some(namespace.into()),
                name: Some(name.into()),
                ..Default::default()
            },
            spec: HttpRouteSpec {
                rules: Some(rules),
                ..Default::default()
            },
        }
    }

    fn slice_owned_by(namespace: &str, name: &str, service: Option<&str>) -> EndpointSlice {
        EndpointSlice {
            metadata: ObjectMeta {
                namespace: Some(namespace.into()),
                name: Some(name.into()),
                owner_references: service.map(|svc| {
                    vec![OwnerReference {
                        kind: "Service".into(),
                        name: svc.into(),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn backend_services_dedup_and_filter() {
        let rules = vec![
            HttpRouteRule {
                backend_refs: Some(vec![backend_ref("svc1", Some("test"), Some("Service"))]),
                ..Default::default()
            },
            // Duplicate of the first rule's Service.
            HttpRouteRule {
                backend_refs: Some(vec![backend_ref("svc1", Some("test"), Some("Service"))]),
                ..Default::default()
            },
            HttpRouteRule {
                backend_refs: Some(vec![backend_ref("invalid-kind", Some("test"), Some("Invalid"))]),
                ..Default::default()
            },
            HttpRouteRule {
                backend_refs: Some(vec![backend_ref("nil-namespace", None, Some("Service"))]),
                ..Default::default()
            },
            HttpRouteRule {
                backend_refs: Some(vec![backend_ref(
                    "diff-namespace",
                    Some("not-test"),
                    Some("Service"),
                )]),
                ..Default::default()
            },
            HttpRouteRule::default(),
            HttpRouteRule {
                backend_refs: Some(vec![backend_ref("svc2", Some("test"), Some("Service"))]),
                ..Default::default()
            },
        ];
        let route = HttpRoute {
            metadata: ObjectMeta {
                namespace: Some("test".into()),
                name: Some("hr".into()),
                ..Default::default()
            },
            spec: HttpRouteSpec {
                rules: Some(rules),
                ..Default::default()
            },
        };

        let services = backend_services_for_route(&route);
        let expected: HashSet<NamespacedName> = [
            NamespacedName::new("test", "svc1"),
            NamespacedName::new("test", "nil-namespace"),
            NamespacedName::new("not-test", "diff-namespace"),
            NamespacedName::new("test", "svc2"),
        ]
        .into_iter()
        .collect();
        assert_eq!(services, expected);
    }

    #[test]
    fn service_ref_counting() {
        let mut capturer = Capturer::new();
        let foo = NamespacedName::new("test", "foo");

        capturer.capture_http_route(&route_with_backends("test", "hr-1", &["foo"]));
        capturer.capture_http_route(&route_with_backends("test", "hr-2", &["foo", "bar"]));

        assert!(capturer.exists(ResourceKind::Service, &foo));
        assert!(capturer.exists(ResourceKind::Service, &NamespacedName::new("test", "bar")));

        capturer.remove(ResourceKind::HttpRoute, &NamespacedName::new("test", "hr-1"));
        assert!(capturer.exists(ResourceKind::Service, &foo));

        capturer.remove(ResourceKind::HttpRoute, &NamespacedName::new("test", "hr-2"));
        assert!(!capturer.exists(ResourceKind::Service, &foo));
        assert!(capturer.service_ref_count.is_empty());
    }

    #[test]
    fn recapture_replaces_route_services() {
        let mut capturer = Capturer::new();
        let hr = NamespacedName::new("test", "hr-1");

        capturer.capture_http_route(&route_with_backends("test", "hr-1", &["foo"]));
        capturer.capture_http_route(&route_with_backends("test", "hr-1", &["bar"]));

        assert!(!capturer.exists(ResourceKind::Service, &NamespacedName::new("test", "foo")));
        assert!(capturer.exists(ResourceKind::Service, &NamespacedName::new("test", "bar")));
        assert_eq!(capturer.routes_to_services.get(&hr).map(|services| services.len()), Some(1));
    }

    #[test]
    fn capture_then_remove_restores_prior_state() {
        let mut capturer = Capturer::new();
        capturer.capture_http_route(&route_with_backends("test", "hr-1", &["foo"]));

        capturer.capture_http_route(&route_with_backends("test", "hr-2", &["foo", "bar"]));
        capturer.remove(ResourceKind::HttpRoute, &NamespacedName::new("test", "hr-2"));

        assert_eq!(
            capturer.service_ref_count.get(&NamespacedName::new("test", "foo")),
            Some(&1)
        );
        assert!(!capturer.exists(ResourceKind::Service, &NamespacedName::new("test", "bar")));
    }

    #[test]
    fn endpoint_slice_liveness_follows_owner() {
        let mut capturer = Capturer::new();
        let slice = NamespacedName::new("test", "foo-slice");

        capturer.capture_endpoint_slice(&slice_owned_by("test", "foo-slice", Some("foo")));
        assert!(!capturer.exists(ResourceKind::EndpointSlice, &slice));

        capturer.capture_http_route(&route_with_backends("test", "hr-1", &["foo"]));
        assert!(capturer.exists(ResourceKind::EndpointSlice, &slice));

        capturer.remove(ResourceKind::EndpointSlice, &slice);
        assert!(!capturer.exists(ResourceKind::EndpointSlice, &slice));
    }

    #[test]
    fn ownerless_slice_is_not_tracked() {
        let mut capturer = Capturer::new();
        capturer.capture(&Object::EndpointSlice(slice_owned_by(
            "test", "slice", None,
        )));
        assert!(capturer.endpoint_slice_owners.is_empty());
    }
}
