use crate::{
    configuration::WILDCARD_HOSTNAME,
    resolver::{Endpoint, ServiceResolver, ServiceStore},
    resource_id::NamespacedName,
    secrets::SecretMaterializer,
    store::Store,
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use anyhow::{anyhow, bail, Context, Result};
use gantry_k8s_api::{self as k8s, ResourceExt};
use std::sync::Arc;

/// The validated view of the store a single processing cycle builds its
/// Configuration and Statuses from. Immutable once built.
#[derive(Debug, Default)]
pub(crate) struct Graph {
    pub(crate) gateway_class: Option<GatewayClassNode>,
    pub(crate) gateway: Option<GatewayNode>,
    pub(crate) routes: HashMap<NamespacedName, Arc<RouteNode>>,
    /// Resolved endpoints per distinct backend Service of attached routes.
    /// Entries with empty endpoint lists are backends that failed to resolve.
    pub(crate) backends: HashMap<BackendService, Vec<Endpoint>>,
}

#[derive(Debug)]
pub(crate) struct GatewayClassNode {
    pub(crate) source: k8s::gateway::GatewayClass,
    pub(crate) valid: bool,
    pub(crate) error: String,
}

#[derive(Debug)]
pub(crate) struct GatewayNode {
    pub(crate) source: k8s::gateway::Gateway,
    /// Listener nodes keyed by section name.
    pub(crate) listeners: HashMap<String, ListenerNode>,
}

#[derive(Debug)]
pub(crate) struct ListenerNode {
    pub(crate) source: k8s::gateway::Listener,
    pub(crate) valid: bool,
    pub(crate) error: String,
    /// Path of the materialized TLS certificate; empty for HTTP listeners and
    /// invalid listeners.
    pub(crate) secret_path: String,
    /// Union of the hostnames accepted from the attached routes.
    pub(crate) accepted_hostnames: HashSet<String>,
    pub(crate) routes: HashMap<NamespacedName, Arc<RouteNode>>,
}

#[derive(Debug)]
pub(crate) struct RouteNode {
    pub(crate) source: Arc<k8s::gateway::HttpRoute>,
    pub(crate) valid_section_refs: HashSet<String>,
    pub(crate) invalid_section_refs: HashMap<String, RejectionReason>,
    /// Backend Service per rule index; rules without an extractable Service
    /// backend have no entry.
    pub(crate) backend_services: HashMap<usize, BackendService>,
}

/// A backend Service and port pair a route rule forwards to. The
/// default value is the invalid backend: no Service could be extracted.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub(crate) struct BackendService {
    pub(crate) namespace: String,
    pub(crate) name: String,
    pub(crate) port: i32,
}

/// Why a route's parent ref could not be attached to a listener.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum RejectionReason {
    #[error("the parent ref does not reference the managed Gateway")]
    WrongParent,
    #[error("no listener with the referenced section name exists")]
    UnknownSection,
    #[error("the referenced listener is invalid")]
    ListenerInvalid,
    #[error("no route hostname intersects with the listener hostname")]
    HostnameMismatch,
}

pub(crate) fn build_graph(
    store: &Store,
    controller_name: &str,
    gateway_class_name: &str,
    secrets: &dyn SecretMaterializer,
    services: &dyn ServiceStore,
    resolver: &dyn ServiceResolver,
) -> Graph {
    let mut graph = Graph {
        gateway_class: store
            .gateway_class
            .clone()
            .map(|gc| build_gateway_class(gc, controller_name)),
        gateway: elect_gateway(store, gateway_class_name).map(|source| GatewayNode {
            listeners: build_listeners(&source, secrets),
            source,
        }),
        ..Default::default()
    };

    bind_routes(&mut graph, store);
    resolve_backends(&mut graph, services, resolver);

    graph
}

fn build_gateway_class(
    source: k8s::gateway::GatewayClass,
    controller_name: &str,
) -> GatewayClassNode {
    if source.spec.controller_name != controller_name {
        return GatewayClassNode {
            valid: false,
            error: format!(
                "spec.controllerName must be {controller_name}, got {}",
                source.spec.controller_name
            ),
            source,
        };
    }
    GatewayClassNode {
        source,
        valid: true,
        error: String::new(),
    }
}

/// Picks the Gateway this controller serves among those of the managed class.
/// The winner is the least `(namespace, name)`; the rest are reported and
/// omitted.
fn elect_gateway(store: &Store, gateway_class_name: &str) -> Option<k8s::gateway::Gateway> {
    let mut candidates: Vec<(&NamespacedName, &k8s::gateway::Gateway)> = store
        .gateways
        .iter()
        .filter(|(_, gw)| gw.spec.gateway_class_name == gateway_class_name)
        .collect();
    candidates.sort_by_key(|(name, _)| *name);

    let mut candidates = candidates.into_iter();
    let (winner_name, winner) = candidates.next()?;
    for (name, _) in candidates {
        tracing::warn!(
            gateway = %name,
            winner = %winner_name,
            "ignoring conflicting Gateway; only one Gateway per controller is supported",
        );
    }
    Some(winner.clone())
}

fn build_listeners(
    gateway: &k8s::gateway::Gateway,
    secrets: &dyn SecretMaterializer,
) -> HashMap<String, ListenerNode> {
    let namespace = gateway.namespace().unwrap_or_default();
    gateway
        .spec
        .listeners
        .iter()
        .map(|listener| {
            let node = match validate_listener(listener, &namespace, secrets) {
                Ok(secret_path) => ListenerNode {
                    source: listener.clone(),
                    valid: true,
                    error: String::new(),
                    secret_path,
                    accepted_hostnames: HashSet::new(),
                    routes: HashMap::new(),
                },
                Err(error) => ListenerNode {
                    source: listener.clone(),
                    valid: false,
                    error: format!("{error:#}"),
                    secret_path: String::new(),
                    accepted_hostnames: HashSet::new(),
                    routes: HashMap::new(),
                },
            };
            (listener.name.clone(), node)
        })
        .collect()
}

/// Validates the listener, returning the materialized certificate path for
/// HTTPS listeners and the empty string for HTTP ones.
fn validate_listener(
    listener: &k8s::gateway::Listener,
    gateway_namespace: &str,
    secrets: &dyn SecretMaterializer,
) -> Result<String> {
    match listener.protocol {
        k8s::gateway::ProtocolType::HTTP => {
            if listener.port != 80 {
                bail!("port {} is not supported for HTTP listeners; only port 80 is", listener.port);
            }
            Ok(String::new())
        }
        k8s::gateway::ProtocolType::HTTPS => {
            if listener.port != 443 {
                bail!(
                    "port {} is not supported for HTTPS listeners; only port 443 is",
                    listener.port
                );
            }
            let tls = listener
                .tls
                .as_ref()
                .ok_or_else(|| anyhow!("tls configuration is required for HTTPS listeners"))?;
            if tls.mode != Some(k8s::gateway::TlsModeType::Terminate) {
                bail!("tls mode must be Terminate");
            }
            let cert_ref = tls
                .certificate_refs
                .as_deref()
                .unwrap_or_default()
                .first()
                .ok_or_else(|| anyhow!("at least one certificate ref is required"))?;
            if cert_ref
                .kind
                .as_deref()
                .map_or(false, |kind| kind != "Secret")
            {
                bail!("certificate refs of kind {} are not supported", cert_ref.kind.as_deref().unwrap_or_default());
            }

            let name = NamespacedName::new(
                cert_ref.namespace.as_deref().unwrap_or(gateway_namespace),
                &cert_ref.name,
            );
            secrets
                .request(&name)
                .with_context(|| format!("failed to materialize Secret {name}"))
        }
        protocol => bail!("protocol {protocol:?} is not supported"),
    }
}

fn bind_routes(graph: &mut Graph, store: &Store) {
    let gateway_name = graph.gateway.as_ref().map(|gw| NamespacedName::of(&gw.source));

    for (name, hr) in &store.http_routes {
        let mut valid_refs = HashSet::new();
        let mut invalid_refs = HashMap::new();
        // Hostnames accepted per valid section ref, unioned into the listener
        // after the route node is built.
        let mut accepted: Vec<(String, Vec<String>)> = Vec::new();

        for parent_ref in hr.spec.inner.parent_refs.iter().flatten() {
            let section = parent_ref.section_name.clone().unwrap_or_default();

            if !ref_targets_gateway(parent_ref, &name.namespace, gateway_name.as_ref()) {
                invalid_refs.insert(section, RejectionReason::WrongParent);
                continue;
            }
            let listeners = &graph
                .gateway
                .as_ref()
                .expect("a ref can only target an elected Gateway")
                .listeners;

            match listeners.get(&section) {
                None => {
                    invalid_refs.insert(section, RejectionReason::UnknownSection);
                }
                Some(listener) if !listener.valid => {
                    invalid_refs.insert(section, RejectionReason::ListenerInvalid);
                }
                Some(listener) => {
                    let hostnames = accepted_hostnames(
                        listener.source.hostname.as_deref(),
                        hr.spec.hostnames.as_deref().unwrap_or_default(),
                    );
                    if hostnames.is_empty() {
                        invalid_refs.insert(section, RejectionReason::HostnameMismatch);
                    } else {
                        valid_refs.insert(section.clone());
                        accepted.push((section, hostnames));
                    }
                }
            }
        }

        let mut backend_services = HashMap::new();
        if !valid_refs.is_empty() {
            for (rule_idx, rule) in hr.spec.rules.iter().flatten().enumerate() {
                if let Some(service) = backend_service_for_rule(rule, &name.namespace) {
                    backend_services.insert(rule_idx, service);
                }
            }
        }

        let node = Arc::new(RouteNode {
            source: Arc::new(hr.clone()),
            valid_section_refs: valid_refs,
            invalid_section_refs: invalid_refs,
            backend_services,
        });

        if let Some(gateway) = graph.gateway.as_mut() {
            for (section, hostnames) in accepted {
                let listener = gateway
                    .listeners
                    .get_mut(&section)
                    .expect("valid section refs name an existing listener");
                listener.accepted_hostnames.extend(hostnames);
                listener.routes.insert(name.clone(), node.clone());
            }
        }

        graph.routes.insert(name.clone(), node);
    }
}

fn ref_targets_gateway(
    parent_ref: &k8s::gateway::ParentReference,
    route_namespace: &str,
    gateway: Option<&NamespacedName>,
) -> bool {
    if parent_ref
        .kind
        .as_deref()
        .map_or(false, |kind| kind != "Gateway")
    {
        return false;
    }
    let Some(gateway) = gateway else {
        return false;
    };
    let namespace = parent_ref.namespace.as_deref().unwrap_or(route_namespace);
    namespace == gateway.namespace && parent_ref.name == gateway.name
}

/// Intersects the route's hostnames with the listener's. A listener without a
/// hostname accepts every route hostname; a route without hostnames inherits
/// the listener hostname, or the wildcard when the listener has none either.
fn accepted_hostnames(listener_hostname: Option<&str>, route_hostnames: &[String]) -> Vec<String> {
    let listener_hostname = listener_hostname.unwrap_or_default();

    if route_hostnames.is_empty() {
        let inherited = if listener_hostname.is_empty() {
            WILDCARD_HOSTNAME
        } else {
            listener_hostname
        };
        return vec![inherited.to_string()];
    }

    route_hostnames
        .iter()
        .filter(|hostname| listener_hostname.is_empty() || hostname.as_str() == listener_hostname)
        .cloned()
        .collect()
}

/// Extracts the backend Service of the rule's first backend ref, if one can
/// be extracted at all.
fn backend_service_for_rule(
    rule: &k8s::gateway::HttpRouteRule,
    route_namespace: &str,
) -> Option<BackendService> {
    let backend_ref = rule
        .backend_refs
        .as_deref()
        .unwrap_or_default()
        .first()?
        .backend_ref
        .as_ref()?;
    let reference = &backend_ref.inner;
    if reference
        .kind
        .as_deref()
        .map_or(false, |kind| kind != "Service")
    {
        return None;
    }
    let port = reference.port?;

    Some(BackendService {
        namespace: reference
            .namespace
            .clone()
            .unwrap_or_else(|| route_namespace.to_string()),
        name: reference.name.clone(),
        port: i32::from(port),
    })
}

/// Resolves the endpoints of every distinct backend Service used by an
/// attached route. Failures leave the backend in the map with no endpoints so
/// that its upstream still renders.
fn resolve_backends(graph: &mut Graph, services: &dyn ServiceStore, resolver: &dyn ServiceResolver) {
    let mut needed: Vec<&BackendService> = graph
        .routes
        .values()
        .filter(|route| !route.valid_section_refs.is_empty())
        .flat_map(|route| route.backend_services.values())
        .collect();
    needed.sort();
    needed.dedup();

    let mut backends = HashMap::with_capacity(needed.len());
    for backend in needed {
        let name = NamespacedName::new(&backend.namespace, &backend.name);
        let service = services.service(&name);
        match resolver.resolve(service.as_ref(), backend.port) {
            Ok(endpoints) => {
                backends.insert(backend.clone(), endpoints);
            }
            Err(error) => {
                tracing::warn!(service = %name, port = backend.port, %error, "failed to resolve backend endpoints");
                backends.insert(backend.clone(), Vec::new());
            }
        }
    }
    graph.backends = backends;
}
