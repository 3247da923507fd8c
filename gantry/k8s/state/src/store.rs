use crate::resource_id::NamespacedName;
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use gantry_k8s_api as k8s;

/// The last-seen spec of every resource the engine cares about.
///
/// Pure data; the change processor owns it and is its only writer. A graph
/// build reads a stable snapshot because the processor holds its lock across
/// the build.
#[derive(Debug, Default)]
pub(crate) struct Store {
    /// At most one GatewayClass: the one named by the controller config.
    pub(crate) gateway_class: Option<k8s::gateway::GatewayClass>,

    pub(crate) gateways: HashMap<NamespacedName, k8s::gateway::Gateway>,

    pub(crate) http_routes: HashMap<NamespacedName, k8s::gateway::HttpRoute>,

    /// Backend Services referenced by stored routes, keyed to the referencing
    /// routes. An entry exists iff at least one route references the Service.
    pub(crate) services: HashMap<NamespacedName, HashSet<NamespacedName>>,

    pub(crate) endpoint_slices: HashMap<NamespacedName, k8s::discovery::EndpointSlice>,

    pub(crate) secrets: HashMap<NamespacedName, k8s::Secret>,
}
