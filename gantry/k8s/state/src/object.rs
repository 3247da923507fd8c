use crate::resource_id::NamespacedName;
use gantry_k8s_api as k8s;

/// A resource the engine ingests, dispatched by kind.
///
/// The engine supports exactly these six kinds; anything else never reaches it
/// because it cannot be constructed.
#[derive(Clone, Debug)]
pub enum Object {
    GatewayClass(k8s::gateway::GatewayClass),
    Gateway(k8s::gateway::Gateway),
    HttpRoute(k8s::gateway::HttpRoute),
    Service(k8s::Service),
    EndpointSlice(k8s::discovery::EndpointSlice),
    Secret(k8s::Secret),
}

/// The kind tag of an [`Object`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ResourceKind {
    GatewayClass,
    Gateway,
    HttpRoute,
    Service,
    EndpointSlice,
    Secret,
}

impl Object {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Object::GatewayClass(_) => ResourceKind::GatewayClass,
            Object::Gateway(_) => ResourceKind::Gateway,
            Object::HttpRoute(_) => ResourceKind::HttpRoute,
            Object::Service(_) => ResourceKind::Service,
            Object::EndpointSlice(_) => ResourceKind::EndpointSlice,
            Object::Secret(_) => ResourceKind::Secret,
        }
    }

    pub fn name(&self) -> NamespacedName {
        match self {
            Object::GatewayClass(gc) => NamespacedName::of(gc),
            Object::Gateway(gw) => NamespacedName::of(gw),
            Object::HttpRoute(hr) => NamespacedName::of(hr),
            Object::Service(svc) => NamespacedName::of(svc),
            Object::EndpointSlice(slice) => NamespacedName::of(slice),
            Object::Secret(secret) => NamespacedName::of(secret),
        }
    }
}

impl From<k8s::gateway::GatewayClass> for Object {
    fn from(gc: k8s::gateway::GatewayClass) -> Self {
        Object::GatewayClass(gc)
    }
}

impl From<k8s::gateway::Gateway> for Object {
    fn from(gw: k8s::gateway::Gateway) -> Self {
        Object::Gateway(gw)
    }
}

impl From<k8s::gateway::HttpRoute> for Object {
    fn from(hr: k8s::gateway::HttpRoute) -> Self {
        Object::HttpRoute(hr)
    }
}

impl From<k8s::Service> for Object {
    fn from(svc: k8s::Service) -> Self {
        Object::Service(svc)
    }
}

impl From<k8s::discovery::EndpointSlice> for Object {
    fn from(slice: k8s::discovery::EndpointSlice) -> Self {
        Object::EndpointSlice(slice)
    }
}

impl From<k8s::Secret> for Object {
    fn from(secret: k8s::Secret) -> Self {
        Object::Secret(secret)
    }
}
