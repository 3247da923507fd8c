//! Gateway API v1beta1 resources, restricted to the fields this controller
//! reads.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// GatewayClass describes a class of Gateways available to the user for
/// creating Gateway resources. Each GatewayClass names the controller that
/// manages Gateways of that class.
#[derive(Clone, Debug, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1beta1",
    kind = "GatewayClass"
)]
#[kube(derive = "Default")]
#[kube(derive = "PartialEq")]
#[derive(Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayClassSpec {
    /// The name of the controller managing Gateways of this class.
    pub controller_name: String,

    pub description: Option<String>,
}

/// Gateway represents an instance of a service-traffic handling
/// infrastructure: a set of listeners bound to addresses.
#[derive(Clone, Debug, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1beta1",
    kind = "Gateway",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(derive = "PartialEq")]
#[derive(Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    /// The name of the GatewayClass this Gateway belongs to.
    pub gateway_class_name: String,

    /// The listeners exposed by this Gateway, keyed by unique section name.
    pub listeners: Vec<Listener>,
}

/// A logical endpoint on a Gateway: a port, a protocol, an optional hostname
/// restriction, and optional TLS configuration.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Listener {
    /// Name is the section name used by routes to attach to this listener.
    pub name: String,

    /// Hostname restricts the virtual hosts served by this listener. An
    /// absent hostname matches all hostnames.
    pub hostname: Option<String>,

    pub port: u16,

    pub protocol: ProtocolType,

    /// TLS configuration; required when the protocol is HTTPS.
    pub tls: Option<GatewayTlsConfig>,
}

#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize, JsonSchema,
)]
pub enum ProtocolType {
    #[default]
    HTTP,
    HTTPS,
    TCP,
    TLS,
    UDP,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewayTlsConfig {
    pub mode: Option<TlsModeType>,

    /// References to the Secrets holding the server certificates.
    pub certificate_refs: Option<Vec<SecretObjectReference>>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
pub enum TlsModeType {
    Terminate,
    Passthrough,
}

/// A reference to a Secret, typically holding TLS material.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretObjectReference {
    pub group: Option<String>,
    pub kind: Option<String>,
    pub name: String,
    /// Namespace of the referent; defaults to the local namespace.
    pub namespace: Option<String>,
}

/// HTTPRoute provides a way to route HTTP requests, matched by hostname and
/// path, to backend Services.
#[derive(Clone, Debug, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1beta1",
    kind = "HTTPRoute",
    root = "HttpRoute",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(derive = "PartialEq")]
#[derive(Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteSpec {
    /// Common route information.
    #[serde(flatten)]
    pub inner: CommonRouteSpec,

    /// Hostnames to match against the HTTP Host header.
    pub hostnames: Option<Vec<String>>,

    /// Rules are a list of HTTP matchers and actions.
    pub rules: Option<Vec<HttpRouteRule>>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommonRouteSpec {
    /// ParentRefs declare the Gateway listeners this route attaches to.
    pub parent_refs: Option<Vec<ParentReference>>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParentReference {
    pub group: Option<String>,
    pub kind: Option<String>,
    /// Namespace of the referent; defaults to the route's namespace.
    pub namespace: Option<String>,
    pub name: String,
    /// SectionName is the name of a listener within the target Gateway.
    pub section_name: Option<String>,
    pub port: Option<u16>,
}

/// A single matching and forwarding rule of an HTTPRoute.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteRule {
    /// Conditions for matching requests against this rule; the rule matches
    /// if any one of them is satisfied.
    pub matches: Option<Vec<HttpRouteMatch>>,

    /// Backends that matching requests should be sent to.
    pub backend_refs: Option<Vec<HttpBackendRef>>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteMatch {
    pub path: Option<HttpPathMatch>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpPathMatch {
    pub r#type: Option<PathMatchType>,
    pub value: Option<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
pub enum PathMatchType {
    Exact,
    PathPrefix,
    RegularExpression,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpBackendRef {
    #[serde(flatten)]
    pub backend_ref: Option<BackendRef>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackendRef {
    /// Proportion of traffic forwarded to the referent; unused while only the
    /// first backend ref of a rule is consumed.
    pub weight: Option<i32>,

    #[serde(flatten)]
    pub inner: BackendObjectReference,
}

/// A reference to a backend object, by default a Service.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackendObjectReference {
    pub group: Option<String>,
    pub kind: Option<String>,
    pub name: String,
    /// Namespace of the referent; defaults to the route's namespace.
    pub namespace: Option<String>,
    /// The Service port to forward to.
    pub port: Option<u16>,
}
