use crate::resource_id::NamespacedName;
use anyhow::{anyhow, bail, Result};
use gantry_k8s_api::{self as k8s, discovery, IntOrString};
use std::sync::Arc;

/// An upstream endpoint address.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Endpoint {
    pub address: String,
    pub port: i32,
}

/// Read access to Service specs, typically backed by an informer cache.
pub trait ServiceStore: Send + Sync {
    fn service(&self, name: &NamespacedName) -> Option<k8s::Service>;
}

/// Lists the EndpointSlices owned by a Service, typically backed by an
/// informer cache index on the `kubernetes.io/service-name` label.
pub trait EndpointSliceIndex: Send + Sync {
    fn endpoint_slices_for_service(&self, service: &NamespacedName)
        -> Vec<discovery::EndpointSlice>;
}

/// Resolves a Service and service port to the ready endpoints backing it.
pub trait ServiceResolver: Send + Sync {
    /// Returns one endpoint per ready address listening on the Service's
    /// target port. Fails when the Service is absent, no EndpointSlices exist
    /// for it, the port has no target, or no address survives filtering.
    fn resolve(&self, service: Option<&k8s::Service>, svc_port: i32) -> Result<Vec<Endpoint>>;
}

/// The in-process [`ServiceResolver`]: enumerates ready IPv4 addresses from
/// the EndpointSlices of an [`EndpointSliceIndex`].
pub struct EndpointSliceResolver {
    slices: Arc<dyn EndpointSliceIndex>,
}

impl EndpointSliceResolver {
    pub fn new(slices: Arc<dyn EndpointSliceIndex>) -> Self {
        Self { slices }
    }
}

impl ServiceResolver for EndpointSliceResolver {
    fn resolve(&self, service: Option<&k8s::Service>, svc_port: i32) -> Result<Vec<Endpoint>> {
        let service = service.ok_or_else(|| anyhow!("cannot resolve a nil Service"))?;
        let name = NamespacedName::of(service);

        let slices = self.slices.endpoint_slices_for_service(&name);
        if slices.is_empty() {
            bail!("no endpoints found for Service {name}");
        }

        resolve_endpoints(service, svc_port, &slices)
    }
}

fn resolve_endpoints(
    service: &k8s::Service,
    svc_port: i32,
    slices: &[discovery::EndpointSlice],
) -> Result<Vec<Endpoint>> {
    let target_port = target_port_for(service, svc_port)?;

    // Pre-size the output so enumeration never reallocates.
    let capacity = endpoint_capacity(slices, target_port);
    if capacity == 0 {
        bail!(
            "no valid endpoints found for Service {} and port {svc_port}",
            NamespacedName::of(service),
        );
    }

    let mut endpoints = Vec::with_capacity(capacity);
    for slice in slices {
        if ignore_endpoint_slice(slice, target_port) {
            continue;
        }
        for endpoint in slice.endpoints.iter().filter(|ep| endpoint_ready(ep)) {
            for address in &endpoint.addresses {
                endpoints.push(Endpoint {
                    address: address.clone(),
                    port: target_port,
                });
            }
        }
    }

    Ok(endpoints)
}

/// Maps the service port to its target port. A named target port is read as
/// its integer form; an unparsable name counts as no target, like the zero
/// port.
fn target_port_for(service: &k8s::Service, svc_port: i32) -> Result<i32> {
    let ports = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_deref())
        .unwrap_or_default();

    for port in ports {
        if port.port != svc_port {
            continue;
        }
        let target = match &port.target_port {
            Some(IntOrString::Int(value)) => *value,
            Some(IntOrString::String(value)) => value.parse().unwrap_or(0),
            None => 0,
        };
        if target != 0 {
            return Ok(target);
        }
        break;
    }

    bail!(
        "no matching target port for Service {} and port {svc_port}",
        NamespacedName::of(service),
    )
}

fn ignore_endpoint_slice(slice: &discovery::EndpointSlice, target_port: i32) -> bool {
    slice.address_type != "IPv4" || !target_port_exists(slice.ports.as_deref(), target_port)
}

fn target_port_exists(ports: Option<&[discovery::EndpointPort]>, target_port: i32) -> bool {
    ports
        .unwrap_or_default()
        .iter()
        .any(|port| port.port == Some(target_port))
}

fn endpoint_ready(endpoint: &discovery::Endpoint) -> bool {
    endpoint
        .conditions
        .as_ref()
        .and_then(|conditions| conditions.ready)
        .unwrap_or(false)
}

fn endpoint_capacity(slices: &[discovery::EndpointSlice], target_port: i32) -> usize {
    slices
        .iter()
        .filter(|slice| !ignore_endpoint_slice(slice, target_port))
        .flat_map(|slice| &slice.endpoints)
        .filter(|endpoint| endpoint_ready(endpoint))
        .map(|endpoint| endpoint.addresses.len())
        .sum()
}
