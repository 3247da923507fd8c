//! Kubernetes API types consumed by the gantry control plane.
//!
//! This crate is a thin veneer: it re-exports the core and discovery types the
//! engine reads and declares the Gateway API v1beta1 resources the controller
//! manages. Keeping every Kubernetes type behind one crate pins the
//! `k8s-openapi`/`kube` pairing in a single place.

#![forbid(unsafe_code)]

pub mod gateway;

pub use k8s_openapi::{
    api::core::v1::{Secret, Service, ServicePort, ServiceSpec},
    apimachinery::pkg::{
        apis::meta::v1::{ObjectMeta, OwnerReference},
        util::intstr::IntOrString,
    },
};
pub use kube::{Resource, ResourceExt};

pub mod discovery {
    pub use k8s_openapi::api::discovery::v1::{
        Endpoint, EndpointConditions, EndpointPort, EndpointSlice,
    };
}

/// Returns the name of the Service owning the EndpointSlice, if any.
///
/// EndpointSlices produced by the endpoint slice controller carry exactly one
/// `Service` owner reference.
pub fn endpoint_slice_service_owner(slice: &discovery::EndpointSlice) -> Option<&str> {
    slice
        .metadata
        .owner_references
        .iter()
        .flatten()
        .find(|owner| owner.kind == "Service")
        .map(|owner| owner.name.as_str())
}
