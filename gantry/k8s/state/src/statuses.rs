use crate::{
    graph::{Graph, RejectionReason},
    resource_id::NamespacedName,
};
use ahash::AHashMap as HashMap;

/// Acceptance and validation state per input resource, derived from the same
/// graph as the Configuration returned alongside it. The external status
/// writer turns these into status subresource patches.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Statuses {
    pub gateway_class: Option<GatewayClassStatus>,
    /// Per-listener state of the elected Gateway, keyed by section name.
    pub listeners: HashMap<String, ListenerStatus>,
    pub http_routes: HashMap<NamespacedName, HttpRouteStatus>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GatewayClassStatus {
    pub valid: bool,
    pub error: String,
    pub observed_generation: Option<i64>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListenerStatus {
    pub valid: bool,
    pub error: String,
    pub attached_routes: usize,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HttpRouteStatus {
    /// Attachment state per parent ref, keyed by section name.
    pub parents: HashMap<String, ParentStatus>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParentStatus {
    pub attached: bool,
    pub reason: Option<RejectionReason>,
}

pub(crate) fn build_statuses(graph: &Graph) -> Statuses {
    let mut statuses = Statuses::default();

    if let Some(gateway_class) = &graph.gateway_class {
        statuses.gateway_class = Some(GatewayClassStatus {
            valid: gateway_class.valid,
            error: gateway_class.error.clone(),
            observed_generation: gateway_class.source.metadata.generation,
        });
    }

    if let Some(gateway) = &graph.gateway {
        for (name, listener) in &gateway.listeners {
            statuses.listeners.insert(
                name.clone(),
                ListenerStatus {
                    valid: listener.valid,
                    error: listener.error.clone(),
                    attached_routes: listener.routes.len(),
                },
            );
        }
    }

    for (name, route) in &graph.routes {
        let mut parents = HashMap::new();
        for section in &route.valid_section_refs {
            parents.insert(
                section.clone(),
                ParentStatus {
                    attached: true,
                    reason: None,
                },
            );
        }
        for (section, reason) in &route.invalid_section_refs {
            parents.insert(
                section.clone(),
                ParentStatus {
                    attached: false,
                    reason: Some(*reason),
                },
            );
        }
        statuses
            .http_routes
            .insert(name.clone(), HttpRouteStatus { parents });
    }

    statuses
}
