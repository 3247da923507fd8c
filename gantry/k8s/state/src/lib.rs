//! The gantry state-graph engine.
//!
//! The engine turns a stream of Kubernetes resource change events into the
//! data-plane configuration of a Gateway API HTTP gateway. It watches nothing
//! itself: an external watch layer feeds it capture calls and asks it to
//! process, and an external renderer consumes what processing returns.
//!
//! ```text
//! watcher ──capture──▶ [ ChangeProcessor ]──▶ store + relationships
//!                             │ process()
//!                             ▼
//!                       [ graph build ] ──▶ Configuration + Statuses
//! ```
//!
//! A capture records the resource in the store, maintains the inverted
//! route/Service/EndpointSlice indexes, and decides whether the event is
//! semantically relevant (new generation, referenced Service, owned
//! EndpointSlice). Processing then validates the store into a graph (class
//! and Gateway election, listener validation, route binding, endpoint
//! resolution) and flattens that graph into a deterministic [`Configuration`]
//! for the data plane together with [`Statuses`] attributing
//! acceptance back to each resource.

#![forbid(unsafe_code)]

mod change_processor;
mod configuration;
mod graph;
mod object;
mod relationship;
mod resolver;
mod resource_id;
mod secrets;
mod statuses;
mod store;

pub use self::change_processor::{ChangeProcessor, ChangeProcessorConfig};
pub use self::configuration::{
    Configuration, MatchRule, PathRule, Ssl, Upstream, VirtualServer, INVALID_BACKEND_REF,
    WILDCARD_HOSTNAME,
};
pub use self::graph::RejectionReason;
pub use self::object::{Object, ResourceKind};
pub use self::relationship::Capturer;
pub use self::resolver::{
    Endpoint, EndpointSliceIndex, EndpointSliceResolver, ServiceResolver, ServiceStore,
};
pub use self::resource_id::NamespacedName;
pub use self::secrets::SecretMaterializer;
pub use self::statuses::{
    GatewayClassStatus, HttpRouteStatus, ListenerStatus, ParentStatus, Statuses,
};
