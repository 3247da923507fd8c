use crate::{
    graph::{BackendService, Graph, ListenerNode},
    resolver::Endpoint,
};
use ahash::AHashMap as HashMap;
use gantry_k8s_api::gateway::{HttpRoute, HttpRouteMatch, ProtocolType};
use std::sync::Arc;

/// The hostname of the catch-all SSL server the data plane uses as its TLS
/// default.
pub const WILDCARD_HOSTNAME: &str = "~^";

/// The upstream name for a backend ref no Kubernetes Service could be
/// extracted from.
pub const INVALID_BACKEND_REF: &str = "invalid_backend_ref";

/// The data-plane view of the gateway: virtual servers, their routing rules,
/// and the upstreams the rules forward to. Emission order is deterministic.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Configuration {
    /// Virtual servers of HTTP listeners, sorted by hostname.
    pub http_servers: Vec<VirtualServer>,
    /// Virtual servers of HTTPS listeners, sorted by hostname with the
    /// wildcard catch-all last.
    pub ssl_servers: Vec<VirtualServer>,
    /// One upstream per distinct backend Service, sorted by name.
    pub upstreams: Vec<Upstream>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VirtualServer {
    pub hostname: String,
    /// Routing rules grouped by path, sorted by path.
    pub path_rules: Vec<PathRule>,
    pub ssl: Option<Ssl>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Ssl {
    pub certificate_path: String,
}

/// The routing rules sharing one path.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PathRule {
    pub path: String,
    pub match_rules: Vec<MatchRule>,
}

/// One match of one rule of an HTTPRoute, bound to the upstream its rule
/// forwards to.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchRule {
    /// Index into the rule's matches.
    pub match_idx: usize,
    /// Index into the route's rules.
    pub rule_idx: usize,
    pub upstream_name: String,
    pub source: Arc<HttpRoute>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Upstream {
    pub name: String,
    pub endpoints: Vec<Endpoint>,
}

impl MatchRule {
    /// Returns the HTTPRouteMatch this rule was generated from.
    pub fn http_match(&self) -> &HttpRouteMatch {
        let rules = self
            .source
            .spec
            .rules
            .as_ref()
            .expect("a match rule's source route has rules");
        let matches = rules[self.rule_idx]
            .matches
            .as_ref()
            .expect("a match rule's source rule has matches");
        &matches[self.match_idx]
    }
}

pub(crate) fn build_configuration(graph: &Graph) -> Configuration {
    let Some(gateway_class) = &graph.gateway_class else {
        return Configuration::default();
    };
    if !gateway_class.valid {
        return Configuration::default();
    }
    let Some(gateway) = &graph.gateway else {
        return Configuration::default();
    };

    let mut listeners: Vec<&ListenerNode> = gateway
        .listeners
        .values()
        .filter(|listener| listener.valid)
        .collect();
    listeners.sort_by(|a, b| a.source.name.cmp(&b.source.name));

    let mut builder = ConfigBuilder::default();
    for listener in listeners {
        builder.upsert_listener(listener);
    }

    let mut config = builder.build();
    config.upstreams = build_upstreams(&graph.backends);
    config
}

#[derive(Default)]
struct ConfigBuilder<'a> {
    http: VirtualServerBuilder<'a>,
    ssl: VirtualServerBuilder<'a>,
}

impl<'a> ConfigBuilder<'a> {
    fn upsert_listener(&mut self, listener: &'a ListenerNode) {
        match listener.source.protocol {
            ProtocolType::HTTP => self.http.upsert_listener(listener),
            ProtocolType::HTTPS => self.ssl.upsert_listener(listener),
            protocol => unreachable!("valid listeners are HTTP or HTTPS, got {protocol:?}"),
        }
    }

    fn build(self) -> Configuration {
        Configuration {
            http_servers: self.http.build(),
            ssl_servers: self.ssl.build(),
            upstreams: Vec::new(),
        }
    }
}

#[derive(Default)]
struct VirtualServerBuilder<'a> {
    /// hostname → path → rule.
    rules_per_host: HashMap<String, HashMap<String, PathRule>>,
    listeners_for_host: HashMap<String, &'a ListenerNode>,
    ssl_listeners: Vec<&'a ListenerNode>,
}

impl<'a> VirtualServerBuilder<'a> {
    fn upsert_listener(&mut self, listener: &'a ListenerNode) {
        if listener.source.protocol == ProtocolType::HTTPS {
            self.ssl_listeners.push(listener);
        }

        // Routes are visited in (namespace, name) order so that colliding
        // paths accumulate match rules deterministically.
        let mut route_names: Vec<_> = listener.routes.keys().collect();
        route_names.sort();

        for name in route_names {
            let route = listener
                .routes
                .get(name)
                .expect("iterating the listener's own routes");

            let route_hostnames = route.source.spec.hostnames.as_deref().unwrap_or_default();
            let hostnames: Vec<&str> = if route_hostnames.is_empty() {
                vec![listener_hostname(listener)]
            } else {
                route_hostnames
                    .iter()
                    .map(String::as_str)
                    .filter(|hostname| listener.accepted_hostnames.contains(*hostname))
                    .collect()
            };

            for hostname in hostnames {
                self.listeners_for_host.insert(hostname.to_string(), listener);
                let rules = self.rules_per_host.entry(hostname.to_string()).or_default();

                for (rule_idx, rule) in route.source.spec.rules.iter().flatten().enumerate() {
                    let backend = route
                        .backend_services
                        .get(&rule_idx)
                        .cloned()
                        .unwrap_or_default();
                    let upstream = upstream_name(&backend);

                    for (match_idx, http_match) in rule.matches.iter().flatten().enumerate() {
                        let path = match_path(http_match);
                        let path_rule = rules.entry(path.clone()).or_insert_with(|| PathRule {
                            path,
                            match_rules: Vec::new(),
                        });
                        path_rule.match_rules.push(MatchRule {
                            match_idx,
                            rule_idx,
                            upstream_name: upstream.clone(),
                            source: route.source.clone(),
                        });
                    }
                }
            }
        }
    }

    fn build(self) -> Vec<VirtualServer> {
        let mut servers = Vec::with_capacity(self.rules_per_host.len() + self.ssl_listeners.len() + 1);

        for (hostname, rules) in &self.rules_per_host {
            let listener = self
                .listeners_for_host
                .get(hostname)
                .expect("every hostname with rules has a listener");

            let mut path_rules: Vec<PathRule> = rules.values().cloned().collect();
            path_rules.sort_by(|a, b| a.path.cmp(&b.path));

            servers.push(VirtualServer {
                hostname: hostname.clone(),
                path_rules,
                ssl: ssl_of(listener),
            });
        }

        // TLS-terminating listeners whose own hostname serves no routes still
        // get a server, so the data plane can answer with their certificate.
        for listener in &self.ssl_listeners {
            let hostname = listener_hostname(listener);
            if !self.rules_per_host.contains_key(hostname) {
                servers.push(VirtualServer {
                    hostname: hostname.to_string(),
                    path_rules: Vec::new(),
                    ssl: ssl_of(listener),
                });
            }
        }

        // The TLS default server must always exist when TLS is served at all.
        if !self.ssl_listeners.is_empty()
            && !servers.iter().any(|server| server.hostname == WILDCARD_HOSTNAME)
        {
            servers.push(VirtualServer {
                hostname: WILDCARD_HOSTNAME.to_string(),
                path_rules: Vec::new(),
                ssl: ssl_of(self.ssl_listeners[0]),
            });
        }

        servers.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        servers
    }
}

fn ssl_of(listener: &ListenerNode) -> Option<Ssl> {
    if listener.secret_path.is_empty() {
        return None;
    }
    Some(Ssl {
        certificate_path: listener.secret_path.clone(),
    })
}

/// The hostname a listener serves when a route declares none: its own, or the
/// wildcard if it is unrestricted.
fn listener_hostname(listener: &ListenerNode) -> &str {
    match listener.source.hostname.as_deref() {
        Some(hostname) if !hostname.is_empty() => hostname,
        _ => WILDCARD_HOSTNAME,
    }
}

/// The path of a match; absent or empty paths default to `/`.
fn match_path(http_match: &HttpRouteMatch) -> String {
    match http_match.path.as_ref().and_then(|path| path.value.as_deref()) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => "/".to_string(),
    }
}

pub(crate) fn upstream_name(service: &BackendService) -> String {
    if service.name.is_empty() {
        return INVALID_BACKEND_REF.to_string();
    }
    format!("{}_{}_{}", service.namespace, service.name, service.port)
}

fn build_upstreams(backends: &HashMap<BackendService, Vec<Endpoint>>) -> Vec<Upstream> {
    let mut upstreams: Vec<Upstream> = backends
        .iter()
        .map(|(service, endpoints)| Upstream {
            name: upstream_name(service),
            endpoints: endpoints.clone(),
        })
        .collect();
    upstreams.sort_by(|a, b| a.name.cmp(&b.name));
    upstreams
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GatewayClassNode, GatewayNode, RouteNode};
    use crate::resource_id::NamespacedName;
    use ahash::AHashSet as HashSet;
    use gantry_k8s_api::gateway::{
        CommonRouteSpec, Gateway, GatewayClass, HttpPathMatch, HttpRouteRule, HttpRouteSpec,
        HttpRouteMatch, Listener, ParentReference,
    };
    use gantry_k8s_api::ObjectMeta;

    const SECRET_PATH: &str = "/etc/gantry/secrets/test_secret";

    fn mk_route(name: &str, hostname: &str, listener: &str, paths: &[&str]) -> Arc<HttpRoute> {
        let rules = paths
            .iter()
            .map(|path| HttpRouteRule {
                matches: Some(vec![HttpRouteMatch {
                    path: Some(HttpPathMatch {
                        value: Some(path.to_string()),
                        ..Default::default()
                    }),
                }]),
                ..Default::default()
            })
            .collect();
        Arc::new(HttpRoute {
            metadata: ObjectMeta {
                namespace: Some("test".into()),
                name: Some(name.into()),
                ..Default::default()
            },
            spec: HttpRouteSpec {
                inner: CommonRouteSpec {
                    parent_refs: Some(vec![ParentReference {
                        namespace: Some("test".into()),
                        name: "gateway".into(),
                        section_name: Some(listener.into()),
                        ..Default::default()
                    }]),
                },
                hostnames: Some(vec![hostname.into()]),
                rules: Some(rules),
            },
        })
    }

    fn mk_route_node(
        source: Arc<HttpRoute>,
        listener: &str,
        backends: &[(usize, BackendService)],
    ) -> Arc<RouteNode> {
        Arc::new(RouteNode {
            source,
            valid_section_refs: [listener.to_string()].into_iter().collect(),
            invalid_section_refs: HashMap::new(),
            backend_services: backends.iter().cloned().collect(),
        })
    }

    fn mk_listener_node(
        source: Listener,
        secret_path: &str,
        routes: &[(&str, Arc<RouteNode>)],
        hostnames: &[&str],
    ) -> ListenerNode {
        ListenerNode {
            source,
            valid: true,
            error: String::new(),
            secret_path: secret_path.into(),
            accepted_hostnames: hostnames.iter().map(|h| h.to_string()).collect::<HashSet<_>>(),
            routes: routes
                .iter()
                .map(|(name, route)| (NamespacedName::new("test", *name), route.clone()))
                .collect(),
        }
    }

    fn mk_graph(listeners: Vec<ListenerNode>, backends: &[(BackendService, Vec<Endpoint>)]) -> Graph {
        let mut graph = Graph {
            gateway_class: Some(GatewayClassNode {
                source: GatewayClass::default(),
                valid: true,
                error: String::new(),
            }),
            gateway: Some(GatewayNode {
                source: Gateway::default(),
                listeners: listeners
                    .into_iter()
                    .map(|listener| (listener.source.name.clone(), listener))
                    .collect(),
            }),
            ..Default::default()
        };
        graph.backends = backends.iter().cloned().collect();
        graph
    }

    fn http_listener() -> Listener {
        Listener {
            name: "listener-80-1".into(),
            port: 80,
            protocol: ProtocolType::HTTP,
            ..Default::default()
        }
    }

    fn https_listener(name: &str, hostname: Option<&str>) -> Listener {
        Listener {
            name: name.into(),
            hostname: hostname.map(Into::into),
            port: 443,
            protocol: ProtocolType::HTTPS,
            ..Default::default()
        }
    }

    fn foo_backend() -> BackendService {
        BackendService {
            namespace: "test".into(),
            name: "foo".into(),
            port: 80,
        }
    }

    fn foo_endpoints() -> Vec<Endpoint> {
        vec![Endpoint {
            address: "10.0.0.0".into(),
            port: 8080,
        }]
    }

    fn foo_upstream() -> Upstream {
        Upstream {
            name: "test_foo_80".into(),
            endpoints: foo_endpoints(),
        }
    }

    fn match_rule(match_idx: usize, rule_idx: usize, upstream: &str, source: &Arc<HttpRoute>) -> MatchRule {
        MatchRule {
            match_idx,
            rule_idx,
            upstream_name: upstream.into(),
            source: source.clone(),
        }
    }

    #[test]
    fn no_listeners_and_no_routes() {
        let graph = mk_graph(vec![], &[]);
        assert_eq!(build_configuration(&graph), Configuration::default());
    }

    #[test]
    fn http_listener_with_no_routes() {
        let graph = mk_graph(vec![mk_listener_node(http_listener(), "", &[], &[])], &[]);
        assert_eq!(build_configuration(&graph), Configuration::default());
    }

    #[test]
    fn https_listeners_with_no_routes() {
        let graph = mk_graph(
            vec![
                mk_listener_node(https_listener("listener-443-1", None), SECRET_PATH, &[], &[]),
                mk_listener_node(
                    https_listener("listener-443-with-hostname", Some("example.com")),
                    SECRET_PATH,
                    &[],
                    &[],
                ),
            ],
            &[],
        );

        let config = build_configuration(&graph);
        assert_eq!(config.http_servers, vec![]);
        assert_eq!(
            config.ssl_servers,
            vec![
                VirtualServer {
                    hostname: "example.com".into(),
                    path_rules: vec![],
                    ssl: Some(Ssl { certificate_path: SECRET_PATH.into() }),
                },
                VirtualServer {
                    hostname: WILDCARD_HOSTNAME.into(),
                    path_rules: vec![],
                    ssl: Some(Ssl { certificate_path: SECRET_PATH.into() }),
                },
            ],
        );
    }

    #[test]
    fn invalid_listener_is_skipped() {
        let hr = mk_route("https-hr-1", "foo.example.com", "invalid-listener", &["/"]);
        let node = mk_route_node(hr, "invalid-listener", &[(0, foo_backend())]);
        let mut listener = mk_listener_node(
            https_listener("invalid-listener", None),
            "",
            &[("https-hr-1", node)],
            &["foo.example.com"],
        );
        listener.valid = false;
        listener.error = "tls configuration is required for HTTPS listeners".into();

        let graph = mk_graph(vec![listener], &[]);
        assert_eq!(build_configuration(&graph), Configuration::default());
    }

    #[test]
    fn one_http_listener_with_two_routes_for_different_hostnames() {
        let hr1 = mk_route("hr-1", "foo.example.com", "listener-80-1", &["/"]);
        let hr2 = mk_route("hr-2", "bar.example.com", "listener-80-1", &["/"]);
        let listener = mk_listener_node(
            http_listener(),
            "",
            &[
                ("hr-1", mk_route_node(hr1.clone(), "listener-80-1", &[(0, foo_backend())])),
                ("hr-2", mk_route_node(hr2.clone(), "listener-80-1", &[(0, foo_backend())])),
            ],
            &["foo.example.com", "bar.example.com"],
        );
        let graph = mk_graph(vec![listener], &[(foo_backend(), foo_endpoints())]);

        let config = build_configuration(&graph);
        assert_eq!(
            config.http_servers,
            vec![
                VirtualServer {
                    hostname: "bar.example.com".into(),
                    path_rules: vec![PathRule {
                        path: "/".into(),
                        match_rules: vec![match_rule(0, 0, "test_foo_80", &hr2)],
                    }],
                    ssl: None,
                },
                VirtualServer {
                    hostname: "foo.example.com".into(),
                    path_rules: vec![PathRule {
                        path: "/".into(),
                        match_rules: vec![match_rule(0, 0, "test_foo_80", &hr1)],
                    }],
                    ssl: None,
                },
            ],
        );
        assert_eq!(config.ssl_servers, vec![]);
        assert_eq!(config.upstreams, vec![foo_upstream()]);
    }

    #[test]
    fn https_listener_with_invalid_backend_gets_catch_all() {
        let hr5 = mk_route("https-hr-5", "example.com", "listener-443-with-hostname", &["/"]);
        let listener = mk_listener_node(
            https_listener("listener-443-with-hostname", Some("example.com")),
            SECRET_PATH,
            // The route's only rule has no extractable backend.
            &[("https-hr-5", mk_route_node(hr5.clone(), "listener-443-with-hostname", &[]))],
            &["example.com"],
        );
        let graph = mk_graph(vec![listener], &[]);

        let config = build_configuration(&graph);
        assert_eq!(
            config.ssl_servers,
            vec![
                VirtualServer {
                    hostname: "example.com".into(),
                    path_rules: vec![PathRule {
                        path: "/".into(),
                        match_rules: vec![match_rule(0, 0, INVALID_BACKEND_REF, &hr5)],
                    }],
                    ssl: Some(Ssl { certificate_path: SECRET_PATH.into() }),
                },
                VirtualServer {
                    hostname: WILDCARD_HOSTNAME.into(),
                    path_rules: vec![],
                    ssl: Some(Ssl { certificate_path: SECRET_PATH.into() }),
                },
            ],
        );
    }

    #[test]
    fn colliding_paths_accumulate_match_rules_in_route_order() {
        let hr3 = mk_route("hr-3", "foo.example.com", "listener-80-1", &["/", "/third"]);
        let hr4 = mk_route("hr-4", "foo.example.com", "listener-80-1", &["/fourth", "/"]);
        let backends = &[(0, foo_backend()), (1, foo_backend())];
        let listener = mk_listener_node(
            http_listener(),
            "",
            &[
                ("hr-3", mk_route_node(hr3.clone(), "listener-80-1", backends)),
                ("hr-4", mk_route_node(hr4.clone(), "listener-80-1", backends)),
            ],
            &["foo.example.com"],
        );
        let graph = mk_graph(vec![listener], &[(foo_backend(), foo_endpoints())]);

        let config = build_configuration(&graph);
        assert_eq!(
            config.http_servers,
            vec![VirtualServer {
                hostname: "foo.example.com".into(),
                path_rules: vec![
                    PathRule {
                        path: "/".into(),
                        match_rules: vec![
                            match_rule(0, 0, "test_foo_80", &hr3),
                            match_rule(0, 1, "test_foo_80", &hr4),
                        ],
                    },
                    PathRule {
                        path: "/fourth".into(),
                        match_rules: vec![match_rule(0, 0, "test_foo_80", &hr4)],
                    },
                    PathRule {
                        path: "/third".into(),
                        match_rules: vec![match_rule(0, 1, "test_foo_80", &hr3)],
                    },
                ],
                ssl: None,
            }],
        );
        assert_eq!(config.upstreams, vec![foo_upstream()]);
    }

    #[test]
    fn invalid_gateway_class_yields_empty_configuration() {
        let mut graph = mk_graph(vec![mk_listener_node(http_listener(), "", &[], &[])], &[]);
        if let Some(gc) = graph.gateway_class.as_mut() {
            gc.valid = false;
            gc.error = "error".into();
        }
        assert_eq!(build_configuration(&graph), Configuration::default());
    }

    #[test]
    fn missing_gateway_class_or_gateway_yields_empty_configuration() {
        let mut graph = mk_graph(vec![], &[(foo_backend(), foo_endpoints())]);
        graph.gateway_class = None;
        assert_eq!(build_configuration(&graph), Configuration::default());

        let mut graph = mk_graph(vec![], &[(foo_backend(), foo_endpoints())]);
        graph.gateway = None;
        assert_eq!(build_configuration(&graph), Configuration::default());
    }

    #[test]
    fn match_path_defaults_to_root() {
        let with_value = |value: Option<&str>| HttpRouteMatch {
            path: Some(HttpPathMatch {
                value: value.map(Into::into),
                ..Default::default()
            }),
        };

        assert_eq!(match_path(&with_value(Some("/abc"))), "/abc");
        assert_eq!(match_path(&with_value(Some(""))), "/");
        assert_eq!(match_path(&with_value(None)), "/");
        assert_eq!(match_path(&HttpRouteMatch { path: None }), "/");
    }

    #[test]
    fn upstream_names() {
        assert_eq!(upstream_name(&BackendService::default()), INVALID_BACKEND_REF);
        assert_eq!(
            upstream_name(&BackendService {
                namespace: "test".into(),
                name: "foo".into(),
                port: 9090,
            }),
            "test_foo_9090",
        );
    }

    #[test]
    fn upstreams_are_sorted_and_keep_empty_endpoint_lists() {
        let backends = [
            (foo_backend(), foo_endpoints()),
            (
                BackendService {
                    namespace: "test".into(),
                    name: "bar".into(),
                    port: 8080,
                },
                vec![],
            ),
        ];
        let upstreams = build_upstreams(&backends.iter().cloned().collect());

        assert_eq!(
            upstreams,
            vec![
                Upstream { name: "test_bar_8080".into(), endpoints: vec![] },
                foo_upstream(),
            ],
        );
    }

    #[test]
    fn http_match_addresses_source_by_indices() {
        let hr = mk_route("hr-1", "foo.example.com", "listener-80-1", &["/path-1", "/path-2"]);

        let rule = match_rule(0, 1, "test_foo_80", &hr);
        let http_match = rule.http_match();
        assert_eq!(http_match.path.as_ref().unwrap().value.as_deref(), Some("/path-2"));
    }
}
