//! Route table: ordered endpoint registrations with startup-time validation.

use http::Method;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use super::pattern::RoutePattern;
use crate::dispatcher::Endpoint;
use crate::server::RequestContext;

/// Guard evaluated against the request before an endpoint handler runs.
/// Returning `false` surfaces a Forbidden error through error handling.
pub type ActivationPredicate = Arc<dyn Fn(&RequestContext) -> bool + Send + Sync>;

/// Which kind of path failed validation; used in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Route,
    Endpoint,
    Hook,
}

impl fmt::Display for PathKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathKind::Route => write!(f, "route"),
            PathKind::Endpoint => write!(f, "endpoint"),
            PathKind::Hook => write!(f, "hook"),
        }
    }
}

/// Startup-time registration failures. These abort server construction and
/// are never produced during request processing.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("invalid {kind} path `{path}`: {reason}")]
    InvalidPathSyntax {
        kind: PathKind,
        path: String,
        reason: String,
    },
    #[error(
        "duplicate endpoints for `{full_path}`: `{first}` ({first_methods}) \
         conflicts with `{second}` ({second_methods})"
    )]
    DuplicateRoute {
        full_path: String,
        first: String,
        first_methods: String,
        second: String,
        second_methods: String,
    },
}

/// The HTTP methods an endpoint accepts: an explicit list, or every method.
#[derive(Clone, Debug)]
pub enum MethodSet {
    /// Accept any HTTP method. Conflicts with every other registration on
    /// the same path.
    All,
    /// Accept exactly these methods.
    Only(Vec<Method>),
}

impl MethodSet {
    /// Accept every method.
    #[must_use]
    pub fn all() -> Self {
        MethodSet::All
    }

    /// Accept a single method.
    #[must_use]
    pub fn single(method: Method) -> Self {
        MethodSet::Only(vec![method])
    }

    /// Accept each of the given methods.
    #[must_use]
    pub fn only<I: IntoIterator<Item = Method>>(methods: I) -> Self {
        MethodSet::Only(methods.into_iter().collect())
    }

    /// Whether a request with this method is accepted.
    #[must_use]
    pub fn contains(&self, method: &Method) -> bool {
        match self {
            MethodSet::All => true,
            MethodSet::Only(methods) => methods.contains(method),
        }
    }

    /// Whether two sets accept any method in common. `All` intersects
    /// everything, including another `All`.
    #[must_use]
    pub fn intersects(&self, other: &MethodSet) -> bool {
        match (self, other) {
            (MethodSet::All, _) | (_, MethodSet::All) => true,
            (MethodSet::Only(a), MethodSet::Only(b)) => a.iter().any(|m| b.contains(m)),
        }
    }
}

impl fmt::Display for MethodSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodSet::All => write!(f, "ALL"),
            MethodSet::Only(methods) => {
                for (i, m) in methods.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{m}")?;
                }
                Ok(())
            }
        }
    }
}

/// Registration-time description of one endpoint: its local path, accepted
/// methods, optional activation guard and the handler entry point.
///
/// This is the configuration struct handed to
/// [`RouteTable::add_route`] / [`RouteTable::add_endpoint`]; all metadata is
/// attached explicitly at startup rather than to the handler itself.
#[derive(Clone)]
pub struct EndpointDef {
    pub name: String,
    pub path: String,
    pub methods: MethodSet,
    pub can_activate: Option<ActivationPredicate>,
    pub handler: Arc<dyn Endpoint>,
}

impl EndpointDef {
    pub fn new(
        name: &str,
        path: &str,
        methods: MethodSet,
        handler: impl Endpoint + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            methods,
            can_activate: None,
            handler: Arc::new(handler),
        }
    }

    /// Attach an activation guard. A request for which the guard returns
    /// `false` is rejected with a Forbidden error instead of reaching the
    /// handler.
    #[must_use]
    pub fn with_can_activate(
        mut self,
        predicate: impl Fn(&RequestContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.can_activate = Some(Arc::new(predicate));
        self
    }
}

/// A validated, immutable entry in the route table.
pub struct EndpointRegistration {
    pub name: String,
    /// The prefix this endpoint was registered under (`/` for standalone
    /// endpoints).
    pub route_path: String,
    /// The endpoint's own path below the prefix.
    pub local_path: String,
    /// `route_path + local_path`; always starts with `/`, never ends with one.
    pub full_path: String,
    pub methods: MethodSet,
    pub(crate) pattern: RoutePattern,
    pub can_activate: Option<ActivationPredicate>,
    pub handler: Arc<dyn Endpoint>,
}

/// Insertion-ordered collection of endpoint registrations.
///
/// Built once at startup and shared read-only by every in-flight request.
/// Every insertion re-validates the whole table for (path, method)
/// uniqueness; [`RouteTable::add_route`] defers the scan to the end of the
/// batch.
#[derive(Default)]
pub struct RouteTable {
    endpoints: Vec<Arc<EndpointRegistration>>,
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a group of endpoints under a shared path prefix.
    ///
    /// The prefix and each endpoint path must start with a slash and must not
    /// end with one; the resulting full paths must not collide with any
    /// registration already in the table.
    ///
    /// # Errors
    ///
    /// [`RouterError::InvalidPathSyntax`] for slash violations or an invalid
    /// regex segment, [`RouterError::DuplicateRoute`] when two registrations
    /// share a full path and their method sets intersect.
    pub fn add_route(
        &mut self,
        route_path: &str,
        endpoints: Vec<EndpointDef>,
    ) -> Result<(), RouterError> {
        check_slashes(route_path, PathKind::Route)?;
        for def in endpoints {
            check_slashes(&def.path, PathKind::Endpoint)?;
            let full_path = format!("{route_path}{}", def.path);
            self.push_registration(route_path, full_path, def)?;
        }
        self.verify_unique()
    }

    /// Register a standalone endpoint, attached directly at the `/` root.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`RouteTable::add_route`].
    pub fn add_endpoint(&mut self, def: EndpointDef) -> Result<(), RouterError> {
        check_slashes(&def.path, PathKind::Endpoint)?;
        let full_path = def.path.clone();
        self.push_registration("/", full_path, def)?;
        self.verify_unique()
    }

    fn push_registration(
        &mut self,
        route_path: &str,
        full_path: String,
        def: EndpointDef,
    ) -> Result<(), RouterError> {
        let pattern =
            RoutePattern::parse(&full_path).map_err(|err| RouterError::InvalidPathSyntax {
                kind: PathKind::Endpoint,
                path: full_path.clone(),
                reason: err.to_string(),
            })?;

        info!(
            endpoint = %def.name,
            full_path = %full_path,
            methods = %def.methods,
            total_endpoints = self.endpoints.len() + 1,
            "Endpoint registered"
        );

        self.endpoints.push(Arc::new(EndpointRegistration {
            name: def.name,
            route_path: route_path.to_string(),
            local_path: def.path,
            full_path,
            methods: def.methods,
            pattern,
            can_activate: def.can_activate,
            handler: def.handler,
        }));
        Ok(())
    }

    /// Scan every pair of registrations for a shared full path with
    /// intersecting method sets. O(n²) over the table; n is the number of
    /// endpoints registered at startup, not a per-request quantity.
    fn verify_unique(&self) -> Result<(), RouterError> {
        for (i, a) in self.endpoints.iter().enumerate() {
            for b in &self.endpoints[i + 1..] {
                if a.full_path == b.full_path && a.methods.intersects(&b.methods) {
                    return Err(RouterError::DuplicateRoute {
                        full_path: a.full_path.clone(),
                        first: a.name.clone(),
                        first_methods: a.methods.to_string(),
                        second: b.name.clone(),
                        second_methods: b.methods.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Resolve the registrations matching a request, in insertion order.
    ///
    /// An empty result is the normal not-found outcome, handled by the
    /// caller; it is never a table-level failure.
    #[must_use]
    pub fn resolve(&self, method: &Method, path: &str) -> Vec<Arc<EndpointRegistration>> {
        self.endpoints
            .iter()
            .filter(|ep| ep.methods.contains(method) && ep.pattern.matches(path))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Print all registered endpoints to stdout. Useful for verifying a
    /// table at startup.
    pub fn dump_routes(&self) {
        println!("[routes] count={}", self.endpoints.len());
        for ep in &self.endpoints {
            println!("[route] {} {} -> {}", ep.methods, ep.full_path, ep.name);
        }
    }
}

/// Paths must start with a slash and must not end with one.
fn check_slashes(path: &str, kind: PathKind) -> Result<(), RouterError> {
    if !path.starts_with('/') {
        return Err(RouterError::InvalidPathSyntax {
            kind,
            path: path.to_string(),
            reason: format!("{kind} paths must start with a slash"),
        });
    }
    if path.ends_with('/') {
        return Err(RouterError::InvalidPathSyntax {
            kind,
            path: path.to_string(),
            reason: format!("{kind} paths cannot end with a slash"),
        });
    }
    Ok(())
}
