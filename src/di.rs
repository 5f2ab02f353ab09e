//! Dependency-injection container (spec §4.8). The source treats DI
//! internals as an out-of-scope black box, but SPEC_FULL §1 brings
//! resolution scopes into scope since the dispatcher must actually call
//! something concrete. Not grounded on a `chopin` file (the teacher has no
//! DI layer); authored fresh using the same `Arc<dyn Any>` downcasting
//! idiom the teacher's `http.rs::RequestContext`-equivalent would use, with
//! `once_cell` and `dashmap` doing the concurrency work the spec calls for.

use crate::error::{DiError, ForgewebResult};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Singleton,
    Request,
    Transient,
}

type AnyArc = Arc<dyn Any + Send + Sync>;
type Constructor = Arc<dyn Fn(&Container, &mut RequestScope) -> ForgewebResult<AnyArc> + Send + Sync>;

struct ServiceDef {
    scope: Scope,
    constructor: Constructor,
}

thread_local! {
    static RESOLUTION_STACK: RefCell<Vec<String>> = RefCell::new(Vec::new());
}

/// Per-request instance cache, created at request start and dropped at
/// response completion (spec §4.8's request-scope lifetime).
#[derive(Default)]
pub struct RequestScope {
    instances: HashMap<String, AnyArc>,
}

impl RequestScope {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Service registry. Route handlers and middleware resolve dependencies
/// through this by name; construction is serialized per singleton via
/// `OnceCell`, which blocks concurrent first-resolvers on the same cell
/// rather than racing them (spec §4.8's "construction is serialized").
pub struct Container {
    defs: HashMap<String, ServiceDef>,
    singletons: DashMap<String, Arc<OnceCell<AnyArc>>>,
}

impl Container {
    pub fn new() -> Self {
        Self {
            defs: HashMap::new(),
            singletons: DashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, scope: Scope, constructor: F)
    where
        F: Fn(&Container, &mut RequestScope) -> ForgewebResult<AnyArc> + Send + Sync + 'static,
    {
        self.defs.insert(
            name.into(),
            ServiceDef {
                scope,
                constructor: Arc::new(constructor),
            },
        );
    }

    /// Resolves a named service, downcasting to `T`. `req_scope` is `None`
    /// when resolving outside of a request (e.g. at startup); resolving a
    /// request-scoped service without one is a construction failure.
    pub fn resolve<T: Any + Send + Sync>(
        &self,
        name: &str,
        req_scope: &mut RequestScope,
    ) -> ForgewebResult<Arc<T>> {
        let any = self.resolve_any(name, req_scope)?;
        any.downcast::<T>().map_err(|_| {
            DiError::ServiceConstructionFailed {
                name: name.to_string(),
                reason: "resolved instance is not of the requested type".to_string(),
            }
            .into()
        })
    }

    fn resolve_any(&self, name: &str, req_scope: &mut RequestScope) -> ForgewebResult<AnyArc> {
        let cycle = RESOLUTION_STACK.with(|stack| stack.borrow().iter().any(|s| s == name));
        if cycle {
            return Err(DiError::CyclicDependency(name.to_string()).into());
        }

        let def = self
            .defs
            .get(name)
            .ok_or_else(|| DiError::UnknownService(name.to_string()))?;

        RESOLUTION_STACK.with(|stack| stack.borrow_mut().push(name.to_string()));
        let result = self.resolve_scoped(name, def, req_scope);
        RESOLUTION_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
        result
    }

    fn resolve_scoped(
        &self,
        name: &str,
        def: &ServiceDef,
        req_scope: &mut RequestScope,
    ) -> ForgewebResult<AnyArc> {
        match def.scope {
            Scope::Transient => (def.constructor)(self, req_scope),
            Scope::Request => {
                if let Some(existing) = req_scope.instances.get(name) {
                    return Ok(existing.clone());
                }
                let instance = (def.constructor)(self, req_scope)?;
                req_scope
                    .instances
                    .insert(name.to_string(), instance.clone());
                Ok(instance)
            }
            Scope::Singleton => {
                let cell = self
                    .singletons
                    .entry(name.to_string())
                    .or_insert_with(|| Arc::new(OnceCell::new()))
                    .clone();
                cell.get_or_try_init(|| (def.constructor)(self, req_scope))
                    .cloned()
            }
        }
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn singleton_constructs_exactly_once() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let mut container = Container::new();
        container.register("counter", Scope::Singleton, |_c, _scope| {
            CALLS.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(42i32) as AnyArc)
        });

        let mut scope = RequestScope::new();
        let a: Arc<i32> = container.resolve("counter", &mut scope).unwrap();
        let b: Arc<i32> = container.resolve("counter", &mut scope).unwrap();
        assert_eq!(*a, 42);
        assert_eq!(*b, 42);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn transient_constructs_every_time() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let mut container = Container::new();
        container.register("id", Scope::Transient, |_c, _scope| {
            let n = CALLS.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(n) as AnyArc)
        });

        let mut scope = RequestScope::new();
        let a: Arc<usize> = container.resolve("id", &mut scope).unwrap();
        let b: Arc<usize> = container.resolve("id", &mut scope).unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn request_scoped_is_cached_within_one_scope_only() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let mut container = Container::new();
        container.register("req", Scope::Request, |_c, _scope| {
            let n = CALLS.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(n) as AnyArc)
        });

        let mut scope1 = RequestScope::new();
        let a: Arc<usize> = container.resolve("req", &mut scope1).unwrap();
        let b: Arc<usize> = container.resolve("req", &mut scope1).unwrap();
        assert_eq!(*a, *b);

        let mut scope2 = RequestScope::new();
        let c: Arc<usize> = container.resolve("req", &mut scope2).unwrap();
        assert_ne!(*a, *c);
    }

    #[test]
    fn unknown_service_is_reported() {
        let container = Container::new();
        let mut scope = RequestScope::new();
        let result: ForgewebResult<Arc<i32>> = container.resolve("missing", &mut scope);
        assert!(matches!(
            result,
            Err(crate::error::ForgewebError::Di(DiError::UnknownService(_)))
        ));
    }

    #[test]
    fn cyclic_dependency_is_detected() {
        let mut container = Container::new();
        container.register("a", Scope::Transient, |c, scope| {
            c.resolve::<i32>("b", scope)?;
            Ok(Arc::new(1i32) as AnyArc)
        });
        container.register("b", Scope::Transient, |c, scope| {
            c.resolve::<i32>("a", scope)?;
            Ok(Arc::new(2i32) as AnyArc)
        });

        let mut scope = RequestScope::new();
        let result: ForgewebResult<Arc<i32>> = container.resolve("a", &mut scope);
        assert!(matches!(
            result,
            Err(crate::error::ForgewebError::Di(DiError::CyclicDependency(_)))
        ));
    }
}
