//! Session integration: runs code through an [`Executor`] and moves large
//! namespace variables out of process memory afterwards.
//!
//! - [`context`]: The cache + memory manager bundle
//! - [`classify`]: Streaming vs immediate mode
//! - [`lazy`]: Proxies that stand in for offloaded variables

pub mod classify;
pub mod context;
pub mod lazy;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use classify::{Classifier, ExecutionMode};
pub use context::CacheContext;
pub use lazy::LazyVariable;

use crate::value::Value;

/// A namespace slot: either a live value or a proxy for an offloaded one.
#[derive(Debug, Clone)]
pub enum Binding {
    Value(Value),
    Lazy(LazyVariable),
}

impl Binding {
    /// The bound value, loading lazily bound ones.
    pub fn get(&self) -> Option<&Value> {
        match self {
            Binding::Value(value) => Some(value),
            Binding::Lazy(lazy) => lazy.get(),
        }
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self, Binding::Lazy(_))
    }
}

/// Variables visible to executed code.
#[derive(Debug, Default)]
pub struct Namespace {
    bindings: BTreeMap<String, Binding>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Binding> {
        self.bindings.insert(name.into(), Binding::Value(value))
    }

    pub fn bind(&mut self, name: impl Into<String>, binding: Binding) -> Option<Binding> {
        self.bindings.insert(name.into(), binding)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)?.get()
    }

    pub fn binding(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Binding> {
        self.bindings.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Runs code against a namespace.
pub trait Executor {
    fn execute(&mut self, code: &str, namespace: &mut Namespace, mode: ExecutionMode) -> anyhow::Result<()>;
}

impl<F> Executor for F
where
    F: FnMut(&str, &mut Namespace, ExecutionMode) -> anyhow::Result<()>,
{
    fn execute(&mut self, code: &str, namespace: &mut Namespace, mode: ExecutionMode) -> anyhow::Result<()> {
        self(code, namespace, mode)
    }
}

/// What one [`Session::execute`] call did.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub mode: ExecutionMode,
    pub pressure_before: bool,
    pub gc_forced: bool,
    /// Variables moved into the cache.
    pub cached: Vec<String>,
    /// Variables the cache refused that went to spill files instead.
    pub spilled: Vec<String>,
    pub gc_after: bool,
    pub elapsed_ms: f64,
}

pub struct Session<E> {
    context: CacheContext,
    classifier: Classifier,
    executor: E,
    namespace: Namespace,
    skip_prefixes: Vec<String>,
    executions: u64,
}

impl<E: Executor> Session<E> {
    pub fn new(context: CacheContext, executor: E) -> Self {
        let session = &context.config().session;
        Self {
            classifier: Classifier::new(session),
            skip_prefixes: session.skip_prefixes.clone(),
            context,
            executor,
            namespace: Namespace::new(),
            executions: 0,
        }
    }

    /// Run `code`, then offload large variables.
    ///
    /// Only executor errors are returned; cache and memory failures are
    /// logged and leave variables in place.
    pub fn execute(&mut self, code: &str) -> anyhow::Result<ExecutionReport> {
        let started = Instant::now();
        self.executions += 1;
        let memory = Arc::clone(self.context.memory());

        let (pressure_before, stats) = memory.check_memory_pressure();
        let gc_forced = pressure_before && memory.trigger_gc_if_needed(true);
        if gc_forced {
            info!(rss_mb = stats.rss_mb, "Reclaimed memory before execution");
        }

        let mode = self.classifier.classify(code);
        debug!(execution = self.executions, ?mode, "Executing");
        self.executor.execute(code, &mut self.namespace, mode)?;

        let (cached, spilled) = self.offload_large_variables();
        let gc_after = memory.trigger_gc_if_needed(false);

        Ok(ExecutionReport {
            mode,
            pressure_before,
            gc_forced,
            cached,
            spilled,
            gc_after,
            elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    /// Replace every large value binding with a lazy proxy.
    fn offload_large_variables(&mut self) -> (Vec<String>, Vec<String>) {
        let memory = Arc::clone(self.context.memory());
        let candidates: Vec<String> = self
            .namespace
            .bindings
            .iter()
            .filter(|(name, _)| !self.skip_prefixes.iter().any(|p| name.starts_with(p.as_str())))
            .filter_map(|(name, binding)| match binding {
                Binding::Value(value) if memory.should_spill(value, name) => Some(name.clone()),
                _ => None,
            })
            .collect();

        let mut cached = Vec::new();
        let mut spilled = Vec::new();
        for name in candidates {
            let Some(Binding::Value(value)) = self.namespace.bindings.get(&name) else {
                continue;
            };

            let key = format!("var:{name}:{}", Uuid::new_v4().simple());
            let stored = self.context.cache().lock().put(&key, value, None);
            let proxy = if stored {
                cached.push(name.clone());
                LazyVariable::cached(&name, key, Arc::downgrade(self.context.cache()))
            } else {
                match memory.spill_to_disk(value, &name) {
                    Some(handle) => {
                        spilled.push(name.clone());
                        LazyVariable::spilled(&name, handle)
                    }
                    None => {
                        warn!(name = %name, "Could not offload variable, keeping it in memory");
                        continue;
                    }
                }
            };
            self.namespace.bind(name, Binding::Lazy(proxy));
        }

        if !cached.is_empty() || !spilled.is_empty() {
            info!(cached = cached.len(), spilled = spilled.len(), "Offloaded large variables");
        }
        (cached, spilled)
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn namespace_mut(&mut self) -> &mut Namespace {
        &mut self.namespace
    }

    pub fn context(&self) -> &CacheContext {
        &self.context
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Drop the namespace (releasing offloaded storage) and shut the context down.
    pub fn shutdown(self) {
        let Self { context, namespace, .. } = self;
        drop(namespace);
        context.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_forwards_lazy_bindings() {
        let mut ns = Namespace::new();
        ns.insert("x", Value::Int(3));
        assert_eq!(ns.get("x"), Some(&Value::Int(3)));
        assert!(!ns.binding("x").unwrap().is_lazy());
        assert_eq!(ns.names().collect::<Vec<_>>(), vec!["x"]);
    }

    #[test]
    fn test_closure_executor() {
        let mut exec = |_code: &str, ns: &mut Namespace, _mode: ExecutionMode| -> anyhow::Result<()> {
            ns.insert("y", Value::Bool(true));
            Ok(())
        };
        let mut ns = Namespace::new();
        exec.execute("", &mut ns, ExecutionMode::Immediate).unwrap();
        assert_eq!(ns.get("y"), Some(&Value::Bool(true)));
    }
}
