//! Hook registry: named, priority-ordered filter and action chains.
//!
//! Filters transform a value through every callback registered for a tag;
//! actions run callbacks for their side effects. Both run callbacks one at a
//! time in ascending priority order, ties in registration order, and each
//! callback is awaited before the next one starts.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ExtensionError;

/// Priority used when a caller does not pick one.
pub const DEFAULT_PRIORITY: i32 = 10;

/// Number of arguments a callback receives unless it asks for more.
pub const DEFAULT_ACCEPTED_ARGS: usize = 1;

// ─── Callbacks ──────────────────────────────────────────────────────────

/// Something that can be attached to a hook chain.
///
/// Filters return the value handed to the next callback; actions may return
/// anything, the result is discarded.
#[async_trait]
pub trait HookCallback: Send + Sync {
    async fn call(&self, args: Vec<Value>) -> Result<Value, ExtensionError>;
}

struct FnCallback<F>(F);

#[async_trait]
impl<F, Fut> HookCallback for FnCallback<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ExtensionError>> + Send,
{
    async fn call(&self, args: Vec<Value>) -> Result<Value, ExtensionError> {
        (self.0)(args).await
    }
}

struct SyncCallback<F>(F);

#[async_trait]
impl<F> HookCallback for SyncCallback<F>
where
    F: Fn(Vec<Value>) -> Result<Value, ExtensionError> + Send + Sync,
{
    async fn call(&self, args: Vec<Value>) -> Result<Value, ExtensionError> {
        (self.0)(args)
    }
}

/// A registered (or registrable) hook callback.
///
/// Clones share identity: `remove_filter` and `has_filter` match a callback
/// by the allocation it was created with, never by behaviour or name.
#[derive(Clone)]
pub struct Callback {
    name: Arc<str>,
    handler: Arc<dyn HookCallback>,
}

impl Callback {
    /// Wrap an async closure.
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ExtensionError>> + Send + 'static,
    {
        Self::from_handler(name, Arc::new(FnCallback(f)))
    }

    /// Wrap a synchronous closure.
    pub fn sync<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, ExtensionError> + Send + Sync + 'static,
    {
        Self::from_handler(name, Arc::new(SyncCallback(f)))
    }

    /// Wrap an existing handler object.
    pub fn from_handler(name: impl Into<String>, handler: Arc<dyn HookCallback>) -> Self {
        Self {
            name: Arc::from(name.into()),
            handler,
        }
    }

    /// Human-readable name, used in logs only.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `other` is the same callback (same allocation).
    pub fn same(&self, other: &Callback) -> bool {
        Arc::ptr_eq(&self.handler, &other.handler)
    }

    async fn invoke(&self, args: Vec<Value>) -> Result<Value, ExtensionError> {
        self.handler.call(args).await
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// What `has_filter` should look for.
#[derive(Debug, Clone, Copy)]
pub enum HookQuery<'a> {
    /// Any callback at all.
    Any,
    /// This specific callback, at any priority.
    Callback(&'a Callback),
}

// ─── Chains ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct HookEntry {
    callback: Callback,
    priority: i32,
    accepted_args: usize,
}

impl HookEntry {
    /// The broadcast arguments this entry is allowed to see.
    fn scoped_args(&self, args: &[Value]) -> Vec<Value> {
        args.iter().take(self.accepted_args).cloned().collect()
    }
}

#[derive(Debug, Default)]
struct HookChain {
    /// Ascending priority, registration order within a priority.
    entries: Vec<HookEntry>,
}

impl HookChain {
    fn insert(&mut self, entry: HookEntry) {
        let at = self
            .entries
            .iter()
            .position(|e| e.priority > entry.priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(at, entry);
    }
}

// ─── Registry ───────────────────────────────────────────────────────────

/// The shared filter/action bus.
///
/// One instance is created per application run and handed by reference
/// (`Arc`) to the capability surface and the bootstrap pipeline. Locks are
/// never held across an `.await`: dispatch works on a snapshot of the chain,
/// so callbacks may register or remove hooks while a dispatch is running
/// without affecting it.
#[derive(Default)]
pub struct HookRegistry {
    chains: RwLock<HashMap<String, HookChain>>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, HookChain>> {
        self.chains.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, HookChain>> {
        self.chains.write().unwrap_or_else(|e| e.into_inner())
    }

    fn snapshot(&self, tag: &str) -> Vec<HookEntry> {
        self.read()
            .get(tag)
            .map(|chain| chain.entries.clone())
            .unwrap_or_default()
    }

    /// Attach `callback` to the chain for `tag`.
    pub fn add_filter(&self, tag: &str, callback: Callback, priority: i32, accepted_args: usize) {
        tracing::debug!(
            tag = %tag,
            callback = %callback.name(),
            priority,
            accepted_args,
            "hook registered"
        );
        self.write().entry(tag.to_string()).or_default().insert(HookEntry {
            callback,
            priority,
            accepted_args,
        });
    }

    /// Attach an action callback. Actions and filters share one namespace.
    pub fn add_action(&self, tag: &str, callback: Callback, priority: i32, accepted_args: usize) {
        self.add_filter(tag, callback, priority, accepted_args);
    }

    /// Whether the chain for `tag` has the callback (or any callback).
    pub fn has_filter(&self, tag: &str, query: HookQuery<'_>) -> bool {
        let chains = self.read();
        let Some(chain) = chains.get(tag) else {
            return false;
        };
        match query {
            HookQuery::Any => !chain.entries.is_empty(),
            HookQuery::Callback(cb) => chain.entries.iter().any(|e| e.callback.same(cb)),
        }
    }

    pub fn has_action(&self, tag: &str, query: HookQuery<'_>) -> bool {
        self.has_filter(tag, query)
    }

    /// Remove the first entry matching both `callback` and `priority`.
    ///
    /// Returns `false` when the tag or the entry does not exist.
    pub fn remove_filter(&self, tag: &str, callback: &Callback, priority: i32) -> bool {
        let mut chains = self.write();
        let Some(chain) = chains.get_mut(tag) else {
            return false;
        };
        match chain
            .entries
            .iter()
            .position(|e| e.priority == priority && e.callback.same(callback))
        {
            Some(idx) => {
                chain.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn remove_action(&self, tag: &str, callback: &Callback, priority: i32) -> bool {
        self.remove_filter(tag, callback, priority)
    }

    /// Clear the chain for `tag`, or only the entries at `priority`.
    pub fn remove_all_filters(&self, tag: &str, priority: Option<i32>) {
        let mut chains = self.write();
        if let Some(chain) = chains.get_mut(tag) {
            match priority {
                Some(p) => chain.entries.retain(|e| e.priority != p),
                None => chain.entries.clear(),
            }
        }
    }

    pub fn remove_all_actions(&self, tag: &str, priority: Option<i32>) {
        self.remove_all_filters(tag, priority);
    }

    /// Run `value` through every filter registered for `tag`.
    ///
    /// Each callback receives `(value, extra_args...)` cut down to its
    /// accepted argument count; whatever it returns, `Null` included, is the
    /// value handed to the next callback. With no chain the value comes
    /// back unchanged. The first failing callback aborts the chain.
    pub async fn apply_filters(
        &self,
        tag: &str,
        value: Value,
        extra_args: Vec<Value>,
    ) -> Result<Value, ExtensionError> {
        let entries = self.snapshot(tag);
        if entries.is_empty() {
            return Ok(value);
        }

        tracing::trace!(tag = %tag, count = entries.len(), "applying filters");

        let mut args = Vec::with_capacity(extra_args.len() + 1);
        args.push(value);
        args.extend(extra_args);

        for entry in &entries {
            let result = entry.callback.invoke(entry.scoped_args(&args)).await;
            match result {
                Ok(next) => args[0] = next,
                Err(e) => {
                    tracing::warn!(
                        tag = %tag,
                        callback = %entry.callback.name(),
                        "filter callback failed: {e}"
                    );
                    return Err(ExtensionError::hook(
                        tag,
                        format!("{}: {e}", entry.callback.name()),
                    ));
                }
            }
        }

        Ok(args.swap_remove(0))
    }

    /// Run every action registered for `tag`, one after another.
    pub async fn do_action(&self, tag: &str, args: Vec<Value>) -> Result<(), ExtensionError> {
        let entries = self.snapshot(tag);
        if entries.is_empty() {
            return Ok(());
        }

        tracing::debug!(tag = %tag, count = entries.len(), "dispatching action");

        for entry in &entries {
            if let Err(e) = entry.callback.invoke(entry.scoped_args(&args)).await {
                tracing::warn!(
                    tag = %tag,
                    callback = %entry.callback.name(),
                    "action callback failed: {e}"
                );
                return Err(ExtensionError::hook(
                    tag,
                    format!("{}: {e}", entry.callback.name()),
                ));
            }
        }

        Ok(())
    }

    /// Number of callbacks registered for `tag`.
    pub fn count(&self, tag: &str) -> usize {
        self.read().get(tag).map_or(0, |c| c.entries.len())
    }

    /// Tags that currently have at least one callback, sorted.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .read()
            .iter()
            .filter(|(_, chain)| !chain.entries.is_empty())
            .map(|(tag, _)| tag.clone())
            .collect();
        tags.sort();
        tags
    }
}

// ─── Per-tag handle ─────────────────────────────────────────────────────

/// A registry view bound to one tag, as handed to modules by
/// `Capabilities::hook`.
#[derive(Clone, Debug)]
pub struct HookHandle {
    registry: Arc<HookRegistry>,
    tag: String,
}

impl HookHandle {
    pub(crate) fn new(registry: Arc<HookRegistry>, tag: impl Into<String>) -> Self {
        Self {
            registry,
            tag: tag.into(),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn has(&self, query: HookQuery<'_>) -> bool {
        self.registry.has_filter(&self.tag, query)
    }

    pub fn remove(&self, callback: &Callback, priority: i32) -> bool {
        self.registry.remove_filter(&self.tag, callback, priority)
    }

    pub fn remove_all(&self, priority: Option<i32>) {
        self.registry.remove_all_filters(&self.tag, priority);
    }

    pub async fn filter(&self, value: Value, extra_args: Vec<Value>) -> Result<Value, ExtensionError> {
        self.registry.apply_filters(&self.tag, value, extra_args).await
    }

    pub async fn exec(&self, args: Vec<Value>) -> Result<(), ExtensionError> {
        self.registry.do_action(&self.tag, args).await
    }

    pub fn add_filter(&self, callback: Callback, priority: i32, accepted_args: usize) {
        self.registry
            .add_filter(&self.tag, callback, priority, accepted_args);
    }

    pub fn add_action(&self, callback: Callback, priority: i32, accepted_args: usize) {
        self.registry
            .add_action(&self.tag, callback, priority, accepted_args);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────
