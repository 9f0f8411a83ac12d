use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;
use crate::record::ObjectRef;

static NEXT_OBSERVER: AtomicU64 = AtomicU64::new(1);

/// An author listener reported by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerInfo {
    pub event_type: String,
    pub handler_descriptor: Option<String>,
}

impl ListenerInfo {
    pub fn new(event_type: impl Into<String>, handler_descriptor: Option<&str>) -> Self {
        Self {
            event_type: event_type.into(),
            handler_descriptor: handler_descriptor.map(str::to_string),
        }
    }
}

/// Where in dispatch an observer is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObserverPhase {
    /// System event group, capture phase: earliest delivery available
    SystemCapture,
}

/// Identity of the observation callback a session installs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverHandle(u64);

impl ObserverHandle {
    pub fn next() -> Self {
        Self(NEXT_OBSERVER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Listener introspection and observer installation on the document
pub trait ListenerRegistry: Send + Sync {
    /// Every node in the subtree rooted at `root`, root included
    fn nodes(&self, root: ObjectRef) -> Vec<ObjectRef>;

    /// Author listeners currently installed on `node`
    fn listeners(&self, node: ObjectRef) -> Vec<ListenerInfo>;

    fn add_observer(
        &self,
        node: ObjectRef,
        event_type: &str,
        observer: ObserverHandle,
        phase: ObserverPhase,
    ) -> Result<()>;

    /// Remove an observer. Returns false when it was not installed.
    fn remove_observer(
        &self,
        node: ObjectRef,
        event_type: &str,
        observer: ObserverHandle,
        phase: ObserverPhase,
    ) -> bool;
}

/// One observer the session put in place
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledObserver {
    pub event_type: String,
    /// Author handlers sharing this (node, event type), joined for display
    pub handler_descriptor: Option<String>,
}

/// Result of removing installed observers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub removed: usize,
    pub missing: usize,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.missing == 0
    }
}

/// The observers installed for one recording session.
///
/// One observer per distinct (node, event type) pair, attached in the system
/// group at capture phase so author handlers cannot suppress it.
#[derive(Debug)]
pub struct ListenerInstrumentation {
    observer: ObserverHandle,
    installed: BTreeMap<ObjectRef, BTreeMap<String, InstalledObserver>>,
}

impl ListenerInstrumentation {
    /// Instrument every node under `root` that has at least one listener.
    ///
    /// If the registry refuses an observer, the ones already added are
    /// removed again before the error is returned.
    pub fn install(registry: &dyn ListenerRegistry, root: ObjectRef) -> Result<Self> {
        let mut instrumentation = Self {
            observer: ObserverHandle::next(),
            installed: BTreeMap::new(),
        };

        for node in registry.nodes(root) {
            let listeners = registry.listeners(node);
            if listeners.is_empty() {
                continue;
            }

            let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for listener in listeners {
                let handlers = groups.entry(listener.event_type).or_default();
                if let Some(descriptor) = listener.handler_descriptor {
                    handlers.push(descriptor);
                }
            }

            for (event_type, handlers) in groups {
                if let Err(err) = registry.add_observer(
                    node,
                    &event_type,
                    instrumentation.observer,
                    ObserverPhase::SystemCapture,
                ) {
                    instrumentation.teardown(registry);
                    return Err(err);
                }

                let handler_descriptor = if handlers.is_empty() {
                    None
                } else {
                    Some(handlers.join(", "))
                };
                instrumentation.installed.entry(node).or_default().insert(
                    event_type.clone(),
                    InstalledObserver {
                        event_type,
                        handler_descriptor,
                    },
                );
            }
        }

        tracing::debug!(
            nodes = instrumentation.installed.len(),
            observers = instrumentation.observer_count(),
            "listener instrumentation installed"
        );

        Ok(instrumentation)
    }

    /// Remove exactly the observers this instance installed
    pub fn teardown(&mut self, registry: &dyn ListenerRegistry) -> TeardownReport {
        let mut report = TeardownReport::default();

        for (node, observers) in std::mem::take(&mut self.installed) {
            for event_type in observers.keys() {
                if registry.remove_observer(
                    node,
                    event_type,
                    self.observer,
                    ObserverPhase::SystemCapture,
                ) {
                    report.removed += 1;
                } else {
                    report.missing += 1;
                    tracing::error!(
                        node = %node,
                        event_type = %event_type,
                        "installed observer was not found during teardown"
                    );
                }
            }
        }

        report
    }

    pub fn observer(&self) -> ObserverHandle {
        self.observer
    }

    pub fn lookup(&self, node: ObjectRef, event_type: &str) -> Option<&InstalledObserver> {
        self.installed.get(&node)?.get(event_type)
    }

    pub fn observer_count(&self) -> usize {
        self.installed.values().map(|observers| observers.len()).sum()
    }

    pub fn instrumented_nodes(&self) -> impl Iterator<Item = ObjectRef> + '_ {
        self.installed.keys().copied()
    }
}
