use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::{RecorderError, Result};
use crate::instrumentation::{ListenerInfo, ListenerRegistry, ObserverHandle, ObserverPhase};
use crate::record::{EncodedImage, ObjectRef};
use crate::session::PageEnvironment;
use crate::snapshot::{CaptureRegion, Viewport, ViewportCapture};
use crate::source::{DocumentAccess, MutationSource, ObserveOptions, RawMutation};
use crate::timer::{Clock, TimerScheduler};

#[derive(Debug, Clone)]
struct MockNode {
    tag: String,
    children: Vec<ObjectRef>,
    attributes: BTreeMap<String, String>,
    listeners: Vec<ListenerInfo>,
    attached: bool,
}

#[derive(Debug)]
struct MockDocumentInner {
    next_id: u64,
    root: ObjectRef,
    nodes: HashMap<ObjectRef, MockNode>,
    observers: HashMap<(ObjectRef, String), Vec<ObserverHandle>>,
    fail_installs_after: Option<usize>,
    installs: usize,
    subscription: Option<(ObjectRef, ObserveOptions)>,
    subscribe_calls: usize,
    unsubscribe_calls: usize,
    pending_mutations: Vec<RawMutation>,
    viewport: Viewport,
    capture_available: bool,
    captures: u64,
    last_region: Option<CaptureRegion>,
}

impl MockDocumentInner {
    fn insert_node(&mut self, tag: &str) -> ObjectRef {
        let node = ObjectRef::new(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            node,
            MockNode {
                tag: tag.to_string(),
                children: Vec::new(),
                attributes: BTreeMap::new(),
                listeners: Vec::new(),
                attached: true,
            },
        );
        node
    }

    fn observing_child_list(&self) -> bool {
        matches!(self.subscription, Some((_, options)) if options.child_list)
    }

    fn observing_attributes(&self) -> bool {
        matches!(self.subscription, Some((_, options)) if options.attributes)
    }
}

/// In-memory document implementing every collaborator seam. Clones share
/// the same document.
#[derive(Debug, Clone)]
pub struct MockDocument {
    inner: Arc<Mutex<MockDocumentInner>>,
}

impl Default for MockDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDocument {
    pub fn new() -> Self {
        let mut inner = MockDocumentInner {
            next_id: 1,
            root: ObjectRef::new(0),
            nodes: HashMap::new(),
            observers: HashMap::new(),
            fail_installs_after: None,
            installs: 0,
            subscription: None,
            subscribe_calls: 0,
            unsubscribe_calls: 0,
            pending_mutations: Vec::new(),
            viewport: Viewport {
                scroll_x: 0.0,
                scroll_y: 0.0,
                width: 800,
                height: 600,
                scrollbar_width: 0,
                scrollbar_height: 0,
            },
            capture_available: true,
            captures: 0,
            last_region: None,
        };
        inner.root = inner.insert_node("html");

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub fn root(&self) -> ObjectRef {
        self.inner.lock().root
    }

    /// Create a node outside the tree
    pub fn create_node(&self, tag: &str) -> ObjectRef {
        self.inner.lock().insert_node(tag)
    }

    pub fn tag(&self, node: ObjectRef) -> Option<String> {
        self.inner.lock().nodes.get(&node).map(|n| n.tag.clone())
    }

    /// Create a node and append it under `parent`
    pub fn append_child(&self, parent: ObjectRef, tag: &str) -> ObjectRef {
        let mut inner = self.inner.lock();
        let child = inner.insert_node(tag);
        if let Some(parent_node) = inner.nodes.get_mut(&parent) {
            parent_node.children.push(child);
        }
        if inner.observing_child_list() {
            inner.pending_mutations.push(RawMutation::ChildList {
                target: parent,
                added_nodes: vec![child],
                removed_nodes: vec![],
            });
        }
        child
    }

    pub fn remove_child(&self, parent: ObjectRef, child: ObjectRef) {
        let mut inner = self.inner.lock();
        let removed = match inner.nodes.get_mut(&parent) {
            Some(parent_node) => {
                let before = parent_node.children.len();
                parent_node.children.retain(|c| *c != child);
                before != parent_node.children.len()
            }
            None => false,
        };
        if removed && inner.observing_child_list() {
            inner.pending_mutations.push(RawMutation::ChildList {
                target: parent,
                added_nodes: vec![],
                removed_nodes: vec![child],
            });
        }
    }

    /// Mark a node as gone: attribute writes to it fail from now on
    pub fn detach(&self, node: ObjectRef) {
        if let Some(n) = self.inner.lock().nodes.get_mut(&node) {
            n.attached = false;
        }
    }

    pub fn attributes(&self, node: ObjectRef) -> BTreeMap<String, String> {
        self.inner
            .lock()
            .nodes
            .get(&node)
            .map(|n| n.attributes.clone())
            .unwrap_or_default()
    }

    /// Attributes of every node, for comparing whole-document states
    pub fn attribute_state(&self) -> BTreeMap<ObjectRef, BTreeMap<String, String>> {
        self.inner
            .lock()
            .nodes
            .iter()
            .map(|(node, n)| (*node, n.attributes.clone()))
            .collect()
    }

    pub fn add_listener(&self, node: ObjectRef, event_type: &str, handler: Option<&str>) {
        if let Some(n) = self.inner.lock().nodes.get_mut(&node) {
            n.listeners.push(ListenerInfo::new(event_type, handler));
        }
    }

    pub fn observer_count(&self, node: ObjectRef, event_type: &str) -> usize {
        self.inner
            .lock()
            .observers
            .get(&(node, event_type.to_string()))
            .map(|o| o.len())
            .unwrap_or(0)
    }

    pub fn total_observers(&self) -> usize {
        self.inner.lock().observers.values().map(|o| o.len()).sum()
    }

    /// Drop every observer behind the recorder's back
    pub fn clear_observers(&self) {
        self.inner.lock().observers.clear();
    }

    /// Refuse observer installs once `count` have succeeded
    pub fn fail_observer_installs_after(&self, count: usize) {
        let mut inner = self.inner.lock();
        inner.fail_installs_after = Some(count);
        inner.installs = 0;
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner.lock().subscription.is_some()
    }

    pub fn subscribe_calls(&self) -> usize {
        self.inner.lock().subscribe_calls
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.inner.lock().unsubscribe_calls
    }

    /// Drain mutation notifications queued since the last call
    pub fn take_mutations(&self) -> Vec<RawMutation> {
        std::mem::take(&mut self.inner.lock().pending_mutations)
    }

    pub fn set_viewport(&self, viewport: Viewport) {
        self.inner.lock().viewport = viewport;
    }

    pub fn set_capture_available(&self, available: bool) {
        self.inner.lock().capture_available = available;
    }

    pub fn capture_count(&self) -> u64 {
        self.inner.lock().captures
    }

    pub fn last_capture_region(&self) -> Option<CaptureRegion> {
        self.inner.lock().last_region.clone()
    }

    /// Wire this document into every collaborator slot of a session
    pub fn environment(
        &self,
        clock: Arc<dyn Clock>,
        timers: Arc<dyn TimerScheduler>,
    ) -> PageEnvironment {
        PageEnvironment::from_page(self.root(), self.clone(), clock, timers)
    }
}

impl DocumentAccess for MockDocument {
    fn attribute(&self, node: ObjectRef, name: &str) -> Option<String> {
        self.inner
            .lock()
            .nodes
            .get(&node)
            .and_then(|n| n.attributes.get(name).cloned())
    }

    fn set_attribute(&self, node: ObjectRef, name: &str, value: Option<&str>) -> Result<()> {
        let mut inner = self.inner.lock();
        let observing = inner.observing_attributes();
        let n = inner
            .nodes
            .get_mut(&node)
            .filter(|n| n.attached)
            .ok_or_else(|| RecorderError::CollaboratorFailed {
                reason: format!("node {} is not attached", node),
            })?;

        let old_value = match value {
            Some(value) => n.attributes.insert(name.to_string(), value.to_string()),
            None => n.attributes.remove(name),
        };

        if observing {
            inner.pending_mutations.push(RawMutation::Attributes {
                target: node,
                attribute_name: name.to_string(),
                old_value,
            });
        }
        Ok(())
    }
}

impl MutationSource for MockDocument {
    fn subscribe(&self, root: ObjectRef, options: &ObserveOptions) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.nodes.contains_key(&root) {
            return Err(RecorderError::CollaboratorFailed {
                reason: format!("unknown root {}", root),
            });
        }
        inner.subscribe_calls += 1;
        inner.subscription = Some((root, *options));
        Ok(())
    }

    fn unsubscribe(&self) {
        let mut inner = self.inner.lock();
        inner.unsubscribe_calls += 1;
        inner.subscription = None;
    }
}

impl ListenerRegistry for MockDocument {
    fn nodes(&self, root: ObjectRef) -> Vec<ObjectRef> {
        let inner = self.inner.lock();
        let mut ordered = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if let Some(n) = inner.nodes.get(&node) {
                ordered.push(node);
                stack.extend(n.children.iter().rev().copied());
            }
        }
        ordered
    }

    fn listeners(&self, node: ObjectRef) -> Vec<ListenerInfo> {
        self.inner
            .lock()
            .nodes
            .get(&node)
            .map(|n| n.listeners.clone())
            .unwrap_or_default()
    }

    fn add_observer(
        &self,
        node: ObjectRef,
        event_type: &str,
        observer: ObserverHandle,
        _phase: ObserverPhase,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(limit) = inner.fail_installs_after {
            if inner.installs >= limit {
                return Err(RecorderError::CollaboratorFailed {
                    reason: format!("observer refused on {} for {}", node, event_type),
                });
            }
        }
        inner.installs += 1;
        inner
            .observers
            .entry((node, event_type.to_string()))
            .or_default()
            .push(observer);
        Ok(())
    }

    fn remove_observer(
        &self,
        node: ObjectRef,
        event_type: &str,
        observer: ObserverHandle,
        _phase: ObserverPhase,
    ) -> bool {
        let mut inner = self.inner.lock();
        let key = (node, event_type.to_string());
        let Some(observers) = inner.observers.get_mut(&key) else {
            return false;
        };
        let Some(position) = observers.iter().position(|o| *o == observer) else {
            return false;
        };
        observers.remove(position);
        if observers.is_empty() {
            inner.observers.remove(&key);
        }
        true
    }
}

impl ViewportCapture for MockDocument {
    fn viewport(&self) -> Option<Viewport> {
        Some(self.inner.lock().viewport)
    }

    fn capture(&self, region: &CaptureRegion) -> Option<EncodedImage> {
        let mut inner = self.inner.lock();
        if !inner.capture_available {
            return None;
        }
        inner.captures += 1;
        inner.last_region = Some(region.clone());
        Some(EncodedImage {
            mime_type: region.mime_type.clone(),
            data_url: format!(
                "data:{};base64,frame-{}-{}x{}",
                region.mime_type, inner.captures, region.width, region.height
            ),
        })
    }
}
