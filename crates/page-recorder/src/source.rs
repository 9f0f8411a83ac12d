use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;
use crate::record::{MutationPayload, ObjectRef};

/// What to observe under the root node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserveOptions {
    pub attributes: bool,
    pub attribute_old_value: bool,
    pub child_list: bool,
    pub subtree: bool,
}

impl Default for ObserveOptions {
    fn default() -> Self {
        Self {
            attributes: true,
            attribute_old_value: true,
            child_list: true,
            subtree: true,
        }
    }
}

/// One native change notification, as the platform reports it
#[derive(Debug, Clone, PartialEq)]
pub enum RawMutation {
    Attributes {
        target: ObjectRef,
        attribute_name: String,
        old_value: Option<String>,
    },
    ChildList {
        target: ObjectRef,
        added_nodes: Vec<ObjectRef>,
        removed_nodes: Vec<ObjectRef>,
    },
}

/// Subscription to structural changes of the observed subtree.
///
/// Notifications are delivered back through the session's `on_mutations`
/// in arrival order, possibly batched.
pub trait MutationSource: Send + Sync {
    fn subscribe(&self, root: ObjectRef, options: &ObserveOptions) -> Result<()>;

    /// Stop delivering notifications. Must be idempotent.
    fn unsubscribe(&self);
}

/// Attribute access on the document that owns the nodes
pub trait DocumentAccess: Send + Sync {
    fn attribute(&self, node: ObjectRef, name: &str) -> Option<String>;

    /// Set an attribute, or remove it when `value` is `None`
    fn set_attribute(&self, node: ObjectRef, name: &str, value: Option<&str>) -> Result<()>;
}

/// Expand a native batch into one payload per discrete change.
///
/// The new value of an attribute change is the old value of the next change
/// to the same attribute in the batch, or the current document value for the
/// last one.
pub fn expand_batch(
    batch: Vec<RawMutation>,
    document: &dyn DocumentAccess,
) -> Vec<(ObjectRef, MutationPayload)> {
    let mut next_old_value: HashMap<(ObjectRef, String), Option<String>> = HashMap::new();
    let mut expanded = Vec::with_capacity(batch.len());

    // Walk backwards so each entry can see the one that followed it.
    for mutation in batch.into_iter().rev() {
        match mutation {
            RawMutation::Attributes {
                target,
                attribute_name,
                old_value,
            } => {
                let key = (target, attribute_name);
                let new_value = match next_old_value.get(&key) {
                    Some(value) => value.clone(),
                    None => document.attribute(target, &key.1),
                };
                next_old_value.insert(key.clone(), old_value.clone());
                expanded.push((
                    target,
                    MutationPayload::AttributeChange {
                        attribute_name: key.1,
                        old_value,
                        new_value,
                    },
                ));
            }
            RawMutation::ChildList {
                target,
                added_nodes,
                removed_nodes,
            } => {
                expanded.push((
                    target,
                    MutationPayload::ChildListChange {
                        added_count: added_nodes.len(),
                        removed_count: removed_nodes.len(),
                    },
                ));
            }
        }
    }

    expanded.reverse();
    expanded
}
