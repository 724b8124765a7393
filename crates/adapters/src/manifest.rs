// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parsing of Kubernetes manifests from YAML or JSON files.

use kube::api::DynamicObject;
use kube::core::GroupVersionKind;
use serde::Deserialize;
use thiserror::Error;

/// Label that marks an object as an inventory object.
pub const INVENTORY_LABEL: &str = "cli-utils.sigs.k8s.io/inventory-id";
/// Annotation linking an applied object to its inventory.
pub const OWNING_INVENTORY_ANNOTATION: &str = "config.k8s.io/owning-inventory";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    #[error("{source_name}: {message}")]
    Parse { source_name: String, message: String },

    #[error("{source_name}: object is missing {field}")]
    MissingField { source_name: String, field: &'static str },

    #[error("invalid apiVersion: {0:?}")]
    InvalidApiVersion(String),

    #[error("expecting zero or one inventory object, found {0}")]
    MultipleInventories(usize),
}

/// Parse every document of `data`. Empty documents are skipped and `*List`
/// kinds are flattened into their items.
pub fn parse_manifests(source_name: &str, data: &[u8]) -> Result<Vec<DynamicObject>, ManifestError> {
    let parse_err = |e: &dyn std::fmt::Display| ManifestError::Parse {
        source_name: source_name.to_string(),
        message: e.to_string(),
    };
    let mut objects = Vec::new();
    for doc in serde_yaml::Deserializer::from_slice(data) {
        let value = serde_json::Value::deserialize(doc).map_err(|e| parse_err(&e))?;
        if value.is_null() {
            continue;
        }
        let mut pending = vec![value];
        while let Some(value) = pending.pop() {
            if let Some(items) = list_items(&value) {
                pending.extend(items.iter().rev().cloned());
                continue;
            }
            let obj: DynamicObject = serde_json::from_value(value).map_err(|e| parse_err(&e))?;
            if obj.types.is_none() {
                return Err(ManifestError::MissingField { source_name: source_name.to_string(), field: "apiVersion/kind" });
            }
            if obj.metadata.name.as_deref().is_none_or(str::is_empty) {
                return Err(ManifestError::MissingField { source_name: source_name.to_string(), field: "metadata.name" });
            }
            objects.push(obj);
        }
    }
    Ok(objects)
}

fn list_items(value: &serde_json::Value) -> Option<&Vec<serde_json::Value>> {
    let kind = value.get("kind")?.as_str()?;
    if !kind.ends_with("List") {
        return None;
    }
    value.get("items")?.as_array()
}

pub fn gvk_of(obj: &DynamicObject) -> Result<GroupVersionKind, ManifestError> {
    let types = obj.types.as_ref().ok_or_else(|| ManifestError::InvalidApiVersion(String::new()))?;
    let (group, version) = match types.api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", types.api_version.as_str()),
    };
    if version.is_empty() {
        return Err(ManifestError::InvalidApiVersion(types.api_version.clone()));
    }
    Ok(GroupVersionKind::gvk(group, version, &types.kind))
}

pub fn is_inventory_object(obj: &DynamicObject) -> bool {
    obj.metadata.labels.as_ref().is_some_and(|l| l.contains_key(INVENTORY_LABEL))
}

/// Separate the inventory object, if any, from the objects to apply.
pub fn split_inventory(
    objects: Vec<DynamicObject>,
) -> Result<(Option<DynamicObject>, Vec<DynamicObject>), ManifestError> {
    let (mut inventories, objects): (Vec<_>, Vec<_>) = objects.into_iter().partition(is_inventory_object);
    match inventories.len() {
        0 | 1 => Ok((inventories.pop(), objects)),
        n => Err(ManifestError::MultipleInventories(n)),
    }
}

/// Inventory id of an inventory object, if it is one.
pub fn inventory_id(obj: &DynamicObject) -> Option<&str> {
    obj.metadata.labels.as_ref()?.get(INVENTORY_LABEL).map(String::as_str)
}

/// Stable identity of an object inside an inventory: `ns_name_group_kind`.
pub fn object_key(obj: &DynamicObject) -> String {
    let (group, kind) = match obj.types.as_ref() {
        Some(t) => (t.api_version.split_once('/').map_or("", |(g, _)| g), t.kind.as_str()),
        None => ("", ""),
    };
    format!(
        "{}_{}_{}_{}",
        obj.metadata.namespace.as_deref().unwrap_or_default(),
        obj.metadata.name.as_deref().unwrap_or_default(),
        group,
        kind
    )
}

/// Built-in kinds that never carry a namespace.
pub fn is_cluster_scoped_kind(group: &str, kind: &str) -> bool {
    matches!(
        (group, kind),
        ("", "Namespace" | "Node" | "PersistentVolume" | "ComponentStatus")
            | ("rbac.authorization.k8s.io", "ClusterRole" | "ClusterRoleBinding")
            | ("apiextensions.k8s.io", "CustomResourceDefinition")
            | ("apiregistration.k8s.io", "APIService")
            | ("storage.k8s.io", "StorageClass" | "CSIDriver" | "CSINode" | "VolumeAttachment")
            | ("scheduling.k8s.io", "PriorityClass")
            | ("networking.k8s.io", "IngressClass")
            | ("node.k8s.io", "RuntimeClass")
            | (
                "admissionregistration.k8s.io",
                "ValidatingWebhookConfiguration" | "MutatingWebhookConfiguration"
            )
    )
}

#[cfg(test)]
#[path = "manifest_tests.rs"]
mod tests;
