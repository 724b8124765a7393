// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server-side apply of object sets with a ConfigMap inventory.
//!
//! Inventory data maps `ns_name_group_kind` to the object's apiVersion. Every
//! applied object is annotated with the owning inventory id so other
//! inventories can detect it.

use std::collections::{BTreeMap, BTreeSet};

use agentk_core::FIELD_MANAGER;
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams};
use kube::core::GroupVersionKind;
use kube::discovery::{ApiCapabilities, ApiResource, Scope};
use kube::Client;
use tokio_util::sync::CancellationToken;

use super::{
    Applier, ApplyError, ApplyOptions, ApplyReport, ApplyRequest, DryRunStrategy, InventoryPolicy,
    PropagationPolicy,
};
use crate::manifest::{gvk_of, inventory_id, object_key, OWNING_INVENTORY_ANNOTATION};

pub struct ServerSideApplier {
    client: Client,
}

impl ServerSideApplier {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, ApiCapabilities), ApplyError> {
        kube::discovery::pinned_kind(&self.client, gvk).await.map_err(|e| ApplyError::Discovery {
            gvk: format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind),
            message: e.to_string(),
        })
    }

    async fn api_for(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Result<Api<DynamicObject>, ApplyError> {
        let (ar, caps) = self.resolve(gvk).await?;
        Ok(match (caps.scope, namespace) {
            (Scope::Namespaced, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            (Scope::Namespaced, None) => Api::default_namespaced_with(self.client.clone(), &ar),
            (Scope::Cluster, _) => Api::all_with(self.client.clone(), &ar),
        })
    }

    async fn apply_object(&self, obj: &DynamicObject, inventory: &str, opts: &ApplyOptions) -> Result<(), ApplyError> {
        let key = object_key(obj);
        let name = obj.metadata.name.clone().unwrap_or_default();
        let api = self.api_for(&gvk_of(obj)?, obj.metadata.namespace.as_deref()).await?;

        let existing = api.get_opt(&name).await.map_err(|e| kube_err(&key, e))?;
        if let Some(existing) = existing {
            let owner = owning_inventory(&existing);
            if !may_adopt(owner, inventory, opts.inventory_policy) {
                return Err(ApplyError::InventoryConflict {
                    object: key,
                    owner: owner.unwrap_or_default().to_string(),
                });
            }
        }

        if opts.dry_run == DryRunStrategy::Client {
            return Ok(());
        }
        let mut obj = obj.clone();
        obj.metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(OWNING_INVENTORY_ANNOTATION.to_string(), inventory.to_string());
        api.patch(&name, &patch_params(opts), &Patch::Apply(&obj))
            .await
            .map_err(|e| kube_err(&key, e))?;
        Ok(())
    }

    /// Delete objects recorded in the previous inventory but no longer desired.
    async fn prune(
        &self,
        previous: &BTreeMap<String, String>,
        desired: &BTreeSet<String>,
        inventory: &str,
        opts: &ApplyOptions,
    ) -> Result<usize, ApplyError> {
        let mut pruned = 0;
        for (key, api_version) in previous {
            if desired.contains(key) {
                continue;
            }
            let Some(stale) = StaleObject::parse(key, api_version) else {
                tracing::warn!(key = %key, "skipping malformed inventory entry");
                continue;
            };
            let api = self.api_for(&stale.gvk, stale.namespace.as_deref()).await?;
            let Some(current) = api.get_opt(&stale.name).await.map_err(|e| kube_err(key, e))? else {
                continue;
            };
            if owning_inventory(&current) != Some(inventory) {
                tracing::info!(key = %key, "not pruning object owned by another inventory");
                continue;
            }
            if opts.dry_run == DryRunStrategy::Client {
                pruned += 1;
                continue;
            }
            let dp = DeleteParams {
                propagation_policy: Some(propagation(opts.prune_propagation_policy)),
                dry_run: opts.dry_run == DryRunStrategy::Server,
                ..Default::default()
            };
            match api.delete(&stale.name, &dp).await {
                Ok(_) => pruned += 1,
                Err(kube::Error::Api(ae)) if ae.code == 404 => {}
                Err(e) => return Err(kube_err(key, e)),
            }
        }
        Ok(pruned)
    }

    async fn run(&self, req: &ApplyRequest) -> Result<ApplyReport, ApplyError> {
        let inventory_name = req.inventory.metadata.name.clone().unwrap_or_default();
        let inventory = inventory_id(&req.inventory).unwrap_or(&inventory_name).to_string();
        let inventory_api = self.api_for(&gvk_of(&req.inventory)?, req.inventory.metadata.namespace.as_deref()).await?;
        let previous = inventory_api
            .get_opt(&inventory_name)
            .await
            .map_err(|e| kube_err(&inventory_name, e))?
            .map(|obj| inventory_entries(&obj))
            .unwrap_or_default();

        let mut desired = BTreeMap::new();
        for obj in &req.objects {
            self.apply_object(obj, &inventory, &req.options).await?;
            let api_version = obj.types.as_ref().map(|t| t.api_version.clone()).unwrap_or_default();
            desired.insert(object_key(obj), api_version);
        }

        let pruned = if req.options.prune {
            let keys = desired.keys().cloned().collect();
            self.prune(&previous, &keys, &inventory, &req.options).await?
        } else {
            // Unpruned objects stay tracked.
            previous.iter().for_each(|(k, v)| {
                desired.entry(k.clone()).or_insert_with(|| v.clone());
            });
            0
        };

        if req.options.dry_run != DryRunStrategy::Client {
            let mut inv = req.inventory.clone();
            inv.data["data"] = serde_json::to_value(&desired).unwrap_or_default();
            inventory_api
                .patch(&inventory_name, &patch_params(&req.options), &Patch::Apply(&inv))
                .await
                .map_err(|e| kube_err(&inventory_name, e))?;
        }

        Ok(ApplyReport { applied: req.objects.len(), pruned })
    }
}

#[async_trait]
impl Applier for ServerSideApplier {
    async fn apply(&self, cancel: &CancellationToken, req: &ApplyRequest) -> Result<ApplyReport, ApplyError> {
        let timeout = req.options.reconcile_timeout;
        tokio::select! {
            _ = cancel.cancelled() => Err(ApplyError::Cancelled),
            res = tokio::time::timeout(timeout, self.run(req)) => res.unwrap_or(Err(ApplyError::Timeout(timeout))),
        }
    }
}

struct StaleObject {
    gvk: GroupVersionKind,
    namespace: Option<String>,
    name: String,
}

impl StaleObject {
    fn parse(key: &str, api_version: &str) -> Option<Self> {
        let mut parts = key.splitn(4, '_');
        let namespace = parts.next()?;
        let name = parts.next()?;
        let group = parts.next()?;
        let kind = parts.next()?;
        let version = api_version.rsplit('/').next()?;
        if name.is_empty() || kind.is_empty() {
            return None;
        }
        Some(Self {
            gvk: GroupVersionKind::gvk(group, version, kind),
            namespace: (!namespace.is_empty()).then(|| namespace.to_string()),
            name: name.to_string(),
        })
    }
}

fn inventory_entries(obj: &DynamicObject) -> BTreeMap<String, String> {
    obj.data
        .get("data")
        .and_then(|d| serde_json::from_value(d.clone()).ok())
        .unwrap_or_default()
}

fn owning_inventory(obj: &DynamicObject) -> Option<&str> {
    obj.metadata.annotations.as_ref()?.get(OWNING_INVENTORY_ANNOTATION).map(String::as_str)
}

/// Whether an existing object owned by `owner` may be taken over by `inventory`.
fn may_adopt(owner: Option<&str>, inventory: &str, policy: InventoryPolicy) -> bool {
    match (policy, owner) {
        (_, Some(o)) if o == inventory => true,
        (InventoryPolicy::AdoptAll, _) => true,
        (InventoryPolicy::AdoptIfNoInventory, None) => true,
        _ => false,
    }
}

fn patch_params(opts: &ApplyOptions) -> PatchParams {
    let mut pp = PatchParams::apply(FIELD_MANAGER).force();
    pp.dry_run = opts.dry_run == DryRunStrategy::Server;
    pp
}

fn propagation(policy: PropagationPolicy) -> kube::api::PropagationPolicy {
    match policy {
        PropagationPolicy::Orphan => kube::api::PropagationPolicy::Orphan,
        PropagationPolicy::Background => kube::api::PropagationPolicy::Background,
        PropagationPolicy::Foreground => kube::api::PropagationPolicy::Foreground,
    }
}

fn kube_err(object: &str, e: kube::Error) -> ApplyError {
    ApplyError::Kube { object: object.to_string(), message: e.to_string() }
}

#[cfg(test)]
#[path = "ssa_tests.rs"]
mod tests;
