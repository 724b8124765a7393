// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

const MULTI_DOC: &str = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: first
  namespace: apps
data:
  key: value
---
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
"#;

#[test]
fn parses_documents_and_skips_empty_ones() {
    let objects = parse_manifests("manifest.yaml", MULTI_DOC.as_bytes()).unwrap();
    assert_eq!(objects.len(), 2);
    assert_eq!(objects[0].metadata.name.as_deref(), Some("first"));
    assert_eq!(objects[0].data["data"]["key"], "value");
    assert_eq!(objects[1].metadata.namespace, None);
}

#[test]
fn parses_json() {
    let json = br#"{"apiVersion":"v1","kind":"Secret","metadata":{"name":"s"}}"#;
    let objects = parse_manifests("secret.json", json).unwrap();
    assert_eq!(objects.len(), 1);
    assert_eq!(gvk_of(&objects[0]).unwrap().kind, "Secret");
}

#[test]
fn flattens_list_kinds_in_order() {
    let list = r#"
apiVersion: v1
kind: List
items:
  - apiVersion: v1
    kind: ConfigMap
    metadata: { name: a }
  - apiVersion: v1
    kind: ConfigMap
    metadata: { name: b }
"#;
    let names: Vec<_> = parse_manifests("list.yaml", list.as_bytes())
        .unwrap()
        .into_iter()
        .filter_map(|o| o.metadata.name)
        .collect();
    assert_eq!(names, vec!["a", "b"]);
}

#[test]
fn empty_file_yields_nothing() {
    assert!(parse_manifests("empty.yaml", b"").unwrap().is_empty());
}

#[test]
fn malformed_yaml_names_the_source() {
    let err = parse_manifests("bad.yaml", b"a: [unterminated").unwrap_err();
    assert!(err.to_string().starts_with("bad.yaml: "), "{err}");
}

#[test]
fn missing_name_is_rejected() {
    let err = parse_manifests("anon.yaml", b"apiVersion: v1\nkind: ConfigMap\nmetadata: {}\n").unwrap_err();
    assert_eq!(
        err,
        ManifestError::MissingField { source_name: "anon.yaml".into(), field: "metadata.name" }
    );
}

#[yare::parameterized(
    core = { "v1", "", "v1" },
    grouped = { "apps/v1", "apps", "v1" },
    crd = { "notification.toolkit.fluxcd.io/v1", "notification.toolkit.fluxcd.io", "v1" },
)]
fn splits_api_version(api_version: &str, group: &str, version: &str) {
    let doc = format!("apiVersion: {api_version}\nkind: Thing\nmetadata: {{ name: t }}\n");
    let obj = parse_manifests("t.yaml", doc.as_bytes()).unwrap().remove(0);
    let gvk = gvk_of(&obj).unwrap();
    assert_eq!(gvk.group, group);
    assert_eq!(gvk.version, version);
}

#[test]
fn inventory_objects_are_detected_by_label() {
    let doc = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: inv\n  labels:\n    cli-utils.sigs.k8s.io/inventory-id: abc\n";
    let obj = parse_manifests("inv.yaml", doc.as_bytes()).unwrap().remove(0);
    assert!(is_inventory_object(&obj));
    assert_eq!(inventory_id(&obj), Some("abc"));
}

#[test]
fn object_keys_include_group_and_kind() {
    let obj = parse_manifests("m.yaml", MULTI_DOC.as_bytes()).unwrap();
    assert_eq!(object_key(&obj[0]), "apps_first__ConfigMap");
    assert_eq!(object_key(&obj[1]), "_web_apps_Deployment");
}

#[yare::parameterized(
    namespace = { "", "Namespace", true },
    cluster_role = { "rbac.authorization.k8s.io", "ClusterRole", true },
    crd = { "apiextensions.k8s.io", "CustomResourceDefinition", true },
    role = { "rbac.authorization.k8s.io", "Role", false },
    deployment = { "apps", "Deployment", false },
)]
fn cluster_scoped_kinds(group: &str, kind: &str, expected: bool) {
    assert_eq!(is_cluster_scoped_kind(group, kind), expected);
}

fn inventory(name: &str) -> String {
    format!(
        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {name}\n  labels:\n    cli-utils.sigs.k8s.io/inventory-id: {name}\n"
    )
}

#[test]
fn split_inventory_takes_the_single_inventory() {
    let doc = format!("{}---\n{}", inventory("inv"), MULTI_DOC);
    let objects = parse_manifests("m.yaml", doc.as_bytes()).unwrap();
    let (inv, rest) = split_inventory(objects).unwrap();
    assert_eq!(inv.and_then(|o| o.metadata.name).as_deref(), Some("inv"));
    assert_eq!(rest.len(), 2);
}

#[test]
fn split_inventory_rejects_two_inventories() {
    let doc = format!("{}---\n{}", inventory("a"), inventory("b"));
    let objects = parse_manifests("m.yaml", doc.as_bytes()).unwrap();
    let err = split_inventory(objects).unwrap_err();
    assert_eq!(err.to_string(), "expecting zero or one inventory object, found 2");
}
