//! Manifest parsing for apply/delete round-trips
//!
//! Raw manifest text (YAML, multi-document, or a single JSON object) is parsed
//! into [`ManifestObject`]s carrying everything needed to address the object
//! through the dynamic API: apiVersion, kind, name, namespace and an
//! [`ApiResource`]. The same parser serves both apply and delete, so whatever
//! text created a resource can also delete it.

use kube::discovery::ApiResource;
use serde_json::{Map, Number, Value};
use yaml_rust2::{Yaml, YamlLoader};

use crate::Error;

/// A single object parsed out of manifest text
#[derive(Debug, Clone)]
pub struct ManifestObject {
    /// The full object as JSON, ready for server-side apply
    pub value: Value,
    /// apiVersion (e.g., "apps/v1")
    pub api_version: String,
    /// Kind (e.g., "Deployment")
    pub kind: String,
    /// metadata.name
    pub name: String,
    /// metadata.namespace, when set
    pub namespace: Option<String>,
    /// Dynamic API addressing for this kind
    pub api_resource: ApiResource,
}

impl ManifestObject {
    /// `namespace/name` for namespaced objects, `name` otherwise
    pub fn qualified_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}", ns, self.name),
            None => self.name.clone(),
        }
    }

    fn from_value(value: Value) -> Result<Self, Error> {
        let field = |pointer: &str| {
            value
                .pointer(pointer)
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let api_version = field("/apiVersion")
            .ok_or_else(|| Error::serialization("manifest missing apiVersion"))?;
        let kind = field("/kind").ok_or_else(|| Error::serialization("manifest missing kind"))?;
        let name = field("/metadata/name").ok_or_else(|| {
            Error::serialization(format!("{} manifest missing metadata.name", kind))
        })?;
        let namespace = field("/metadata/namespace");
        let api_resource = build_api_resource(&api_version, &kind);

        Ok(Self {
            value,
            api_version,
            kind,
            name,
            namespace,
            api_resource,
        })
    }
}

/// Parse manifest text into objects, in document order.
///
/// Empty documents (e.g. a trailing `---`) are skipped. A `List` kind is
/// flattened into its items.
pub fn parse_manifests(manifest: &str) -> Result<Vec<ManifestObject>, Error> {
    let values = if manifest.trim_start().starts_with('{') {
        vec![serde_json::from_str(manifest)
            .map_err(|e| Error::serialization(format!("invalid JSON manifest: {}", e)))?]
    } else {
        parse_yaml_multi(manifest)?
    };

    let mut objects = Vec::new();
    for value in values {
        if value.is_null() {
            continue;
        }
        if value.get("kind").and_then(Value::as_str) == Some("List") {
            let items = value
                .get("items")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for item in items {
                objects.push(ManifestObject::from_value(item)?);
            }
            continue;
        }
        objects.push(ManifestObject::from_value(value)?);
    }
    Ok(objects)
}

/// Built-in kinds that live outside any namespace
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "APIService",
    "CSIDriver",
    "CSINode",
    "CertificateSigningRequest",
    "CustomResourceDefinition",
    "FlowSchema",
    "IngressClass",
    "MutatingWebhookConfiguration",
    "Namespace",
    "Node",
    "PersistentVolume",
    "PriorityClass",
    "PriorityLevelConfiguration",
    "RuntimeClass",
    "StorageClass",
    "ValidatingAdmissionPolicy",
    "ValidatingAdmissionPolicyBinding",
    "ValidatingWebhookConfiguration",
    "VolumeAttachment",
];

/// Whether objects of `kind` are cluster-scoped.
///
/// Without discovery this is decided by name: the built-in cluster-scoped
/// kinds, plus any kind prefixed `Cluster` (ClusterRole, ClusterIssuer, ...).
pub fn is_cluster_scoped(kind: &str) -> bool {
    CLUSTER_SCOPED_KINDS.contains(&kind) || kind.starts_with("Cluster")
}

/// Place namespaced objects that carry no `metadata.namespace` into `namespace`.
///
/// Manifests that need no change are returned as-is. Otherwise the objects
/// are re-rendered as a JSON `List`, which [`parse_manifests`] flattens back
/// in the same order, so apply and delete address the same objects.
pub fn default_namespace(manifest: &str, namespace: &str) -> Result<String, Error> {
    let mut objects = parse_manifests(manifest)?;
    let missing = |o: &ManifestObject| o.namespace.is_none() && !is_cluster_scoped(&o.kind);
    if !objects.iter().any(missing) {
        return Ok(manifest.to_string());
    }

    for object in objects.iter_mut().filter(|o| missing(&**o)) {
        object.value["metadata"]["namespace"] = Value::String(namespace.to_string());
    }
    let list = serde_json::json!({
        "apiVersion": "v1",
        "kind": "List",
        "items": objects.into_iter().map(|o| o.value).collect::<Vec<_>>(),
    });
    serde_json::to_string(&list).map_err(|e| Error::serialization(e.to_string()))
}

/// Parse a multi-document YAML string into JSON values, one per document
pub fn parse_yaml_multi(input: &str) -> Result<Vec<Value>, Error> {
    let docs = YamlLoader::load_from_str(input)
        .map_err(|e| Error::serialization(format!("invalid YAML: {}", e)))?;
    docs.into_iter().map(yaml_to_json).collect()
}

fn yaml_key(key: Yaml) -> Result<String, Error> {
    Ok(match key {
        Yaml::String(s) | Yaml::Real(s) => s,
        Yaml::Integer(i) => i.to_string(),
        Yaml::Boolean(b) => b.to_string(),
        Yaml::Null => "null".to_string(),
        other => {
            return Err(Error::serialization(format!(
                "unsupported YAML key: {:?}",
                other
            )))
        }
    })
}

fn yaml_to_json(yaml: Yaml) -> Result<Value, Error> {
    Ok(match yaml {
        Yaml::Null => Value::Null,
        Yaml::Boolean(b) => Value::Bool(b),
        Yaml::Integer(i) => Value::Number(i.into()),
        Yaml::Real(s) => {
            let f: f64 = s
                .parse()
                .map_err(|e| Error::serialization(format!("invalid float {}: {}", s, e)))?;
            Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Array(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<_, _>>()?,
        ),
        Yaml::Hash(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(yaml_key(k)?, yaml_to_json(v)?);
            }
            Value::Object(out)
        }
        Yaml::Alias(_) => return Err(Error::serialization("YAML aliases not supported")),
        Yaml::BadValue => return Err(Error::serialization("bad YAML value")),
    })
}

/// Parse apiVersion into (group, version)
///
/// # Examples
/// ```
/// use ktf_common::manifest::parse_api_version;
///
/// assert_eq!(parse_api_version("apps/v1"), ("apps".to_string(), "v1".to_string()));
/// assert_eq!(parse_api_version("v1"), (String::new(), "v1".to_string()));
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Build an ApiResource from a known apiVersion and kind, without discovery
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Kinds whose plural does not follow the suffix rules below
const IRREGULAR_PLURALS: &[(&str, &str)] = &[
    ("endpoints", "endpoints"),
    ("podsecuritypolicy", "podsecuritypolicies"),
    ("componentstatus", "componentstatuses"),
];

/// Lowercase plural resource name for a kind (e.g., "Ingress" -> "ingresses")
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if let Some((_, plural)) = IRREGULAR_PLURALS.iter().find(|(k, _)| *k == lower) {
        return (*plural).to_string();
    }
    if lower.ends_with('s') || lower.ends_with('x') || lower.ends_with("ch") {
        format!("{}es", lower)
    } else if let Some(stem) = lower.strip_suffix('y') {
        if stem.ends_with(['a', 'e', 'i', 'o', 'u']) {
            format!("{}s", lower)
        } else {
            format!("{}ies", stem)
        }
    } else {
        format!("{}s", lower)
    }
}
