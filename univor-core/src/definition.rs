//! Descriptor definitions: the grouped creation and execution parameters.
//!
//! A definition is a mapping of known top-level keys. Some keys are blocks
//! (`placement`, `network`) whose members merge individually when layers are
//! combined; lists and scalars replace wholesale.
//!
//! ```yaml
//! use_hypervisor: ESXi_1        # creation
//! use_prototype: proto_docker   # creation
//! placement:                    # creation
//!   datastore: ds_fast
//! memory: 4096                  # execution
//! network:                      # execution
//!   nics:
//!     - network: lab
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use univor_driver::{NicSpec, Placement, ReconfigureDelta, VmSpec};

use crate::error::{Result, UnivorError};

pub const USE_HYPERVISOR: &str = "use_hypervisor";
pub const USE_PROTOTYPE: &str = "use_prototype";
pub const VM_NAME: &str = "vm_name";
pub const PLACEMENT: &str = "placement";
pub const MEMORY: &str = "memory";
pub const CPU: &str = "cpu";
pub const NETWORK: &str = "network";
pub const MEDIA: &str = "media";
pub const TAGS: &str = "tags";

/// Smallest memory size accepted, in MiB.
pub const MIN_MEMORY_MIB: u64 = 128;

/// Mutability tier of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Fixed once the VM exists (hypervisor, image, disk placement, name).
    Creation,
    /// Adjustable on a cold VM (memory, CPU, NICs, media).
    Execution,
}

/// Tier of a top-level key, or `None` for unknown keys.
pub fn tier_of(key: &str) -> Option<Tier> {
    match key {
        USE_HYPERVISOR | USE_PROTOTYPE | VM_NAME | PLACEMENT => Some(Tier::Creation),
        MEMORY | CPU | NETWORK | MEDIA | TAGS => Some(Tier::Execution),
        _ => None,
    }
}

/// A (possibly partial) definition layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Definition(Map<String, Value>);

impl Definition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON value, which must be a mapping of valid parameters.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Object(map) => {
                let definition = Self(map);
                definition.validate()?;
                Ok(definition)
            }
            other => Err(UnivorError::Validation(format!(
                "Definition must be a mapping, got {}", type_name(&other)
            ))),
        }
    }

    /// Parse a definition from YAML text, falling back to JSON.
    pub fn parse(text: &str) -> Result<Self> {
        let value = match serde_yaml::from_str::<Value>(text) {
            Ok(value) => value,
            Err(yaml_err) => serde_json::from_str::<Value>(text).map_err(|_| {
                UnivorError::Validation(format!("Invalid definition payload: {}", yaml_err))
            })?,
        };
        Self::from_value(value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set one top-level parameter after validating it.
    pub fn set(&mut self, key: &str, value: Value) -> Result<()> {
        validate_entry(key, &value)?;
        self.0.insert(key.to_string(), value);
        Ok(())
    }

    /// Builder form of [`Definition::set`].
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Result<Self> {
        self.set(key, value.into())?;
        Ok(self)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Check every key is known and every value is well-formed.
    pub fn validate(&self) -> Result<()> {
        for (key, value) in &self.0 {
            validate_entry(key, value)?;
        }
        Ok(())
    }

    /// Tiers touched by the keys of this layer.
    pub fn tiers(&self) -> Result<BTreeSet<Tier>> {
        self.0
            .keys()
            .map(|key| {
                tier_of(key).ok_or_else(|| UnivorError::Validation(format!("Unknown parameter: {}", key)))
            })
            .collect()
    }

    /// Merge `layer` on top of `self`. Blocks merge member by member, an
    /// explicit `null` removes the key, anything else replaces.
    pub fn merge_from(&mut self, layer: &Definition) {
        deep_merge(&mut self.0, &layer.0);
    }

    /// Fail unless the creation parameters needed to deploy are present.
    pub fn require_creation(&self) -> Result<()> {
        for key in [USE_HYPERVISOR, USE_PROTOTYPE] {
            if self.str_param(key).is_none() {
                return Err(UnivorError::Validation(format!(
                    "Required creation parameter '{}' is missing", key
                )));
            }
        }
        Ok(())
    }

    // =========================================================================
    // Typed accessors
    // =========================================================================

    pub fn use_hypervisor(&self) -> Option<&str> {
        self.str_param(USE_HYPERVISOR)
    }

    pub fn use_prototype(&self) -> Option<&str> {
        self.str_param(USE_PROTOTYPE)
    }

    pub fn vm_name(&self) -> Option<&str> {
        self.str_param(VM_NAME)
    }

    /// Memory in MiB.
    pub fn memory(&self) -> Option<u64> {
        self.0.get(MEMORY).and_then(Value::as_u64)
    }

    pub fn cpu(&self) -> Option<u32> {
        self.0.get(CPU).and_then(Value::as_u64).and_then(|n| u32::try_from(n).ok())
    }

    pub fn placement(&self) -> Placement {
        let block = self.0.get(PLACEMENT).and_then(Value::as_object);
        let member = |name: &str| {
            block
                .and_then(|b| b.get(name))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Placement {
            datastore: member("datastore"),
            resource_pool: member("resource_pool"),
        }
    }

    pub fn nics(&self) -> Result<Vec<NicSpec>> {
        match self.0.get(NETWORK).and_then(|n| n.get("nics")) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(nics) => serde_json::from_value(nics.clone())
                .map_err(|e| UnivorError::Validation(format!("Invalid network.nics: {}", e))),
        }
    }

    pub fn media(&self) -> Vec<String> {
        self.string_list(MEDIA)
    }

    pub fn tags(&self) -> Vec<String> {
        self.string_list(TAGS)
    }

    // =========================================================================
    // Driver-facing views
    // =========================================================================

    /// Build the driver spec. `default_name` is used when `vm_name` is unset.
    pub fn to_vm_spec(&self, default_name: &str) -> Result<VmSpec> {
        let prototype = self.use_prototype().ok_or_else(|| {
            UnivorError::Validation(format!("Required creation parameter '{}' is missing", USE_PROTOTYPE))
        })?;

        let mut spec = VmSpec::new(self.vm_name().unwrap_or(default_name), prototype);
        if let Some(cpu) = self.cpu() {
            spec.cpu = cpu;
        }
        if let Some(memory) = self.memory() {
            spec.memory_mib = memory;
        }
        spec.placement = self.placement();
        spec.nics = self.nics()?;
        spec.media = self.media();
        Ok(spec)
    }

    /// Top-level keys whose values differ between `self` and `other`.
    pub fn drift(&self, other: &Definition) -> Vec<String> {
        let keys: BTreeSet<&String> = self.0.keys().chain(other.0.keys()).collect();
        keys.into_iter()
            .filter(|key| self.0.get(*key) != other.0.get(*key))
            .cloned()
            .collect()
    }

    /// Creation-tier keys that differ from `deployed`.
    pub fn creation_drift(&self, deployed: &Definition) -> Vec<String> {
        self.drift(deployed)
            .into_iter()
            .filter(|key| tier_of(key) == Some(Tier::Creation))
            .collect()
    }

    /// Execution-tier changes needed to bring a VM built from `deployed` in
    /// line with `self`.
    pub fn execution_delta(&self, deployed: &Definition, default_name: &str) -> Result<ReconfigureDelta> {
        let want = self.to_vm_spec(default_name)?;
        let have = deployed.to_vm_spec(default_name)?;

        Ok(ReconfigureDelta {
            cpu: (want.cpu != have.cpu).then_some(want.cpu),
            memory_mib: (want.memory_mib != have.memory_mib).then_some(want.memory_mib),
            nics: (want.nics != have.nics).then_some(want.nics),
            media: (want.media != have.media).then_some(want.media),
        })
    }

    fn str_param(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    fn string_list(&self, key: &str) -> Vec<String> {
        self.0
            .get(key)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default()
    }
}

impl TryFrom<Value> for Definition {
    type Error = UnivorError;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

/// Merge the given layers left to right into a fresh definition.
pub fn merge_layers<'a>(layers: impl IntoIterator<Item = &'a Definition>) -> Definition {
    let mut merged = Definition::new();
    for layer in layers {
        merged.merge_from(layer);
    }
    merged
}

fn deep_merge(base: &mut Map<String, Value>, layer: &Map<String, Value>) {
    for (key, value) in layer {
        match (base.get_mut(key), value) {
            (_, Value::Null) => {
                base.remove(key);
            }
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

fn invalid(key: &str, expected: &str, value: &Value) -> UnivorError {
    UnivorError::Validation(format!("'{}' must be {}, got {}", key, expected, type_name(value)))
}

fn non_empty_string(key: &str, value: &Value) -> Result<()> {
    match value.as_str() {
        Some(s) if !s.trim().is_empty() => Ok(()),
        _ => Err(invalid(key, "a non-empty string", value)),
    }
}

fn string_list(key: &str, value: &Value) -> Result<()> {
    match value.as_array() {
        Some(items) if items.iter().all(Value::is_string) => Ok(()),
        _ => Err(invalid(key, "a list of strings", value)),
    }
}

fn block<'a>(key: &str, value: &'a Value, members: &[&str]) -> Result<&'a Map<String, Value>> {
    let map = value.as_object().ok_or_else(|| invalid(key, "a mapping", value))?;
    if let Some(unknown) = map.keys().find(|k| !members.contains(&k.as_str())) {
        return Err(UnivorError::Validation(format!("Unknown parameter: {}.{}", key, unknown)));
    }
    Ok(map)
}

fn validate_nic(nic: &Value) -> Result<()> {
    let map = block("network.nics[]", nic, &["network", "mac"])?;
    match map.get("network") {
        Some(network) => non_empty_string("network.nics[].network", network)?,
        None => {
            return Err(UnivorError::Validation(
                "'network.nics[].network' is required".to_string()
            ))
        }
    }
    match map.get("mac") {
        None | Some(Value::Null) => Ok(()),
        Some(mac) => non_empty_string("network.nics[].mac", mac),
    }
}

fn validate_entry(key: &str, value: &Value) -> Result<()> {
    if tier_of(key).is_none() {
        return Err(UnivorError::Validation(format!("Unknown parameter: {}", key)));
    }
    if value.is_null() {
        return Ok(());
    }

    match key {
        USE_HYPERVISOR | USE_PROTOTYPE | VM_NAME => non_empty_string(key, value),
        PLACEMENT => {
            let map = block(key, value, &["datastore", "resource_pool"])?;
            for (member, v) in map {
                if !v.is_null() {
                    non_empty_string(&format!("{}.{}", key, member), v)?;
                }
            }
            Ok(())
        }
        MEMORY => match value.as_u64() {
            Some(mib) if mib >= MIN_MEMORY_MIB => Ok(()),
            _ => Err(invalid(key, &format!("an integer >= {}", MIN_MEMORY_MIB), value)),
        },
        CPU => match value.as_u64() {
            Some(n) if n >= 1 && n <= u64::from(u32::MAX) => Ok(()),
            _ => Err(invalid(key, "a positive integer", value)),
        },
        NETWORK => {
            let map = block(key, value, &["nics"])?;
            match map.get("nics") {
                None | Some(Value::Null) => Ok(()),
                Some(Value::Array(nics)) => nics.iter().try_for_each(validate_nic),
                Some(other) => Err(invalid("network.nics", "a list", other)),
            }
        }
        MEDIA | TAGS => string_list(key, value),
        _ => Err(UnivorError::Validation(format!("Unknown parameter: {}", key))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn def(value: Value) -> Definition {
        Definition::from_value(value).unwrap()
    }

    #[test]
    fn test_validation_rejects_bad_input() {
        assert!(Definition::from_value(json!({"memory": 64})).is_err());
        assert!(Definition::from_value(json!({"cpu": 0})).is_err());
        assert!(Definition::from_value(json!({"use_hypervisor": ""})).is_err());
        assert!(Definition::from_value(json!({"colour": "blue"})).is_err());
        assert!(Definition::from_value(json!({"placement": {"rack": "r1"}})).is_err());
        assert!(Definition::from_value(json!({"network": {"nics": [{"mac": "aa"}]}})).is_err());
        assert!(Definition::from_value(json!(["memory"])).is_err());

        let ok = json!({
            "use_hypervisor": "ESXi_1",
            "memory": 4096,
            "network": {"nics": [{"network": "lab", "mac": "00:50:56:00:00:01"}]},
            "tags": ["course"],
        });
        assert!(Definition::from_value(ok).is_ok());
    }

    #[test]
    fn test_parse_yaml_then_json() {
        let yaml = "use_hypervisor: ESXi_1\nmemory: 2048\n";
        let d = Definition::parse(yaml).unwrap();
        assert_eq!(d.use_hypervisor(), Some("ESXi_1"));
        assert_eq!(d.memory(), Some(2048));

        let d = Definition::parse(r#"{"cpu": 2}"#).unwrap();
        assert_eq!(d.cpu(), Some(2));

        assert!(Definition::parse("").unwrap().is_empty());
        assert!(Definition::parse("- not a mapping").is_err());
    }

    #[test]
    fn test_deep_merge_preserves_block_siblings() {
        let mut base = def(json!({
            "use_hypervisor": "ESXi_1",
            "placement": {"datastore": "ds1", "resource_pool": "pool_a"},
            "media": ["a.iso"],
        }));
        let layer = def(json!({
            "placement": {"resource_pool": "pool_b"},
            "media": ["b.iso"],
        }));

        base.merge_from(&layer);
        assert_eq!(base.placement().datastore.as_deref(), Some("ds1"));
        assert_eq!(base.placement().resource_pool.as_deref(), Some("pool_b"));
        assert_eq!(base.media(), vec!["b.iso".to_string()]);
    }

    #[test]
    fn test_null_removes_inherited_key() {
        let mut base = def(json!({"memory": 4096, "placement": {"datastore": "ds1"}}));
        base.merge_from(&def(json!({"memory": null, "placement": {"datastore": null}})));

        assert_eq!(base.memory(), None);
        assert!(base.placement().datastore.is_none());
    }

    #[test]
    fn test_tiers_and_require_creation() {
        let d = def(json!({"use_prototype": "p", "memory": 256}));
        let tiers = d.tiers().unwrap();
        assert!(tiers.contains(&Tier::Creation));
        assert!(tiers.contains(&Tier::Execution));

        let err = d.require_creation().unwrap_err();
        assert!(err.to_string().contains("use_hypervisor"));
    }

    #[test]
    fn test_vm_spec_and_delta() {
        let deployed = def(json!({
            "use_hypervisor": "ESXi_1",
            "use_prototype": "proto_docker",
            "memory": 2048,
        }));
        let spec = deployed.to_vm_spec("courseA_student1").unwrap();
        assert_eq!(spec.name, "courseA_student1");
        assert_eq!(spec.memory_mib, 2048);
        assert_eq!(spec.cpu, 1);

        let mut wanted = deployed.clone();
        wanted.set(MEMORY, json!(4096)).unwrap();
        let delta = wanted.execution_delta(&deployed, "x").unwrap();
        assert_eq!(delta.memory_mib, Some(4096));
        assert!(delta.cpu.is_none() && delta.nics.is_none());

        assert_eq!(wanted.drift(&deployed), vec![MEMORY.to_string()]);
        assert!(wanted.creation_drift(&deployed).is_empty());
    }
}
