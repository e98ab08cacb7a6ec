use serde_json::Value;
use std::collections::BTreeMap;

use crate::annotation::Annotation;
use crate::args::Options;
use crate::declaration::TaskInfo;
use crate::descriptor::DescriptorSlot;
use crate::error::{ConfigurationError, TaskError};

const NAME: &str = "@constraint";

/// Requisitos de recursos que entiende el engine.
pub const RECOGNIZED_CONSTRAINTS: &[&str] = &[
    "computing_units",
    "processor_name",
    "processor_speed",
    "processor_architecture",
    "processor_type",
    "processor_property_name",
    "processor_property_value",
    "processor_internal_memory_size",
    "memory_size",
    "memory_type",
    "storage_size",
    "storage_type",
    "storage_bw",
    "operating_system_type",
    "operating_system_distribution",
    "operating_system_version",
    "app_software",
    "host_queues",
    "wall_clock_limit",
    "is_local",
];

pub fn is_recognized(key: &str) -> bool {
    RECOGNIZED_CONSTRAINTS.contains(&key)
}

fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Clave reconocida para `key`, aceptando también su forma camelCase
/// (`computingUnits` -> `computing_units`).
pub fn normalize_key(key: &str) -> Option<&'static str> {
    let snake = to_snake_case(key);
    RECOGNIZED_CONSTRAINTS
        .iter()
        .copied()
        .find(|known| *known == snake)
}

/// Capa de restricciones de recursos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceConstraint {
    constraints: BTreeMap<String, String>,
}

impl ResourceConstraint {
    pub fn from_options(options: &Options) -> Result<Self, ConfigurationError> {
        if options.is_empty() {
            return Err(ConfigurationError::MissingOption {
                annotation: NAME,
                option: "<restricción>".to_string(),
            });
        }

        let mut constraints = BTreeMap::new();
        for (key, value) in options {
            let canonical = normalize_key(key).ok_or_else(|| ConfigurationError::UnsupportedOption {
                annotation: NAME,
                option: key.clone(),
            })?;
            let rendered = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => crate::wire::encode_bool(*b),
                _ => {
                    return Err(ConfigurationError::InvalidValue {
                        annotation: NAME,
                        option: key.clone(),
                        reason: "se esperaba un valor escalar".to_string(),
                    })
                }
            };
            if constraints.insert(canonical.to_string(), rendered).is_some() {
                return Err(ConfigurationError::ConflictingOptions {
                    annotation: NAME,
                    detail: format!("'{}' definida dos veces", canonical),
                });
            }
        }

        Ok(Self { constraints })
    }

    pub fn constraints(&self) -> &BTreeMap<String, String> {
        &self.constraints
    }
}

impl Annotation for ResourceConstraint {
    fn name(&self) -> &'static str {
        NAME
    }

    fn configure(&self, slot: &mut DescriptorSlot, _info: &TaskInfo) -> Result<(), TaskError> {
        // si todavía no hay descriptor lo creamos sólo con las restricciones;
        // @task lo extiende después
        slot.get_or_create(NAME)
            .set_constraints(self.constraints.clone(), NAME)?;
        Ok(())
    }

    fn prepend_strings(&self) -> Option<bool> {
        Some(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{options, ParameterSchema};
    use serde_json::json;

    #[test]
    fn values_are_rendered_as_strings() {
        let c = ResourceConstraint::from_options(&options(json!({
            "computing_units": 4,
            "memory_size": "8",
            "is_local": true,
        })))
        .unwrap();

        let m = c.constraints();
        assert_eq!(m.get("computing_units").unwrap(), "4");
        assert_eq!(m.get("memory_size").unwrap(), "8");
        assert_eq!(m.get("is_local").unwrap(), "true");
    }

    #[test]
    fn camel_case_keys_are_normalized() {
        let c = ResourceConstraint::from_options(&options(json!({"computingUnits": 2}))).unwrap();
        assert_eq!(c.constraints().get("computing_units").unwrap(), "2");
        assert_eq!(normalize_key("wallClockLimit"), Some("wall_clock_limit"));
        assert_eq!(normalize_key("gpu"), None);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = ResourceConstraint::from_options(&options(json!({"gpu_count": 1}))).unwrap_err();
        assert!(matches!(err, ConfigurationError::UnsupportedOption { .. }));
    }

    #[test]
    fn empty_constraints_are_rejected() {
        let err = ResourceConstraint::from_options(&Options::new()).unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingOption { .. }));
    }

    #[test]
    fn non_scalar_values_are_rejected() {
        let err =
            ResourceConstraint::from_options(&options(json!({"host_queues": ["a", "b"]}))).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
    }

    #[test]
    fn alias_and_key_together_conflict() {
        let err = ResourceConstraint::from_options(&options(json!({
            "computingUnits": 1,
            "computing_units": 2,
        })))
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::ConflictingOptions { .. }));
    }

    #[test]
    fn configure_creates_the_descriptor_when_first() {
        let info = TaskInfo::new("demo", "f", ParameterSchema::new());
        let c = ResourceConstraint::from_options(&options(json!({"computing_units": 2}))).unwrap();
        let mut slot = DescriptorSlot::new();

        c.configure(&mut slot, &info).unwrap();

        assert_eq!(slot.created_by(), Some(NAME));
        assert!(slot.get().unwrap().canonical_signature().is_none());
        assert!(c.configure(&mut slot, &info).is_err());
    }
}
