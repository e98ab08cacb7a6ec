//! Protocolo común de las anotaciones que se apilan sobre una tarea.

use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use crate::args::{Args, Options};
use crate::context::Role;
use crate::declaration::TaskInfo;
use crate::descriptor::{DescriptorBuilder, DescriptorSlot};
use crate::engine::Engine;
use crate::error::{ConfigurationError, TaskError};

/// Datos de la llamada en curso que ven las capas.
pub struct CallScope<'a> {
    pub info: &'a TaskInfo,
    pub role: Role,
    pub engine: Option<&'a Arc<dyn Engine>>,
}

/// Una capa de la pila de anotaciones de una tarea.
///
/// Las opciones se validan al construir la capa; `configure` y `complete`
/// se ejecutan una sola vez, en la primera llamada desde el submitter;
/// `before_call` y las marcas se aplican en cada llamada dentro de contexto.
pub trait Annotation: Send + Sync {
    /// Nombre con el que aparece en logs y errores, ej: "@mpi".
    fn name(&self) -> &'static str;

    /// `true` sólo para la capa base (`@task`).
    fn is_task(&self) -> bool {
        false
    }

    /// Comprobaciones contra el esquema de la función, al declarar.
    fn validate(&self, _info: &TaskInfo) -> Result<(), ConfigurationError> {
        Ok(())
    }

    fn configure(&self, slot: &mut DescriptorSlot, info: &TaskInfo) -> Result<(), TaskError>;

    /// Se ejecuta cuando todas las capas ya configuraron.
    fn complete(&self, _builder: &mut DescriptorBuilder, _info: &TaskInfo) -> Result<(), TaskError> {
        Ok(())
    }

    fn before_call(&self, _args: &mut Args, _call: &CallScope<'_>) -> Result<(), TaskError> {
        Ok(())
    }

    /// `None` deja la marca de la capa exterior tal cual.
    fn prepend_strings(&self) -> Option<bool> {
        None
    }

    fn markers(&self) -> Vec<(&'static str, Value)> {
        Vec::new()
    }
}

/// Reglas de opciones de una anotación: obligatorias, soportadas y
/// obsoletas (con su reemplazo).
pub(crate) struct OptionRules {
    pub annotation: &'static str,
    pub mandatory: &'static [&'static str],
    pub supported: &'static [&'static str],
    pub deprecated: &'static [(&'static str, &'static str)],
}

impl OptionRules {
    /// Valida `options` y devuelve una copia con las claves obsoletas ya
    /// renombradas. `dynamic` acepta claves que no se conocen de antemano.
    pub fn check(
        &self,
        options: &Options,
        dynamic: impl Fn(&str) -> bool,
    ) -> Result<Options, ConfigurationError> {
        let mut normalized = Options::new();

        for (key, value) in options {
            let target = if let Some((_, replacement)) =
                self.deprecated.iter().find(|(old, _)| old == key)
            {
                warn!(
                    "{}: la opción '{}' está obsoleta, usar '{}'",
                    self.annotation, key, replacement
                );
                replacement.to_string()
            } else if self.supported.contains(&key.as_str()) || dynamic(key) {
                key.clone()
            } else {
                return Err(ConfigurationError::UnsupportedOption {
                    annotation: self.annotation,
                    option: key.clone(),
                });
            };

            if normalized.contains_key(&target) {
                return Err(ConfigurationError::ConflictingOptions {
                    annotation: self.annotation,
                    detail: format!("'{}' definida dos veces (con su alias obsoleto)", target),
                });
            }
            normalized.insert(target, value.clone());
        }

        if let Some(missing) = self
            .mandatory
            .iter()
            .find(|m| !normalized.contains_key(**m))
        {
            return Err(ConfigurationError::MissingOption {
                annotation: self.annotation,
                option: missing.to_string(),
            });
        }

        Ok(normalized)
    }

    pub fn invalid(&self, option: &str, reason: impl Into<String>) -> ConfigurationError {
        ConfigurationError::InvalidValue {
            annotation: self.annotation,
            option: option.to_string(),
            reason: reason.into(),
        }
    }

    /// Opción string opcional.
    pub fn string(&self, options: &Options, key: &str) -> Result<Option<String>, ConfigurationError> {
        match options.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(self.invalid(key, "se esperaba un string")),
        }
    }

    /// Opción booleana o string (referencia a variable de entorno), ya
    /// codificada para el engine.
    pub fn flag(&self, options: &Options, key: &str, default: &str) -> Result<String, ConfigurationError> {
        match options.get(key) {
            None => Ok(default.to_string()),
            Some(Value::Bool(b)) => Ok(crate::wire::encode_bool(*b)),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(_) => Err(self.invalid(key, "se esperaba un booleano o una variable de entorno")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::options;
    use serde_json::json;

    const RULES: OptionRules = OptionRules {
        annotation: "@demo",
        mandatory: &["runner"],
        supported: &["runner", "processes", "working_dir"],
        deprecated: &[("workingDir", "working_dir")],
    };

    #[test]
    fn check_renames_deprecated_options() {
        let opts = options(json!({"runner": "mpirun", "workingDir": "/tmp"}));
        let normalized = RULES.check(&opts, |_| false).unwrap();
        assert_eq!(normalized.get("working_dir"), Some(&json!("/tmp")));
        assert!(normalized.get("workingDir").is_none());
    }

    #[test]
    fn check_rejects_unknown_options() {
        let opts = options(json!({"runner": "mpirun", "nodes": 3}));
        let err = RULES.check(&opts, |_| false).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::UnsupportedOption {
                annotation: "@demo",
                option: "nodes".into()
            }
        );
    }

    #[test]
    fn check_accepts_dynamic_keys() {
        let opts = options(json!({"runner": "mpirun", "x_layout": {}}));
        assert!(RULES.check(&opts, |k| k.ends_with("_layout")).is_ok());
    }

    #[test]
    fn check_reports_missing_mandatory_options() {
        let opts = options(json!({"processes": 2}));
        let err = RULES.check(&opts, |_| false).unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingOption { ref option, .. } if option == "runner"));
    }

    #[test]
    fn check_rejects_option_and_deprecated_alias_together() {
        let opts = options(json!({"runner": "a", "workingDir": "/a", "working_dir": "/b"}));
        let err = RULES.check(&opts, |_| false).unwrap_err();
        assert!(matches!(err, ConfigurationError::ConflictingOptions { .. }));
    }

    #[test]
    fn flag_encodes_bools_and_keeps_strings() {
        let opts = options(json!({"a": true, "b": "$SCALE", "c": [1]}));
        assert_eq!(RULES.flag(&opts, "a", "false").unwrap(), "true");
        assert_eq!(RULES.flag(&opts, "b", "false").unwrap(), "$SCALE");
        assert_eq!(RULES.flag(&opts, "missing", "false").unwrap(), "false");
        assert!(RULES.flag(&opts, "c", "false").is_err());
    }
}
