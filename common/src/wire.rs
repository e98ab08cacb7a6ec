//! Contrato con el engine: codificación de `implementation_args`,
//! validación del descriptor y mensajes del registro.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constraint;
use crate::descriptor::{ImplementationType, TaskDescriptor};
use crate::error::HandoffError;

/// Valor de un campo opcional que no se asignó.
pub const UNASSIGNED: &str = "[unassigned]";

/// Valor de un campo numérico que no se asignó.
pub const UNSET_NUMERIC: &str = "-1";

pub fn or_unassigned(value: Option<&str>) -> String {
    value.unwrap_or(UNASSIGNED).to_string()
}

pub fn numeric_or_unset(value: Option<i64>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| UNSET_NUMERIC.to_string())
}

pub fn encode_bool(value: bool) -> String {
    let text = if value { "true" } else { "false" };
    text.to_string()
}

/// Layout de colección asociado a un parámetro de una tarea MPI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutArgs {
    pub param: String,
    pub block_count: Option<i64>,
    pub block_length: Option<i64>,
    pub stride: Option<i64>,
}

/// Argumentos de una implementación MPI, en el orden que espera el engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MpiImplementationArgs {
    pub binary: Option<String>,
    pub working_dir: Option<String>,
    pub runner: String,
    pub flags: Option<String>,
    pub scale_by_cu: String,
    pub fail_by_exit_value: String,
    pub layout: Option<LayoutArgs>,
}

impl MpiImplementationArgs {
    pub fn encode(&self) -> Vec<String> {
        let layout = self.layout.clone().unwrap_or_default();
        vec![
            or_unassigned(self.binary.as_deref()),
            or_unassigned(self.working_dir.as_deref()),
            self.runner.clone(),
            or_unassigned(self.flags.as_deref()),
            self.scale_by_cu.clone(),
            self.fail_by_exit_value.clone(),
            layout.param,
            numeric_or_unset(layout.block_count),
            numeric_or_unset(layout.block_length),
            numeric_or_unset(layout.stride),
        ]
    }
}

/// Comprueba que un descriptor cumple el contrato antes de entregarlo.
pub fn validate(descriptor: &TaskDescriptor) -> Result<(), HandoffError> {
    let signature = descriptor.canonical_signature();
    let reject = |reason: String| HandoffError::Rejected {
        signature: signature.to_string(),
        reason,
    };

    if signature.trim().is_empty() {
        return Err(reject("firma canónica vacía".to_string()));
    }

    match (
        descriptor.implementation_type(),
        descriptor.implementation_args(),
    ) {
        (Some(kind), Some(args)) => {
            if args.len() != kind.expected_arg_count() {
                return Err(reject(format!(
                    "{} espera {} args de implementación y llegaron {}",
                    kind,
                    kind.expected_arg_count(),
                    args.len()
                )));
            }
        }
        (Some(kind), None) => {
            return Err(reject(format!("{} sin args de implementación", kind)));
        }
        (None, Some(_)) => {
            return Err(reject("args de implementación sin tipo".to_string()));
        }
        (None, None) => {
            return Err(reject("sin tipo de implementación".to_string()));
        }
    }

    if descriptor.implementation_signature().is_none() {
        return Err(reject("sin firma de implementación".to_string()));
    }

    if let Some(constraints) = descriptor.constraints() {
        if let Some(key) = constraints.keys().find(|k| !constraint::is_recognized(k)) {
            return Err(reject(format!("restricción desconocida '{}'", key)));
        }
    }

    Ok(())
}

/// Respuesta del registro a un alta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub registration_id: String,
    pub canonical_signature: String,
    /// `false` cuando el descriptor ya estaba registrado con el mismo contenido.
    pub created: bool,
}

/// Descriptor tal como lo guarda el registro.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredElement {
    pub registration_id: String,
    pub descriptor: TaskDescriptor,
    pub registered_at: DateTime<Utc>,
}

impl RegisteredElement {
    pub fn new(descriptor: TaskDescriptor) -> Self {
        Self {
            registration_id: uuid::Uuid::new_v4().to_string(),
            descriptor,
            registered_at: Utc::now(),
        }
    }

    pub fn implementation_type(&self) -> Option<ImplementationType> {
        self.descriptor.implementation_type()
    }
}
