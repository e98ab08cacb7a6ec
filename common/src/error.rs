use thiserror::Error;

use crate::context::Role;
use crate::descriptor::DescriptorField;

/// Opciones de anotación ausentes, desconocidas o incompatibles.
/// Se detectan al declarar la tarea, antes de cualquier llamada.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("{annotation}: falta la opción obligatoria '{option}'")]
    MissingOption {
        annotation: &'static str,
        option: String,
    },

    #[error("{annotation}: opción no soportada '{option}'")]
    UnsupportedOption {
        annotation: &'static str,
        option: String,
    },

    #[error("{annotation}: opciones incompatibles: {detail}")]
    ConflictingOptions {
        annotation: &'static str,
        detail: String,
    },

    #[error("{annotation}: valor inválido para '{option}': {reason}")]
    InvalidValue {
        annotation: &'static str,
        option: String,
        reason: String,
    },

    #[error("{annotation}: el parámetro '{param}' no existe en la tarea {task}")]
    UnknownParameter {
        annotation: &'static str,
        param: String,
        task: String,
    },

    #[error("la tarea {task} no tiene capa @task")]
    MissingTaskLayer { task: String },

    #[error("la tarea {task} declara más de una capa @task")]
    DuplicateTaskLayer { task: String },
}

/// Una capa intentó escribir un campo del descriptor que ya tenía valor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{writer}: el campo '{field}' del descriptor ya estaba asignado")]
pub struct DescriptorConflictError {
    pub field: DescriptorField,
    pub writer: &'static str,
}

/// La tarea no puede resolver su objetivo en la primera llamada.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskDefinitionError {
    #[error("@data_transformation sin transformaciones para la tarea {task}")]
    MissingTransform { task: String },

    #[error("el parámetro '{param}' no existe en la tarea {task}")]
    UnknownParameter { param: String, task: String },

    #[error("el descriptor no tiene firma canónica")]
    MissingSignature,
}

/// Fallos en la entrega del descriptor (o de una invocación) al engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandoffError {
    #[error("no hay engine asociado al contexto de ejecución")]
    NoEngine,

    #[error("el engine rechazó {signature}: {reason}")]
    Rejected { signature: String, reason: String },

    #[error("error de transporte hacia el engine: {0}")]
    Transport(String),

    #[error("estado interno envenenado ({0})")]
    Poisoned(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("transición de rol inválida: {from} -> {to}")]
    InvalidTransition { from: Role, to: Role },

    #[error("rol desconocido '{0}'")]
    UnknownRole(String),
}

/// Error de alto nivel que devuelve una llamada a una tarea declarada.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Conflict(#[from] DescriptorConflictError),

    #[error(transparent)]
    Definition(#[from] TaskDefinitionError),

    #[error(transparent)]
    Handoff(#[from] HandoffError),

    #[error(transparent)]
    Context(#[from] ContextError),

    /// Fallo del propio cuerpo de la tarea (o de una transformación).
    #[error(transparent)]
    Execution(#[from] anyhow::Error),
}
