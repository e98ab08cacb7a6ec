use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};
use tracing::debug;

use crate::error::{DescriptorConflictError, TaskDefinitionError};

/// Variante de implementación que el engine sabe ejecutar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImplementationType {
    Plain,
    Mpi,
    PythonMpi,
    Binary,
}

impl ImplementationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImplementationType::Plain => "PLAIN",
            ImplementationType::Mpi => "MPI",
            ImplementationType::PythonMpi => "PYTHON_MPI",
            ImplementationType::Binary => "BINARY",
        }
    }

    /// Número de posiciones de `implementation_args` que espera el engine.
    pub fn expected_arg_count(&self) -> usize {
        match self {
            // [module, function]
            ImplementationType::Plain => 2,
            // [binary, working_dir, runner, flags, scale_by_cu,
            //  fail_by_exit_value, layout_param, block_count, block_length, stride]
            ImplementationType::Mpi | ImplementationType::PythonMpi => 10,
            // [binary, working_dir, fail_by_exit_value]
            ImplementationType::Binary => 3,
        }
    }
}

impl fmt::Display for ImplementationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorField {
    CanonicalSignature,
    ImplementationSignature,
    Constraints,
    ImplementationType,
    Io,
    ImplementationArgs,
}

impl DescriptorField {
    pub fn as_str(&self) -> &'static str {
        match self {
            DescriptorField::CanonicalSignature => "canonical_signature",
            DescriptorField::ImplementationSignature => "implementation_signature",
            DescriptorField::Constraints => "constraints",
            DescriptorField::ImplementationType => "implementation_type",
            DescriptorField::Io => "io",
            DescriptorField::ImplementationArgs => "implementation_args",
        }
    }
}

impl fmt::Display for DescriptorField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptor sellado de una tarea: lo que se entrega al engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    canonical_signature: String,
    implementation_signature: Option<String>,
    constraints: Option<BTreeMap<String, String>>,
    implementation_type: Option<ImplementationType>,
    io: Option<bool>,
    implementation_args: Option<Vec<String>>,
}

impl TaskDescriptor {
    pub fn canonical_signature(&self) -> &str {
        &self.canonical_signature
    }

    pub fn implementation_signature(&self) -> Option<&str> {
        self.implementation_signature.as_deref()
    }

    pub fn constraints(&self) -> Option<&BTreeMap<String, String>> {
        self.constraints.as_ref()
    }

    pub fn implementation_type(&self) -> Option<ImplementationType> {
        self.implementation_type
    }

    pub fn io(&self) -> Option<bool> {
        self.io
    }

    pub fn implementation_args(&self) -> Option<&[String]> {
        self.implementation_args.as_deref()
    }
}

impl fmt::Display for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn or_none<T: fmt::Display>(v: Option<T>) -> String {
            v.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
        }

        let constraints = match &self.constraints {
            Some(map) if !map.is_empty() => map
                .iter()
                .map(|(k, v)| format!("{k}:{v};"))
                .collect::<String>(),
            _ => "-".to_string(),
        };
        let args = match &self.implementation_args {
            Some(args) => format!("{:?}", args),
            None => "-".to_string(),
        };

        writeln!(f, "descriptor {}", self.canonical_signature)?;
        writeln!(f, "  - firma impl.   : {}", or_none(self.implementation_signature.as_deref()))?;
        writeln!(f, "  - restricciones : {}", constraints)?;
        writeln!(f, "  - tipo impl.    : {}", or_none(self.implementation_type))?;
        writeln!(f, "  - io            : {}", or_none(self.io))?;
        write!(f, "  - args impl.    : {}", args)
    }
}

/// Descriptor en construcción. Cada campo se escribe como mucho una vez.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptorBuilder {
    canonical_signature: Option<String>,
    implementation_signature: Option<String>,
    constraints: Option<BTreeMap<String, String>>,
    implementation_type: Option<ImplementationType>,
    io: Option<bool>,
    implementation_args: Option<Vec<String>>,
}

fn write_once<T>(
    slot: &mut Option<T>,
    value: T,
    field: DescriptorField,
    writer: &'static str,
) -> Result<(), DescriptorConflictError> {
    if slot.is_some() {
        return Err(DescriptorConflictError { field, writer });
    }
    *slot = Some(value);
    Ok(())
}

impl DescriptorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_canonical_signature(
        &mut self,
        signature: impl Into<String>,
        writer: &'static str,
    ) -> Result<(), DescriptorConflictError> {
        write_once(
            &mut self.canonical_signature,
            signature.into(),
            DescriptorField::CanonicalSignature,
            writer,
        )
    }

    pub fn set_implementation_signature(
        &mut self,
        signature: impl Into<String>,
        writer: &'static str,
    ) -> Result<(), DescriptorConflictError> {
        write_once(
            &mut self.implementation_signature,
            signature.into(),
            DescriptorField::ImplementationSignature,
            writer,
        )
    }

    pub fn set_constraints(
        &mut self,
        constraints: BTreeMap<String, String>,
        writer: &'static str,
    ) -> Result<(), DescriptorConflictError> {
        write_once(
            &mut self.constraints,
            constraints,
            DescriptorField::Constraints,
            writer,
        )
    }

    pub fn set_implementation_type(
        &mut self,
        kind: ImplementationType,
        writer: &'static str,
    ) -> Result<(), DescriptorConflictError> {
        write_once(
            &mut self.implementation_type,
            kind,
            DescriptorField::ImplementationType,
            writer,
        )
    }

    pub fn set_io(&mut self, io: bool, writer: &'static str) -> Result<(), DescriptorConflictError> {
        write_once(&mut self.io, io, DescriptorField::Io, writer)
    }

    pub fn set_implementation_args(
        &mut self,
        args: Vec<String>,
        writer: &'static str,
    ) -> Result<(), DescriptorConflictError> {
        write_once(
            &mut self.implementation_args,
            args,
            DescriptorField::ImplementationArgs,
            writer,
        )
    }

    pub fn canonical_signature(&self) -> Option<&str> {
        self.canonical_signature.as_deref()
    }

    pub fn implementation_type(&self) -> Option<ImplementationType> {
        self.implementation_type
    }

    pub fn constraints(&self) -> Option<&BTreeMap<String, String>> {
        self.constraints.as_ref()
    }

    pub fn seal(self) -> Result<TaskDescriptor, TaskDefinitionError> {
        let canonical_signature = self
            .canonical_signature
            .ok_or(TaskDefinitionError::MissingSignature)?;
        Ok(TaskDescriptor {
            canonical_signature,
            implementation_signature: self.implementation_signature,
            constraints: self.constraints,
            implementation_type: self.implementation_type,
            io: self.io,
            implementation_args: self.implementation_args,
        })
    }
}

/// Hueco compartido por las capas de una declaración durante la
/// configuración: la primera capa que lo necesita crea el builder.
#[derive(Debug, Default)]
pub struct DescriptorSlot {
    builder: Option<DescriptorBuilder>,
    created_by: Option<&'static str>,
}

impl DescriptorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<&DescriptorBuilder> {
        self.builder.as_ref()
    }

    pub fn get_or_create(&mut self, creator: &'static str) -> &mut DescriptorBuilder {
        if self.builder.is_none() {
            debug!("descriptor creado por {}", creator);
            self.created_by = Some(creator);
        }
        self.builder.get_or_insert_with(DescriptorBuilder::new)
    }

    /// Nombre de la capa que creó el descriptor, si alguna lo hizo.
    pub fn created_by(&self) -> Option<&'static str> {
        self.created_by
    }

    pub fn into_builder(self) -> Option<DescriptorBuilder> {
        self.builder
    }
}
