use serde_json::Value;

use crate::annotation::{Annotation, OptionRules};
use crate::args::Options;
use crate::declaration::TaskInfo;
use crate::descriptor::{DescriptorBuilder, DescriptorSlot, ImplementationType};
use crate::error::{ConfigurationError, TaskError};

const NAME: &str = "@task";

const RULES: OptionRules = OptionRules {
    annotation: NAME,
    mandatory: &[],
    supported: &["io"],
    deprecated: &[],
};

/// Capa base de toda tarea: fija la firma canónica y, si ninguna otra capa
/// eligió implementación, la implementación PLAIN.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlainTask {
    io: bool,
}

impl PlainTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marca la implementación como de E/S bloqueante.
    pub fn io(mut self, io: bool) -> Self {
        self.io = io;
        self
    }

    pub fn from_options(options: &Options) -> Result<Self, ConfigurationError> {
        let options = RULES.check(options, |_| false)?;
        let io = match options.get("io") {
            None => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => return Err(RULES.invalid("io", "se esperaba un booleano")),
        };
        Ok(Self { io })
    }
}

impl Annotation for PlainTask {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_task(&self) -> bool {
        true
    }

    fn configure(&self, slot: &mut DescriptorSlot, info: &TaskInfo) -> Result<(), TaskError> {
        let builder = slot.get_or_create(NAME);
        builder.set_canonical_signature(info.qualified_name(), NAME)?;
        builder.set_io(self.io, NAME)?;
        Ok(())
    }

    fn complete(&self, builder: &mut DescriptorBuilder, info: &TaskInfo) -> Result<(), TaskError> {
        if builder.implementation_type().is_some() {
            // otra capa (ej: @mpi) ya eligió implementación
            return Ok(());
        }
        builder.set_implementation_type(ImplementationType::Plain, NAME)?;
        builder.set_implementation_signature(info.qualified_name(), NAME)?;
        builder.set_implementation_args(
            vec![info.module().to_string(), info.name().to_string()],
            NAME,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{options, ParameterSchema};
    use crate::descriptor::DescriptorField;
    use serde_json::json;

    fn info() -> TaskInfo {
        TaskInfo::new("demo", "increment", ParameterSchema::new().param("value"))
    }

    #[test]
    fn from_options_reads_io() {
        let t = PlainTask::from_options(&options(json!({"io": true}))).unwrap();
        assert_eq!(t, PlainTask::new().io(true));
        assert_eq!(PlainTask::from_options(&Options::new()).unwrap(), PlainTask::new());
    }

    #[test]
    fn from_options_rejects_unknown_and_bad_values() {
        assert!(PlainTask::from_options(&options(json!({"returns": 1}))).is_err());
        assert!(PlainTask::from_options(&options(json!({"io": "yes"}))).is_err());
    }

    #[test]
    fn configure_then_complete_builds_a_plain_descriptor() {
        let mut slot = DescriptorSlot::new();
        let task = PlainTask::new();
        task.configure(&mut slot, &info()).unwrap();
        assert_eq!(slot.created_by(), Some(NAME));

        let mut builder = slot.into_builder().unwrap();
        task.complete(&mut builder, &info()).unwrap();
        let d = builder.seal().unwrap();

        assert_eq!(d.canonical_signature(), "demo.increment");
        assert_eq!(d.implementation_signature(), Some("demo.increment"));
        assert_eq!(d.implementation_type(), Some(ImplementationType::Plain));
        assert_eq!(d.implementation_args().unwrap(), ["demo", "increment"]);
        assert_eq!(d.io(), Some(false));
    }

    #[test]
    fn complete_leaves_an_existing_implementation_alone() {
        let mut builder = DescriptorBuilder::new();
        builder
            .set_implementation_type(ImplementationType::PythonMpi, "@mpi")
            .unwrap();
        PlainTask::new().complete(&mut builder, &info()).unwrap();
        assert_eq!(builder.implementation_type(), Some(ImplementationType::PythonMpi));
    }

    #[test]
    fn configuring_twice_is_a_conflict() {
        let mut slot = DescriptorSlot::new();
        PlainTask::new().configure(&mut slot, &info()).unwrap();
        let err = PlainTask::new().configure(&mut slot, &info()).unwrap_err();
        match err {
            TaskError::Conflict(c) => assert_eq!(c.field, DescriptorField::CanonicalSignature),
            other => panic!("error inesperado: {other:?}"),
        }
    }
}
