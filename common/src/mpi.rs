use serde_json::Value;
use std::fmt;
use tracing::debug;

use crate::annotation::{Annotation, OptionRules};
use crate::args::Options;
use crate::declaration::TaskInfo;
use crate::descriptor::{DescriptorSlot, ImplementationType};
use crate::error::{ConfigurationError, TaskError};
use crate::marshal::COMPUTING_NODES;
use crate::wire::{LayoutArgs, MpiImplementationArgs, UNASSIGNED};

const NAME: &str = "@mpi";

const LAYOUT_SUFFIX: &str = "_layout";

const RULES: OptionRules = OptionRules {
    annotation: NAME,
    mandatory: &["runner"],
    supported: &[
        "runner",
        "binary",
        "processes",
        "working_dir",
        "flags",
        "scale_by_cu",
        "fail_by_exit_value",
    ],
    deprecated: &[
        ("computing_nodes", "processes"),
        ("computingNodes", "processes"),
        ("workingDir", "working_dir"),
    ],
};

fn is_layout_key(key: &str) -> bool {
    key.len() > LAYOUT_SUFFIX.len() && key.ends_with(LAYOUT_SUFFIX)
}

/// Número de procesos: fijo o resuelto por el engine (variable de entorno).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Processes {
    Count(u32),
    Dynamic(String),
}

impl Default for Processes {
    fn default() -> Self {
        Processes::Count(1)
    }
}

impl Processes {
    fn to_value(&self) -> Value {
        match self {
            Processes::Count(n) => Value::from(*n),
            Processes::Dynamic(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Processes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Processes::Count(n) => write!(f, "{n}"),
            Processes::Dynamic(s) => f.write_str(s),
        }
    }
}

/// Reparto en bloques de la colección que recibe un parámetro.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionLayout {
    param: String,
    block_count: Option<i64>,
    block_length: Option<i64>,
    stride: Option<i64>,
}

impl CollectionLayout {
    /// `block_length` y `stride` sólo tienen sentido con `block_count`.
    pub fn new(
        param: impl Into<String>,
        block_count: Option<i64>,
        block_length: Option<i64>,
        stride: Option<i64>,
    ) -> Result<Self, ConfigurationError> {
        let param = param.into();
        if block_count.is_none() && (block_length.is_some() || stride.is_some()) {
            return Err(RULES.invalid(
                &format!("{}{}", param, LAYOUT_SUFFIX),
                "block_length y stride requieren block_count",
            ));
        }
        Ok(Self {
            param,
            block_count,
            block_length,
            stride,
        })
    }

    pub fn param(&self) -> &str {
        &self.param
    }

    fn parse(key: &str, value: &Value) -> Result<Self, ConfigurationError> {
        let param = key.trim_end_matches(LAYOUT_SUFFIX).to_string();
        let fields = value
            .as_object()
            .ok_or_else(|| RULES.invalid(key, "el layout debe ser un objeto"))?;

        let mut numbers = [None, None, None];
        for (index, name) in ["block_count", "block_length", "stride"].iter().enumerate() {
            numbers[index] = match fields.get(*name) {
                None => None,
                Some(v) => Some(
                    v.as_i64()
                        .ok_or_else(|| RULES.invalid(key, format!("'{}' debe ser entero", name)))?,
                ),
            };
        }
        if let Some(unknown) = fields
            .keys()
            .find(|k| !["block_count", "block_length", "stride"].contains(&k.as_str()))
        {
            return Err(RULES.invalid(key, format!("campo desconocido '{}'", unknown)));
        }

        let [block_count, block_length, stride] = numbers;
        Self::new(param, block_count, block_length, stride)
    }

    fn to_args(&self) -> LayoutArgs {
        LayoutArgs {
            param: self.param.clone(),
            block_count: self.block_count,
            block_length: self.block_length,
            stride: self.stride,
        }
    }
}

/// Capa de ejecución MPI. Sustituye la implementación PLAIN por MPI (con
/// binario) o PYTHON_MPI (la propia función bajo el runner).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MpiParallel {
    runner: String,
    binary: Option<String>,
    processes: Processes,
    working_dir: Option<String>,
    flags: Option<String>,
    scale_by_cu: String,
    fail_by_exit_value: String,
    layout: Option<CollectionLayout>,
}

impl MpiParallel {
    pub fn new(runner: impl Into<String>) -> Self {
        Self {
            runner: runner.into(),
            binary: None,
            processes: Processes::default(),
            working_dir: None,
            flags: None,
            scale_by_cu: "false".to_string(),
            fail_by_exit_value: "false".to_string(),
            layout: None,
        }
    }

    pub fn from_options(options: &Options) -> Result<Self, ConfigurationError> {
        let options = RULES.check(options, is_layout_key)?;

        let runner = RULES
            .string(&options, "runner")?
            .ok_or_else(|| RULES.invalid("runner", "se esperaba un string"))?;

        let processes = match options.get("processes") {
            None => Processes::default(),
            Some(Value::String(s)) => Processes::Dynamic(s.clone()),
            Some(Value::Number(n)) => match n.as_u64().and_then(|n| u32::try_from(n).ok()) {
                Some(count) if count >= 1 => Processes::Count(count),
                _ => return Err(RULES.invalid("processes", "debe ser un entero positivo")),
            },
            Some(_) => return Err(RULES.invalid("processes", "se esperaba un entero o un string")),
        };

        let mut layouts = options
            .iter()
            .filter(|(k, _)| is_layout_key(k))
            .map(|(k, v)| CollectionLayout::parse(k, v))
            .collect::<Result<Vec<_>, _>>()?;
        if layouts.len() > 1 {
            let names: Vec<&str> = layouts.iter().map(|l| l.param.as_str()).collect();
            return Err(ConfigurationError::ConflictingOptions {
                annotation: NAME,
                detail: format!("sólo se admite un layout de colección ({})", names.join(", ")),
            });
        }

        let mpi = Self {
            runner,
            binary: RULES.string(&options, "binary")?,
            processes,
            working_dir: RULES.string(&options, "working_dir")?,
            flags: RULES.string(&options, "flags")?,
            scale_by_cu: RULES.flag(&options, "scale_by_cu", "false")?,
            fail_by_exit_value: RULES.flag(&options, "fail_by_exit_value", "false")?,
            layout: layouts.pop(),
        };
        debug!("{}: la tarea usará {} procesos", NAME, mpi.processes);
        Ok(mpi)
    }

    pub fn binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    pub fn processes(mut self, processes: Processes) -> Self {
        self.processes = processes;
        self
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn flags(mut self, flags: impl Into<String>) -> Self {
        self.flags = Some(flags.into());
        self
    }

    pub fn scale_by_cu(mut self, scale: bool) -> Self {
        self.scale_by_cu = crate::wire::encode_bool(scale);
        self
    }

    pub fn fail_by_exit_value(mut self, fail: bool) -> Self {
        self.fail_by_exit_value = crate::wire::encode_bool(fail);
        self
    }

    pub fn layout(mut self, layout: CollectionLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn get_processes(&self) -> &Processes {
        &self.processes
    }

    pub fn implementation_type(&self) -> ImplementationType {
        if self.binary.is_some() {
            ImplementationType::Mpi
        } else {
            ImplementationType::PythonMpi
        }
    }

    pub fn implementation_signature(&self) -> String {
        match &self.binary {
            Some(binary) => format!("{}.{}.{}", ImplementationType::Mpi, self.processes, binary),
            None => format!("{}.", ImplementationType::PythonMpi),
        }
    }

    pub fn implementation_args(&self) -> Vec<String> {
        MpiImplementationArgs {
            binary: self.binary.clone(),
            working_dir: Some(
                self.working_dir
                    .clone()
                    .unwrap_or_else(|| UNASSIGNED.to_string()),
            ),
            runner: self.runner.clone(),
            flags: self.flags.clone(),
            scale_by_cu: self.scale_by_cu.clone(),
            fail_by_exit_value: self.fail_by_exit_value.clone(),
            layout: self.layout.as_ref().map(CollectionLayout::to_args),
        }
        .encode()
    }
}

impl Annotation for MpiParallel {
    fn name(&self) -> &'static str {
        NAME
    }

    fn validate(&self, info: &TaskInfo) -> Result<(), ConfigurationError> {
        match &self.layout {
            Some(layout) if !info.schema().contains(&layout.param) => {
                Err(ConfigurationError::UnknownParameter {
                    annotation: NAME,
                    param: layout.param.clone(),
                    task: info.qualified_name(),
                })
            }
            _ => Ok(()),
        }
    }

    fn configure(&self, slot: &mut DescriptorSlot, _info: &TaskInfo) -> Result<(), TaskError> {
        let builder = slot.get_or_create(NAME);
        builder.set_implementation_type(self.implementation_type(), NAME)?;
        builder.set_implementation_signature(self.implementation_signature(), NAME)?;
        builder.set_implementation_args(self.implementation_args(), NAME)?;
        Ok(())
    }

    fn prepend_strings(&self) -> Option<bool> {
        Some(self.implementation_type() == ImplementationType::PythonMpi)
    }

    fn markers(&self) -> Vec<(&'static str, Value)> {
        vec![(COMPUTING_NODES, self.processes.to_value())]
    }
}
