use serde_json::Value;
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};
use tracing::{debug, info};

use crate::annotation::{Annotation, CallScope};
use crate::args::{Args, Options, ParameterSchema};
use crate::context::Role;
use crate::declaration::{task_fn, TaskFn, TaskInfo};
use crate::descriptor::{DescriptorBuilder, DescriptorSlot, ImplementationType, TaskDescriptor};
use crate::engine::{Engine, Invocation};
use crate::error::{HandoffError, TaskDefinitionError, TaskError};

const NAME: &str = "@data_transformation";

/// Opción reservada: aplicar la transformación en proceso, sin tarea derivada.
pub const IS_WORKFLOW: &str = "is_workflow";

pub type TransformFn = Arc<dyn Fn(Value, &Options) -> anyhow::Result<Value> + Send + Sync>;

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.as_str(), "True" | "true" | "1"),
        Value::Number(n) => n.as_i64() == Some(1),
        _ => false,
    }
}

/// Transformación de un parámetro: función + opciones que recibe.
#[derive(Clone)]
pub struct TransformSpec {
    param: String,
    function: TransformFn,
    options: Options,
    workflow: bool,
}

impl TransformSpec {
    pub fn new<F>(param: impl Into<String>, function: F) -> Self
    where
        F: Fn(Value, &Options) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            param: param.into(),
            function: Arc::new(function),
            options: Options::new(),
            workflow: false,
        }
    }

    /// Opciones de la función; `is_workflow` se extrae y no llega a ella.
    pub fn with_options(mut self, mut options: Options) -> Self {
        if let Some(flag) = options.remove(IS_WORKFLOW) {
            self.workflow = truthy(&flag);
        }
        self.options = options;
        self
    }

    pub fn workflow(mut self) -> Self {
        self.workflow = true;
        self
    }

    pub fn param(&self) -> &str {
        &self.param
    }

    pub fn is_workflow(&self) -> bool {
        self.workflow
    }

    pub fn apply(&self, value: Value) -> anyhow::Result<Value> {
        (self.function)(value, &self.options)
    }

    /// Cuerpo de la tarea derivada: recibe el dato como único parámetro.
    fn as_task_fn(&self) -> TaskFn {
        let spec = self.clone();
        task_fn(move |bound| spec.apply(bound.require("data")?.clone()))
    }
}

impl fmt::Debug for TransformSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformSpec")
            .field("param", &self.param)
            .field("options", &self.options)
            .field("workflow", &self.workflow)
            .finish()
    }
}

/// Capa que sustituye parámetros por su valor transformado antes de que la
/// tarea se envíe. No escribe en el descriptor de la tarea envuelta.
pub struct DataTransformation {
    specs: Vec<TransformSpec>,
    derived: Mutex<HashMap<String, Arc<TaskDescriptor>>>,
}

impl DataTransformation {
    pub fn new<F>(param: impl Into<String>, function: F) -> Self
    where
        F: Fn(Value, &Options) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::from_spec(TransformSpec::new(param, function))
    }

    pub fn from_spec(spec: TransformSpec) -> Self {
        Self::from_specs(vec![spec])
    }

    pub fn from_specs(specs: Vec<TransformSpec>) -> Self {
        Self {
            specs,
            derived: Mutex::new(HashMap::new()),
        }
    }

    /// Sin transformaciones propias: se esperan en cada llamada
    /// (`Args::with_transforms`).
    pub fn runtime() -> Self {
        Self::from_specs(Vec::new())
    }

    /// Firma de la tarea derivada que transforma `param`.
    pub fn derived_signature(info: &TaskInfo, param: &str) -> String {
        format!("{}.{}_transform", info.qualified_name(), param)
    }

    /// Descriptor de la tarea derivada, registrado en el engine la primera vez.
    fn derived_descriptor(
        &self,
        info: &TaskInfo,
        param: &str,
        engine: &Arc<dyn Engine>,
    ) -> Result<Arc<TaskDescriptor>, TaskError> {
        let mut derived = self
            .derived
            .lock()
            .map_err(|_| HandoffError::Poisoned("transformaciones derivadas"))?;
        if let Some(descriptor) = derived.get(param) {
            return Ok(descriptor.clone());
        }

        let signature = Self::derived_signature(info, param);
        let mut builder = DescriptorBuilder::new();
        builder.set_canonical_signature(signature.clone(), NAME)?;
        builder.set_implementation_type(ImplementationType::Plain, NAME)?;
        builder.set_implementation_signature(signature.clone(), NAME)?;
        builder.set_implementation_args(
            vec![info.qualified_name(), format!("{}_transform", param)],
            NAME,
        )?;
        builder.set_io(false, NAME)?;
        let descriptor = Arc::new(builder.seal()?);

        engine.register(&descriptor)?;
        info!("tarea derivada {} registrada", signature);
        derived.insert(param.to_string(), descriptor.clone());
        Ok(descriptor)
    }

    fn submit_derived(
        &self,
        spec: &TransformSpec,
        value: Value,
        call: &CallScope<'_>,
    ) -> Result<Value, TaskError> {
        let engine = call.engine.ok_or(HandoffError::NoEngine)?;
        let descriptor = self.derived_descriptor(call.info, spec.param(), engine)?;
        let schema = ParameterSchema::new().param("data");
        let args = Args::from_positional([value]);
        let function = spec.as_task_fn();

        engine.submit(Invocation {
            descriptor: &descriptor,
            schema: &schema,
            args: &args,
            function: &function,
        })
    }
}

impl fmt::Debug for DataTransformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataTransformation")
            .field("specs", &self.specs)
            .finish()
    }
}

impl Annotation for DataTransformation {
    fn name(&self) -> &'static str {
        NAME
    }

    fn configure(&self, _slot: &mut DescriptorSlot, _info: &TaskInfo) -> Result<(), TaskError> {
        Ok(())
    }

    fn before_call(&self, args: &mut Args, call: &CallScope<'_>) -> Result<(), TaskError> {
        let runtime = args.take_transforms();
        if call.role != Role::Submitter {
            // el worker recibe los valores ya transformados
            return Ok(());
        }

        let specs = if runtime.is_empty() {
            self.specs.clone()
        } else {
            runtime
        };
        if specs.is_empty() {
            return Err(TaskDefinitionError::MissingTransform {
                task: call.info.qualified_name(),
            }
            .into());
        }

        for spec in &specs {
            let (site, value) = args
                .locate(call.info.schema(), spec.param())
                .ok_or_else(|| TaskDefinitionError::UnknownParameter {
                    param: spec.param().to_string(),
                    task: call.info.qualified_name(),
                })?;
            debug!("transformando '{}' de {} ({:?})", spec.param(), call.info, site);

            let transformed = if spec.is_workflow() {
                spec.apply(value)?
            } else {
                self.submit_derived(spec, value, call)?
            };
            args.replace(site, spec.param(), transformed);
        }
        Ok(())
    }

    fn prepend_strings(&self) -> Option<bool> {
        Some(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::options;
    use crate::engine::LocalEngine;
    use anyhow::anyhow;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn info() -> TaskInfo {
        TaskInfo::new(
            "demo",
            "scale",
            ParameterSchema::new()
                .param("x")
                .param_with_default("factor", json!(3)),
        )
    }

    fn double(value: Value, _opts: &Options) -> anyhow::Result<Value> {
        let n = value.as_i64().ok_or_else(|| anyhow!("no es entero"))?;
        Ok(json!(n * 2))
    }

    fn add(value: Value, opts: &Options) -> anyhow::Result<Value> {
        let n = value.as_i64().ok_or_else(|| anyhow!("no es entero"))?;
        let k = opts.get("k").and_then(Value::as_i64).unwrap_or(0);
        Ok(json!(n + k))
    }

    #[test]
    fn with_options_extracts_is_workflow() {
        let spec = TransformSpec::new("x", add).with_options(options(json!({"k": 1, "is_workflow": "True"})));
        assert!(spec.is_workflow());
        assert_eq!(spec.apply(json!(1)).unwrap(), json!(2));

        let spec = TransformSpec::new("x", add).with_options(options(json!({"is_workflow": 0})));
        assert!(!spec.is_workflow());
    }

    #[test]
    fn workflow_transform_applies_in_process() {
        let dt = DataTransformation::from_spec(TransformSpec::new("x", double).workflow());
        let info = info();
        let mut args = Args::from_positional([json!(5)]);
        let call = CallScope {
            info: &info,
            role: Role::Submitter,
            engine: None,
        };

        dt.before_call(&mut args, &call).unwrap();
        assert_eq!(args.positional(), &[json!(10)]);
    }

    #[test]
    fn derived_task_is_registered_once_and_submitted_each_call() {
        let local = Arc::new(LocalEngine::new());
        let engine: Arc<dyn Engine> = local.clone();
        let dt = DataTransformation::new("x", double);
        let info = info();
        let call = CallScope {
            info: &info,
            role: Role::Submitter,
            engine: Some(&engine),
        };

        for input in [1, 2] {
            let mut args = Args::new().kwarg("x", json!(input));
            dt.before_call(&mut args, &call).unwrap();
            assert_eq!(args.named().get("x"), Some(&json!(input * 2)));
        }

        let signature = "demo.scale.x_transform";
        assert_eq!(local.registration_count(signature), 1);
        assert_eq!(local.submissions(signature), 2);
        let d = local.descriptor(signature).unwrap();
        assert_eq!(d.implementation_args().unwrap(), ["demo.scale", "x_transform"]);
    }

    /// Cuenta cada entrega, incluidas las que el engine local ignora.
    struct CountingEngine {
        inner: LocalEngine,
        registers: AtomicUsize,
    }

    impl Engine for CountingEngine {
        fn register(&self, descriptor: &TaskDescriptor) -> Result<(), HandoffError> {
            self.registers.fetch_add(1, Ordering::SeqCst);
            self.inner.register(descriptor)
        }

        fn submit(&self, invocation: Invocation<'_>) -> Result<Value, TaskError> {
            self.inner.submit(invocation)
        }
    }

    #[test]
    fn concurrent_first_calls_register_the_derived_task_once() {
        let counting = Arc::new(CountingEngine {
            inner: LocalEngine::new(),
            registers: Default::default(),
        });
        let engine: Arc<dyn Engine> = counting.clone();
        let dt = DataTransformation::new("x", double);
        let info = info();
        let call = CallScope {
            info: &info,
            role: Role::Submitter,
            engine: Some(&engine),
        };

        std::thread::scope(|s| {
            for i in 0..8 {
                let (dt, call) = (&dt, &call);
                s.spawn(move || {
                    let mut args = Args::new().kwarg("x", json!(i));
                    dt.before_call(&mut args, call).unwrap();
                    assert_eq!(args.named().get("x"), Some(&json!(i * 2)));
                });
            }
        });

        let signature = "demo.scale.x_transform";
        assert_eq!(counting.registers.load(Ordering::SeqCst), 1);
        assert_eq!(counting.inner.registration_count(signature), 1);
        assert_eq!(counting.inner.submissions(signature), 8);
    }

    #[test]
    fn default_value_is_transformed_and_written_as_keyword() {
        let dt = DataTransformation::from_spec(TransformSpec::new("factor", double).workflow());
        let info = info();
        let mut args = Args::from_positional([json!(1)]);
        let call = CallScope {
            info: &info,
            role: Role::Submitter,
            engine: None,
        };

        dt.before_call(&mut args, &call).unwrap();
        assert_eq!(args.named().get("factor"), Some(&json!(6)));
    }

    #[test]
    fn runtime_transforms_take_precedence() {
        let dt = DataTransformation::new("x", double);
        let info = info();
        let mut args = Args::from_positional([json!(5)]).with_transforms(vec![TransformSpec::new("x", add)
            .with_options(options(json!({"k": 100, "is_workflow": true})))]);
        let call = CallScope {
            info: &info,
            role: Role::Submitter,
            engine: None,
        };

        dt.before_call(&mut args, &call).unwrap();
        assert_eq!(args.positional(), &[json!(105)]);
    }

    #[test]
    fn missing_transform_and_unknown_parameter_are_definition_errors() {
        let info = info();
        let call = CallScope {
            info: &info,
            role: Role::Submitter,
            engine: None,
        };

        let err = DataTransformation::runtime()
            .before_call(&mut Args::new(), &call)
            .unwrap_err();
        assert!(matches!(err, TaskError::Definition(TaskDefinitionError::MissingTransform { .. })));

        let dt = DataTransformation::from_spec(TransformSpec::new("y", double).workflow());
        let err = dt.before_call(&mut Args::new(), &call).unwrap_err();
        assert!(matches!(err, TaskError::Definition(TaskDefinitionError::UnknownParameter { .. })));
    }

    #[test]
    fn derived_transform_without_engine_fails() {
        let dt = DataTransformation::new("x", double);
        let info = info();
        let call = CallScope {
            info: &info,
            role: Role::Submitter,
            engine: None,
        };
        let err = dt
            .before_call(&mut Args::from_positional([json!(1)]), &call)
            .unwrap_err();
        assert!(matches!(err, TaskError::Handoff(HandoffError::NoEngine)));
    }

    #[test]
    fn worker_leaves_arguments_untouched() {
        let dt = DataTransformation::new("x", double);
        let info = info();
        let mut args = Args::from_positional([json!(5)]);
        let call = CallScope {
            info: &info,
            role: Role::Worker,
            engine: None,
        };

        dt.before_call(&mut args, &call).unwrap();
        assert_eq!(args.positional(), &[json!(5)]);
    }
}
