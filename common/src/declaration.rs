//! Declaración de tareas: la función, su esquema de parámetros y la pila de
//! anotaciones, con el descriptor que se configura una sola vez.

use serde_json::Value;
use std::{
    fmt,
    sync::{Arc, Mutex},
};
use tracing::{debug, info};

use crate::annotation::{Annotation, CallScope};
use crate::args::{Args, BoundArgs, Parameter, ParameterSchema};
use crate::context::{ExecutionContext, Role, Scope};
use crate::descriptor::{DescriptorSlot, TaskDescriptor};
use crate::engine::Invocation;
use crate::error::{ConfigurationError, HandoffError, TaskDefinitionError, TaskError};
use crate::marshal::ArgumentScope;

/// Cuerpo de una tarea.
pub type TaskFn = Arc<dyn Fn(&BoundArgs<'_>) -> anyhow::Result<Value> + Send + Sync>;

pub fn task_fn<F>(f: F) -> TaskFn
where
    F: Fn(&BoundArgs<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Identidad de la función envuelta.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskInfo {
    module: String,
    name: String,
    schema: ParameterSchema,
}

impl TaskInfo {
    pub fn new(module: impl Into<String>, name: impl Into<String>, schema: ParameterSchema) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
            schema,
        }
    }

    /// `<module>.<function>`, la firma canónica de la tarea.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.module, self.name)
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &ParameterSchema {
        &self.schema
    }
}

impl fmt::Display for TaskInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.name)
    }
}

struct Registration {
    descriptor: Arc<TaskDescriptor>,
    created_by: &'static str,
}

/// Una función con su pila de anotaciones (la primera es la más exterior).
pub struct TaskDeclaration {
    info: TaskInfo,
    layers: Vec<Box<dyn Annotation>>,
    function: TaskFn,
    context: Arc<ExecutionContext>,
    registration: Mutex<Option<Registration>>,
}

pub struct TaskDeclarationBuilder {
    module: String,
    name: String,
    schema: ParameterSchema,
    layers: Vec<Box<dyn Annotation>>,
    context: Option<Arc<ExecutionContext>>,
}

impl TaskDeclarationBuilder {
    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.schema.push(Parameter {
            name: name.into(),
            default: None,
        });
        self
    }

    pub fn param_with_default(mut self, name: impl Into<String>, default: Value) -> Self {
        self.schema.push(Parameter {
            name: name.into(),
            default: Some(default),
        });
        self
    }

    /// Añade una capa por debajo de las ya añadidas.
    pub fn layer(mut self, layer: impl Annotation + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    /// Contexto propio en lugar del global del proceso.
    pub fn context(mut self, context: Arc<ExecutionContext>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn build<F>(self, function: F) -> Result<TaskDeclaration, ConfigurationError>
    where
        F: Fn(&BoundArgs<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let info = TaskInfo::new(self.module, self.name, self.schema);

        match self.layers.iter().filter(|l| l.is_task()).count() {
            0 => {
                return Err(ConfigurationError::MissingTaskLayer {
                    task: info.qualified_name(),
                })
            }
            1 => {}
            _ => {
                return Err(ConfigurationError::DuplicateTaskLayer {
                    task: info.qualified_name(),
                })
            }
        }
        for layer in &self.layers {
            layer.validate(&info)?;
        }

        let params: Vec<&str> = info.schema().names().collect();
        let names: Vec<&str> = self.layers.iter().map(|l| l.name()).collect();
        debug!("declarada {}({}) con capas {:?}", info, params.join(", "), names);

        Ok(TaskDeclaration {
            info,
            layers: self.layers,
            function: task_fn(function),
            context: self
                .context
                .unwrap_or_else(|| ExecutionContext::global().clone()),
            registration: Mutex::new(None),
        })
    }
}

impl TaskDeclaration {
    /// Nueva declaración en el módulo `main`.
    pub fn builder(name: impl Into<String>) -> TaskDeclarationBuilder {
        TaskDeclarationBuilder {
            module: "main".to_string(),
            name: name.into(),
            schema: ParameterSchema::new(),
            layers: Vec::new(),
            context: None,
        }
    }

    pub fn info(&self) -> &TaskInfo {
        &self.info
    }

    pub fn signature(&self) -> String {
        self.info.qualified_name()
    }

    pub fn layer_names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|l| l.name()).collect()
    }

    /// Descriptor sellado, si la tarea ya se registró.
    pub fn descriptor(&self) -> Option<Arc<TaskDescriptor>> {
        self.lock_registration()
            .as_ref()
            .map(|r| r.descriptor.clone())
    }

    pub fn is_registered(&self) -> bool {
        self.lock_registration().is_some()
    }

    /// Capa que creó el descriptor durante la configuración.
    pub fn created_by(&self) -> Option<&'static str> {
        self.lock_registration().as_ref().map(|r| r.created_by)
    }

    pub fn call(&self, args: Args) -> Result<Value, TaskError> {
        let scope = self.context.snapshot();
        dispatch_for(scope.role).call(self, &scope, args)
    }

    fn lock_registration(&self) -> std::sync::MutexGuard<'_, Option<Registration>> {
        self.registration.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Configura, sella y entrega el descriptor la primera vez. El lock se
    /// mantiene durante todo el paso: llamadas concurrentes esperan y ven el
    /// mismo descriptor.
    fn ensure_registered(&self, scope: &Scope) -> Result<Arc<TaskDescriptor>, TaskError> {
        let mut registration = self
            .registration
            .lock()
            .map_err(|_| HandoffError::Poisoned("registro de la tarea"))?;
        if let Some(done) = registration.as_ref() {
            return Ok(done.descriptor.clone());
        }

        let engine = scope.engine.as_ref().ok_or(HandoffError::NoEngine)?;
        let (descriptor, created_by) = self.build_descriptor()?;
        engine.register(&descriptor)?;
        info!("tarea {} registrada (descriptor creado por {})", self.info, created_by);

        let descriptor = Arc::new(descriptor);
        *registration = Some(Registration {
            descriptor: descriptor.clone(),
            created_by,
        });
        Ok(descriptor)
    }

    fn build_descriptor(&self) -> Result<(TaskDescriptor, &'static str), TaskError> {
        let mut slot = DescriptorSlot::new();
        for layer in &self.layers {
            debug!("configurando {} en {}", layer.name(), self.info);
            layer.configure(&mut slot, &self.info)?;
        }

        let created_by = slot.created_by();
        let mut builder = slot
            .into_builder()
            .ok_or(TaskDefinitionError::MissingSignature)?;
        for layer in &self.layers {
            layer.complete(&mut builder, &self.info)?;
        }

        let descriptor = builder.seal()?;
        Ok((descriptor, created_by.unwrap_or("?")))
    }

    /// Capa `index` y, recursivamente, las interiores. Las marcas de cada
    /// capa viven sólo mientras se ejecutan las de dentro.
    fn run_layers(
        &self,
        index: usize,
        args: &mut Args,
        call: &CallScope<'_>,
        descriptor: Option<&TaskDescriptor>,
    ) -> Result<Value, TaskError> {
        let Some(layer) = self.layers.get(index) else {
            return self.run_innermost(args, call, descriptor);
        };

        layer.before_call(args, call)?;
        let mut region = ArgumentScope::acquire(args, layer.prepend_strings());
        for (name, value) in layer.markers() {
            region.mark(name, value);
        }
        self.run_layers(index + 1, &mut region, call, descriptor)
    }

    fn run_innermost(
        &self,
        args: &Args,
        call: &CallScope<'_>,
        descriptor: Option<&TaskDescriptor>,
    ) -> Result<Value, TaskError> {
        match (call.role, descriptor) {
            (Role::Submitter, Some(descriptor)) => {
                let engine = call.engine.ok_or(HandoffError::NoEngine)?;
                engine.submit(Invocation {
                    descriptor,
                    schema: self.info.schema(),
                    args,
                    function: &self.function,
                })
            }
            _ => self.run_body(args),
        }
    }

    fn run_body(&self, args: &Args) -> Result<Value, TaskError> {
        let clean = args.without_markers();
        let bound = BoundArgs::new(self.info.schema(), &clean);
        Ok((self.function)(&bound)?)
    }
}

impl fmt::Debug for TaskDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDeclaration")
            .field("info", &self.info)
            .field("layers", &self.layer_names())
            .field("registered", &self.is_registered())
            .finish()
    }
}

/* --------- Despacho según el rol --------- */

/// Cómo se ejecuta una llamada; se elige una vez por llamada según el rol.
trait Dispatch: Sync {
    fn call(&self, task: &TaskDeclaration, scope: &Scope, args: Args) -> Result<Value, TaskError>;
}

/// Fuera de contexto: las capas no hacen nada y la función corre aquí mismo.
struct LocalDispatch;

/// Submitter o worker: se recorren las capas con sus marcas.
struct DistributedDispatch;

fn dispatch_for(role: Role) -> &'static dyn Dispatch {
    match role {
        Role::Unset => &LocalDispatch,
        Role::Submitter | Role::Worker => &DistributedDispatch,
    }
}

impl Dispatch for LocalDispatch {
    fn call(&self, task: &TaskDeclaration, _scope: &Scope, args: Args) -> Result<Value, TaskError> {
        task.run_body(&args)
    }
}

impl Dispatch for DistributedDispatch {
    fn call(&self, task: &TaskDeclaration, scope: &Scope, mut args: Args) -> Result<Value, TaskError> {
        // el worker nunca configura ni registra
        let descriptor = match scope.role {
            Role::Submitter => Some(task.ensure_registered(scope)?),
            _ => None,
        };

        let call = CallScope {
            info: &task.info,
            role: scope.role,
            engine: scope.engine.as_ref(),
        };
        task.run_layers(0, &mut args, &call, descriptor.as_deref())
    }
}
