use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};
use tracing::{debug, info};

use crate::args::{Args, BoundArgs, Options, ParameterSchema};
use crate::declaration::TaskFn;
use crate::descriptor::TaskDescriptor;
use crate::error::{HandoffError, TaskError};
use crate::wire;

/// Lo que el engine necesita para ejecutar una llamada ya configurada.
pub struct Invocation<'a> {
    pub descriptor: &'a TaskDescriptor,
    pub schema: &'a ParameterSchema,
    /// Argumentos con las marcas de las capas todavía puestas.
    pub args: &'a Args,
    pub function: &'a TaskFn,
}

impl Invocation<'_> {
    pub fn signature(&self) -> &str {
        self.descriptor.canonical_signature()
    }

    /// Ejecuta el cuerpo en este proceso, sin las marcas del engine.
    pub fn run_local(&self) -> Result<Value, TaskError> {
        let clean = self.args.without_markers();
        let bound = BoundArgs::new(self.schema, &clean);
        Ok((self.function)(&bound)?)
    }
}

/// Frontera con el engine de ejecución distribuida.
pub trait Engine: Send + Sync {
    /// Entrega del descriptor. Se llama una vez por tarea declarada.
    fn register(&self, descriptor: &TaskDescriptor) -> Result<(), HandoffError>;

    fn submit(&self, invocation: Invocation<'_>) -> Result<Value, TaskError>;
}

#[derive(Default)]
struct LocalState {
    registrations: Vec<TaskDescriptor>,
    submissions: HashMap<String, u64>,
    last_markers: HashMap<String, Options>,
}

/// Engine en proceso: guarda los registros y ejecuta cada envío al momento.
#[derive(Default)]
pub struct LocalEngine {
    state: Mutex<LocalState>,
}

impl LocalEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registros aceptados, en orden de llegada.
    pub fn registrations(&self) -> Vec<TaskDescriptor> {
        self.lock_recovered().registrations.clone()
    }

    pub fn registration_count(&self, signature: &str) -> usize {
        self.lock_recovered()
            .registrations
            .iter()
            .filter(|d| d.canonical_signature() == signature)
            .count()
    }

    pub fn descriptor(&self, signature: &str) -> Option<TaskDescriptor> {
        self.lock_recovered()
            .registrations
            .iter()
            .find(|d| d.canonical_signature() == signature)
            .cloned()
    }

    pub fn submissions(&self, signature: &str) -> u64 {
        self.lock_recovered()
            .submissions
            .get(signature)
            .copied()
            .unwrap_or(0)
    }

    /// Marcas que llevaba el último envío de `signature`.
    pub fn last_markers(&self, signature: &str) -> Option<Options> {
        self.lock_recovered().last_markers.get(signature).cloned()
    }

    fn lock(&self) -> Result<MutexGuard<'_, LocalState>, HandoffError> {
        self.state
            .lock()
            .map_err(|_| HandoffError::Poisoned("local engine"))
    }

    fn lock_recovered(&self) -> MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Engine for LocalEngine {
    fn register(&self, descriptor: &TaskDescriptor) -> Result<(), HandoffError> {
        wire::validate(descriptor)?;

        let mut state = self.lock()?;
        let signature = descriptor.canonical_signature();
        if let Some(existing) = state
            .registrations
            .iter()
            .find(|d| d.canonical_signature() == signature)
        {
            if existing == descriptor {
                debug!("{} ya estaba registrado, se ignora", signature);
                return Ok(());
            }
            return Err(HandoffError::Rejected {
                signature: signature.to_string(),
                reason: "ya registrado con otro contenido".to_string(),
            });
        }

        info!("registrado {} en el engine local", signature);
        state.registrations.push(descriptor.clone());
        Ok(())
    }

    fn submit(&self, invocation: Invocation<'_>) -> Result<Value, TaskError> {
        {
            let mut state = self.lock()?;
            let signature = invocation.signature().to_string();
            *state.submissions.entry(signature.clone()).or_insert(0) += 1;
            state
                .last_markers
                .insert(signature, invocation.args.markers());
        }
        // sin el lock: el cuerpo puede a su vez enviar otras tareas
        invocation.run_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::task_fn;
    use crate::descriptor::{DescriptorBuilder, ImplementationType};
    use serde_json::json;

    fn descriptor(signature: &str, io: bool) -> TaskDescriptor {
        let mut b = DescriptorBuilder::new();
        b.set_canonical_signature(signature, "test").unwrap();
        b.set_implementation_type(ImplementationType::Plain, "test")
            .unwrap();
        b.set_implementation_signature(signature, "test").unwrap();
        b.set_implementation_args(vec!["demo".into(), "f".into()], "test")
            .unwrap();
        b.set_io(io, "test").unwrap();
        b.seal().unwrap()
    }

    #[test]
    fn register_is_idempotent_for_identical_descriptors() {
        let engine = LocalEngine::new();
        engine.register(&descriptor("demo.f", false)).unwrap();
        engine.register(&descriptor("demo.f", false)).unwrap();
        assert_eq!(engine.registration_count("demo.f"), 1);
    }

    #[test]
    fn register_rejects_conflicting_contents() {
        let engine = LocalEngine::new();
        engine.register(&descriptor("demo.f", false)).unwrap();
        let err = engine.register(&descriptor("demo.f", true)).unwrap_err();
        assert!(matches!(err, HandoffError::Rejected { .. }));
        assert_eq!(engine.descriptor("demo.f").unwrap().io(), Some(false));
    }

    #[test]
    fn register_validates_the_contract() {
        let mut b = DescriptorBuilder::new();
        b.set_canonical_signature("demo.g", "test").unwrap();
        let engine = LocalEngine::new();
        assert!(engine.register(&b.seal().unwrap()).is_err());
        assert!(engine.registrations().is_empty());
    }

    #[test]
    fn submit_runs_the_body_without_markers_and_counts() {
        let engine = LocalEngine::new();
        let d = descriptor("demo.f", false);
        let schema = ParameterSchema::new().param("x");
        let args = Args::from_positional([json!(20)]).kwarg("__prepend_strings", json!(true));
        let function = task_fn(|bound| {
            assert!(bound.get("__prepend_strings").is_none());
            Ok(json!(bound.i64("x")? + 1))
        });

        for _ in 0..2 {
            let out = engine
                .submit(Invocation {
                    descriptor: &d,
                    schema: &schema,
                    args: &args,
                    function: &function,
                })
                .unwrap();
            assert_eq!(out, json!(21));
        }

        assert_eq!(engine.submissions("demo.f"), 2);
        let markers = engine.last_markers("demo.f").unwrap();
        assert_eq!(markers.get("__prepend_strings"), Some(&json!(true)));
    }

    #[test]
    fn submit_propagates_body_errors() {
        let engine = LocalEngine::new();
        let d = descriptor("demo.f", false);
        let schema = ParameterSchema::new();
        let args = Args::new();
        let function = task_fn(|_| Err(anyhow::anyhow!("boom")));

        let err = engine
            .submit(Invocation {
                descriptor: &d,
                schema: &schema,
                args: &args,
                function: &function,
            })
            .unwrap_err();
        assert!(matches!(err, TaskError::Execution(_)));
    }
}
