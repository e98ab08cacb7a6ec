pub mod annotation;
pub mod args;
pub mod constraint;
pub mod context;
pub mod declaration;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod marshal;
pub mod mpi;
pub mod task;
pub mod transform;
pub mod wire;

pub use annotation::{Annotation, CallScope};
pub use args::{options, Args, BoundArgs, Options, ParameterSchema};
pub use constraint::ResourceConstraint;
pub use context::{ExecutionContext, Role};
pub use declaration::{task_fn, TaskDeclaration, TaskFn, TaskInfo};
pub use descriptor::{DescriptorBuilder, ImplementationType, TaskDescriptor};
pub use engine::{Engine, Invocation, LocalEngine};
pub use error::{
    ConfigurationError, ContextError, DescriptorConflictError, HandoffError, TaskDefinitionError,
    TaskError,
};
pub use mpi::{CollectionLayout, MpiParallel, Processes};
pub use task::PlainTask;
pub use transform::{DataTransformation, TransformSpec};
pub use wire::{RegisteredElement, RegistrationResponse};

/* --------- Tipos del registro --------- */

pub type Signature = String;
