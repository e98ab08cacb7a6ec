use serde::{Deserialize, Serialize};
use std::{
    fmt,
    str::FromStr,
    sync::{Arc, OnceLock, RwLock},
};
use tracing::info;

use crate::engine::Engine;
use crate::error::ContextError;

/// Rol del proceso dentro del sistema distribuido.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Fuera de contexto: las anotaciones ejecutan la función en local.
    #[default]
    Unset,
    /// Proceso que declara y envía tareas al engine.
    Submitter,
    /// Proceso que ejecuta tareas ya registradas.
    Worker,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Unset => "unset",
            Role::Submitter => "submitter",
            Role::Worker => "worker",
        }
    }

    fn can_move_to(self, next: Role) -> bool {
        matches!((self, next), (Role::Unset, _) | (_, Role::Unset)) || self == next
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unset" | "local" => Ok(Role::Unset),
            "submitter" | "master" => Ok(Role::Submitter),
            "worker" => Ok(Role::Worker),
            other => Err(ContextError::UnknownRole(other.to_string())),
        }
    }
}

#[derive(Default)]
struct ContextState {
    role: Role,
    engine: Option<Arc<dyn Engine>>,
}

/// Foto del contexto tomada al comienzo de cada llamada.
#[derive(Clone)]
pub struct Scope {
    pub role: Role,
    pub engine: Option<Arc<dyn Engine>>,
}

/// Estado de ejecución compartido por todas las tareas de un proceso.
///
/// Las declaraciones capturan un `Arc<ExecutionContext>`; por defecto el
/// global del proceso (`ExecutionContext::global()`), aunque los tests y los
/// embebidos pueden crear el suyo.
#[derive(Default)]
pub struct ExecutionContext {
    state: RwLock<ContextState>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static Arc<ExecutionContext> {
        static GLOBAL: OnceLock<Arc<ExecutionContext>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(ExecutionContext::new()))
    }

    pub fn current_role(&self) -> Role {
        self.read().role
    }

    pub fn is_submitter(&self) -> bool {
        self.current_role() == Role::Submitter
    }

    pub fn is_worker(&self) -> bool {
        self.current_role() == Role::Worker
    }

    /// `true` si el proceso corre dentro del sistema distribuido.
    pub fn in_scope(&self) -> bool {
        self.current_role() != Role::Unset
    }

    /// Cambia el rol y devuelve el anterior.
    ///
    /// Volver a `Unset` desasocia el engine.
    pub fn set_role(&self, role: Role) -> Result<Role, ContextError> {
        let mut state = self.write();
        let previous = state.role;
        if !previous.can_move_to(role) {
            return Err(ContextError::InvalidTransition {
                from: previous,
                to: role,
            });
        }
        if role == Role::Unset {
            state.engine = None;
        }
        state.role = role;
        if previous != role {
            info!("rol de ejecución: {} -> {}", previous, role);
        }
        Ok(previous)
    }

    pub fn start_submitter(&self, engine: Arc<dyn Engine>) -> Result<(), ContextError> {
        let mut state = self.write();
        if !state.role.can_move_to(Role::Submitter) {
            return Err(ContextError::InvalidTransition {
                from: state.role,
                to: Role::Submitter,
            });
        }
        state.role = Role::Submitter;
        state.engine = Some(engine);
        info!("proceso iniciado como submitter");
        Ok(())
    }

    pub fn start_worker(&self) -> Result<(), ContextError> {
        self.set_role(Role::Worker).map(|_| ())
    }

    pub fn stop(&self) -> Role {
        let mut state = self.write();
        let previous = state.role;
        state.role = Role::Unset;
        state.engine = None;
        if previous != Role::Unset {
            info!("proceso detenido (antes {})", previous);
        }
        previous
    }

    pub fn engine(&self) -> Option<Arc<dyn Engine>> {
        self.read().engine.clone()
    }

    pub(crate) fn snapshot(&self) -> Scope {
        let state = self.read();
        Scope {
            role: state.role,
            engine: state.engine.clone(),
        }
    }

    // estado plano: un guard envenenado se recupera tal cual
    fn read(&self) -> std::sync::RwLockReadGuard<'_, ContextState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ContextState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("ExecutionContext")
            .field("role", &state.role)
            .field("engine", &state.engine.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LocalEngine;

    #[test]
    fn context_starts_unset() {
        let ctx = ExecutionContext::new();
        assert_eq!(ctx.current_role(), Role::Unset);
        assert!(!ctx.in_scope());
        assert!(!ctx.is_submitter());
        assert!(!ctx.is_worker());
        assert!(ctx.engine().is_none());
    }

    #[test]
    fn unset_can_move_to_either_role_and_back() {
        let ctx = ExecutionContext::new();
        assert_eq!(ctx.set_role(Role::Worker).unwrap(), Role::Unset);
        assert!(ctx.is_worker());
        assert_eq!(ctx.set_role(Role::Unset).unwrap(), Role::Worker);
        assert_eq!(ctx.set_role(Role::Submitter).unwrap(), Role::Unset);
        assert!(ctx.is_submitter());
        assert!(ctx.in_scope());
    }

    #[test]
    fn submitter_cannot_become_worker() {
        let ctx = ExecutionContext::new();
        ctx.set_role(Role::Submitter).unwrap();

        let err = ctx.set_role(Role::Worker).unwrap_err();
        assert_eq!(
            err,
            ContextError::InvalidTransition {
                from: Role::Submitter,
                to: Role::Worker
            }
        );
        assert!(ctx.is_submitter());
    }

    #[test]
    fn setting_the_same_role_is_a_no_op() {
        let ctx = ExecutionContext::new();
        ctx.start_worker().unwrap();
        assert_eq!(ctx.set_role(Role::Worker).unwrap(), Role::Worker);
        assert!(ctx.is_worker());
    }

    #[test]
    fn start_submitter_attaches_engine_and_stop_detaches_it() {
        let ctx = ExecutionContext::new();
        ctx.start_submitter(Arc::new(LocalEngine::new())).unwrap();
        assert!(ctx.is_submitter());
        assert!(ctx.engine().is_some());

        assert_eq!(ctx.stop(), Role::Submitter);
        assert_eq!(ctx.current_role(), Role::Unset);
        assert!(ctx.engine().is_none());
    }

    #[test]
    fn start_submitter_from_worker_is_rejected() {
        let ctx = ExecutionContext::new();
        ctx.start_worker().unwrap();
        assert!(ctx.start_submitter(Arc::new(LocalEngine::new())).is_err());
        assert!(ctx.engine().is_none());
    }

    #[test]
    fn role_parses_from_text() {
        assert_eq!("submitter".parse::<Role>().unwrap(), Role::Submitter);
        assert_eq!(" MASTER ".parse::<Role>().unwrap(), Role::Submitter);
        assert_eq!("worker".parse::<Role>().unwrap(), Role::Worker);
        assert_eq!("unset".parse::<Role>().unwrap(), Role::Unset);
        assert!(matches!(
            "driver".parse::<Role>(),
            Err(ContextError::UnknownRole(_))
        ));
    }
}
