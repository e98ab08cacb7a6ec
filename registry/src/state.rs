// registry/src/state.rs

use common::{wire, HandoffError, RegisteredElement, Signature, TaskDescriptor};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::{info, warn};

#[derive(Clone, Default)]
pub struct AppState {
    // descriptores aceptados, por firma canónica
    pub elements: Arc<Mutex<HashMap<Signature, RegisteredElement>>>,
}

/// Resultado de un alta aceptada.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    /// Mismo contenido que el ya registrado.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// El descriptor no cumple el contrato con el engine.
    Invalid(String),
    /// La firma ya está registrada con otro contenido.
    Conflict(String),
    Poisoned,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Signature, RegisteredElement>>, Rejection> {
        self.elements.lock().map_err(|_| Rejection::Poisoned)
    }

    pub fn register(
        &self,
        descriptor: TaskDescriptor,
    ) -> Result<(RegisteredElement, Outcome), Rejection> {
        if let Err(err) = wire::validate(&descriptor) {
            warn!("descriptor rechazado: {}", err);
            let reason = match err {
                HandoffError::Rejected { reason, .. } => reason,
                other => other.to_string(),
            };
            return Err(Rejection::Invalid(reason));
        }

        let mut elements = self.lock()?;
        let signature = descriptor.canonical_signature().to_string();

        if let Some(existing) = elements.get(&signature) {
            if existing.descriptor == descriptor {
                return Ok((existing.clone(), Outcome::Unchanged));
            }
            return Err(Rejection::Conflict(format!(
                "{} ya está registrado con otro contenido",
                signature
            )));
        }

        let element = RegisteredElement::new(descriptor);
        info!(
            "registrado {} ({}) id={}",
            signature,
            element
                .implementation_type()
                .map(|t| t.as_str())
                .unwrap_or("-"),
            element.registration_id
        );
        elements.insert(signature, element.clone());
        Ok((element, Outcome::Created))
    }

    /// Todos los registros, ordenados por firma.
    pub fn list(&self) -> Result<Vec<RegisteredElement>, Rejection> {
        let elements = self.lock()?;
        let mut all: Vec<RegisteredElement> = elements.values().cloned().collect();
        all.sort_by(|a, b| {
            a.descriptor
                .canonical_signature()
                .cmp(b.descriptor.canonical_signature())
        });
        Ok(all)
    }

    pub fn get(&self, signature: &str) -> Result<Option<RegisteredElement>, Rejection> {
        Ok(self.lock()?.get(signature).cloned())
    }
}
