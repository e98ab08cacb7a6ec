use serde_json::Value;
use std::ops::{Deref, DerefMut};

use crate::args::Args;

/// Prefijo reservado de las marcas que sólo ve el engine.
pub const MARKER_PREFIX: &str = "__";

/// Indica al engine si debe anteponer marcas a los argumentos string.
pub const PREPEND_STRINGS: &str = "__prepend_strings";

/// Número de nodos que pide una capa MPI para la llamada.
pub const COMPUTING_NODES: &str = "__computing_nodes";

pub fn is_marker(key: &str) -> bool {
    key.starts_with(MARKER_PREFIX)
}

/// Región en la que los argumentos llevan las marcas de una capa.
///
/// Guarda una copia al adquirirse y la restaura al salir, también cuando la
/// llamada anidada devuelve error o hace panic.
pub struct ArgumentScope<'a> {
    args: &'a mut Args,
    saved: Option<Args>,
}

impl<'a> ArgumentScope<'a> {
    pub fn acquire(args: &'a mut Args, prepend_strings: Option<bool>) -> Self {
        let saved = args.clone();
        if let Some(prepend) = prepend_strings {
            args.named_mut()
                .insert(PREPEND_STRINGS.to_string(), Value::Bool(prepend));
        }
        Self {
            args,
            saved: Some(saved),
        }
    }

    /// Añade una marca; el prefijo reservado se agrega si falta.
    pub fn mark(&mut self, name: &str, value: Value) {
        let key = if is_marker(name) {
            name.to_string()
        } else {
            format!("{MARKER_PREFIX}{name}")
        };
        self.args.named_mut().insert(key, value);
    }
}

impl Deref for ArgumentScope<'_> {
    type Target = Args;

    fn deref(&self) -> &Args {
        self.args
    }
}

impl DerefMut for ArgumentScope<'_> {
    fn deref_mut(&mut self) -> &mut Args {
        self.args
    }
}

impl Drop for ArgumentScope<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            *self.args = saved;
        }
    }
}
