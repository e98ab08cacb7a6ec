use anyhow::anyhow;
use serde_json::{Map, Value};
use std::fmt;

use crate::marshal::is_marker;
use crate::transform::TransformSpec;

/// Opciones de anotación / argumentos con nombre.
pub type Options = Map<String, Value>;

/// Convierte un objeto JSON en opciones. Cualquier otro valor da opciones
/// vacías (que luego fallan en la validación de obligatorias).
pub fn options(value: Value) -> Options {
    match value {
        Value::Object(map) => map,
        _ => Options::new(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub default: Option<Value>,
}

/// Parámetros de la función envuelta, extraídos una sola vez al declararla.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSchema {
    params: Vec<Parameter>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(Parameter {
            name: name.into(),
            default: None,
        });
        self
    }

    pub fn param_with_default(mut self, name: impl Into<String>, default: Value) -> Self {
        self.params.push(Parameter {
            name: name.into(),
            default: Some(default),
        });
        self
    }

    pub(crate) fn push(&mut self, param: Parameter) {
        self.params.push(param);
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|p| p.name.as_str())
    }
}

/// Dónde vive el valor de un parámetro en una llamada concreta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSite {
    Keyword,
    Positional(usize),
    /// Ni posicional ni por nombre: se usó el valor por defecto declarado.
    Default,
}

/// Argumentos de una llamada.
#[derive(Clone, Default)]
pub struct Args {
    positional: Vec<Value>,
    named: Options,
    transforms: Vec<TransformSpec>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_positional(values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            positional: values.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, value: Value) -> Self {
        self.positional.push(value);
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.named.insert(name.into(), value);
        self
    }

    /// Transformaciones de datos pasadas en tiempo de llamada.
    /// Sustituyen a las declaradas en `@data_transformation`.
    pub fn with_transforms(mut self, transforms: Vec<TransformSpec>) -> Self {
        self.transforms = transforms;
        self
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn named(&self) -> &Options {
        &self.named
    }

    pub fn named_mut(&mut self) -> &mut Options {
        &mut self.named
    }

    pub(crate) fn take_transforms(&mut self) -> Vec<TransformSpec> {
        std::mem::take(&mut self.transforms)
    }

    /// Resuelve el valor actual de `name`: por nombre, por posición o por
    /// defecto (`Null` si no hay defecto). `None` si el esquema no lo declara.
    pub fn locate(&self, schema: &ParameterSchema, name: &str) -> Option<(ParamSite, Value)> {
        let index = schema.position(name)?;
        if let Some(value) = self.named.get(name) {
            return Some((ParamSite::Keyword, value.clone()));
        }
        if let Some(value) = self.positional.get(index) {
            return Some((ParamSite::Positional(index), value.clone()));
        }
        let default = schema
            .get(name)
            .and_then(|p| p.default.clone())
            .unwrap_or(Value::Null);
        Some((ParamSite::Default, default))
    }

    /// Escribe `value` en el mismo sitio donde se encontró el parámetro.
    /// Los valores por defecto pasan a ser argumentos con nombre.
    pub fn replace(&mut self, site: ParamSite, name: &str, value: Value) {
        match site {
            ParamSite::Positional(index) if index < self.positional.len() => {
                self.positional[index] = value;
            }
            ParamSite::Positional(_) | ParamSite::Keyword | ParamSite::Default => {
                self.named.insert(name.to_string(), value);
            }
        }
    }

    /// Copia de los argumentos sin las marcas del engine.
    pub fn without_markers(&self) -> Args {
        Args {
            positional: self.positional.clone(),
            named: self
                .named
                .iter()
                .filter(|(k, _)| !is_marker(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            transforms: Vec::new(),
        }
    }

    pub(crate) fn markers(&self) -> Options {
        self.named
            .iter()
            .filter(|(k, _)| is_marker(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Args")
            .field("positional", &self.positional)
            .field("named", &self.named)
            .field("transforms", &self.transforms.len())
            .finish()
    }
}

/// Vista que recibe el cuerpo de una tarea: argumentos resueltos contra el
/// esquema declarado.
#[derive(Debug, Clone, Copy)]
pub struct BoundArgs<'a> {
    schema: &'a ParameterSchema,
    args: &'a Args,
}

impl<'a> BoundArgs<'a> {
    pub fn new(schema: &'a ParameterSchema, args: &'a Args) -> Self {
        Self { schema, args }
    }

    pub fn get(&self, name: &str) -> Option<&'a Value> {
        if !is_marker(name) {
            if let Some(value) = self.args.named.get(name) {
                return Some(value);
            }
        }
        let index = self.schema.position(name)?;
        self.args
            .positional
            .get(index)
            .or_else(|| self.schema.get(name).and_then(|p| p.default.as_ref()))
    }

    pub fn require(&self, name: &str) -> anyhow::Result<&'a Value> {
        self.get(name)
            .ok_or_else(|| anyhow!("falta el argumento '{}'", name))
    }

    pub fn i64(&self, name: &str) -> anyhow::Result<i64> {
        self.require(name)?
            .as_i64()
            .ok_or_else(|| anyhow!("el argumento '{}' no es entero", name))
    }
}
