//! Instrument, the parameter registry.
//!
//! An instrument owns named parameters, nested child instruments, and the
//! method table used for remote procedure calls. Enumeration is recursive:
//! child parameters flatten under `"<child>.<leaf>"` keys.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::parameter::{Kind, Parameter};

/// A method callable over the wire: positional args plus keyword args in,
/// one JSON value out. Registered explicitly; dispatch never reflects over
/// the host object.
pub type Method = Box<dyn FnMut(&[Value], &Map<String, Value>) -> Result<Value> + Send>;

pub struct Instrument {
    name: String,
    parameters: BTreeMap<String, Parameter>,
    children: BTreeMap<String, Instrument>,
    methods: BTreeMap<String, Method>,
}

impl Instrument {
    pub fn new(name: &str) -> Self {
        Instrument {
            name: name.to_string(),
            parameters: BTreeMap::new(),
            children: BTreeMap::new(),
            methods: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a parameter under its own name. Returns a handle to the
    /// registered cell. Fails with `DuplicateName` if this registry already
    /// holds a parameter of that name.
    pub fn declare(&mut self, parameter: Parameter) -> Result<Parameter> {
        let name = parameter.name();
        if self.parameters.contains_key(&name) {
            return Err(Error::DuplicateName(name));
        }
        self.parameters.insert(name, parameter.clone());
        Ok(parameter)
    }

    /// Nest a child registry. Its parameters appear in enumeration under
    /// `"<child>.<leaf>"`.
    pub fn attach(&mut self, child: Instrument) -> Result<()> {
        if self.children.contains_key(&child.name) {
            return Err(Error::DuplicateName(child.name));
        }
        self.children.insert(child.name.clone(), child);
        Ok(())
    }

    /// Look up a parameter by direct name or dotted path into children.
    /// A direct entry wins over path descent, so a flat registry may hold
    /// dotted names (a client mirror does).
    pub fn parameter(&self, name: &str) -> Option<Parameter> {
        if let Some(p) = self.parameters.get(name) {
            return Some(p.clone());
        }
        let (child, rest) = name.split_once('.')?;
        self.children.get(child)?.parameter(rest)
    }

    /// Recursively enumerate parameters, optionally filtered by kind.
    pub fn enumerate(&self, kind: Option<Kind>) -> BTreeMap<String, Parameter> {
        let mut out = BTreeMap::new();
        for (name, p) in &self.parameters {
            if kind.map_or(true, |k| p.kind() == k) {
                out.insert(name.clone(), p.clone());
            }
        }
        for (child_name, child) in &self.children {
            for (leaf, p) in child.enumerate(kind) {
                out.insert(format!("{child_name}.{leaf}"), p);
            }
        }
        out
    }

    /// Like `enumerate`, but resolves each cell through `read()`.
    /// Propagates the first read failure.
    pub fn snapshot(&self, kind: Option<Kind>) -> Result<BTreeMap<String, f64>> {
        let mut out = BTreeMap::new();
        for (name, p) in self.enumerate(kind) {
            out.insert(name, p.read()?);
        }
        Ok(out)
    }

    /// Register a remotely callable method. Fails with `DuplicateName` on
    /// collision with an existing method.
    pub fn register_method(
        &mut self,
        name: &str,
        method: impl FnMut(&[Value], &Map<String, Value>) -> Result<Value> + Send + 'static,
    ) -> Result<()> {
        if self.methods.contains_key(name) {
            return Err(Error::DuplicateName(name.to_string()));
        }
        self.methods.insert(name.to_string(), Box::new(method));
        Ok(())
    }

    /// Invoke a registered method. Fails with `UnknownMethod` for names
    /// never registered.
    pub fn call_method(
        &mut self,
        name: &str,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> Result<Value> {
        match self.methods.get_mut(name) {
            Some(method) => method(args, kwargs),
            None => Err(Error::UnknownMethod(name.to_string())),
        }
    }
}

impl fmt::Debug for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrument")
            .field("name", &self.name)
            .field("parameters", &self.parameters.keys().collect::<Vec<_>>())
            .field("children", &self.children.keys().collect::<Vec<_>>())
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}
