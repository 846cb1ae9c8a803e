//! Parameter, the bounded value cell.
//!
//! A `Parameter` is a named slot holding a scalar that can be read, written,
//! bounds-checked, and observed. Custom read/write hooks let a cell front an
//! external quantity (a device channel, a remote peer); without hooks it is
//! a plain stored value. Handles are cheap clones over shared state, so a
//! registry, a derived cell, and a test can all hold the same cell.
//!
//! Reads and writes are explicit (`read()` / `write(v)`); `apply(Option<f64>)`
//! is the call-style convenience where `None` means "leave unchanged".

use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};

/// Hook producing the current value on read (e.g. query a device or a peer).
/// Runs while the cell is locked: a hook must not call back into its own
/// cell. Other cells (a derivation's source) and peers are fine.
pub type ReadHook = Box<dyn FnMut() -> Result<f64> + Send>;
/// Hook invoked on write with the accepted value, before it is stored.
/// Same locking constraint as [`ReadHook`].
pub type WriteHook = Box<dyn FnMut(f64) -> Result<()> + Send>;
/// Subscriber invoked after a successful write. Runs with the cell
/// unlocked, so a callback may read the cell it watches.
pub type Callback = Box<dyn FnMut(f64) + Send>;
/// Value munging applied on the way through a cell: a read parser
/// normalizes what a read produces before it is stored and returned, a
/// write parser coerces an accepted setpoint (e.g. snap to integer)
/// after the bounds check and before the write hook sees it.
pub type Parser = Box<dyn FnMut(f64) -> f64 + Send>;

/// Closed interval constraint. Either side may be unconstrained.
/// Enforced on direct writes only.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bounds {
    pub low: Option<f64>,
    pub high: Option<f64>,
}

impl Bounds {
    pub fn unconstrained() -> Self {
        Bounds { low: None, high: None }
    }

    pub fn closed(low: f64, high: f64) -> Self {
        Bounds { low: Some(low), high: Some(high) }
    }

    pub fn at_least(low: f64) -> Self {
        Bounds { low: Some(low), high: None }
    }

    pub fn at_most(high: f64) -> Self {
        Bounds { low: None, high: Some(high) }
    }

    /// Endpoint-inclusive containment check.
    pub fn contains(&self, v: f64) -> bool {
        if let Some(low) = self.low {
            if v < low {
                return false;
            }
        }
        if let Some(high) = self.high {
            if v > high {
                return false;
            }
        }
        true
    }

    /// Swap the two sides. Used when a derived cell's transform reverses
    /// the ordering of the interval (negation, reciprocal).
    pub(crate) fn swapped(self) -> Self {
        Bounds { low: self.high, high: self.low }
    }

    /// Elementwise image of the interval under `f`.
    pub(crate) fn map(self, f: impl Fn(f64) -> f64) -> Self {
        Bounds {
            low: self.low.map(&f),
            high: self.high.map(&f),
        }
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = |b: Option<f64>| match b {
            Some(v) => v.to_string(),
            None => "unbounded".to_string(),
        };
        write!(f, "[{}, {}]", side(self.low), side(self.high))
    }
}

/// Whether the cell has a write path at all. Fixed at construction:
/// composite derivations and measurements are `ReadOnly`, and no runtime
/// state can reopen their write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Writable,
    ReadOnly,
}

/// Role tag used by registry enumeration filters.
///
/// `Knob` is a settable control, `Switch` a settable discrete control,
/// `Measurement` a read-only observed quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Knob,
    Switch,
    Measurement,
}

/// Either a raw scalar or another cell, for comparisons and combination.
/// A cell operand is resolved through its `read()`.
pub enum Operand {
    Scalar(f64),
    Cell(Parameter),
}

impl Operand {
    pub fn resolve(&self) -> Result<f64> {
        match self {
            Operand::Scalar(v) => Ok(*v),
            Operand::Cell(p) => p.read(),
        }
    }
}

impl From<f64> for Operand {
    fn from(v: f64) -> Self {
        Operand::Scalar(v)
    }
}

impl From<&Parameter> for Operand {
    fn from(p: &Parameter) -> Self {
        Operand::Cell(p.clone())
    }
}

impl From<Parameter> for Operand {
    fn from(p: Parameter) -> Self {
        Operand::Cell(p)
    }
}

struct Inner {
    name: String,
    value: Option<f64>,
    read_hook: Option<ReadHook>,
    write_hook: Option<WriteHook>,
    read_parser: Option<Parser>,
    write_parser: Option<Parser>,
    bounds: Bounds,
    access: Access,
    kind: Kind,
    callbacks: Vec<(String, Callback)>,
    callbacks_enabled: bool,
}

/// A named, boundable, optionally side-effecting readable/writable scalar.
///
/// Cloning a `Parameter` clones the handle, not the cell: all clones see
/// the same value, hooks, and callbacks.
#[derive(Clone)]
pub struct Parameter {
    inner: Arc<Mutex<Inner>>,
}

impl Parameter {
    /// A writable knob with no stored value yet. Reading before the first
    /// write fails with `UnsetValue`.
    pub fn new(name: &str) -> Self {
        Self::builder(name).build()
    }

    /// A writable knob with an initial stored value.
    pub fn with_value(name: &str, value: f64) -> Self {
        Self::builder(name).initial(value).build()
    }

    pub fn builder(name: &str) -> ParameterBuilder {
        ParameterBuilder {
            name: name.to_string(),
            value: None,
            read_hook: None,
            write_hook: None,
            read_parser: None,
            write_parser: None,
            bounds: Bounds::unconstrained(),
            kind: Kind::Knob,
            access: Access::Writable,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    pub fn kind(&self) -> Kind {
        self.lock().kind
    }

    pub fn access(&self) -> Access {
        self.lock().access
    }

    pub fn bounds(&self) -> Bounds {
        self.lock().bounds
    }

    /// The stored value, without running the read hook. `None` until the
    /// first successful read or write.
    pub fn last_value(&self) -> Option<f64> {
        self.lock().value
    }

    /// Read the current value. Runs the read hook if one is present and
    /// stores its result; fails with `UnsetValue` if no value has ever
    /// been stored and there is no hook to produce one. The read parser,
    /// if any, normalizes the value before it is stored and returned.
    pub fn read(&self) -> Result<f64> {
        let mut inner = self.lock();
        let hooked = match inner.read_hook.as_mut() {
            Some(hook) => Some(hook()?),
            None => None,
        };
        if let Some(v) = hooked {
            inner.value = Some(v);
        }
        let current = inner
            .value
            .ok_or_else(|| Error::UnsetValue(inner.name.clone()))?;
        match inner.read_parser.as_mut() {
            Some(parse) => {
                let parsed = parse(current);
                inner.value = Some(parsed);
                Ok(parsed)
            }
            None => Ok(current),
        }
    }

    /// Write a new value. Order of operations: access check, bounds check
    /// (on the raw value), write parser, write hook, store, callbacks
    /// (insertion order). A rejected write leaves the stored value
    /// unchanged.
    pub fn write(&self, value: f64) -> Result<()> {
        let mut inner = self.lock();
        if inner.access == Access::ReadOnly {
            return Err(Error::ReadOnly(inner.name.clone()));
        }
        if !inner.bounds.contains(value) {
            return Err(Error::OutOfBounds {
                name: inner.name.clone(),
                value,
                bounds: inner.bounds.to_string(),
            });
        }
        let value = match inner.write_parser.as_mut() {
            Some(parse) => parse(value),
            None => value,
        };
        if let Some(hook) = inner.write_hook.as_mut() {
            hook(value)?;
        }
        inner.value = Some(value);
        if !inner.callbacks_enabled || inner.callbacks.is_empty() {
            return Ok(());
        }

        // Callbacks run with the cell unlocked so a subscriber may touch
        // this same cell (read it, inspect its value) without deadlocking
        // the writing thread.
        let mut running = std::mem::take(&mut inner.callbacks);
        drop(inner);
        for (_, callback) in running.iter_mut() {
            callback(value);
        }

        // Restore the set, keeping anything (re)subscribed while it was
        // out; a re-registration under an existing key wins.
        let mut inner = self.lock();
        let added = std::mem::take(&mut inner.callbacks);
        running.retain(|(key, _)| !added.iter().any(|(k, _)| k == key));
        inner.callbacks = running;
        inner.callbacks.extend(added);
        Ok(())
    }

    /// Call-style convenience: `Some(v)` writes, `None` is a no-op. Lets a
    /// call site thread through an optional setpoint without branching.
    pub fn apply(&self, value: Option<f64>) -> Result<()> {
        match value {
            Some(v) => self.write(v),
            None => Ok(()),
        }
    }

    /// Register a post-write subscriber under `key`. Re-registering an
    /// existing key replaces the closure but keeps its position in the
    /// invocation order.
    pub fn subscribe(&self, key: &str, callback: impl FnMut(f64) + Send + 'static) {
        let mut inner = self.lock();
        if let Some(slot) = inner.callbacks.iter_mut().find(|(k, _)| k == key) {
            slot.1 = Box::new(callback);
        } else {
            inner.callbacks.push((key.to_string(), Box::new(callback)));
        }
    }

    pub fn unsubscribe(&self, key: &str) {
        self.lock().callbacks.retain(|(k, _)| k != key);
    }

    /// Globally suppress or re-enable this cell's callbacks.
    pub fn set_callbacks_enabled(&self, enabled: bool) {
        self.lock().callbacks_enabled = enabled;
    }

    /// Compare the cell's current value against a scalar or another cell.
    /// Fails with `InvalidOperand` if either side is NaN.
    pub fn compare(&self, other: impl Into<Operand>) -> Result<Ordering> {
        let lhs = self.read()?;
        let rhs = other.into().resolve()?;
        lhs.partial_cmp(&rhs)
            .ok_or_else(|| Error::InvalidOperand("comparison with NaN".into()))
    }

    /// `true` if the cell currently reads equal to the operand.
    pub fn reads_as(&self, other: impl Into<Operand>) -> Result<bool> {
        Ok(self.compare(other)? == Ordering::Equal)
    }

    /// In-place add: read, offset, write back through the normal write
    /// contract (bounds, hooks, and callbacks all apply). Does not create
    /// a derived cell.
    pub fn add_assign(&self, k: f64) -> Result<()> {
        let v = self.read()?;
        self.write(v + k)
    }

    pub fn sub_assign(&self, k: f64) -> Result<()> {
        let v = self.read()?;
        self.write(v - k)
    }

    pub fn mul_assign(&self, k: f64) -> Result<()> {
        let v = self.read()?;
        self.write(v * k)
    }

    pub fn div_assign(&self, k: f64) -> Result<()> {
        let v = self.read()?;
        self.write(v / k)
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        write!(f, "Parameter('{}', {:?})", inner.name, inner.value)
    }
}

pub struct ParameterBuilder {
    name: String,
    value: Option<f64>,
    read_hook: Option<ReadHook>,
    write_hook: Option<WriteHook>,
    read_parser: Option<Parser>,
    write_parser: Option<Parser>,
    bounds: Bounds,
    kind: Kind,
    access: Access,
}

impl ParameterBuilder {
    /// Initial stored value. Stored directly: hooks and callbacks do not
    /// fire for the initial value, and it is not bounds-checked.
    pub fn initial(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn kind(mut self, kind: Kind) -> Self {
        self.kind = kind;
        self
    }

    pub fn read_hook(mut self, hook: impl FnMut() -> Result<f64> + Send + 'static) -> Self {
        self.read_hook = Some(Box::new(hook));
        self
    }

    pub fn write_hook(mut self, hook: impl FnMut(f64) -> Result<()> + Send + 'static) -> Self {
        self.write_hook = Some(Box::new(hook));
        self
    }

    /// Normalize what a read produces before it is stored and returned.
    pub fn read_parser(mut self, parser: impl FnMut(f64) -> f64 + Send + 'static) -> Self {
        self.read_parser = Some(Box::new(parser));
        self
    }

    /// Coerce an accepted setpoint before the write hook sees it.
    pub fn write_parser(mut self, parser: impl FnMut(f64) -> f64 + Send + 'static) -> Self {
        self.write_parser = Some(Box::new(parser));
        self
    }

    /// Permanently disable the write path.
    pub fn read_only(mut self) -> Self {
        self.access = Access::ReadOnly;
        self
    }

    pub fn build(self) -> Parameter {
        // Measurements never get a write path, whatever else was set.
        let access = if self.kind == Kind::Measurement {
            Access::ReadOnly
        } else {
            self.access
        };
        Parameter {
            inner: Arc::new(Mutex::new(Inner {
                name: self.name,
                value: self.value,
                read_hook: self.read_hook,
                write_hook: self.write_hook,
                read_parser: self.read_parser,
                write_parser: self.write_parser,
                bounds: self.bounds,
                access,
                kind: self.kind,
                callbacks: Vec::new(),
                callbacks_enabled: true,
            })),
        }
    }
}
