use crate::value::{Value, ValueKind};

#[derive(Debug, Clone)]
pub struct Binding {
    pub name: String,
    pub value: Value,
}

impl Binding {
    pub fn kind(&self) -> ValueKind {
        self.value.kind()
    }
}

/// Snapshot of the environment size, taken before a `try` body runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    bindings: usize,
    scopes: usize,
}

/// Flat binding table with a stack of scope watermarks.
///
/// Lookups walk the table from the most recent binding backwards, so a later
/// binding shadows every earlier one with the same name. Popping a scope
/// discards every binding created since its watermark.
#[derive(Debug, Default)]
pub struct Environment {
    bindings: Vec<Binding>,
    scopes: Vec<usize>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    fn watermark(&self) -> usize {
        self.scopes.last().copied().unwrap_or(0)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.bindings.iter().rposition(|binding| binding.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.position(name).map(|index| &self.bindings[index].value)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        let index = self.position(name)?;
        Some(&mut self.bindings[index].value)
    }

    /// Always appends, shadowing any earlier binding of `name`.
    pub fn define(&mut self, name: &str, value: Value) {
        self.bindings.push(Binding {
            name: name.to_string(),
            value,
        });
    }

    /// Updates `name` if it was bound in the current scope, otherwise appends.
    pub fn declare(&mut self, name: &str, value: Value) {
        match self.position(name) {
            Some(index) if index >= self.watermark() => self.bindings[index].value = value,
            _ => self.define(name, value),
        }
    }

    /// Updates the most recent binding of `name` anywhere, otherwise appends.
    pub fn assign(&mut self, name: &str, value: Value) {
        match self.get_mut(name) {
            Some(slot) => *slot = value,
            None => self.define(name, value),
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(self.bindings.len());
    }

    /// Returns `false` when there was no scope to pop.
    pub fn pop_scope(&mut self) -> bool {
        match self.scopes.pop() {
            Some(watermark) => {
                self.bindings.truncate(watermark);
                true
            }
            None => false,
        }
    }

    pub fn mark(&self) -> Mark {
        Mark {
            bindings: self.bindings.len(),
            scopes: self.scopes.len(),
        }
    }

    /// Rolls the table and the scope stack back to an earlier [`Mark`].
    pub fn restore(&mut self, mark: Mark) {
        self.scopes.truncate(mark.scopes);
        self.bindings.truncate(mark.bindings);
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }
}
