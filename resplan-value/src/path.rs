use std::fmt;

use crate::value::Value;

/// One step of an [`AttributePath`].
#[derive(Debug, Clone, PartialEq)]
pub enum PathStep {
    /// A named field of an object.
    AttributeName(String),
    /// An index into a list or tuple.
    ElementKeyInt(usize),
    /// A key of a map.
    ElementKeyString(String),
    /// A set element, addressed by its own value (sets have no other identity).
    ElementKeyValue(Box<Value>),
}

/// An address into a value tree, used for diagnostics and schema lookups.
///
/// Paths are extended by value: `with_name` and friends return a new path and
/// never mutate the receiver, so sibling branches of a recursion can never
/// alias each other's path state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributePath {
    steps: Vec<PathStep>,
}

impl AttributePath {
    pub fn root() -> AttributePath {
        AttributePath::default()
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    pub fn is_root(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn with_name(&self, name: &str) -> AttributePath {
        self.extended(PathStep::AttributeName(name.to_owned()))
    }

    pub fn with_index(&self, index: usize) -> AttributePath {
        self.extended(PathStep::ElementKeyInt(index))
    }

    pub fn with_key(&self, key: &str) -> AttributePath {
        self.extended(PathStep::ElementKeyString(key.to_owned()))
    }

    pub fn with_element(&self, element: Value) -> AttributePath {
        self.extended(PathStep::ElementKeyValue(Box::new(element)))
    }

    /// Concatenate a relative path onto this one.
    pub fn join(&self, relative: &AttributePath) -> AttributePath {
        let mut steps = self.steps.clone();
        steps.extend(relative.steps.iter().cloned());
        AttributePath { steps }
    }

    fn extended(&self, step: PathStep) -> AttributePath {
        let mut steps = self.steps.clone();
        steps.push(step);
        AttributePath { steps }
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.steps.is_empty() {
            return write!(f, "(root)");
        }
        for (i, step) in self.steps.iter().enumerate() {
            match step {
                PathStep::AttributeName(name) => {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{}", name)?;
                }
                PathStep::ElementKeyInt(index) => write!(f, "[{}]", index)?,
                PathStep::ElementKeyString(key) => write!(f, "[{:?}]", key)?,
                PathStep::ElementKeyValue(element) => write!(f, "[{}]", element)?,
            }
        }
        Ok(())
    }
}
