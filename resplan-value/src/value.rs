use std::collections::BTreeMap;
use std::fmt;

use anyhow::{anyhow, bail, Result};

use crate::path::{AttributePath, PathStep};
use crate::types::Type;

/// The contents of a known [`Value`].
#[derive(Debug, Clone)]
pub enum Payload {
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<Value>),
    /// Insertion-ordered; equality is order-insensitive like any set.
    Set(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Tuple(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

#[derive(Debug, Clone)]
enum State {
    Null,
    Unknown,
    Known(Payload),
}

/// A dynamically typed value: null, unknown, or a known payload, always
/// paired with the structural [`Type`] it conforms to.
#[derive(Debug, Clone)]
pub struct Value {
    ty: Type,
    state: State,
}

/// Visitor verdict for [`Value::walk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Walk {
    /// Descend into this node's children.
    Continue,
    /// Do not descend, but keep walking siblings.
    Skip,
    /// Abort the entire walk.
    Stop,
}

impl Value {
    pub fn null(ty: Type) -> Value {
        Value {
            ty,
            state: State::Null,
        }
    }

    pub fn unknown(ty: Type) -> Value {
        Value {
            ty,
            state: State::Unknown,
        }
    }

    /// Construct a known value, validating the payload against the type.
    pub fn new(ty: Type, payload: Payload) -> Result<Value> {
        validate(&ty, &payload)?;
        Ok(Value {
            ty,
            state: State::Known(payload),
        })
    }

    /// An "empty" value of the given type: objects become a known object with
    /// every field null, everything else becomes null. This is the stand-in
    /// prior state for a resource that has never been recorded.
    pub fn empty_of(ty: &Type) -> Value {
        match ty {
            Type::Object(fields) => Value {
                ty: ty.clone(),
                state: State::Known(Payload::Object(
                    fields
                        .iter()
                        .map(|(name, field_ty)| (name.clone(), Value::null(field_ty.clone())))
                        .collect(),
                )),
            },
            _ => Value::null(ty.clone()),
        }
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn is_null(&self) -> bool {
        matches!(self.state, State::Null)
    }

    /// False only for the unknown marker itself; a known collection
    /// containing unknown elements is still "known" here.
    pub fn is_known(&self) -> bool {
        !matches!(self.state, State::Unknown)
    }

    /// True when no unknown marker appears anywhere in the tree.
    pub fn is_wholly_known(&self) -> bool {
        match &self.state {
            State::Unknown => false,
            State::Null => true,
            State::Known(payload) => match payload {
                Payload::Bool(_) | Payload::Number(_) | Payload::String(_) => true,
                Payload::List(items) | Payload::Set(items) | Payload::Tuple(items) => {
                    items.iter().all(Value::is_wholly_known)
                }
                Payload::Map(entries) | Payload::Object(entries) => {
                    entries.values().all(Value::is_wholly_known)
                }
            },
        }
    }

    pub fn payload(&self) -> Option<&Payload> {
        match &self.state {
            State::Known(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.payload() {
            Some(Payload::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.payload() {
            Some(Payload::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self.payload() {
            Some(Payload::Object(fields)) => Some(fields),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self.payload() {
            Some(Payload::List(items)) | Some(Payload::Tuple(items)) => Some(items),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&[Value]> {
        match self.payload() {
            Some(Payload::Set(items)) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self.payload() {
            Some(Payload::Map(entries)) => Some(entries),
            _ => None,
        }
    }

    /// Resolve one path step against this value.
    ///
    /// Fails on null and unknown values, on steps that do not apply to the
    /// payload shape, and on absent fields/elements; the caller decides what
    /// unreachability means.
    pub fn apply_step(&self, step: &PathStep) -> Result<&Value> {
        let payload = match &self.state {
            State::Known(payload) => payload,
            State::Null => bail!("cannot apply a path step to a null value"),
            State::Unknown => bail!("cannot apply a path step to an unknown value"),
        };
        match (payload, step) {
            (Payload::Object(fields), PathStep::AttributeName(name)) => fields
                .get(name)
                .ok_or_else(|| anyhow!("no attribute named {:?}", name)),
            (Payload::List(items), PathStep::ElementKeyInt(index))
            | (Payload::Tuple(items), PathStep::ElementKeyInt(index)) => items
                .get(*index)
                .ok_or_else(|| anyhow!("no element at index {}", index)),
            (Payload::Map(entries), PathStep::ElementKeyString(key)) => entries
                .get(key)
                .ok_or_else(|| anyhow!("no element under key {:?}", key)),
            (Payload::Set(items), PathStep::ElementKeyValue(element)) => items
                .iter()
                .find(|candidate| *candidate == element.as_ref())
                .ok_or_else(|| anyhow!("no matching set element")),
            _ => bail!(
                "path step does not apply to a value of type {}",
                self.ty
            ),
        }
    }

    /// Resolve a whole (relative) path against this value.
    pub fn apply_path(&self, path: &AttributePath) -> Result<&Value> {
        let mut current = self;
        for step in path.steps() {
            current = current.apply_step(step)?;
        }
        Ok(current)
    }

    /// Depth-first pre-order walk. The visitor sees the root with an empty
    /// path; children are addressed by the step that reaches them. Returning
    /// [`Walk::Skip`] prunes a subtree, [`Walk::Stop`] aborts the whole walk.
    pub fn walk<F>(&self, visit: &mut F)
    where
        F: FnMut(&AttributePath, &Value) -> Walk,
    {
        self.walk_at(&AttributePath::root(), visit);
    }

    fn walk_at<F>(&self, path: &AttributePath, visit: &mut F) -> bool
    where
        F: FnMut(&AttributePath, &Value) -> Walk,
    {
        match visit(path, self) {
            Walk::Stop => return false,
            Walk::Skip => return true,
            Walk::Continue => {}
        }
        let payload = match &self.state {
            State::Known(payload) => payload,
            _ => return true,
        };
        match payload {
            Payload::Bool(_) | Payload::Number(_) | Payload::String(_) => true,
            Payload::List(items) | Payload::Tuple(items) => {
                for (index, item) in items.iter().enumerate() {
                    if !item.walk_at(&path.with_index(index), visit) {
                        return false;
                    }
                }
                true
            }
            Payload::Set(items) => {
                for item in items {
                    if !item.walk_at(&path.with_element(item.clone()), visit) {
                        return false;
                    }
                }
                true
            }
            Payload::Map(entries) => {
                for (key, item) in entries {
                    if !item.walk_at(&path.with_key(key), visit) {
                        return false;
                    }
                }
                true
            }
            Payload::Object(fields) => {
                for (name, item) in fields {
                    if !item.walk_at(&path.with_name(name), visit) {
                        return false;
                    }
                }
                true
            }
        }
    }
}

fn validate(ty: &Type, payload: &Payload) -> Result<()> {
    match (ty, payload) {
        (Type::Dynamic, _) => {
            bail!("a known value needs a concrete type, not the dynamic pseudo-type")
        }
        (Type::Bool, Payload::Bool(_))
        | (Type::Number, Payload::Number(_))
        | (Type::String, Payload::String(_)) => Ok(()),
        (Type::List(elem), Payload::List(items)) | (Type::Set(elem), Payload::Set(items)) => {
            for item in items {
                if !item.ty().usable_as(elem) {
                    bail!(
                        "element of type {} does not conform to element type {}",
                        item.ty(),
                        elem
                    );
                }
            }
            Ok(())
        }
        (Type::Map(elem), Payload::Map(entries)) => {
            for (key, item) in entries {
                if !item.ty().usable_as(elem) {
                    bail!(
                        "element {:?} of type {} does not conform to element type {}",
                        key,
                        item.ty(),
                        elem
                    );
                }
            }
            Ok(())
        }
        (Type::Tuple(elems), Payload::Tuple(items)) => {
            if elems.len() != items.len() {
                bail!(
                    "tuple has {} elements where {} were declared",
                    items.len(),
                    elems.len()
                );
            }
            for (item, elem) in items.iter().zip(elems) {
                if !item.ty().usable_as(elem) {
                    bail!(
                        "tuple element of type {} does not conform to {}",
                        item.ty(),
                        elem
                    );
                }
            }
            Ok(())
        }
        (Type::Object(field_types), Payload::Object(fields)) => {
            for name in field_types.keys() {
                if !fields.contains_key(name) {
                    bail!("object is missing declared field {:?}", name);
                }
            }
            for (name, item) in fields {
                let declared = field_types
                    .get(name)
                    .ok_or_else(|| anyhow!("object has undeclared field {:?}", name))?;
                if !item.ty().usable_as(declared) {
                    bail!(
                        "field {:?} of type {} does not conform to declared type {}",
                        name,
                        item.ty(),
                        declared
                    );
                }
            }
            Ok(())
        }
        _ => bail!("payload shape does not match declared type {}", ty),
    }
}

/// JSON numbers with distinct integer/float representations still compare
/// equal when they denote the same number.
fn numbers_equal(a: &serde_json::Number, b: &serde_json::Number) -> bool {
    if a == b {
        return true;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn payloads_equal(a: &Payload, b: &Payload) -> bool {
    match (a, b) {
        (Payload::Bool(a), Payload::Bool(b)) => a == b,
        (Payload::Number(a), Payload::Number(b)) => numbers_equal(a, b),
        (Payload::String(a), Payload::String(b)) => a == b,
        (Payload::List(a), Payload::List(b)) | (Payload::Tuple(a), Payload::Tuple(b)) => a == b,
        (Payload::Set(a), Payload::Set(b)) => sets_equal(a, b),
        (Payload::Map(a), Payload::Map(b)) | (Payload::Object(a), Payload::Object(b)) => a == b,
        _ => false,
    }
}

fn sets_equal(a: &[Value], b: &[Value]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut used = vec![false; b.len()];
    'outer: for item in a {
        for (i, candidate) in b.iter().enumerate() {
            if !used[i] && item == candidate {
                used[i] = true;
                continue 'outer;
            }
        }
        return false;
    }
    true
}

/// Structural equality: same type, same state, same contents. Two unknown
/// values of the same type are equal here; code that must treat unknowns as
/// incomparable (the set correlation heuristic) checks knownness separately.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        if self.ty != other.ty {
            return false;
        }
        match (&self.state, &other.state) {
            (State::Null, State::Null) => true,
            (State::Unknown, State::Unknown) => true,
            (State::Known(a), State::Known(b)) => payloads_equal(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            State::Null => write!(f, "null"),
            State::Unknown => write!(f, "(unknown)"),
            State::Known(payload) => match payload {
                Payload::Bool(b) => write!(f, "{}", b),
                Payload::Number(n) => write!(f, "{}", n),
                Payload::String(s) => write!(f, "{:?}", s),
                Payload::List(items) | Payload::Set(items) | Payload::Tuple(items) => {
                    write!(f, "[")?;
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", item)?;
                    }
                    write!(f, "]")
                }
                Payload::Map(entries) | Payload::Object(entries) => {
                    write!(f, "{{")?;
                    for (i, (key, item)) in entries.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}: {}", key, item)?;
                    }
                    write!(f, "}}")
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string(s: &str) -> Value {
        Value::new(Type::String, Payload::String(s.into())).unwrap()
    }

    fn number(n: i64) -> Value {
        Value::new(Type::Number, Payload::Number(n.into())).unwrap()
    }

    fn pair_type() -> Type {
        Type::object([
            ("a".to_owned(), Type::String),
            ("b".to_owned(), Type::String),
        ])
    }

    fn pair(a: Value, b: Value) -> Value {
        Value::new(
            pair_type(),
            Payload::Object([("a".to_owned(), a), ("b".to_owned(), b)].into()),
        )
        .unwrap()
    }

    #[test]
    fn test_validation_accepts_conforming_payloads() {
        assert!(Value::new(Type::Bool, Payload::Bool(true)).is_ok());
        assert!(Value::new(
            Type::List(Box::new(Type::String)),
            Payload::List(vec![string("x")])
        )
        .is_ok());
        assert!(pair(string("x"), string("y")).is_wholly_known());
    }

    #[test]
    fn test_validation_rejects_mismatches() {
        assert!(Value::new(Type::Bool, Payload::String("no".into())).is_err());
        assert!(Value::new(
            Type::List(Box::new(Type::String)),
            Payload::List(vec![number(1)])
        )
        .is_err());
        // missing and undeclared object fields
        assert!(Value::new(
            pair_type(),
            Payload::Object([("a".to_owned(), string("x"))].into())
        )
        .is_err());
        assert!(Value::new(
            Type::object([("a".to_owned(), Type::String)]),
            Payload::Object(
                [("a".to_owned(), string("x")), ("z".to_owned(), string("y"))].into()
            )
        )
        .is_err());
    }

    #[test]
    fn test_validation_dynamic() {
        // a dynamic field accepts any concretely typed value
        let ty = Type::object([("a".to_owned(), Type::Dynamic)]);
        assert!(Value::new(ty, Payload::Object([("a".to_owned(), number(3))].into())).is_ok());
        // but a known value cannot itself claim to be dynamic
        assert!(Value::new(Type::Dynamic, Payload::Bool(true)).is_err());
    }

    #[test]
    fn test_empty_of() {
        let empty = Value::empty_of(&pair_type());
        assert!(!empty.is_null());
        assert!(empty.as_object().unwrap().values().all(Value::is_null));
        assert!(Value::empty_of(&Type::String).is_null());
    }

    #[test]
    fn test_equality_unknown_and_null() {
        assert_eq!(Value::null(Type::String), Value::null(Type::String));
        assert_eq!(Value::unknown(Type::String), Value::unknown(Type::String));
        assert_ne!(Value::unknown(Type::String), Value::null(Type::String));
        assert_ne!(Value::null(Type::String), Value::null(Type::Number));
    }

    #[test]
    fn test_equality_numbers() {
        let int = Value::new(Type::Number, Payload::Number(13.into())).unwrap();
        let float =
            Value::new(Type::Number, Payload::Number(serde_json::Number::from_f64(13.0).unwrap()))
                .unwrap();
        assert_eq!(int, float);
        assert_ne!(int, number(14));
    }

    #[test]
    fn test_equality_sets_ignore_order() {
        let ty = Type::Set(Box::new(Type::String));
        let ab = Value::new(ty.clone(), Payload::Set(vec![string("a"), string("b")])).unwrap();
        let ba = Value::new(ty.clone(), Payload::Set(vec![string("b"), string("a")])).unwrap();
        let ac = Value::new(ty, Payload::Set(vec![string("a"), string("c")])).unwrap();
        assert_eq!(ab, ba);
        assert_ne!(ab, ac);
    }

    #[test]
    fn test_is_wholly_known() {
        assert!(Value::null(Type::String).is_wholly_known());
        assert!(!Value::unknown(Type::String).is_wholly_known());
        let with_unknown = pair(string("x"), Value::unknown(Type::String));
        assert!(with_unknown.is_known());
        assert!(!with_unknown.is_wholly_known());
    }

    #[test]
    fn test_apply_step() {
        let value = pair(string("x"), string("y"));
        let a = value
            .apply_step(&PathStep::AttributeName("a".into()))
            .unwrap();
        assert_eq!(a, &string("x"));
        assert!(value
            .apply_step(&PathStep::AttributeName("zzz".into()))
            .is_err());
        assert!(value.apply_step(&PathStep::ElementKeyInt(0)).is_err());
        assert!(Value::null(pair_type())
            .apply_step(&PathStep::AttributeName("a".into()))
            .is_err());
    }

    #[test]
    fn test_apply_path() {
        let list = Value::new(
            Type::List(Box::new(pair_type())),
            Payload::List(vec![pair(string("x"), string("y"))]),
        )
        .unwrap();
        let path = AttributePath::root().with_index(0).with_name("b");
        assert_eq!(list.apply_path(&path).unwrap(), &string("y"));
        assert!(list
            .apply_path(&AttributePath::root().with_index(7))
            .is_err());
    }

    #[test]
    fn test_walk_order_and_skip() {
        let value = Value::new(
            Type::object([
                ("a".to_owned(), pair_type()),
                ("b".to_owned(), Type::String),
            ]),
            Payload::Object(
                [
                    ("a".to_owned(), pair(string("1"), string("2"))),
                    ("b".to_owned(), string("3")),
                ]
                .into(),
            ),
        )
        .unwrap();

        let mut seen = Vec::new();
        value.walk(&mut |path, _| {
            seen.push(path.to_string());
            Walk::Continue
        });
        assert_eq!(seen, vec!["(root)", "a", "a.a", "a.b", "b"]);

        let mut seen = Vec::new();
        value.walk(&mut |path, _| {
            seen.push(path.to_string());
            if path.to_string() == "a" {
                Walk::Skip
            } else {
                Walk::Continue
            }
        });
        assert_eq!(seen, vec!["(root)", "a", "b"]);

        let mut seen = Vec::new();
        value.walk(&mut |path, _| {
            seen.push(path.to_string());
            Walk::Stop
        });
        assert_eq!(seen, vec!["(root)"]);
    }
}
