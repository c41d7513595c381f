use std::collections::BTreeMap;
use std::fmt;

use anyhow::{bail, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The structural type of a [`crate::Value`].
///
/// `Dynamic` is the pseudo-type used by schemas for attributes whose concrete
/// type is only decided by the configuration; a known value never carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Bool,
    Number,
    String,
    Dynamic,
    List(Box<Type>),
    Set(Box<Type>),
    Map(Box<Type>),
    Tuple(Vec<Type>),
    Object(BTreeMap<String, Type>),
}

impl Type {
    pub fn object(fields: impl IntoIterator<Item = (String, Type)>) -> Type {
        Type::Object(fields.into_iter().collect())
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Type::Object(_))
    }

    pub fn is_set(&self) -> bool {
        matches!(self, Type::Set(_))
    }

    /// Element type of a list, set, or map.
    pub fn element_type(&self) -> Option<&Type> {
        match self {
            Type::List(elem) | Type::Set(elem) | Type::Map(elem) => Some(elem),
            _ => None,
        }
    }

    /// Declared type of a named object field.
    pub fn field_type(&self, name: &str) -> Option<&Type> {
        match self {
            Type::Object(fields) => fields.get(name),
            _ => None,
        }
    }

    /// Whether a value of this type may be used where `declared` is expected.
    ///
    /// `Dynamic` on the declared side accepts any concrete type; the check
    /// recurses so that e.g. an object with a concretely typed field conforms
    /// to the same object shape declared with a dynamic field.
    pub fn usable_as(&self, declared: &Type) -> bool {
        match (self, declared) {
            (_, Type::Dynamic) => true,
            (Type::List(a), Type::List(b))
            | (Type::Set(a), Type::Set(b))
            | (Type::Map(a), Type::Map(b)) => a.usable_as(b),
            (Type::Tuple(a), Type::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.usable_as(y))
            }
            (Type::Object(a), Type::Object(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(name, ty)| {
                        b.get(name).is_some_and(|declared| ty.usable_as(declared))
                    })
            }
            _ => self == declared,
        }
    }

    /// The compact wire form used in schema documents: `"string"`,
    /// `["list", T]`, `["object", {name: T}]`, and so on.
    pub fn to_wire(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            Type::Bool => json!("bool"),
            Type::Number => json!("number"),
            Type::String => json!("string"),
            Type::Dynamic => json!("dynamic"),
            Type::List(elem) => json!(["list", elem.to_wire()]),
            Type::Set(elem) => json!(["set", elem.to_wire()]),
            Type::Map(elem) => json!(["map", elem.to_wire()]),
            Type::Tuple(elems) => {
                json!(["tuple", elems.iter().map(Type::to_wire).collect::<Vec<_>>()])
            }
            Type::Object(fields) => {
                let fields: serde_json::Map<String, serde_json::Value> = fields
                    .iter()
                    .map(|(name, ty)| (name.clone(), ty.to_wire()))
                    .collect();
                json!(["object", fields])
            }
        }
    }

    pub fn from_wire(wire: &serde_json::Value) -> Result<Type> {
        match wire {
            serde_json::Value::String(name) => match name.as_str() {
                "bool" => Ok(Type::Bool),
                "number" => Ok(Type::Number),
                "string" => Ok(Type::String),
                "dynamic" => Ok(Type::Dynamic),
                other => bail!("unknown primitive type name: {:?}", other),
            },
            serde_json::Value::Array(parts) => {
                let (kind, arg) = match parts.as_slice() {
                    [serde_json::Value::String(kind), arg] => (kind.as_str(), arg),
                    _ => bail!("compound type must be a [kind, argument] pair"),
                };
                match kind {
                    "list" => Ok(Type::List(Box::new(Type::from_wire(arg)?))),
                    "set" => Ok(Type::Set(Box::new(Type::from_wire(arg)?))),
                    "map" => Ok(Type::Map(Box::new(Type::from_wire(arg)?))),
                    "tuple" => {
                        let elems = match arg {
                            serde_json::Value::Array(elems) => elems,
                            _ => bail!("tuple element types must be an array"),
                        };
                        Ok(Type::Tuple(
                            elems.iter().map(Type::from_wire).collect::<Result<_>>()?,
                        ))
                    }
                    "object" => {
                        let fields = match arg {
                            serde_json::Value::Object(fields) => fields,
                            _ => bail!("object field types must be an object"),
                        };
                        Ok(Type::Object(
                            fields
                                .iter()
                                .map(|(name, ty)| Ok((name.clone(), Type::from_wire(ty)?)))
                                .collect::<Result<_>>()?,
                        ))
                    }
                    other => bail!("unknown compound type kind: {:?}", other),
                }
            }
            _ => bail!("a type is encoded as a string or a [kind, argument] pair"),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_wire())
    }
}

impl Serialize for Type {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Type {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Type, D::Error> {
        let wire = serde_json::Value::deserialize(deserializer)?;
        Type::from_wire(&wire).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pair_object() -> Type {
        Type::object([
            ("a".to_owned(), Type::String),
            ("b".to_owned(), Type::Number),
        ])
    }

    #[test]
    fn test_wire_round_trip() {
        let types = [
            Type::Bool,
            Type::String,
            Type::Dynamic,
            Type::List(Box::new(Type::Number)),
            Type::Set(Box::new(pair_object())),
            Type::Map(Box::new(Type::String)),
            Type::Tuple(vec![Type::String, Type::Bool]),
            pair_object(),
        ];
        for ty in types {
            let wire = serde_json::to_value(&ty).unwrap();
            let back: Type = serde_json::from_value(wire).unwrap();
            assert_eq!(back, ty);
        }
    }

    #[test]
    fn test_wire_shape() {
        assert_eq!(serde_json::to_value(Type::String).unwrap(), json!("string"));
        assert_eq!(
            serde_json::to_value(Type::List(Box::new(Type::Bool))).unwrap(),
            json!(["list", "bool"])
        );
        assert_eq!(
            serde_json::to_value(pair_object()).unwrap(),
            json!(["object", {"a": "string", "b": "number"}])
        );
    }

    #[test]
    fn test_from_wire_rejects_garbage() {
        assert!(Type::from_wire(&json!("str")).is_err());
        assert!(Type::from_wire(&json!(["list"])).is_err());
        assert!(Type::from_wire(&json!(12)).is_err());
    }

    #[test]
    fn test_usable_as_dynamic() {
        assert!(Type::String.usable_as(&Type::Dynamic));
        assert!(pair_object().usable_as(&Type::Dynamic));
        assert!(!Type::Dynamic.usable_as(&Type::String));
    }

    #[test]
    fn test_usable_as_structural() {
        let declared = Type::object([
            ("a".to_owned(), Type::Dynamic),
            ("b".to_owned(), Type::Number),
        ]);
        assert!(pair_object().usable_as(&declared));
        assert!(!pair_object().usable_as(&Type::object([("a".to_owned(), Type::String)])));
        assert!(Type::List(Box::new(Type::String))
            .usable_as(&Type::List(Box::new(Type::Dynamic))));
        assert!(!Type::List(Box::new(Type::String)).usable_as(&Type::Set(Box::new(Type::String))));
    }
}
