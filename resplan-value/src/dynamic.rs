//! Wire codecs for values.
//!
//! Values travel in two encodings, mirroring the provider protocol they come
//! from: JSON (human-authored documents; cannot express the unknown marker)
//! and msgpack, where an unknown value is extension type 0. Decoding is
//! schema-directed: the caller supplies the declared [`Type`] and the decoder
//! produces a validated [`Value`], inferring concrete types where the
//! declared type is dynamic.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};

use crate::types::Type;
use crate::value::{Payload, Value};

/// The msgpack extension type carrying the unknown marker.
const UNKNOWN_EXT: i8 = 0;

pub fn to_json(value: &Value) -> Result<serde_json::Value> {
    if !value.is_known() {
        bail!("unknown values cannot be encoded as JSON");
    }
    if value.is_null() {
        return Ok(serde_json::Value::Null);
    }
    let payload = value.payload().expect("known non-null value has a payload");
    Ok(match payload {
        Payload::Bool(b) => serde_json::Value::Bool(*b),
        Payload::Number(n) => serde_json::Value::Number(n.clone()),
        Payload::String(s) => serde_json::Value::String(s.clone()),
        Payload::List(items) | Payload::Set(items) | Payload::Tuple(items) => {
            serde_json::Value::Array(items.iter().map(to_json).collect::<Result<_>>()?)
        }
        Payload::Map(entries) | Payload::Object(entries) => serde_json::Value::Object(
            entries
                .iter()
                .map(|(key, item)| Ok((key.clone(), to_json(item)?)))
                .collect::<Result<_>>()?,
        ),
    })
}

pub fn from_json(ty: &Type, json: &serde_json::Value) -> Result<Value> {
    if json.is_null() {
        return Ok(Value::null(ty.clone()));
    }
    let payload = match ty {
        Type::Bool => match json {
            serde_json::Value::Bool(b) => Payload::Bool(*b),
            _ => bail!("expected a bool, got {}", json),
        },
        Type::Number => match json {
            serde_json::Value::Number(n) => Payload::Number(n.clone()),
            _ => bail!("expected a number, got {}", json),
        },
        Type::String => match json {
            serde_json::Value::String(s) => Payload::String(s.clone()),
            _ => bail!("expected a string, got {}", json),
        },
        Type::Dynamic => return infer_json(json),
        Type::List(elem) => Payload::List(json_elements(elem, json)?),
        Type::Set(elem) => Payload::Set(json_elements(elem, json)?),
        Type::Map(elem) => {
            let entries = match json {
                serde_json::Value::Object(entries) => entries,
                _ => bail!("expected an object for a map value, got {}", json),
            };
            Payload::Map(
                entries
                    .iter()
                    .map(|(key, item)| {
                        Ok((
                            key.clone(),
                            from_json(elem, item).with_context(|| format!("map key {:?}", key))?,
                        ))
                    })
                    .collect::<Result<_>>()?,
            )
        }
        Type::Tuple(elems) => {
            let items = match json {
                serde_json::Value::Array(items) => items,
                _ => bail!("expected an array for a tuple value, got {}", json),
            };
            if items.len() != elems.len() {
                bail!(
                    "tuple has {} elements where {} were declared",
                    items.len(),
                    elems.len()
                );
            }
            Payload::Tuple(
                elems
                    .iter()
                    .zip(items)
                    .map(|(elem, item)| from_json(elem, item))
                    .collect::<Result<_>>()?,
            )
        }
        Type::Object(field_types) => {
            let fields = match json {
                serde_json::Value::Object(fields) => fields,
                _ => bail!("expected an object, got {}", json),
            };
            for name in fields.keys() {
                if !field_types.contains_key(name) {
                    bail!("undeclared object field {:?}", name);
                }
            }
            // absent fields decode as null
            Payload::Object(
                field_types
                    .iter()
                    .map(|(name, field_ty)| {
                        let item = match fields.get(name) {
                            Some(item) => from_json(field_ty, item)
                                .with_context(|| format!("field {:?}", name))?,
                            None => Value::null(field_ty.clone()),
                        };
                        Ok((name.clone(), item))
                    })
                    .collect::<Result<_>>()?,
            )
        }
    };
    Value::new(ty.clone(), payload)
}

fn json_elements(elem: &Type, json: &serde_json::Value) -> Result<Vec<Value>> {
    let items = match json {
        serde_json::Value::Array(items) => items,
        _ => bail!("expected an array, got {}", json),
    };
    items
        .iter()
        .enumerate()
        .map(|(index, item)| from_json(elem, item).with_context(|| format!("element {}", index)))
        .collect()
}

/// Decode a JSON document under a dynamic type: arrays become tuples and
/// objects become object values, each element typed by its own contents.
fn infer_json(json: &serde_json::Value) -> Result<Value> {
    match json {
        serde_json::Value::Null => Ok(Value::null(Type::Dynamic)),
        serde_json::Value::Bool(b) => Value::new(Type::Bool, Payload::Bool(*b)),
        serde_json::Value::Number(n) => Value::new(Type::Number, Payload::Number(n.clone())),
        serde_json::Value::String(s) => Value::new(Type::String, Payload::String(s.clone())),
        serde_json::Value::Array(items) => {
            let items: Vec<Value> = items.iter().map(infer_json).collect::<Result<_>>()?;
            let ty = Type::Tuple(items.iter().map(|item| item.ty().clone()).collect());
            Value::new(ty, Payload::Tuple(items))
        }
        serde_json::Value::Object(fields) => {
            let fields: BTreeMap<String, Value> = fields
                .iter()
                .map(|(name, item)| Ok((name.clone(), infer_json(item)?)))
                .collect::<Result<_>>()?;
            let ty = Type::Object(
                fields
                    .iter()
                    .map(|(name, item)| (name.clone(), item.ty().clone()))
                    .collect(),
            );
            Value::new(ty, Payload::Object(fields))
        }
    }
}

pub fn to_msgpack(value: &Value) -> Result<Vec<u8>> {
    let encoded = encode_mp(value)?;
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, &encoded).context("writing msgpack value")?;
    Ok(buf)
}

pub fn from_msgpack(ty: &Type, bytes: &[u8]) -> Result<Value> {
    let mut reader = bytes;
    let raw = rmpv::decode::read_value(&mut reader).context("reading msgpack value")?;
    decode_mp(ty, &raw)
}

fn encode_mp(value: &Value) -> Result<rmpv::Value> {
    if !value.is_known() {
        return Ok(rmpv::Value::Ext(UNKNOWN_EXT, vec![0]));
    }
    if value.is_null() {
        return Ok(rmpv::Value::Nil);
    }
    let payload = value.payload().expect("known non-null value has a payload");
    Ok(match payload {
        Payload::Bool(b) => rmpv::Value::Boolean(*b),
        Payload::Number(n) => {
            if let Some(i) = n.as_i64() {
                rmpv::Value::from(i)
            } else if let Some(u) = n.as_u64() {
                rmpv::Value::from(u)
            } else if let Some(f) = n.as_f64() {
                rmpv::Value::F64(f)
            } else {
                bail!("number {} is not representable", n)
            }
        }
        Payload::String(s) => rmpv::Value::from(s.as_str()),
        Payload::List(items) | Payload::Set(items) | Payload::Tuple(items) => {
            rmpv::Value::Array(items.iter().map(encode_mp).collect::<Result<_>>()?)
        }
        Payload::Map(entries) | Payload::Object(entries) => rmpv::Value::Map(
            entries
                .iter()
                .map(|(key, item)| Ok((rmpv::Value::from(key.as_str()), encode_mp(item)?)))
                .collect::<Result<_>>()?,
        ),
    })
}

fn decode_mp(ty: &Type, raw: &rmpv::Value) -> Result<Value> {
    if let rmpv::Value::Ext(kind, _) = raw {
        if *kind == UNKNOWN_EXT {
            return Ok(Value::unknown(ty.clone()));
        }
        bail!("unsupported msgpack extension type {}", kind);
    }
    if raw.is_nil() {
        return Ok(Value::null(ty.clone()));
    }
    let payload = match ty {
        Type::Bool => match raw {
            rmpv::Value::Boolean(b) => Payload::Bool(*b),
            _ => bail!("expected a bool, got {}", raw),
        },
        Type::Number => Payload::Number(mp_number(raw)?),
        Type::String => Payload::String(mp_string(raw)?),
        Type::Dynamic => return infer_mp(raw),
        Type::List(elem) => Payload::List(mp_elements(elem, raw)?),
        Type::Set(elem) => Payload::Set(mp_elements(elem, raw)?),
        Type::Map(elem) => {
            let entries = match raw {
                rmpv::Value::Map(entries) => entries,
                _ => bail!("expected a msgpack map, got {}", raw),
            };
            Payload::Map(
                entries
                    .iter()
                    .map(|(key, item)| {
                        let key = mp_string(key)?;
                        let item =
                            decode_mp(elem, item).with_context(|| format!("map key {:?}", key))?;
                        Ok((key, item))
                    })
                    .collect::<Result<_>>()?,
            )
        }
        Type::Tuple(elems) => {
            let items = match raw {
                rmpv::Value::Array(items) => items,
                _ => bail!("expected a msgpack array, got {}", raw),
            };
            if items.len() != elems.len() {
                bail!(
                    "tuple has {} elements where {} were declared",
                    items.len(),
                    elems.len()
                );
            }
            Payload::Tuple(
                elems
                    .iter()
                    .zip(items)
                    .map(|(elem, item)| decode_mp(elem, item))
                    .collect::<Result<_>>()?,
            )
        }
        Type::Object(field_types) => {
            let entries = match raw {
                rmpv::Value::Map(entries) => entries,
                _ => bail!("expected a msgpack map, got {}", raw),
            };
            let mut fields: BTreeMap<String, rmpv::Value> = BTreeMap::new();
            for (key, item) in entries {
                fields.insert(mp_string(key)?, item.clone());
            }
            for name in fields.keys() {
                if !field_types.contains_key(name) {
                    bail!("undeclared object field {:?}", name);
                }
            }
            Payload::Object(
                field_types
                    .iter()
                    .map(|(name, field_ty)| {
                        let item = match fields.get(name) {
                            Some(item) => decode_mp(field_ty, item)
                                .with_context(|| format!("field {:?}", name))?,
                            None => Value::null(field_ty.clone()),
                        };
                        Ok((name.clone(), item))
                    })
                    .collect::<Result<_>>()?,
            )
        }
    };
    Value::new(ty.clone(), payload)
}

fn mp_elements(elem: &Type, raw: &rmpv::Value) -> Result<Vec<Value>> {
    let items = match raw {
        rmpv::Value::Array(items) => items,
        _ => bail!("expected a msgpack array, got {}", raw),
    };
    items
        .iter()
        .enumerate()
        .map(|(index, item)| decode_mp(elem, item).with_context(|| format!("element {}", index)))
        .collect()
}

fn mp_number(raw: &rmpv::Value) -> Result<serde_json::Number> {
    match raw {
        rmpv::Value::Integer(i) => {
            if let Some(i) = i.as_i64() {
                Ok(serde_json::Number::from(i))
            } else if let Some(u) = i.as_u64() {
                Ok(serde_json::Number::from(u))
            } else {
                bail!("integer out of range")
            }
        }
        rmpv::Value::F32(f) => serde_json::Number::from_f64(f64::from(*f))
            .ok_or_else(|| anyhow::anyhow!("non-finite number")),
        rmpv::Value::F64(f) => {
            serde_json::Number::from_f64(*f).ok_or_else(|| anyhow::anyhow!("non-finite number"))
        }
        _ => bail!("expected a number, got {}", raw),
    }
}

fn mp_string(raw: &rmpv::Value) -> Result<String> {
    match raw {
        rmpv::Value::String(s) => s
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| anyhow::anyhow!("string is not valid UTF-8")),
        _ => bail!("expected a string, got {}", raw),
    }
}

fn infer_mp(raw: &rmpv::Value) -> Result<Value> {
    match raw {
        rmpv::Value::Nil => Ok(Value::null(Type::Dynamic)),
        rmpv::Value::Boolean(b) => Value::new(Type::Bool, Payload::Bool(*b)),
        rmpv::Value::Integer(_) | rmpv::Value::F32(_) | rmpv::Value::F64(_) => {
            Value::new(Type::Number, Payload::Number(mp_number(raw)?))
        }
        rmpv::Value::String(_) => Value::new(Type::String, Payload::String(mp_string(raw)?)),
        rmpv::Value::Array(items) => {
            let items: Vec<Value> = items.iter().map(infer_mp).collect::<Result<_>>()?;
            let ty = Type::Tuple(items.iter().map(|item| item.ty().clone()).collect());
            Value::new(ty, Payload::Tuple(items))
        }
        rmpv::Value::Map(entries) => {
            let fields: BTreeMap<String, Value> = entries
                .iter()
                .map(|(key, item)| Ok((mp_string(key)?, infer_mp(item)?)))
                .collect::<Result<_>>()?;
            let ty = Type::Object(
                fields
                    .iter()
                    .map(|(name, item)| (name.clone(), item.ty().clone()))
                    .collect(),
            );
            Value::new(ty, Payload::Object(fields))
        }
        _ => bail!("unsupported msgpack value {}", raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn disk_type() -> Type {
        Type::object([
            ("name".to_owned(), Type::String),
            ("size".to_owned(), Type::Number),
            ("tags".to_owned(), Type::Map(Box::new(Type::String))),
        ])
    }

    #[test]
    fn test_json_round_trip() {
        let doc = json!({
            "name": "boot",
            "size": 20,
            "tags": {"env": "prod"},
        });
        let value = from_json(&disk_type(), &doc).unwrap();
        assert!(value.is_wholly_known());
        assert_eq!(to_json(&value).unwrap(), doc);
    }

    #[test]
    fn test_json_absent_fields_are_null() {
        let value = from_json(&disk_type(), &json!({"name": "boot"})).unwrap();
        let fields = value.as_object().unwrap();
        assert!(fields["size"].is_null());
        assert!(fields["tags"].is_null());
        assert_eq!(
            to_json(&value).unwrap(),
            json!({"name": "boot", "size": null, "tags": null})
        );
    }

    #[test]
    fn test_json_rejects_mismatch_and_undeclared() {
        assert!(from_json(&disk_type(), &json!({"name": 7})).is_err());
        assert!(from_json(&disk_type(), &json!({"bogus": true})).is_err());
        assert!(from_json(&Type::Bool, &json!("yes")).is_err());
    }

    #[test]
    fn test_json_dynamic_inference() {
        let value = from_json(&Type::Dynamic, &json!({"a": [1, "two"]})).unwrap();
        assert!(value.ty().is_object());
        assert_eq!(to_json(&value).unwrap(), json!({"a": [1, "two"]}));
    }

    #[test]
    fn test_json_cannot_express_unknown() {
        assert!(to_json(&Value::unknown(Type::String)).is_err());
    }

    #[test]
    fn test_msgpack_round_trip_known() {
        let doc = json!({
            "name": "boot",
            "size": 20,
            "tags": {"env": "prod"},
        });
        let value = from_json(&disk_type(), &doc).unwrap();
        let bytes = to_msgpack(&value).unwrap();
        let back = from_msgpack(&disk_type(), &bytes).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_msgpack_round_trip_unknown_and_null() {
        let ty = Type::object([
            ("a".to_owned(), Type::String),
            ("b".to_owned(), Type::String),
        ]);
        let value = Value::new(
            ty.clone(),
            Payload::Object(
                [
                    ("a".to_owned(), Value::unknown(Type::String)),
                    ("b".to_owned(), Value::null(Type::String)),
                ]
                .into(),
            ),
        )
        .unwrap();
        let bytes = to_msgpack(&value).unwrap();
        let back = from_msgpack(&ty, &bytes).unwrap();
        assert_eq!(back, value);
        assert!(!back.is_wholly_known());

        let whole = to_msgpack(&Value::unknown(ty.clone())).unwrap();
        assert!(!from_msgpack(&ty, &whole).unwrap().is_known());
    }

    #[test]
    fn test_msgpack_dynamic_inference() {
        let value = from_json(&Type::Dynamic, &json!({"n": 3})).unwrap();
        let bytes = to_msgpack(&value).unwrap();
        let back = from_msgpack(&Type::Dynamic, &bytes).unwrap();
        assert_eq!(back, value);
    }
}
