use std::collections::BTreeMap;
use std::fmt;

use resplan_schema::{
    Attribute, AttributeKind, AttributeNesting, Block, BlockNesting, BlockObject, ObjectSchema,
    Schema,
};
use resplan_value::{AttributePath, Payload, PathStep, Type, Value};

use crate::correlate::could_have_produced;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::retain::contains_user_set_values;

type MergeResult = Result<Value, Diagnostic>;

/// Compute the proposed new state for one resource.
///
/// `prior_state` is the value last recorded for the resource (null for a
/// resource that does not exist yet), `config` the practitioner's current
/// configuration; both must be typed per `schema`. The result is the merged
/// value a provider should base its plan on, or `None` alongside an
/// error-severity diagnostic, in which case the proposal must be discarded.
pub fn propose_new_state(
    schema: &Schema,
    prior_state: &Value,
    config: &Value,
) -> (Option<Value>, Diagnostics) {
    let mut diagnostics = Diagnostics::new();

    // A never-created resource has a null prior; substitute an all-null
    // object so the merge can assume a typed prior throughout.
    let empty;
    let prior = if prior_state.is_null() {
        empty = schema.empty_value();
        &empty
    } else {
        prior_state
    };

    match merge_object(schema, &AttributePath::root(), prior, config) {
        Ok(proposed) => (Some(proposed), diagnostics),
        Err(diagnostic) => {
            diagnostics.push(diagnostic);
            (None, diagnostics)
        }
    }
}

fn framework_error(summary: &str, path: &AttributePath, detail: impl fmt::Display) -> Diagnostic {
    Diagnostic::error(
        summary,
        format!(
            "An unexpected error occurred while constructing the proposed new state. \
             This is a defect in the provider framework, not in the configuration; \
             please report it to the provider developers.\n\nOriginal error: {}",
            detail
        ),
    )
    .with_attribute(path.clone())
}

/// Merge the top-level object of a resource: all schema attributes, then all
/// blocks, reassembled into a freshly validated object value.
fn merge_object(
    schema: &Schema,
    path: &AttributePath,
    prior: &Value,
    config: &Value,
) -> MergeResult {
    // An explicitly nulled config is never resurrected from prior state.
    if config.is_null() {
        return Ok(config.clone());
    }
    // An unresolved config defers entirely to what is already known.
    if !config.is_known() {
        return Ok(prior.clone());
    }

    if !prior.ty().is_object() || !config.ty().is_object() {
        return Err(framework_error(
            "Invalid Value Type",
            path,
            "the proposed new state can only be assembled for object-typed values",
        ));
    }

    let mut fields = merge_attributes(schema, &schema.attributes, path, prior, config)?;
    for (name, block) in &schema.blocks {
        let block_path = path.with_name(name);
        let prior_val = object_field(prior, name, &block_path)?;
        let config_val = object_field(config, name, &block_path)?;
        fields.insert(
            name.clone(),
            merge_block(schema, block, &block_path, &prior_val, &config_val)?,
        );
    }

    Value::new(schema.object_type(), Payload::Object(fields))
        .map_err(|err| framework_error("Invalid Value Type", path, err))
}

/// Pull one named field out of an object value, manufacturing a null (or
/// unknown) stand-in when the object itself is null (or unknown).
fn object_field(object: &Value, name: &str, path: &AttributePath) -> Result<Value, Diagnostic> {
    let field_type = match object.ty().field_type(name) {
        Some(ty) => ty.clone(),
        None => {
            return Err(framework_error(
                "Invalid Attribute Path",
                path,
                format!("the value has no attribute named {:?}", name),
            ))
        }
    };
    if object.is_null() {
        return Ok(Value::null(field_type));
    }
    if !object.is_known() {
        return Ok(Value::unknown(field_type));
    }
    object
        .apply_step(&PathStep::AttributeName(name.to_owned()))
        .cloned()
        .map_err(|err| framework_error("Invalid Attribute Path", path, err))
}

/// The per-attribute decision, applied to every attribute of every object.
fn merge_attributes(
    schema: &Schema,
    attributes: &BTreeMap<String, Attribute>,
    path: &AttributePath,
    prior: &Value,
    config: &Value,
) -> Result<BTreeMap<String, Value>, Diagnostic> {
    let mut merged = BTreeMap::new();
    for (name, attr) in attributes {
        let attr_path = path.with_name(name);
        let prior_val = object_field(prior, name, &attr_path)?;
        let config_val = object_field(config, name, &attr_path)?;

        let new_val = if attr.computed && config_val.is_null() {
            // Unset computed attribute: carry the prior value forward, unless
            // the prior subtree holds data only the practitioner could have
            // put there, in which case the removal from config must stick.
            if contains_user_set_values(schema, attr, &attr_path, &prior_val) {
                config_val
            } else {
                prior_val
            }
        } else if let AttributeKind::Nested { nesting, object } = &attr.kind {
            merge_nested_attribute(schema, *nesting, object, &attr_path, &prior_val, &config_val)?
        } else {
            config_val
        };
        merged.insert(name.clone(), new_val);
    }
    Ok(merged)
}

fn merge_nested_attribute(
    schema: &Schema,
    nesting: AttributeNesting,
    object: &ObjectSchema,
    path: &AttributePath,
    prior: &Value,
    config: &Value,
) -> MergeResult {
    // An unknown nested value cannot be partially merged.
    if !config.is_known() {
        return Ok(config.clone());
    }
    match nesting {
        AttributeNesting::Single => {
            if config.is_null() {
                Ok(config.clone())
            } else {
                merge_attribute_object(schema, object, path, prior, config)
            }
        }
        AttributeNesting::List => merge_list(
            path,
            prior,
            config,
            "Invalid List Nested Attribute Value Type",
            |elem_path, prior_elem, config_elem| {
                merge_attribute_object(schema, object, elem_path, prior_elem, config_elem)
            },
        ),
        AttributeNesting::Map => merge_map(
            path,
            prior,
            config,
            "Invalid Map Nested Attribute Value Type",
            |elem_path, prior_elem, config_elem| {
                merge_attribute_object(schema, object, elem_path, prior_elem, config_elem)
            },
        ),
        AttributeNesting::Set => merge_set(
            schema,
            path,
            prior,
            config,
            &object.object_type(),
            "Invalid Set Nested Attribute Value Type",
            |elem_path, prior_elem, config_elem| {
                merge_attribute_object(schema, object, elem_path, prior_elem, config_elem)
            },
        ),
    }
}

/// Merge one object of a nested attribute (the single value, or one
/// list/map/set element).
fn merge_attribute_object(
    schema: &Schema,
    object: &ObjectSchema,
    path: &AttributePath,
    prior: &Value,
    config: &Value,
) -> MergeResult {
    if config.is_null() {
        return Ok(config.clone());
    }
    let fields = merge_attributes(schema, &object.attributes, path, prior, config)?;
    Value::new(object.object_type(), Payload::Object(fields))
        .map_err(|err| framework_error("Invalid Nested Attribute Value Type", path, err))
}

fn merge_block(
    schema: &Schema,
    block: &Block,
    path: &AttributePath,
    prior: &Value,
    config: &Value,
) -> MergeResult {
    if !config.is_known() {
        return Ok(config.clone());
    }
    match block.nesting {
        BlockNesting::Single => {
            if config.is_null() {
                Ok(config.clone())
            } else {
                merge_block_object(schema, &block.object, path, prior, config)
            }
        }
        BlockNesting::List => merge_list(
            path,
            prior,
            config,
            "Invalid List Nested Block Value Type",
            |elem_path, prior_elem, config_elem| {
                merge_block_object(schema, &block.object, elem_path, prior_elem, config_elem)
            },
        ),
        BlockNesting::Set => merge_set(
            schema,
            path,
            prior,
            config,
            &block.object.object_type(),
            "Invalid Set Nested Block Value Type",
            |elem_path, prior_elem, config_elem| {
                merge_block_object(schema, &block.object, elem_path, prior_elem, config_elem)
            },
        ),
    }
}

/// Merge one block body: its attributes, then its own nested blocks.
fn merge_block_object(
    schema: &Schema,
    object: &BlockObject,
    path: &AttributePath,
    prior: &Value,
    config: &Value,
) -> MergeResult {
    if config.is_null() {
        return Ok(config.clone());
    }
    let mut fields = merge_attributes(schema, &object.attributes, path, prior, config)?;
    for (name, nested) in &object.blocks {
        let block_path = path.with_name(name);
        let prior_val = object_field(prior, name, &block_path)?;
        let config_val = object_field(config, name, &block_path)?;
        fields.insert(
            name.clone(),
            merge_block(schema, nested, &block_path, &prior_val, &config_val)?,
        );
    }
    Value::new(object.object_type(), Payload::Object(fields))
        .map_err(|err| framework_error("Invalid Nested Block Value Type", path, err))
}

/// Lists align by index: each config element merges with the prior element at
/// the same index, and indexes past the end of the prior (or a null/unknown
/// prior) take the config element verbatim. Output length equals config
/// length.
fn merge_list<F>(
    path: &AttributePath,
    prior: &Value,
    config: &Value,
    summary: &str,
    merge_elem: F,
) -> MergeResult
where
    F: Fn(&AttributePath, &Value, &Value) -> MergeResult,
{
    let config_elems: &[Value] = if config.is_null() {
        &[]
    } else {
        config
            .as_list()
            .ok_or_else(|| framework_error("Invalid Value Type", path, "expected a list value"))?
    };
    if config_elems.is_empty() {
        return Ok(config.clone());
    }

    let prior_elems: &[Value] = if prior.is_known() && !prior.is_null() {
        prior
            .as_list()
            .ok_or_else(|| framework_error("Invalid Value Type", path, "expected a list value"))?
    } else {
        &[]
    };

    let mut merged = Vec::with_capacity(config_elems.len());
    for (index, config_elem) in config_elems.iter().enumerate() {
        if index >= prior_elems.len() {
            // No corresponding prior element; take the config element as is.
            merged.push(config_elem.clone());
            continue;
        }
        merged.push(merge_elem(
            &path.with_index(index),
            &prior_elems[index],
            config_elem,
        )?);
    }

    Value::new(config.ty().clone(), Payload::List(merged))
        .map_err(|err| framework_error(summary, path, err))
}

/// Maps align by key: config keys merge with the same prior key, absent prior
/// keys get a null (or unknown, when the whole prior is unknown) stand-in,
/// and keys present only in the prior are dropped. Output key set equals
/// config key set.
fn merge_map<F>(
    path: &AttributePath,
    prior: &Value,
    config: &Value,
    summary: &str,
    merge_elem: F,
) -> MergeResult
where
    F: Fn(&AttributePath, &Value, &Value) -> MergeResult,
{
    let empty = BTreeMap::new();
    let config_entries: &BTreeMap<String, Value> = if config.is_null() {
        &empty
    } else {
        config
            .as_map()
            .ok_or_else(|| framework_error("Invalid Value Type", path, "expected a map value"))?
    };
    if config_entries.is_empty() {
        return Ok(config.clone());
    }

    let prior_entries: &BTreeMap<String, Value> = if prior.is_known() && !prior.is_null() {
        prior
            .as_map()
            .ok_or_else(|| framework_error("Invalid Value Type", path, "expected a map value"))?
    } else {
        &empty
    };

    let mut merged = BTreeMap::new();
    for (key, config_elem) in config_entries {
        let placeholder;
        let prior_elem = match prior_entries.get(key) {
            Some(prior_elem) => prior_elem,
            None => {
                // An unknown prior cannot say which keys it holds, so its
                // stand-ins are unknown rather than null.
                placeholder = if prior.is_known() {
                    Value::null(config_elem.ty().clone())
                } else {
                    Value::unknown(config_elem.ty().clone())
                };
                &placeholder
            }
        };
        merged.insert(
            key.clone(),
            merge_elem(&path.with_key(key), prior_elem, config_elem)?,
        );
    }

    Value::new(config.ty().clone(), Payload::Map(merged))
        .map_err(|err| framework_error(summary, path, err))
}

/// Sets have no element identity, so each config element is paired with the
/// first not-yet-consumed prior element that could have produced it. Multiple
/// prior elements can be valid matches for one config element; taking the
/// first found is deterministic given the fixed element order, and since
/// configured set elements must be unique, candidates can only tie when they
/// differ in computed values alone. Unmatched config elements merge against a
/// null stand-in. Output order follows config order.
fn merge_set<F>(
    schema: &Schema,
    path: &AttributePath,
    prior: &Value,
    config: &Value,
    element_type: &Type,
    summary: &str,
    merge_elem: F,
) -> MergeResult
where
    F: Fn(&AttributePath, &Value, &Value) -> MergeResult,
{
    let config_elems: &[Value] = if config.is_null() {
        &[]
    } else {
        config
            .as_set()
            .ok_or_else(|| framework_error("Invalid Value Type", path, "expected a set value"))?
    };
    if config_elems.is_empty() {
        return Ok(config.clone());
    }

    let prior_elems: &[Value] = if prior.is_known() && !prior.is_null() {
        prior
            .as_set()
            .ok_or_else(|| framework_error("Invalid Value Type", path, "expected a set value"))?
    } else {
        &[]
    };

    let mut used = vec![false; prior_elems.len()];
    let mut merged = Vec::with_capacity(config_elems.len());
    for config_elem in config_elems {
        let mut matched: Option<&Value> = None;
        for (i, prior_cmp) in prior_elems.iter().enumerate() {
            if used[i] {
                continue;
            }
            if could_have_produced(schema, path, prior_cmp, config_elem) {
                matched = Some(prior_cmp);
                used[i] = true;
                break;
            }
        }
        let placeholder;
        let prior_elem = match matched {
            Some(prior_elem) => prior_elem,
            None => {
                placeholder = Value::null(element_type.clone());
                &placeholder
            }
        };
        merged.push(merge_elem(
            &path.with_element(prior_elem.clone()),
            prior_elem,
            config_elem,
        )?);
    }

    Value::new(config.ty().clone(), Payload::Set(merged))
        .map_err(|err| framework_error(summary, path, err))
}
