//! Fuzzy correlation of set elements between prior state and configuration.
//!
//! Set elements have no key and no position, so the only way to pair a prior
//! element with the config element it evolved into is to ask: could the
//! provider have produced this prior element from that configuration? The
//! answer is yes exactly when every difference between the two is explained
//! by a computed attribute the config left null.

use tracing::trace;

use resplan_schema::{AttributeKind, Schema};
use resplan_value::{AttributePath, Type, Value, Walk};

/// Equality for correlation purposes: structural equality is only trusted
/// when no unknown marker is involved. An unknown compares equal to nothing,
/// not even to itself, so elements that differ only in unknowns stay apart.
fn equal_and_wholly_known(a: &Value, b: &Value) -> bool {
    a == b && a.is_wholly_known()
}

/// Whether `prior` could be the provider-completed form of `config`.
///
/// `path` is the absolute path of the set attribute itself. The prior element
/// is walked top-down; each node must either equal its config counterpart, be
/// explained by a deeper difference, or sit at a computed attribute whose
/// config is null. Sets nested inside the element cannot be correlated
/// element-wise, so they must be equal outright.
pub(crate) fn could_have_produced(
    schema: &Schema,
    path: &AttributePath,
    prior: &Value,
    config: &Value,
) -> bool {
    if equal_and_wholly_known(prior, config) {
        return true;
    }

    let element_path = path.with_element(prior.clone());
    let mut valid = true;
    prior.walk(&mut |relative, prior_node| {
        if relative.is_root() || prior_node.is_null() {
            return Walk::Continue;
        }

        let config_node = match config.apply_path(relative) {
            Ok(node) => node,
            // No counterpart at this position; typically dynamically typed
            // values whose shapes diverged.
            Err(_) => {
                valid = false;
                return Walk::Stop;
            }
        };

        if equal_and_wholly_known(config_node, prior_node) {
            // Proven compatible; nothing below can disagree.
            return Walk::Skip;
        }

        if matches!(config_node.ty(), Type::Set(_)) {
            // A nested set cannot be indexed into, so short of outright
            // equality (handled above) it cannot be correlated.
            valid = false;
            return Walk::Stop;
        }

        let attr = match schema.attribute_at_path(&element_path.join(relative)) {
            // Not at an attribute yet; keep descending toward the leaves.
            None => return Walk::Continue,
            Some(attr) => attr,
        };

        let object_shaped = match &attr.kind {
            AttributeKind::Nested { .. } => true,
            AttributeKind::Leaf(ty) => ty.is_object(),
        };
        if object_shaped {
            // The difference must be explained by the object's own fields.
            return Walk::Continue;
        }

        if !attr.computed {
            // A non-computed leaf cannot legitimately differ from the config
            // it was derived from.
            valid = false;
            return Walk::Stop;
        }

        if !config_node.is_null() {
            // A computed leaf may only differ where the config left the
            // value unspecified.
            valid = false;
            return Walk::Stop;
        }

        // Computed leaf, null config: compatible however the prior got here.
        // The schema ends at this leaf, so there is nothing left to check.
        Walk::Skip
    });

    if valid {
        trace!(attribute = %path, "correlated config element with a prior element");
    }
    valid
}

#[cfg(test)]
mod tests {
    use super::*;
    use resplan_schema::{Attribute, AttributeNesting, Block, BlockNesting, ObjectSchema, Schema};
    use resplan_value::Payload;

    fn attr(required: bool, optional: bool, computed: bool, kind: AttributeKind) -> Attribute {
        Attribute {
            required,
            optional,
            computed,
            sensitive: false,
            kind,
        }
    }

    /// `endpoint` is a set-nested attribute of
    /// `{ host: string (required), port: number (optional+computed) }`.
    fn endpoint_schema() -> Schema {
        Schema {
            attributes: [(
                "endpoint".to_owned(),
                attr(
                    false,
                    true,
                    false,
                    AttributeKind::Nested {
                        nesting: AttributeNesting::Set,
                        object: ObjectSchema {
                            attributes: [
                                (
                                    "host".to_owned(),
                                    attr(true, false, false, AttributeKind::Leaf(Type::String)),
                                ),
                                (
                                    "port".to_owned(),
                                    attr(false, true, true, AttributeKind::Leaf(Type::Number)),
                                ),
                            ]
                            .into(),
                        },
                    },
                ),
            )]
            .into(),
            blocks: Default::default(),
        }
    }

    fn endpoint(host: &str, port: Value) -> Value {
        let ty = Type::object([
            ("host".to_owned(), Type::String),
            ("port".to_owned(), Type::Number),
        ]);
        Value::new(
            ty,
            Payload::Object(
                [
                    (
                        "host".to_owned(),
                        Value::new(Type::String, Payload::String(host.into())).unwrap(),
                    ),
                    ("port".to_owned(), port),
                ]
                .into(),
            ),
        )
        .unwrap()
    }

    fn number(n: i64) -> Value {
        Value::new(Type::Number, Payload::Number(n.into())).unwrap()
    }

    fn endpoint_path() -> AttributePath {
        AttributePath::root().with_name("endpoint")
    }

    #[test]
    fn test_equal_elements_match() {
        let schema = endpoint_schema();
        let a = endpoint("db", number(5432));
        assert!(could_have_produced(&schema, &endpoint_path(), &a, &a.clone()));
    }

    #[test]
    fn test_computed_difference_matches_only_when_config_is_null() {
        let schema = endpoint_schema();
        let prior = endpoint("db", number(5432));
        let config_null_port = endpoint("db", Value::null(Type::Number));
        let config_other_port = endpoint("db", number(5433));
        assert!(could_have_produced(
            &schema,
            &endpoint_path(),
            &prior,
            &config_null_port
        ));
        assert!(!could_have_produced(
            &schema,
            &endpoint_path(),
            &prior,
            &config_other_port
        ));
    }

    #[test]
    fn test_non_computed_difference_never_matches() {
        let schema = endpoint_schema();
        let prior = endpoint("db", number(5432));
        let config = endpoint("cache", Value::null(Type::Number));
        assert!(!could_have_produced(&schema, &endpoint_path(), &prior, &config));
    }

    #[test]
    fn test_unknowns_never_correlate() {
        let schema = endpoint_schema();
        // identical except both ports unknown: still no correlation
        let prior = endpoint("db", Value::unknown(Type::Number));
        let config = endpoint("db", Value::unknown(Type::Number));
        assert!(!could_have_produced(&schema, &endpoint_path(), &prior, &config));
    }

    #[test]
    fn test_nested_sets_must_be_wholly_equal() {
        // `rule` is a set-nested block whose object holds a leaf set of
        // strings `ports` plus a computed label.
        let schema = Schema {
            attributes: Default::default(),
            blocks: [(
                "rule".to_owned(),
                Block {
                    nesting: BlockNesting::Set,
                    object: resplan_schema::BlockObject {
                        attributes: [
                            (
                                "ports".to_owned(),
                                attr(
                                    false,
                                    true,
                                    false,
                                    AttributeKind::Leaf(Type::Set(Box::new(Type::String))),
                                ),
                            ),
                            (
                                "label".to_owned(),
                                attr(false, true, true, AttributeKind::Leaf(Type::String)),
                            ),
                        ]
                        .into(),
                        blocks: Default::default(),
                    },
                },
            )]
            .into(),
        };
        let path = AttributePath::root().with_name("rule");

        let elem = |ports: &[&str], label: Value| {
            let ports_ty = Type::Set(Box::new(Type::String));
            let ty = Type::object([
                ("label".to_owned(), Type::String),
                ("ports".to_owned(), ports_ty.clone()),
            ]);
            let ports = Value::new(
                ports_ty,
                Payload::Set(
                    ports
                        .iter()
                        .map(|p| Value::new(Type::String, Payload::String((*p).into())).unwrap())
                        .collect(),
                ),
            )
            .unwrap();
            Value::new(
                ty,
                Payload::Object(
                    [("label".to_owned(), label), ("ports".to_owned(), ports)].into(),
                ),
            )
            .unwrap()
        };

        let prior = elem(&["80", "443"], Value::new(Type::String, Payload::String("web".into())).unwrap());
        // same inner set, label unset in config: correlates
        let config = elem(&["443", "80"], Value::null(Type::String));
        assert!(could_have_produced(&schema, &path, &prior, &config));
        // different inner set: no partial correlation of nested sets
        let config = elem(&["80"], Value::null(Type::String));
        assert!(!could_have_produced(&schema, &path, &prior, &config));
    }

    #[test]
    fn test_structural_mismatch_means_no_match() {
        let schema = endpoint_schema();
        let prior = endpoint("db", number(1));
        // config element that is an entirely different shape (dynamic case)
        let config = Value::new(
            Type::object([("x".to_owned(), Type::String)]),
            Payload::Object(
                [(
                    "x".to_owned(),
                    Value::new(Type::String, Payload::String("y".into())).unwrap(),
                )]
                .into(),
            ),
        )
        .unwrap();
        assert!(!could_have_produced(&schema, &endpoint_path(), &prior, &config));
    }
}
