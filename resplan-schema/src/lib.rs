//! The schema model for declaratively managed resources.
//!
//! A [`Schema`] describes one resource type: a mapping of attribute names to
//! [`Attribute`]s and, for providers that still use the legacy block syntax,
//! a mapping of block type names to [`Block`]s. Attributes are either leaves
//! with a plain value type or nested object collections; which of the two an
//! attribute is, is part of its declaration ([`AttributeKind`]), so code
//! consuming a schema matches on it exhaustively instead of probing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use resplan_value::{AttributePath, PathStep, Type, Value};

/// Schema for one resource type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub attributes: BTreeMap<String, Attribute>,
    #[serde(default)]
    pub blocks: BTreeMap<String, Block>,
}

/// Schema for a single attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// Whether the practitioner must set a value.
    #[serde(default)]
    pub required: bool,
    /// Whether the practitioner may set a value.
    #[serde(default)]
    pub optional: bool,
    /// Whether the provider determines the value. May be combined with
    /// `optional`, never meaningfully with `required`.
    #[serde(default)]
    pub computed: bool,
    /// Whether the value should be redacted in human-facing output.
    #[serde(default)]
    pub sensitive: bool,
    pub kind: AttributeKind,
}

/// What an attribute holds: a plain value, or a nested collection of objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeKind {
    Leaf(Type),
    Nested {
        nesting: AttributeNesting,
        object: ObjectSchema,
    },
}

/// Structural shape of a nested attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeNesting {
    Single,
    List,
    Map,
    Set,
}

/// The object schema inside a nested attribute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectSchema {
    #[serde(default)]
    pub attributes: BTreeMap<String, Attribute>,
}

/// Schema for a legacy nested block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub nesting: BlockNesting,
    pub object: BlockObject,
}

/// Structural shape of a nested block. Blocks have no map form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockNesting {
    Single,
    List,
    Set,
}

/// The object schema inside a block: attributes plus further nested blocks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockObject {
    #[serde(default)]
    pub attributes: BTreeMap<String, Attribute>,
    #[serde(default)]
    pub blocks: BTreeMap<String, Block>,
}

impl Attribute {
    /// The value type an attribute of this declaration holds.
    pub fn value_type(&self) -> Type {
        match &self.kind {
            AttributeKind::Leaf(ty) => ty.clone(),
            AttributeKind::Nested { nesting, object } => {
                let object_type = object.object_type();
                match nesting {
                    AttributeNesting::Single => object_type,
                    AttributeNesting::List => Type::List(Box::new(object_type)),
                    AttributeNesting::Map => Type::Map(Box::new(object_type)),
                    AttributeNesting::Set => Type::Set(Box::new(object_type)),
                }
            }
        }
    }
}

impl ObjectSchema {
    pub fn object_type(&self) -> Type {
        Type::object(
            self.attributes
                .iter()
                .map(|(name, attr)| (name.clone(), attr.value_type())),
        )
    }
}

impl Block {
    pub fn value_type(&self) -> Type {
        let object_type = self.object.object_type();
        match self.nesting {
            BlockNesting::Single => object_type,
            BlockNesting::List => Type::List(Box::new(object_type)),
            BlockNesting::Set => Type::Set(Box::new(object_type)),
        }
    }
}

impl BlockObject {
    pub fn object_type(&self) -> Type {
        Type::object(
            self.attributes
                .iter()
                .map(|(name, attr)| (name.clone(), attr.value_type()))
                .chain(
                    self.blocks
                        .iter()
                        .map(|(name, block)| (name.clone(), block.value_type())),
                ),
        )
    }
}

impl Schema {
    /// The object type of a whole resource: attributes and blocks side by side.
    pub fn object_type(&self) -> Type {
        Type::object(
            self.attributes
                .iter()
                .map(|(name, attr)| (name.clone(), attr.value_type()))
                .chain(
                    self.blocks
                        .iter()
                        .map(|(name, block)| (name.clone(), block.value_type())),
                ),
        )
    }

    /// A known object with every top-level field null: the prior state of a
    /// resource that has never been created.
    pub fn empty_value(&self) -> Value {
        Value::empty_of(&self.object_type())
    }

    /// Resolve an absolute path to the attribute it names, if any.
    ///
    /// Element-key steps descend into the nested object of the enclosing
    /// attribute or block; `Single` nesting is traversed by attribute name
    /// alone. Paths that land on a block, run into a leaf attribute's
    /// interior, or end on an element key resolve to `None`; callers treat
    /// that as "not an attribute position", not as an error.
    pub fn attribute_at_path(&self, path: &AttributePath) -> Option<&Attribute> {
        let mut cursor = Cursor::Object {
            attributes: &self.attributes,
            blocks: Some(&self.blocks),
        };
        let mut resolved: Option<&Attribute> = None;
        for step in path.steps() {
            resolved = None;
            cursor = match (cursor, step) {
                (
                    Cursor::Object { attributes, blocks },
                    PathStep::AttributeName(name),
                ) => {
                    if let Some(attr) = attributes.get(name) {
                        resolved = Some(attr);
                        match &attr.kind {
                            AttributeKind::Leaf(_) => Cursor::Leaf,
                            AttributeKind::Nested { nesting, object } => match nesting {
                                AttributeNesting::Single => Cursor::Object {
                                    attributes: &object.attributes,
                                    blocks: None,
                                },
                                _ => Cursor::NestedAttribute {
                                    nesting: *nesting,
                                    object,
                                },
                            },
                        }
                    } else if let Some(block) = blocks.and_then(|blocks| blocks.get(name)) {
                        match block.nesting {
                            BlockNesting::Single => Cursor::Object {
                                attributes: &block.object.attributes,
                                blocks: Some(&block.object.blocks),
                            },
                            _ => Cursor::NestedBlock { block },
                        }
                    } else {
                        return None;
                    }
                }
                (Cursor::NestedAttribute { nesting, object }, step) => {
                    let key_matches = matches!(
                        (nesting, step),
                        (AttributeNesting::List, PathStep::ElementKeyInt(_))
                            | (AttributeNesting::Map, PathStep::ElementKeyString(_))
                            | (AttributeNesting::Set, PathStep::ElementKeyValue(_))
                    );
                    if !key_matches {
                        return None;
                    }
                    Cursor::Object {
                        attributes: &object.attributes,
                        blocks: None,
                    }
                }
                (Cursor::NestedBlock { block }, step) => {
                    let key_matches = matches!(
                        (block.nesting, step),
                        (BlockNesting::List, PathStep::ElementKeyInt(_))
                            | (BlockNesting::Set, PathStep::ElementKeyValue(_))
                    );
                    if !key_matches {
                        return None;
                    }
                    Cursor::Object {
                        attributes: &block.object.attributes,
                        blocks: Some(&block.object.blocks),
                    }
                }
                _ => return None,
            };
        }
        resolved
    }
}

enum Cursor<'a> {
    /// Inside an object: the root schema, a nested object, or a block body.
    Object {
        attributes: &'a BTreeMap<String, Attribute>,
        blocks: Option<&'a BTreeMap<String, Block>>,
    },
    /// Just resolved a List/Map/Set nested attribute; an element key follows.
    NestedAttribute {
        nesting: AttributeNesting,
        object: &'a ObjectSchema,
    },
    /// Just resolved a List/Set block; an element key follows.
    NestedBlock { block: &'a Block },
    /// Just resolved a leaf attribute; nothing can follow.
    Leaf,
}
