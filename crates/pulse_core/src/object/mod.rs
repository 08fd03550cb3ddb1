//! Arrays of structures.
//!
//! An object is built in memory as an [`ObjectNode::Array`] of slots, each
//! slot holding one structure instance. Values and nested objects are
//! inserted by a relative path inside a slot:
//!
//! ```text
//! put_value("a/b", 2, 1.5)
//!
//! Array [ Empty, Empty, Composite { a: Composite { b: Scalar(1.5) } } ]
//! ```
//!
//! Objects are stored either as one record or, when time-dependent, one
//! serialized slot per slice (see [`ObjectEngine`]).

mod packing;

pub use packing::{read_object_slice, read_object_slices, ObjectEngine, Placement};

use crate::error::{CoreError, CoreResult};
use pulse_codec::Value;

/// A node of an in-memory object tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ObjectNode {
    /// A gap slot or absent value.
    #[default]
    Empty,
    /// Leaf data.
    Scalar(Value),
    /// Ordered slots of an array of structures.
    Array(Vec<ObjectNode>),
    /// Named children of one structure instance, in insertion order.
    Composite(Vec<(String, ObjectNode)>),
}

fn split_rel_path(rel_path: &str) -> Vec<&str> {
    rel_path
        .split(['/', '.'])
        .filter(|s| !s.is_empty())
        .collect()
}

impl ObjectNode {
    /// An empty array of structures with room for `capacity` slots.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::Array(Vec::with_capacity(capacity))
    }

    /// Slots of an array, `None` for other nodes.
    #[must_use]
    pub fn slots(&self) -> Option<&[ObjectNode]> {
        match self {
            Self::Array(slots) => Some(slots),
            _ => None,
        }
    }

    /// Number of slots.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if this is not an array.
    pub fn dim(&self) -> CoreResult<usize> {
        self.slots()
            .map(<[ObjectNode]>::len)
            .ok_or_else(|| CoreError::invalid_argument("object is not an array of structures"))
    }

    /// Named child of a composite.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&ObjectNode> {
        match self {
            Self::Composite(children) => children
                .iter()
                .find(|(child, _)| child == name)
                .map(|(_, node)| node),
            _ => None,
        }
    }

    /// Inserts `value` at `rel_path` inside slot `index`, growing the slot
    /// list in steps of `chunk` as needed.
    ///
    /// Lists and structs must be inserted as objects with
    /// [`ObjectNode::put_object`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if this is not an array, the value is a
    /// container, or the path crosses a leaf.
    pub fn put_value(
        &mut self,
        rel_path: &str,
        index: usize,
        value: Value,
        chunk: usize,
    ) -> CoreResult<()> {
        let leaf = match value {
            Value::List(_) | Value::Struct(_) => {
                return Err(CoreError::invalid_argument(format!(
                    "{rel_path}: containers must be inserted as objects"
                )))
            }
            Value::Empty => Self::Empty,
            other => Self::Scalar(other),
        };
        self.put_object(rel_path, index, leaf, chunk)
    }

    /// Inserts a subtree at `rel_path` inside slot `index`; the subtree is
    /// moved into this object.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if this is not an array or the path crosses
    /// a leaf.
    pub fn put_object(
        &mut self,
        rel_path: &str,
        index: usize,
        subtree: ObjectNode,
        chunk: usize,
    ) -> CoreResult<()> {
        let slot = self.slot_mut(index, chunk)?;
        insert(slot, &split_rel_path(rel_path), subtree)
    }

    /// The leaf value at `rel_path` inside slot `index`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the slot or a path segment does not exist and
    /// `InvalidArgument` if the path ends at a nested object.
    pub fn get_value(&self, rel_path: &str, index: usize) -> CoreResult<Value> {
        match self.get_object(rel_path, index)? {
            Self::Scalar(value) => Ok(value.clone()),
            Self::Empty => Ok(Value::Empty),
            _ => Err(CoreError::invalid_argument(format!(
                "{rel_path} in slot {index} is an object, not a value"
            ))),
        }
    }

    /// The node at `rel_path` inside slot `index`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the slot or a path segment does not exist.
    pub fn get_object(&self, rel_path: &str, index: usize) -> CoreResult<&ObjectNode> {
        let slots = self
            .slots()
            .ok_or_else(|| CoreError::invalid_argument("object is not an array of structures"))?;
        let mut node = slots
            .get(index)
            .ok_or_else(|| CoreError::not_found(format!("slot {index} of {} slots", slots.len())))?;
        for name in split_rel_path(rel_path) {
            node = node
                .child(name)
                .ok_or_else(|| CoreError::not_found(format!("{rel_path} in slot {index}")))?;
        }
        Ok(node)
    }

    /// Converts the tree into a codec value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Empty => Value::Empty,
            Self::Scalar(value) => value.clone(),
            Self::Array(slots) => Value::List(slots.iter().map(Self::to_value).collect()),
            Self::Composite(children) => Value::Struct(
                children
                    .iter()
                    .map(|(name, node)| (name.clone(), node.to_value()))
                    .collect(),
            ),
        }
    }

    /// Rebuilds a tree from a value produced by [`ObjectNode::to_value`].
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Empty => Self::Empty,
            Value::List(items) => Self::Array(items.into_iter().map(Self::from_value).collect()),
            Value::Struct(children) => Self::Composite(
                children
                    .into_iter()
                    .map(|(name, value)| (name, Self::from_value(value)))
                    .collect(),
            ),
            leaf => Self::Scalar(leaf),
        }
    }

    /// Consumes an array and returns its slots.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if this is not an array.
    pub fn into_slots(self) -> CoreResult<Vec<ObjectNode>> {
        match self {
            Self::Array(slots) => Ok(slots),
            _ => Err(CoreError::invalid_argument(
                "object is not an array of structures",
            )),
        }
    }

    fn slot_mut(&mut self, index: usize, chunk: usize) -> CoreResult<&mut ObjectNode> {
        let Self::Array(slots) = self else {
            return Err(CoreError::invalid_argument(
                "object is not an array of structures",
            ));
        };
        if index >= slots.len() {
            let too_large =
                || CoreError::invalid_argument(format!("slot index {index} is too large"));
            let len = index.checked_add(1).ok_or_else(too_large)?;
            if index >= slots.capacity() {
                let chunk = chunk.max(1);
                let target = (index / chunk)
                    .checked_add(1)
                    .and_then(|n| n.checked_mul(chunk))
                    .ok_or_else(too_large)?;
                slots
                    .try_reserve_exact(target - slots.len())
                    .map_err(|_| too_large())?;
            }
            slots.resize(len, Self::Empty);
        }
        Ok(&mut slots[index])
    }
}

fn insert(node: &mut ObjectNode, names: &[&str], leaf: ObjectNode) -> CoreResult<()> {
    let Some((name, rest)) = names.split_first() else {
        *node = leaf;
        return Ok(());
    };
    if matches!(node, ObjectNode::Empty) {
        *node = ObjectNode::Composite(Vec::new());
    }
    let ObjectNode::Composite(children) = node else {
        return Err(CoreError::invalid_argument(format!(
            "cannot create {name} below a non-structure node"
        )));
    };
    let position = match children.iter().position(|(child, _)| child == name) {
        Some(i) => i,
        None => {
            children.push(((*name).to_string(), ObjectNode::Empty));
            children.len() - 1
        }
    };
    insert(&mut children[position].1, rest, leaf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_creates_intermediate_composites() {
        let mut object = ObjectNode::with_capacity(4);
        object.put_value("a/b", 2, Value::Double(1.5), 4).unwrap();

        assert_eq!(object.dim().unwrap(), 3);
        assert_eq!(object.slots().unwrap()[0], ObjectNode::Empty);
        assert_eq!(object.get_value("a/b", 2).unwrap(), Value::Double(1.5));
        assert_eq!(object.get_value("a.b", 2).unwrap(), Value::Double(1.5));
    }

    #[test]
    fn put_replaces_existing_leaf() {
        let mut object = ObjectNode::with_capacity(1);
        object.put_value("x", 0, Value::Int(1), 1).unwrap();
        object.put_value("y", 0, Value::Int(2), 1).unwrap();
        object.put_value("x", 0, Value::Int(3), 1).unwrap();

        let ObjectNode::Composite(children) = &object.slots().unwrap()[0] else {
            panic!("slot is not a composite");
        };
        let names: Vec<&str> = children.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["x", "y"]);
        assert_eq!(object.get_value("x", 0).unwrap(), Value::Int(3));
    }

    #[test]
    fn slots_grow_in_chunks() {
        let mut object = ObjectNode::with_capacity(256);
        object.put_value("v", 300, Value::Int(1), 256).unwrap();
        let ObjectNode::Array(slots) = &object else {
            panic!("not an array");
        };
        assert_eq!(slots.len(), 301);
        assert!(slots.capacity() >= 512);
    }

    #[test]
    fn oversized_slot_index_rejected() {
        let mut object = ObjectNode::with_capacity(4);
        for index in [usize::MAX, usize::MAX - 1, usize::MAX / 2] {
            let err = object
                .put_value("n", index, Value::Int(1), 256)
                .unwrap_err();
            assert!(matches!(err, CoreError::InvalidArgument { .. }));
        }
        assert_eq!(object.dim().unwrap(), 0);
        object.put_value("n", 2, Value::Int(1), 256).unwrap();
        assert_eq!(object.dim().unwrap(), 3);
    }

    #[test]
    fn missing_children_are_not_found() {
        let mut object = ObjectNode::with_capacity(1);
        object.put_value("a", 0, Value::Int(1), 1).unwrap();
        assert!(object.get_value("b", 0).unwrap_err().is_not_found());
        assert!(object.get_value("a", 5).unwrap_err().is_not_found());
        assert!(object.get_value("a/deeper", 0).unwrap_err().is_not_found());
    }

    #[test]
    fn nested_objects_move_into_parent() {
        let mut inner = ObjectNode::with_capacity(2);
        inner.put_value("r", 0, Value::Double(0.1), 2).unwrap();
        inner.put_value("r", 1, Value::Double(0.2), 2).unwrap();

        let mut outer = ObjectNode::with_capacity(1);
        outer.put_object("profiles", 0, inner.clone(), 1).unwrap();

        let nested = outer.get_object("profiles", 0).unwrap();
        assert_eq!(nested, &inner);
        assert_eq!(nested.dim().unwrap(), 2);
        assert_eq!(nested.get_value("r", 1).unwrap(), Value::Double(0.2));
        assert!(outer.get_value("profiles", 0).is_err());
    }

    #[test]
    fn path_through_leaf_rejected() {
        let mut object = ObjectNode::with_capacity(1);
        object.put_value("a", 0, Value::Int(1), 1).unwrap();
        assert!(matches!(
            object.put_value("a/b", 0, Value::Int(2), 1),
            Err(CoreError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn containers_must_be_objects() {
        let mut object = ObjectNode::with_capacity(1);
        assert!(object
            .put_value("a", 0, Value::List(vec![]), 1)
            .is_err());
        assert!(ObjectNode::Scalar(Value::Int(1))
            .put_value("a", 0, Value::Int(1), 1)
            .is_err());
    }

    #[test]
    fn value_conversion_roundtrips_trees() {
        let mut inner = ObjectNode::with_capacity(1);
        inner.put_value("label", 0, Value::from("coil"), 1).unwrap();
        let mut object = ObjectNode::with_capacity(3);
        object.put_value("a/b", 0, Value::from(vec![1.0, 2.0]), 3).unwrap();
        object.put_object("nested", 2, inner, 3).unwrap();

        let value = object.to_value();
        assert!(matches!(&value, Value::List(items) if items.len() == 3));
        assert_eq!(ObjectNode::from_value(value), object);
    }
}
