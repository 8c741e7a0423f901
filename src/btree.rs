//! An in-process B+Tree used to index a document table's top-level fields.
//!
//! Nodes are opaque to callers: a [`NodeStore`] implementation (see
//! `tree_store.rs`) is responsible for allocating, reading and writing them
//! by id. The tree itself only knows node shape and split/search logic, so
//! it can be exercised with a plain in-memory `NodeStore` in tests without
//! touching the page store at all.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

pub const DEFAULT_ORDER: usize = 64;

/// A single query-layer condition against one field, per the comparison
/// rules in the document layer's ordering section.
#[derive(Debug, Clone)]
pub enum Condition {
    Equal(Value),
    NotEqual(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    Like(String),
}

impl Condition {
    pub fn matches(&self, v: &Value) -> bool {
        match self {
            Condition::Equal(x) => compare_values(v, x) == Ordering::Equal,
            Condition::NotEqual(x) => compare_values(v, x) != Ordering::Equal,
            Condition::Gt(x) => compare_values(v, x) == Ordering::Greater,
            Condition::Gte(x) => compare_values(v, x) != Ordering::Less,
            Condition::Lt(x) => compare_values(v, x) == Ordering::Less,
            Condition::Lte(x) => compare_values(v, x) != Ordering::Greater,
            Condition::Like(pattern) => like_match(pattern, v),
        }
    }
}

fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Total order over index keys: null/true/false normalize to 0/1/0, numbers
/// compare by subtraction sign, everything else falls back to lexicographic
/// comparison of the stringified form.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn numeric(v: &Value) -> Option<f64> {
        match v {
            Value::Null => Some(0.0),
            Value::Bool(true) => Some(1.0),
            Value::Bool(false) => Some(0.0),
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }
    match (numeric(a), numeric(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => stringify(a).cmp(&stringify(b)),
    }
}

/// `%` matches zero or more characters, `_` matches exactly one. No escaping.
pub fn like_match(pattern: &str, value: &Value) -> bool {
    let text = stringify(value);
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    like_chars(&p, &t)
}

fn like_chars(p: &[char], t: &[char]) -> bool {
    match (p.first(), t.first()) {
        (None, None) => true,
        (Some('%'), _) => like_chars(&p[1..], t) || (!t.is_empty() && like_chars(p, &t[1..])),
        (Some('_'), Some(_)) => like_chars(&p[1..], &t[1..]),
        (Some(pc), Some(tc)) if pc == tc => like_chars(&p[1..], &t[1..]),
        _ => false,
    }
}

/// A node serialized exactly as the document layer persists it: a JSON
/// object carrying its own id, leaf flag, keys, leaf value buckets, internal
/// child pointers, and a leaf sibling pointer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: u32,
    pub is_leaf: bool,
    pub keys: Vec<Value>,
    #[serde(default)]
    pub values: Vec<Vec<String>>,
    #[serde(default)]
    pub children: Vec<u32>,
    #[serde(default)]
    pub next: u32,
}

/// Persistence adapter the tree is built against. `tree_store.rs` provides
/// the concrete implementation backed by the page store; tests here use a
/// plain in-memory one.
pub trait NodeStore {
    fn alloc(&mut self, is_leaf: bool) -> Result<u32>;
    fn read(&mut self, node_id: u32) -> Result<Node>;
    fn write(&mut self, node_id: u32, node: &Node) -> Result<()>;
}

/// A B+Tree keyed by `serde_json::Value`, with each leaf key mapping to a
/// *bucket* of record ids rather than a single value, since many documents
/// can share a field's value.
pub struct BPlusTree {
    order: usize,
}

impl BPlusTree {
    pub fn new(order: usize) -> Self {
        Self {
            order: order.max(3),
        }
    }

    pub fn with_default_order() -> Self {
        Self::new(DEFAULT_ORDER)
    }

    /// Allocates a single empty leaf and returns its id as the tree's head.
    pub fn init(&self, store: &mut dyn NodeStore) -> Result<u32> {
        let id = store.alloc(true)?;
        let node = Node {
            id,
            is_leaf: true,
            keys: vec![],
            values: vec![],
            children: vec![],
            next: 0,
        };
        store.write(id, &node)?;
        Ok(id)
    }

    /// Inserts `record_id` under `key`, returning the (possibly new, if the
    /// root split) head node id.
    pub fn insert(
        &self,
        store: &mut dyn NodeStore,
        head: u32,
        key: Value,
        record_id: &str,
    ) -> Result<u32> {
        match self.insert_into(store, head, &key, record_id)? {
            None => Ok(head),
            Some((split_key, right_id)) => {
                let new_root_id = store.alloc(false)?;
                let new_root = Node {
                    id: new_root_id,
                    is_leaf: false,
                    keys: vec![split_key],
                    values: vec![],
                    children: vec![head, right_id],
                    next: 0,
                };
                store.write(new_root_id, &new_root)?;
                Ok(new_root_id)
            }
        }
    }

    fn insert_into(
        &self,
        store: &mut dyn NodeStore,
        node_id: u32,
        key: &Value,
        record_id: &str,
    ) -> Result<Option<(Value, u32)>> {
        let mut node = store.read(node_id)?;

        if node.is_leaf {
            match node
                .keys
                .iter()
                .position(|k| compare_values(k, key) == Ordering::Equal)
            {
                Some(i) => {
                    if !node.values[i].iter().any(|r| r == record_id) {
                        node.values[i].push(record_id.to_string());
                    }
                }
                None => {
                    let idx = node
                        .keys
                        .iter()
                        .position(|k| compare_values(k, key) == Ordering::Greater)
                        .unwrap_or(node.keys.len());
                    node.keys.insert(idx, key.clone());
                    node.values.insert(idx, vec![record_id.to_string()]);
                }
            }

            if node.keys.len() > self.order {
                let split_at = node.keys.len() / 2;
                let sibling_id = store.alloc(true)?;
                let sibling_keys = node.keys.split_off(split_at);
                let sibling_values = node.values.split_off(split_at);
                let split_key = sibling_keys[0].clone();
                let sibling = Node {
                    id: sibling_id,
                    is_leaf: true,
                    keys: sibling_keys,
                    values: sibling_values,
                    children: vec![],
                    next: node.next,
                };
                node.next = sibling_id;
                store.write(sibling_id, &sibling)?;
                store.write(node_id, &node)?;
                return Ok(Some((split_key, sibling_id)));
            }

            store.write(node_id, &node)?;
            return Ok(None);
        }

        let child_idx = node
            .keys
            .iter()
            .position(|k| compare_values(key, k) == Ordering::Less)
            .unwrap_or(node.keys.len());
        let child_id = node.children[child_idx];

        match self.insert_into(store, child_id, key, record_id)? {
            None => Ok(None),
            Some((split_key, right_id)) => {
                node.keys.insert(child_idx, split_key);
                node.children.insert(child_idx + 1, right_id);

                if node.keys.len() > self.order {
                    let split_at = node.keys.len() / 2;
                    let up_key = node.keys[split_at].clone();
                    let sibling_keys = node.keys.split_off(split_at + 1);
                    node.keys.truncate(split_at);
                    let sibling_children = node.children.split_off(split_at + 1);
                    let sibling_id = store.alloc(false)?;
                    let sibling = Node {
                        id: sibling_id,
                        is_leaf: false,
                        keys: sibling_keys,
                        values: vec![],
                        children: sibling_children,
                        next: 0,
                    };
                    store.write(sibling_id, &sibling)?;
                    store.write(node_id, &node)?;
                    return Ok(Some((up_key, sibling_id)));
                }

                store.write(node_id, &node)?;
                Ok(None)
            }
        }
    }

    /// Removes `record_id` from `key`'s bucket. Deliberately does not
    /// rebalance or merge underfull nodes after a leaf empties: a stale
    /// routing key in an ancestor still points at a reachable (possibly
    /// empty) leaf, which simply contributes no matches to `keys`.
    pub fn delete(&self, store: &mut dyn NodeStore, head: u32, key: &Value, record_id: &str) -> Result<()> {
        let leaf_id = self.find_leaf(store, head, key)?;
        let mut leaf = store.read(leaf_id)?;
        if let Some(i) = leaf
            .keys
            .iter()
            .position(|k| compare_values(k, key) == Ordering::Equal)
        {
            leaf.values[i].retain(|r| r != record_id);
            if leaf.values[i].is_empty() {
                leaf.keys.remove(i);
                leaf.values.remove(i);
            }
            store.write(leaf_id, &leaf)?;
        }
        Ok(())
    }

    fn find_leaf(&self, store: &mut dyn NodeStore, node_id: u32, key: &Value) -> Result<u32> {
        let node = store.read(node_id)?;
        if node.is_leaf {
            return Ok(node_id);
        }
        let child_idx = node
            .keys
            .iter()
            .position(|k| compare_values(key, k) == Ordering::Less)
            .unwrap_or(node.keys.len());
        self.find_leaf(store, node.children[child_idx], key)
    }

    fn leftmost_leaf(&self, store: &mut dyn NodeStore, node_id: u32) -> Result<u32> {
        let node = store.read(node_id)?;
        if node.is_leaf {
            return Ok(node_id);
        }
        self.leftmost_leaf(store, node.children[0])
    }

    /// Collects every record id whose indexed value satisfies `condition`,
    /// walking the leaf chain left to right, then intersects with `prior`
    /// if supplied (the running candidate set from preceding query fields).
    pub fn keys(
        &self,
        store: &mut dyn NodeStore,
        head: u32,
        condition: &Condition,
        prior: Option<&HashSet<String>>,
    ) -> Result<HashSet<String>> {
        let mut out = HashSet::new();
        let mut leaf_id = self.leftmost_leaf(store, head)?;
        while leaf_id != 0 {
            let leaf = store.read(leaf_id)?;
            for (k, bucket) in leaf.keys.iter().zip(leaf.values.iter()) {
                if condition.matches(k) {
                    out.extend(bucket.iter().cloned());
                }
            }
            leaf_id = leaf.next;
        }
        Ok(match prior {
            Some(p) => out.intersection(p).cloned().collect(),
            None => out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MemNodeStore {
        nodes: HashMap<u32, Node>,
        next_id: u32,
    }

    impl MemNodeStore {
        fn new() -> Self {
            Self {
                nodes: HashMap::new(),
                next_id: 0,
            }
        }
    }

    impl NodeStore for MemNodeStore {
        fn alloc(&mut self, is_leaf: bool) -> Result<u32> {
            self.next_id += 1;
            let id = self.next_id;
            self.nodes.insert(
                id,
                Node {
                    id,
                    is_leaf,
                    keys: vec![],
                    values: vec![],
                    children: vec![],
                    next: 0,
                },
            );
            Ok(id)
        }

        fn read(&mut self, node_id: u32) -> Result<Node> {
            Ok(self.nodes.get(&node_id).expect("node exists").clone())
        }

        fn write(&mut self, node_id: u32, node: &Node) -> Result<()> {
            self.nodes.insert(node_id, node.clone());
            Ok(())
        }
    }

    #[test]
    fn compare_values_normalizes_booleans_and_null() {
        assert_eq!(compare_values(&Value::Null, &Value::from(0)), Ordering::Equal);
        assert_eq!(compare_values(&Value::from(true), &Value::from(1)), Ordering::Equal);
        assert_eq!(compare_values(&Value::from(false), &Value::from(0)), Ordering::Equal);
    }

    #[test]
    fn like_pattern_matches_wildcards() {
        assert!(like_match("a%c", &Value::from("abc")));
        assert!(like_match("a_c", &Value::from("abc")));
        assert!(!like_match("a_c", &Value::from("abbc")));
        assert!(like_match("%lo", &Value::from("hello")));
    }

    #[test]
    fn insert_then_equal_query_finds_record() {
        let mut store = MemNodeStore::new();
        let tree = BPlusTree::new(4);
        let head = tree.init(&mut store).unwrap();
        let head = tree.insert(&mut store, head, Value::from("alice"), "id-1").unwrap();
        let found = tree
            .keys(&mut store, head, &Condition::Equal(Value::from("alice")), None)
            .unwrap();
        assert!(found.contains("id-1"));
    }

    #[test]
    fn many_inserts_force_splits_and_remain_queryable() {
        let mut store = MemNodeStore::new();
        let tree = BPlusTree::new(4);
        let mut head = tree.init(&mut store).unwrap();
        for i in 0..100 {
            head = tree
                .insert(&mut store, head, Value::from(i), &format!("id-{i}"))
                .unwrap();
        }
        for i in 0..100 {
            let found = tree
                .keys(&mut store, head, &Condition::Equal(Value::from(i)), None)
                .unwrap();
            assert!(found.contains(&format!("id-{i}")), "missing id-{i}");
        }
        let gte50 = tree
            .keys(&mut store, head, &Condition::Gte(Value::from(50)), None)
            .unwrap();
        assert_eq!(gte50.len(), 50);
    }

    #[test]
    fn delete_removes_record_from_bucket_without_breaking_others() {
        let mut store = MemNodeStore::new();
        let tree = BPlusTree::new(4);
        let mut head = tree.init(&mut store).unwrap();
        head = tree.insert(&mut store, head, Value::from("x"), "a").unwrap();
        head = tree.insert(&mut store, head, Value::from("x"), "b").unwrap();
        tree.delete(&mut store, head, &Value::from("x"), "a").unwrap();
        let found = tree
            .keys(&mut store, head, &Condition::Equal(Value::from("x")), None)
            .unwrap();
        assert!(!found.contains("a"));
        assert!(found.contains("b"));
    }

    #[test]
    fn prior_set_intersects_results() {
        let mut store = MemNodeStore::new();
        let tree = BPlusTree::new(4);
        let mut head = tree.init(&mut store).unwrap();
        head = tree.insert(&mut store, head, Value::from(1), "a").unwrap();
        head = tree.insert(&mut store, head, Value::from(1), "b").unwrap();
        let prior: HashSet<String> = ["a".to_string()].into_iter().collect();
        let found = tree
            .keys(&mut store, head, &Condition::Equal(Value::from(1)), Some(&prior))
            .unwrap();
        assert_eq!(found, prior);
    }
}
