//! Collection aliases used throughout the analyzer.
//!
//! Insertion-ordered maps where order is semantic (elaborated map
//! literals, stat registration); hashing collections with a fast hasher;
//! B-tree maps where sorted iteration is semantic. The `OneTo*` aliases
//! emphasize relationship over implementation.

use std::collections::{BTreeMap, BTreeSet};

pub type IndexMap<K, V> = indexmap::IndexMap<K, V, ahash::RandomState>;
pub type IndexSet<T> = indexmap::IndexSet<T, ahash::RandomState>;
pub type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;
pub type HashSet<T> = std::collections::HashSet<T, ahash::RandomState>;

pub type OneToOne<K, V> = BTreeMap<K, V>;
pub type OneToN<K, V> = BTreeMap<K, Vec<V>>;
pub type OneToNSet<K, V> = BTreeMap<K, BTreeSet<V>>;
