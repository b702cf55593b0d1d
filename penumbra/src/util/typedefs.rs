use std::hash::BuildHasherDefault;

use rustc_hash::FxHasher;

/// Hash map designed for small keys
pub type FastHashMap<K, V> = rustc_hash::FxHashMap<K, V>;
pub type FastHashSet<K> = rustc_hash::FxHashSet<K>;
/// Insertion ordered map using the same hasher as [`FastHashMap`].
pub type FastIndexMap<K, V> = indexmap::IndexMap<K, V, BuildHasherDefault<FxHasher>>;
