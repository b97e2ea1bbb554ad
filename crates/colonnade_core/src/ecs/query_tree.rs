//! # Sorted Key Tree
//!
//! A trie over strictly ascending key sequences, answering "every value
//! whose path contains at least these keys".
//!
//! ```text
//!            (root)
//!           /      \
//!         1          2
//!        / \          \
//!      2*   3*         3*
//!      |
//!      3*
//! ```
//!
//! A superset query for `{2, 3}` walks every branch whose key does not
//! exceed the next wanted key, consumes wanted keys as it meets them, and
//! collects whole subtrees once nothing is left to find. Branches with a
//! larger key are pruned, since keys only grow along a path.

/// One trie node.
#[derive(Debug, Clone)]
struct Node<K, V> {
    /// Value stored at the path ending here.
    value: Option<V>,
    /// Children sorted by key.
    children: Vec<(K, usize)>,
}

impl<K, V> Node<K, V> {
    const fn empty() -> Self {
        Self {
            value: None,
            children: Vec::new(),
        }
    }
}

/// Trie keyed by sorted sequences with superset lookup.
#[derive(Debug, Clone)]
pub struct SortedKeyTree<K, V> {
    /// Node arena. Index 0 is the root.
    nodes: Vec<Node<K, V>>,
    /// Number of stored values.
    len: usize,
}

impl<K: Ord + Copy, V: Copy> Default for SortedKeyTree<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Copy, V: Copy> SortedKeyTree<K, V> {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::empty()],
            len: 0,
        }
    }

    /// Returns the number of stored values.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Checks if empty.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stores `value` at `path`, returning the value it replaced.
    ///
    /// `path` must be strictly ascending.
    pub fn insert(&mut self, path: &[K], value: V) -> Option<V> {
        debug_assert!(
            path.windows(2).all(|pair| pair[0] < pair[1]),
            "paths must be strictly ascending"
        );

        let mut node = 0;
        for &key in path {
            node = match self.find_child(node, key) {
                Ok(slot) => self.nodes[node].children[slot].1,
                Err(slot) => {
                    let child = self.nodes.len();
                    self.nodes.push(Node::empty());
                    self.nodes[node].children.insert(slot, (key, child));
                    child
                }
            };
        }

        let previous = self.nodes[node].value.replace(value);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    /// Returns the value stored at exactly `path`.
    #[must_use]
    pub fn get(&self, path: &[K]) -> Option<V> {
        let mut node = 0;
        for &key in path {
            let slot = self.find_child(node, key).ok()?;
            node = self.nodes[node].children[slot].1;
        }
        self.nodes[node].value
    }

    /// Returns every value whose path contains all of `keys`.
    ///
    /// `keys` may be unsorted and contain duplicates. An empty query
    /// matches everything.
    #[must_use]
    pub fn supersets(&self, keys: &[K]) -> Vec<V> {
        let mut query = keys.to_vec();
        query.sort_unstable();
        query.dedup();

        let mut out = Vec::new();
        self.collect_supersets(0, &query, &mut out);
        out
    }

    fn find_child(&self, node: usize, key: K) -> Result<usize, usize> {
        self.nodes[node]
            .children
            .binary_search_by(|(child_key, _)| child_key.cmp(&key))
    }

    fn collect_supersets(&self, node: usize, query: &[K], out: &mut Vec<V>) {
        let Some((&wanted, rest)) = query.split_first() else {
            self.collect_subtree(node, out);
            return;
        };

        for &(key, child) in &self.nodes[node].children {
            if key > wanted {
                break;
            }
            if key == wanted {
                self.collect_supersets(child, rest, out);
            } else {
                self.collect_supersets(child, query, out);
            }
        }
    }

    fn collect_subtree(&self, node: usize, out: &mut Vec<V>) {
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            let current = &self.nodes[current];
            out.extend(current.value);
            stack.extend(current.children.iter().map(|&(_, child)| child));
        }
    }
}
