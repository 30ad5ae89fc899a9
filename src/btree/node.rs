use std::cmp::Ordering;

use crate::file::Addr;
use crate::record::FIELD_SIZE;

use super::compare::KeyComparator;
use super::error::{BPlusTreeError, BPlusTreeResult};

/// Fixed-width key as stored in a node
pub type Key = [u8; FIELD_SIZE];

/// Default maximum number of entries per node
pub const NODE_NUM: usize = 100;

/// Smallest node capacity that still leaves room to split and merge
pub const MIN_NODE_CAPACITY: usize = 4;

/// `total` is stored in one byte
pub const MAX_NODE_CAPACITY: usize = u8::MAX as usize;

/// A tree node, persisted as one slot of the index file
///
/// In this B+ tree variant:
/// - keys[i] is the maximum key in the subtree (or record) behind children[i]
/// - keys.len() == children.len()
/// - leaves point at records in the heap file and are chained through `next`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub leaf: bool,
    pub keys: Vec<Key>,
    pub children: Vec<Addr>,
    /// Next leaf in key order (NULL for internal nodes and the last leaf)
    pub next: Addr,
}

impl Node {
    /// Create a new empty leaf node
    pub fn new_leaf() -> Self {
        Self {
            leaf: true,
            keys: Vec::new(),
            children: Vec::new(),
            next: Addr::NULL,
        }
    }

    /// Create a new empty internal node
    pub fn new_internal() -> Self {
        Self {
            leaf: false,
            ..Self::new_leaf()
        }
    }

    /// Slot payload size for a given capacity:
    /// `leaf:1, total:1, keys cap×40, children cap×6, next:6, reserved:6`
    pub fn encoded_size(capacity: usize) -> usize {
        2 + capacity * FIELD_SIZE + capacity * Addr::SIZE + Addr::SIZE * 2
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Check if node is empty
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Get the maximum key in this node
    pub fn max_key(&self) -> Option<Key> {
        self.keys.last().copied()
    }

    pub fn encode(&self, capacity: usize) -> Vec<u8> {
        debug_assert!(self.len() <= capacity);
        let mut buf = vec![0u8; Self::encoded_size(capacity)];
        buf[0] = self.leaf as u8;
        buf[1] = self.len() as u8;

        let children_start = 2 + capacity * FIELD_SIZE;
        for (i, key) in self.keys.iter().enumerate() {
            let start = 2 + i * FIELD_SIZE;
            buf[start..start + FIELD_SIZE].copy_from_slice(key);
        }
        for (i, child) in self.children.iter().enumerate() {
            let start = children_start + i * Addr::SIZE;
            child.encode(&mut buf[start..start + Addr::SIZE]);
        }

        let next_start = children_start + capacity * Addr::SIZE;
        self.next.encode(&mut buf[next_start..next_start + Addr::SIZE]);
        buf
    }

    pub fn decode(buf: &[u8], capacity: usize) -> BPlusTreeResult<Self> {
        if buf.len() < Self::encoded_size(capacity) {
            return Err(BPlusTreeError::Corrupted(format!(
                "node buffer of {} bytes, expected {}",
                buf.len(),
                Self::encoded_size(capacity)
            )));
        }

        let total = buf[1] as usize;
        if total > capacity || buf[0] > 1 {
            return Err(BPlusTreeError::Corrupted(format!(
                "node header leaf={} total={} (capacity {})",
                buf[0], total, capacity
            )));
        }

        let children_start = 2 + capacity * FIELD_SIZE;
        let mut keys = Vec::with_capacity(capacity);
        let mut children = Vec::with_capacity(capacity);
        for i in 0..total {
            let mut key = [0u8; FIELD_SIZE];
            let start = 2 + i * FIELD_SIZE;
            key.copy_from_slice(&buf[start..start + FIELD_SIZE]);
            keys.push(key);

            let start = children_start + i * Addr::SIZE;
            children.push(Addr::decode(&buf[start..start + Addr::SIZE]));
        }

        let next_start = children_start + capacity * Addr::SIZE;
        Ok(Self {
            leaf: buf[0] == 1,
            keys,
            children,
            next: Addr::decode(&buf[next_start..next_start + Addr::SIZE]),
        })
    }

    /// Insert an entry at `pos`, shifting later entries right
    pub fn push(&mut self, pos: usize, key: Key, child: Addr) {
        self.keys.insert(pos, key);
        self.children.insert(pos, child);
    }

    /// Remove and return the entry at `pos`
    pub fn pull(&mut self, pos: usize) -> (Key, Addr) {
        (self.keys.remove(pos), self.children.remove(pos))
    }

    /// Move the upper half of the entries into a new sibling of the same kind
    ///
    /// The sibling inherits this node's `next`; linking this node to the
    /// sibling is up to the caller once the sibling has an address.
    pub fn split_off(&mut self) -> Node {
        let mid = self.len() / 2;
        Node {
            leaf: self.leaf,
            keys: self.keys.split_off(mid),
            children: self.children.split_off(mid),
            next: if self.leaf { self.next } else { Addr::NULL },
        }
    }

    /// Append all entries of `right`, taking over its leaf link
    pub fn absorb(&mut self, right: Node) {
        self.keys.extend(right.keys);
        self.children.extend(right.children);
        if self.leaf {
            self.next = right.next;
        }
    }

    /// Number of keys strictly less than `key`
    pub fn lower_bound(&self, key: &[u8], len: usize, cmp: &dyn KeyComparator) -> usize {
        self.keys
            .partition_point(|k| cmp.compare(key, k, len) == Ordering::Greater)
    }

    /// Binary search over the keys
    ///
    /// With `exact`, returns the position holding `key`, if any. Otherwise
    /// returns the first position whose key is >= `key`, falling back to the
    /// last entry, since each key bounds its subtree from above.
    pub fn binary_search(
        &self,
        exact: bool,
        key: &[u8],
        len: usize,
        cmp: &dyn KeyComparator,
    ) -> Option<usize> {
        if self.is_empty() {
            return None;
        }

        let pos = self.lower_bound(key, len, cmp);
        if exact {
            (pos < self.len() && cmp.compare(key, &self.keys[pos], len) == Ordering::Equal)
                .then_some(pos)
        } else {
            Some(pos.min(self.len() - 1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::compare::compare_int;

    fn key(v: i32) -> Key {
        let mut k = [0u8; FIELD_SIZE];
        k[..4].copy_from_slice(&v.to_le_bytes());
        k
    }

    fn leaf(values: &[i32]) -> Node {
        let mut node = Node::new_leaf();
        for (i, &v) in values.iter().enumerate() {
            node.push(i, key(v), Addr::new(1, i as u16 * 10));
        }
        node
    }

    #[test]
    fn test_encoded_size() {
        assert_eq!(Node::encoded_size(NODE_NUM), 2 + 4000 + 600 + 12);
        assert!(Node::encoded_size(MAX_NODE_CAPACITY) + Addr::SIZE <= crate::file::PAGE_SIZE);
    }

    #[test]
    fn test_encode_decode() {
        let mut node = leaf(&[1, 3, 5]);
        node.next = Addr::new(4, 40);

        let buf = node.encode(8);
        assert_eq!(buf.len(), Node::encoded_size(8));
        assert_eq!(Node::decode(&buf, 8).unwrap(), node);
    }

    #[test]
    fn test_decode_rejects_overfull() {
        let mut buf = leaf(&[1]).encode(4);
        buf[1] = 5;
        assert!(matches!(
            Node::decode(&buf, 4),
            Err(BPlusTreeError::Corrupted(_))
        ));
    }

    #[test]
    fn test_exact_search() {
        let node = leaf(&[1, 3, 5, 7]);
        assert_eq!(node.binary_search(true, &key(5), 4, &compare_int), Some(2));
        assert_eq!(node.binary_search(true, &key(4), 4, &compare_int), None);
        assert_eq!(node.binary_search(true, &key(9), 4, &compare_int), None);
        assert_eq!(Node::new_leaf().binary_search(true, &key(1), 4, &compare_int), None);
    }

    #[test]
    fn test_routing_search() {
        let node = leaf(&[10, 20, 30]);
        assert_eq!(node.binary_search(false, &key(5), 4, &compare_int), Some(0));
        assert_eq!(node.binary_search(false, &key(10), 4, &compare_int), Some(0));
        assert_eq!(node.binary_search(false, &key(11), 4, &compare_int), Some(1));
        // Keys above every bound go to the last child
        assert_eq!(node.binary_search(false, &key(99), 4, &compare_int), Some(2));
    }

    #[test]
    fn test_split_off_keeps_lower_half() {
        let mut node = leaf(&[1, 2, 3, 4]);
        node.next = Addr::new(9, 0);

        let sibling = node.split_off();
        assert_eq!(node.keys, vec![key(1), key(2)]);
        assert_eq!(sibling.keys, vec![key(3), key(4)]);
        assert_eq!(sibling.next, Addr::new(9, 0));
        assert!(sibling.leaf);
    }

    #[test]
    fn test_push_pull_absorb() {
        let mut left = leaf(&[1, 5]);
        left.push(1, key(3), Addr::new(2, 0));
        assert_eq!(left.max_key(), Some(key(5)));

        let (k, a) = left.pull(1);
        assert_eq!((k, a), (key(3), Addr::new(2, 0)));

        let mut right = leaf(&[7]);
        right.next = Addr::new(6, 6);
        left.absorb(right);
        assert_eq!(left.keys, vec![key(1), key(5), key(7)]);
        assert_eq!(left.next, Addr::new(6, 6));
    }
}
