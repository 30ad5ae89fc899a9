//! Disk-resident B+ tree over a pair of files
//!
//! Each table lives in two files under the data directory:
//! - `<name>.idx`: tree nodes as slots, schema in the header's reserved area
//! - `<name>.db`: fixed-size records as slots
//!
//! Leaves map keys to record addresses. Internal separators are upper
//! bounds: `keys[i]` is the maximum key reachable through `children[i]`, and
//! a key larger than every separator routes to the last child.
//!
//! Recursion works on owned [`Node`] copies. No page memory is held across
//! pool calls, so eviction during a descent never invalidates an ancestor.

mod compare;
mod error;
mod node;


pub use compare::{
    KeyComparator, compare_bytes, compare_float, compare_int, compare_str, comparator_for,
};
pub use error::{BPlusTreeError, BPlusTreeResult};
pub use node::{Key, MAX_NODE_CAPACITY, MIN_NODE_CAPACITY, NODE_NUM, Node};

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::config::StorageConfig;
use crate::file::{Addr, BufferPool, FileHandle, PagedFileManager};
use crate::record::{Attr, FIELD_SIZE};

/// An open table: both file handles plus the decoded schema
struct Table {
    index: FileHandle,
    db: FileHandle,
    attr: Attr,
}

impl Table {
    fn capacity(&self) -> usize {
        self.attr.node_capacity
    }

    fn key_len(&self) -> usize {
        self.attr.key_len()
    }
}

/// Ordered index over `<name>.idx` / `<name>.db` file pairs
pub struct BPlusTree {
    pool: BufferPool,
    data_dir: PathBuf,
    /// Capacity given to tables created from now on
    node_capacity: usize,
}

impl BPlusTree {
    /// Create a tree rooted in `data_dir` with the default node capacity
    pub fn new(pool: BufferPool, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            data_dir: data_dir.into(),
            node_capacity: NODE_NUM,
        }
    }

    /// Create a tree whose new tables use `node_capacity` entries per node
    pub fn with_node_capacity(
        pool: BufferPool,
        data_dir: impl Into<PathBuf>,
        node_capacity: usize,
    ) -> BPlusTreeResult<Self> {
        check_capacity(node_capacity)?;
        Ok(Self {
            node_capacity,
            ..Self::new(pool, data_dir)
        })
    }

    /// Build the pool and the tree from a storage configuration
    pub fn from_config(config: &StorageConfig) -> BPlusTreeResult<Self> {
        config.validate()?;
        let pool = BufferPool::with_capacity(PagedFileManager::new(), config.pool_capacity);
        Self::with_node_capacity(pool, config.data_dir.clone(), config.node_capacity)
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut BufferPool {
        &mut self.pool
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn node_capacity(&self) -> usize {
        self.node_capacity
    }

    /// Path of a table's node file
    pub fn index_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{}.idx", name))
    }

    /// Path of a table's record file
    pub fn db_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{}.db", name))
    }

    // ========== Table Lifecycle ==========

    /// Create both files of a table with an empty leaf as root
    ///
    /// A zero `node_capacity` in `attr` picks the tree's default.
    pub fn create_form(&mut self, name: &str, attr: &Attr) -> BPlusTreeResult<()> {
        attr.validate()?;
        let capacity = if attr.node_capacity == 0 {
            self.node_capacity
        } else {
            attr.node_capacity
        };
        check_capacity(capacity)?;

        let index_path = self.index_path(name);
        let db_path = self.db_path(name);
        if index_path.exists() {
            return Err(BPlusTreeError::IndexAlreadyExists(name.to_string()));
        }
        if db_path.exists() {
            return Err(BPlusTreeError::DbAlreadyExists(name.to_string()));
        }

        let index = self.pool.create_file(&index_path)?;
        self.pool.create_file(&db_path)?;

        let root = Node::new_leaf();
        let root_addr = self.pool.file(index).insert_item(&root.encode(capacity))?;

        let mut attr = attr.clone();
        attr.head = root_addr;
        attr.tail = root_addr;
        attr.node_capacity = capacity;
        self.pool.file(index).store_reserved(&attr.encode())?;

        info!(
            "created table '{}' ({} columns, key column {}, node capacity {})",
            name,
            attr.count(),
            attr.index,
            capacity
        );
        Ok(())
    }

    /// Close and delete both files of a table
    pub fn delete_form(&mut self, name: &str) -> BPlusTreeResult<()> {
        let index_path = self.index_path(name);
        let db_path = self.db_path(name);
        if !index_path.exists() {
            return Err(BPlusTreeError::IndexMissing(name.to_string()));
        }
        if !db_path.exists() {
            return Err(BPlusTreeError::DbMissing(name.to_string()));
        }

        self.pool.delete_file(&index_path)?;
        self.pool.delete_file(&db_path)?;

        info!("deleted table '{}'", name);
        Ok(())
    }

    /// Schema of a table, including its current root and first leaf
    pub fn fetch_attr(&mut self, name: &str) -> BPlusTreeResult<Attr> {
        Ok(self.open_table(name)?.attr)
    }

    // ========== Record Operations ==========

    /// Insert a record, keyed on the schema's key column
    pub fn insert_data<C: KeyComparator>(
        &mut self,
        name: &str,
        record: &[u8],
        cmp: C,
    ) -> BPlusTreeResult<()> {
        let mut table = self.open_table(name)?;
        check_record(&table.attr, record)?;
        let key = to_key(&record[table.attr.key_range()])?;

        if self.search_by_index(&table, &key, &cmp)?.is_some() {
            return Err(BPlusTreeError::ItemAlreadyExists);
        }

        let value = self.pool.file(table.db).insert_item(record)?;

        let root = self.read_node(&table, table.attr.head)?;
        let mut root = self.insert_by_index(&table, root, &key, value, &cmp)?;

        if root.len() >= table.capacity() {
            // Grow: the old root becomes the single child of a new root, then splits
            let old_root = table.attr.head;
            let (sibling, sibling_max) = self.split(&table, &mut root)?;
            self.write_node(&table, old_root, &root)?;

            let mut new_root = Node::new_internal();
            new_root.push(0, max_key(&root)?, old_root);
            new_root.push(1, sibling_max, sibling);

            table.attr.head = self.alloc_node(&table, &new_root)?;
            self.store_attr(&table)?;
            debug!(
                "table '{}' grew a level, new root at {}",
                name, table.attr.head
            );
        } else {
            self.write_node(&table, table.attr.head, &root)?;
        }

        Ok(())
    }

    /// Remove the record stored under `key`
    pub fn remove_data_by_index<C: KeyComparator>(
        &mut self,
        name: &str,
        key: &[u8],
        cmp: C,
    ) -> BPlusTreeResult<()> {
        let mut table = self.open_table(name)?;
        let key = to_key(key)?;

        let value = self
            .search_by_index(&table, &key, &cmp)?
            .ok_or(BPlusTreeError::ItemNotFound)?;

        let root = self.read_node(&table, table.attr.head)?;
        let mut root = self.remove_by_index(&table, root, &key, &cmp)?;
        self.write_node(&table, table.attr.head, &root)?;

        // Shrink while the root is an internal node with a single child
        let mut shrunk = false;
        while !root.leaf && root.len() == 1 {
            let child = root.children[0];
            self.free_node(&table, table.attr.head)?;
            debug!(
                "table '{}' lost a level, root moves from {} to {}",
                name, table.attr.head, child
            );
            table.attr.head = child;
            root = self.read_node(&table, child)?;
            shrunk = true;
        }
        if shrunk {
            self.store_attr(&table)?;
        }

        self.pool.file(table.db).remove_item(value)?;
        Ok(())
    }

    /// Overwrite the record stored under `key`
    ///
    /// The new record must carry the same key.
    pub fn update_data_by_index<C: KeyComparator>(
        &mut self,
        name: &str,
        key: &[u8],
        record: &[u8],
        cmp: C,
    ) -> BPlusTreeResult<()> {
        let table = self.open_table(name)?;
        check_record(&table.attr, record)?;
        let key = to_key(key)?;

        let value = self
            .search_by_index(&table, &key, &cmp)?
            .ok_or(BPlusTreeError::ItemNotFound)?;

        if cmp.compare(&key, &record[table.attr.key_range()], table.key_len()) != Ordering::Equal {
            return Err(BPlusTreeError::KeyChanged);
        }

        self.pool.file(table.db).update_item(value, record)?;
        Ok(())
    }

    /// Copy out the record stored under `key`
    pub fn search_data_by_index<C: KeyComparator>(
        &mut self,
        name: &str,
        key: &[u8],
        cmp: C,
    ) -> BPlusTreeResult<Vec<u8>> {
        let table = self.open_table(name)?;
        let key = to_key(key)?;

        let value = self
            .search_by_index(&table, &key, &cmp)?
            .ok_or(BPlusTreeError::ItemNotFound)?;
        self.read_record(&table, value)
    }

    /// All records in key order
    pub fn scan_data(&mut self, name: &str) -> BPlusTreeResult<Vec<Vec<u8>>> {
        let table = self.open_table(name)?;
        let mut records = Vec::new();

        let mut addr = table.attr.tail;
        while !addr.is_null() {
            let leaf = self.read_node(&table, addr)?;
            for &value in &leaf.children {
                records.push(self.read_record(&table, value)?);
            }
            addr = leaf.next;
        }
        Ok(records)
    }

    /// Records whose key lies in `lower..=upper`, in key order
    pub fn range_data<C: KeyComparator>(
        &mut self,
        name: &str,
        lower: &[u8],
        upper: &[u8],
        cmp: C,
    ) -> BPlusTreeResult<Vec<Vec<u8>>> {
        let table = self.open_table(name)?;
        let lower = to_key(lower)?;
        let upper = to_key(upper)?;
        let len = table.key_len();

        let mut leaf = self.find_leaf(&table, &lower, &cmp)?;
        let mut pos = leaf.lower_bound(&lower, len, &cmp);
        let mut records = Vec::new();

        loop {
            while pos < leaf.len() {
                if cmp.compare(&leaf.keys[pos], &upper, len) == Ordering::Greater {
                    return Ok(records);
                }
                records.push(self.read_record(&table, leaf.children[pos])?);
                pos += 1;
            }
            if leaf.next.is_null() {
                return Ok(records);
            }
            leaf = self.read_node(&table, leaf.next)?;
            pos = 0;
        }
    }

    /// Number of records in a table
    pub fn count_data(&mut self, name: &str) -> BPlusTreeResult<usize> {
        let table = self.open_table(name)?;
        let mut count = 0;

        let mut addr = table.attr.tail;
        while !addr.is_null() {
            let leaf = self.read_node(&table, addr)?;
            count += leaf.len();
            addr = leaf.next;
        }
        Ok(count)
    }

    /// Write back every dirty page and sync
    pub fn flush(&mut self) -> BPlusTreeResult<()> {
        self.pool.flush_all()?;
        Ok(())
    }

    // ========== Insert Internals ==========

    /// Insert below `node`, returning the updated (unwritten) node
    ///
    /// Children touched on the way are written before returning; a child that
    /// reached capacity is split and its sibling added to `node`.
    fn insert_by_index(
        &mut self,
        table: &Table,
        mut node: Node,
        key: &Key,
        value: Addr,
        cmp: &dyn KeyComparator,
    ) -> BPlusTreeResult<Node> {
        let len = table.key_len();
        if node.leaf {
            let pos = node.lower_bound(key, len, cmp);
            node.push(pos, *key, value);
            return Ok(node);
        }

        let i = route(&node, key, len, cmp)?;
        let child_addr = node.children[i];
        let child = self.read_node(table, child_addr)?;
        let mut child = self.insert_by_index(table, child, key, value, cmp)?;

        if child.len() >= table.capacity() {
            let (sibling, sibling_max) = self.split(table, &mut child)?;
            node.push(i + 1, sibling_max, sibling);
        }
        node.keys[i] = max_key(&child)?;
        self.write_node(table, child_addr, &child)?;

        Ok(node)
    }

    /// Move the upper half of `node` into a new slot; returns its address and max key
    fn split(&mut self, table: &Table, node: &mut Node) -> BPlusTreeResult<(Addr, Key)> {
        let sibling = node.split_off();
        let sibling_max = max_key(&sibling)?;
        let addr = self.alloc_node(table, &sibling)?;
        if node.leaf {
            node.next = addr;
        }

        debug!(
            "split {} node: {} entries stay, {} move to {}",
            if node.leaf { "leaf" } else { "internal" },
            node.len(),
            sibling.len(),
            addr
        );
        Ok((addr, sibling_max))
    }

    // ========== Remove Internals ==========

    /// Remove `key` below `node`, returning the updated (unwritten) node
    fn remove_by_index(
        &mut self,
        table: &Table,
        mut node: Node,
        key: &Key,
        cmp: &dyn KeyComparator,
    ) -> BPlusTreeResult<Node> {
        let len = table.key_len();
        if node.leaf {
            let pos = node
                .binary_search(true, key, len, cmp)
                .ok_or(BPlusTreeError::ItemNotFound)?;
            node.pull(pos);
            return Ok(node);
        }

        let i = route(&node, key, len, cmp)?;
        let child_addr = node.children[i];
        let child = self.read_node(table, child_addr)?;
        let child = self.remove_by_index(table, child, key, cmp)?;

        if child.len() < table.capacity() / 2 && node.len() > 1 {
            self.rebalance(table, &mut node, i, child)?;
        } else {
            if let Some(max) = child.max_key() {
                node.keys[i] = max;
            }
            self.write_node(table, child_addr, &child)?;
        }

        Ok(node)
    }

    /// Fix an underflowing child `i` of `parent` by borrowing from or merging
    /// with a sibling (the left one unless `i` is the first child)
    fn rebalance(
        &mut self,
        table: &Table,
        parent: &mut Node,
        i: usize,
        child: Node,
    ) -> BPlusTreeResult<()> {
        let half = table.capacity() / 2;
        let left_i = if i > 0 { i - 1 } else { i };
        let right_i = left_i + 1;
        let left_addr = parent.children[left_i];
        let right_addr = parent.children[right_i];

        let (mut left, mut right, sibling_len) = if i > 0 {
            let left = self.read_node(table, left_addr)?;
            let len = left.len();
            (left, child, len)
        } else {
            let right = self.read_node(table, right_addr)?;
            let len = right.len();
            (child, right, len)
        };

        if sibling_len > half {
            if i > 0 {
                let (k, a) = left.pull(left.len() - 1);
                right.push(0, k, a);
            } else {
                let (k, a) = right.pull(0);
                let end = left.len();
                left.push(end, k, a);
            }
            parent.keys[left_i] = max_key(&left)?;
            parent.keys[right_i] = max_key(&right)?;
            self.write_node(table, left_addr, &left)?;
            self.write_node(table, right_addr, &right)?;
            debug!(
                "borrowed one entry from {} into {}",
                if i > 0 { left_addr } else { right_addr },
                if i > 0 { right_addr } else { left_addr }
            );
        } else {
            self.merge(table, parent, left_i, left, right)?;
        }

        Ok(())
    }

    /// Fold `right` (child `left_i + 1`) into `left` (child `left_i`) and free its slot
    fn merge(
        &mut self,
        table: &Table,
        parent: &mut Node,
        left_i: usize,
        mut left: Node,
        right: Node,
    ) -> BPlusTreeResult<()> {
        let left_addr = parent.children[left_i];
        let (_, right_addr) = parent.pull(left_i + 1);

        left.absorb(right);
        parent.keys[left_i] = max_key(&left)?;
        self.write_node(table, left_addr, &left)?;
        self.free_node(table, right_addr)?;

        debug!(
            "merged node {} into {} ({} entries)",
            right_addr,
            left_addr,
            left.len()
        );
        Ok(())
    }

    // ========== Lookup Internals ==========

    /// Address of the record stored under `key`, if any
    fn search_by_index(
        &mut self,
        table: &Table,
        key: &Key,
        cmp: &dyn KeyComparator,
    ) -> BPlusTreeResult<Option<Addr>> {
        let leaf = self.find_leaf(table, key, cmp)?;
        Ok(leaf
            .binary_search(true, key, table.key_len(), cmp)
            .map(|pos| leaf.children[pos]))
    }

    /// Leaf whose key range covers `key`
    fn find_leaf(
        &mut self,
        table: &Table,
        key: &Key,
        cmp: &dyn KeyComparator,
    ) -> BPlusTreeResult<Node> {
        let mut node = self.read_node(table, table.attr.head)?;
        while !node.leaf {
            let i = route(&node, key, table.key_len(), cmp)?;
            node = self.read_node(table, node.children[i])?;
        }
        Ok(node)
    }

    // ========== Storage Helpers ==========

    fn open_table(&mut self, name: &str) -> BPlusTreeResult<Table> {
        let index_path = self.index_path(name);
        let db_path = self.db_path(name);
        if !index_path.exists() {
            return Err(BPlusTreeError::IndexMissing(name.to_string()));
        }
        if !db_path.exists() {
            return Err(BPlusTreeError::DbMissing(name.to_string()));
        }

        let index = self.pool.open_file(&index_path)?;
        let db = self.pool.open_file(&db_path)?;
        let info = self.pool.file(index).fetch_info()?;
        let attr = Attr::decode(&info.reserved)?;
        check_capacity(attr.node_capacity)
            .map_err(|_| BPlusTreeError::Corrupted(format!("node capacity {}", attr.node_capacity)))?;

        Ok(Table { index, db, attr })
    }

    fn store_attr(&mut self, table: &Table) -> BPlusTreeResult<()> {
        self.pool.file(table.index).store_reserved(&table.attr.encode())?;
        Ok(())
    }

    fn read_node(&mut self, table: &Table, addr: Addr) -> BPlusTreeResult<Node> {
        let mut buf = vec![0u8; Node::encoded_size(table.capacity())];
        self.pool.file(table.index).search_item(addr, &mut buf)?;
        Node::decode(&buf, table.capacity())
    }

    fn write_node(&mut self, table: &Table, addr: Addr, node: &Node) -> BPlusTreeResult<()> {
        self.pool
            .file(table.index)
            .update_item(addr, &node.encode(table.capacity()))?;
        Ok(())
    }

    fn alloc_node(&mut self, table: &Table, node: &Node) -> BPlusTreeResult<Addr> {
        Ok(self
            .pool
            .file(table.index)
            .insert_item(&node.encode(table.capacity()))?)
    }

    fn free_node(&mut self, table: &Table, addr: Addr) -> BPlusTreeResult<()> {
        self.pool.file(table.index).remove_item(addr)?;
        Ok(())
    }

    fn read_record(&mut self, table: &Table, addr: Addr) -> BPlusTreeResult<Vec<u8>> {
        let mut record = vec![0u8; table.attr.record_size()];
        self.pool.file(table.db).search_item(addr, &mut record)?;
        Ok(record)
    }
}

fn check_capacity(capacity: usize) -> BPlusTreeResult<()> {
    if !(MIN_NODE_CAPACITY..=MAX_NODE_CAPACITY).contains(&capacity) {
        return Err(BPlusTreeError::InvalidNodeCapacity(capacity));
    }
    Ok(())
}

fn check_record(attr: &Attr, record: &[u8]) -> BPlusTreeResult<()> {
    if record.len() != attr.record_size() {
        return Err(BPlusTreeError::RecordSize {
            expected: attr.record_size(),
            actual: record.len(),
        });
    }
    Ok(())
}

/// Zero-pad key bytes to a full field
fn to_key(bytes: &[u8]) -> BPlusTreeResult<Key> {
    if bytes.len() > FIELD_SIZE {
        return Err(BPlusTreeError::KeySize(bytes.len()));
    }
    let mut key = [0u8; FIELD_SIZE];
    key[..bytes.len()].copy_from_slice(bytes);
    Ok(key)
}

fn route(node: &Node, key: &Key, len: usize, cmp: &dyn KeyComparator) -> BPlusTreeResult<usize> {
    node.binary_search(false, key, len, cmp)
        .ok_or_else(|| BPlusTreeError::Corrupted("empty internal node".to_string()))
}

fn max_key(node: &Node) -> BPlusTreeResult<Key> {
    node.max_key()
        .ok_or_else(|| BPlusTreeError::Corrupted("empty node has no maximum key".to_string()))
}
