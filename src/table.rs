//! An open-addressed, linear-probing hash table keyed by interned strings.
//!
//! Used for two things in the VM: the `globals` table (name -> value) and the `strings`
//! table, which is used as a set of every interned string (the value side is always
//! [Value::Nil]). Both uses depend on the exact tombstone/pointer-identity semantics
//! here, which is why this reimplements linear probing rather than reaching for
//! [std::collections::HashMap].

use std::rc::Rc;

use crate::object::LoxString;
use crate::value::Value;

/// Resize once `count + 1` would exceed `capacity * TABLE_MAX_LOAD`.
const TABLE_MAX_LOAD: f64 = 0.75;

/// Minimum capacity used the first time the table grows.
const MIN_CAPACITY: usize = 8;

/// One slot in the table. Three possible states:
///
/// * Empty: `key` is `None`, `value` is [Value::Nil].
/// * Occupied: `key` is `Some`.
/// * Tombstone: `key` is `None`, `value` is [Value::Bool(true)].
#[derive(Clone)]
struct Entry {
    key: Option<Rc<LoxString>>,
    value: Value,
}

impl Entry {
    fn empty() -> Self {
        Entry {
            key: None,
            value: Value::Nil,
        }
    }

    fn is_tombstone(&self) -> bool {
        self.key.is_none() && matches!(self.value, Value::Bool(true))
    }
}

/// An open-addressed hash table from interned strings to [Value]s.
#[derive(Default)]
pub struct Table {
    count: usize,
    entries: Vec<Entry>,
}

impl Table {
    /// Returns a new, empty table. No allocation happens until the first [Table::set].
    pub fn new() -> Self {
        Table::default()
    }

    /// How many live (non-tombstone) entries are in the table.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Look up `key`. Returns `None` if absent.
    pub fn get(&self, key: &Rc<LoxString>) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }

        let index = find_entry(&self.entries, key);
        let entry = &self.entries[index];
        entry.key.as_ref()?;
        Some(entry.value.clone())
    }

    /// Insert or overwrite `key` with `value`. Returns `true` if `key` was not already
    /// present (i.e. this created a new entry, possibly reusing a tombstone slot).
    pub fn set(&mut self, key: Rc<LoxString>, value: Value) -> bool {
        if self.count + 1 > (self.capacity() as f64 * TABLE_MAX_LOAD) as usize {
            let new_capacity = if self.capacity() < MIN_CAPACITY {
                MIN_CAPACITY
            } else {
                self.capacity() * 2
            };
            self.adjust_capacity(new_capacity);
        }

        let index = find_entry(&self.entries, &key);
        let entry = &mut self.entries[index];

        let is_new_key = entry.key.is_none();
        if is_new_key && !entry.is_tombstone() {
            self.count += 1;
        }

        entry.key = Some(key);
        entry.value = value;
        is_new_key
    }

    /// Remove `key`, turning its slot into a tombstone. Returns `true` if `key` was
    /// present.
    pub fn delete(&mut self, key: &Rc<LoxString>) -> bool {
        if self.entries.is_empty() {
            return false;
        }

        let index = find_entry(&self.entries, key);
        let entry = &mut self.entries[index];
        if entry.key.is_none() {
            return false;
        }

        entry.key = None;
        entry.value = Value::Bool(true);
        true
    }

    /// Copy every live entry from `self` into `into`. Unused by the VM proper, kept for
    /// symmetry with the original `table_add_all` and available for future table-merging
    /// needs.
    #[allow(dead_code)]
    pub fn add_all(&self, into: &mut Table) {
        for entry in &self.entries {
            if let Some(key) = &entry.key {
                into.set(Rc::clone(key), entry.value.clone());
            }
        }
    }

    /// Look up a string by its raw bytes and hash, without first constructing an `Rc`.
    /// Used to find an existing interned string before allocating a new one.
    pub fn find_string(&self, bytes: &[u8], hash: u32) -> Option<Rc<LoxString>> {
        if self.entries.is_empty() {
            return None;
        }

        let capacity = self.entries.len();
        let mut index = (hash as usize) % capacity;
        loop {
            let entry = &self.entries[index];
            match &entry.key {
                None if !entry.is_tombstone() => return None,
                Some(key) if key.hash() == hash && key.as_bytes() == bytes => {
                    return Some(Rc::clone(key));
                }
                _ => {}
            }
            index = (index + 1) % capacity;
        }
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn adjust_capacity(&mut self, capacity: usize) {
        let mut new_entries = vec![Entry::empty(); capacity];

        self.count = 0;
        for entry in &self.entries {
            let Some(key) = &entry.key else { continue };

            let index = find_entry(&new_entries, key);
            new_entries[index] = Entry {
                key: Some(Rc::clone(key)),
                value: entry.value.clone(),
            };
            self.count += 1;
        }

        self.entries = new_entries;
    }
}

/// Linear probe from `key.hash % capacity`, returning the index of either the matching
/// entry, the first tombstone seen, or the first empty slot -- whichever comes first in
/// probe order, with tombstones preferred over a later empty slot so that `set` can reuse
/// them.
fn find_entry(entries: &[Entry], key: &Rc<LoxString>) -> usize {
    let capacity = entries.len();
    let mut index = (key.hash() as usize) % capacity;
    let mut tombstone: Option<usize> = None;

    loop {
        let entry = &entries[index];
        match &entry.key {
            None => {
                if entry.is_tombstone() {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                } else {
                    return tombstone.unwrap_or(index);
                }
            }
            Some(k) if Rc::ptr_eq(k, key) => return index,
            Some(_) => {}
        }

        index = (index + 1) % capacity;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::object::Heap;

    #[test]
    fn set_then_get() {
        let mut heap = Heap::new();
        let mut table = Table::new();

        let key = heap.intern("hello".as_bytes());
        assert!(table.set(Rc::clone(&key), Value::Number(42.0)));
        assert_eq!(Some(Value::Number(42.0)), table.get(&key));
    }

    #[test]
    fn set_returns_false_on_overwrite() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let key = heap.intern("x".as_bytes());

        assert!(table.set(Rc::clone(&key), Value::Number(1.0)));
        assert!(!table.set(Rc::clone(&key), Value::Number(2.0)));
        assert_eq!(Some(Value::Number(2.0)), table.get(&key));
    }

    #[test]
    fn delete_then_get_returns_none() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let key = heap.intern("gone".as_bytes());

        table.set(Rc::clone(&key), Value::Bool(true));
        assert!(table.delete(&key));
        assert_eq!(None, table.get(&key));
        // Deleting twice doesn't re-succeed.
        assert!(!table.delete(&key));
    }

    #[test]
    fn tombstone_slot_is_reused_by_later_insert() {
        let mut heap = Heap::new();
        let mut table = Table::new();

        let a = heap.intern("a".as_bytes());
        let b = heap.intern("b".as_bytes());

        table.set(Rc::clone(&a), Value::Nil);
        table.delete(&a);
        let count_before = table.len();
        table.set(Rc::clone(&b), Value::Nil);
        // Reusing a tombstone slot should not grow `count` by more than one new entry.
        assert_eq!(count_before + 1, table.len());
        assert_eq!(Some(Value::Nil), table.get(&b));
    }

    #[test]
    fn grows_and_keeps_all_entries_reachable() {
        let mut heap = Heap::new();
        let mut table = Table::new();

        let keys: Vec<_> = (0..100)
            .map(|i| heap.intern(format!("key{i}").as_bytes()))
            .collect();

        for (i, key) in keys.iter().enumerate() {
            table.set(Rc::clone(key), Value::Number(i as f64));
        }

        for (i, key) in keys.iter().enumerate() {
            assert_eq!(Some(Value::Number(i as f64)), table.get(key));
        }
    }

    #[test]
    fn find_string_locates_interned_value_by_content() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let key = heap.intern("needle".as_bytes());
        table.set(Rc::clone(&key), Value::Nil);

        let found = table.find_string(b"needle", key.hash());
        assert!(found.is_some());
        assert!(Rc::ptr_eq(&key, &found.unwrap()));

        assert!(table.find_string(b"haystack", 0xdead_beef).is_none());
    }
}
