use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use model::{ConflictError, ObjectGraph, ObjectRef, Store, StoreError, StoreTransaction, Value};
use parking_lot::RwLock;
use serde::Serialize;

const ROOT_ID: &str = "root";

#[derive(Debug)]
struct Versioned {
    value: Value,
    /// Commit sequence that last wrote this value.
    version: u64,
}

#[derive(Debug)]
struct Node {
    type_tag: String,
    children: BTreeMap<String, ObjectRef>,
    props: HashMap<String, Versioned>,
}

impl Node {
    fn new(type_tag: &str) -> Self {
        Self {
            type_tag: type_tag.to_string(),
            children: BTreeMap::new(),
            props: HashMap::new(),
        }
    }
}

#[derive(Debug)]
struct State {
    objects: HashMap<ObjectRef, Node>,
    commit_seq: u64,
}

#[derive(Debug, Default)]
struct Counters {
    begun: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    conflicts: AtomicU64,
    connections_closed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub begun: u64,
    pub committed: u64,
    pub aborted: u64,
    pub conflicts: u64,
    pub connections_closed: u64,
}

#[derive(Debug)]
struct Inner {
    state: RwLock<State>,
    counters: Counters,
    forced_conflicts: AtomicU32,
}

/// Object tree with versioned properties and first-committer-wins commits.
///
/// Cloning shares the same underlying tree.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new(root_type: &str) -> Self {
        let root = ObjectRef::new(ROOT_ID);
        let mut objects = HashMap::new();
        objects.insert(root, Node::new(root_type));
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State {
                    objects,
                    commit_seq: 0,
                }),
                counters: Counters::default(),
                forced_conflicts: AtomicU32::new(0),
            }),
        }
    }

    /// Mount a new object under `parent`. Ids are slash-joined names from the root.
    pub fn add_object(
        &self,
        parent: &ObjectRef,
        name: &str,
        type_tag: &str,
    ) -> Result<ObjectRef, StoreError> {
        let mut state = self.inner.state.write();
        let child = ObjectRef::new(&format!("{}/{}", parent.id(), name));
        let node = state
            .objects
            .get_mut(parent)
            .ok_or_else(|| StoreError::UnknownObject(parent.id().to_string()))?;
        node.children.insert(name.to_string(), child.clone());
        state.objects.insert(child.clone(), Node::new(type_tag));
        Ok(child)
    }

    /// Write a property outside any transaction, as a competing committer would.
    pub fn set_prop(&self, object: &ObjectRef, key: &str, value: Value) -> Result<(), StoreError> {
        let mut state = self.inner.state.write();
        state.commit_seq += 1;
        let version = state.commit_seq;
        let node = state
            .objects
            .get_mut(object)
            .ok_or_else(|| StoreError::UnknownObject(object.id().to_string()))?;
        node.props.insert(key.to_string(), Versioned { value, version });
        Ok(())
    }

    /// Committed value of a property.
    pub fn prop(&self, object: &ObjectRef, key: &str) -> Option<Value> {
        let state = self.inner.state.read();
        state
            .objects
            .get(object)?
            .props
            .get(key)
            .map(|v| v.value.clone())
    }

    /// Make the next `count` commits fail with a conflict.
    pub fn fail_next_commits(&self, count: u32) {
        self.inner.forced_conflicts.store(count, Ordering::SeqCst);
    }

    pub fn stats(&self) -> StoreStats {
        let c = &self.inner.counters;
        StoreStats {
            begun: c.begun.load(Ordering::Relaxed),
            committed: c.committed.load(Ordering::Relaxed),
            aborted: c.aborted.load(Ordering::Relaxed),
            conflicts: c.conflicts.load(Ordering::Relaxed),
            connections_closed: c.connections_closed.load(Ordering::Relaxed),
        }
    }
}

impl ObjectGraph for MemoryStore {
    fn root(&self) -> ObjectRef {
        ObjectRef::new(ROOT_ID)
    }

    fn child(&self, parent: &ObjectRef, name: &str) -> Option<ObjectRef> {
        let state = self.inner.state.read();
        state.objects.get(parent)?.children.get(name).cloned()
    }

    fn type_tag(&self, object: &ObjectRef) -> String {
        let state = self.inner.state.read();
        state
            .objects
            .get(object)
            .map(|node| node.type_tag.clone())
            .unwrap_or_default()
    }
}

impl Store for MemoryStore {
    fn begin(&self, name: &str) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let snapshot = self.inner.state.read().commit_seq;
        self.inner.counters.begun.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("begin {} at seq {}", name, snapshot);
        Ok(Box::new(MemoryTransaction {
            name: name.to_string(),
            inner: Arc::clone(&self.inner),
            snapshot,
            writes: BTreeMap::new(),
            open: true,
        }))
    }
}

struct MemoryTransaction {
    name: String,
    inner: Arc<Inner>,
    snapshot: u64,
    writes: BTreeMap<(ObjectRef, String), Value>,
    open: bool,
}

impl MemoryTransaction {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.open {
            Ok(())
        } else {
            Err(StoreError::Closed(self.name.clone()))
        }
    }

    fn take_forced_conflict(&self) -> bool {
        self.inner
            .forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl StoreTransaction for MemoryTransaction {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, object: &ObjectRef, key: &str) -> Result<Option<Value>, StoreError> {
        self.ensure_open()?;
        if let Some(value) = self.writes.get(&(object.clone(), key.to_string())) {
            return Ok(Some(value.clone()));
        }
        let state = self.inner.state.read();
        let node = state
            .objects
            .get(object)
            .ok_or_else(|| StoreError::UnknownObject(object.id().to_string()))?;
        Ok(node.props.get(key).map(|v| v.value.clone()))
    }

    fn set(&mut self, object: &ObjectRef, key: &str, value: Value) -> Result<(), StoreError> {
        self.ensure_open()?;
        if !self.inner.state.read().objects.contains_key(object) {
            return Err(StoreError::UnknownObject(object.id().to_string()));
        }
        self.writes.insert((object.clone(), key.to_string()), value);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.take_forced_conflict() {
            self.inner.counters.conflicts.fetch_add(1, Ordering::Relaxed);
            return Err(ConflictError(format!("Forced conflict in {}", self.name)).into());
        }

        let mut state = self.inner.state.write();
        for (object, key) in self.writes.keys() {
            let stale = state
                .objects
                .get(object)
                .and_then(|node| node.props.get(key))
                .is_some_and(|v| v.version > self.snapshot);
            if stale {
                self.inner.counters.conflicts.fetch_add(1, Ordering::Relaxed);
                return Err(ConflictError(format!(
                    "{} was modified by another transaction ({}.{})",
                    self.name,
                    object.id(),
                    key
                ))
                .into());
            }
        }

        if !self.writes.is_empty() {
            state.commit_seq += 1;
        }
        let version = state.commit_seq;
        for ((object, key), value) in std::mem::take(&mut self.writes) {
            if let Some(node) = state.objects.get_mut(&object) {
                node.props.insert(key, Versioned { value, version });
            }
        }
        self.open = false;
        self.inner.counters.committed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn abort(&mut self) {
        self.writes.clear();
        if self.open {
            self.open = false;
            self.inner.counters.aborted.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn close_connections(&mut self) {
        self.inner
            .counters
            .connections_closed
            .fetch_add(1, Ordering::Relaxed);
    }
}
