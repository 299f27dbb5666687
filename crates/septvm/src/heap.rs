//! The managed heap: an arena of September objects and the tracing collector.
//!
//! Every heap-allocated value lives in one arena slot (`Vec<Option<HeapEntry>>`
//! plus a free list for slot reuse). Reclamation is stop-the-world
//! mark-and-sweep: mark walks breadth-first from the roots the interpreter
//! hands in (live frames, module scopes, the globals registry) plus any active
//! pin scopes; sweep frees what the mark phase never reached and recycles the
//! slots.
//!
//! Collection only ever runs at interpreter safe points, so values held in
//! Rust locals mid-instruction are never at risk. Native code that allocates
//! across a nested invocation must hold its temporaries in a pin scope.

use std::collections::BTreeMap;

use crate::{
    frame::Frame,
    function::SepFunction,
    object::SepObject,
    resource::{ResourceError, ResourceTracker},
    types::{SepArray, SepStr},
    value::Value,
};

/// Index of an object in the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapId(usize);

impl HeapId {
    #[inline]
    #[must_use]
    pub(crate) fn index(self) -> usize {
        self.0
    }
}

/// Kind-discriminated payload of a heap object.
#[derive(Debug)]
pub(crate) enum HeapData {
    Object(SepObject),
    Str(SepStr),
    Array(SepArray),
    Function(SepFunction),
    Frame(Frame),
}

impl HeapData {
    /// Static kind name for diagnostics and heap statistics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Object(_) => "Object",
            Self::Str(_) => "String",
            Self::Array(_) => "Array",
            Self::Function(_) => "Function",
            Self::Frame(_) => "Frame",
        }
    }

    /// Rough size estimate in bytes, used for GC scheduling and limits.
    fn estimate_size(&self) -> usize {
        const BASE: usize = std::mem::size_of::<HeapEntry>();
        BASE + match self {
            Self::Object(obj) => obj.estimate_size(),
            Self::Str(s) => s.len(),
            Self::Array(a) => a.len() * std::mem::size_of::<Value>(),
            Self::Function(_) => 0,
            Self::Frame(f) => f.estimate_size(),
        }
    }

    /// Pushes the heap ids this object refers to onto the mark work list.
    fn collect_child_ids(&self, work_list: &mut Vec<HeapId>) {
        match self {
            Self::Str(_) => {}
            Self::Object(obj) => obj.collect_refs(work_list),
            Self::Array(a) => a.collect_refs(work_list),
            Self::Function(f) => f.collect_refs(work_list),
            Self::Frame(f) => f.collect_refs(work_list),
        }
    }
}

/// One arena slot: the object header (mark bit, age counter) plus the
/// kind-specific payload.
#[derive(Debug)]
struct HeapEntry {
    /// Set during the mark phase, cleared on survivors during sweep.
    marked: bool,
    /// Number of collection cycles survived.
    age: u32,
    data: HeapData,
}

/// Snapshot of heap state at a point in time.
///
/// The `objects_by_kind` map uses `BTreeMap` for deterministic iteration
/// order, making snapshots suitable for display and comparison without sort
/// overhead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    /// Total number of live objects on the heap.
    pub live_objects: usize,
    /// Number of free (recycled) slots available for reuse.
    pub free_slots: usize,
    /// Total arena capacity (live + free).
    pub total_slots: usize,
    /// Breakdown of live objects by heap kind name.
    pub objects_by_kind: BTreeMap<&'static str, usize>,
    /// Estimated live bytes.
    pub live_bytes: usize,
}

/// Token for a pin scope (see [`Heap::push_pin_scope`]).
///
/// Pin scopes are strictly nested; releasing them out of order is a
/// programmer error in native code and terminates the VM.
#[derive(Debug)]
#[must_use = "a pin scope must be released with Heap::pop_pin_scope"]
pub struct PinScope {
    depth: usize,
}

/// Arena that backs all heap-allocated runtime values.
///
/// Uses a free list to reuse slots from swept objects, keeping memory usage
/// flat for long-running loops that repeatedly allocate and discard values.
///
/// Generic over `T: ResourceTracker` to support different accounting
/// strategies. When `T = NoLimitTracker` (the default), the ceiling checks
/// compile away to no-ops.
#[derive(Debug)]
pub(crate) struct Heap<T: ResourceTracker> {
    entries: Vec<Option<HeapEntry>>,
    /// IDs of freed slots available for reuse. Populated by sweep, consumed by
    /// `allocate`.
    free_list: Vec<HeapId>,
    /// Resource tracker for enforcing limits and tuning GC.
    tracker: T,
    /// Bytes allocated since the last collection; compared against the
    /// tracker's soft threshold at safe points.
    bytes_since_gc: usize,
    /// Estimated live bytes.
    live_bytes: usize,
    /// Stack of pin scopes registered by native code. Every value pinned in an
    /// active scope is a GC root.
    pin_stack: Vec<Vec<Value>>,
}

impl<T: ResourceTracker> Heap<T> {
    pub fn new(tracker: T) -> Self {
        Self {
            entries: Vec::new(),
            free_list: Vec::new(),
            tracker,
            bytes_since_gc: 0,
            live_bytes: 0,
            pin_stack: Vec::new(),
        }
    }

    /// Allocates a new heap entry.
    ///
    /// Returns `Err(ResourceError)` if the tracker refuses the allocation;
    /// the interpreter turns that into `EOutOfMemory` through the raise path.
    pub fn allocate(&mut self, data: HeapData) -> Result<HeapId, ResourceError> {
        let size = data.estimate_size();
        self.tracker.on_allocate(size)?;
        self.bytes_since_gc = self.bytes_since_gc.saturating_add(size);
        self.live_bytes = self.live_bytes.saturating_add(size);

        let new_entry = HeapEntry {
            marked: false,
            age: 0,
            data,
        };

        let id = if let Some(id) = self.free_list.pop() {
            self.entries[id.index()] = Some(new_entry);
            id
        } else {
            let id = HeapId(self.entries.len());
            self.entries.push(Some(new_entry));
            id
        };
        Ok(id)
    }

    /// Returns a reference to the heap data for an id.
    ///
    /// # Panics
    /// Panics if the id is invalid or the object has been swept. Ids only
    /// reach this method through rooted values, so either case is a VM bug.
    pub fn get(&self, id: HeapId) -> &HeapData {
        &self
            .entries
            .get(id.index())
            .expect("Heap::get: slot missing")
            .as_ref()
            .expect("Heap::get: object already freed")
            .data
    }

    /// Returns a mutable reference to the heap data for an id.
    ///
    /// # Panics
    /// Panics under the same conditions as [`Heap::get`].
    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self
            .entries
            .get_mut(id.index())
            .expect("Heap::get_mut: slot missing")
            .as_mut()
            .expect("Heap::get_mut: object already freed")
            .data
    }

    /// Kind name for diagnostics (`"Object"`, `"String"`, ...).
    pub fn kind_name(&self, id: HeapId) -> &'static str {
        self.get(id).kind_name()
    }

    /// Describes a value for error messages: immediates by their own kind,
    /// references by their heap kind.
    pub fn describe(&self, value: Value) -> &'static str {
        match value {
            Value::Ref(id) => self.kind_name(id),
            other => other.immediate_kind(),
        }
    }

    // ------------------------------------------------------------------
    // Pin scopes
    // ------------------------------------------------------------------

    /// Opens a pin scope. Values pinned while the scope is active are GC
    /// roots until [`Heap::pop_pin_scope`] releases it.
    pub fn push_pin_scope(&mut self) -> PinScope {
        self.pin_stack.push(Vec::new());
        PinScope {
            depth: self.pin_stack.len(),
        }
    }

    /// Registers a value in the given pin scope.
    ///
    /// # Panics
    /// Panics if `scope` is not the innermost active scope; pin scopes are
    /// strictly nested.
    pub fn pin(&mut self, scope: &PinScope, value: Value) {
        assert_eq!(
            scope.depth,
            self.pin_stack.len(),
            "pin used with a scope that is not the innermost one"
        );
        self.pin_stack.last_mut().expect("no active pin scope").push(value);
    }

    /// Releases a pin scope.
    ///
    /// # Panics
    /// Panics if scopes are released out of order.
    pub fn pop_pin_scope(&mut self, scope: PinScope) {
        assert_eq!(
            scope.depth,
            self.pin_stack.len(),
            "pin scopes must be released in LIFO order"
        );
        self.pin_stack.pop();
    }

    // ------------------------------------------------------------------
    // Garbage collection
    // ------------------------------------------------------------------

    /// True when enough has been allocated since the last collection that the
    /// next safe point should collect.
    pub fn should_collect(&self) -> bool {
        self.bytes_since_gc >= self.tracker.gc_trigger_bytes()
    }

    /// Runs a stop-the-world mark-and-sweep cycle.
    ///
    /// `roots` are the ids reachable from the interpreter: every live frame,
    /// every module scope, and the globals registry. Pinned values are added
    /// internally. Returns the number of objects freed.
    pub fn collect_garbage(&mut self, roots: &[HeapId]) -> usize {
        // Mark phase: breadth-first from the roots, setting the mark bit on
        // each entry the first time it is reached.
        let mut work_list: Vec<HeapId> = roots.to_vec();
        for scope in &self.pin_stack {
            for value in scope {
                if let Value::Ref(id) = value {
                    work_list.push(*id);
                }
            }
        }

        while let Some(id) = work_list.pop() {
            let Some(Some(entry)) = self.entries.get_mut(id.index()) else {
                continue;
            };
            if entry.marked {
                continue;
            }
            entry.marked = true;
            entry.data.collect_child_ids(&mut work_list);
        }

        // Sweep phase: free unmarked entries, clear the mark bit and bump the
        // age counter on survivors.
        let mut freed = 0;
        for (index, slot) in self.entries.iter_mut().enumerate() {
            match slot {
                Some(entry) if entry.marked => {
                    entry.marked = false;
                    entry.age = entry.age.saturating_add(1);
                }
                Some(_) => {
                    let entry = slot.take().expect("entry vanished mid-sweep");
                    let size = entry.data.estimate_size();
                    self.tracker.on_free(size);
                    self.live_bytes = self.live_bytes.saturating_sub(size);
                    self.free_list.push(HeapId(index));
                    freed += 1;
                }
                None => {}
            }
        }

        self.bytes_since_gc = 0;
        freed
    }

    /// Number of live objects.
    pub fn live_objects(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn stats(&self) -> HeapStats {
        let mut objects_by_kind: BTreeMap<&'static str, usize> = BTreeMap::new();
        let mut live_objects = 0;
        for entry in self.entries.iter().flatten() {
            live_objects += 1;
            *objects_by_kind.entry(entry.data.kind_name()).or_insert(0) += 1;
        }
        HeapStats {
            live_objects,
            free_slots: self.free_list.len(),
            total_slots: self.entries.len(),
            objects_by_kind,
            live_bytes: self.live_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NoLimitTracker;

    fn heap() -> Heap<NoLimitTracker> {
        Heap::new(NoLimitTracker)
    }

    #[test]
    fn allocate_and_read_back() {
        let mut heap = heap();
        let id = heap.allocate(HeapData::Str(SepStr::new("hello"))).unwrap();
        match heap.get(id) {
            HeapData::Str(s) => assert_eq!(s.as_str(), "hello"),
            other => panic!("wrong kind: {}", other.kind_name()),
        }
    }

    #[test]
    fn unrooted_objects_are_swept_and_slots_recycled() {
        let mut heap = heap();
        let keep = heap.allocate(HeapData::Str(SepStr::new("keep"))).unwrap();
        let drop_a = heap.allocate(HeapData::Str(SepStr::new("a"))).unwrap();
        let drop_b = heap.allocate(HeapData::Array(SepArray::default())).unwrap();

        let freed = heap.collect_garbage(&[keep]);
        assert_eq!(freed, 2);
        assert_eq!(heap.live_objects(), 1);

        // Freed slots are recycled before the arena grows.
        let reused = heap.allocate(HeapData::Str(SepStr::new("new"))).unwrap();
        assert!(reused == drop_a || reused == drop_b);
        assert_eq!(heap.stats().total_slots, 3);
    }

    #[test]
    fn arrays_keep_their_elements_alive() {
        let mut heap = heap();
        let inner = heap.allocate(HeapData::Str(SepStr::new("inner"))).unwrap();
        let array = heap
            .allocate(HeapData::Array(SepArray::from_values(vec![Value::Ref(inner)])))
            .unwrap();

        let freed = heap.collect_garbage(&[array]);
        assert_eq!(freed, 0);
        assert_eq!(heap.live_objects(), 2);
    }

    #[test]
    fn pinned_values_survive_collection() {
        let mut heap = heap();
        let scope = heap.push_pin_scope();
        let id = heap.allocate(HeapData::Str(SepStr::new("pinned"))).unwrap();
        heap.pin(&scope, Value::Ref(id));

        assert_eq!(heap.collect_garbage(&[]), 0);
        assert_eq!(heap.live_objects(), 1);

        heap.pop_pin_scope(scope);
        assert_eq!(heap.collect_garbage(&[]), 1);
        assert_eq!(heap.live_objects(), 0);
    }

    #[test]
    fn survivors_age_across_cycles() {
        let mut heap = heap();
        let id = heap.allocate(HeapData::Str(SepStr::new("old"))).unwrap();
        heap.collect_garbage(&[id]);
        heap.collect_garbage(&[id]);
        let entry = heap.entries[id.index()].as_ref().unwrap();
        assert_eq!(entry.age, 2);
        assert!(!entry.marked);
    }

    #[test]
    #[should_panic(expected = "LIFO order")]
    fn out_of_order_pin_release_is_fatal() {
        let mut heap = heap();
        let outer = heap.push_pin_scope();
        let _inner = heap.push_pin_scope();
        heap.pop_pin_scope(outer);
    }
}
