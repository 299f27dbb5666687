//! The prototype object model: slot tables, prototype lists, and C3
//! resolution.
//!
//! Property lookup on an object consults its C3 linearization; the first
//! object in the chain whose slot table contains the name wins. Linearizations
//! are computed lazily on first lookup and cached; the cache records the
//! prototype-list version of every object it was built from, so any prototype
//! mutation anywhere in the ancestry invalidates dependents on their next
//! lookup without bookkeeping on the mutation path.

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::{
    exceptions::{ExcType, SepResult},
    function::BuiltinFunction,
    heap::{Heap, HeapData, HeapId},
    intern::StringId,
    resource::ResourceTracker,
    value::Value,
};

/// The storage cell for a named property.
///
/// Modeled as a tagged variant with a common read/write contract rather than
/// a trait hierarchy: the interpreter switches on the variant at the two
/// places that matter (property read, property write) and everything else
/// treats slots uniformly.
#[derive(Debug, Clone)]
pub(crate) enum Slot {
    /// Plain data. Reads return the value, writes replace it.
    Field(Value),
    /// Holds a function reference. Reads return the function bound to the
    /// receiver; writes copy a plain field down onto the receiver.
    Method(Value),
    /// References a native function directly.
    Builtin(BuiltinFunction),
    /// Getter/setter pair. Reads call the getter; writes call the setter, or
    /// raise when there is none.
    Property { getter: Value, setter: Option<Value> },
}

impl Slot {
    /// The values stored in this slot, for GC tracing.
    fn collect_refs(&self, work_list: &mut Vec<HeapId>) {
        match self {
            Self::Field(v) | Self::Method(v) => {
                if let Value::Ref(id) = v {
                    work_list.push(*id);
                }
            }
            Self::Builtin(_) => {}
            Self::Property { getter, setter } => {
                if let Value::Ref(id) = getter {
                    work_list.push(*id);
                }
                if let Some(Value::Ref(id)) = setter {
                    work_list.push(*id);
                }
            }
        }
    }
}

/// Cached C3 resolution order with the version stamps it was built from.
#[derive(Debug, Clone)]
struct Linearization {
    order: Vec<HeapId>,
    /// `(object, proto_version)` for every object in `order`. The cache is
    /// valid only while every stamp still matches.
    stamps: Vec<(HeapId, u64)>,
}

/// A September object: slots plus prototypes.
#[derive(Debug, Default)]
pub(crate) struct SepObject {
    /// Insertion order is preserved for iteration.
    slots: IndexMap<StringId, Slot>,
    /// Basis list for C3 linearization. Each entry must be a reference to
    /// another object.
    prototypes: SmallVec<[Value; 2]>,
    /// Bumped on every mutation of `prototypes`.
    proto_version: u64,
    linearization: Option<Linearization>,
}

impl SepObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prototypes(prototypes: impl IntoIterator<Item = Value>) -> Self {
        Self {
            prototypes: prototypes.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn get_slot(&self, name: StringId) -> Option<&Slot> {
        self.slots.get(&name)
    }

    /// Creates or replaces a slot directly on this object. No prototype walk.
    pub fn set_slot(&mut self, name: StringId, slot: Slot) {
        self.slots.insert(name, slot);
    }

    pub fn has_slot(&self, name: StringId) -> bool {
        self.slots.contains_key(&name)
    }

    /// Slot names in insertion order.
    pub fn slot_names(&self) -> impl Iterator<Item = StringId> + '_ {
        self.slots.keys().copied()
    }

    pub fn prototypes(&self) -> &[Value] {
        &self.prototypes
    }

    /// Replaces the prototype list, invalidating this object's cached
    /// linearization and (through version stamps) every dependent cache.
    pub fn set_prototypes(&mut self, prototypes: impl IntoIterator<Item = Value>) {
        self.prototypes = prototypes.into_iter().collect();
        self.invalidate();
    }

    pub fn add_prototype(&mut self, prototype: Value) {
        self.prototypes.push(prototype);
        self.invalidate();
    }

    fn invalidate(&mut self) {
        self.proto_version += 1;
        self.linearization = None;
    }

    pub fn proto_version(&self) -> u64 {
        self.proto_version
    }

    /// GC trace: slot values, prototypes, and the cached linearization. The
    /// cache is traced so that resolution-order ancestors stay alive exactly
    /// as long as something can still look through them.
    pub fn collect_refs(&self, work_list: &mut Vec<HeapId>) {
        for slot in self.slots.values() {
            slot.collect_refs(work_list);
        }
        for proto in &self.prototypes {
            if let Value::Ref(id) = proto {
                work_list.push(*id);
            }
        }
        if let Some(lin) = &self.linearization {
            work_list.extend(lin.order.iter().copied());
        }
    }

    pub fn estimate_size(&self) -> usize {
        self.slots.len() * (std::mem::size_of::<Slot>() + std::mem::size_of::<StringId>())
            + self.prototypes.len() * std::mem::size_of::<Value>()
            + self
                .linearization
                .as_ref()
                .map_or(0, |l| l.order.len() * 3 * std::mem::size_of::<HeapId>())
    }
}

/// Returns the C3 linearization of `id`, computing and caching it on demand.
///
/// The result always begins with `id` itself. Fails with `ECannotLinearize`
/// when the prototype graph has no consistent ordering (or contains a
/// prototype cycle), and with `EWrongType` when a prototype entry is not an
/// object reference.
pub(crate) fn linearize<T: ResourceTracker>(heap: &mut Heap<T>, id: HeapId) -> SepResult<Vec<HeapId>> {
    let mut visiting = Vec::new();
    linearize_inner(heap, id, &mut visiting)
}

fn linearize_inner<T: ResourceTracker>(
    heap: &mut Heap<T>,
    id: HeapId,
    visiting: &mut Vec<HeapId>,
) -> SepResult<Vec<HeapId>> {
    if let Some(order) = cached_order(heap, id) {
        return Ok(order);
    }
    if visiting.contains(&id) {
        // A prototype cycle has no linearization.
        return Err(ExcType::cannot_linearize());
    }
    visiting.push(id);

    let prototypes = prototype_ids(heap, id)?;

    let mut sequences: Vec<Vec<HeapId>> = Vec::with_capacity(prototypes.len() + 1);
    for &proto in &prototypes {
        sequences.push(linearize_inner(heap, proto, visiting)?);
    }
    sequences.push(prototypes);

    let mut order = vec![id];
    order.extend(c3_merge(sequences)?);

    let stamps = order
        .iter()
        .map(|&obj| (obj, object_version(heap, obj)))
        .collect::<Vec<_>>();
    if let HeapData::Object(obj) = heap.get_mut(id) {
        obj.linearization = Some(Linearization {
            order: order.clone(),
            stamps,
        });
    }

    visiting.pop();
    Ok(order)
}

/// The cached order for `id`, if present and still valid under its stamps.
fn cached_order<T: ResourceTracker>(heap: &Heap<T>, id: HeapId) -> Option<Vec<HeapId>> {
    let HeapData::Object(obj) = heap.get(id) else {
        return None;
    };
    let lin = obj.linearization.as_ref()?;
    let valid = lin.stamps.iter().all(|&(obj_id, version)| match heap.get(obj_id) {
        HeapData::Object(o) => o.proto_version == version,
        _ => false,
    });
    valid.then(|| lin.order.clone())
}

/// The prototype list of `id` as object ids, validating each entry.
fn prototype_ids<T: ResourceTracker>(heap: &Heap<T>, id: HeapId) -> SepResult<Vec<HeapId>> {
    let HeapData::Object(obj) = heap.get(id) else {
        return Err(ExcType::wrong_type("an Object", heap.kind_name(id)));
    };
    obj.prototypes()
        .iter()
        .map(|proto| match proto {
            Value::Ref(proto_id) if matches!(heap.get(*proto_id), HeapData::Object(_)) => Ok(*proto_id),
            other => Err(ExcType::wrong_type("an Object prototype", heap.describe(*other))),
        })
        .collect()
}

fn object_version<T: ResourceTracker>(heap: &Heap<T>, id: HeapId) -> u64 {
    match heap.get(id) {
        HeapData::Object(obj) => obj.proto_version,
        _ => 0,
    }
}

/// The C3 merge: repeatedly take the head of the first list whose head does
/// not appear in the tail of any other list.
fn c3_merge(mut sequences: Vec<Vec<HeapId>>) -> SepResult<Vec<HeapId>> {
    let mut result = Vec::new();
    loop {
        sequences.retain(|s| !s.is_empty());
        if sequences.is_empty() {
            return Ok(result);
        }

        let mut good_head = None;
        for seq in &sequences {
            let candidate = seq[0];
            let in_tail = sequences.iter().any(|other| other[1..].contains(&candidate));
            if !in_tail {
                good_head = Some(candidate);
                break;
            }
        }

        let Some(next) = good_head else {
            return Err(ExcType::cannot_linearize());
        };
        result.push(next);
        for seq in &mut sequences {
            if seq.first() == Some(&next) {
                seq.remove(0);
            }
        }
    }
}

/// Resolves a property through the receiver's linearization.
///
/// Returns the owning object and a copy of the winning slot, or `None` on a
/// complete miss.
pub(crate) fn resolve_slot<T: ResourceTracker>(
    heap: &mut Heap<T>,
    receiver: HeapId,
    name: StringId,
) -> SepResult<Option<(HeapId, Slot)>> {
    let order = linearize(heap, receiver)?;
    for owner in order {
        if let HeapData::Object(obj) = heap.get(owner)
            && let Some(slot) = obj.get_slot(name)
        {
            return Ok(Some((owner, slot.clone())));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{exceptions::ExcType, resource::NoLimitTracker};

    fn heap() -> Heap<NoLimitTracker> {
        Heap::new(NoLimitTracker)
    }

    fn object<T: ResourceTracker>(heap: &mut Heap<T>, prototypes: &[HeapId]) -> HeapId {
        let obj = SepObject::with_prototypes(prototypes.iter().map(|&id| Value::Ref(id)));
        heap.allocate(HeapData::Object(obj)).unwrap()
    }

    #[test]
    fn diamond_linearizes_in_c3_order() {
        let mut heap = heap();
        let a = object(&mut heap, &[]);
        let b = object(&mut heap, &[a]);
        let c = object(&mut heap, &[a]);
        let d = object(&mut heap, &[b, c]);

        assert_eq!(linearize(&mut heap, d).unwrap(), vec![d, b, c, a]);
    }

    #[test]
    fn linearization_starts_with_the_object_itself() {
        let mut heap = heap();
        let a = object(&mut heap, &[]);
        assert_eq!(linearize(&mut heap, a).unwrap(), vec![a]);
    }

    #[test]
    fn inconsistent_hierarchies_fail_to_linearize() {
        let mut heap = heap();
        let a = object(&mut heap, &[]);
        let b = object(&mut heap, &[]);
        // c requires a before b, d requires b before a - each is fine alone,
        // but no consistent order exists once both ancestries merge.
        let c = object(&mut heap, &[a, b]);
        let d = object(&mut heap, &[b, a]);
        let e = object(&mut heap, &[c, d]);

        let err = linearize(&mut heap, e).unwrap_err();
        assert!(err.is_exception_type(ExcType::ECannotLinearize));
    }

    #[test]
    fn prototype_cycles_fail_to_linearize() {
        let mut heap = heap();
        let a = object(&mut heap, &[]);
        let b = object(&mut heap, &[a]);
        match heap.get_mut(a) {
            HeapData::Object(obj) => obj.add_prototype(Value::Ref(b)),
            _ => unreachable!(),
        }

        let err = linearize(&mut heap, b).unwrap_err();
        assert!(err.is_exception_type(ExcType::ECannotLinearize));
    }

    #[test]
    fn ancestor_mutation_invalidates_cached_linearizations() {
        let mut heap = heap();
        let a = object(&mut heap, &[]);
        let b = object(&mut heap, &[a]);
        let c = object(&mut heap, &[b]);
        assert_eq!(linearize(&mut heap, c).unwrap(), vec![c, b, a]);

        // Splice a new ancestor into b. c's cached order must be rebuilt.
        let x = object(&mut heap, &[]);
        match heap.get_mut(b) {
            HeapData::Object(obj) => obj.set_prototypes([Value::Ref(x)]),
            _ => unreachable!(),
        }
        assert_eq!(linearize(&mut heap, c).unwrap(), vec![c, b, x]);
    }

    #[test]
    fn resolution_picks_the_earliest_owner() {
        let mut heap = heap();
        let name = StringId::from_ascii(b'x');
        let a = object(&mut heap, &[]);
        let b = object(&mut heap, &[a]);
        let c = object(&mut heap, &[b]);
        for (id, v) in [(a, 1), (b, 2)] {
            match heap.get_mut(id) {
                HeapData::Object(obj) => obj.set_slot(name, Slot::Field(Value::Int(v))),
                _ => unreachable!(),
            }
        }

        let (owner, slot) = resolve_slot(&mut heap, c, name).unwrap().unwrap();
        assert_eq!(owner, b);
        assert!(matches!(slot, Slot::Field(Value::Int(2))));
    }

    #[test]
    fn slots_iterate_in_insertion_order() {
        let mut obj = SepObject::new();
        let names: Vec<StringId> = [b'z', b'a', b'm'].iter().map(|&b| StringId::from_ascii(b)).collect();
        for &name in &names {
            obj.set_slot(name, Slot::Field(Value::Nothing));
        }
        assert_eq!(obj.slot_names().collect::<Vec<_>>(), names);
    }
}
