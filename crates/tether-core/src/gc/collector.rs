//! Mark-sweep garbage collector
//!
//! One collection runs these phases over a [`Heap`]:
//!
//! 1. mark everything reachable from the [`RootSet`], skipping the weak side
//!    of tables whose metatable declares `__mode`
//! 2. pick unreachable userdata that carry a `__gc` metamethod and were not
//!    finalized yet
//! 3. clear weak entries that refer to unreachable objects
//! 4. resurrect the objects picked in step 2 (plus everything they reach) and
//!    flag them as finalized
//! 5. sweep unmarked objects and purge table tombstones
//!
//! Finalizers are not run here. The objects from step 2 are handed back to the
//! caller, which runs them at a safe point.

use super::heap::{GcObject, GcRef, Heap};
use super::roots::RootSet;
use crate::table::{Table, TableKey};
use crate::value::Value;
use std::time::{Duration, Instant};

/// Garbage collector statistics
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    /// Total number of collections
    pub collections: usize,

    /// Total objects freed
    pub objects_freed: usize,

    /// Total userdata scheduled for finalization
    pub finalizers_scheduled: usize,

    /// Objects alive after the last collection
    pub live_objects: usize,

    /// Total pause time
    pub total_pause_time: Duration,

    /// Last collection duration
    pub last_pause_time: Duration,
}

/// Outcome of one collection
#[derive(Debug, Default)]
pub struct Collection {
    /// Userdata whose finalizer must run, in allocation order
    pub to_finalize: Vec<GcRef>,

    /// Objects removed from the heap; dropping them releases native payloads
    pub freed: Vec<GcObject>,

    /// Objects alive after the sweep
    pub survivors: usize,
}

/// Run a full collection
pub fn collect(heap: &mut Heap, roots: &RootSet, stats: &mut GcStats) -> Collection {
    let start = Instant::now();

    heap.clear_marks();
    let mut weak = Vec::new();
    mark(heap, roots.refs().to_vec(), &mut weak);

    let to_finalize: Vec<GcRef> = heap
        .live_refs()
        .into_iter()
        .filter(|r| !heap.is_marked(*r) && needs_finalizer(&*heap, *r))
        .collect();

    clear_weak_entries(heap, &weak);

    let mut resurrected_weak = Vec::new();
    mark(heap, to_finalize.clone(), &mut resurrected_weak);
    for r in &to_finalize {
        if let Some(u) = heap.userdata_mut(*r) {
            u.finalized = true;
        }
    }

    let mut freed = Vec::new();
    for r in heap.live_refs() {
        if heap.is_marked(r) {
            if let Some(t) = heap.table_mut(r) {
                t.purge_tombstones();
            }
        } else if let Some(obj) = heap.free(r) {
            freed.push(obj);
        }
    }
    heap.clear_marks();

    let duration = start.elapsed();
    stats.collections += 1;
    stats.objects_freed += freed.len();
    stats.finalizers_scheduled += to_finalize.len();
    stats.live_objects = heap.live_count();
    stats.last_pause_time = duration;
    stats.total_pause_time += duration;

    Collection {
        to_finalize,
        freed,
        survivors: heap.live_count(),
    }
}

/// Weak table recorded during marking: (table, weak keys, weak values)
type WeakTable = (GcRef, bool, bool);

fn mark(heap: &mut Heap, mut worklist: Vec<GcRef>, weak: &mut Vec<WeakTable>) {
    let mut children = Vec::new();
    while let Some(r) = worklist.pop() {
        if !heap.mark(r) {
            continue;
        }
        children.clear();
        match heap.get(r) {
            Some(GcObject::Table(t)) => {
                let (weak_keys, weak_values) = weak_mode(&*heap, t);
                if weak_keys || weak_values {
                    weak.push((r, weak_keys, weak_values));
                }
                children.extend(t.metatable());
                for (k, v) in t.iter() {
                    if !weak_keys {
                        children.extend(k.as_gc());
                    }
                    if !weak_values {
                        children.extend(v.as_gc());
                    }
                }
            }
            Some(GcObject::Function(f)) => {
                children.extend(f.upvalues.iter().filter_map(Value::as_gc));
            }
            Some(GcObject::Userdata(u)) => {
                children.extend(u.metatable);
                children.extend(u.user_value.as_gc());
            }
            None => {}
        }
        worklist.extend(children.iter().copied());
    }
}

/// `__mode` of a table's metatable
fn weak_mode(heap: &Heap, table: &Table) -> (bool, bool) {
    let mode = table
        .metatable()
        .and_then(|mt| heap.table(mt))
        .map(|mt| mt.get_str("__mode"));
    match mode {
        Some(Value::String(s)) => (s.as_bytes().contains(&b'k'), s.as_bytes().contains(&b'v')),
        _ => (false, false),
    }
}

pub(crate) fn needs_finalizer(heap: &Heap, r: GcRef) -> bool {
    let Some(u) = heap.userdata(r) else {
        return false;
    };
    if u.finalized {
        return false;
    }
    u.metatable
        .and_then(|mt| heap.table(mt))
        .map_or(false, |mt| matches!(mt.get_str("__gc"), Value::Function(_)))
}

fn clear_weak_entries(heap: &mut Heap, weak: &[WeakTable]) {
    for &(r, weak_keys, weak_values) in weak {
        let dead: Vec<TableKey> = match heap.table(r) {
            Some(t) => t
                .iter()
                .filter(|(k, v)| {
                    let dead_key = weak_keys && k.as_gc().map_or(false, |g| !heap.is_marked(g));
                    let dead_value =
                        weak_values && v.as_gc().map_or(false, |g| !heap.is_marked(g));
                    dead_key || dead_value
                })
                .map(|(k, _)| k.clone())
                .collect(),
            None => continue,
        };
        if let Some(t) = heap.table_mut(r) {
            for k in dead {
                t.set_key(k, Value::Nil);
            }
        }
    }
}
