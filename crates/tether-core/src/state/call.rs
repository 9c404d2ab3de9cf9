//! Calls, protected calls, collection and shutdown
//!
//! Error handling follows one rule: the message handler installed by the
//! innermost [`State::pcall`] runs exactly once per error, at the point where
//! the error first crosses a call boundary, while the failing frames are still
//! on the frame stack. That lets handlers produce a traceback of the failure
//! site before `pcall` unwinds the stack back to its entry depth.

use super::State;
use crate::gc::{collector, GcRef, RootSet};
use crate::stack::CallFrame;
use crate::value::Value;
use crate::{Status, VmError, VmResult};
use tracing::{debug, warn};

impl State {
    // ========================================================================
    // Calls
    // ========================================================================

    /// Call the function below the top `nargs` values
    ///
    /// The function and its arguments are replaced by its results, adjusted
    /// to `nresults` when given. Errors propagate without restoring the stack;
    /// use [`pcall`](State::pcall) for a protected call.
    pub fn call(&self, nargs: usize, nresults: Option<usize>) -> VmResult<()> {
        if self.is_closed() {
            return Err(VmError::runtime("attempt to call into a closed state"));
        }
        self.run_pending_finalizers();
        self.call_inner(nargs, nresults)
            .map_err(|e| self.handle_error(e))
    }

    fn call_inner(&self, mut nargs: usize, nresults: Option<usize>) -> VmResult<()> {
        let func_slot = {
            let stack = self.stack();
            if stack.top() < nargs + 1 {
                return Err(VmError::runtime("not enough values on the stack for call"));
            }
            stack.len() - nargs - 1
        };

        let mut callee = self.stack().slots()[func_slot].clone();
        if !matches!(callee, Value::Function(_)) {
            let handler = self.metafield_of(&callee, "__call");
            if !matches!(handler, Value::Function(_)) {
                return Err(VmError::runtime(format!(
                    "attempt to call a {} value",
                    callee.type_name()
                )));
            }
            let mut stack = self.stack_mut();
            let pos = func_slot as i32 - stack.base() as i32 + 1;
            stack.push(handler.clone());
            stack.insert(pos);
            nargs += 1;
            callee = handler;
        }

        let (func, name) = match &callee {
            Value::Function(r) => match self.heap().function(*r) {
                Some(f) => (f.func.clone(), f.name.clone()),
                None => return Err(VmError::runtime("attempt to call a dead function")),
            },
            _ => return Err(VmError::runtime("attempt to call a non-function value")),
        };

        {
            let mut stack = self.stack_mut();
            stack.check_overflow()?;
            stack.push_frame(CallFrame::new(func_slot + 1, callee, name));
        }
        debug_assert_eq!(self.top() as usize, nargs);

        let outcome = func(self).map_err(|e| self.handle_error(e));

        let mut stack = self.stack_mut();
        stack.pop_frame();
        let produced = outcome?;

        let available = stack.len().saturating_sub(func_slot + 1);
        let count = produced.min(available);
        let start = stack.len() - count;
        let mut results = stack.slots()[start..].to_vec();
        stack.truncate(func_slot);
        if let Some(wanted) = nresults {
            results.resize(wanted, Value::Nil);
        }
        for v in results {
            stack.push(v);
        }
        Ok(())
    }

    /// Run the active message handler over a fresh runtime error
    fn handle_error(&self, err: VmError) -> VmError {
        let value = match err {
            VmError::Runtime {
                value,
                handled: false,
            } => value,
            other => return other,
        };
        let handler = self.inner.handlers.borrow().last().cloned().flatten();
        let Some(handler) = handler else {
            return VmError::Runtime {
                value,
                handled: false,
            };
        };

        self.inner.handlers.borrow_mut().push(None);
        self.push_value(handler);
        self.push_value(value);
        let result = self.call_inner(1, Some(1));
        self.inner.handlers.borrow_mut().pop();

        match result {
            Ok(()) => VmError::Runtime {
                value: self.pop_value(),
                handled: true,
            },
            Err(_) => VmError::ErrorHandler,
        }
    }

    /// Protected call
    ///
    /// Like [`call`](State::call), but on failure the stack is restored to
    /// the depth below the called function and the error value is pushed in
    /// place of the results. `handler` is the frame index of a message handler
    /// (0 for none); it receives the original error value and its single
    /// result becomes the error value.
    pub fn pcall(&self, nargs: usize, nresults: Option<usize>, handler: i32) -> Status {
        let handler_value = (handler != 0).then(|| self.value_at(handler));
        let (func_slot, depth) = {
            let stack = self.stack();
            (stack.len().saturating_sub(nargs + 1), stack.frame_count())
        };

        self.inner.handlers.borrow_mut().push(handler_value);
        let result = self.call(nargs, nresults);
        self.inner.handlers.borrow_mut().pop();

        match result {
            Ok(()) => Status::Ok,
            Err(e) => {
                let status = e.status();
                let value = e.into_value();
                let mut stack = self.stack_mut();
                stack.truncate_frames(depth);
                stack.truncate(func_slot);
                stack.push(value);
                status
            }
        }
    }

    /// Pop the top value and turn it into a runtime error
    pub fn error(&self) -> VmError {
        VmError::from_value(self.pop_value())
    }

    /// Call trace of the active frames, innermost first, skipping `level` frames
    pub fn traceback(&self, message: Option<&str>, level: usize) -> String {
        let mut out = String::new();
        if let Some(msg) = message {
            out.push_str(msg);
            out.push('\n');
        }
        out.push_str("stack traceback:");
        let stack = self.stack();
        for frame in stack.frames().iter().rev().skip(level) {
            match &frame.name {
                Some(name) => {
                    out.push_str("\n\t[native]: in function '");
                    out.push_str(name);
                    out.push('\'');
                }
                None => out.push_str("\n\t[native]: in ?"),
            }
        }
        out
    }

    /// Number of active call frames
    pub fn call_depth(&self) -> usize {
        self.stack().frame_count()
    }

    // ========================================================================
    // Collection
    // ========================================================================

    /// Run a full collection followed by any due finalizers
    pub fn collect_garbage(&self) {
        self.full_gc();
        self.run_pending_finalizers();
    }

    pub(crate) fn full_gc(&self) {
        if self.inner.collecting.replace(true) {
            return;
        }
        let roots = self.gather_roots();
        let outcome = {
            let mut heap = self.heap_mut();
            let mut gc = self.inner.gc.borrow_mut();
            let outcome = collector::collect(&mut heap, &roots, &mut gc.stats);
            gc.threshold = self.inner.options.next_threshold(outcome.survivors);
            gc.pending.extend(outcome.to_finalize.iter().copied());
            outcome
        };
        self.inner.collecting.set(false);

        debug!(
            event = "gc",
            freed = outcome.freed.len(),
            survivors = outcome.survivors,
            finalizers = outcome.to_finalize.len(),
        );
        // Native payloads may call back into the state when dropped.
        drop(outcome);
    }

    fn gather_roots(&self) -> RootSet {
        let mut roots = RootSet::new();
        roots.add_ref(self.inner.registry);
        roots.add_ref(self.inner.globals);
        {
            let stack = self.stack();
            roots.add_values(stack.slots());
            roots.add_values(stack.frames().iter().map(|f| &f.function));
        }
        for h in self.inner.handlers.borrow().iter().flatten() {
            roots.add_value(h);
        }
        for r in self.inner.gc.borrow().pending.iter() {
            roots.add_ref(*r);
        }
        roots
    }

    /// Run queued finalizers; no-op while finalizers are already running
    pub(crate) fn run_pending_finalizers(&self) {
        if self.inner.finalizing.get() || self.inner.gc.borrow().pending.is_empty() {
            return;
        }
        self.inner.finalizing.set(true);
        loop {
            let next = self.inner.gc.borrow_mut().pending.pop_front();
            let Some(r) = next else {
                break;
            };
            self.finalize(r);
        }
        self.inner.finalizing.set(false);
    }

    fn finalize(&self, r: GcRef) {
        let object = Value::Userdata(r);
        let gc = self.metafield_of(&object, "__gc");
        if !matches!(gc, Value::Function(_)) {
            return;
        }
        self.push_value(gc);
        self.push_value(object);
        if self.pcall(1, Some(0), 0) != Status::Ok {
            let err = self.pop_value();
            warn!(event = "finalizer_failed", error = %err);
        }
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Finalize every userdata and release all objects
    ///
    /// Pending finalizers run first, then the finalizers of every remaining
    /// userdata (reachable or not), repeating until no new finalizable objects
    /// appear. Afterwards every heap object is dropped and further calls fail.
    pub fn close(&self) {
        if self.is_closed() {
            return;
        }
        self.run_pending_finalizers();
        loop {
            let due: Vec<GcRef> = {
                let mut heap = self.heap_mut();
                let due: Vec<GcRef> = heap
                    .live_refs()
                    .into_iter()
                    .filter(|r| collector::needs_finalizer(&heap, *r))
                    .collect();
                for r in &due {
                    if let Some(u) = heap.userdata_mut(*r) {
                        u.finalized = true;
                    }
                }
                due
            };
            if due.is_empty() {
                break;
            }
            self.inner.gc.borrow_mut().pending.extend(due);
            self.run_pending_finalizers();
        }

        self.inner.closed.set(true);
        self.stack_mut().clear();
        self.inner.handlers.borrow_mut().clear();
        let objects = self.heap_mut().drain();
        debug!(event = "close", released = objects.len());
        drop(objects);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_call_adjusts_results() {
        let state = State::new();
        state
            .push_function("pair", |s| {
                s.push_integer(1);
                s.push_integer(2);
                Ok(2)
            })
            .unwrap();
        state.call(0, Some(3)).unwrap();
        assert_eq!(state.top(), 3);
        assert!(state.is_nil(3));

        state.set_top(0);
        state.push_function("pair", |s| {
            s.push_integer(1);
            s.push_integer(2);
            Ok(2)
        })
        .unwrap();
        state.call(0, None).unwrap();
        assert_eq!(state.top(), 2);
    }

    #[test]
    fn test_arguments_are_frame_relative() {
        let state = State::new();
        state.push_string("below");
        state
            .push_function("sum", |s| {
                let total = s.to_integer(1).unwrap_or(0) + s.to_integer(2).unwrap_or(0);
                assert_eq!(s.top(), 2);
                s.push_integer(total);
                Ok(1)
            })
            .unwrap();
        state.push_integer(3);
        state.push_integer(4);
        state.call(2, Some(1)).unwrap();
        assert_eq!(state.top(), 2);
        assert_eq!(state.to_integer(-1), Some(7));
    }

    #[test]
    fn test_pcall_restores_stack() {
        let state = State::new();
        state.push_integer(99);
        state
            .push_function("fail", |s| {
                s.push_integer(1);
                s.push_integer(2);
                Err(VmError::runtime("boom"))
            })
            .unwrap();
        state.push_integer(5);
        assert_eq!(state.pcall(1, Some(1), 0), Status::Runtime);
        assert_eq!(state.top(), 2);
        assert_eq!(state.to_bytes(-1).unwrap().as_bytes(), b"boom");
        assert_eq!(state.call_depth(), 0);
    }

    #[test]
    fn test_pcall_message_handler_sees_failing_frame() {
        let state = State::new();
        state
            .push_function("handler", |s| {
                let msg = s.to_bytes(1).map(|b| b.to_string_lossy()).unwrap_or_default();
                let trace = s.traceback(Some(&msg), 1);
                s.push_string(&trace);
                Ok(1)
            })
            .unwrap();
        state
            .push_function("inner", |_| Err(VmError::runtime("deep failure")))
            .unwrap();
        assert_eq!(state.pcall(0, Some(0), 1), Status::Runtime);
        let msg = state.to_bytes(-1).unwrap().to_string_lossy();
        assert!(msg.starts_with("deep failure"));
        assert!(msg.contains("in function 'inner'"));
    }

    #[test]
    fn test_handler_runs_once_across_nested_calls() {
        let state = State::new();
        let runs = Rc::new(Cell::new(0));
        let counter = runs.clone();
        state
            .push_function("handler", move |s| {
                counter.set(counter.get() + 1);
                s.push_copy(1);
                Ok(1)
            })
            .unwrap();
        state
            .push_function("outer", |s| {
                s.push_function("inner", |_| Err(VmError::runtime("x")))?;
                s.call(0, Some(0))?;
                Ok(0)
            })
            .unwrap();
        assert_eq!(state.pcall(0, Some(0), 1), Status::Runtime);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_failing_handler_reports_error_handler_status() {
        let state = State::new();
        state
            .push_function("handler", |_| Err(VmError::runtime("handler broke")))
            .unwrap();
        state
            .push_function("f", |_| Err(VmError::runtime("x")))
            .unwrap();
        assert_eq!(state.pcall(0, Some(0), 1), Status::ErrorHandler);
        assert_eq!(state.top(), 2);
    }

    #[test]
    fn test_call_non_function() {
        let state = State::new();
        state.push_integer(1);
        assert_eq!(state.pcall(0, Some(0), 0), Status::Runtime);
        assert_eq!(
            state.to_bytes(-1).unwrap().as_bytes(),
            b"attempt to call a number value"
        );
    }

    #[test]
    fn test_call_metamethod() {
        let state = State::new();
        state.new_table().unwrap();
        state.new_table().unwrap();
        state
            .push_function("__call", |s| {
                s.push_integer(s.top() as i64);
                Ok(1)
            })
            .unwrap();
        state.set_field(-2, "__call").unwrap();
        state.set_metatable(-2).unwrap();
        state.push_integer(10);
        state.call(1, Some(1)).unwrap();
        // the callable table itself arrives as the first argument
        assert_eq!(state.to_integer(-1), Some(2));
    }

    #[test]
    fn test_memory_status() {
        let state = State::with_options(crate::VmOptions {
            max_objects: 3,
            ..crate::VmOptions::manual_gc()
        });
        state
            .push_function("alloc", |s| loop {
                s.new_table()?;
            })
            .unwrap();
        assert_eq!(state.pcall(0, Some(0), 0), Status::Memory);
        assert_eq!(state.top(), 1);
    }

    #[test]
    fn test_finalizer_runs_once_after_collection() {
        let state = State::with_options(crate::VmOptions::manual_gc());
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();

        state.new_userdata(Rc::new(())).unwrap();
        state.new_table().unwrap();
        state
            .push_function("__gc", move |_| {
                counter.set(counter.get() + 1);
                Ok(0)
            })
            .unwrap();
        state.set_field(-2, "__gc").unwrap();
        state.set_metatable(-2).unwrap();

        state.collect_garbage();
        assert_eq!(hits.get(), 0);

        state.set_top(0);
        state.collect_garbage();
        assert_eq!(hits.get(), 1);
        state.collect_garbage();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_close_finalizes_reachable_userdata() {
        let state = State::new();
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();

        state.new_userdata(Rc::new(())).unwrap();
        state.new_table().unwrap();
        state
            .push_function("__gc", move |_| {
                counter.set(counter.get() + 1);
                Ok(0)
            })
            .unwrap();
        state.set_field(-2, "__gc").unwrap();
        state.set_metatable(-2).unwrap();
        state.set_global("keep").unwrap();

        state.close();
        assert_eq!(hits.get(), 1);
        assert!(state.is_closed());
        state.push_nil();
        assert!(state.call(0, None).is_err());
    }

    #[test]
    fn test_traceback_format() {
        let state = State::new();
        state
            .push_function("outer", |s| {
                let trace = s.traceback(Some("msg"), 0);
                s.push_string(&trace);
                Ok(1)
            })
            .unwrap();
        state.call(0, Some(1)).unwrap();
        assert_eq!(
            state.to_bytes(-1).unwrap().as_bytes(),
            b"msg\nstack traceback:\n\t[native]: in function 'outer'"
        );
    }
}
