//! VM execution tracing infrastructure.
//!
//! Provides a trait-based tracing system for the interpreter with zero-cost
//! abstraction. When using [`NoopTracer`], all trace methods compile away
//! entirely via monomorphization — identical to how
//! [`NoLimitTracker`](crate::resource::NoLimitTracker) eliminates resource
//! checking overhead in production.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Zero-cost no-op (production default) |
//! | [`StderrTracer`] | Human-readable execution log to stderr |
//! | [`ProfilingTracer`] | Opcode frequency counters, call depth, GC counts |

use ahash::AHashMap;

use crate::bytecode::Opcode;

/// Hook points at key execution events.
///
/// Every method has a no-op default, so implementations only override what
/// they care about. The interpreter is parameterized over the tracer type and
/// calls these at instruction dispatch, frame transitions, exception flow, and
/// GC cycles.
pub trait VmTracer {
    /// An opcode is about to be dispatched.
    fn on_instruction(&mut self, _ip: usize, _opcode: Opcode, _stack_depth: usize) {}

    /// A frame was pushed; `depth` is the call stack depth after the push.
    fn on_frame_push(&mut self, _depth: usize) {}

    /// A frame was popped; `depth` is the call stack depth after the pop.
    fn on_frame_pop(&mut self, _depth: usize) {}

    /// An exception began propagating.
    fn on_raise(&mut self, _exc_name: &str) {}

    /// A handler caught the propagating exception at `target` in some frame.
    fn on_catch(&mut self, _target: usize) {}

    /// A collection cycle finished.
    fn on_gc(&mut self, _freed: usize, _live: usize) {}
}

/// Zero-cost no-op tracer (production default).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Human-readable execution log to stderr. Debugging only; very noisy.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrTracer;

impl VmTracer for StderrTracer {
    fn on_instruction(&mut self, ip: usize, opcode: Opcode, stack_depth: usize) {
        eprintln!("[vm] {ip:>5}  {opcode:?} (stack {stack_depth})");
    }

    fn on_frame_push(&mut self, depth: usize) {
        eprintln!("[vm] >> frame push, depth {depth}");
    }

    fn on_frame_pop(&mut self, depth: usize) {
        eprintln!("[vm] << frame pop, depth {depth}");
    }

    fn on_raise(&mut self, exc_name: &str) {
        eprintln!("[vm] !! raise {exc_name}");
    }

    fn on_catch(&mut self, target: usize) {
        eprintln!("[vm] !! caught, handler at {target}");
    }

    fn on_gc(&mut self, freed: usize, live: usize) {
        eprintln!("[vm] gc: freed {freed}, live {live}");
    }
}

/// Collects opcode frequencies, peak call depth, and GC cycle counts.
#[derive(Debug, Default)]
pub struct ProfilingTracer {
    /// Dispatch count per opcode.
    opcode_counts: AHashMap<Opcode, u64>,
    /// Total instructions dispatched.
    instructions: u64,
    /// Deepest call stack observed.
    peak_depth: usize,
    /// Completed GC cycles.
    gc_cycles: u64,
}

impl ProfilingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth
    }

    #[must_use]
    pub fn gc_cycles(&self) -> u64 {
        self.gc_cycles
    }

    /// Opcode dispatch counts, most frequent first.
    #[must_use]
    pub fn hottest_opcodes(&self) -> Vec<(Opcode, u64)> {
        let mut counts: Vec<_> = self.opcode_counts.iter().map(|(&op, &n)| (op, n)).collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        counts
    }
}

impl VmTracer for ProfilingTracer {
    fn on_instruction(&mut self, _ip: usize, opcode: Opcode, _stack_depth: usize) {
        *self.opcode_counts.entry(opcode).or_insert(0) += 1;
        self.instructions += 1;
    }

    fn on_frame_push(&mut self, depth: usize) {
        self.peak_depth = self.peak_depth.max(depth);
    }

    fn on_gc(&mut self, _freed: usize, _live: usize) {
        self.gc_cycles += 1;
    }
}
