/// Shared scalar types for the profiling engine, plus the sampler-facing
/// `TickSample` record.
use std::sync::Mutex;
use std::time::Instant;

/// An instruction address in the runtime's generated-code space.
pub type Address = u64;

/// A point in time or a duration, in integer microseconds.
pub type Micros = u64;

/// Source line numbers are 1-based; zero means "unknown".
pub const NO_LINE_NUMBER_INFO: u32 = 0;

/// Script ids are positive; zero means "not a script function".
pub const NO_SCRIPT_ID: i32 = 0;

/// What the VM was doing when a sample was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Js,
    GarbageCollector,
    Parser,
    BytecodeCompiler,
    Compiler,
    External,
    Idle,
    Other,
}

/// Builtins the attribution policy cares about. The apply/call trampolines
/// sit between a caller we cannot trust and the callee, so samples landing
/// in them get an `(unresolved function)` caller frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinId {
    FunctionPrototypeApply,
    FunctionPrototypeCall,
    Other,
}

/// One stack observation delivered by the sampler.
///
/// The stack walker fills this in from a signal-handler-adjacent context, so
/// every field is a raw machine word or a flag; symbolization happens later
/// on the processing thread.
#[derive(Debug, Clone)]
pub struct TickSample {
    /// Program counter, if the sampler captured one.
    pub pc: Option<Address>,
    /// Top-of-stack word, used to catch frameless invocations where the pc
    /// is outside any known code object but the callee is on the stack.
    pub tos: Address,
    /// Address of the callback the VM entered, when `has_external_callback`.
    pub external_callback_entry: Address,
    pub has_external_callback: bool,
    /// VM state at the time of the sample.
    pub state: VmState,
    /// Capture time; `None` keeps the path out of the recorded sample log.
    pub timestamp: Option<Micros>,
    /// Raw return addresses, top-most frame first.
    pub stack: Vec<Address>,
    /// Whether this sample should bump tick counters (forced samples taken
    /// for tree-shape purposes pass `false`).
    pub update_stats: bool,
}

impl Default for TickSample {
    fn default() -> TickSample {
        TickSample {
            pc: None,
            tos: 0,
            external_callback_entry: 0,
            has_external_callback: false,
            state: VmState::Other,
            timestamp: None,
            stack: Vec::new(),
            update_stats: true,
        }
    }
}

/// Function metadata the runtime exposes for a compiled function: where its
/// source lives and the compiler's current verdict on optimizing it.
#[derive(Debug, Clone)]
pub struct FunctionMetadata {
    pub script_id: i32,
    pub start_position: i32,
    /// `"no reason"` when the function is optimizable.
    pub bailout_reason: String,
}

/// Time source for profile start/end stamps. Threaded through construction
/// so tests can drive it by hand.
pub trait Clock: Send + Sync {
    fn now_micros(&self) -> Micros;
}

/// Production clock: microseconds since the clock was created.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> MonotonicClock {
        MonotonicClock {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> MonotonicClock {
        MonotonicClock::new()
    }
}

impl Clock for MonotonicClock {
    fn now_micros(&self) -> Micros {
        self.origin.elapsed().as_micros() as Micros
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Micros>,
}

impl ManualClock {
    pub fn new(now: Micros) -> ManualClock {
        ManualClock {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: Micros) {
        *self.now.lock().unwrap() = now;
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> Micros {
        *self.now.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_holds_still_until_set() {
        let clock = ManualClock::new(7);
        assert_eq!(clock.now_micros(), 7);
        assert_eq!(clock.now_micros(), 7);
        clock.set(1234);
        assert_eq!(clock.now_micros(), 1234);
    }

    #[test]
    fn monotonic_clock_moves_forward() {
        let clock = MonotonicClock::new();
        let a = clock.now_micros();
        let b = clock.now_micros();
        assert!(b >= a);
    }
}
