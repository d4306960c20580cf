//! The discrete-event engine: a min-heap over simulated time with a stable
//! FIFO tiebreak, predicate-based cancellation, and an observational object
//! registry.
//!
//! An OS kernel's "scheduler" is a preemptive task switcher, not a
//! deterministic time-ordered queue, so there is no drop-in event loop to
//! start from here — every scheduling call instead takes an
//! explicit `&mut Engine`, and is grounded in shape on
//! `other_examples/...nsg-ethz-trix__src-timing_model.rs`, which keeps an
//! analogous "events ordered by simulated time, FIFO among ties" queue for
//! a network simulator, there via the `priority_queue` crate. A plain
//! `BinaryHeap<Reverse<_>>` plus an explicit sequence counter is used here
//! instead: the heap only ever needs pop-the-smallest and the tiebreak is
//! intrinsic to the key, so pulling in a crate whose main value-add is
//! keyed priority updates would add a dependency with nothing to do.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::rc::{Rc, Weak};

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Simulated time, in nanoseconds, monotone for the lifetime of an `Engine`.
pub type SimTime = u64;

/// Stable identity for a `Connector`, assigned by `Engine::next_object_id`.
/// Plain `u64`s rather than pointer identity so cable/PHY code can match on
/// "sender" in a cancellation predicate without touching `Rc` internals.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectorId(pub u64);

/// What kind of event this is, for `cancel_matching` predicates. The actual
/// work an event performs lives in its boxed closure, not here — this is
/// metadata only, one tagged enum rather than a hierarchy of event classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// A connector begins observing carrier.
    Sense { connector: ConnectorId },
    /// A connector stops observing carrier. `is_jam` marks a null-payload
    /// jam signal rather than a data transmission.
    Cease { connector: ConnectorId, sender: ConnectorId, is_jam: bool },
    /// A scheduled callback with no medium semantics (timers, FIFO drains).
    Callback,
}

struct PendingEvent {
    kind: EventKind,
    action: Box<dyn FnOnce(&mut Engine)>,
}

/// An opaque handle to a previously scheduled event, usable only to cancel
/// that exact event via `Engine::cancel`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventHandle(u64);

pub struct Engine {
    now: SimTime,
    heap: BinaryHeap<Reverse<(SimTime, u64)>>,
    pending: HashMap<u64, PendingEvent>,
    next_seq: u64,
    next_object_id: u64,
    registry: HashMap<String, Weak<dyn std::any::Any>>,
    rng: StdRng,
}

impl Engine {
    /// A fresh engine seeded from a fixed, documented constant, so that two
    /// runs built the same way reproduce the same event trace without the
    /// caller having to think about seeding.
    pub fn new() -> Self {
        Self::with_seed(0x5EED_CAFE_u64)
    }

    pub fn with_seed(seed: u64) -> Self {
        Engine {
            now: 0,
            heap: BinaryHeap::new(),
            pending: HashMap::new(),
            next_seq: 0,
            next_object_id: 0,
            registry: HashMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Allocate a fresh globally-unique id, used for `ConnectorId`s and
    /// anything else that just needs stable, comparable identity.
    pub fn next_object_id(&mut self) -> u64 {
        let id = self.next_object_id;
        self.next_object_id += 1;
        id
    }

    /// Insert an event to fire at `fire_time`. Panics (via a debug
    /// assertion) if `fire_time` is in the past relative to `now` — every
    /// caller in this crate computes `fire_time` as `now + delay`, so a
    /// violation indicates a bug in the caller, not a normal runtime
    /// condition to recover from.
    pub fn schedule(
        &mut self,
        fire_time: SimTime,
        kind: EventKind,
        action: impl FnOnce(&mut Engine) + 'static,
    ) -> EventHandle {
        debug_assert!(fire_time >= self.now, "scheduled an event in the past");
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse((fire_time, seq)));
        self.pending.insert(seq, PendingEvent { kind, action: Box::new(action) });
        EventHandle(seq)
    }

    /// Convenience wrapper: schedule a plain callback at `now + delay`.
    pub fn schedule_callback(
        &mut self,
        delay: SimTime,
        action: impl FnOnce(&mut Engine) + 'static,
    ) -> EventHandle {
        let fire_time = self.now.saturating_add(delay);
        self.schedule(fire_time, EventKind::Callback, action)
    }

    /// Cancel a specific previously scheduled event. Returns `true` if it
    /// was still pending.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        self.pending.remove(&handle.0).is_some()
    }

    /// Remove every still-pending event for which `predicate` holds.
    /// Returns the count removed. A PHY uses this to invalidate its own
    /// outstanding `Cease` event when it emits a jam.
    pub fn cancel_matching(&mut self, predicate: impl Fn(&EventKind) -> bool) -> usize {
        let dead: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, ev)| predicate(&ev.kind))
            .map(|(seq, _)| *seq)
            .collect();
        for seq in &dead {
            self.pending.remove(seq);
        }
        dead.len()
    }

    /// Discard heap entries whose event was cancelled, so the heap's top
    /// always reflects a live event.
    fn clean_top(&mut self) {
        while let Some(Reverse((_, seq))) = self.heap.peek() {
            if self.pending.contains_key(seq) {
                break;
            }
            self.heap.pop();
        }
    }

    /// Smallest fire time and kind of the next live event, without running it.
    pub fn peek_next(&mut self) -> Option<(SimTime, EventKind)> {
        self.clean_top();
        let Reverse((fire_time, seq)) = self.heap.peek()?;
        Some((*fire_time, self.pending.get(seq).unwrap().kind))
    }

    /// Pop and run the next live event, advancing `now` to its fire time
    /// first. Returns its fire time and kind, or `None` if the queue is empty.
    pub fn dequeue_and_run(&mut self) -> Option<(SimTime, EventKind)> {
        self.clean_top();
        let Reverse((fire_time, seq)) = self.heap.pop()?;
        let event = self.pending.remove(&seq)?;
        self.now = fire_time;
        (event.action)(self);
        Some((fire_time, event.kind))
    }

    /// Run every event with fire time `<= t`, advancing `now` to each
    /// event's own fire time before running it; once no such event
    /// remains, set `now := t`.
    pub fn run_until(&mut self, t: SimTime) {
        loop {
            match self.peek_next() {
                Some((fire_time, _)) if fire_time <= t => {
                    self.dequeue_and_run();
                }
                _ => break,
            }
        }
        if self.now < t {
            self.now = t;
        }
    }

    /// Run every event with fire time `<= now + duration`.
    pub fn run_for(&mut self, duration: SimTime) {
        let target = self.now.saturating_add(duration);
        self.run_until(target);
    }

    /// Register an object under a user-chosen name, for an external
    /// console to resolve later. Purely observational — the core never
    /// reads this back, and the registry holds no strong reference, so
    /// registering an object here has no bearing on its lifetime.
    pub fn register(&mut self, name: impl Into<String>, object: &Rc<dyn std::any::Any>) {
        self.registry.insert(name.into(), Rc::downgrade(object));
    }

    /// Resolve a previously registered object, or `None` if it has since
    /// been dropped.
    pub fn lookup(&self, name: &str) -> Option<Rc<dyn std::any::Any>> {
        self.registry.get(name)?.upgrade()
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.registry.keys().cloned().collect()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn events_fire_in_time_order() {
        let mut engine = Engine::new();
        let trace = Rc::new(RefCell::new(Vec::new()));

        let t1 = trace.clone();
        engine.schedule_callback(100, move |e| t1.borrow_mut().push(e.now()));
        let t2 = trace.clone();
        engine.schedule_callback(10, move |e| t2.borrow_mut().push(e.now()));
        let t3 = trace.clone();
        engine.schedule_callback(50, move |e| t3.borrow_mut().push(e.now()));

        engine.run_until(1000);
        assert_eq!(*trace.borrow(), vec![10, 50, 100]);
    }

    #[test]
    fn equal_time_events_run_in_insertion_order() {
        let mut engine = Engine::new();
        let trace = Rc::new(RefCell::new(Vec::new()));

        for i in 0..5 {
            let t = trace.clone();
            engine.schedule_callback(0, move |_| t.borrow_mut().push(i));
        }
        engine.run_until(0);
        assert_eq!(*trace.borrow(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn cancel_matching_removes_only_matching_events() {
        let mut engine = Engine::new();
        let fired = Rc::new(RefCell::new(Vec::new()));
        let a = ConnectorId(1);
        let b = ConnectorId(2);

        let f1 = fired.clone();
        engine.schedule(100, EventKind::Cease { connector: a, sender: a, is_jam: false }, move |_| {
            f1.borrow_mut().push("a");
        });
        let f2 = fired.clone();
        engine.schedule(100, EventKind::Cease { connector: b, sender: b, is_jam: false }, move |_| {
            f2.borrow_mut().push("b");
        });

        let removed = engine.cancel_matching(|k| matches!(k, EventKind::Cease { sender, .. } if *sender == a));
        assert_eq!(removed, 1);

        engine.run_until(100);
        assert_eq!(*fired.borrow(), vec!["b"]);
    }

    #[test]
    fn run_until_advances_clock_even_with_no_events() {
        let mut engine = Engine::new();
        engine.run_until(500);
        assert_eq!(engine.now(), 500);
    }

    #[test]
    fn time_never_goes_backwards() {
        let mut engine = Engine::new();
        engine.schedule_callback(5, |_| {});
        engine.run_until(5);
        assert_eq!(engine.now(), 5);
        engine.schedule_callback(5, |_| {});
        engine.run_until(20);
        assert_eq!(engine.now(), 20);
    }

    #[test]
    fn registry_holds_no_strong_reference() {
        let mut engine = Engine::new();
        let object: Rc<dyn std::any::Any> = Rc::new(42i32);
        engine.register("answer", &object);
        assert!(engine.lookup("answer").is_some());

        drop(object);
        assert!(engine.lookup("answer").is_none());
    }
}
