//! # Input — Event Pump Handshake and Key-State Tracking
//!
//! The OS event loop is thread-affine, so it runs as its own pump (usually
//! on the main thread) and pairs with the per-frame input task through a
//! mutex/condvar handshake: the input task signals `gather_input`, the pump
//! polls its event source and signals `input_gathered` back. The window
//! layer itself is out of scope; the pump talks to an [`EventSource`] trait
//! object, so tests and the demo drive it with synthetic events.
//!
//! The input task fires INPUT1 and is gated on the previous frame's
//! RENDERING_PRESENT, which paces event gathering one frame behind
//! presentation. A window-close report or an escape press requests
//! scheduler quit.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tracing::info;

use crate::checkpoints;
use crate::scheduler::Scheduler;
use crate::task::Task;

/// Key action classes tracked per frame.
pub const KEY_RELEASE: usize = 0;
pub const KEY_PRESS: usize = 1;
pub const KEY_REPEAT: usize = 2;
/// Derived state: held keys, carried across frames.
pub const KEY_DOWN: usize = 3;
pub const NUM_KEY_STATES: usize = 4;

/// Events per class per frame; older events are dropped.
pub const MAX_EVENTS: usize = 8;

pub const KEY_ESCAPE: u32 = 256;

/// Per-frame key event buffers, one fixed ring per action class.
#[derive(Clone, Copy, Default)]
pub struct KeyEvents {
    pub keys: [[u32; MAX_EVENTS]; NUM_KEY_STATES],
    pub counts: [u32; NUM_KEY_STATES],
}

impl KeyEvents {
    pub fn push(&mut self, state: usize, key: u32) {
        let at = self.counts[state] as usize % MAX_EVENTS;
        self.keys[state][at] = key;
        self.counts[state] = (self.counts[state] + 1) % MAX_EVENTS as u32;
    }

    pub fn contains(&self, state: usize, key: u32) -> bool {
        self.keys[state][..self.counts[state] as usize]
            .iter()
            .any(|&k| k == key)
    }

    fn clear_frame_states(&mut self) {
        for state in [KEY_RELEASE, KEY_PRESS, KEY_REPEAT] {
            self.keys[state] = [0; MAX_EVENTS];
            self.counts[state] = 0;
        }
    }
}

/// What the pump learned from one poll.
pub enum PumpControl {
    Continue,
    CloseRequested,
}

/// The thread-affine event producer the pump polls once per frame.
pub trait EventSource: Send {
    fn poll(&mut self, events: &mut KeyEvents) -> PumpControl;
}

/// Deterministic stand-in for a real window event queue.
pub struct SyntheticEvents {
    polls: u64,
    press_escape_after: Option<u64>,
}

impl SyntheticEvents {
    pub fn new(press_escape_after: Option<u64>) -> Self {
        SyntheticEvents {
            polls: 0,
            press_escape_after,
        }
    }
}

impl EventSource for SyntheticEvents {
    fn poll(&mut self, events: &mut KeyEvents) -> PumpControl {
        self.polls += 1;
        // A small rotating set of presses and releases.
        let key = 65 + (self.polls % 4) as u32;
        events.push(KEY_PRESS, key);
        if self.polls % 2 == 0 {
            events.push(KEY_RELEASE, key - 1);
        }
        if let Some(after) = self.press_escape_after {
            if self.polls >= after {
                events.push(KEY_PRESS, KEY_ESCAPE);
            }
        }
        PumpControl::Continue
    }
}

#[derive(Default)]
struct PumpState {
    gather_input: bool,
    input_gathered: bool,
    events: KeyEvents,
}

struct PumpSync {
    state: Mutex<PumpState>,
    cv: Condvar,
}

pub struct Input {
    sched: Arc<Scheduler>,
    stack: usize,
    sync: PumpSync,
}

/// Handshake waits re-check the quit flag on this period so neither side
/// can be stranded by a shutdown that races the notify.
const WAIT_TICK: Duration = Duration::from_millis(10);

impl Input {
    /// Wire the subsystem to its stack and prime the first frame.
    pub fn init(sched: &Arc<Scheduler>, stack: usize) -> Arc<Self> {
        let system = Arc::new(Input {
            sched: Arc::clone(sched),
            stack,
            sync: PumpSync {
                state: Mutex::new(PumpState::default()),
                cv: Condvar::new(),
            },
        });
        info!(stack, "input subsystem initialized");
        submit_tasks(Arc::as_ptr(&system) as *mut (), 0);
        system
    }

    /// Run the event pump until quit. Call from the thread that owns the OS
    /// event queue.
    pub fn input_loop(&self, source: &mut dyn EventSource) {
        while !self.sched.quit_requested() {
            let mut state = self.sync.state.lock().unwrap();
            while !state.gather_input {
                let (next, _) = self.sync.cv.wait_timeout(state, WAIT_TICK).unwrap();
                state = next;
                if self.sched.quit_requested() {
                    return;
                }
            }
            state.gather_input = false;
            state.events.clear_frame_states();

            match source.poll(&mut state.events) {
                PumpControl::Continue => {
                    state.input_gathered = true;
                    drop(state);
                    self.sync.cv.notify_one();
                }
                PumpControl::CloseRequested => {
                    drop(state);
                    info!("window close requested");
                    self.sched.request_quit();
                    return;
                }
            }
        }
    }

    /// Snapshot of the held-key check, for consumers of input state.
    pub fn key_down(&self, key: u32) -> bool {
        self.sync.state.lock().unwrap().events.contains(KEY_DOWN, key)
    }
}

pub fn submit_tasks(args: *mut (), _worker_id: u32) -> u64 {
    // Safety: args is the Input instance installed at init.
    let system = unsafe { &*(args as *const Input) };

    let sched = &system.sched;
    let s = system.stack;
    sched.begin_recording(s);
    sched.record_task(
        s,
        Task::new(submit_tasks, args, checkpoints::NONE, checkpoints::INPUT1),
    );
    sched.record_task(
        s,
        Task::new(
            input_task,
            args,
            checkpoints::RENDERING_PRESENT,
            checkpoints::NONE,
        ),
    );
    sched.submit_recording(s);
    checkpoints::NONE
}

/// Wake the pump, wait for it to gather, then fold the frame's events into
/// the held-key state.
pub fn input_task(args: *mut (), _worker_id: u32) -> u64 {
    // Safety: args is the Input instance installed at init.
    let system = unsafe { &*(args as *const Input) };
    let sync = &system.sync;

    {
        let mut state = sync.state.lock().unwrap();
        state.gather_input = true;
        state.input_gathered = false;
    }
    sync.cv.notify_one();

    let mut state = sync.state.lock().unwrap();
    while !state.input_gathered {
        let (next, _) = sync.cv.wait_timeout(state, WAIT_TICK).unwrap();
        state = next;
        if system.sched.quit_requested() {
            // Shutdown raced the pump; withhold the checkpoint and bail.
            return checkpoints::NONE;
        }
    }

    // Presses become held keys; releases retire them.
    let pressed: Vec<u32> =
        state.events.keys[KEY_PRESS][..state.events.counts[KEY_PRESS] as usize].to_vec();
    for key in pressed {
        state.events.push(KEY_DOWN, key);
    }
    let released: Vec<u32> =
        state.events.keys[KEY_RELEASE][..state.events.counts[KEY_RELEASE] as usize].to_vec();
    for key in released {
        let down_count = state.events.counts[KEY_DOWN] as usize;
        if let Some(at) = state.events.keys[KEY_DOWN][..down_count]
            .iter()
            .position(|&k| k == key)
        {
            state.events.keys[KEY_DOWN][at] = state.events.keys[KEY_DOWN][down_count - 1];
            state.events.keys[KEY_DOWN][down_count - 1] = 0;
            state.events.counts[KEY_DOWN] -= 1;
        }
    }

    if state.events.contains(KEY_PRESS, KEY_ESCAPE) {
        drop(state);
        info!("escape pressed, requesting quit");
        system.sched.request_quit();
        return checkpoints::INPUT1;
    }

    checkpoints::INPUT1
}
