//! A registered automaton: its event queue and the thread that drains it.
//!
//! Each automaton owns one OS thread. The thread runs the init program once
//! and then waits on the queue, running the behavior program for every
//! delivered event, until it is asked to exit or a program fails. Teardown
//! always happens on that same thread, exactly once.

use crate::compiler::CompiledAutomaton;
use crate::notify::{Notification, Notifier, Phase};
use crate::runtime::Core;
use gapl_core::{Event, PackedTuple, Program};
use gapl_vm::{Host, HostError, Interpreter, TableStore, VariableEnvironment, VmError};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, info_span, trace, warn};

// ---------------------------------------------------------------------------
// Identity and state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AutomatonId(u64);

impl AutomatonId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AutomatonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainCause {
    Error,
    Explicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Registered, thread not yet running.
    Compiling,
    Running,
    Draining(DrainCause),
    Terminated,
}

#[derive(Debug)]
struct Mailbox {
    queue: VecDeque<Arc<Event>>,
    /// Topics whose events are still accepted.
    active: BTreeSet<String>,
    must_exit: bool,
    lifecycle: Lifecycle,
}

// ---------------------------------------------------------------------------
// Automaton
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Automaton {
    id: AutomatonId,
    /// Topic to the event variable it binds.
    bindings: BTreeMap<String, String>,
    mailbox: Mutex<Mailbox>,
    wakeup: Condvar,
}

impl Automaton {
    pub fn new(id: AutomatonId, bindings: BTreeMap<String, String>) -> Self {
        Self {
            id,
            bindings,
            mailbox: Mutex::new(Mailbox {
                queue: VecDeque::new(),
                active: BTreeSet::new(),
                must_exit: false,
                lifecycle: Lifecycle::Compiling,
            }),
            wakeup: Condvar::new(),
        }
    }

    pub fn id(&self) -> AutomatonId {
        self.id
    }

    pub fn bindings(&self) -> &BTreeMap<String, String> {
        &self.bindings
    }

    pub fn variable_for(&self, topic: &str) -> Option<&str> {
        self.bindings.get(topic).map(String::as_str)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.mailbox.lock().lifecycle
    }

    /// Events waiting to be processed.
    pub fn queued(&self) -> usize {
        self.mailbox.lock().queue.len()
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.mailbox.lock().active.contains(topic)
    }

    /// Start accepting events of `topic`. False if the topic is not bound,
    /// already accepted, or the automaton is exiting.
    pub(crate) fn activate(&self, topic: &str) -> bool {
        if !self.bindings.contains_key(topic) {
            return false;
        }
        let mut mailbox = self.mailbox.lock();
        if mailbox.must_exit || mailbox.lifecycle == Lifecycle::Terminated {
            return false;
        }
        mailbox.active.insert(topic.to_string())
    }

    /// Stop accepting `topic`, including events already queued, and wake the
    /// thread so it can discard them.
    pub(crate) fn deactivate(&self, topic: &str) -> bool {
        let removed = self.mailbox.lock().active.remove(topic);
        if removed {
            self.wakeup.notify_one();
        }
        removed
    }

    /// Enqueue `event` and wake the thread.
    pub(crate) fn deliver(&self, event: Arc<Event>) -> bool {
        let mut mailbox = self.mailbox.lock();
        if mailbox.must_exit || mailbox.lifecycle == Lifecycle::Terminated {
            return false;
        }
        mailbox.queue.push_back(event);
        self.wakeup.notify_one();
        true
    }

    /// Ask the thread to exit. False if an exit is already under way.
    pub(crate) fn request_exit(&self) -> bool {
        let mut mailbox = self.mailbox.lock();
        if mailbox.must_exit || mailbox.lifecycle == Lifecycle::Terminated {
            return false;
        }
        mailbox.must_exit = true;
        mailbox.lifecycle = Lifecycle::Draining(DrainCause::Explicit);
        self.wakeup.notify_one();
        true
    }

    fn set_running(&self) {
        let mut mailbox = self.mailbox.lock();
        if mailbox.lifecycle == Lifecycle::Compiling {
            mailbox.lifecycle = Lifecycle::Running;
        }
    }

    /// Block until an accepted event arrives. `None` once exit is requested.
    fn next_event(&self) -> Option<Arc<Event>> {
        let mut mailbox = self.mailbox.lock();
        loop {
            if mailbox.must_exit {
                return None;
            }
            match mailbox.queue.pop_front() {
                Some(event) if mailbox.active.contains(event.topic()) => return Some(event),
                Some(event) => trace!(topic = event.topic(), "skipping event of unsubscribed topic"),
                None => self.wakeup.wait(&mut mailbox),
            }
        }
    }

    /// Stop accepting work and release the queue. Returns the topics that
    /// were still subscribed.
    fn begin_teardown(&self, cause: DrainCause) -> Vec<String> {
        let mut mailbox = self.mailbox.lock();
        mailbox.must_exit = true;
        if cause == DrainCause::Error {
            mailbox.lifecycle = Lifecycle::Draining(DrainCause::Error);
        }
        mailbox.queue.clear();
        std::mem::take(&mut mailbox.active).into_iter().collect()
    }

    fn finish(&self) {
        self.mailbox.lock().lifecycle = Lifecycle::Terminated;
    }
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

/// What a running program sees: the runtime's topics and tables, and the
/// registrant's notification channel.
pub(crate) struct AutomatonHost {
    id: AutomatonId,
    core: Arc<Core>,
    notifier: Option<Notifier>,
}

impl AutomatonHost {
    fn notify(&self, notification: Notification) -> Result<(), HostError> {
        let notifier = self.notifier.as_ref().ok_or(HostError::Closed)?;
        notifier.send(notification).map_err(|_| HostError::Closed)
    }
}

impl Host for AutomatonHost {
    fn automaton_id(&self) -> u64 {
        self.id.as_u64()
    }

    fn print(&mut self, text: &str) {
        if self.notify(Notification::Output(text.to_string())).is_err() {
            debug!(id = %self.id, "registrant gone, dropping output");
        }
    }

    fn send(&mut self, tuple: PackedTuple) -> Result<(), HostError> {
        self.notify(Notification::Sent(tuple))
    }

    fn publish(&mut self, topic: &str, tuple: PackedTuple) -> Result<(), HostError> {
        self.core.publish_tuple(topic, &tuple)
    }

    fn tables(&self) -> &dyn TableStore {
        self.core.tables()
    }
}

// ---------------------------------------------------------------------------
// Worker thread
// ---------------------------------------------------------------------------

pub(crate) struct Worker {
    automaton: Arc<Automaton>,
    init: Program,
    behavior: Program,
    env: VariableEnvironment,
    interpreter: Interpreter,
    host: AutomatonHost,
    phase: Phase,
}

impl Worker {
    pub(crate) fn new(
        automaton: Arc<Automaton>,
        compiled: CompiledAutomaton,
        core: Arc<Core>,
        notifier: Notifier,
    ) -> Self {
        let interpreter = Interpreter::with_stack_capacity(core.config().stack_capacity);
        let host = AutomatonHost {
            id: automaton.id(),
            core,
            notifier: Some(notifier),
        };
        Self {
            automaton,
            init: compiled.init,
            behavior: compiled.behavior,
            env: compiled.variables.duplicate(),
            interpreter,
            host,
            phase: Phase::Init,
        }
    }

    /// Start the automaton's thread, named `automaton-<id>`.
    pub(crate) fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("automaton-{}", self.automaton.id()))
            .spawn(move || self.run())
    }

    fn run(mut self) {
        let span = info_span!("automaton", id = %self.automaton.id());
        let _entered = span.enter();
        self.automaton.set_running();
        debug!("running init");
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| self.drive())) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.to_string()),
            Err(payload) => Err(format!("panic: {}", panic_message(payload.as_ref()))),
        };
        self.teardown(outcome);
    }

    fn drive(&mut self) -> Result<(), VmError> {
        self.phase = Phase::Init;
        self.interpreter
            .run(&self.init, &mut self.env, &mut self.host, "")?;
        self.phase = Phase::Behavior;
        while let Some(event) = self.automaton.next_event() {
            let Some(variable) = self.automaton.variable_for(event.topic()) else {
                continue;
            };
            trace!(topic = event.topic(), "dispatching event");
            self.env.bind_event(variable, Arc::clone(&event))?;
            self.interpreter
                .run(&self.behavior, &mut self.env, &mut self.host, event.topic())?;
        }
        Ok(())
    }

    fn teardown(mut self, outcome: Result<(), String>) {
        let id = self.automaton.id();
        let cause = match outcome {
            Ok(()) => DrainCause::Explicit,
            Err(_) => DrainCause::Error,
        };
        for topic in self.automaton.begin_teardown(cause) {
            self.host.core.unsubscribe_topic(&topic, id);
        }
        self.env.clear();
        if let Err(message) = outcome {
            warn!(phase = %self.phase, %message, "automaton failed");
            let notification = Notification::Error {
                phase: self.phase,
                message,
            };
            if self.host.notify(notification).is_err() {
                debug!("registrant gone before error notification");
            }
        }
        self.host.core.forget(id);
        self.automaton.finish();
        self.host.notifier = None;
        info!("terminated");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
