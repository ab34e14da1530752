//! The runtime root: registry, topics, tables and the timer.
//!
//! A [`Runtime`] owns everything that would otherwise be process-global.
//! Automaton threads hold a reference to the shared [`Core`] so they can
//! publish and tear themselves down without going through the `Runtime`.

use crate::automaton::{Automaton, AutomatonId, Lifecycle, Worker};
use crate::compiler::Compiler;
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::notify::{self, Notification, Notifier};
use crate::registry::Registry;
use crate::timer::Timer;
use crate::topic::{Topic, TopicTable};
use crossbeam_channel::Receiver;
use gapl_core::{Event, PackedTuple, Schema, Value, ValueError};
use gapl_vm::{HostError, MemoryTableStore, TableStore};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub(crate) struct Core {
    config: RuntimeConfig,
    topics: TopicTable,
    registry: Registry,
    tables: Arc<dyn TableStore>,
}

impl Core {
    pub(crate) fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub(crate) fn tables(&self) -> &dyn TableStore {
        self.tables.as_ref()
    }

    /// Check `values` against the topic's schema and enqueue one shared
    /// event on every subscriber. Returns how many accepted it.
    fn deliver(&self, topic: &Topic, values: Vec<Value>) -> Result<usize, ValueError> {
        topic.schema().check(&values)?;
        let event = Arc::new(Event::new(topic.name(), values));
        let delivered = topic.with_subscribers(|ids| {
            ids.iter()
                .filter_map(|id| self.registry.get(*id))
                .filter(|automaton| automaton.deliver(Arc::clone(&event)))
                .count()
        });
        debug!(topic = topic.name(), delivered, "published");
        Ok(delivered)
    }

    pub(crate) fn publish(&self, name: &str, values: Vec<Value>) -> bool {
        let Some(topic) = self.topics.get(name) else {
            debug!(topic = name, "publish to unknown topic");
            return false;
        };
        match self.deliver(&topic, values) {
            Ok(_) => true,
            Err(err) => {
                warn!(topic = name, error = %err, "event does not match topic schema");
                false
            }
        }
    }

    pub(crate) fn publish_packed(&self, name: &str, text: &str) -> bool {
        let Some(topic) = self.topics.get(name) else {
            debug!(topic = name, "publish to unknown topic");
            return false;
        };
        let parsed = Event::from_packed(name, topic.schema(), text)
            .and_then(|event| self.deliver(&topic, event.values().to_vec()));
        match parsed {
            Ok(_) => true,
            Err(err) => {
                warn!(topic = name, error = %err, "malformed packed event");
                false
            }
        }
    }

    /// Publication from inside a running program.
    pub(crate) fn publish_tuple(&self, name: &str, tuple: &PackedTuple) -> Result<(), HostError> {
        let topic = self
            .topics
            .get(name)
            .ok_or_else(|| HostError::UnknownTopic(name.to_string()))?;
        let rejected = |err: ValueError| HostError::Rejected {
            topic: name.to_string(),
            reason: err.to_string(),
        };
        let values = tuple.to_values().map_err(rejected)?;
        self.deliver(&topic, values).map_err(rejected)?;
        Ok(())
    }

    pub(crate) fn unsubscribe_topic(&self, name: &str, id: AutomatonId) -> bool {
        self.topics.unsubscribe(name, id)
    }

    /// Drop the registry entry of a terminated automaton.
    pub(crate) fn forget(&self, id: AutomatonId) {
        self.registry.remove(id);
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

pub struct Runtime {
    core: Arc<Core>,
    compiler: Box<dyn Compiler>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    timer: Mutex<Option<Timer>>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig, compiler: impl Compiler + 'static) -> Result<Self, RuntimeError> {
        Self::with_tables(config, compiler, Arc::new(MemoryTableStore::new()))
    }

    /// Fails with [`RuntimeError::Config`] if `config` does not validate.
    pub fn with_tables(
        config: RuntimeConfig,
        compiler: impl Compiler + 'static,
        tables: Arc<dyn TableStore>,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;
        let registry = Registry::new(&config.ids);
        Ok(Self {
            core: Arc::new(Core {
                config,
                topics: TopicTable::new(),
                registry,
                tables,
            }),
            compiler: Box::new(compiler),
            threads: Mutex::new(Vec::new()),
            timer: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.core.config
    }

    pub fn tables(&self) -> Arc<dyn TableStore> {
        Arc::clone(&self.core.tables)
    }

    /// Start the timer thread if it is enabled. Idempotent.
    pub fn start(&self) -> Result<(), RuntimeError> {
        let timer_config = &self.core.config.timer;
        if !timer_config.enabled {
            return Ok(());
        }
        let mut timer = self.timer.lock();
        if timer.is_some() {
            return Ok(());
        }
        let schema: Schema = "1 tstamp/timestamp"
            .parse()
            .map_err(|err: ValueError| RuntimeError::Internal(err.to_string()))?;
        if !self.core.topics.create(&timer_config.topic, schema.clone())
            && self.core.topics.schema(&timer_config.topic).as_ref() != Some(&schema)
        {
            return Err(RuntimeError::TopicConflict(timer_config.topic.clone()));
        }
        *timer = Some(
            Timer::spawn(Arc::clone(&self.core), timer_config.topic.clone(), timer_config.interval())
                .map_err(RuntimeError::Spawn)?,
        );
        info!(topic = %timer_config.topic, interval_ms = timer_config.interval_ms, "timer started");
        Ok(())
    }

    /// Stop the timer, ask every automaton to exit and wait for their threads.
    pub fn shutdown(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.stop();
        }
        for id in self.core.registry.ids() {
            if let Some(automaton) = self.core.registry.get(id) {
                automaton.request_exit();
            }
        }
        let threads = std::mem::take(&mut *self.threads.lock());
        for handle in threads {
            if handle.join().is_err() {
                warn!("automaton thread panicked outside its boundary");
            }
        }
        debug!("runtime shut down");
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Compile `source`, subscribe it to its topics and start its thread.
    /// Notifications go to `notifier`.
    pub fn register(&self, source: &str, notifier: Notifier) -> Result<AutomatonId, RuntimeError> {
        let compiled = self.compiler.compile(source)?;
        compiled.validate()?;
        if let Some(topic) = compiled
            .subscriptions
            .keys()
            .find(|topic| !self.core.topics.exists(topic))
        {
            return Err(RuntimeError::UnknownTopic(topic.clone()));
        }

        let automaton = self
            .core
            .registry
            .insert_with(|id| Automaton::new(id, compiled.subscriptions.clone()))
            .ok_or(RuntimeError::IdsExhausted)?;
        let id = automaton.id();
        for topic in compiled.subscriptions.keys() {
            automaton.activate(topic);
            self.core.topics.subscribe(topic, id);
        }

        let worker = Worker::new(Arc::clone(&automaton), compiled, Arc::clone(&self.core), notifier);
        match worker.spawn() {
            Ok(handle) => {
                let mut threads = self.threads.lock();
                threads.retain(|h| !h.is_finished());
                threads.push(handle);
            }
            Err(err) => {
                for topic in automaton.bindings().keys() {
                    self.core.topics.unsubscribe(topic, id);
                }
                self.core.registry.remove(id);
                return Err(RuntimeError::Spawn(err));
            }
        }
        info!(%id, topics = automaton.bindings().len(), "automaton registered");
        Ok(id)
    }

    /// [`register`](Self::register) with a fresh unbounded channel.
    pub fn register_with_channel(
        &self,
        source: &str,
    ) -> Result<(AutomatonId, Receiver<Notification>), RuntimeError> {
        let (tx, rx) = notify::channel();
        let id = self.register(source, tx)?;
        Ok((id, rx))
    }

    /// Ask automaton `id` to exit. False if it is unknown or already exiting.
    pub fn unregister(&self, id: AutomatonId) -> bool {
        let accepted = self
            .core
            .registry
            .get(id)
            .is_some_and(|automaton| automaton.request_exit());
        if accepted {
            info!(%id, "unregister requested");
        }
        accepted
    }

    pub fn automaton_ids(&self) -> Vec<AutomatonId> {
        self.core.registry.ids()
    }

    pub fn automaton_count(&self) -> usize {
        self.core.registry.len()
    }

    pub fn lifecycle(&self, id: AutomatonId) -> Option<Lifecycle> {
        self.core.registry.get(id).map(|a| a.lifecycle())
    }

    // -----------------------------------------------------------------------
    // Topics
    // -----------------------------------------------------------------------

    pub fn create_topic(&self, name: &str, schema: Schema) -> bool {
        let created = self.core.topics.create(name, schema);
        if created {
            debug!(topic = name, "topic created");
        }
        created
    }

    /// False if the topic is unknown or `values` do not fit its schema.
    pub fn publish(&self, name: &str, values: Vec<Value>) -> bool {
        self.core.publish(name, values)
    }

    /// Publish `<|>`-separated text, parsed against the topic's schema.
    pub fn publish_packed(&self, name: &str, text: &str) -> bool {
        self.core.publish_packed(name, text)
    }

    /// Resume delivery of a topic the automaton declared a subscription for.
    pub fn subscribe(&self, name: &str, id: AutomatonId) -> bool {
        let Some(automaton) = self.core.registry.get(id) else {
            return false;
        };
        if !self.core.topics.exists(name) || !automaton.activate(name) {
            return false;
        }
        if !self.core.topics.subscribe(name, id) {
            automaton.deactivate(name);
            return false;
        }
        // teardown may have taken the active set after `activate`
        if !automaton.is_subscribed(name) {
            self.core.topics.unsubscribe(name, id);
            return false;
        }
        true
    }

    /// Stop delivery of `name` to `id`, including events already queued.
    pub fn unsubscribe(&self, name: &str, id: AutomatonId) -> bool {
        let removed = self.core.topics.unsubscribe(name, id);
        if let Some(automaton) = self.core.registry.get(id) {
            automaton.deactivate(name);
        }
        removed
    }

    pub fn topic_schema(&self, name: &str) -> Option<Schema> {
        self.core.topics.schema(name)
    }

    pub fn topic_exists(&self, name: &str) -> bool {
        self.core.topics.exists(name)
    }

    pub fn topic_names(&self) -> Vec<String> {
        self.core.topics.names()
    }

    pub fn subscribers(&self, name: &str) -> Vec<AutomatonId> {
        self.core
            .topics
            .get(name)
            .map(|t| t.subscribers())
            .unwrap_or_default()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
