//! Named, schema-typed event channels and their subscriber lists.

use crate::automaton::AutomatonId;
use gapl_core::Schema;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug)]
pub struct Topic {
    name: String,
    schema: Schema,
    subscribers: Mutex<Vec<AutomatonId>>,
}

impl Topic {
    fn new(name: &str, schema: Schema) -> Self {
        Self {
            name: name.to_string(),
            schema,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Snapshot of the subscriber list in subscription order.
    pub fn subscribers(&self) -> Vec<AutomatonId> {
        self.subscribers.lock().clone()
    }

    /// Run `f` with the subscriber list locked.
    pub(crate) fn with_subscribers<R>(&self, f: impl FnOnce(&[AutomatonId]) -> R) -> R {
        f(&self.subscribers.lock())
    }

    fn subscribe(&self, id: AutomatonId) {
        self.subscribers.lock().push(id);
    }

    /// Removes the first occurrence of `id`.
    fn unsubscribe(&self, id: AutomatonId) -> bool {
        let mut subscribers = self.subscribers.lock();
        match subscribers.iter().position(|s| *s == id) {
            Some(index) => {
                subscribers.remove(index);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct TopicTable {
    topics: RwLock<BTreeMap<String, Arc<Topic>>>,
}

impl TopicTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if `name` already exists.
    pub fn create(&self, name: &str, schema: Schema) -> bool {
        let mut topics = self.topics.write();
        if topics.contains_key(name) {
            return false;
        }
        topics.insert(name.to_string(), Arc::new(Topic::new(name, schema)));
        true
    }

    pub fn get(&self, name: &str) -> Option<Arc<Topic>> {
        self.topics.read().get(name).cloned()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.topics.read().contains_key(name)
    }

    pub fn schema(&self, name: &str) -> Option<Schema> {
        self.get(name).map(|t| t.schema().clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.topics.read().keys().cloned().collect()
    }

    pub fn subscribe(&self, name: &str, id: AutomatonId) -> bool {
        match self.get(name) {
            Some(topic) => {
                topic.subscribe(id);
                true
            }
            None => false,
        }
    }

    pub fn unsubscribe(&self, name: &str, id: AutomatonId) -> bool {
        self.get(name).is_some_and(|topic| topic.unsubscribe(id))
    }
}
