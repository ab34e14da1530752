//! Automaton id allocation and the id → automaton table.

use crate::automaton::{Automaton, AutomatonId};
use crate::config::IdConfig;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Hands out ids from `start..limit`, wrapping to `start` and skipping ids
/// still in use.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    start: u64,
    limit: u64,
    next: u64,
}

impl IdGenerator {
    pub fn new(config: &IdConfig) -> Self {
        Self {
            start: config.start,
            limit: config.limit,
            next: config.start,
        }
    }

    /// `None` once every id in the range is taken.
    pub fn allocate(&mut self, in_use: impl Fn(u64) -> bool) -> Option<u64> {
        let span = self.limit.saturating_sub(self.start);
        for _ in 0..span {
            let candidate = self.next;
            self.next += 1;
            if self.next >= self.limit {
                self.next = self.start;
            }
            if !in_use(candidate) {
                return Some(candidate);
            }
        }
        None
    }
}

#[derive(Debug)]
struct Slots {
    automatons: BTreeMap<AutomatonId, Arc<Automaton>>,
    ids: IdGenerator,
}

#[derive(Debug)]
pub struct Registry {
    slots: Mutex<Slots>,
}

impl Registry {
    pub fn new(config: &IdConfig) -> Self {
        Self {
            slots: Mutex::new(Slots {
                automatons: BTreeMap::new(),
                ids: IdGenerator::new(config),
            }),
        }
    }

    /// Allocate an id and insert the automaton `make` builds for it.
    pub fn insert_with(&self, make: impl FnOnce(AutomatonId) -> Automaton) -> Option<Arc<Automaton>> {
        let mut slots = self.slots.lock();
        let Slots { automatons, ids } = &mut *slots;
        let id = AutomatonId::new(ids.allocate(|n| automatons.contains_key(&AutomatonId::new(n)))?);
        let automaton = Arc::new(make(id));
        automatons.insert(id, Arc::clone(&automaton));
        Some(automaton)
    }

    pub fn get(&self, id: AutomatonId) -> Option<Arc<Automaton>> {
        self.slots.lock().automatons.get(&id).cloned()
    }

    pub fn remove(&self, id: AutomatonId) -> Option<Arc<Automaton>> {
        self.slots.lock().automatons.remove(&id)
    }

    pub fn ids(&self) -> Vec<AutomatonId> {
        self.slots.lock().automatons.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().automatons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
