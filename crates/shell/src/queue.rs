use std::collections::{HashMap, VecDeque};

use nsgate_config::{ResourceEvent, ResourceId};

/// Pending resource events, one per object.
///
/// A second event for an object already queued replaces the first one but
/// keeps its place, so a burst of updates to one object costs one sync step.
#[derive(Debug, Default)]
pub struct WorkQueue {
    order: VecDeque<ResourceId>,
    latest: HashMap<ResourceId, ResourceEvent>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: ResourceEvent) {
        let id = event.id();
        if self.latest.insert(id.clone(), event).is_none() {
            self.order.push_back(id);
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Take every queued event in first-enqueue order.
    pub fn drain(&mut self) -> Vec<ResourceEvent> {
        let mut events = Vec::with_capacity(self.order.len());
        while let Some(id) = self.order.pop_front() {
            events.extend(self.latest.remove(&id));
        }
        events
    }
}
