use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A named, shareable integer counter.
///
/// Cloning is cheap; all clones update the same value. Counters are
/// incremented on hot paths, so they use relaxed atomics rather than the
/// registry lock.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    pub fn new() -> Self {
        Counter::default()
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A block of counters belonging to one component instance, e.g. one
/// exporter worker or one input module.
#[derive(Debug)]
pub struct StatsBlock {
    name: String,
    origin: String,
    counters: Vec<(String, Counter)>,
}

impl StatsBlock {
    pub fn builder(name: impl Into<String>, origin: impl Into<String>) -> StatsBlockBuilder {
        StatsBlockBuilder {
            name: name.into(),
            origin: origin.into(),
            counters: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Counter value by name, `None` if the block has no such counter.
    pub fn counter_value(&self, counter: &str) -> Option<u64> {
        self.counters
            .iter()
            .find(|(name, _)| name == counter)
            .map(|(_, c)| c.value())
    }
}

/// Builder that hands out [`Counter`] handles while assembling the block.
pub struct StatsBlockBuilder {
    name: String,
    origin: String,
    counters: Vec<(String, Counter)>,
}

impl StatsBlockBuilder {
    /// Add a counter and return the live handle for it.
    pub fn counter(&mut self, name: impl Into<String>) -> Counter {
        let counter = Counter::new();
        self.counters.push((name.into(), counter.clone()));
        counter
    }

    pub fn build(self) -> StatsBlock {
        StatsBlock {
            name: self.name,
            origin: self.origin,
            counters: self.counters,
        }
    }
}

/// Point-in-time view of one registered block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub name: String,
    pub origin: String,
    pub counters: Vec<(String, u64)>,
}

/// Registry of statistics blocks, shared between the host and the modules.
#[derive(Debug, Default)]
pub struct StatsRegistry {
    blocks: Mutex<Vec<Arc<StatsBlock>>>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        StatsRegistry::default()
    }

    pub fn register(&self, block: StatsBlock) -> Arc<StatsBlock> {
        let block = Arc::new(block);
        self.blocks.lock().unwrap().push(block.clone());
        block
    }

    /// Drop a previously registered block (e.g. on worker teardown).
    pub fn unregister(&self, block: &Arc<StatsBlock>) {
        self.blocks
            .lock()
            .unwrap()
            .retain(|b| !Arc::ptr_eq(b, block));
    }

    pub fn snapshot(&self) -> Vec<StatsSnapshot> {
        self.blocks
            .lock()
            .unwrap()
            .iter()
            .map(|b| StatsSnapshot {
                name: b.name.clone(),
                origin: b.origin.clone(),
                counters: b
                    .counters
                    .iter()
                    .map(|(name, c)| (name.clone(), c.value()))
                    .collect(),
            })
            .collect()
    }
}
