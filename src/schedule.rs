//! System registration and ordering
//!
//! A [`Schedule`] collects named systems with optional run-after edges and
//! resolves them into a single scheduler closure for [`World::set_scheduler`].
//! Ordering is a stable topological sort: independent systems keep their
//! registration order.

use std::collections::HashMap;

use anyhow::Context;

use crate::error::WorldError;
use crate::world::World;

/// One unit of per-step simulation logic.
pub trait System: Send {
    fn name(&self) -> &str;
    fn run(&mut self, world: &mut World, dt: f64) -> anyhow::Result<()>;
}

struct Entry {
    system: Box<dyn System>,
    after: Vec<String>,
}

#[derive(Default)]
pub struct Schedule {
    entries: Vec<Entry>,
}

impl Schedule {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn with_system(mut self, system: impl System + 'static) -> Self {
        self.entries.push(Entry {
            system: Box::new(system),
            after: Vec::new(),
        });
        self
    }

    /// Registers a system that must run after every named dependency.
    pub fn with_system_after(mut self, system: impl System + 'static, after: &[&str]) -> Self {
        self.entries.push(Entry {
            system: Box::new(system),
            after: after.iter().map(|name| name.to_string()).collect(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolves the run order. Names must be unique, every dependency must
    /// exist, and the edges must form no cycle.
    fn ordered(self) -> Result<Vec<Box<dyn System>>, WorldError> {
        let count = self.entries.len();

        let mut index_of: HashMap<String, usize> = HashMap::new();
        for (index, entry) in self.entries.iter().enumerate() {
            let name = entry.system.name().to_string();
            if index_of.insert(name.clone(), index).is_some() {
                return Err(WorldError::DuplicateSystem(name));
            }
        }

        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
        let mut indegree = vec![0usize; count];
        for (index, entry) in self.entries.iter().enumerate() {
            for dep in &entry.after {
                let Some(&dep_index) = index_of.get(dep.as_str()) else {
                    return Err(WorldError::UnknownDependency(
                        entry.system.name().to_string(),
                        dep.clone(),
                    ));
                };
                dependents[dep_index].push(index);
                indegree[index] += 1;
            }
        }

        let mut emitted = vec![false; count];
        let mut order = Vec::with_capacity(count);
        while order.len() < count {
            // First-registered ready system wins, keeping the sort stable.
            match (0..count).find(|&i| !emitted[i] && indegree[i] == 0) {
                Some(ready) => {
                    emitted[ready] = true;
                    order.push(ready);
                    for &dependent in &dependents[ready] {
                        indegree[dependent] -= 1;
                    }
                }
                None => {
                    let stuck = (0..count).find(|&i| !emitted[i]).unwrap_or(0);
                    return Err(WorldError::DependencyCycle(
                        self.entries[stuck].system.name().to_string(),
                    ));
                }
            }
        }

        let mut slots: Vec<Option<Box<dyn System>>> = self
            .entries
            .into_iter()
            .map(|entry| Some(entry.system))
            .collect();
        let mut systems = Vec::with_capacity(count);
        for index in order {
            if let Some(system) = slots[index].take() {
                systems.push(system);
            }
        }
        Ok(systems)
    }

    /// Turns the schedule into a scheduler closure. The first failing system
    /// short-circuits the rest of that step's systems; the step itself still
    /// completes (flush and change clear) inside [`World::tick`].
    pub fn into_runner(
        self,
    ) -> Result<impl FnMut(&mut World, f64) -> anyhow::Result<()> + Send, WorldError> {
        let mut systems = self.ordered()?;
        Ok(move |world: &mut World, dt: f64| {
            for system in &mut systems {
                let name = system.name().to_string();
                system
                    .run(world, dt)
                    .with_context(|| format!("system '{name}' failed"))?;
            }
            Ok(())
        })
    }

    pub fn install(self, world: &mut World) -> Result<(), WorldError> {
        let runner = self.into_runner()?;
        world.set_scheduler(runner);
        Ok(())
    }
}
