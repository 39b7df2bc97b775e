//! The world orchestrator
//!
//! Owns the entity registry, the per-component stores, the query cache, the
//! change tracker, and the deferred queue; exposes the public entity/
//! component/query API; and drives the step lifecycle: scheduler call,
//! bounded deferred flush, change-set clear, post-step hook.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};

use rand_chacha::ChaCha8Rng;
use tracing::{debug, error, warn};

use crate::change::ChangeTracker;
use crate::component::{ComponentDef, ComponentId};
use crate::config::WorldConfig;
use crate::deferred::{DeferredOp, DeferredQueue, MutateFn};
use crate::entity::{EntityAllocator, EntityId};
use crate::error::WorldError;
use crate::inspect::{EntityReport, Inspector};
use crate::policy::{PolicyHook, PolicyVerdict, StrictViolation};
use crate::query::{QueryCache, QueryOptions, QueryResult, Row, RowProjector, Term, TermSet};
use crate::rng::RngStreams;
use crate::store::{ComponentStorage, FieldViewMut, StoreMode};
use crate::value::{merge_record, Record};

/// Per-flush cap on replayed deferred operations.
pub const DEFAULT_FLUSH_LIMIT: usize = 1000;

type SchedulerFn = Box<dyn FnMut(&mut World, f64) -> anyhow::Result<()> + Send>;
type PostStepFn = Box<dyn FnMut(Duration) + Send>;

/// Summary of one completed tick.
#[derive(Debug)]
pub struct TickReport {
    pub step: u64,
    pub dt: f64,
    /// Wall-clock duration of the whole step.
    pub duration: Duration,
    /// Deferred operations replayed this flush (failed ones included).
    pub flushed: usize,
    /// Operations still queued after the flush.
    pub pending: usize,
    /// Set when the scheduler returned an error; the step still completed.
    pub scheduler_error: Option<String>,
}

/// How a gated mutation call proceeds.
enum Gate {
    Immediate,
    Queued,
    Dropped,
}

pub struct World {
    entities: EntityAllocator,
    defs: HashMap<ComponentId, ComponentDef>,
    def_order: Vec<ComponentId>,
    stores: HashMap<ComponentId, Box<dyn ComponentStorage>>,
    store_mode: StoreMode,
    cache: QueryCache,
    changes: ChangeTracker,
    deferred: DeferredQueue,
    /// Ids reserved by mid-step creates whose activation is still queued.
    pending_creates: HashSet<EntityId>,
    in_step: bool,
    strict: bool,
    policy: Option<PolicyHook>,
    scheduler: Option<SchedulerFn>,
    post_step: Option<PostStepFn>,
    inspector: Inspector,
    rng: RngStreams,
    seed: u64,
    step: u64,
    elapsed: f64,
    flush_limit: usize,
}

/// Construction-time settings for a [`World`].
#[derive(Debug, Clone)]
pub struct WorldBuilder {
    store_mode: StoreMode,
    seed: u64,
    strict: bool,
    flush_limit: usize,
    inspection: bool,
    start_step: u64,
    start_elapsed: f64,
}

impl WorldBuilder {
    pub fn new() -> Self {
        Self {
            store_mode: StoreMode::Associative,
            seed: 0,
            strict: false,
            flush_limit: DEFAULT_FLUSH_LIMIT,
            inspection: true,
            start_step: 0,
            start_elapsed: 0.0,
        }
    }

    pub fn store_mode(mut self, mode: StoreMode) -> Self {
        self.store_mode = mode;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn flush_limit(mut self, limit: usize) -> Self {
        self.flush_limit = limit;
        self
    }

    pub fn inspection(mut self, enabled: bool) -> Self {
        self.inspection = enabled;
        self
    }

    /// Starts the step counter and elapsed clock at a checkpoint, for
    /// resuming from a snapshot.
    pub fn resume_at(mut self, step: u64, elapsed: f64) -> Self {
        self.start_step = step;
        self.start_elapsed = elapsed;
        self
    }

    pub fn build(self) -> World {
        World {
            entities: EntityAllocator::new(),
            defs: HashMap::new(),
            def_order: Vec::new(),
            stores: HashMap::new(),
            store_mode: self.store_mode,
            cache: QueryCache::new(),
            changes: ChangeTracker::new(),
            deferred: DeferredQueue::new(),
            pending_creates: HashSet::new(),
            in_step: false,
            strict: self.strict,
            policy: None,
            scheduler: None,
            post_step: None,
            inspector: Inspector::new(self.inspection),
            rng: RngStreams::new(self.seed),
            seed: self.seed,
            step: self.start_step,
            elapsed: self.start_elapsed,
            flush_limit: self.flush_limit,
        }
    }
}

impl Default for WorldBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        WorldBuilder::new().build()
    }

    pub fn builder() -> WorldBuilder {
        WorldBuilder::new()
    }

    pub fn from_config(config: &WorldConfig) -> Self {
        World::builder()
            .seed(config.seed)
            .store_mode(config.store_mode)
            .strict(config.strict)
            .flush_limit(config.flush_limit)
            .inspection(config.inspection)
            .build()
    }

    // ---- introspection ----------------------------------------------------

    pub fn store_mode(&self) -> StoreMode {
        self.store_mode
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    pub fn is_stepping(&self) -> bool {
        self.in_step
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn entity_count(&self) -> usize {
        self.entities.count()
    }

    /// All alive ids, ascending.
    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.entities.alive_ids().collect()
    }

    /// Descriptors this world has seen, in registration order.
    pub fn component_defs(&self) -> Vec<ComponentDef> {
        self.def_order
            .iter()
            .filter_map(|id| self.defs.get(id))
            .cloned()
            .collect()
    }

    pub fn pending_deferred(&self) -> usize {
        self.deferred.len()
    }

    /// A deterministic RNG stream for the current step, keyed by label.
    pub fn rng_stream(&self, label: &str) -> ChaCha8Rng {
        self.rng.stream(label, self.step)
    }

    // ---- configuration hooks ----------------------------------------------

    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    pub fn set_policy<F>(&mut self, hook: F)
    where
        F: FnMut(&StrictViolation<'_>) -> PolicyVerdict + Send + 'static,
    {
        self.policy = Some(Box::new(hook));
    }

    pub fn clear_policy(&mut self) {
        self.policy = None;
    }

    pub fn set_scheduler<F>(&mut self, scheduler: F)
    where
        F: FnMut(&mut World, f64) -> anyhow::Result<()> + Send + 'static,
    {
        self.scheduler = Some(Box::new(scheduler));
    }

    pub fn has_scheduler(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Invoked after every tick with the step's wall-clock duration.
    pub fn set_post_step<F>(&mut self, hook: F)
    where
        F: FnMut(Duration) + Send + 'static,
    {
        self.post_step = Some(Box::new(hook));
    }

    pub fn set_inspection(&mut self, enabled: bool) {
        self.inspector.set_enabled(enabled);
    }

    pub fn inspection_enabled(&self) -> bool {
        self.inspector.enabled()
    }

    // ---- entity lifecycle -------------------------------------------------

    pub fn create(&mut self) -> Result<EntityId, WorldError> {
        match self.gate_mutation("create", EntityId::NONE, None)? {
            Gate::Immediate => {
                let id = self.entities.allocate();
                self.cache.invalidate_all();
                Ok(id)
            }
            Gate::Queued => {
                // The id is reserved now so queued ops can target it, but
                // it only turns alive when the flush replays the create.
                let id = self.entities.reserve();
                self.pending_creates.insert(id);
                self.deferred.push(DeferredOp::Create { id });
                Ok(id)
            }
            Gate::Dropped => Ok(EntityId::NONE),
        }
    }

    pub fn destroy(&mut self, id: EntityId) -> Result<Option<bool>, WorldError> {
        match self.gate_mutation("destroy", id, None)? {
            Gate::Immediate => Ok(Some(self.apply_destroy(id))),
            Gate::Queued => {
                self.deferred.push(DeferredOp::Destroy { id });
                Ok(None)
            }
            Gate::Dropped => Ok(None),
        }
    }

    pub fn is_alive(&self, id: EntityId) -> bool {
        self.entities.is_alive(id)
    }

    /// Revives a specific id for the snapshot boundary, keeping restored ids
    /// (and any cross-entity references embedded in records) stable.
    pub fn restore_entity(&mut self, id: EntityId) -> Result<(), WorldError> {
        self.entities.restore(id)?;
        self.cache.invalidate_all();
        Ok(())
    }

    // ---- component mutation -----------------------------------------------

    /// Registers a descriptor (and its empty store) without touching any
    /// entity. `add` does this implicitly; the snapshot boundary needs it
    /// explicitly for components with no instances.
    pub fn register(&mut self, def: &ComponentDef) {
        self.storage_mut(def);
    }

    pub fn add(
        &mut self,
        id: EntityId,
        def: &ComponentDef,
        data: Record,
    ) -> Result<Option<Record>, WorldError> {
        let alive = self.entities.is_alive(id);
        if !alive && !self.pending_creates.contains(&id) {
            return Err(WorldError::DeadEntity(id));
        }
        let mut record = def.defaults().clone();
        merge_record(&mut record, &data);
        if !def.validate(&record) {
            return Err(WorldError::Validation {
                entity: id,
                component: def.name().to_string(),
            });
        }
        let mut gate = self.gate_mutation("add", id, Some(def.name()))?;
        if matches!(gate, Gate::Immediate) && !alive {
            // Target id has a queued create; this add must trail it in FIFO
            // order even when issued outside a step.
            gate = Gate::Queued;
        }
        match gate {
            Gate::Immediate => self.apply_add(id, def, record).map(Some),
            Gate::Queued => {
                self.register(def);
                self.deferred.push(DeferredOp::Add {
                    id,
                    def: def.clone(),
                    record,
                });
                Ok(None)
            }
            Gate::Dropped => Ok(None),
        }
    }

    /// A materialized copy of the record, or `None` when absent.
    pub fn get(&self, id: EntityId, def: &ComponentDef) -> Option<Record> {
        self.stores.get(&def.id())?.get(id)
    }

    pub fn has(&self, id: EntityId, def: &ComponentDef) -> bool {
        self.stores.get(&def.id()).is_some_and(|store| store.has(id))
    }

    /// Direct field-level access to the backing storage. Writes through the
    /// view apply immediately, even mid-step, and are not marked in the
    /// change set, so `Changed` queries will not see them.
    pub fn view_mut(&mut self, id: EntityId, def: &ComponentDef) -> Option<FieldViewMut<'_>> {
        let store = self.stores.get_mut(&def.id())?;
        if !store.has(id) {
            return None;
        }
        Some(FieldViewMut::new(id, store.as_mut()))
    }

    pub fn remove(&mut self, id: EntityId, def: &ComponentDef) -> Result<Option<bool>, WorldError> {
        match self.gate_mutation("remove", id, Some(def.name()))? {
            Gate::Immediate => Ok(Some(self.apply_remove(id, def))),
            Gate::Queued => {
                self.deferred.push(DeferredOp::Remove {
                    id,
                    def: def.clone(),
                });
                Ok(None)
            }
            Gate::Dropped => Ok(None),
        }
    }

    pub fn set(
        &mut self,
        id: EntityId,
        def: &ComponentDef,
        patch: Record,
    ) -> Result<Option<Record>, WorldError> {
        // Usage checks run synchronously in every mode: the merged record is
        // validated before the call can commit or queue.
        let current = self.get(id, def).ok_or_else(|| WorldError::MissingComponent {
            entity: id,
            component: def.name().to_string(),
        })?;
        let mut merged = current;
        merge_record(&mut merged, &patch);
        if !def.validate(&merged) {
            return Err(WorldError::Validation {
                entity: id,
                component: def.name().to_string(),
            });
        }
        match self.gate_mutation("set", id, Some(def.name()))? {
            Gate::Immediate => {
                self.storage_mut(def).set(id, merged.clone());
                self.changes.mark(def.id(), id);
                Ok(Some(merged))
            }
            Gate::Queued => {
                self.deferred.push(DeferredOp::Set {
                    id,
                    def: def.clone(),
                    patch,
                });
                Ok(None)
            }
            Gate::Dropped => Ok(None),
        }
    }

    pub fn mutate<F>(
        &mut self,
        id: EntityId,
        def: &ComponentDef,
        f: F,
    ) -> Result<Option<Record>, WorldError>
    where
        F: FnOnce(&mut Record) + Send + 'static,
    {
        if !self.has(id, def) {
            return Err(WorldError::MissingComponent {
                entity: id,
                component: def.name().to_string(),
            });
        }
        match self.gate_mutation("mutate", id, Some(def.name()))? {
            Gate::Immediate => self.apply_mutate(id, def, Box::new(f)).map(Some),
            Gate::Queued => {
                self.deferred.push(DeferredOp::Mutate {
                    id,
                    def: def.clone(),
                    apply: Box::new(f),
                });
                Ok(None)
            }
            Gate::Dropped => Ok(None),
        }
    }

    /// Queues an arbitrary callback to run during the next flush, FIFO with
    /// every other deferred operation.
    pub fn defer<F>(&mut self, f: F)
    where
        F: FnOnce(&mut World) -> anyhow::Result<()> + Send + 'static,
    {
        self.deferred.push(DeferredOp::Call { run: Box::new(f) });
    }

    pub fn changed(&self, id: EntityId, def: &ComponentDef) -> bool {
        self.changes.changed(def.id(), id)
    }

    // ---- queries ----------------------------------------------------------

    pub fn query(&self, terms: &[Term]) -> QueryResult {
        self.query_opts(terms, QueryOptions::default())
    }

    pub fn query_opts(&self, terms: &[Term], opts: QueryOptions) -> QueryResult {
        let set = TermSet::partition(terms);
        let candidates = self.candidates(&set);
        let candidate_len = candidates.len();

        let mut rows: Vec<Row> = Vec::new();
        if opts.limit == Some(0) {
            return QueryResult::new(rows, candidate_len);
        }

        let passes_dynamic = |id: EntityId| {
            set.negative.iter().all(|def| !self.has(id, def))
                && set.changed.iter().all(|def| self.changes.changed(def.id(), id))
        };

        if let Some(comparator) = opts.order_by.clone() {
            // Comparators need random access, so filtered rows materialize
            // fully before the sort; paging applies afterwards.
            for &id in candidates.iter() {
                if !passes_dynamic(id) {
                    continue;
                }
                let row = self.build_row(id, &set.positive, opts.project.as_ref());
                if let Some(filter) = &opts.filter {
                    if !filter(&row) {
                        continue;
                    }
                }
                rows.push(row);
            }
            rows.sort_by(|a, b| comparator(a, b));
            let offset = opts.offset.unwrap_or(0);
            if offset >= rows.len() {
                rows.clear();
            } else if offset > 0 {
                rows.drain(..offset);
            }
            if let Some(limit) = opts.limit {
                rows.truncate(limit);
            }
        } else {
            let offset = opts.offset.unwrap_or(0);
            let mut skipped = 0usize;
            for &id in candidates.iter() {
                if !passes_dynamic(id) {
                    continue;
                }
                let row = self.build_row(id, &set.positive, opts.project.as_ref());
                if let Some(filter) = &opts.filter {
                    if !filter(&row) {
                        continue;
                    }
                }
                if skipped < offset {
                    skipped += 1;
                    continue;
                }
                rows.push(row);
                if opts.limit.is_some_and(|limit| rows.len() >= limit) {
                    break;
                }
            }
        }

        QueryResult::new(rows, candidate_len)
    }

    fn candidates(&self, set: &TermSet) -> std::sync::Arc<Vec<EntityId>> {
        let key = set.cache_key();
        if let Some(hit) = self.cache.lookup(&key) {
            return hit;
        }
        let computed = self.compute_candidates(&set.positive);
        self.cache.insert(key, computed)
    }

    fn compute_candidates(&self, positive: &[ComponentDef]) -> Vec<EntityId> {
        let Some(first) = positive.first() else {
            return self.entities.alive_ids().collect();
        };
        let mut current = self.store_ids(first);
        for def in &positive[1..] {
            if current.is_empty() {
                break;
            }
            current = crate::query::intersect_sorted(&current, &self.store_ids(def));
        }
        current
    }

    fn store_ids(&self, def: &ComponentDef) -> Vec<EntityId> {
        self.stores
            .get(&def.id())
            .map(|store| store.entity_ids())
            .unwrap_or_default()
    }

    fn build_row(
        &self,
        id: EntityId,
        positive: &[ComponentDef],
        project: Option<&RowProjector>,
    ) -> Row {
        let records = positive
            .iter()
            .map(|def| self.get(id, def).unwrap_or_default())
            .collect();
        let mut row = Row {
            id,
            records,
            projected: None,
        };
        if let Some(projector) = project {
            row.projected = Some(projector(&row));
        }
        row
    }

    // ---- inspection -------------------------------------------------------

    /// Structured snapshot of one entity: every present component's record,
    /// the known-but-absent components, and per-field diffs against the
    /// previous inspection of the same id. Purely observational.
    pub fn inspect(&mut self, id: EntityId) -> EntityReport {
        let alive = self.entities.is_alive(id);
        let mut current: BTreeMap<String, Record> = BTreeMap::new();
        let mut absent: Vec<String> = Vec::new();
        for cid in &self.def_order {
            if let (Some(def), Some(store)) = (self.defs.get(cid), self.stores.get(cid)) {
                match store.get(id) {
                    Some(record) => {
                        current.insert(def.name().to_string(), record);
                    }
                    None => absent.push(def.name().to_string()),
                }
            }
        }
        absent.sort();
        self.inspector.observe(id, alive, current, absent)
    }

    // ---- step lifecycle ---------------------------------------------------

    pub fn tick(&mut self, dt: f64) -> Result<TickReport, WorldError> {
        let mut scheduler = self.scheduler.take().ok_or(WorldError::MissingScheduler)?;
        let started = Instant::now();
        self.in_step = true;
        self.step += 1;
        self.elapsed += dt;

        let outcome = scheduler(self, dt);
        self.scheduler = Some(scheduler);
        let scheduler_error = match outcome {
            Ok(()) => None,
            Err(err) => {
                error!(step = self.step, error = %err, "scheduler failed; continuing with flush");
                Some(err.to_string())
            }
        };

        self.in_step = false;
        let flushed = self.flush_deferred();
        self.changes.clear_all();

        let duration = started.elapsed();
        if let Some(hook) = self.post_step.as_mut() {
            hook(duration);
        }
        debug!(
            step = self.step,
            flushed,
            pending = self.deferred.len(),
            "step complete"
        );

        Ok(TickReport {
            step: self.step,
            dt,
            duration,
            flushed,
            pending: self.deferred.len(),
            scheduler_error,
        })
    }

    fn flush_deferred(&mut self) -> usize {
        let batch = self.deferred.drain_up_to(self.flush_limit);
        let flushed = batch.len();
        for op in batch {
            let name = op.name();
            if let Err(err) = self.apply_deferred(op) {
                warn!(step = self.step, op = name, error = %err, "deferred operation failed");
            }
        }
        flushed
    }

    fn apply_deferred(&mut self, op: DeferredOp) -> anyhow::Result<()> {
        match op {
            DeferredOp::Create { id } => {
                self.pending_creates.remove(&id);
                self.entities.activate(id);
                self.cache.invalidate_all();
                Ok(())
            }
            DeferredOp::Destroy { id } => {
                self.apply_destroy(id);
                Ok(())
            }
            DeferredOp::Add { id, def, record } => {
                self.apply_add(id, &def, record)?;
                Ok(())
            }
            DeferredOp::Remove { id, def } => {
                self.apply_remove(id, &def);
                Ok(())
            }
            DeferredOp::Set { id, def, patch } => {
                self.apply_set(id, &def, patch)?;
                Ok(())
            }
            DeferredOp::Mutate { id, def, apply } => {
                self.apply_mutate(id, &def, apply)?;
                Ok(())
            }
            DeferredOp::Call { run } => run(self),
        }
    }

    // ---- gated dispatch and apply paths -----------------------------------

    fn gate_mutation(
        &mut self,
        operation: &'static str,
        entity: EntityId,
        component: Option<&str>,
    ) -> Result<Gate, WorldError> {
        if !self.in_step {
            return Ok(Gate::Immediate);
        }
        if !self.strict {
            return Ok(Gate::Queued);
        }
        let err = WorldError::StrictMutation {
            operation,
            entity,
            component: component.map(str::to_string),
        };
        match self.policy.as_mut() {
            None => Err(err),
            Some(hook) => {
                let violation = StrictViolation {
                    operation,
                    entity,
                    component,
                    error: &err,
                };
                match hook(&violation) {
                    PolicyVerdict::Defer => Ok(Gate::Queued),
                    PolicyVerdict::Ignore => Ok(Gate::Dropped),
                    PolicyVerdict::Propagate => Err(err),
                    PolicyVerdict::Fail(custom) => Err(custom),
                }
            }
        }
    }

    fn storage_mut(&mut self, def: &ComponentDef) -> &mut dyn ComponentStorage {
        if !self.defs.contains_key(&def.id()) {
            self.defs.insert(def.id(), def.clone());
            self.def_order.push(def.id());
        }
        let mode = self.store_mode;
        self.stores
            .entry(def.id())
            .or_insert_with(|| mode.new_storage(def.defaults()))
            .as_mut()
    }

    fn apply_add(
        &mut self,
        id: EntityId,
        def: &ComponentDef,
        record: Record,
    ) -> Result<Record, WorldError> {
        if !self.entities.is_alive(id) {
            return Err(WorldError::DeadEntity(id));
        }
        self.storage_mut(def).set(id, record.clone());
        self.changes.mark(def.id(), id);
        self.cache.invalidate_all();
        Ok(record)
    }

    fn apply_remove(&mut self, id: EntityId, def: &ComponentDef) -> bool {
        let removed = match self.stores.get_mut(&def.id()) {
            Some(store) => store.delete(id),
            None => false,
        };
        if removed {
            self.changes.mark(def.id(), id);
            self.cache.invalidate_all();
        }
        removed
    }

    fn apply_set(
        &mut self,
        id: EntityId,
        def: &ComponentDef,
        patch: Record,
    ) -> Result<Record, WorldError> {
        let current = self.get(id, def).ok_or_else(|| WorldError::MissingComponent {
            entity: id,
            component: def.name().to_string(),
        })?;
        let mut merged = current;
        merge_record(&mut merged, &patch);
        if !def.validate(&merged) {
            return Err(WorldError::Validation {
                entity: id,
                component: def.name().to_string(),
            });
        }
        self.storage_mut(def).set(id, merged.clone());
        self.changes.mark(def.id(), id);
        Ok(merged)
    }

    fn apply_mutate(
        &mut self,
        id: EntityId,
        def: &ComponentDef,
        apply: MutateFn,
    ) -> Result<Record, WorldError> {
        let mut record = self.get(id, def).ok_or_else(|| WorldError::MissingComponent {
            entity: id,
            component: def.name().to_string(),
        })?;
        apply(&mut record);
        self.storage_mut(def).set(id, record.clone());
        self.changes.mark(def.id(), id);
        Ok(record)
    }

    fn apply_destroy(&mut self, id: EntityId) -> bool {
        if !self.entities.is_alive(id) {
            return false;
        }
        for store in self.stores.values_mut() {
            store.delete(id);
        }
        self.entities.deallocate(id);
        self.cache.invalidate_all();
        true
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}
