//! Query terms, options, handles, and the candidate cache
//!
//! A query is a list of [`Term`]s: positive terms pick the stores whose id
//! lists get intersected (and whose records the rows carry), negative and
//! changed terms are an uncached post-filter. The intersection result is
//! cached per sorted positive-id set and shared via `Arc` until the next
//! structural mutation clears the cache. Execution lives on
//! [`World::query_opts`](crate::world::World::query_opts).

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::component::{ComponentDef, ComponentId};
use crate::entity::EntityId;
use crate::value::{Record, Value};
use crate::world::World;

/// One clause of a query.
#[derive(Debug, Clone)]
pub enum Term {
    /// Component must be present; its record is yielded in the row.
    With(ComponentDef),
    /// Component must be absent.
    Without(ComponentDef),
    /// Component must have been touched this step.
    Changed(ComponentDef),
}

pub fn with(def: &ComponentDef) -> Term {
    Term::With(def.clone())
}

pub fn without(def: &ComponentDef) -> Term {
    Term::Without(def.clone())
}

pub fn changed(def: &ComponentDef) -> Term {
    Term::Changed(def.clone())
}

/// Terms split into the three filter classes.
pub(crate) struct TermSet {
    pub positive: Vec<ComponentDef>,
    pub negative: Vec<ComponentDef>,
    pub changed: Vec<ComponentDef>,
}

impl TermSet {
    pub fn partition(terms: &[Term]) -> Self {
        let mut set = TermSet {
            positive: Vec::new(),
            negative: Vec::new(),
            changed: Vec::new(),
        };
        for term in terms {
            match term {
                Term::With(def) => set.positive.push(def.clone()),
                Term::Without(def) => set.negative.push(def.clone()),
                Term::Changed(def) => set.changed.push(def.clone()),
            }
        }
        set
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::from_positive(&self.positive)
    }
}

/// Sorted, deduplicated positive-term ids. Negative and changed terms are
/// deliberately excluded; they filter per-step state that would invalidate
/// any cache keyed on them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CacheKey(Box<[ComponentId]>);

impl CacheKey {
    pub fn from_positive(defs: &[ComponentDef]) -> Self {
        let mut ids: Vec<ComponentId> = defs.iter().map(ComponentDef::id).collect();
        ids.sort_unstable();
        ids.dedup();
        CacheKey(ids.into_boxed_slice())
    }
}

/// Candidate-list cache. Cleared wholesale on any structural mutation;
/// never touched by `set`/`mutate`, since presence (not values) determines
/// membership.
pub(crate) struct QueryCache {
    entries: RefCell<HashMap<CacheKey, Arc<Vec<EntityId>>>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(HashMap::new()),
        }
    }

    pub fn lookup(&self, key: &CacheKey) -> Option<Arc<Vec<EntityId>>> {
        self.entries.borrow().get(key).cloned()
    }

    pub fn insert(&self, key: CacheKey, candidates: Vec<EntityId>) -> Arc<Vec<EntityId>> {
        let shared = Arc::new(candidates);
        self.entries
            .borrow_mut()
            .insert(key, Arc::clone(&shared));
        shared
    }

    pub fn invalidate_all(&mut self) {
        self.entries.get_mut().clear();
    }

    #[cfg(test)]
    pub fn entry_count(&self) -> usize {
        self.entries.borrow().len()
    }
}

/// Sorted two-pointer merge intersection. Both inputs must be ascending and
/// duplicate-free.
pub(crate) fn intersect_sorted(a: &[EntityId], b: &[EntityId]) -> Vec<EntityId> {
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

pub type RowPredicate = Arc<dyn Fn(&Row) -> bool + Send + Sync>;
pub type RowProjector = Arc<dyn Fn(&Row) -> Value + Send + Sync>;
pub type RowComparator = Arc<dyn Fn(&Row, &Row) -> Ordering + Send + Sync>;

/// Post-filter, projection, ordering, and paging options for one query call.
#[derive(Clone, Default)]
pub struct QueryOptions {
    pub filter: Option<RowPredicate>,
    pub project: Option<RowProjector>,
    pub order_by: Option<RowComparator>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Debug for QueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("filter", &self.filter.is_some())
            .field("project", &self.project.is_some())
            .field("order_by", &self.order_by.is_some())
            .field("offset", &self.offset)
            .field("limit", &self.limit)
            .finish()
    }
}

/// One yielded match: the entity id, its records in positive-term order, and
/// the projector output when a projector was supplied.
#[derive(Debug, Clone)]
pub struct Row {
    pub id: EntityId,
    pub records: Vec<Record>,
    pub projected: Option<Value>,
}

/// Materialized query output. Owned rows, so the world stays free for
/// mutation calls while the caller iterates.
#[derive(Debug)]
pub struct QueryResult {
    rows: Vec<Row>,
    candidates: usize,
}

impl QueryResult {
    pub(crate) fn new(rows: Vec<Row>, candidates: usize) -> Self {
        Self { rows, candidates }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    /// Eagerly drains the result, invoking the callback per row.
    pub fn for_each(self, mut callback: impl FnMut(&Row)) {
        for row in &self.rows {
            callback(row);
        }
    }

    /// Exact count of yielded rows, after every filter and paging option.
    pub fn count(&self) -> usize {
        self.rows.len()
    }

    /// Length of the unfiltered cached candidate list: a cheap upper bound,
    /// useful when negative/changed/filter clauses are known to be rare.
    pub fn count_cheap(&self) -> usize {
        self.candidates
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.rows.iter().map(|row| row.id).collect()
    }
}

impl IntoIterator for QueryResult {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a> IntoIterator for &'a QueryResult {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// A reusable, immutable query handle.
///
/// Chaining an option returns a new handle and leaves the original
/// untouched, so handles compose freely; every derived handle shares the
/// same term list and therefore the same cached candidate list.
#[derive(Debug, Clone)]
pub struct QueryDef {
    terms: Arc<[Term]>,
    opts: QueryOptions,
}

impl QueryDef {
    pub fn new(terms: Vec<Term>) -> Self {
        Self {
            terms: terms.into(),
            opts: QueryOptions::default(),
        }
    }

    pub fn run(&self, world: &World) -> QueryResult {
        world.query_opts(&self.terms, self.opts.clone())
    }

    pub fn filter(&self, predicate: impl Fn(&Row) -> bool + Send + Sync + 'static) -> Self {
        let mut next = self.clone();
        next.opts.filter = Some(Arc::new(predicate));
        next
    }

    pub fn project(&self, mapper: impl Fn(&Row) -> Value + Send + Sync + 'static) -> Self {
        let mut next = self.clone();
        next.opts.project = Some(Arc::new(mapper));
        next
    }

    pub fn order_by(
        &self,
        comparator: impl Fn(&Row, &Row) -> Ordering + Send + Sync + 'static,
    ) -> Self {
        let mut next = self.clone();
        next.opts.order_by = Some(Arc::new(comparator));
        next
    }

    pub fn offset(&self, n: usize) -> Self {
        let mut next = self.clone();
        next.opts.offset = Some(n);
        next
    }

    pub fn limit(&self, n: usize) -> Self {
        let mut next = self.clone();
        next.opts.limit = Some(n);
        next
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;

    fn ids(raw: &[u64]) -> Vec<EntityId> {
        raw.iter().copied().map(EntityId::from_raw).collect()
    }

    #[test]
    fn cache_key_ignores_term_order_and_duplicates() {
        let a = ComponentDef::tag("A");
        let b = ComponentDef::tag("B");

        let forward = CacheKey::from_positive(&[a.clone(), b.clone()]);
        let reverse = CacheKey::from_positive(&[b.clone(), a.clone()]);
        let doubled = CacheKey::from_positive(&[a.clone(), b.clone(), a.clone()]);

        assert_eq!(forward, reverse);
        assert_eq!(forward, doubled);
    }

    #[test]
    fn cache_key_excludes_negative_and_changed_terms() {
        let a = ComponentDef::tag("A");
        let b = ComponentDef::tag("B");

        let bare = TermSet::partition(&[with(&a)]).cache_key();
        let filtered = TermSet::partition(&[with(&a), without(&b), changed(&a)]).cache_key();

        assert_eq!(bare, filtered);
    }

    #[test]
    fn intersection_is_exact() {
        let left = ids(&[1, 3, 5, 7, 9]);
        let right = ids(&[2, 3, 4, 7, 10]);

        assert_eq!(intersect_sorted(&left, &right), ids(&[3, 7]));
        assert_eq!(intersect_sorted(&left, &[]), ids(&[]));
        assert_eq!(intersect_sorted(&left, &left), left);
    }

    #[test]
    fn cache_hits_return_the_shared_list() {
        let a = ComponentDef::tag("A");
        let key = CacheKey::from_positive(&[a]);
        let cache = QueryCache::new();

        assert!(cache.lookup(&key).is_none());
        let stored = cache.insert(key.clone(), ids(&[1, 2]));
        let hit = cache.lookup(&key).unwrap();

        assert!(Arc::ptr_eq(&stored, &hit));
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn invalidation_clears_everything() {
        let a = ComponentDef::tag("A");
        let b = ComponentDef::tag("B");
        let mut cache = QueryCache::new();

        cache.insert(CacheKey::from_positive(&[a]), ids(&[1]));
        cache.insert(CacheKey::from_positive(&[b]), ids(&[2]));
        cache.invalidate_all();

        assert_eq!(cache.entry_count(), 0);
    }

    #[test]
    fn partition_routes_terms_to_their_class() {
        let a = ComponentDef::new("A", record! { "v" => 1 });
        let b = ComponentDef::tag("B");

        let set = TermSet::partition(&[with(&a), without(&b), changed(&a)]);

        assert_eq!(set.positive.len(), 1);
        assert_eq!(set.negative.len(), 1);
        assert_eq!(set.changed.len(), 1);
        assert_eq!(set.positive[0], a);
    }

    #[test]
    fn chained_handles_leave_the_original_untouched() {
        let a = ComponentDef::tag("A");
        let base = QueryDef::new(vec![with(&a)]);

        let paged = base.offset(10).limit(5);

        assert_eq!(base.opts.offset, None);
        assert_eq!(base.opts.limit, None);
        assert_eq!(paged.opts.offset, Some(10));
        assert_eq!(paged.opts.limit, Some(5));
        assert!(Arc::ptr_eq(&base.terms, &paged.terms));
    }

    #[test]
    fn chained_filters_do_not_leak_between_branches() {
        let a = ComponentDef::tag("A");
        let base = QueryDef::new(vec![with(&a)]);

        let filtered = base.filter(|row| row.id.raw() % 2 == 0);
        let projected = base.project(|row| Value::from(row.id.raw() as i64));

        assert!(base.opts.filter.is_none() && base.opts.project.is_none());
        assert!(filtered.opts.filter.is_some() && filtered.opts.project.is_none());
        assert!(projected.opts.project.is_some() && projected.opts.filter.is_none());
    }
}
