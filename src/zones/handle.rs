use std::{
    fmt,
    hash::{Hash, Hasher},
    ops::Deref,
    sync::{Arc, OnceLock, Weak},
};

use dashmap::DashMap;
use tracing::trace;

use super::{
    bounds::Bounds,
    constraint::{Clock, Constraint, Limit, Relation},
    dbm::{Canonical, Relationship, Zone, DBM},
    error::Result,
    matrix,
    mingraph::{self, EncodingOptions, Encoding},
};

struct Entry {
    dbm: DBM<Canonical>,
    hash: u64,
    interned: bool,
}

impl Entry {
    fn new(dbm: DBM<Canonical>) -> Self {
        let hash = matrix::hash_relations(dbm.dimension(), dbm.relations());
        Self {
            dbm,
            hash,
            interned: false,
        }
    }
}

impl Clone for Entry {
    /// A copy is never part of an intern table.
    fn clone(&self) -> Self {
        Self {
            dbm: self.dbm.clone(),
            hash: self.hash,
            interned: false,
        }
    }
}

/// A shared, copy-on-write reference to a canonical DBM. Cloning a handle
/// only increments a reference count; the matrix is copied on the first
/// write while it is shared.
#[derive(Clone)]
pub struct DbmHandle {
    inner: Arc<Entry>,
}

impl DbmHandle {
    pub fn new(dbm: DBM<Canonical>) -> Self {
        Self {
            inner: Arc::new(Entry::new(dbm)),
        }
    }

    pub fn universe(dimension: Clock) -> Self {
        Self::new(DBM::universe(dimension))
    }

    pub fn zero(dimension: Clock) -> Self {
        Self::new(DBM::zero(dimension))
    }

    pub fn from_zone(zone: Zone) -> Option<Self> {
        zone.ok().map(Self::new)
    }

    pub fn dbm(&self) -> &DBM<Canonical> {
        &self.inner.dbm
    }

    /// The content hash, computed when the matrix was last written.
    pub fn hash(&self) -> u64 {
        self.inner.hash
    }

    pub fn is_interned(&self) -> bool {
        self.inner.interned
    }

    /// The number of handles sharing the matrix.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Takes the matrix out of the handle, copying it if it is shared.
    pub fn into_dbm(self) -> DBM<Canonical> {
        match Arc::try_unwrap(self.inner) {
            Ok(entry) => entry.dbm,
            Err(shared) => shared.dbm.clone(),
        }
    }

    /// Runs an in-place operation on an exclusively owned matrix. Interned
    /// matrices are never written as other handles may find them in the table.
    pub fn modify<T, F>(&mut self, f: F) -> T
    where
        F: FnOnce(&mut DBM<Canonical>) -> T,
    {
        if self.inner.interned {
            self.inner = Arc::new(Entry::new(self.inner.dbm.clone()));
        }
        let entry = Arc::make_mut(&mut self.inner);
        let result = f(&mut entry.dbm);
        entry.hash = matrix::hash_relations(entry.dbm.dimension(), entry.dbm.relations());
        result
    }

    /// Runs an operation which may empty the zone. Returns none if it did.
    pub fn transform<F>(self, f: F) -> Option<Self>
    where
        F: FnOnce(DBM<Canonical>) -> Zone,
    {
        f(self.into_dbm()).ok().map(Self::new)
    }

    pub fn up(&mut self) {
        self.modify(|dbm| dbm.up())
    }

    pub fn down(&mut self) {
        self.modify(|dbm| dbm.down())
    }

    pub fn free_clock(&mut self, clock: Clock) {
        self.modify(|dbm| dbm.free_clock(clock))
    }

    pub fn free_up(&mut self, clock: Clock) {
        self.modify(|dbm| dbm.free_up(clock))
    }

    pub fn free_down(&mut self, clock: Clock) {
        self.modify(|dbm| dbm.free_down(clock))
    }

    pub fn update_value(&mut self, clock: Clock, value: Limit) -> Result<()> {
        self.modify(|dbm| dbm.update_value(clock, value))
    }

    pub fn update_clock(&mut self, lhs: Clock, rhs: Clock) {
        self.modify(|dbm| dbm.update_clock(lhs, rhs))
    }

    pub fn update(&mut self, lhs: Clock, rhs: Clock, value: Limit) -> Result<()> {
        self.modify(|dbm| dbm.update(lhs, rhs, value))
    }

    pub fn convex_union(&mut self, other: &Self) {
        if self.ptr_eq(other) {
            return;
        }
        self.modify(|dbm| dbm.convex_union(other.dbm()))
    }

    pub fn extrapolate_max_bounds(&mut self, bounds: &Bounds) {
        self.modify(|dbm| dbm.extrapolate_max_bounds(bounds))
    }

    pub fn extrapolate_lu_bounds(&mut self, bounds: &Bounds) {
        self.modify(|dbm| dbm.extrapolate_lu_bounds(bounds))
    }

    pub fn constrain(self, i: Clock, j: Clock, relation: Relation) -> Option<Self> {
        if self.dbm()[(i, j)] <= relation {
            return Some(self);
        }
        self.transform(|dbm| dbm.constrain(i, j, relation))
    }

    pub fn constrain_all(self, constraints: &[Constraint]) -> Option<Self> {
        self.transform(|dbm| dbm.constrain_all(constraints))
    }

    pub fn intersection(self, other: &Self) -> Option<Self> {
        if self.ptr_eq(other) {
            return Some(self);
        }
        self.transform(|dbm| dbm.intersection(other.dbm()))
    }

    pub fn relation(&self, other: &Self) -> Relationship {
        if self.ptr_eq(other) {
            return Relationship::Equal;
        }
        self.dbm().relation(other.dbm())
    }

    pub fn encode(&self, options: EncodingOptions) -> Encoding {
        Encoding::new(self.dbm(), options)
    }

    pub fn decode(encoding: &Encoding) -> Result<Self> {
        mingraph::decode(encoding.words()).map(Self::new)
    }

    /// Shares the matrix with every structurally equal matrix in the table.
    pub fn intern(&mut self, table: &InternTable) {
        table.intern_in_place(self)
    }
}

impl Deref for DbmHandle {
    type Target = DBM<Canonical>;

    fn deref(&self) -> &Self::Target {
        &self.inner.dbm
    }
}

impl From<DBM<Canonical>> for DbmHandle {
    fn from(dbm: DBM<Canonical>) -> Self {
        Self::new(dbm)
    }
}

impl PartialEq for DbmHandle {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
            || (self.inner.hash == other.inner.hash
                && self.dimension() == other.dimension()
                && matrix::are_equal(self.relations(), other.relations()))
    }
}

impl Eq for DbmHandle {}

impl Hash for DbmHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.inner.hash)
    }
}

impl fmt::Debug for DbmHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbmHandle")
            .field("hash", &self.inner.hash)
            .field("interned", &self.inner.interned)
            .field("dbm", &self.inner.dbm)
            .finish()
    }
}

impl fmt::Display for DbmHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner.dbm, f)
    }
}

/// A content-addressed table of weakly referenced matrices. Entries die
/// with their last handle and are removed by `purge` or on a later insert
/// into the same bucket.
#[derive(Default)]
pub struct InternTable {
    buckets: DashMap<u64, Vec<Weak<Entry>>>,
}

impl InternTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide table.
    pub fn global() -> &'static InternTable {
        static GLOBAL: OnceLock<InternTable> = OnceLock::new();
        GLOBAL.get_or_init(InternTable::new)
    }

    /// Returns a handle to the table's copy of the matrix, inserting it first if
    /// no structurally equal matrix is alive.
    pub fn intern(&self, mut handle: DbmHandle) -> DbmHandle {
        self.intern_in_place(&mut handle);
        handle
    }

    fn intern_in_place(&self, handle: &mut DbmHandle) {
        if handle.is_interned() {
            return;
        }

        // `Hash` is implemented for `&mut T`, so the call is spelled out.
        let hash = DbmHandle::hash(handle);
        let mut bucket = self.buckets.entry(hash).or_default();
        bucket.retain(|weak| weak.strong_count() > 0);

        for weak in bucket.iter() {
            if let Some(inner) = weak.upgrade() {
                let candidate = DbmHandle { inner };
                if candidate == *handle {
                    trace!(hash, "interned matrix reused");
                    *handle = candidate;
                    return;
                }
            }
        }

        match Arc::get_mut(&mut handle.inner) {
            Some(entry) => entry.interned = true,
            None => {
                let mut entry = Entry::clone(&handle.inner);
                entry.interned = true;
                handle.inner = Arc::new(entry);
            }
        }
        bucket.push(Arc::downgrade(&handle.inner));
    }

    /// The number of live matrices in the table.
    pub fn len(&self) -> usize {
        self.buckets
            .iter()
            .map(|bucket| bucket.iter().filter(|weak| weak.strong_count() > 0).count())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops the entries whose matrices are no longer referenced.
    pub fn purge(&self) {
        self.buckets.retain(|_, bucket| {
            bucket.retain(|weak| weak.strong_count() > 0);
            !bucket.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use crate::zones::constraint::Constraint;

    use super::*;

    fn bounded(limit: Limit) -> DbmHandle {
        let dbm = DBM::from_constraints(3, &[Constraint::upper(1, Relation::weak(limit))])
            .ok()
            .unwrap();
        DbmHandle::new(dbm)
    }

    #[test]
    fn clones_share_until_written() {
        let mut a = bounded(5);
        let b = a.clone();
        assert_eq!(2, a.ref_count());
        assert!(a.ptr_eq(&b));

        a.up();
        assert!(!a.ptr_eq(&b));
        assert_eq!(1, a.ref_count());
        assert_eq!(1, b.ref_count());
        assert!(a.upper(1).is_infinity());
        assert_eq!(Relation::weak(5), b.upper(1));
    }

    #[test]
    fn hash_follows_content() {
        let mut a = bounded(5);
        let b = bounded(5);
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a, b);

        a.free_clock(1);
        assert_ne!(a, b);
        assert_eq!(DbmHandle::universe(3).hash(), a.hash());
    }

    #[test]
    fn constrain_drops_empty_zones() {
        let handle = bounded(5);
        assert!(handle.clone().constrain(0, 1, Relation::strict(-5)).is_none());

        let kept = handle.clone().constrain(1, 0, Relation::weak(7)).unwrap();
        assert!(kept.ptr_eq(&handle));

        let tightened = handle.constrain(1, 0, Relation::weak(2)).unwrap();
        assert_eq!(Relation::weak(2), tightened.upper(1));
    }

    #[test]
    fn interning_shares_equal_matrices() {
        let table = InternTable::new();
        let mut a = bounded(5);
        let mut b = bounded(5);
        let mut c = bounded(6);
        assert!(!a.ptr_eq(&b));

        a.intern(&table);
        b.intern(&table);
        c.intern(&table);
        assert!(a.is_interned());
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(2, table.len());

        drop(c);
        table.purge();
        assert_eq!(1, table.len());
    }

    #[test]
    fn interning_is_transparent() {
        let table = InternTable::new();
        let plain = bounded(5);
        let mut interned = plain.clone();
        interned.intern(&table);
        assert_eq!(plain, interned);
        assert_eq!(plain.hash(), interned.hash());
        assert_eq!(Relationship::Equal, plain.relation(&interned));

        let mut b = bounded(5);
        b.intern(&table);
        b.up();
        assert!(!b.is_interned());
        assert!(interned.upper(1).is_weak());
        assert_eq!(Relation::weak(5), interned.upper(1));
        assert_eq!(1, table.len());
    }

    #[test]
    fn table_intern_reuses_live_entry() {
        let table = InternTable::new();
        let first = table.intern(bounded(7));
        let mut second = table.intern(bounded(7));
        assert!(first.ptr_eq(&second));
        assert_eq!(2, first.ref_count());

        let by_ref: &mut DbmHandle = &mut second;
        assert_eq!(first.hash(), DbmHandle::hash(by_ref));
        assert_eq!(1, table.len());
    }

    #[test]
    fn global_table_is_shared() {
        let mut a = bounded(1234);
        let mut b = bounded(1234);
        a.intern(InternTable::global());
        b.intern(InternTable::global());
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn encoding_round_trip() {
        let handle = bounded(5);
        let encoding = handle.encode(EncodingOptions::default());
        assert_eq!(handle, DbmHandle::decode(&encoding).unwrap());
    }
}
