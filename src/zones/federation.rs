use std::{
    fmt,
    ops::{BitAndAssign, BitOrAssign, SubAssign},
};

use itertools::Itertools;
use petgraph::unionfind::UnionFind;
use tracing::{debug, instrument, trace};

use super::{
    bounds::Bounds,
    constraint::{Clock, Constraint, Limit, Relation, REFERENCE},
    dbm::{Canonical, Relationship, Zone, DBM},
    error::{Result, ZoneError},
    handle::DbmHandle,
    matrix::{self, BitMatrix},
    mingraph::{self, Encoding, EncodingOptions},
};

/// The order in which the constraints of a subtrahend split the minuend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SubtractionStrategy {
    /// Splits along the minimal graph in row-major order.
    MinimalGraph,
    /// Splits first along the constraints cutting off the largest part.
    #[default]
    WorstValue,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FederationConfig {
    pub subtraction: SubtractionStrategy,
    /// Only merge DBMs sharing all but one of their constraints when reducing.
    pub restricted_merge: bool,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            subtraction: SubtractionStrategy::default(),
            restricted_merge: true,
        }
    }
}

/// A zone represented as the union of DBMs.
#[derive(Clone)]
pub struct Federation {
    dimension: Clock,
    dbms: Vec<DbmHandle>,
    config: FederationConfig,
}

impl Federation {
    #[inline]
    pub fn new(dimension: Clock, dbms: Vec<DbmHandle>) -> Federation {
        for dbm in dbms.iter() {
            if dbm.dimension() != dimension {
                panic!("inconsistent dimension between federation and DBM")
            }
        }

        Federation {
            dimension,
            dbms,
            config: FederationConfig::default(),
        }
    }

    /// Builds a federation from DBMs of foreign origin.
    pub fn from_dbms(dimension: Clock, dbms: Vec<DBM<Canonical>>) -> Result<Federation> {
        if let Some(dbm) = dbms.iter().find(|dbm| dbm.dimension() != dimension) {
            return Err(ZoneError::DimensionMismatch {
                expected: dimension,
                actual: dbm.dimension() as usize,
            });
        }
        Ok(Federation::new(
            dimension,
            dbms.into_iter().map(DbmHandle::new).collect(),
        ))
    }

    #[inline]
    pub fn from_dbm(dbm: DBM<Canonical>) -> Federation {
        Federation::from_handle(DbmHandle::new(dbm))
    }

    #[inline]
    pub fn from_handle(handle: DbmHandle) -> Federation {
        Federation::new(handle.dimension(), vec![handle])
    }

    pub fn from_zone(zone: Zone) -> Federation {
        let dimension = zone.dimension();
        match zone.ok() {
            Some(dbm) => Federation::from_dbm(dbm),
            None => Federation::empty(dimension),
        }
    }

    #[inline]
    pub fn zero(dimension: Clock) -> Federation {
        Federation::from_handle(DbmHandle::zero(dimension))
    }

    #[inline]
    pub fn universe(dimension: Clock) -> Federation {
        Federation::from_handle(DbmHandle::universe(dimension))
    }

    #[inline]
    pub fn empty(dimension: Clock) -> Federation {
        Federation::new(dimension, vec![])
    }

    pub fn with_config(mut self, config: FederationConfig) -> Federation {
        self.config = config;
        self
    }

    pub const fn config(&self) -> FederationConfig {
        self.config
    }

    /// Returns the number of clocks excluding the reference clock.
    #[inline]
    pub const fn clocks(&self) -> Clock {
        self.dimension - 1
    }

    #[inline]
    pub const fn dimension(&self) -> Clock {
        self.dimension
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dbms.is_empty()
    }

    /// The number of DBMs in the union.
    #[inline]
    pub fn len(&self) -> usize {
        self.dbms.len()
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, DbmHandle> {
        self.dbms.iter()
    }

    /// Adds a DBM without checking for inclusion.
    #[inline]
    pub fn append(&mut self, dbm: DbmHandle) {
        if dbm.dimension() != self.dimension {
            panic!("inconsistent dimension between federation and DBM");
        }
        self.dbms.push(dbm);
    }

    pub fn clear(&mut self) {
        self.dbms.clear();
    }

    pub fn set_zero(&mut self) {
        self.dbms = vec![DbmHandle::zero(self.dimension)];
    }

    pub fn set_init(&mut self) {
        self.dbms = vec![DbmHandle::universe(self.dimension)];
    }

    fn check_dimension(&self, other: &Federation) {
        if self.dimension != other.dimension {
            panic!("inconsistent dimension between federations")
        }
    }

    fn check_dbm_dimension(&self, dbm: &DBM<Canonical>) {
        if self.dimension != dbm.dimension() {
            panic!("inconsistent dimension between federation and DBM")
        }
    }

    /// Replaces every DBM by the outcome of the operation, dropping the empty ones.
    fn filter_map_mut<F>(&mut self, f: F)
    where
        F: FnMut(DbmHandle) -> Option<DbmHandle>,
    {
        let dbms = std::mem::take(&mut self.dbms);
        self.dbms = dbms.into_iter().filter_map(f).collect();
    }

    fn for_each_mut<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut DBM<Canonical>),
    {
        for dbm in self.dbms.iter_mut() {
            dbm.modify(&mut f);
        }
    }

    fn try_for_each_mut<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&mut DBM<Canonical>) -> Result<()>,
    {
        for dbm in self.dbms.iter_mut() {
            dbm.modify(&mut f)?;
        }
        Ok(())
    }

    pub fn up(&mut self) {
        self.for_each_mut(|dbm| dbm.up())
    }

    pub fn down(&mut self) {
        self.for_each_mut(|dbm| dbm.down())
    }

    pub fn up_stop(&mut self, stopped: &[Clock]) {
        self.for_each_mut(|dbm| dbm.up_stop(stopped))
    }

    pub fn down_stop(&mut self, stopped: &[Clock]) {
        self.for_each_mut(|dbm| dbm.down_stop(stopped))
    }

    pub fn free_clock(&mut self, clock: Clock) {
        self.for_each_mut(|dbm| dbm.free_clock(clock))
    }

    pub fn free_up(&mut self, clock: Clock) {
        self.for_each_mut(|dbm| dbm.free_up(clock))
    }

    pub fn free_down(&mut self, clock: Clock) {
        self.for_each_mut(|dbm| dbm.free_down(clock))
    }

    pub fn free_all_up(&mut self) {
        self.for_each_mut(|dbm| dbm.free_all_up())
    }

    pub fn free_all_down(&mut self) {
        self.for_each_mut(|dbm| dbm.free_all_down())
    }

    pub fn update_value(&mut self, clock: Clock, value: Limit) -> Result<()> {
        self.try_for_each_mut(|dbm| dbm.update_value(clock, value))
    }

    pub fn update_clock(&mut self, lhs: Clock, rhs: Clock) {
        self.for_each_mut(|dbm| dbm.update_clock(lhs, rhs))
    }

    pub fn update_increment(&mut self, clock: Clock, value: Limit) -> Result<()> {
        self.try_for_each_mut(|dbm| dbm.update_increment(clock, value))
    }

    pub fn update(&mut self, lhs: Clock, rhs: Clock, value: Limit) -> Result<()> {
        self.try_for_each_mut(|dbm| dbm.update(lhs, rhs, value))
    }

    pub fn relax_up(&mut self) {
        self.for_each_mut(|dbm| dbm.relax_up())
    }

    pub fn relax_down(&mut self) {
        self.for_each_mut(|dbm| dbm.relax_down())
    }

    pub fn relax_up_clock(&mut self, clock: Clock) {
        self.for_each_mut(|dbm| dbm.relax_up_clock(clock))
    }

    pub fn relax_down_clock(&mut self, clock: Clock) {
        self.for_each_mut(|dbm| dbm.relax_down_clock(clock))
    }

    pub fn relax_all(&mut self) {
        self.for_each_mut(|dbm| dbm.relax_all())
    }

    pub fn tighten_down(&mut self) {
        self.filter_map_mut(|dbm| dbm.transform(|dbm| dbm.tighten_down()))
    }

    pub fn tighten_up(&mut self) {
        self.filter_map_mut(|dbm| dbm.transform(|dbm| dbm.tighten_up()))
    }

    pub fn extrapolate_max_bounds(&mut self, bounds: &Bounds) {
        self.for_each_mut(|dbm| dbm.extrapolate_max_bounds(bounds))
    }

    pub fn diagonal_extrapolate_max_bounds(&mut self, bounds: &Bounds) {
        self.for_each_mut(|dbm| dbm.diagonal_extrapolate_max_bounds(bounds))
    }

    pub fn extrapolate_lu_bounds(&mut self, bounds: &Bounds) {
        self.for_each_mut(|dbm| dbm.extrapolate_lu_bounds(bounds))
    }

    pub fn diagonal_extrapolate_lu_bounds(&mut self, bounds: &Bounds) {
        self.for_each_mut(|dbm| dbm.diagonal_extrapolate_lu_bounds(bounds))
    }

    pub fn swap_clocks(&mut self, x: Clock, y: Clock) {
        self.for_each_mut(|dbm| dbm.swap_clocks(x, y))
    }

    /// Tightens every DBM with "i - j ≺ c". Returns true if the federation is non-empty.
    pub fn constrain(&mut self, i: Clock, j: Clock, relation: Relation) -> bool {
        self.filter_map_mut(|dbm| dbm.constrain(i, j, relation));
        !self.is_empty()
    }

    pub fn constrain_all(&mut self, constraints: &[Constraint]) -> bool {
        self.filter_map_mut(|dbm| dbm.constrain_all(constraints));
        !self.is_empty()
    }

    pub fn constrain_clock(&mut self, clock: Clock, value: Limit) -> bool {
        self.filter_map_mut(|dbm| dbm.transform(|dbm| dbm.constrain_clock(clock, value)));
        !self.is_empty()
    }

    pub fn satisfies(&self, i: Clock, j: Clock, relation: Relation) -> bool {
        self.dbms.iter().any(|dbm| dbm.satisfies(i, j, relation))
    }

    pub fn contains_point(&self, point: &[Limit]) -> bool {
        self.dbms.iter().any(|dbm| dbm.contains_point(point))
    }

    pub fn contains_real_point(&self, point: &[f64]) -> bool {
        self.dbms.iter().any(|dbm| dbm.contains_real_point(point))
    }

    pub fn has_zero(&self) -> bool {
        self.dbms.iter().any(|dbm| dbm.has_zero())
    }

    pub fn is_unbounded(&self) -> bool {
        self.dbms.iter().any(|dbm| dbm.is_unbounded())
    }

    /// The loosest upper bound of the clock, none if the federation is empty.
    pub fn max_upper(&self, clock: Clock) -> Option<Relation> {
        self.dbms.iter().map(|dbm| dbm.upper(clock)).max()
    }

    /// The loosest lower bound of the clock, none if the federation is empty.
    pub fn max_lower(&self, clock: Clock) -> Option<Relation> {
        self.dbms.iter().map(|dbm| dbm.lower(clock)).max()
    }

    /// Whether some pair of DBMs may intersect. This is an over-approximation
    /// as only the pairs of opposing bounds are compared.
    pub fn intersects(&self, other: &Federation) -> bool {
        self.check_dimension(other);
        self.dbms
            .iter()
            .cartesian_product(other.dbms.iter())
            .any(|(lhs, rhs)| lhs.intersects(rhs))
    }

    pub fn intersects_dbm(&self, dbm: &DbmHandle) -> bool {
        self.check_dbm_dimension(dbm);
        self.dbms.iter().any(|lhs| lhs.intersects(dbm))
    }

    /// Replaces the union by its smallest enclosing DBM.
    pub fn convex_hull(&mut self) {
        if let Some((first, rest)) = self.dbms.split_first_mut() {
            first.modify(|hull| {
                for dbm in rest.iter() {
                    hull.convex_union(dbm.dbm());
                }
            });
            self.dbms.truncate(1);
        }
    }

    /// Removes the DBMs which are included in the given DBM. Returns true if
    /// the given DBM is not included in any of the remaining DBMs.
    pub fn remove_included_in_dbm(&mut self, other: &DbmHandle) -> bool {
        self.check_dbm_dimension(other);
        let mut not_included = true;
        self.dbms.retain(|dbm| match dbm.relation(other) {
            Relationship::Equal | Relationship::Subset => false,
            Relationship::Superset => {
                not_included = false;
                true
            }
            Relationship::Different => true,
        });
        not_included
    }

    /// Removes the DBMs which are included in some DBM of the other federation.
    pub fn remove_included_in(&mut self, other: &Federation) {
        self.check_dimension(other);
        self.dbms
            .retain(|dbm| !other.dbms.iter().any(|rhs| dbm.is_subset_eq(rhs.dbm())));
    }

    /// True if some DBM has all its upper bounds strictly looser than the
    /// given DBM. Such a DBM can never be fully removed by the subtraction.
    pub fn can_skip_subtract(&self, other: &DbmHandle) -> bool {
        self.dbms
            .iter()
            .any(|dbm| (1..self.dimension).all(|i| dbm.upper(i) > other.upper(i)))
    }

    /// Adds the DBM unless it is included in an existing one, removing the
    /// existing DBMs included in it.
    pub fn add(&mut self, dbm: DbmHandle) {
        if self.remove_included_in_dbm(&dbm) {
            self.dbms.push(dbm);
        }
    }

    pub fn union(&mut self, other: &Federation) {
        self.check_dimension(other);
        if self.is_empty() {
            self.dbms = other.dbms.clone();
            return;
        }

        for dbm in other.dbms.iter() {
            self.add(dbm.clone());
        }
    }

    /// Intersects every DBM with the operand.
    pub fn intersect(&mut self, operand: &DbmHandle) {
        self.check_dbm_dimension(operand);
        self.filter_map_mut(|dbm| dbm.intersection(operand));
        self.merge_reduce();
    }

    /// The union of the pairwise intersections.
    pub fn intersection(&mut self, other: &Federation) {
        self.check_dimension(other);
        if other.is_empty() {
            self.clear();
            return;
        }
        if self.is_empty() {
            return;
        }

        let mut result = Vec::with_capacity(self.len() * other.len());
        for operand in other.dbms.iter() {
            result.extend(
                self.dbms
                    .iter()
                    .filter_map(|dbm| dbm.clone().intersection(operand)),
            );
        }
        self.dbms = result;
        self.merge_reduce();
    }

    /// Removes the valuations of the DBM. The DBMs of the result are pairwise disjoint
    /// if the DBMs of the minuend were.
    #[instrument(level = "trace", skip_all, fields(dimension = self.dimension, size = self.len()))]
    pub fn subtract(&mut self, subtrahend: &DbmHandle) {
        self.check_dbm_dimension(subtrahend);
        if self.is_empty() {
            return;
        }
        if self.dimension <= 1 {
            self.clear();
            return;
        }

        let mut edges: Option<Vec<(Clock, Clock)>> = None;
        let mut difference = Federation::empty(self.dimension).with_config(self.config);
        for dbm in std::mem::take(&mut self.dbms) {
            // No subtraction is guaranteed to happen so just keep the DBM.
            if !dbm.intersects(subtrahend) {
                difference.dbms.push(dbm);
                continue;
            }

            let edges = edges.get_or_insert_with(|| minimal_edges(subtrahend));
            if edges.is_empty() {
                // The subtrahend is the universe.
                self.clear();
                return;
            }

            let parts = split(dbm.into_dbm(), subtrahend, edges, self.config.subtraction);
            trace!(parts = parts.len(), "split minuend");
            for part in parts {
                difference.add(DbmHandle::new(part));
            }
        }
        self.dbms = difference.dbms;
    }

    pub fn subtraction(&mut self, other: &Federation) {
        self.check_dimension(other);
        for dbm in other.dbms.iter() {
            if self.is_empty() {
                break;
            }
            self.subtract(dbm);
        }
    }

    /// The complement with respect to the non-negative valuations.
    pub fn inverse(&self) -> Federation {
        let mut inverse = Federation::universe(self.dimension).with_config(self.config);
        inverse.subtraction(self);
        inverse
    }

    /// True if every valuation of this federation is in the other.
    pub fn is_subtraction_empty(&self, other: &Federation) -> bool {
        self.check_dimension(other);
        if self.is_empty() {
            return true;
        }
        if other.is_empty() {
            return false;
        }

        if self.dbms.iter().all(|dbm| dbm.is_subset_eq(other.dbms[0].dbm())) {
            return true;
        }
        if other.len() == 1 {
            return false;
        }

        let mut difference = self.clone();
        difference.subtraction(other);
        difference.is_empty()
    }

    pub fn is_subset_eq_dbm(&self, dbm: &DbmHandle) -> bool {
        self.dbms.iter().all(|lhs| lhs.is_subset_eq(dbm.dbm()))
    }

    /// An approximate relation: subset if every DBM of self is included in
    /// some DBM of other, and superset the other way round.
    pub fn relation(&self, other: &Federation) -> Relationship {
        self.check_dimension(other);
        if self.is_empty() {
            return Relationship::from_flags(true, other.is_empty());
        }
        if other.is_empty() {
            return Relationship::Superset;
        }

        let subset = self
            .dbms
            .iter()
            .all(|lhs| other.dbms.iter().any(|rhs| lhs.is_subset_eq(rhs.dbm())));
        let superset = other
            .dbms
            .iter()
            .all(|rhs| self.dbms.iter().any(|lhs| lhs.is_superset_eq(rhs.dbm())));
        Relationship::from_flags(subset, superset)
    }

    pub fn relation_dbm(&self, dbm: &DbmHandle) -> Relationship {
        self.check_dbm_dimension(dbm);
        if self.is_empty() {
            return Relationship::Subset;
        }

        let mut subset = true;
        let mut superset = false;
        for lhs in self.dbms.iter() {
            let relationship = lhs.relation(dbm);
            subset &= relationship.is_subset_eq();
            superset |= relationship.is_superset_eq();
        }
        Relationship::from_flags(subset, superset)
    }

    /// The relation of the represented sets, decided by subtraction.
    pub fn exact_relation(&self, other: &Federation) -> Relationship {
        self.check_dimension(other);
        Relationship::from_flags(
            self.is_subtraction_empty(other),
            other.is_subtraction_empty(self),
        )
    }

    /// Removes the DBMs included in another DBM of the federation.
    pub fn reduce(&mut self) {
        let mut i = 0;
        'outer: while i < self.dbms.len() {
            let mut j = i + 1;
            while j < self.dbms.len() {
                match self.dbms[i].relation(&self.dbms[j]) {
                    Relationship::Different => j += 1,
                    Relationship::Superset | Relationship::Equal => {
                        self.dbms.remove(j);
                    }
                    Relationship::Subset => {
                        self.dbms.remove(i);
                        continue 'outer;
                    }
                }
            }
            i += 1;
        }
    }

    /// Merges pairs of DBMs whose convex union equals their union.
    #[instrument(level = "debug", skip_all, fields(dimension = self.dimension, size = self.len()))]
    pub fn merge_reduce(&mut self) {
        self.merge_reduce_from(0, 0);
    }

    /// Like `merge_reduce` but assumes the first `skip` DBMs are already reduced.
    /// Higher levels try harder to prove a merge sound by looking at the other
    /// DBMs: level 1 looks for a single DBM covering the excess, level 2 subtracts
    /// all of them.
    pub fn merge_reduce_from(&mut self, skip: usize, level: u8) {
        if self.dbms.len() < 2 {
            return;
        }
        let before = self.dbms.len();

        let mut i = skip;
        'outer: while i < self.dbms.len() {
            let mut j = 0;
            while j < i {
                let scan = PairScan::new(&self.dbms[i], &self.dbms[j]);
                if scan.disjoint {
                    j += 1;
                    continue;
                }
                if scan.subset {
                    self.dbms.remove(i);
                    continue 'outer;
                }
                if scan.superset {
                    self.dbms.remove(j);
                    i -= 1;
                    continue;
                }

                let mergeable = if level > 0 || !self.config.restricted_merge {
                    scan.rows > 0
                } else {
                    scan.rows + 2 >= self.dimension as usize
                };
                if mergeable && self.is_safe_merge(i, j, level) {
                    let other = self.dbms.remove(j);
                    i -= 1;
                    self.dbms[i].convex_union(&other);
                    j = 0;
                    continue;
                }
                j += 1;
            }
            i += 1;
        }

        debug!(before, after = self.dbms.len(), "merge reduced");
    }

    /// Whether the convex union of DBMs i and j adds no valuation to the federation.
    fn is_safe_merge(&self, i: usize, j: usize, level: u8) -> bool {
        let mut convex = self.dbms[i].clone();
        convex.convex_union(&self.dbms[j]);

        let mut excess = Federation::from_handle(convex).with_config(self.config);
        excess.subtract(&self.dbms[i]);
        if excess.is_subset_eq_dbm(&self.dbms[j]) {
            return true;
        }
        if level == 0 {
            return false;
        }

        excess.subtract(&self.dbms[j]);
        for (k, dbm) in self.dbms.iter().enumerate() {
            if k == i || k == j {
                continue;
            }
            if level == 1 {
                excess.remove_included_in(&Federation::from_handle(dbm.clone()));
            } else {
                excess.subtract(dbm);
            }
            if excess.is_empty() {
                return true;
            }
        }
        excess.is_empty()
    }

    /// Merges groups of DBMs whose convex hull is covered by the group.
    pub fn convex_reduce(&mut self) {
        if self.dbms.len() < 2 {
            return;
        }
        let before = self.dbms.len();

        let mut i = 0;
        'outer: while i < self.dbms.len() {
            let dbm = self.dbms[i].clone();
            let mut hull = dbm.clone();
            let mut removed: Vec<DbmHandle> = Vec::new();

            let mut j = i + 1;
            while j < self.dbms.len() {
                let scan = PairScan::new(&dbm, &self.dbms[j]);
                if scan.disjoint {
                    j += 1;
                } else if scan.subset {
                    self.dbms.remove(i);
                    self.dbms.append(&mut removed);
                    continue 'outer;
                } else if scan.superset {
                    self.dbms.remove(j);
                } else if scan.symmetric && self.is_exact_merge(&dbm, &self.dbms[j]) {
                    let other = self.dbms.remove(j);
                    self.dbms[i].convex_union(&other);
                    self.dbms.append(&mut removed);
                    continue 'outer;
                } else if scan.compatible {
                    hull.convex_union(&self.dbms[j]);
                    removed.push(self.dbms.remove(j));
                } else {
                    j += 1;
                }
            }

            if removed.is_empty() {
                i += 1;
                continue;
            }

            let mut j = i + 1;
            while j < self.dbms.len() {
                if self.dbms[j].is_subset_eq(hull.dbm()) {
                    removed.push(self.dbms.remove(j));
                } else {
                    j += 1;
                }
            }

            let mut covered = Federation::new(self.dimension, removed.clone()).with_config(self.config);
            covered.merge_reduce();
            let mut excess = Federation::from_handle(hull.clone()).with_config(self.config);
            excess.subtract(&dbm);
            excess.subtraction(&covered);

            if excess.is_empty() {
                trace!(merged = removed.len() + 1, "replaced by convex hull");
                self.dbms[i] = hull;
                continue;
            }

            excess.merge_reduce();
            let mut replacement = Federation::from_handle(hull).with_config(self.config);
            replacement.subtraction(&excess);
            replacement.merge_reduce();
            if replacement.len() <= removed.len() {
                self.dbms.remove(i);
                self.dbms.extend(replacement.dbms);
                continue;
            }

            self.dbms.append(&mut removed);
            i += 1;
        }

        debug!(before, after = self.dbms.len(), "convex reduced");
    }

    fn is_exact_merge(&self, lhs: &DbmHandle, rhs: &DbmHandle) -> bool {
        let mut convex = lhs.clone();
        convex.convex_union(rhs);
        let mut excess = Federation::from_handle(convex).with_config(self.config);
        excess.subtract(lhs);
        excess.subtract(rhs);
        excess.is_empty()
    }

    /// Removes every DBM covered by the union of the others.
    pub fn expensive_reduce(&mut self) {
        let mut i = 0;
        while self.dbms.len() > 1 && i < self.dbms.len() {
            let current = self.dbms.remove(i);
            let rest = Federation::new(self.dimension, self.dbms.clone()).with_config(self.config);

            if rest.is_subtraction_empty(&Federation::from_handle(current.clone())) {
                self.dbms = vec![current];
                break;
            }
            if Federation::from_handle(current.clone())
                .with_config(self.config)
                .is_subtraction_empty(&rest)
            {
                continue;
            }
            self.dbms.insert(i, current);
            i += 1;
        }
    }

    /// Replaces the federation by its convex hull minus the excess when that
    /// takes fewer DBMs.
    pub fn expensive_convex_reduce(&mut self) {
        if self.dbms.len() < 2 {
            return;
        }

        let mut hull = self.clone();
        hull.convex_hull();
        let mut excess = hull.clone();
        excess.subtraction(self);

        if excess.len() > 5 * self.len() {
            return;
        }
        excess.merge_reduce();
        if excess.len() > self.len() {
            return;
        }

        hull.subtraction(&excess);
        if hull.len() < 3 * (excess.len() + self.len()) {
            hull.merge_reduce();
            if hull.len() < self.len() {
                debug!(before = self.len(), after = hull.len(), "convex hull reduced");
                self.dbms = hull.dbms;
            }
        }
    }

    /// Partitions the DBMs into groups of (weakly) overlapping DBMs and
    /// reduces each group on its own.
    #[instrument(level = "debug", skip_all, fields(dimension = self.dimension, size = self.len()))]
    pub fn partition_reduce(&mut self) {
        if self.dbms.len() == 2 {
            self.convex_reduce();
            return;
        }
        if self.dbms.len() < 2 {
            return;
        }

        let count = self.dbms.len();
        let mut partitions = UnionFind::<usize>::new(count);
        for (i, j) in (0..count).tuple_combinations() {
            if !self.dbms[i].relaxed_intersection(self.dbms[j].dbm()).is_empty() {
                partitions.union(i, j);
            }
        }

        let labels = partitions.into_labeling();
        let dbms = std::mem::take(&mut self.dbms);
        let mut reduced = Vec::with_capacity(count);
        for (_, group) in &dbms
            .into_iter()
            .enumerate()
            .sorted_by_key(|(index, _)| (labels[*index], *index))
            .chunk_by(|(index, _)| labels[*index])
        {
            let mut partition = Federation::new(self.dimension, group.map(|(_, dbm)| dbm).collect())
                .with_config(self.config);
            partition.convex_reduce();
            partition.expensive_convex_reduce();
            reduced.extend(partition.dbms);
        }

        debug!(before = count, after = reduced.len(), "partition reduced");
        self.dbms = reduced;
    }

    /// The valuations that can delay into this federation while avoiding the bad
    /// federation, optionally restricted to a DBM.
    #[instrument(level = "debug", skip_all, fields(dimension = self.dimension, size = self.len(), bad = bad.len()))]
    pub fn predt(&self, bad: &Federation, restrict: Option<&DbmHandle>) -> Federation {
        self.check_dimension(bad);
        let restricted = |mut federation: Federation| {
            if let Some(restrict) = restrict {
                federation.intersect(restrict);
            }
            federation
        };

        if bad.is_empty() {
            let mut down = self.clone();
            down.down();
            return restricted(down);
        }

        let mut result = Federation::empty(self.dimension).with_config(self.config);
        for good in self.dbms.iter() {
            let mut down_good = good.clone();
            down_good.down();
            let down_good = match restrict {
                Some(restrict) => match down_good.intersection(restrict) {
                    Some(dbm) => dbm,
                    None => continue,
                },
                None => down_good,
            };

            let mut predecessors = Federation::from_handle(down_good.clone()).with_config(self.config);
            for bad in bad.dbms.iter() {
                if predecessors.is_empty() {
                    break;
                }
                if !down_good.intersects(bad) {
                    continue;
                }

                let mut down_bad = bad.clone();
                down_bad.down();
                let down_bad = match restrict {
                    Some(restrict) => down_bad.intersection(restrict),
                    None => Some(down_bad),
                };

                let mut part = Federation::from_handle(down_good.clone()).with_config(self.config);
                if let Some(down_bad) = down_bad {
                    part.subtract(&down_bad);
                    // Valuations delaying into the good part before reaching the bad one.
                    if let Some(meet) = down_bad.intersection(good) {
                        let mut escape = Federation::from_handle(meet).with_config(self.config);
                        escape.subtract(bad);
                        escape.down();
                        part.union(&restricted(escape));
                    }
                }
                predecessors.intersection(&part);
            }
            result.dbms.append(&mut predecessors.dbms);
        }
        result
    }

    /// For every DBM, the parts where some clock sits at its weak lower bound,
    /// minus the interiors of the DBMs.
    pub fn to_lower_bounds(&self) -> Federation {
        if self.is_empty() || self.dimension <= 1 {
            return self.clone();
        }

        let mut result = Federation::empty(self.dimension).with_config(self.config);
        for dbm in self.dbms.iter() {
            for clock in 1..self.dimension {
                let lower = dbm.lower(clock);
                if lower.is_weak() {
                    let bound = Relation::weak(-lower.limit());
                    if let Some(facet) = dbm.clone().constrain(clock, REFERENCE, bound) {
                        result.dbms.push(facet);
                    }
                }
            }
        }
        self.remove_interiors(result, |dbm| dbm.tighten_down())
    }

    /// For every DBM, the parts where some clock sits at its weak upper bound,
    /// minus the interiors of the DBMs.
    pub fn to_upper_bounds(&self) -> Federation {
        if self.is_empty() {
            return self.clone();
        }
        let mut result = Federation::empty(self.dimension).with_config(self.config);
        if self.dimension <= 1 {
            return result;
        }

        for dbm in self.dbms.iter() {
            for clock in 1..self.dimension {
                let upper = dbm.upper(clock);
                if upper.is_weak() {
                    let bound = Relation::weak(-upper.limit());
                    if let Some(facet) = dbm.clone().constrain(REFERENCE, clock, bound) {
                        result.dbms.push(facet);
                    }
                }
            }
        }
        self.remove_interiors(result, |dbm| dbm.tighten_up())
    }

    fn remove_interiors<F>(&self, mut result: Federation, tighten: F) -> Federation
    where
        F: Fn(DBM<Canonical>) -> Zone,
    {
        if self.len() > 1 {
            for dbm in self.dbms.iter() {
                if result.is_empty() {
                    break;
                }
                if let Some(interior) = dbm.clone().transform(&tighten) {
                    result.subtract(&interior);
                }
            }
        }
        result
    }

    /// Order independent hash of the DBMs.
    pub fn hash(&self) -> u64 {
        matrix::sorted_hash(self.dbms.iter().map(|dbm| dbm.hash()).collect())
    }

    pub fn intern(&mut self, table: &super::handle::InternTable) {
        for dbm in self.dbms.iter_mut() {
            dbm.intern(table);
        }
    }

    pub fn encode(&self, options: EncodingOptions) -> Vec<Encoding> {
        self.dbms.iter().map(|dbm| dbm.encode(options)).collect()
    }

    pub fn decode(dimension: Clock, encodings: &[Encoding]) -> Result<Federation> {
        let dbms = encodings
            .iter()
            .map(|encoding| mingraph::decode(encoding.words()))
            .collect::<Result<Vec<_>>>()?;
        Federation::from_dbms(dimension, dbms)
    }

    pub fn fmt_disjunctions(&self, labels: &[&str]) -> String {
        let mut disjunctions: Vec<String> = Vec::new();

        for dbm in self.dbms.iter() {
            let conjunctions = dbm.fmt_conjunctions(labels);
            if conjunctions.is_empty() {
                disjunctions.push("true".to_string());
            } else {
                disjunctions.push(format!("({})", conjunctions));
            }
        }

        disjunctions.join(" ∨ ")
    }
}

/// The comparison of two DBMs over all clock pairs i > j.
struct PairScan {
    /// Some pair of opposing bounds excludes the other DBM for sure.
    disjoint: bool,
    subset: bool,
    superset: bool,
    /// The number of rows sharing both bounds of some pair.
    rows: usize,
    /// Some bound is shared.
    compatible: bool,
    /// Both bounds of some pair are shared.
    symmetric: bool,
}

impl PairScan {
    fn new(lhs: &DBM<Canonical>, rhs: &DBM<Canonical>) -> Self {
        let dimension = lhs.dimension();
        let small = dimension <= 2;
        let mut scan = PairScan {
            disjoint: false,
            subset: true,
            superset: true,
            rows: small as usize,
            compatible: small,
            symmetric: small,
        };

        for i in 1..dimension {
            let mut row = false;
            for j in 0..i {
                let (lij, lji) = (lhs[(i, j)], lhs[(j, i)]);
                let (rij, rji) = (rhs[(i, j)], rhs[(j, i)]);
                if excludes(lij, rji) || excludes(lji, rij) {
                    scan.disjoint = true;
                    return scan;
                }

                scan.subset &= lij <= rij && lji <= rji;
                scan.superset &= lij >= rij && lji >= rji;
                let same = (lij == rij, lji == rji);
                scan.compatible |= same.0 || same.1;
                scan.symmetric |= same.0 && same.1;
                row |= same.0 && same.1;
            }
            scan.rows += row as usize;
        }
        scan
    }
}

/// True if "i - j ≺ a" and "j - i ≺ b" have no common solution even when both are weak.
fn excludes(a: Relation, b: Relation) -> bool {
    !a.is_infinity() && !b.is_infinity() && a.as_weak().negation() >= b.as_weak()
}

/// The cleaned minimal graph of the DBM in row-major order.
fn minimal_edges(dbm: &DBM<Canonical>) -> Vec<(Clock, Clock)> {
    let (bits, _): (BitMatrix, usize) = mingraph::minimal_graph(dbm);
    bits.ones().collect()
}

/// Splits the minuend along the negated edges of the subtrahend. Every part
/// lies outside the subtrahend and the parts are pairwise disjoint.
fn split(
    minuend: DBM<Canonical>,
    subtrahend: &DBM<Canonical>,
    edges: &[(Clock, Clock)],
    strategy: SubtractionStrategy,
) -> Vec<DBM<Canonical>> {
    let mut remainder = minuend;
    let mut pending: Vec<(Clock, Clock)> = edges
        .iter()
        .copied()
        .filter(|&(i, j)| subtrahend[(i, j)] < remainder[(i, j)])
        .collect();
    let mut parts = Vec::new();

    while !pending.is_empty() {
        let index = match strategy {
            SubtractionStrategy::MinimalGraph => 0,
            SubtractionStrategy::WorstValue => {
                match worst_edge(&remainder, subtrahend, &mut pending) {
                    Some(index) => index,
                    None => {
                        // The remainder is outside the subtrahend.
                        parts.push(remainder);
                        return parts;
                    }
                }
            }
        };
        if pending.is_empty() {
            break;
        }
        let (i, j) = pending.remove(index);

        let bound = subtrahend[(i, j)];
        if bound >= remainder[(i, j)] {
            continue;
        }
        let negated = bound.negation();
        if negated >= remainder[(j, i)] {
            parts.push(remainder);
            return parts;
        }

        if let Zone::Closed(part) = remainder.clone().constrain(j, i, negated) {
            parts.push(part);
        }
        remainder = match remainder.constrain(i, j, bound) {
            Zone::Closed(dbm) => dbm,
            Zone::Empty { .. } => return parts,
        };
    }

    // The remainder satisfies every edge of the subtrahend.
    parts
}

/// Picks the pending edge cutting off the most of the remainder. Edges that no
/// longer tighten the remainder are dropped. Returns none if some edge proves
/// the remainder disjoint from the subtrahend.
fn worst_edge(
    remainder: &DBM<Canonical>,
    subtrahend: &DBM<Canonical>,
    pending: &mut Vec<(Clock, Clock)>,
) -> Option<usize> {
    let mut best: Option<(i64, usize)> = None;
    let mut k = 0;
    while k < pending.len() {
        let (i, j) = pending[k];
        let bound = subtrahend[(i, j)];
        if bound.negation() >= remainder[(j, i)] {
            return None;
        }
        if bound >= remainder[(i, j)] {
            pending.swap_remove(k);
            continue;
        }

        let value = if remainder[(i, j)].is_infinity() {
            i64::MIN
        } else {
            worst_value(remainder, subtrahend, i, j)
        };
        if best.map_or(true, |(current, _)| value < current) {
            best = Some((value, k));
        }
        k += 1;
    }
    Some(best.map_or(0, |(_, index)| index))
}

/// How far the subtrahend's bound lies inside the remainder's. Edges implied
/// by a path through a third clock are tried last.
fn worst_value(remainder: &DBM<Canonical>, subtrahend: &DBM<Canonical>, i: Clock, j: Clock) -> i64 {
    let bound = subtrahend[(i, j)].as_weak().raw() as i64;
    for k in (0..remainder.dimension()).filter(|&k| k != i && k != j) {
        let paths = [
            (remainder[(i, k)], subtrahend[(k, j)]),
            (remainder[(k, j)], subtrahend[(i, k)]),
        ];
        for (first, second) in paths {
            if first.is_infinity() || second.is_infinity() {
                continue;
            }
            let path = first.as_weak().raw() as i64 + second.as_weak().raw() as i64;
            if bound >= path {
                return i64::MAX;
            }
        }
    }
    bound - remainder[(i, j)].raw() as i64
}

impl PartialEq for Federation {
    /// Structural equality: the same DBMs in any order.
    fn eq(&self, other: &Self) -> bool {
        self.dimension == other.dimension
            && self.len() == other.len()
            && self.hash() == other.hash()
            && self.dbms.iter().all(|dbm| other.dbms.contains(dbm))
    }
}

impl Eq for Federation {}

impl std::hash::Hash for Federation {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_u64(Federation::hash(self))
    }
}

impl fmt::Debug for Federation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Federation")
            .field("dimension", &self.dimension)
            .field("dbms", &self.dbms)
            .finish()
    }
}

impl fmt::Display for Federation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "false");
        }
        let labels: Vec<String> = (1..self.dimension)
            .map(|clock| format!("x{}", clock))
            .collect();
        let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
        write!(f, "{}", self.fmt_disjunctions(&labels))
    }
}

impl BitOrAssign<&Federation> for Federation {
    fn bitor_assign(&mut self, rhs: &Federation) {
        self.union(rhs)
    }
}

impl BitAndAssign<&Federation> for Federation {
    fn bitand_assign(&mut self, rhs: &Federation) {
        self.intersection(rhs)
    }
}

impl SubAssign<&Federation> for Federation {
    fn sub_assign(&mut self, rhs: &Federation) {
        self.subtraction(rhs)
    }
}

impl SubAssign<&DbmHandle> for Federation {
    fn sub_assign(&mut self, rhs: &DbmHandle) {
        self.subtract(rhs)
    }
}

impl From<DBM<Canonical>> for Federation {
    fn from(dbm: DBM<Canonical>) -> Self {
        Federation::from_dbm(dbm)
    }
}
