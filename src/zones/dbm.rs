use std::{fmt, ops::Index};

use bitset::BitSet;
use tracing::trace;

use super::{
    bounds::{Bounds, INACTIVE},
    constraint::{Clock, Constraint, Limit, Relation, Strictness, INFINITY, REFERENCE, ZERO},
    error::{Result, ZoneError},
    matrix,
};

pub trait DBMState: Sized {}

/// A Difference Bound Matrix. Entry (i, j) bounds the difference "i - j" of two clocks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DBM<State: DBMState> {
    /// The number of clocks inside the DBM including the reference clock.
    dimension: Clock,
    /// The relations between the clocks in row-major order.
    relations: Box<[Relation]>,
    /// The internal state important for the current type of DBM.
    state: State,
}

/// The outcome of an operation which may remove every valuation from a zone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Zone {
    Closed(DBM<Canonical>),
    Empty { dimension: Clock },
}

impl Zone {
    pub const fn is_empty(&self) -> bool {
        matches!(self, Zone::Empty { .. })
    }

    pub const fn dimension(&self) -> Clock {
        match self {
            Zone::Closed(dbm) => dbm.dimension,
            Zone::Empty { dimension } => *dimension,
        }
    }

    pub fn ok(self) -> Option<DBM<Canonical>> {
        match self {
            Zone::Closed(dbm) => Some(dbm),
            Zone::Empty { .. } => None,
        }
    }

    pub fn as_ref(&self) -> Option<&DBM<Canonical>> {
        match self {
            Zone::Closed(dbm) => Some(dbm),
            Zone::Empty { .. } => None,
        }
    }

    pub fn and_then<F>(self, f: F) -> Zone
    where
        F: FnOnce(DBM<Canonical>) -> Zone,
    {
        match self {
            Zone::Closed(dbm) => f(dbm),
            empty => empty,
        }
    }

    /// Turns emptiness into an error for callers that require a non-empty zone.
    pub fn non_empty(self) -> Result<DBM<Canonical>> {
        self.ok().ok_or(ZoneError::EmptyZone)
    }
}

impl From<DBM<Canonical>> for Zone {
    fn from(dbm: DBM<Canonical>) -> Self {
        Zone::Closed(dbm)
    }
}

/// How two zones relate to each other as sets of valuations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Relationship {
    Equal,
    Subset,
    Superset,
    Different,
}

impl Relationship {
    pub const fn from_flags(subset: bool, superset: bool) -> Self {
        match (subset, superset) {
            (true, true) => Relationship::Equal,
            (true, false) => Relationship::Subset,
            (false, true) => Relationship::Superset,
            (false, false) => Relationship::Different,
        }
    }

    pub const fn is_subset_eq(&self) -> bool {
        matches!(self, Relationship::Equal | Relationship::Subset)
    }

    pub const fn is_superset_eq(&self) -> bool {
        matches!(self, Relationship::Equal | Relationship::Superset)
    }

    /// The relationship read from the other side.
    pub const fn inverse(&self) -> Self {
        match self {
            Relationship::Subset => Relationship::Superset,
            Relationship::Superset => Relationship::Subset,
            other => *other,
        }
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relationship::Equal => write!(f, "Equal"),
            Relationship::Subset => write!(f, "Subset"),
            Relationship::Superset => write!(f, "Superset"),
            Relationship::Different => write!(f, "Different"),
        }
    }
}

impl<State: DBMState> DBM<State> {
    /// Returns the number of clocks excluding the reference clock.
    pub const fn clocks(&self) -> Clock {
        self.dimension - 1
    }

    /// Returns the number of clocks including the reference clock.
    pub const fn dimension(&self) -> Clock {
        self.dimension
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// Uses the row-wise indexing.
    ///
    /// Eg. 3 clocks (including the reference clock) DBM indexing "(row; column)-index":
    ///
    /// [(0; 0)-0, (0; 1)-1, (0; 2)-2]
    ///
    /// [(1; 0)-3, (1; 1)-4, (1; 2)-5]
    ///
    /// [(2; 0)-6, (2; 1)-7, (2; 2)-8]
    #[inline]
    pub const fn index(&self, i: Clock, j: Clock) -> usize {
        i as usize * self.dimension as usize + j as usize
    }

    #[inline]
    fn get(&self, i: Clock, j: Clock) -> Relation {
        self.relations[self.index(i, j)]
    }

    #[inline]
    fn set(&mut self, i: Clock, j: Clock, relation: Relation) {
        let index = self.index(i, j);
        self.relations[index] = relation
    }

    #[inline]
    fn check_clock(&self, clock: Clock) {
        assert!(
            clock < self.dimension,
            "clock {} out of range for dimension {}",
            clock,
            self.dimension
        );
    }

    #[inline]
    fn check_dimension<Other: DBMState>(&self, other: &DBM<Other>) {
        if self.dimension != other.dimension {
            panic!("inconsistent DBM dimension")
        }
    }

    /// The constraint "clock - 0".
    #[inline]
    pub fn upper(&self, clock: Clock) -> Relation {
        self.get(clock, REFERENCE)
    }

    /// The constraint "0 - clock".
    #[inline]
    pub fn lower(&self, clock: Clock) -> Relation {
        self.get(REFERENCE, clock)
    }

    pub fn lower_relations(&self) -> Vec<Relation> {
        (REFERENCE..self.dimension)
            .map(|clock| self.lower(clock))
            .collect()
    }

    pub fn upper_relations(&self) -> Vec<Relation> {
        (REFERENCE..self.dimension)
            .map(|clock| self.upper(clock))
            .collect()
    }

    /// One iteration of Floyd-Warshall with k as pivot. Returns false if a
    /// negative cycle is found which means that the zone is empty.
    fn close_single(&mut self, k: Clock) -> bool {
        let dim = self.dimension;
        for i in REFERENCE..dim {
            if i == k {
                continue;
            }

            let ik = self.get(i, k);
            if !ik.is_infinity() {
                for j in REFERENCE..dim {
                    let kj = self.get(k, j);
                    if kj.is_infinity() {
                        continue;
                    }

                    let ikj = ik.add_finite(&kj);
                    if self.get(i, j) > ikj {
                        self.set(i, j, ikj);
                    }
                }
            }

            if self.get(i, i) < ZERO {
                trace!(pivot = k, clock = i, "negative cycle");
                return false;
            }
        }
        true
    }

    /// Full closure. O(dim³).
    fn close_all(&mut self) -> bool {
        (REFERENCE..self.dimension).all(|k| self.close_single(k))
    }

    /// Closure only using the touched clocks as pivots. This is enough
    /// after tightening constraints between touched clocks of a closed DBM.
    fn close_touched(&mut self, touched: &BitSet) -> bool {
        (REFERENCE..self.dimension)
            .filter(|k| touched.test(*k as usize))
            .all(|k| self.close_single(k))
    }

    /// Incremental closure after tightening the single constraint (b, a) of
    /// a closed DBM. The tightened constraint must not make the zone empty.
    fn close_ij(&mut self, b: Clock, a: Clock) {
        let dim = self.dimension;
        if dim <= 2 {
            return;
        }

        let ba = self.get(b, a);

        for j in REFERENCE..dim {
            let aj = self.get(a, j);
            if aj.is_infinity() {
                continue;
            }

            let bj = ba.add_finite(&aj);
            if self.get(b, j) > bj {
                self.set(b, j, bj);
            }
        }

        for i in REFERENCE..dim {
            let ib = self.get(i, b);
            if ib.is_infinity() {
                continue;
            }

            let ia = ib.add_finite(&ba);
            if self.get(i, a) <= ia {
                continue;
            }

            self.set(i, a, ia);
            for j in REFERENCE..dim {
                let aj = self.get(a, j);
                if aj.is_infinity() {
                    continue;
                }

                let ij = ia.add_finite(&aj);
                if self.get(i, j) > ij {
                    self.set(i, j, ij);
                }
            }
        }
    }

    /// Closure that skips the pivots which are not compared against any constant.
    /// Returns false if a negative cycle is found.
    #[must_use]
    fn close_lu(&mut self, lower: &[Limit], upper: &[Limit]) -> bool {
        (REFERENCE..self.dimension)
            .filter(|k| lower[*k as usize] != INACTIVE || upper[*k as usize] != INACTIVE)
            .all(|k| self.close_single(k))
    }

    /// Returns true if every constraint satisfies the triangle inequality.
    pub fn is_closed(&self) -> bool {
        let dim = self.dimension;
        for k in REFERENCE..dim {
            for i in REFERENCE..dim {
                let ik = self.get(i, k);
                if ik.is_infinity() {
                    continue;
                }
                for j in REFERENCE..dim {
                    let kj = self.get(k, j);
                    if !kj.is_infinity() && self.get(i, j) > ik.add_finite(&kj) {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Returns true if some diagonal element is negative.
    pub fn has_negative_diagonal(&self) -> bool {
        (REFERENCE..self.dimension).any(|c| self.get(c, c) < ZERO)
    }

    /// Returns true if the point (with pt[0] = 0) satisfies all constraints.
    pub fn contains_point(&self, point: &[Limit]) -> bool {
        if point.len() != self.dimension as usize {
            panic!("inconsistent point dimension")
        }

        for i in REFERENCE..self.dimension {
            for j in REFERENCE..self.dimension {
                let difference = point[i as usize] as i64 - point[j as usize] as i64;
                let bound = self.get(i, j);
                if bound.is_infinity() {
                    continue;
                }
                let limit = bound.limit() as i64;
                if difference > limit || (difference == limit && bound.is_strict()) {
                    return false;
                }
            }
        }
        true
    }

    /// Same as contains_point but for real valued points.
    pub fn contains_real_point(&self, point: &[f64]) -> bool {
        if point.len() != self.dimension as usize {
            panic!("inconsistent point dimension")
        }

        for i in REFERENCE..self.dimension {
            for j in REFERENCE..self.dimension {
                let bound = self.get(i, j);
                if bound.is_infinity() {
                    continue;
                }

                let limit = point[j as usize] + bound.limit() as f64;
                let violated = match bound.strictness() {
                    Strictness::Strict => point[i as usize] >= limit,
                    Strictness::Weak => point[i as usize] > limit,
                };
                if violated {
                    return false;
                }
            }
        }
        true
    }

    /// Returns true if no clock has an upper bound.
    pub fn is_unbounded(&self) -> bool {
        (REFERENCE + 1..self.dimension).all(|clock| self.upper(clock).is_infinity())
    }

    /// Returns true if the origin (all clocks are zero) is part of the zone.
    pub fn has_zero(&self) -> bool {
        (REFERENCE + 1..self.dimension).all(|clock| self.lower(clock) >= ZERO)
    }

    /// The bitwise or of the one's complement magnitudes of every finite raw
    /// value. Every finite raw value fits in a signed integer with one bit
    /// more than the range.
    pub fn max_range(&self) -> u32 {
        self.relations
            .iter()
            .filter(|relation| !relation.is_infinity())
            .map(|relation| relation.raw() ^ (relation.raw() >> 31))
            .fold(0, |range, magnitude| range | magnitude as u32)
    }

    pub fn fmt_conjunctions(&self, labels: &[&str]) -> String {
        let mut conjunctions: Vec<String> = Vec::new();

        for i in REFERENCE + 1..self.dimension {
            let label = labels[(i - 1) as usize];

            // Lower bound: 0 - c R N.
            let lower = self.lower(i);
            if lower < ZERO {
                conjunctions.push(format!("-{} {} {}", label, lower.strictness(), lower.limit()));
            }

            // Upper bound: c - 0 R N.
            let upper = self.upper(i);
            if !upper.is_infinity() {
                conjunctions.push(format!("{} {} {}", label, upper.strictness(), upper.limit()));
            }

            for j in REFERENCE + 1..self.dimension {
                if i == j {
                    continue;
                }

                let relation = self.get(i, j);
                if relation.is_infinity() {
                    continue;
                }

                // Difference constraints: c0 - c1 R N.
                conjunctions.push(format!(
                    "{} - {} {} {}",
                    label,
                    labels[(j - 1) as usize],
                    relation.strictness(),
                    relation.limit()
                ));
            }
        }

        conjunctions.join(" ∧ ")
    }
}

impl<State: DBMState> Index<(Clock, Clock)> for DBM<State> {
    type Output = Relation;

    fn index(&self, index: (Clock, Clock)) -> &Self::Output {
        let (i, j) = index;
        &self.relations[self.index(i, j)]
    }
}

impl<State: DBMState> fmt::Display for DBM<State> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in REFERENCE..self.dimension {
            let row: Vec<String> = (REFERENCE..self.dimension)
                .map(|j| self.get(i, j).to_string())
                .collect();
            writeln!(f, "[{}]", row.join(" "))?;
        }
        Ok(())
    }
}

/// A closed and non-empty DBM.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Canonical {}
impl DBMState for Canonical {}

impl DBM<Canonical> {
    /// Returns the zone where every clock is zero.
    pub fn zero(dimension: Clock) -> Self {
        assert!(dimension > 0, "DBM dimension must be positive");
        Self {
            dimension,
            relations: vec![ZERO; dimension as usize * dimension as usize].into_boxed_slice(),
            state: Canonical {},
        }
    }

    /// Returns the zone where every clock is non-negative and otherwise unconstrained.
    pub fn universe(dimension: Clock) -> Self {
        let mut relations =
            vec![INFINITY; dimension as usize * dimension as usize].into_boxed_slice();
        matrix::init(&mut relations, dimension);
        Self {
            dimension,
            relations,
            state: Canonical {},
        }
    }

    /// The universe constrained by all the constraints.
    pub fn from_constraints(dimension: Clock, constraints: &[Constraint]) -> Zone {
        Self::universe(dimension).constrain_all(constraints)
    }

    pub fn dirty(self) -> DBM<Dirty> {
        let dimension = self.dimension;
        DBM {
            dimension,
            relations: self.relations,
            state: Dirty::new(dimension),
        }
    }

    /// Returns true if the zone is the universe of non-negative valuations.
    pub fn is_init(&self) -> bool {
        matrix::are_equal(&self.relations, &Self::universe(self.dimension).relations)
    }

    /// Sanity check of the invariants: closed, non-empty, and non-negative clocks.
    pub fn is_valid(&self) -> bool {
        self.is_closed()
            && !self.has_negative_diagonal()
            && (REFERENCE..self.dimension).all(|j| self.lower(j) <= ZERO)
    }

    /// Compares two zones with a single scan. The diagonal ends are skipped
    /// as they are always (0, ≤).
    pub fn relation(&self, other: &Self) -> Relationship {
        self.check_dimension(other);

        let count = self.relations.len();
        if self.dimension <= 1 {
            return Relationship::Equal;
        }

        let lhs = &self.relations[1..count - 1];
        let rhs = &other.relations[1..count - 1];
        let mut pairs = lhs.iter().zip(rhs.iter());

        // The first difference decides which inclusion to try.
        let superset = loop {
            match pairs.next() {
                None => return Relationship::Equal,
                Some((l, r)) if l == r => continue,
                Some((l, r)) => break l > r,
            }
        };

        for (l, r) in pairs {
            if (superset && l < r) || (!superset && l > r) {
                return Relationship::Different;
            }
        }

        if superset {
            Relationship::Superset
        } else {
            Relationship::Subset
        }
    }

    /// Returns true if all valuations of self are also in other.
    pub fn is_subset_eq(&self, other: &Self) -> bool {
        self.check_dimension(other);
        if self.dimension <= 1 {
            return true;
        }
        self.relations
            .iter()
            .zip(other.relations.iter())
            .all(|(lhs, rhs)| lhs <= rhs)
    }

    pub fn is_superset_eq(&self, other: &Self) -> bool {
        other.is_subset_eq(self)
    }

    /// Returns false only if the zones certainly do not intersect. It is an
    /// over-approximation as only pairs of constraints are compared.
    pub fn intersects(&self, other: &Self) -> bool {
        self.check_dimension(other);

        for i in REFERENCE + 1..self.dimension {
            for j in REFERENCE..i {
                let ij = self.get(i, j);
                if !ij.is_infinity() && ij.negation() >= other.get(j, i) {
                    return false;
                }

                let ij = other.get(i, j);
                if !ij.is_infinity() && ij.negation() >= self.get(j, i) {
                    return false;
                }
            }
        }

        true
    }

    /// The point-wise maximum which is the smallest zone containing both.
    pub fn convex_union(&mut self, other: &Self) {
        self.check_dimension(other);
        for (lhs, rhs) in self.relations.iter_mut().zip(other.relations.iter()) {
            if *lhs < *rhs {
                *lhs = *rhs;
            }
        }
    }

    /// The point-wise maximum with the entries of another canonical DBM of the
    /// same dimension. Missing entries count as tighter than the own ones.
    pub(crate) fn loosen_to(&mut self, entries: impl Iterator<Item = (Clock, Clock, Relation)>) {
        for (i, j, relation) in entries {
            if self.get(i, j) < relation {
                self.set(i, j, relation);
            }
        }
    }

    /// Closes after a batch of tightenings recorded in touched.
    fn close_after(mut self, changed: usize, last: (Clock, Clock), touched: &BitSet) -> Zone {
        match changed {
            0 => Zone::Closed(self),
            1 => {
                self.close_ij(last.0, last.1);
                Zone::Closed(self)
            }
            _ => {
                if self.close_touched(touched) {
                    Zone::Closed(self)
                } else {
                    Zone::Empty {
                        dimension: self.dimension,
                    }
                }
            }
        }
    }

    /// The point-wise minimum of two zones.
    pub fn intersection(mut self, src: &Self) -> Zone {
        self.check_dimension(src);

        let dimension = self.dimension;
        let mut touched = BitSet::with_capacity(dimension as usize);
        let mut changed = 0;
        let mut last = (REFERENCE, REFERENCE);

        for i in REFERENCE..dimension {
            for j in REFERENCE..dimension {
                let bound = src.get(i, j);
                if self.get(i, j) > bound {
                    self.set(i, j, bound);
                    if bound.negation() >= self.get(j, i) {
                        return Zone::Empty { dimension };
                    }
                    changed += 1;
                    last = (i, j);
                    touched.set(i as usize, true);
                    touched.set(j as usize, true);
                }
            }
        }

        self.close_after(changed, last, &touched)
    }

    /// Intersection of the weakened zones. Two zones that only touch each other
    /// on a strict border have a relaxed intersection.
    pub fn relaxed_intersection(&self, other: &Self) -> Zone {
        self.check_dimension(other);

        let dimension = self.dimension;
        let mut dst = self.clone();
        let mut touched = BitSet::with_capacity(dimension as usize);
        let mut changed = 0;
        let mut last = (REFERENCE, REFERENCE);

        for relation in dst.relations.iter_mut() {
            if !relation.is_infinity() {
                *relation = relation.as_weak();
            }
        }

        for i in REFERENCE..dimension {
            for j in REFERENCE..dimension {
                let bound = other.get(i, j);
                if bound.is_infinity() {
                    continue;
                }

                let bound = bound.as_weak();
                if dst.get(i, j) > bound {
                    dst.set(i, j, bound);
                    let ji = dst.get(j, i);
                    if !ji.is_infinity() && bound.negation() >= ji {
                        return Zone::Empty { dimension };
                    }
                    changed += 1;
                    last = (i, j);
                    touched.set(i as usize, true);
                    touched.set(j as usize, true);
                }
            }
        }

        dst.close_after(changed, last, &touched)
    }

    /// Returns false if the constraint is certainly violated by every valuation.
    pub fn satisfies(&self, i: Clock, j: Clock, relation: Relation) -> bool {
        !(self.get(i, j) > relation && relation.negation() >= self.get(j, i))
    }

    /// Tightens the constraint (i, j) and closes the DBM incrementally.
    pub fn constrain(mut self, i: Clock, j: Clock, relation: Relation) -> Zone {
        self.check_clock(i);
        self.check_clock(j);

        if self.get(i, j) > relation {
            self.set(i, j, relation);
            if relation.negation() >= self.get(j, i) {
                return Zone::Empty {
                    dimension: self.dimension,
                };
            }
            self.close_ij(i, j);
        }
        Zone::Closed(self)
    }

    /// Tightens many constraints and closes only once.
    pub fn constrain_all(self, constraints: &[Constraint]) -> Zone {
        let table: Vec<Clock> = (REFERENCE..self.dimension).collect();
        self.constrain_indexed(&table, constraints)
    }

    /// Like constrain_all but the clocks of the constraints are first looked up in the table.
    pub fn constrain_indexed(mut self, table: &[Clock], constraints: &[Constraint]) -> Zone {
        let dimension = self.dimension;
        let mut touched = BitSet::with_capacity(dimension as usize);
        let mut changed = 0;
        let mut last = (REFERENCE, REFERENCE);

        for constraint in constraints {
            let i = table[constraint.i as usize];
            let j = table[constraint.j as usize];
            self.check_clock(i);
            self.check_clock(j);

            if self.get(i, j) > constraint.relation {
                self.set(i, j, constraint.relation);
                if constraint.relation.negation() >= self.get(j, i) {
                    return Zone::Empty { dimension };
                }
                changed += 1;
                last = (i, j);
                touched.set(i as usize, true);
                touched.set(j as usize, true);
            }
        }

        self.close_after(changed, last, &touched)
    }

    /// Constrains the clock to be exactly the value.
    pub fn constrain_clock(mut self, clock: Clock, value: Limit) -> Zone {
        self.check_clock(clock);
        assert!(clock != REFERENCE, "cannot constrain the reference clock");

        let dimension = self.dimension;
        let mut changed = false;

        let upper = Relation::weak(value);
        if self.upper(clock) > upper {
            self.set(clock, REFERENCE, upper);
            if upper.negation() >= self.lower(clock) {
                return Zone::Empty { dimension };
            }
            changed = true;
        }

        let lower = Relation::weak(-value);
        if self.lower(clock) > lower {
            self.set(REFERENCE, clock, lower);
            if lower.negation() >= self.upper(clock) {
                return Zone::Empty { dimension };
            }
            changed = true;
        }

        if !changed || (self.close_single(REFERENCE) && self.close_single(clock)) {
            Zone::Closed(self)
        } else {
            Zone::Empty { dimension }
        }
    }

    /// The up operation computes the strongest postcondition of a zone with respect to delay.
    /// up(D) = {u + d | u ∈ D, d ∈ ℝ+}.
    /// This operation preserves the canonical form.
    pub fn up(&mut self) {
        for i in REFERENCE + 1..self.dimension {
            self.set(i, REFERENCE, INFINITY);
        }
    }

    /// Delay where the stopped clocks keep their value.
    pub fn up_stop(&mut self, stopped: &[Clock]) {
        let stopped = self.clock_set(stopped);
        for i in REFERENCE + 1..self.dimension {
            if stopped.test(i as usize) {
                for j in REFERENCE + 1..self.dimension {
                    if i != j && !stopped.test(j as usize) {
                        self.set(j, i, INFINITY);
                    }
                }
            } else {
                self.set(i, REFERENCE, INFINITY);
            }
        }
    }

    fn clock_set(&self, clocks: &[Clock]) -> BitSet {
        let mut set = BitSet::with_capacity(self.dimension as usize);
        for clock in clocks {
            self.check_clock(*clock);
            set.set(*clock as usize, true);
        }
        set
    }

    /// In contrast to up, down computes the weakest precondition of the DBM with respect to delay.
    /// down(D) = {u | u + d ∈ D, d ∈ ℝ+}. The lower bound of each clock is
    /// loosened to the tightest diagonal constraint on it.
    pub fn down(&mut self) {
        for j in REFERENCE + 1..self.dimension {
            if self.lower(j) < ZERO {
                self.set(REFERENCE, j, ZERO);
                for i in REFERENCE + 1..self.dimension {
                    if self.lower(j) > self.get(i, j) {
                        self.set(REFERENCE, j, self.get(i, j));
                    }
                }
            }
        }
    }

    /// Inverse delay where the stopped clocks keep their value.
    pub fn down_stop(&mut self, stopped: &[Clock]) {
        let stopped = self.clock_set(stopped);
        for j in REFERENCE + 1..self.dimension {
            if stopped.test(j as usize) {
                continue;
            }
            if self.lower(j) < ZERO {
                self.set(REFERENCE, j, ZERO);
                for i in REFERENCE + 1..self.dimension {
                    if !stopped.test(i as usize) && self.lower(j) > self.get(i, j) {
                        self.set(REFERENCE, j, self.get(i, j));
                    }
                }
            }
            // A running clock moves away from every stopped one, even when
            // its own lower bound was already zero.
            for i in REFERENCE + 1..self.dimension {
                if stopped.test(i as usize) {
                    self.set(i, j, self.upper(i).addition(&self.lower(j)));
                }
            }
        }
    }

    /// Removes all constraints on a given clock, i.e., the clock may take any positive value.
    /// This is expressed as {u[x=d] | u ∈ D, d ∈ ℝ+}.
    pub fn free_clock(&mut self, clock: Clock) {
        self.check_clock(clock);
        assert!(clock != REFERENCE, "cannot free the reference clock");
        for i in REFERENCE..self.dimension {
            if i != clock {
                self.set(clock, i, INFINITY);
                self.set(i, clock, self.upper(i));
            }
        }
    }

    /// Removes the upper bounds of the clock, including the diagonal ones.
    pub fn free_up(&mut self, clock: Clock) {
        self.check_clock(clock);
        for j in REFERENCE..self.dimension {
            if j != clock {
                self.set(clock, j, INFINITY);
            }
        }
    }

    /// Removes every upper bound while keeping the lower bounds.
    pub fn free_all_up(&mut self) {
        for i in REFERENCE + 1..self.dimension {
            for j in REFERENCE..self.dimension {
                if i != j {
                    self.set(i, j, INFINITY);
                }
            }
        }
    }

    /// Returns true if only lower bounds remain.
    pub fn is_freed_all_up(&self) -> bool {
        let mut freed = self.clone();
        freed.free_all_up();
        matrix::are_equal(&self.relations, &freed.relations)
    }

    /// Removes the lower bounds of the clock, including the diagonal ones.
    pub fn free_down(&mut self, clock: Clock) {
        self.check_clock(clock);
        for i in REFERENCE..self.dimension {
            if i != clock {
                self.set(i, clock, self.upper(i));
            }
        }
    }

    /// Removes every lower bound while keeping the upper bounds.
    pub fn free_all_down(&mut self) {
        for i in REFERENCE..self.dimension {
            for j in REFERENCE + 1..self.dimension {
                if i != j {
                    self.set(i, j, self.upper(i));
                }
            }
        }
    }

    /// Returns the first constraint (i, j) that prevents the DBM from being
    /// freed of all its lower bounds, or None if it already is.
    pub fn test_free_all_down(&self) -> Option<(Clock, Clock)> {
        for i in REFERENCE..self.dimension {
            for j in REFERENCE + 1..self.dimension {
                if i != j && self.get(i, j) != self.upper(i) {
                    return Some((i, j));
                }
            }
        }
        None
    }

    /// Sets the clock to the value. This is expressed as {u[x=v] | u ∈ D}.
    pub fn update_value(&mut self, clock: Clock, value: Limit) -> Result<()> {
        self.check_clock(clock);
        assert!(clock != REFERENCE, "cannot update the reference clock");
        if value < 0 {
            return Err(ZoneError::InvalidValue { value });
        }

        let upper = Relation::try_new(value as i64, Strictness::Weak)?;
        let lower = Relation::try_new(-(value as i64), Strictness::Weak)?;
        self.set(clock, REFERENCE, upper);
        self.set(REFERENCE, clock, lower);

        for i in REFERENCE + 1..self.dimension {
            self.set(clock, i, upper.addition(&self.lower(i)));
            self.set(i, clock, self.upper(i).addition(&lower));
        }

        self.set(clock, clock, ZERO);
        Ok(())
    }

    /// Sets the lhs to be equal to the rhs. This is expressed as {u[x=u(y)] | u ∈ D}.
    pub fn update_clock(&mut self, lhs: Clock, rhs: Clock) {
        self.check_clock(lhs);
        self.check_clock(rhs);
        if lhs == rhs {
            return;
        }

        for k in REFERENCE..self.dimension {
            if k != lhs {
                self.set(lhs, k, self.get(rhs, k));
                self.set(k, lhs, self.get(k, rhs));
            }
        }
    }

    /// Compound addition assignment of the clock "clock := clock + value".
    /// A negative value may not exceed the smallest value of the clock.
    pub fn update_increment(&mut self, clock: Clock, value: Limit) -> Result<()> {
        self.check_clock(clock);
        if value == 0 {
            return Ok(());
        }
        self.check_decrement(clock, value)?;

        let mut row = Vec::with_capacity(self.dimension as usize);
        let mut column = Vec::with_capacity(self.dimension as usize);
        for i in REFERENCE..self.dimension {
            row.push(shift_checked(self.get(clock, i), value)?);
            column.push(shift_checked(self.get(i, clock), -(value as i64))?);
        }

        for i in REFERENCE..self.dimension {
            if i != clock {
                self.set(clock, i, row[i as usize]);
                self.set(i, clock, column[i as usize]);
            }
        }
        Ok(())
    }

    /// The general update "lhs := rhs + value". A negative value may not exceed
    /// the smallest value of rhs.
    pub fn update(&mut self, lhs: Clock, rhs: Clock, value: Limit) -> Result<()> {
        self.check_clock(lhs);
        self.check_clock(rhs);
        if lhs == rhs {
            return self.update_increment(lhs, value);
        }
        if value == 0 {
            self.update_clock(lhs, rhs);
            return Ok(());
        }
        self.check_decrement(rhs, value)?;

        let mut row = Vec::with_capacity(self.dimension as usize);
        let mut column = Vec::with_capacity(self.dimension as usize);
        for k in REFERENCE..self.dimension {
            row.push(shift_checked(self.get(rhs, k), value)?);
            column.push(shift_checked(self.get(k, rhs), -(value as i64))?);
        }

        for k in REFERENCE..self.dimension {
            self.set(lhs, k, row[k as usize]);
            self.set(k, lhs, column[k as usize]);
        }
        self.set(lhs, lhs, ZERO);
        Ok(())
    }

    // The lower bound of a clock is -lower(clock).limit().
    fn check_decrement(&self, clock: Clock, value: Limit) -> Result<()> {
        if value < 0 && value < self.lower(clock).limit() {
            return Err(ZoneError::InvalidValue { value });
        }
        Ok(())
    }

    /// Makes every finite constraint weak.
    pub fn relax_all(&mut self) {
        for index in 1..self.relations.len() {
            let relation = self.relations[index];
            if relation.is_strict() && !relation.is_infinity() {
                self.relations[index] = relation.as_weak();
            }
        }
    }

    /// Makes the lower bounds of the clock weak unless a weak path keeps them strict.
    pub fn relax_down_clock(&mut self, clock: Clock) {
        self.check_clock(clock);
        for i in REFERENCE..self.dimension {
            let ik = self.get(i, clock);
            if ik.is_infinity() || !ik.is_strict() {
                continue;
            }

            self.set(i, clock, ik.as_weak());
            for j in REFERENCE..self.dimension {
                let ij = self.get(i, j);
                let jk = self.get(j, clock);
                if ij.is_infinity() || jk.is_infinity() {
                    continue;
                }

                let path = ij.add_finite(&jk.as_weak());
                if path < self.get(i, clock) {
                    // Tighten back.
                    self.set(i, clock, path);
                    break;
                }
            }
        }
    }

    /// Makes the upper bounds of the clock weak unless a weak path keeps them strict.
    pub fn relax_up_clock(&mut self, clock: Clock) {
        self.check_clock(clock);
        for i in REFERENCE..self.dimension {
            let ki = self.get(clock, i);
            if ki.is_infinity() || !ki.is_strict() {
                continue;
            }

            self.set(clock, i, ki.as_weak());
            for j in REFERENCE..self.dimension {
                let ji = self.get(j, i);
                let kj = self.get(clock, j);
                if ji.is_infinity() || kj.is_infinity() {
                    continue;
                }

                let path = ji.add_finite(&kj.as_weak());
                if path < self.get(clock, i) {
                    // Tighten back.
                    self.set(clock, i, path);
                    break;
                }
            }
        }
    }

    /// Makes the upper bounds of all clocks weak.
    pub fn relax_up(&mut self) {
        // Down of the reference clock is up of all other clocks.
        self.relax_down_clock(REFERENCE);
    }

    /// Makes the lower bounds of all clocks weak.
    pub fn relax_down(&mut self) {
        self.relax_up_clock(REFERENCE);
    }

    /// Makes every weak lower bound strict.
    pub fn tighten_down(mut self) -> Zone {
        let dimension = self.dimension;
        let mut touched = BitSet::with_capacity(dimension as usize);
        let mut changed = 0;
        let mut last = (REFERENCE, REFERENCE);

        for j in REFERENCE + 1..dimension {
            let lower = self.lower(j);
            if lower.is_weak() {
                let strict = lower.as_strict();
                self.set(REFERENCE, j, strict);
                if strict.negation() >= self.upper(j) {
                    return Zone::Empty { dimension };
                }
                changed += 1;
                last = (REFERENCE, j);
                touched.set(j as usize, true);
            }
        }

        touched.set(REFERENCE as usize, true);
        self.close_after(changed, last, &touched)
    }

    /// Makes every weak upper bound strict.
    pub fn tighten_up(mut self) -> Zone {
        let dimension = self.dimension;
        let mut touched = BitSet::with_capacity(dimension as usize);
        let mut changed = 0;
        let mut last = (REFERENCE, REFERENCE);

        for i in REFERENCE + 1..dimension {
            let upper = self.upper(i);
            if upper.is_weak() {
                let strict = upper.as_strict();
                self.set(i, REFERENCE, strict);
                if strict.negation() >= self.lower(i) {
                    return Zone::Empty { dimension };
                }
                changed += 1;
                last = (i, REFERENCE);
                touched.set(i as usize, true);
            }
        }

        touched.set(REFERENCE as usize, true);
        self.close_after(changed, last, &touched)
    }

    /// Swaps the roles of two clocks.
    pub fn swap_clocks(&mut self, x: Clock, y: Clock) {
        self.check_clock(x);
        self.check_clock(y);
        for i in REFERENCE..self.dimension {
            let (ix, iy) = (self.index(i, x), self.index(i, y));
            self.relations.swap(ix, iy);
        }
        for j in REFERENCE..self.dimension {
            let (xj, yj) = (self.index(x, j), self.index(y, j));
            self.relations.swap(xj, yj);
        }
    }

    /// Moves the DBM from one set of active clocks to another. Both masks
    /// range over the same clock identifiers and the reference clock must be
    /// active in both. Clocks only active in the source are removed and
    /// clocks only active in the destination are unconstrained. Returns the
    /// DBM and the table from clock identifier to its index in the new DBM.
    pub fn shrink_expand(
        &self,
        source: &[bool],
        destination: &[bool],
    ) -> (DBM<Canonical>, Vec<Option<Clock>>) {
        if source.len() != destination.len() {
            panic!("inconsistent clock masks")
        }
        if source.iter().filter(|active| **active).count() != self.dimension as usize {
            panic!("inconsistent DBM dimension")
        }
        assert!(
            source.first() == Some(&true) && destination.first() == Some(&true),
            "the reference clock must be active"
        );

        let (table, columns) = resize_tables(source, destination);
        let dimension = columns.len() as Clock;
        let mut relations = vec![INFINITY; columns.len() * columns.len()];
        let at = |i: Clock, j: Clock| i as usize * dimension as usize + j as usize;

        relations[0] = ZERO;
        for j in REFERENCE + 1..dimension {
            relations[at(REFERENCE, j)] = match columns[j as usize] {
                Some(column) => self.get(REFERENCE, column),
                None => ZERO,
            };
        }

        for i in REFERENCE + 1..dimension {
            if let Some(row) = columns[i as usize] {
                let upper = self.get(row, REFERENCE);
                relations[at(i, REFERENCE)] = upper;
                for j in REFERENCE + 1..dimension {
                    relations[at(i, j)] = match columns[j as usize] {
                        Some(column) => self.get(row, column),
                        None => upper,
                    };
                }
            }
            relations[at(i, i)] = ZERO;
        }

        let dbm = DBM {
            dimension,
            relations: relations.into_boxed_slice(),
            state: Canonical {},
        };
        (dbm, table)
    }

    fn check_bounds(&self, bounds: &Bounds) {
        if bounds.dimension() != self.dimension {
            panic!("inconsistent bounds dimension")
        }
    }

    /// Classical maximal bounds extrapolation (k-normalization).
    pub fn extrapolate_max_bounds(&mut self, bounds: &Bounds) {
        self.check_bounds(bounds);
        let max = bounds.maxima();
        let mut changed = false;

        for j in REFERENCE + 1..self.dimension {
            let limit = max[j as usize];
            if self.lower(j).limit() < -limit {
                self.set(REFERENCE, j, clamped(limit));
                changed |= limit > INACTIVE;
            }
        }

        for i in REFERENCE + 1..self.dimension {
            for j in REFERENCE..self.dimension {
                if i == j {
                    continue;
                }

                if max[j as usize] == INACTIVE {
                    self.set(i, j, self.upper(i));
                    continue;
                }

                let bound = self.get(i, j);
                if !bound.is_infinity() && bound.limit() > max[i as usize] {
                    self.set(i, j, INFINITY);
                    changed |= max[i as usize] > INACTIVE;
                } else if bound.limit() < -max[j as usize] {
                    self.set(i, j, Relation::strict(-max[j as usize]));
                    changed = true;
                }
            }
        }

        // Every bound was only loosened so the zone cannot become empty.
        if changed && !self.close_lu(&max, &max) {
            panic!("extrapolation emptied the zone");
        }
    }

    /// Maximal bounds extrapolation that also removes diagonal constraints
    /// of clocks whose lower bound exceeds their maximal constant.
    pub fn diagonal_extrapolate_max_bounds(&mut self, bounds: &Bounds) {
        self.check_bounds(bounds);
        let max = bounds.maxima();
        let mut changed = false;

        for i in REFERENCE + 1..self.dimension {
            let limit = max[i as usize];
            if self.lower(i).limit() < -limit {
                self.set(i, REFERENCE, INFINITY);
                self.set(REFERENCE, i, clamped(limit));
                for j in REFERENCE + 1..self.dimension {
                    if i != j {
                        self.set(i, j, INFINITY);
                        changed |= !self.get(j, i).is_infinity();
                        self.set(j, i, INFINITY);
                    }
                }
            } else {
                for j in REFERENCE..self.dimension {
                    let bound = self.get(i, j);
                    if i != j && !bound.is_infinity() && bound.limit() > limit {
                        self.set(i, j, INFINITY);
                        changed = true;
                    }
                }
            }
        }

        // Every bound was only loosened so the zone cannot become empty.
        if changed && !self.close_lu(&max, &max) {
            panic!("extrapolation emptied the zone");
        }
    }

    /// Extrapolation using separate lower and upper bounds (LU-abstraction).
    pub fn extrapolate_lu_bounds(&mut self, bounds: &Bounds) {
        self.check_bounds(bounds);
        let lower = bounds.lowers();
        let upper = bounds.uppers();
        let mut changed = false;

        for j in REFERENCE + 1..self.dimension {
            let limit = upper[j as usize];
            if self.lower(j).limit() < -limit {
                self.set(REFERENCE, j, clamped(limit));
                changed |= limit > INACTIVE;
            }
        }

        for i in REFERENCE + 1..self.dimension {
            for j in REFERENCE..self.dimension {
                if i == j {
                    continue;
                }

                if upper[j as usize] == INACTIVE {
                    self.set(i, j, self.upper(i));
                    continue;
                }

                let bound = self.get(i, j);
                if !bound.is_infinity() && bound.limit() > lower[i as usize] {
                    self.set(i, j, INFINITY);
                    changed |= lower[i as usize] > INACTIVE;
                } else if bound.limit() < -upper[j as usize] {
                    self.set(i, j, Relation::strict(-upper[j as usize]));
                    changed = true;
                }
            }
        }

        if changed && !self.close_lu(lower, upper) {
            panic!("extrapolation emptied the zone");
        }
    }

    /// LU-abstraction that also removes the diagonal constraints.
    pub fn diagonal_extrapolate_lu_bounds(&mut self, bounds: &Bounds) {
        self.check_bounds(bounds);
        let lower = bounds.lowers();
        let upper = bounds.uppers();
        let mut changed = false;

        for i in REFERENCE + 1..self.dimension {
            let beyond = self.lower(i).limit() < -lower[i as usize];
            for j in REFERENCE..self.dimension {
                if i == j {
                    continue;
                }

                let bound = self.get(i, j);
                if beyond
                    || bound.limit() > lower[i as usize]
                    || self.lower(j).limit() < -upper[j as usize]
                {
                    if !beyond {
                        changed |= !bound.is_infinity();
                    }
                    self.set(i, j, INFINITY);
                }
            }
        }

        for j in REFERENCE + 1..self.dimension {
            let limit = upper[j as usize];
            if self.lower(j).limit() < -limit {
                self.set(REFERENCE, j, clamped(limit));
            }
        }

        if changed && !self.close_lu(lower, upper) {
            panic!("extrapolation emptied the zone");
        }
    }

    /// Writes a raw bound without restoring closure. Only used by callers
    /// that immediately restore the invariants themselves.
    pub(crate) fn set_unchecked(&mut self, i: Clock, j: Clock, relation: Relation) {
        self.set(i, j, relation);
    }

    /// Builds a DBM from relations that are already known to be canonical.
    pub(crate) fn from_canonical_relations(dimension: Clock, relations: Box<[Relation]>) -> Self {
        debug_assert_eq!(dimension as usize * dimension as usize, relations.len());
        Self {
            dimension,
            relations,
            state: Canonical {},
        }
    }
}

/// Computes the tables for moving a DBM between two sets of active clocks.
/// The first table maps every clock identifier to its index in the
/// destination DBM. The second maps every destination index to the source
/// index it is copied from, or None if the clock is new.
pub fn resize_tables(source: &[bool], destination: &[bool]) -> (Vec<Option<Clock>>, Vec<Option<Clock>>) {
    let mut table = vec![None; destination.len()];
    let mut columns: Vec<Option<Clock>> = Vec::new();
    let mut next_source: Clock = 0;
    for (id, (src, dst)) in source.iter().zip(destination.iter()).enumerate() {
        if *dst {
            table[id] = Some(columns.len() as Clock);
            columns.push(if *src { Some(next_source) } else { None });
        }
        if *src {
            next_source += 1;
        }
    }
    (table, columns)
}

/// The lower bound of a clock beyond its maximal constant.
fn clamped(limit: Limit) -> Relation {
    if limit >= 0 {
        Relation::strict(-limit)
    } else {
        ZERO
    }
}

/// Shifts a finite relation by value and checks that it is still representable.
fn shift_checked(relation: Relation, value: impl Into<i64>) -> Result<Relation> {
    if relation.is_infinity() {
        return Ok(INFINITY);
    }
    let limit = relation.limit() as i64 + value.into();
    Relation::try_new(limit, relation.strictness())
}

/// A DBM being edited. Touched clocks are used as pivots when closing it again.
pub struct Dirty {
    touched: BitSet,
    loosened: bool,
}

impl DBMState for Dirty {}

impl Dirty {
    pub fn new(dimension: Clock) -> Self {
        Self {
            touched: BitSet::with_capacity(dimension.max(1) as usize),
            loosened: false,
        }
    }

    pub fn any_touched(&self) -> bool {
        self.loosened || self.touched.any()
    }

    pub fn is_touched(&self, clock: Clock) -> bool {
        self.touched.test(clock as usize)
    }

    fn touch(&mut self, clock: Clock) {
        self.touched.set(clock as usize, true);
    }
}

impl DBM<Dirty> {
    /// Wraps the relations of a matrix in row-major order. Every clock is
    /// touched so closing it performs a full closure.
    pub fn from_relations(dimension: Clock, relations: Vec<Relation>) -> Result<Self> {
        if dimension == 0 || dimension as usize * dimension as usize != relations.len() {
            return Err(ZoneError::DimensionMismatch {
                expected: dimension,
                actual: relations.len(),
            });
        }

        if let Some(invalid) = relations.iter().find(|relation| !relation.is_valid()) {
            return Err(ZoneError::BoundOverflow {
                limit: invalid.limit() as i64,
            });
        }

        Ok(Self {
            dimension,
            relations: relations.into_boxed_slice(),
            state: Dirty {
                touched: BitSet::with_capacity(dimension as usize),
                loosened: true,
            },
        })
    }

    /// Overwrites the constraint (i, j). Loosening a constraint requires a full
    /// closure while tightening only requires the touched clocks as pivots.
    pub fn set_relation(&mut self, i: Clock, j: Clock, relation: Relation) {
        self.check_clock(i);
        self.check_clock(j);
        if relation > self.get(i, j) {
            self.state.loosened = true;
        }
        self.set(i, j, relation);
        self.state.touch(i);
        self.state.touch(j);
    }

    /// Only if the new relation tightens the existing relation is the relation updated.
    pub fn tighten(&mut self, i: Clock, j: Clock, relation: Relation) -> bool {
        if self.get(i, j) > relation {
            self.set_relation(i, j, relation);
            return true;
        }
        false
    }

    pub fn set_upper(&mut self, clock: Clock, relation: Relation) {
        self.set_relation(clock, REFERENCE, relation)
    }

    pub fn set_lower(&mut self, clock: Clock, relation: Relation) {
        self.set_relation(REFERENCE, clock, relation)
    }

    /// Restores the canonical form. Clocks are non-negative so the lower
    /// bounds are at most (0, ≤) and the diagonal is (0, ≤) unless negative.
    pub fn close(mut self) -> Zone {
        let dimension = self.dimension;

        if !self.state.any_touched() {
            return Zone::Closed(DBM {
                dimension,
                relations: self.relations,
                state: Canonical {},
            });
        }

        for c in REFERENCE..dimension {
            if self.get(c, c) < ZERO {
                return Zone::Empty { dimension };
            }
            self.set(c, c, ZERO);
            if self.lower(c) > ZERO {
                self.set(REFERENCE, c, ZERO);
                self.state.touch(REFERENCE);
                self.state.touch(c);
            }
        }

        let consistent = if self.state.loosened {
            self.close_all()
        } else {
            let touched = std::mem::replace(&mut self.state.touched, BitSet::with_capacity(1));
            self.close_touched(&touched)
        };

        if !consistent {
            return Zone::Empty { dimension };
        }

        Zone::Closed(DBM {
            dimension,
            relations: self.relations,
            state: Canonical {},
        })
    }
}

/// A random non-empty zone containing a random integer point.
#[cfg(test)]
pub(crate) fn random_zone<R: rand::Rng>(
    rng: &mut R,
    dimension: Clock,
    constraints: usize,
) -> DBM<Canonical> {
    let mut dbm = DBM::universe(dimension);
    if dimension < 2 {
        return dbm;
    }

    let mut point: Vec<Limit> = (0..dimension).map(|_| rng.gen_range(0..=30)).collect();
    point[0] = 0;

    for _ in 0..constraints {
        let i = rng.gen_range(0..dimension);
        let j = (i + rng.gen_range(1..dimension)) % dimension;
        let difference = point[i as usize] - point[j as usize];

        let mut picked = vec![];
        if rng.gen_bool(0.15) {
            // Forces a zero cycle between i and j.
            picked.push(Constraint::new(i, j, Relation::weak(difference)));
            picked.push(Constraint::new(j, i, Relation::weak(-difference)));
        } else {
            let slack = rng.gen_range(0..=8);
            let relation = if slack > 0 && rng.gen_bool(0.5) {
                Relation::strict(difference + slack)
            } else {
                Relation::weak(difference + slack)
            };
            picked.push(Constraint::new(i, j, relation));
        }

        dbm = match dbm.constrain_all(&picked) {
            Zone::Closed(dbm) => dbm,
            Zone::Empty { .. } => panic!("a zone around a point cannot be empty"),
        };
    }

    dbm
}
