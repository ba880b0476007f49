use std::{cell::Cell, fmt};

use tracing::trace;

use super::{
    bounds::Bounds,
    constraint::{Clock, Constraint, Limit, Relation, INFINITY_LIMIT, REFERENCE},
    dbm::{Canonical, Relationship, Zone, DBM},
    error::{Result, ZoneError},
    simplex::{self, Cost, Infimum, Optimum},
};

/// A zone with an affine cost function over it. The cost is given by the cost
/// of the offset (the lowest valuation of the zone) and a rate per clock.
#[derive(Clone)]
pub struct PricedDbm {
    dbm: DBM<Canonical>,
    rates: Vec<Limit>,
    cost_at_offset: Cost,
    infimum: Cell<Option<Infimum>>,
}

impl PricedDbm {
    /// The cost function is zero everywhere.
    pub fn new(dbm: DBM<Canonical>) -> Self {
        let rates = vec![0; dbm.dimension() as usize];
        Self {
            dbm,
            rates,
            cost_at_offset: 0,
            infimum: Cell::new(Some(Infimum::Finite(0))),
        }
    }

    pub fn with_cost(dbm: DBM<Canonical>, rates: Vec<Limit>, cost_at_offset: Cost) -> Result<Self> {
        if rates.len() != dbm.dimension() as usize {
            return Err(ZoneError::DimensionMismatch {
                expected: dbm.dimension(),
                actual: rates.len(),
            });
        }
        assert!(rates[REFERENCE as usize] == 0, "the reference clock has no rate");
        Ok(Self {
            dbm,
            rates,
            cost_at_offset,
            infimum: Cell::new(None),
        })
    }

    /// The universe with a zero cost.
    pub fn init(dimension: Clock) -> Self {
        Self::new(DBM::universe(dimension))
    }

    /// The origin with a zero cost.
    pub fn zero(dimension: Clock) -> Self {
        Self::new(DBM::zero(dimension))
    }

    pub fn dimension(&self) -> Clock {
        self.dbm.dimension()
    }

    pub fn dbm(&self) -> &DBM<Canonical> {
        &self.dbm
    }

    pub fn into_dbm(self) -> DBM<Canonical> {
        self.dbm
    }

    pub fn rates(&self) -> &[Limit] {
        &self.rates
    }

    pub fn rate(&self, clock: Clock) -> Limit {
        self.check_priced_clock(clock);
        self.rates[clock as usize]
    }

    pub fn set_rate(&mut self, clock: Clock, rate: Limit) {
        self.check_priced_clock(clock);
        self.rates[clock as usize] = rate;
        self.invalidate();
    }

    pub fn cost_at_offset(&self) -> Cost {
        self.cost_at_offset
    }

    pub fn set_cost_at_offset(&mut self, cost: Cost) {
        self.cost_at_offset = cost;
        self.invalidate();
    }

    /// Raises the cost everywhere by the value.
    pub fn increment_cost(&mut self, value: Cost) {
        assert!(value >= 0, "the cost can only be incremented");
        self.cost_at_offset += value;
        if let Some(Infimum::Finite(cost)) = self.infimum.get() {
            self.infimum.set(Some(Infimum::Finite(cost + value)));
        }
    }

    /// The rate at which the cost changes when every clock is delayed.
    pub fn slope_of_delay_trajectory(&self) -> Cost {
        self.rates.iter().skip(1).map(|rate| *rate as Cost).sum()
    }

    /// The lowest valuation of the zone.
    pub fn offset(&self) -> Vec<Limit> {
        simplex::offset(&self.dbm)
    }

    pub fn cost_of_valuation(&self, valuation: &[Limit]) -> Cost {
        if valuation.len() != self.rates.len() {
            panic!("inconsistent valuation dimension")
        }
        (REFERENCE + 1..self.dimension()).fold(self.cost_at_offset, |cost, clock| {
            let lower = -self.dbm.lower(clock).limit() as Cost;
            cost + (valuation[clock as usize] as Cost - lower) * self.rates[clock as usize] as Cost
        })
    }

    /// The infimum of the cost over the zone. The value is cached until the
    /// next modification.
    pub fn infimum(&self) -> Infimum {
        if let Some(infimum) = self.infimum.get() {
            return infimum;
        }
        let infimum = simplex::infimum(&self.dbm, self.cost_at_offset, &self.rates);
        trace!(?infimum, "computed infimum");
        self.infimum.set(Some(infimum));
        infimum
    }

    /// A valuation of the closure of the zone attaining the infimum and its cost.
    pub fn infimum_valuation(&self) -> Result<(Cost, Vec<Limit>)> {
        self.infimum_valuation_fixing(&vec![None; self.rates.len()])
    }

    /// Like infimum_valuation but the clocks with a value are fixed to it.
    pub fn infimum_valuation_fixing(&self, fixed: &[Option<Limit>]) -> Result<(Cost, Vec<Limit>)> {
        if fixed.len() != self.rates.len() {
            return Err(ZoneError::DimensionMismatch {
                expected: self.dimension(),
                actual: fixed.len(),
            });
        }

        let constraints = fixed
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(clock, value)| value.map(|value| (clock as Clock, value)))
            .flat_map(|(clock, value)| {
                [
                    Constraint::upper(clock, Relation::weak(value)),
                    Constraint::lower(clock, Relation::weak(-value)),
                ]
            })
            .collect::<Vec<_>>();
        let restricted = self
            .dbm
            .clone()
            .constrain_all(&constraints)
            .ok()
            .ok_or(ZoneError::EmptyZone)?;

        match simplex::optimum(&restricted, &self.rates) {
            Optimum::Unbounded => Err(ZoneError::UnboundedInfimum),
            Optimum::Bounded(valuation) => Ok((self.cost_of_valuation(&valuation), valuation)),
        }
    }

    /// Tightens the constraint "i - j" and moves the cost to the new offset.
    /// Returns none if the zone becomes empty.
    pub fn constrain(self, i: Clock, j: Clock, relation: Relation) -> Option<Self> {
        if self.dbm[(i, j)] <= relation {
            return Some(self);
        }
        self.replace_zone(|dbm| dbm.constrain(i, j, relation))
    }

    pub fn constrain_all(self, constraints: &[Constraint]) -> Option<Self> {
        if constraints.iter().all(|c| self.dbm[(c.i, c.j)] <= c.relation) {
            return Some(self);
        }
        self.replace_zone(|dbm| dbm.constrain_all(constraints))
    }

    /// Restricts the zone to the facet opposite of the constraint "i - j".
    pub fn constrain_to_facet(self, i: Clock, j: Clock) -> Option<Self> {
        let limit = -self.dbm[(i, j)].limit();
        self.constrain(j, i, Relation::weak(limit))
    }

    fn replace_zone<F>(self, f: F) -> Option<Self>
    where
        F: FnOnce(DBM<Canonical>) -> Zone,
    {
        let Self {
            dbm,
            rates,
            cost_at_offset,
            ..
        } = self;
        let before = lower_weight(&dbm, &rates);
        let dbm = f(dbm).ok()?;
        let cost_at_offset = cost_at_offset + before - lower_weight(&dbm, &rates);
        Some(Self {
            dbm,
            rates,
            cost_at_offset,
            infimum: Cell::new(None),
        })
    }

    pub fn satisfies(&self, i: Clock, j: Clock, relation: Relation) -> bool {
        self.dbm.satisfies(i, j, relation)
    }

    pub fn is_unbounded(&self) -> bool {
        self.dbm.is_unbounded()
    }

    pub fn contains_point(&self, point: &[Limit]) -> bool {
        self.dbm.contains_point(point)
    }

    pub fn contains_real_point(&self, point: &[f64]) -> bool {
        self.dbm.contains_real_point(point)
    }

    /// Returns true if the point is part of the closure of the zone.
    pub fn contains_weakly(&self, point: &[Limit]) -> bool {
        if point.len() != self.rates.len() {
            panic!("inconsistent point dimension")
        }
        let dimension = self.dimension();
        (REFERENCE..dimension).all(|i| {
            (REFERENCE..dimension).all(|j| {
                let bound = self.dbm[(i, j)];
                bound.is_infinity()
                    || point[i as usize] as i64 - point[j as usize] as i64 <= bound.limit() as i64
            })
        })
    }

    /// Compares the zones and the cost. A priced zone is a superset of another
    /// if it includes the other zone and is nowhere more expensive on it.
    pub fn relation(&self, other: &Self) -> Relationship {
        let (cost, other_cost) = (self.cost_at_offset, other.cost_at_offset);
        let (rates, other_rates) = (&self.rates, &other.rates);

        match self.dbm.relation(&other.dbm) {
            Relationship::Superset => {
                let cost = cost_at_other_offset(&self.dbm, rates, cost, &other.dbm);
                let cheaper = cost <= other_cost
                    && (at_most(rates, other_rates)
                        || difference_infimum(&other.dbm, other_cost, other_rates, cost, rates) >= 0);
                if cheaper {
                    Relationship::Superset
                } else {
                    Relationship::Different
                }
            }
            Relationship::Subset => {
                let other_cost = cost_at_other_offset(&other.dbm, other_rates, other_cost, &self.dbm);
                let cheaper = other_cost <= cost
                    && (at_most(other_rates, rates)
                        || difference_infimum(&self.dbm, cost, rates, other_cost, other_rates) >= 0);
                if cheaper {
                    Relationship::Subset
                } else {
                    Relationship::Different
                }
            }
            Relationship::Equal => {
                let cheaper = cost <= other_cost && at_most(rates, other_rates);
                let dearer = other_cost <= cost && at_most(other_rates, rates);
                match (cheaper, dearer) {
                    (true, true) => return Relationship::Equal,
                    (true, false) => return Relationship::Superset,
                    (false, true) => return Relationship::Subset,
                    (false, false) => {}
                }

                // The planes cross on paper but may still agree on the zone.
                let above = difference_infimum(&self.dbm, other_cost, other_rates, cost, rates);
                if above > 0 {
                    return Relationship::Superset;
                }
                let below = difference_infimum(&self.dbm, cost, rates, other_cost, other_rates);
                if above == 0 && below == 0 {
                    Relationship::Equal
                } else if above >= 0 {
                    Relationship::Superset
                } else if below >= 0 {
                    Relationship::Subset
                } else {
                    Relationship::Different
                }
            }
            Relationship::Different => Relationship::Different,
        }
    }

    pub fn up(&mut self) {
        self.dbm.up();
        self.invalidate();
    }

    /// Delays with the given rate. The clock must be fixed to zero and absorbs
    /// the rate such that the cost grows with the rate along the delay.
    pub fn up_zero(&mut self, rate: Limit, zero: Clock) {
        self.check_priced_clock(zero);
        assert!(
            self.on_zero_cycle(REFERENCE, zero),
            "the clock must be on a zero cycle with the reference clock"
        );
        self.dbm.up();
        self.rates[zero as usize] = 0;
        self.rates[zero as usize] = (rate as Cost - self.slope_of_delay_trajectory()) as Limit;
        self.invalidate();
    }

    /// Resets a clock without a rate.
    pub fn update_value(&mut self, clock: Clock, value: Limit) -> Result<()> {
        assert!(self.rate(clock) == 0, "cannot update a clock with a rate");
        self.dbm.update_value(clock, value)?;
        self.invalidate();
        Ok(())
    }

    /// Resets a clock whose rate first moves to a clock on a zero cycle with it.
    pub fn update_value_zero(&mut self, clock: Clock, value: Limit, zero: Clock) -> Result<()> {
        assert!(
            self.on_zero_cycle(clock, zero),
            "the clocks must be on a zero cycle"
        );
        if zero != REFERENCE {
            self.rates[zero as usize] += self.rates[clock as usize];
        }
        self.rates[clock as usize] = 0;
        self.dbm.update_value(clock, value)?;
        self.invalidate();
        Ok(())
    }

    pub fn free_clock(&mut self, clock: Clock) {
        assert!(self.rate(clock) == 0, "cannot free a clock with a rate");
        self.dbm.free_clock(clock);
        self.invalidate();
    }

    pub fn free_up(&mut self, clock: Clock) {
        assert!(self.rate(clock) >= 0, "cannot free a clock with a negative rate");
        self.dbm.free_up(clock);
        self.invalidate();
    }

    /// Removes the lower bounds of the clock and moves the offset along.
    pub fn free_down(&mut self, clock: Clock) {
        let rate = self.rate(clock);
        assert!(rate <= 0, "cannot free a clock with a positive rate");
        let lower = -self.dbm.lower(clock).limit() as Cost;
        self.cost_at_offset -= lower * rate as Cost;
        self.dbm.free_down(clock);
        self.invalidate();
    }

    /// Makes every finite constraint weak.
    pub fn relax(&mut self) {
        self.dbm.relax_all();
        self.invalidate();
    }

    /// Extrapolates the clocks without a rate. Priced clocks keep their bounds.
    pub fn extrapolate_max_bounds(&mut self, bounds: &Bounds) {
        let bounds = self.unpriced_bounds(bounds);
        self.dbm.extrapolate_max_bounds(&bounds);
        self.invalidate();
    }

    /// Inactive clocks first pass their rate to an active clock with which
    /// they form a zero cycle.
    pub fn diagonal_extrapolate_max_bounds(&mut self, bounds: &Bounds) {
        for clock in REFERENCE + 1..self.dimension() {
            if bounds.is_active(clock) || self.rates[clock as usize] == 0 {
                continue;
            }

            let members = self.zero_cycle_members(clock);
            let Some(&first) = members.first() else {
                continue;
            };
            let target = members
                .iter()
                .copied()
                .find(|member| bounds.is_active(*member))
                .unwrap_or(first);
            if target != REFERENCE {
                self.rates[target as usize] += self.rates[clock as usize];
            }
            self.rates[clock as usize] = 0;
        }

        let bounds = self.unpriced_bounds(bounds);
        self.dbm.diagonal_extrapolate_max_bounds(&bounds);
        self.invalidate();
    }

    pub fn diagonal_extrapolate_lu_bounds(&mut self, bounds: &Bounds) {
        let bounds = self.unpriced_bounds(bounds);
        self.dbm.diagonal_extrapolate_lu_bounds(&bounds);
        self.invalidate();
    }

    fn unpriced_bounds(&self, bounds: &Bounds) -> Bounds {
        if bounds.dimension() != self.dimension() {
            panic!("inconsistent bounds dimension")
        }
        (REFERENCE + 1..self.dimension())
            .filter(|clock| self.rates[*clock as usize] != 0)
            .fold(bounds.clone(), |bounds, clock| bounds.set_max(clock, INFINITY_LIMIT))
    }

    /// Moves all rates of a class of clocks with fixed differences onto the
    /// last clock of the class. The class of the reference clock has no rate.
    pub fn normalise(&mut self) {
        let next = zero_cycle_successors(&self.dbm);

        let mut clock = next[REFERENCE as usize];
        while clock != 0 {
            self.rates[clock] = 0;
            clock = next[clock];
        }

        for clock in 1..next.len() {
            if next[clock] != 0 {
                self.rates[next[clock]] += self.rates[clock];
                self.rates[clock] = 0;
            }
        }
    }

    pub fn has_normal_form(&self) -> bool {
        let next = zero_cycle_successors(&self.dbm);

        let mut clock = next[REFERENCE as usize];
        while clock != 0 {
            if self.rates[clock] != 0 {
                return false;
            }
            clock = next[clock];
        }

        (1..next.len()).all(|clock| next[clock] == 0 || self.rates[clock] == 0)
    }

    /// Sanity check of the cache, the zone, and the rates.
    pub fn is_valid(&self) -> bool {
        let infimum = simplex::infimum(&self.dbm, self.cost_at_offset, &self.rates);
        self.infimum.get().map_or(true, |cached| cached == infimum)
            && self.dbm.is_valid()
            && self.rates[REFERENCE as usize] == 0
            && (!self.is_unbounded() || self.slope_of_delay_trajectory() >= 0)
    }

    /// Returns true if the difference of the clocks is fixed.
    pub fn on_zero_cycle(&self, i: Clock, j: Clock) -> bool {
        self.dbm[(i, j)].limit() == -self.dbm[(j, i)].limit()
    }

    /// The clocks other than the given one whose difference to it is fixed.
    pub fn zero_cycle_members(&self, clock: Clock) -> Vec<Clock> {
        (REFERENCE..self.dimension())
            .filter(|other| *other != clock && self.on_zero_cycle(*other, clock))
            .collect()
    }

    /// Some other clock whose difference to the given one is fixed.
    pub fn find_zero_cycle(&self, clock: Clock) -> Option<Clock> {
        (REFERENCE..self.dimension()).find(|other| *other != clock && self.on_zero_cycle(*other, clock))
    }

    /// Makes the lower bounds weak and returns the clocks whose lower bound
    /// is a facet of the zone.
    pub fn lower_facets(&mut self) -> Vec<Clock> {
        self.dbm.relax_down();
        self.invalidate();
        self.facets(|clock| (REFERENCE, clock))
    }

    /// Makes the upper bounds weak and returns the clocks whose upper bound
    /// is a facet of the zone.
    pub fn upper_facets(&mut self) -> Vec<Clock> {
        self.dbm.relax_up();
        self.invalidate();
        self.facets(|clock| (clock, REFERENCE))
    }

    /// Like [`PricedDbm::lower_facets`] for the constraints "i - clock".
    pub fn lower_relative_facets(&mut self, clock: Clock) -> Vec<Clock> {
        self.dbm.relax_down_clock(clock);
        self.invalidate();
        self.facets(|i| (i, clock))
    }

    /// Like [`PricedDbm::upper_facets`] for the constraints "clock - i".
    pub fn upper_relative_facets(&mut self, clock: Clock) -> Vec<Clock> {
        self.dbm.relax_up_clock(clock);
        self.invalidate();
        self.facets(|i| (clock, i))
    }

    /// Only the last clock of every zero cycle class is considered.
    fn facets<F>(&self, edge: F) -> Vec<Clock>
    where
        F: Fn(Clock) -> (Clock, Clock),
    {
        let next = zero_cycle_successors(&self.dbm);
        (REFERENCE..self.dimension())
            .filter(|clock| next[*clock as usize] == 0)
            .filter(|clock| {
                let (i, j) = edge(*clock);
                !self.is_redundant(i, j, &next)
            })
            .collect()
    }

    /// The edge "i - j" is redundant if it is infinite or implied by a path
    /// through a clock that ends its zero cycle class.
    fn is_redundant(&self, i: Clock, j: Clock, next: &[usize]) -> bool {
        let ij = self.dbm[(i, j)];
        if i == j || ij.is_infinity() {
            return true;
        }
        (REFERENCE..self.dimension())
            .filter(|k| *k != i && *k != j && next[*k as usize] == 0)
            .any(|k| {
                let (ik, kj) = (self.dbm[(i, k)], self.dbm[(k, j)]);
                !ik.is_infinity() && !kj.is_infinity() && ij >= ik.add_finite(&kj)
            })
    }

    fn invalidate(&mut self) {
        *self.infimum.get_mut() = None;
    }

    fn check_priced_clock(&self, clock: Clock) {
        assert!(
            clock != REFERENCE && clock < self.dimension(),
            "clock {} has no rate in dimension {}",
            clock,
            self.dimension()
        );
    }
}

/// The sum of the rates weighted with the negated lower bounds.
fn lower_weight(dbm: &DBM<Canonical>, rates: &[Limit]) -> Cost {
    (REFERENCE + 1..dbm.dimension())
        .map(|clock| rates[clock as usize] as Cost * dbm.lower(clock).limit() as Cost)
        .sum()
}

/// The cost of the offset of the other zone under the cost function.
fn cost_at_other_offset(dbm: &DBM<Canonical>, rates: &[Limit], cost: Cost, other: &DBM<Canonical>) -> Cost {
    cost + lower_weight(dbm, rates) - lower_weight(other, rates)
}

fn at_most(rates: &[Limit], other: &[Limit]) -> bool {
    rates.iter().zip(other.iter()).all(|(rate, other)| rate <= other)
}

/// The infimum of the first cost function minus the second over the zone.
fn difference_infimum(
    dbm: &DBM<Canonical>,
    cost: Cost,
    rates: &[Limit],
    other_cost: Cost,
    other_rates: &[Limit],
) -> Cost {
    let difference: Vec<Limit> = rates.iter().zip(other_rates.iter()).map(|(a, b)| a - b).collect();
    match simplex::infimum(dbm, cost - other_cost, &difference) {
        Infimum::Finite(cost) => cost,
        Infimum::Unbounded => Cost::MIN,
    }
}

/// For every clock the next clock with a fixed difference to it, or zero if
/// it is the last of its class.
fn zero_cycle_successors(dbm: &DBM<Canonical>) -> Vec<usize> {
    let dimension = dbm.dimension();
    (REFERENCE..dimension)
        .map(|i| {
            (i + 1..dimension)
                .find(|j| dbm[(i, *j)].limit() == -dbm[(*j, i)].limit())
                .map_or(0, |j| j as usize)
        })
        .collect()
}

impl PartialEq for PricedDbm {
    fn eq(&self, other: &Self) -> bool {
        self.cost_at_offset == other.cost_at_offset && self.rates == other.rates && self.dbm == other.dbm
    }
}

impl Eq for PricedDbm {}

impl fmt::Debug for PricedDbm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PricedDbm")
            .field("dbm", &self.dbm)
            .field("rates", &self.rates)
            .field("cost_at_offset", &self.cost_at_offset)
            .finish()
    }
}

impl fmt::Display for PricedDbm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.dbm)?;
        write!(f, "Rates:")?;
        for rate in self.rates.iter().skip(1) {
            write!(f, " {}", rate)?;
        }
        writeln!(f)?;
        write!(f, "Offset: {} Infimum: {}", self.cost_at_offset, self.infimum())
    }
}

impl From<DBM<Canonical>> for PricedDbm {
    fn from(dbm: DBM<Canonical>) -> Self {
        Self::new(dbm)
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use crate::zones::{
        bounds::Bounds,
        constraint::{Constraint, Limit, Relation, REFERENCE},
        dbm::{random_zone, Relationship},
        error::ZoneError,
        simplex::Infimum,
    };

    use super::PricedDbm;

    fn priced(dimension: u16, constraints: &[Constraint], rates: Vec<Limit>) -> PricedDbm {
        let zone = PricedDbm::init(dimension)
            .constrain_all(constraints)
            .expect("non-empty test zone");
        let cost = zone.cost_at_offset();
        PricedDbm::with_cost(zone.into_dbm(), rates, cost).unwrap()
    }

    #[test]
    fn infimum_at_the_upper_bound() {
        let zone = priced(2, &[Constraint::upper(1, Relation::weak(10))], vec![0, -1]);
        assert_eq!(Infimum::Finite(-10), zone.infimum());
        assert_eq!((-10, vec![0, 10]), zone.infimum_valuation().unwrap());
    }

    #[test]
    fn infimum_at_the_offset() {
        let zone = priced(
            3,
            &[
                Constraint::lower(1, Relation::weak(-3)),
                Constraint::upper(2, Relation::weak(6)),
            ],
            vec![0, 2, 5],
        );
        let zone = PricedDbm::with_cost(zone.dbm().clone(), zone.rates().to_vec(), 4).unwrap();
        assert_eq!(vec![0, 3, 0], zone.offset());
        assert_eq!(Infimum::Finite(4), zone.infimum());
        assert_eq!(4, zone.cost_of_valuation(&[0, 3, 0]));
        assert_eq!(16, zone.cost_of_valuation(&[0, 4, 2]));
    }

    #[test]
    fn constraining_moves_the_offset_cost() {
        let zone = priced(2, &[], vec![0, 2]);
        assert_eq!(Infimum::Finite(0), zone.infimum());

        let zone = zone.constrain(REFERENCE, 1, Relation::weak(-3)).unwrap();
        assert_eq!(6, zone.cost_at_offset());
        assert_eq!(Infimum::Finite(6), zone.infimum());
        assert!(zone.constrain(1, REFERENCE, Relation::strict(3)).is_none());
    }

    #[test]
    fn constrain_to_facet_keeps_the_border() {
        let zone = priced(
            2,
            &[
                Constraint::lower(1, Relation::weak(-2)),
                Constraint::upper(1, Relation::weak(7)),
            ],
            vec![0, 1],
        );
        let facet = zone.constrain_to_facet(1, REFERENCE).unwrap();
        assert_eq!(vec![0, 7], facet.offset());
        assert_eq!(5, facet.cost_at_offset());
    }

    #[test]
    fn unbounded_cost_is_reported() {
        let zone = priced(2, &[], vec![0, -1]);
        assert_eq!(Infimum::Unbounded, zone.infimum());
        assert_eq!(Err(ZoneError::UnboundedInfimum), zone.infimum_valuation());
        assert_eq!("-∞", zone.infimum().to_string());
    }

    #[test]
    fn fixing_clocks_restricts_the_valuation() {
        let zone = priced(
            3,
            &[
                Constraint::upper(1, Relation::weak(10)),
                Constraint::upper(2, Relation::weak(10)),
            ],
            vec![0, -1, -2],
        );
        let (cost, valuation) = zone.infimum_valuation_fixing(&[None, Some(4), None]).unwrap();
        assert_eq!(vec![0, 4, 10], valuation);
        assert_eq!(-24, cost);
        assert_eq!(
            Err(ZoneError::EmptyZone),
            zone.infimum_valuation_fixing(&[None, Some(11), None])
        );
    }

    #[test]
    fn relation_compares_zone_and_cost() {
        let small = priced(2, &[Constraint::upper(1, Relation::weak(5))], vec![0, 1]);
        let large = priced(2, &[Constraint::upper(1, Relation::weak(10))], vec![0, 1]);
        let expensive = priced(2, &[Constraint::upper(1, Relation::weak(10))], vec![0, 2]);
        let small_expensive = priced(2, &[Constraint::upper(1, Relation::weak(5))], vec![0, 2]);

        struct Case<'a> {
            lhs: &'a PricedDbm,
            rhs: &'a PricedDbm,
            expected: Relationship,
        }

        let cases = [
            Case { lhs: &small, rhs: &small, expected: Relationship::Equal },
            Case { lhs: &large, rhs: &small, expected: Relationship::Superset },
            Case { lhs: &small, rhs: &large, expected: Relationship::Subset },
            Case { lhs: &large, rhs: &expensive, expected: Relationship::Superset },
            Case { lhs: &expensive, rhs: &large, expected: Relationship::Subset },
            Case { lhs: &large, rhs: &small_expensive, expected: Relationship::Superset },
            Case { lhs: &expensive, rhs: &small, expected: Relationship::Different },
        ];

        for case in cases {
            assert_eq!(case.expected, case.lhs.relation(case.rhs));
        }

        let mut cheap_start = expensive.clone();
        cheap_start.set_cost_at_offset(0);
        let mut dear_start = large.clone();
        dear_start.set_cost_at_offset(3);
        dear_start.set_rate(1, 0);
        // 2x against 3 cross at x = 1.5 inside the zone.
        assert_eq!(Relationship::Different, cheap_start.relation(&dear_start));
    }

    #[test]
    fn crossing_planes_may_still_compare() {
        // x = y, so the rates (1, 0) and (0, 1) describe the same cost.
        let tied = [
            Constraint::new(1, 2, Relation::weak(0)),
            Constraint::new(2, 1, Relation::weak(0)),
            Constraint::upper(1, Relation::weak(8)),
        ];
        let lhs = priced(3, &tied, vec![0, 1, 0]);
        let rhs = priced(3, &tied, vec![0, 0, 1]);
        assert_eq!(Relationship::Equal, lhs.relation(&rhs));
    }

    #[test]
    fn delay_with_rate_on_zero_clock() {
        let mut zone = PricedDbm::zero(3);
        zone.set_rate(2, 3);
        zone.up_zero(5, 1);
        assert_eq!(2, zone.rate(1));
        assert_eq!(5, zone.slope_of_delay_trajectory());
        assert!(zone.is_valid());
        assert!(zone.is_unbounded());
    }

    #[test]
    fn update_moves_rate_onto_zero_cycle() {
        let mut zone = PricedDbm::zero(3);
        zone.up();
        zone.set_rate(1, 4);
        zone.update_value_zero(1, 0, 2).unwrap();
        assert_eq!(0, zone.rate(1));
        assert_eq!(4, zone.rate(2));
        assert_eq!(vec![REFERENCE], zone.zero_cycle_members(1));
        assert!(zone.is_valid());
    }

    #[test]
    fn free_down_moves_offset_cost() {
        let mut zone = priced(
            2,
            &[
                Constraint::lower(1, Relation::weak(-3)),
                Constraint::upper(1, Relation::weak(5)),
            ],
            vec![0, -1],
        );
        zone.set_cost_at_offset(10);
        zone.free_down(1);
        assert_eq!(13, zone.cost_at_offset());
        assert_eq!(vec![0, 0], zone.offset());
        assert_eq!(Infimum::Finite(8), zone.infimum());
    }

    #[test]
    fn normalise_moves_rates_to_class_representative() {
        let mut zone = priced(
            4,
            &[
                Constraint::new(1, 2, Relation::weak(0)),
                Constraint::new(2, 1, Relation::weak(0)),
                Constraint::upper(3, Relation::weak(0)),
            ],
            vec![0, 2, 3, 4],
        );
        let infimum = zone.infimum();
        assert!(!zone.has_normal_form());

        zone.normalise();
        assert_eq!(&[0, 0, 5, 0], zone.rates());
        assert!(zone.has_normal_form());
        assert_eq!(infimum, zone.infimum());
    }

    #[test]
    fn extrapolation_keeps_priced_clocks() {
        let mut zone = priced(
            3,
            &[
                Constraint::lower(1, Relation::weak(-20)),
                Constraint::lower(2, Relation::weak(-20)),
            ],
            vec![0, 1, 0],
        );
        zone.extrapolate_max_bounds(&Bounds::from_max(vec![0, 5, 5]));
        assert_eq!(Relation::weak(-20), zone.dbm().lower(1));
        assert_eq!(Relation::strict(-5), zone.dbm().lower(2));
        assert_eq!(Infimum::Finite(0), zone.infimum());
    }

    #[test]
    fn inactive_clock_passes_rate_before_extrapolating() {
        let mut zone = PricedDbm::zero(3);
        zone.up();
        zone.set_rate(1, 2);
        let bounds = Bounds::new(3).set_max(2, 10);
        zone.diagonal_extrapolate_max_bounds(&bounds);
        assert_eq!(&[0, 0, 2], zone.rates());
    }

    #[test]
    fn increment_updates_the_cache() {
        let mut zone = priced(2, &[Constraint::upper(1, Relation::weak(4))], vec![0, -2]);
        assert_eq!(Infimum::Finite(-8), zone.infimum());
        zone.increment_cost(10);
        assert_eq!(Infimum::Finite(2), zone.infimum());
        assert!(zone.is_valid());
    }

    #[test]
    fn relax_and_containment() {
        let mut zone = priced(
            2,
            &[
                Constraint::lower(1, Relation::strict(-1)),
                Constraint::upper(1, Relation::strict(4)),
            ],
            vec![0, 1],
        );
        assert!(!zone.contains_point(&[0, 4]));
        assert!(zone.contains_weakly(&[0, 4]));
        assert!(zone.contains_real_point(&[0.0, 3.5]));
        zone.relax();
        assert!(zone.contains_point(&[0, 4]));
        assert!(zone.satisfies(1, REFERENCE, Relation::weak(4)));
    }

    #[test]
    fn infimum_bounds_every_point() {
        let mut rng = StdRng::seed_from_u64(0x9a1c_ed);
        for _ in 0..50 {
            let dimension = rng.gen_range(2..=5);
            let constraints = rng.gen_range(0..8);
            let dbm = random_zone(&mut rng, dimension, constraints);
            let mut rates: Vec<Limit> = (0..dimension).map(|_| rng.gen_range(-2..=4)).collect();
            rates[0] = 0;
            let zone = PricedDbm::with_cost(dbm, rates, 100).unwrap();

            let Infimum::Finite(infimum) = zone.infimum() else {
                continue;
            };
            let (cost, valuation) = zone.infimum_valuation().unwrap();
            assert_eq!(infimum, cost);
            assert!(zone.contains_weakly(&valuation), "{zone}");

            for _ in 0..20 {
                let point: Vec<Limit> = (0..dimension)
                    .map(|clock| if clock == 0 { 0 } else { rng.gen_range(0..=45) })
                    .collect();
                if zone.contains_point(&point) {
                    assert!(infimum <= zone.cost_of_valuation(&point));
                }
            }
        }
    }

    #[test]
    fn facets_skip_redundant_and_repeated_bounds() {
        // 2 < x <= 4, 0 <= y <= 1
        let mut boxed = priced(
            3,
            &[
                Constraint::lower(1, Relation::strict(-2)),
                Constraint::upper(1, Relation::weak(4)),
                Constraint::upper(2, Relation::weak(1)),
            ],
            vec![0, 1, 0],
        );
        assert_eq!(boxed.find_zero_cycle(REFERENCE), None);
        assert_eq!(boxed.lower_facets(), vec![1, 2]);
        assert!(!boxed.dbm().lower(1).is_strict());
        assert_eq!(boxed.upper_facets(), vec![1, 2]);
        assert_eq!(boxed.lower_relative_facets(1), vec![0]);
        assert_eq!(boxed.upper_relative_facets(1), vec![0]);

        // 2 <= x = y <= 5
        let mut diagonal = priced(
            3,
            &[
                Constraint::lower(1, Relation::weak(-2)),
                Constraint::upper(1, Relation::weak(5)),
                Constraint::new(1, 2, Relation::weak(0)),
                Constraint::new(2, 1, Relation::weak(0)),
            ],
            vec![0, 1, 0],
        );
        assert_eq!(diagonal.find_zero_cycle(1), Some(2));
        assert_eq!(diagonal.lower_facets(), vec![2]);
        assert_eq!(diagonal.upper_facets(), vec![2]);
    }

    #[test]
    #[should_panic(expected = "cannot update a clock with a rate")]
    fn priced_clocks_cannot_be_reset() {
        let mut zone = PricedDbm::init(2);
        zone.set_rate(1, 1);
        let _ = zone.update_value(1, 0);
    }
}
