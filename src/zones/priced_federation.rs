use std::{fmt, ops::BitOrAssign};

use tracing::{debug, instrument, trace};

use super::{
    bounds::Bounds,
    constraint::{Clock, Constraint, Limit, Relation, REFERENCE},
    dbm::Relationship,
    error::{Result, ZoneError},
    priced::PricedDbm,
    simplex::{Cost, Infimum},
};

/// A union of priced zones. The cost of a valuation is the smallest cost
/// given to it by any of the zones containing it.
#[derive(Clone, Debug)]
pub struct PricedFederation {
    dimension: Clock,
    zones: Vec<PricedDbm>,
}

impl PricedFederation {
    pub fn empty(dimension: Clock) -> Self {
        Self {
            dimension,
            zones: vec![],
        }
    }

    /// The universe with a zero cost.
    pub fn init(dimension: Clock) -> Self {
        Self::from(PricedDbm::init(dimension))
    }

    /// The origin with a zero cost.
    pub fn zero(dimension: Clock) -> Self {
        Self::from(PricedDbm::zero(dimension))
    }

    #[inline]
    pub const fn dimension(&self) -> Clock {
        self.dimension
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PricedDbm> {
        self.zones.iter()
    }

    pub fn set_empty(&mut self) {
        self.zones.clear();
    }

    pub fn set_zero(&mut self) {
        self.zones = vec![PricedDbm::zero(self.dimension)];
    }

    pub fn set_init(&mut self) {
        self.zones = vec![PricedDbm::init(self.dimension)];
    }

    /// Adds the zone unless some zone is at least as large and as cheap.
    /// Zones dominated by the new one are removed.
    pub fn add(&mut self, zone: PricedDbm) {
        self.check_zone_dimension(&zone);
        if self
            .zones
            .iter()
            .any(|existing| existing.relation(&zone).is_superset_eq())
        {
            trace!("dominated zone skipped");
            return;
        }
        self.zones
            .retain(|existing| !zone.relation(existing).is_superset_eq());
        self.zones.push(zone);
    }

    pub fn union(&mut self, other: &PricedFederation) {
        self.check_dimension(other);
        for zone in other.zones.iter() {
            self.add(zone.clone());
        }
    }

    pub fn constrain(&mut self, i: Clock, j: Clock, relation: Relation) -> bool {
        self.filter_map_mut(|zone| zone.constrain(i, j, relation));
        !self.is_empty()
    }

    pub fn constrain_all(&mut self, constraints: &[Constraint]) -> bool {
        self.filter_map_mut(|zone| zone.constrain_all(constraints));
        !self.is_empty()
    }

    /// Restricts the clock to the value.
    pub fn constrain_clock(&mut self, clock: Clock, value: Limit) -> bool {
        let constraints = [
            Constraint::upper(clock, Relation::weak(value)),
            Constraint::lower(clock, Relation::weak(-value)),
        ];
        self.constrain_all(&constraints)
    }

    /// The smallest infimum of the zones.
    pub fn infimum(&self) -> Result<Infimum> {
        self.zones
            .iter()
            .map(PricedDbm::infimum)
            .reduce(|lhs, rhs| match (lhs, rhs) {
                (Infimum::Finite(lhs), Infimum::Finite(rhs)) => Infimum::Finite(lhs.min(rhs)),
                _ => Infimum::Unbounded,
            })
            .ok_or(ZoneError::EmptyZone)
    }

    pub fn infimum_valuation(&self) -> Result<(Cost, Vec<Limit>)> {
        self.infimum_valuation_fixing(&vec![None; self.dimension as usize])
    }

    /// The cheapest valuation over the zones where the clocks with a value
    /// are fixed to it. Zones without such a valuation are skipped.
    pub fn infimum_valuation_fixing(&self, fixed: &[Option<Limit>]) -> Result<(Cost, Vec<Limit>)> {
        let mut cheapest: Option<(Cost, Vec<Limit>)> = None;
        for zone in self.zones.iter() {
            match zone.infimum_valuation_fixing(fixed) {
                Ok((cost, valuation)) => {
                    if cheapest.as_ref().map_or(true, |(best, _)| cost < *best) {
                        cheapest = Some((cost, valuation));
                    }
                }
                Err(ZoneError::EmptyZone) => continue,
                Err(error) => return Err(error),
            }
        }
        cheapest.ok_or(ZoneError::EmptyZone)
    }

    /// The cheapest cost of the valuation over the zones whose closure holds it.
    pub fn cost_of_valuation(&self, valuation: &[Limit]) -> Option<Cost> {
        self.zones
            .iter()
            .filter(|zone| zone.contains_weakly(valuation))
            .map(|zone| zone.cost_of_valuation(valuation))
            .min()
    }

    pub fn satisfies(&self, i: Clock, j: Clock, relation: Relation) -> bool {
        self.zones.iter().any(|zone| zone.satisfies(i, j, relation))
    }

    pub fn is_unbounded(&self) -> bool {
        self.zones.iter().any(PricedDbm::is_unbounded)
    }

    pub fn contains_point(&self, point: &[Limit]) -> bool {
        self.zones.iter().any(|zone| zone.contains_point(point))
    }

    pub fn contains_real_point(&self, point: &[f64]) -> bool {
        self.zones.iter().any(|zone| zone.contains_real_point(point))
    }

    pub fn contains_weakly(&self, point: &[Limit]) -> bool {
        self.zones.iter().any(|zone| zone.contains_weakly(point))
    }

    /// A federation is a subset of the other if each of its zones is a subset
    /// of some zone of the other. Subsets covered by several zones are not
    /// detected.
    pub fn relation(&self, other: &PricedFederation) -> Relationship {
        self.check_dimension(other);
        let mut covered = vec![false; self.len()];
        let mut other_covered = vec![false; other.len()];

        for (lhs, lhs_covered) in self.zones.iter().zip(covered.iter_mut()) {
            for (rhs, rhs_covered) in other.zones.iter().zip(other_covered.iter_mut()) {
                if *lhs_covered && *rhs_covered {
                    continue;
                }
                match lhs.relation(rhs) {
                    Relationship::Equal => {
                        *lhs_covered = true;
                        *rhs_covered = true;
                    }
                    Relationship::Subset => *lhs_covered = true,
                    Relationship::Superset => *rhs_covered = true,
                    Relationship::Different => {}
                }
            }
        }

        Relationship::from_flags(
            covered.into_iter().all(|covered| covered),
            other_covered.into_iter().all(|covered| covered),
        )
    }

    /// Delays every zone keeping the cost rates.
    pub fn up(&mut self) {
        self.for_each_mut(|zone| zone.up())
    }

    /// Delays every zone such that the cost grows with the rate along the
    /// delay. Zones with a different slope are split along their facets.
    #[instrument(level = "debug", skip_all, fields(dimension = self.dimension, size = self.len(), rate = rate))]
    pub fn up_with_rate(&mut self, rate: Limit) {
        assert!(rate >= 0, "the delay rate cannot be negative");
        let zones = std::mem::take(&mut self.zones);
        for zone in zones {
            for part in delayed_parts(zone, rate) {
                self.add(part);
            }
        }
        debug!(size = self.len(), "delayed with rate");
    }

    /// Resets the clock. Zones where the clock has a rate are split along
    /// the facets where the reset is cheapest.
    #[instrument(level = "debug", skip_all, fields(dimension = self.dimension, size = self.len(), clock = clock, value = value))]
    pub fn update_value(&mut self, clock: Clock, value: Limit) -> Result<()> {
        if value < 0 {
            return Err(ZoneError::InvalidValue { value });
        }

        let mut parts = Vec::with_capacity(self.len());
        for zone in self.zones.iter() {
            parts.extend(updated_parts(zone.clone(), clock, value)?);
        }

        self.zones.clear();
        for part in parts {
            self.add(part);
        }
        debug!(size = self.len(), "updated");
        Ok(())
    }

    pub fn update_value_zero(&mut self, clock: Clock, value: Limit, zero: Clock) -> Result<()> {
        self.try_for_each_mut(|zone| zone.update_value_zero(clock, value, zero))
    }

    pub fn extrapolate_max_bounds(&mut self, bounds: &Bounds) {
        self.for_each_mut(|zone| zone.extrapolate_max_bounds(bounds))
    }

    pub fn diagonal_extrapolate_max_bounds(&mut self, bounds: &Bounds) {
        self.for_each_mut(|zone| zone.diagonal_extrapolate_max_bounds(bounds))
    }

    pub fn diagonal_extrapolate_lu_bounds(&mut self, bounds: &Bounds) {
        self.for_each_mut(|zone| zone.diagonal_extrapolate_lu_bounds(bounds))
    }

    pub fn increment_cost(&mut self, value: Cost) {
        self.for_each_mut(|zone| zone.increment_cost(value))
    }

    pub fn relax(&mut self) {
        self.for_each_mut(|zone| zone.relax())
    }

    pub fn free_clock(&mut self, clock: Clock) {
        self.for_each_mut(|zone| zone.free_clock(clock))
    }

    pub fn free_up(&mut self, clock: Clock) {
        self.for_each_mut(|zone| zone.free_up(clock))
    }

    pub fn free_down(&mut self, clock: Clock) {
        self.for_each_mut(|zone| zone.free_down(clock))
    }

    fn check_dimension(&self, other: &PricedFederation) {
        if self.dimension != other.dimension {
            panic!("inconsistent dimension between priced federations")
        }
    }

    fn check_zone_dimension(&self, zone: &PricedDbm) {
        if self.dimension != zone.dimension() {
            panic!("inconsistent dimension between priced federation and zone")
        }
    }

    fn filter_map_mut<F>(&mut self, f: F)
    where
        F: FnMut(PricedDbm) -> Option<PricedDbm>,
    {
        let zones = std::mem::take(&mut self.zones);
        self.zones = zones.into_iter().filter_map(f).collect();
    }

    fn for_each_mut<F>(&mut self, f: F)
    where
        F: FnMut(&mut PricedDbm),
    {
        self.zones.iter_mut().for_each(f);
    }

    fn try_for_each_mut<F>(&mut self, f: F) -> Result<()>
    where
        F: FnMut(&mut PricedDbm) -> Result<()>,
    {
        self.zones.iter_mut().try_for_each(f)
    }
}

/// The zones reached by delaying with the rate. A smaller rate than the
/// slope of the zone makes delaying from the lower facets cheapest. A larger
/// rate makes not delaying cheapest, and the rest is reached from the upper
/// facets.
fn delayed_parts(mut zone: PricedDbm, rate: Limit) -> Vec<PricedDbm> {
    let slope = zone.slope_of_delay_trajectory();
    if rate as Cost == slope {
        zone.up();
        return vec![zone];
    }
    if let Some(fixed) = zone.find_zero_cycle(REFERENCE) {
        zone.up_zero(rate, fixed);
        return vec![zone];
    }

    let from_lower = (rate as Cost) < slope;
    let original = zone.clone();
    let facets = if from_lower {
        zone.lower_facets()
    } else {
        zone.upper_facets()
    };
    trace!(?facets, from_lower, "splitting delay");

    let mut parts: Vec<PricedDbm> = facets
        .into_iter()
        .filter_map(|clock| {
            let (i, j) = if from_lower {
                (REFERENCE, clock)
            } else {
                (clock, REFERENCE)
            };
            let mut part = zone.clone().constrain_to_facet(i, j)?;
            part.up_zero(rate, clock);
            Some(part)
        })
        .collect();

    if !from_lower {
        parts.push(original);
    } else if parts.is_empty() {
        zone.up();
        parts.push(zone);
    }
    parts
}

/// The zones reached by resetting the clock. A positive rate makes the reset
/// cheapest from the smallest values of the clock, a negative one from the
/// largest.
fn updated_parts(mut zone: PricedDbm, clock: Clock, value: Limit) -> Result<Vec<PricedDbm>> {
    let rate = zone.rate(clock);
    if rate == 0 {
        zone.update_value(clock, value)?;
        return Ok(vec![zone]);
    }
    if let Some(zero) = zone.find_zero_cycle(clock) {
        zone.update_value_zero(clock, value, zero)?;
        return Ok(vec![zone]);
    }

    let facets = if rate > 0 {
        zone.lower_relative_facets(clock)
    } else {
        zone.upper_relative_facets(clock)
    };
    // Without an upper facet the clock grows without bound at a negative rate.
    if facets.is_empty() {
        return Err(ZoneError::UnboundedInfimum);
    }
    trace!(?facets, rate, "splitting update");

    let mut parts = Vec::with_capacity(facets.len());
    for facet in facets {
        let (i, j) = if rate > 0 {
            (facet, clock)
        } else {
            (clock, facet)
        };
        if let Some(mut part) = zone.clone().constrain_to_facet(i, j) {
            part.update_value_zero(clock, value, facet)?;
            parts.push(part);
        }
    }
    Ok(parts)
}

impl From<PricedDbm> for PricedFederation {
    fn from(zone: PricedDbm) -> Self {
        Self {
            dimension: zone.dimension(),
            zones: vec![zone],
        }
    }
}

impl BitOrAssign<&PricedFederation> for PricedFederation {
    fn bitor_assign(&mut self, rhs: &PricedFederation) {
        self.union(rhs)
    }
}

impl BitOrAssign<PricedDbm> for PricedFederation {
    fn bitor_assign(&mut self, rhs: PricedDbm) {
        self.add(rhs)
    }
}

impl fmt::Display for PricedFederation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "false");
        }
        for (index, zone) in self.zones.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
                writeln!(f, "||")?;
            }
            write!(f, "{}", zone)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use crate::zones::{
        constraint::{Constraint, Limit, Relation},
        dbm::{random_zone, Relationship},
        error::ZoneError,
        priced::PricedDbm,
        simplex::{Cost, Infimum},
    };

    use super::PricedFederation;

    fn priced(dimension: u16, constraints: &[Constraint], rates: Vec<Limit>, cost: Cost) -> PricedDbm {
        let zone = PricedDbm::init(dimension)
            .constrain_all(constraints)
            .expect("non-empty test zone");
        PricedDbm::with_cost(zone.into_dbm(), rates, cost).unwrap()
    }

    fn between(clock: u16, low: Limit, high: Limit) -> [Constraint; 2] {
        [
            Constraint::lower(clock, Relation::weak(-low)),
            Constraint::upper(clock, Relation::weak(high)),
        ]
    }

    fn random_priced(rng: &mut StdRng, dimension: u16) -> PricedDbm {
        let dbm = random_zone(rng, dimension, 4);
        let mut rates: Vec<Limit> = (0..dimension).map(|_| rng.gen_range(-3..=3)).collect();
        rates[0] = 0;
        PricedDbm::with_cost(dbm, rates, rng.gen_range(0..=10)).unwrap()
    }

    /// The cheapest cost over the integer points of the closure reaching the
    /// point by a delay, or none if the point is not reached.
    fn cheapest_delay(zone: &PricedDbm, point: &[Limit], rate: Limit) -> Option<Cost> {
        let longest = point.iter().skip(1).copied().min().unwrap_or(0);
        (0..=longest)
            .filter_map(|delay| {
                let mut source = point.to_vec();
                source.iter_mut().skip(1).for_each(|value| *value -= delay);
                zone.contains_weakly(&source)
                    .then(|| zone.cost_of_valuation(&source) + rate as Cost * delay as Cost)
            })
            .min()
    }

    /// The cheapest cost over the integer points of the closure that the reset
    /// of clock 1 to the value maps onto the point.
    fn cheapest_reset(zone: &PricedDbm, point: &[Limit], value: Limit) -> Option<Cost> {
        if point[1] != value {
            return None;
        }
        (0..=20)
            .filter_map(|before| {
                let mut source = point.to_vec();
                source[1] = before;
                zone.contains_weakly(&source).then(|| zone.cost_of_valuation(&source))
            })
            .min()
    }

    #[test]
    fn infimum_is_the_cheapest_zone() {
        let expensive = priced(2, &between(1, 2, 5), vec![0, 1], 3);
        let cheap = priced(2, &between(1, 0, 3), vec![0, -1], 4);
        let mut federation = PricedFederation::from(expensive);
        federation.add(cheap);

        assert_eq!(federation.len(), 2);
        assert_eq!(federation.infimum(), Ok(Infimum::Finite(1)));
        let (cost, valuation) = federation.infimum_valuation().unwrap();
        assert_eq!(cost, 1);
        assert_eq!(valuation, vec![0, 3]);
        assert_eq!(federation.cost_of_valuation(&[0, 3]), Some(1));
        assert_eq!(federation.cost_of_valuation(&[0, 9]), None);

        let falling = priced(2, &[], vec![0, -1], 0);
        federation.add(falling);
        assert_eq!(federation.infimum(), Ok(Infimum::Unbounded));
        assert_eq!(
            federation.infimum_valuation(),
            Err(ZoneError::UnboundedInfimum)
        );
    }

    #[test]
    fn empty_federation_has_no_infimum() {
        let mut federation = PricedFederation::zero(3);
        assert_eq!(federation.infimum(), Ok(Infimum::Finite(0)));

        federation.set_empty();
        assert!(federation.is_empty());
        assert_eq!(federation.infimum(), Err(ZoneError::EmptyZone));
        assert_eq!(federation.infimum_valuation(), Err(ZoneError::EmptyZone));
        assert_eq!(federation.cost_of_valuation(&[0, 0, 0]), None);
    }

    #[test]
    fn fixing_clocks_skips_zones_without_the_value() {
        let low = priced(2, &between(1, 0, 3), vec![0, 1], 0);
        let high = priced(2, &between(1, 6, 9), vec![0, 1], 0);
        let mut federation = PricedFederation::from(low);
        federation.add(high);

        assert_eq!(
            federation.infimum_valuation_fixing(&[None, Some(7)]),
            Ok((1, vec![0, 7]))
        );
        assert_eq!(
            federation.infimum_valuation_fixing(&[None, Some(5)]),
            Err(ZoneError::EmptyZone)
        );
    }

    #[test]
    fn adding_prunes_dominated_zones() {
        let zone = priced(2, &between(1, 0, 5), vec![0, 1], 0);
        let mut federation = PricedFederation::from(zone);

        // Inside and more expensive than the existing zone.
        federation.add(priced(2, &between(1, 1, 3), vec![0, 1], 2));
        assert_eq!(federation.len(), 1);

        // Larger and as cheap replaces it.
        let larger = priced(2, &between(1, 0, 10), vec![0, 1], 0);
        federation |= larger.clone();
        assert_eq!(federation.len(), 1);
        assert_eq!(federation.iter().next(), Some(&larger));

        // Cheaper somewhere and more expensive elsewhere.
        federation.add(priced(2, &between(1, 0, 5), vec![0, 0], 1));
        assert_eq!(federation.len(), 2);
        assert_eq!(federation.cost_of_valuation(&[0, 0]), Some(0));
        assert_eq!(federation.cost_of_valuation(&[0, 4]), Some(1));
        assert_eq!(federation.cost_of_valuation(&[0, 8]), Some(8));
    }

    #[test]
    fn relation_covers_zone_by_zone() {
        let first = priced(2, &between(1, 0, 5), vec![0, 1], 0);
        let second = priced(2, &between(1, 0, 5), vec![0, 0], 1);
        let single = PricedFederation::from(first.clone());
        let mut both = PricedFederation::from(first);
        both.add(second);
        let empty = PricedFederation::empty(2);

        struct Case<'a> {
            lhs: &'a PricedFederation,
            rhs: &'a PricedFederation,
            expected: Relationship,
        }

        let cases = [
            Case {
                lhs: &single,
                rhs: &both,
                expected: Relationship::Subset,
            },
            Case {
                lhs: &both,
                rhs: &single,
                expected: Relationship::Superset,
            },
            Case {
                lhs: &both,
                rhs: &both,
                expected: Relationship::Equal,
            },
            Case {
                lhs: &empty,
                rhs: &empty,
                expected: Relationship::Equal,
            },
            Case {
                lhs: &empty,
                rhs: &single,
                expected: Relationship::Subset,
            },
        ];

        for case in cases {
            assert_eq!(case.lhs.relation(case.rhs), case.expected);
        }
    }

    #[test]
    fn union_keeps_the_cheapest_cost() {
        let mut lhs = PricedFederation::from(priced(2, &between(1, 0, 4), vec![0, 2], 0));
        let rhs = PricedFederation::from(priced(2, &between(1, 2, 6), vec![0, 0], 3));
        lhs |= &rhs;

        assert_eq!(lhs.len(), 2);
        assert_eq!(lhs.cost_of_valuation(&[0, 1]), Some(2));
        assert_eq!(lhs.cost_of_valuation(&[0, 4]), Some(3));
        assert_eq!(lhs.cost_of_valuation(&[0, 6]), Some(3));
        assert!(lhs.contains_point(&[0, 5]));
        assert!(!lhs.contains_point(&[0, 7]));
    }

    #[test]
    fn constraining_drops_empty_zones() {
        let mut federation = PricedFederation::from(priced(3, &between(1, 0, 4), vec![0, 1, 0], 0));
        federation.add(priced(3, &between(1, 6, 9), vec![0, 0, 1], 0));

        assert!(federation.constrain_clock(1, 7));
        assert_eq!(federation.len(), 1);
        assert!(federation.satisfies(1, 0, Relation::weak(7)));
        assert!(!federation.constrain(2, 1, Relation::strict(-7)));
        assert!(federation.is_empty());
    }

    #[test]
    fn delaying_with_a_rate_splits_along_facets() {
        // 2 <= x <= 4, 0 <= y <= 1, with cost x.
        let zone = priced(
            3,
            &[between(1, 2, 4), between(2, 0, 1)].concat(),
            vec![0, 1, 0],
            0,
        );

        struct Case {
            rate: Limit,
            point: [Limit; 3],
            expected: Option<Cost>,
        }

        let cases = [
            // Same slope: the cost grows by one per time unit.
            Case {
                rate: 1,
                point: [0, 6, 2],
                expected: Some(4),
            },
            // Free delay: the cheapest start is the lowest x.
            Case {
                rate: 0,
                point: [0, 6, 4],
                expected: Some(0),
            },
            // Expensive delay: the cheapest start is the highest x.
            Case {
                rate: 3,
                point: [0, 6, 2],
                expected: Some(8),
            },
            // Points of the zone are reached without delay.
            Case {
                rate: 3,
                point: [0, 3, 1],
                expected: Some(1),
            },
            Case {
                rate: 3,
                point: [0, 1, 0],
                expected: None,
            },
        ];

        for case in cases {
            let mut federation = PricedFederation::from(zone.clone());
            federation.up_with_rate(case.rate);
            assert_eq!(
                federation.cost_of_valuation(&case.point),
                case.expected,
                "rate {} at {:?}",
                case.rate,
                case.point
            );
        }
    }

    #[test]
    fn delaying_with_a_rate_matches_pointwise_delay() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..40 {
            let zone = random_priced(&mut rng, 3);
            let rate = rng.gen_range(0..=4);
            let mut federation = PricedFederation::from(zone.clone());
            federation.up_with_rate(rate);

            for x in 0..=40 {
                for y in 0..=40 {
                    let point = [0, x, y];
                    assert_eq!(
                        federation.cost_of_valuation(&point),
                        cheapest_delay(&zone, &point, rate),
                        "{}\nrate {} at {:?}",
                        zone,
                        rate,
                        point
                    );
                }
            }
        }
    }

    #[test]
    fn update_with_a_rate_resets_from_the_cheapest_facet() {
        let mut rng = StdRng::seed_from_u64(0xfacade);
        for _ in 0..40 {
            let zone = random_priced(&mut rng, 3);
            let Some(zone) = zone.constrain_all(&[
                Constraint::upper(1, Relation::weak(20)),
                Constraint::upper(2, Relation::weak(20)),
            ]) else {
                continue;
            };
            let value = rng.gen_range(0..=5);
            let mut federation = PricedFederation::from(zone.clone());
            federation.update_value(1, value).unwrap();

            for x in 0..=20 {
                for y in 0..=20 {
                    let point = [0, x, y];
                    assert_eq!(
                        federation.cost_of_valuation(&point),
                        cheapest_reset(&zone, &point, value),
                        "{}\nreset to {} at {:?}",
                        zone,
                        value,
                        point
                    );
                }
            }
        }
    }

    #[test]
    fn update_rejects_negative_values() {
        let mut federation = PricedFederation::init(2);
        assert_eq!(
            federation.update_value(1, -1),
            Err(ZoneError::InvalidValue { value: -1 })
        );
        assert_eq!(federation.len(), 1);
    }

    #[test]
    fn unbounded_reset_with_negative_rate_is_reported() {
        let mut federation = PricedFederation::from(priced(2, &[], vec![0, -1], 0));
        assert_eq!(
            federation.update_value(1, 0),
            Err(ZoneError::UnboundedInfimum)
        );
        assert_eq!(federation.len(), 1);
    }

    #[test]
    #[should_panic(expected = "the delay rate cannot be negative")]
    fn negative_delay_rate_panics() {
        PricedFederation::init(2).up_with_rate(-1);
    }

    #[test]
    #[should_panic(expected = "inconsistent dimension between priced federations")]
    fn union_checks_dimensions() {
        let mut lhs = PricedFederation::init(2);
        lhs.union(&PricedFederation::init(3));
    }
}
