use super::{
    constraint::{Clock, Limit, INFINITY_LIMIT, REFERENCE},
    error::{Result, ZoneError},
};

/// The bound of a clock that is never compared against any constant.
pub const INACTIVE: Limit = -INFINITY_LIMIT;

/// The maximal constants a clock is compared against. These are used to
/// extrapolate zones such that the zone graph stays finite. Lower bounds
/// are the constants of constraints "x > c" and "x ≥ c" while upper bounds
/// are the constants of constraints "x < c" and "x ≤ c".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bounds {
    lower: Vec<Limit>,
    upper: Vec<Limit>,
}

impl Bounds {
    /// Bounds where no clock besides the reference clock is active.
    pub fn new(dimension: Clock) -> Self {
        let mut lower = vec![INACTIVE; dimension as usize];
        let mut upper = vec![INACTIVE; dimension as usize];
        if dimension > 0 {
            lower[REFERENCE as usize] = 0;
            upper[REFERENCE as usize] = 0;
        }
        Self { lower, upper }
    }

    /// Uses the same constants for the lower and upper bounds.
    pub fn from_max(max: Vec<Limit>) -> Self {
        let mut bounds = Self {
            lower: max.clone(),
            upper: max,
        };
        bounds.reset_reference();
        bounds
    }

    pub fn from_lower_upper(lower: Vec<Limit>, upper: Vec<Limit>) -> Result<Self> {
        if lower.len() != upper.len() {
            return Err(ZoneError::DimensionMismatch {
                expected: lower.len() as Clock,
                actual: upper.len(),
            });
        }
        let mut bounds = Self { lower, upper };
        bounds.reset_reference();
        Ok(bounds)
    }

    fn reset_reference(&mut self) {
        if let Some(reference) = self.lower.first_mut() {
            *reference = 0;
        }
        if let Some(reference) = self.upper.first_mut() {
            *reference = 0;
        }
    }

    pub fn dimension(&self) -> Clock {
        self.lower.len() as Clock
    }

    pub fn set_max(self, clock: Clock, limit: Limit) -> Self {
        self.set_lower(clock, limit).set_upper(clock, limit)
    }

    pub fn set_lower(mut self, clock: Clock, limit: Limit) -> Self {
        assert!(clock != REFERENCE, "the reference clock has no bounds");
        self.lower[clock as usize] = limit;
        self
    }

    pub fn set_upper(mut self, clock: Clock, limit: Limit) -> Self {
        assert!(clock != REFERENCE, "the reference clock has no bounds");
        self.upper[clock as usize] = limit;
        self
    }

    /// Raises the bounds of a clock if the limit is larger.
    pub fn loosen_max(self, clock: Clock, limit: Limit) -> Self {
        let lower = self.lower(clock).max(limit);
        let upper = self.upper(clock).max(limit);
        self.set_lower(clock, lower).set_upper(clock, upper)
    }

    pub fn lower(&self, clock: Clock) -> Limit {
        self.lower[clock as usize]
    }

    pub fn upper(&self, clock: Clock) -> Limit {
        self.upper[clock as usize]
    }

    pub fn max(&self, clock: Clock) -> Limit {
        self.lower(clock).max(self.upper(clock))
    }

    pub fn lowers(&self) -> &[Limit] {
        &self.lower
    }

    pub fn uppers(&self) -> &[Limit] {
        &self.upper
    }

    /// The point-wise maximum of the lower and upper bounds.
    pub fn maxima(&self) -> Vec<Limit> {
        self.lower
            .iter()
            .zip(self.upper.iter())
            .map(|(lower, upper)| *lower.max(upper))
            .collect()
    }

    /// A clock is active if it is compared against some constant.
    pub fn is_active(&self, clock: Clock) -> bool {
        self.lower(clock) != INACTIVE || self.upper(clock) != INACTIVE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_bounds_are_inactive() {
        let bounds = Bounds::new(3);
        assert_eq!(3, bounds.dimension());
        assert!(bounds.is_active(REFERENCE));
        assert!(!bounds.is_active(1));
        assert!(!bounds.is_active(2));
    }

    #[test]
    fn builder_sets_constants() {
        let bounds = Bounds::new(3).set_lower(1, 4).set_upper(1, 7).set_max(2, 3);
        assert_eq!(4, bounds.lower(1));
        assert_eq!(7, bounds.upper(1));
        assert_eq!(7, bounds.max(1));
        assert_eq!(vec![0, 7, 3], bounds.maxima());
    }

    #[test]
    fn loosen_never_lowers() {
        let bounds = Bounds::new(2).set_max(1, 5).loosen_max(1, 2).loosen_max(1, 9);
        assert_eq!(9, bounds.lower(1));
        assert_eq!(9, bounds.upper(1));
    }

    #[test]
    fn reference_bounds_are_zero() {
        let bounds = Bounds::from_max(vec![12, 3]);
        assert_eq!(0, bounds.max(REFERENCE));
        assert_eq!(3, bounds.max(1));
    }

    #[test]
    fn lower_upper_must_agree_on_dimension() {
        assert!(Bounds::from_lower_upper(vec![0, 1], vec![0]).is_err());
        assert!(Bounds::from_lower_upper(vec![0, 1], vec![0, 2]).is_ok());
    }

    #[test]
    #[should_panic(expected = "the reference clock has no bounds")]
    fn reference_cannot_be_bounded() {
        let _ = Bounds::new(2).set_max(REFERENCE, 4);
    }
}
