use std::{
    fmt,
    ops::{Add, Sub},
};

use rand::{
    distributions::{Standard, Uniform},
    prelude::Distribution,
    Rng,
};

use super::error::{Result, ZoneError};

/// The unique index of a clock. This can be used to directly address the DBM.
pub type Clock = u16;

/// The zero'th (0) clock is the reference clock and always has the value 0.
pub const REFERENCE: Clock = 0;

/// Describes the strictness (<, <=) of the constraint between two clocks in the DBM.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash)]
pub enum Strictness {
    Strict,
    Weak,
}

impl Strictness {
    pub const fn opposite(&self) -> Self {
        match self {
            Strictness::Strict => Strictness::Weak,
            Strictness::Weak => Strictness::Strict,
        }
    }

    const fn bit(&self) -> i32 {
        match self {
            Strictness::Strict => 0,
            Strictness::Weak => 1,
        }
    }
}

impl Distribution<Strictness> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Strictness {
        if rng.gen_bool(1.0 / 2.0) {
            return Strictness::Strict;
        }
        Strictness::Weak
    }
}

impl fmt::Display for Strictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strictness::Strict => write!(f, "<"),
            Strictness::Weak => write!(f, "≤"),
        }
    }
}

pub type Limit = i32;

/// The limit used to encode infinity. It is never a valid finite limit.
pub const INFINITY_LIMIT: Limit = i32::MAX >> 1;

/// Every finite raw value must stay strictly within (-OVERFLOW_RAW, OVERFLOW_RAW)
/// such that adding two of them never wraps around.
const OVERFLOW_RAW: i32 = (INFINITY_LIMIT << 1) >> 1;

/// The maximum finite limit a relation supports.
pub const MAX_LIMIT: Limit = (OVERFLOW_RAW >> 1) - 1;
/// The minimum finite limit a relation supports.
pub const MIN_LIMIT: Limit = -MAX_LIMIT;

/// An element optimized for caching which represents a strict or weak
/// relation between two clocks (c0 - c1 RELATION). This encoding uses
/// the least significant bit to represent the strictness and the other
/// bits as the limit. The encoding is [limit] [1 bit strictness] where
/// a set bit means weak (≤). Comparing two relations is comparing the raw values.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
pub struct Relation(i32);

/// Infinity is (∞, <), the largest relation.
pub const INFINITY: Relation = Relation(INFINITY_LIMIT << 1);
/// Zero is just a relation with limit of 0 but it is weak and thereby includes 0 (0, ≤).
pub const ZERO: Relation = Relation::new(0, Strictness::Weak);
/// (0, <) excludes 0 and is the tightest relation that is not a contradiction on its own.
pub const STRICT_ZERO: Relation = Relation::new(0, Strictness::Strict);

impl Relation {
    pub const fn new(limit: Limit, strictness: Strictness) -> Self {
        Self((limit << 1) | strictness.bit())
    }

    /// Like new, but checks that the limit is representable.
    pub fn try_new(limit: i64, strictness: Strictness) -> Result<Self> {
        if limit < MIN_LIMIT as i64 || limit > MAX_LIMIT as i64 {
            return Err(ZoneError::BoundOverflow { limit });
        }
        Ok(Self::new(limit as Limit, strictness))
    }

    pub const fn weak(limit: Limit) -> Self {
        Self::new(limit, Strictness::Weak)
    }

    pub const fn strict(limit: Limit) -> Self {
        Self::new(limit, Strictness::Strict)
    }

    /// Wraps an already encoded value.
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> i32 {
        self.0
    }

    /// Returns the limit of the relation which can be
    /// represented with one less bit than the relation
    /// as the last bit describes the relation's strictness.
    pub const fn limit(&self) -> Limit {
        self.0 >> 1
    }

    /// Returns the strictness of the relation.
    pub const fn strictness(&self) -> Strictness {
        if self.is_strict() {
            return Strictness::Strict;
        }
        Strictness::Weak
    }

    pub const fn as_weak(&self) -> Self {
        Self(self.0 | 1)
    }

    pub const fn as_strict(&self) -> Self {
        Self(self.0 & !1)
    }

    /// Returns true if the strictness of the relation is strict.
    pub const fn is_strict(&self) -> bool {
        (self.0 & 1) == 0
    }

    /// Returns true if the strictness of the relation is weak.
    pub const fn is_weak(&self) -> bool {
        !self.is_strict()
    }

    /// Returns true if the relation represents a infinite relation (∞, <).
    pub const fn is_infinity(&self) -> bool {
        self.0 == INFINITY.0
    }

    /// Returns true if the relation represents a zero relation (0, ≤).
    pub const fn is_zero(&self) -> bool {
        self.0 == ZERO.0
    }

    /// Returns true if the relation is infinity or a finite value that can
    /// be added to any other valid value without overflowing.
    pub const fn is_valid(&self) -> bool {
        self.is_infinity() || (self.0 < OVERFLOW_RAW && -self.0 < OVERFLOW_RAW)
    }

    /// The negation of (c, ≤) is (-c, <) and vice versa. This is the
    /// complement of the constraint when read from the opposite direction.
    /// Infinity has no finite negation and must be checked by the caller.
    pub const fn negation(&self) -> Self {
        Self(1 - self.0)
    }

    /// Returns the sum of two constraints. The sum is satisfies both original constraints (lhs/rhs).
    /// The sum of two weak relations is weak while a strict operand makes the sum strict.
    /// Adding anything to infinity yields infinity.
    /// This addition is mostly used to compute the accumulated path when closing a DBM.
    pub const fn addition(&self, other: &Self) -> Self {
        if self.is_infinity() || other.is_infinity() {
            return INFINITY;
        }
        Self::add_finite(self, other)
    }

    /// Addition without the infinity check. Both operands must be finite.
    #[inline]
    pub const fn add_finite(&self, other: &Self) -> Self {
        // First adding the lhs and rhs increases the limit.
        // Then we ensure the tightest constraint that satisfies both constraints is kept.
        Self((self.0 + other.0) - ((self.0 | other.0) & 1))
    }

    /// Adds the negation of other, "self + ¬other". This is not the arithmetic
    /// difference of the two limits: weak(5) and weak(3) give strict(2).
    pub const fn add_negated(&self, other: &Self) -> Self {
        self.addition(&other.negation())
    }

    /// Shifts the limit of a finite relation by the given amount while keeping the strictness.
    pub const fn shifted(&self, delta: Limit) -> Self {
        if self.is_infinity() {
            return INFINITY;
        }
        Self(self.0 + (delta << 1))
    }
}

impl Default for Relation {
    fn default() -> Self {
        INFINITY
    }
}

impl Distribution<Relation> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Relation {
        let strictness: Strictness = rng.gen();
        let limit: Limit = rng.gen_range(-1024..=1024);
        Relation::new(limit, strictness)
    }
}

/// Samples finite relations with limits drawn uniformly from a range.
pub struct UniformRelations {
    limits: Uniform<Limit>,
}

impl UniformRelations {
    pub fn new_inclusive(low: Limit, high: Limit) -> Self {
        Self {
            limits: Uniform::new_inclusive(low, high),
        }
    }
}

impl Distribution<Relation> for UniformRelations {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Relation {
        let strictness: Strictness = rng.gen();
        Relation::new(self.limits.sample(rng), strictness)
    }
}

impl Add for Relation {
    type Output = Relation;

    fn add(self, rhs: Self) -> Self::Output {
        self.addition(&rhs)
    }
}

/// `a - b` is `a + ¬b`, see [`Relation::add_negated`].
impl Sub for Relation {
    type Output = Relation;

    fn sub(self, rhs: Self) -> Self::Output {
        self.add_negated(&rhs)
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinity() {
            return write!(f, "(∞, {})", self.strictness());
        }
        write!(f, "({}, {})", self.limit(), self.strictness())
    }
}

/// A single difference constraint "i - j RELATION".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Constraint {
    pub i: Clock,
    pub j: Clock,
    pub relation: Relation,
}

impl Constraint {
    pub const fn new(i: Clock, j: Clock, relation: Relation) -> Self {
        Self { i, j, relation }
    }

    /// The constraint "clock RELATION limit".
    pub const fn upper(clock: Clock, relation: Relation) -> Self {
        Self::new(clock, REFERENCE, relation)
    }

    /// The constraint "-clock RELATION limit", i.e., a lower bound on the clock.
    pub const fn lower(clock: Clock, relation: Relation) -> Self {
        Self::new(REFERENCE, clock, relation)
    }

    /// The constraint read from the other direction which is satisfied exactly
    /// by the valuations that violate this constraint.
    pub const fn negation(&self) -> Self {
        Self::new(self.j, self.i, self.relation.negation())
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {} {}", self.i, self.j, self.relation)
    }
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use rand::Rng;

    use super::*;

    #[test]
    fn reference_clock_is_zero() {
        assert_eq!(0, REFERENCE)
    }

    #[test]
    fn weak_formatted_is_less_than_or_equal() {
        assert_eq!("≤", Strictness::Weak.to_string())
    }

    #[test]
    fn strict_formatted_is_less_than() {
        assert_eq!("<", Strictness::Strict.to_string())
    }

    #[test]
    fn raw_encoding_uses_set_bit_for_weak() {
        assert_eq!(1, ZERO.raw());
        assert_eq!(0, STRICT_ZERO.raw());
        assert_eq!(11, Relation::weak(5).raw());
        assert_eq!(10, Relation::strict(5).raw());
        assert_eq!(-9, Relation::weak(-5).raw());
        assert_eq!(-10, Relation::strict(-5).raw());
    }

    #[test]
    fn new_relation_returns_correct_strictness() {
        assert_eq!(Strictness::Weak, Relation::weak(0).strictness());
        assert_eq!(Strictness::Strict, Relation::strict(0).strictness());
        assert_eq!(Strictness::Weak, Relation::weak(MAX_LIMIT).strictness());
        assert_eq!(Strictness::Strict, Relation::strict(MIN_LIMIT).strictness());
    }

    #[test]
    fn new_relation_returns_correct_limit() {
        assert_eq!(0, Relation::weak(0).limit());
        assert_eq!(10, Relation::weak(10).limit());
        assert_eq!(-10, Relation::strict(-10).limit());
        assert_eq!(MIN_LIMIT, Relation::weak(MIN_LIMIT).limit());
        assert_eq!(MAX_LIMIT, Relation::weak(MAX_LIMIT).limit());

        let mut rng = rand::thread_rng();
        for _ in 0..10_000 {
            let limit = rng.gen_range(MIN_LIMIT..=MAX_LIMIT);
            let relation = Relation::weak(limit);
            assert_eq!(limit, relation.limit());
            assert!(relation.is_valid(), "{}", relation);
        }
    }

    #[test]
    fn try_new_rejects_overflowing_limits() {
        assert!(Relation::try_new(MAX_LIMIT as i64, Strictness::Weak).is_ok());
        assert!(Relation::try_new(MIN_LIMIT as i64, Strictness::Strict).is_ok());
        assert_eq!(
            Err(ZoneError::BoundOverflow {
                limit: MAX_LIMIT as i64 + 1
            }),
            Relation::try_new(MAX_LIMIT as i64 + 1, Strictness::Weak)
        );
        assert!(Relation::try_new(i32::MIN as i64, Strictness::Weak).is_err());
    }

    #[test]
    fn sum_of_extreme_limits_does_not_overflow() {
        let max = Relation::weak(MAX_LIMIT);
        let min = Relation::weak(MIN_LIMIT);
        assert_eq!(Relation::weak(2 * MAX_LIMIT), max + max);
        assert_eq!(Relation::weak(2 * MIN_LIMIT), min + min);
        assert!((max + max) < INFINITY);
    }

    #[test]
    fn infinity() {
        assert_eq!(INFINITY_LIMIT, INFINITY.limit());
        assert_eq!(Strictness::Strict, INFINITY.strictness());
        assert_eq!("(∞, <)", INFINITY.to_string());
        assert!(INFINITY.is_infinity());
        assert!(INFINITY.is_valid());
        assert!(!Relation::weak(INFINITY_LIMIT).is_valid());
    }

    #[test]
    fn zero() {
        assert_eq!(0, ZERO.limit());
        assert_eq!(Strictness::Weak, ZERO.strictness());
        assert_eq!("(0, ≤)", ZERO.to_string());
        assert!(ZERO.is_zero())
    }

    #[test]
    fn relation_order() {
        struct Case {
            lhs: Relation,
            rhs: Relation,
            ordering: Ordering,
        }
        let cases: [Case; 6] = [
            Case {
                lhs: Relation::weak(10),
                rhs: Relation::weak(10),
                ordering: Ordering::Equal,
            },
            Case {
                lhs: Relation::strict(10),
                rhs: Relation::weak(10),
                ordering: Ordering::Less,
            },
            Case {
                lhs: Relation::weak(10),
                rhs: Relation::strict(11),
                ordering: Ordering::Less,
            },
            Case {
                lhs: INFINITY,
                rhs: Relation::strict(10),
                ordering: Ordering::Greater,
            },
            Case {
                lhs: Relation::weak(MAX_LIMIT),
                rhs: INFINITY,
                ordering: Ordering::Less,
            },
            Case {
                lhs: Relation::weak(-1),
                rhs: STRICT_ZERO,
                ordering: Ordering::Less,
            },
        ];

        for case in cases {
            assert_eq!(
                case.ordering,
                case.lhs.cmp(&case.rhs),
                "{} ? {}",
                case.lhs,
                case.rhs
            );
        }
    }

    #[test]
    fn constraint_display() {
        assert_eq!(
            "0 - 0 (0, ≤)",
            Constraint::new(REFERENCE, REFERENCE, ZERO).to_string()
        );
        assert_eq!(
            "0 - 2 (-3, <)",
            Constraint::lower(2, Relation::strict(-3)).to_string()
        );
    }

    #[test]
    fn relation_negation() {
        assert_eq!("(-10, <)", Relation::weak(10).negation().to_string());
        assert_eq!("(-10, ≤)", Relation::strict(10).negation().to_string());
        assert_eq!(STRICT_ZERO, ZERO.negation());
    }

    #[test]
    fn constraint_negation_is_the_complement() {
        let constraint = Constraint::upper(1, Relation::weak(5));
        let negated = constraint.negation();
        assert_eq!(REFERENCE, negated.i);
        assert_eq!(1, negated.j);
        assert_eq!(Relation::strict(-5), negated.relation);
    }

    #[test]
    fn add_relation() {
        struct Case {
            lhs: Relation,
            rhs: Relation,
            expected: Relation,
        }
        let cases: [Case; 7] = [
            Case {
                lhs: Relation::weak(10),
                rhs: Relation::weak(10),
                expected: Relation::weak(20),
            },
            Case {
                lhs: Relation::strict(10),
                rhs: Relation::weak(10),
                expected: Relation::strict(20),
            },
            Case {
                lhs: Relation::weak(10),
                rhs: Relation::strict(10),
                expected: Relation::strict(20),
            },
            Case {
                lhs: Relation::weak(11),
                rhs: Relation::strict(-10),
                expected: Relation::strict(1),
            },
            Case {
                lhs: INFINITY,
                rhs: Relation::weak(10),
                expected: INFINITY,
            },
            Case {
                lhs: Relation::strict(-4),
                rhs: INFINITY,
                expected: INFINITY,
            },
            Case {
                lhs: ZERO,
                rhs: Relation::strict(7),
                expected: Relation::strict(7),
            },
        ];

        for case in cases {
            let actual = case.lhs + case.rhs;
            assert_eq!(
                case.expected, actual,
                "{} + {} = {}",
                case.lhs, case.rhs, actual
            );
        }
    }

    #[test]
    fn add_negated_flips_strictness() {
        assert_eq!(Relation::strict(2), Relation::weak(5) - Relation::weak(3));
        assert_eq!(Relation::weak(2), Relation::weak(5) - Relation::strict(3));
        assert_eq!(
            Relation::weak(5).addition(&Relation::weak(3).negation()),
            Relation::weak(5).add_negated(&Relation::weak(3))
        );
        assert_eq!(INFINITY, INFINITY.add_negated(&Relation::weak(3)));
    }

    #[test]
    fn shifted_keeps_strictness() {
        assert_eq!(Relation::strict(7), Relation::strict(4).shifted(3));
        assert_eq!(Relation::weak(-1), Relation::weak(4).shifted(-5));
        assert_eq!(INFINITY, INFINITY.shifted(3));
    }

    #[test]
    fn uniform_relations_stay_in_range() {
        let mut rng = rand::thread_rng();
        let sampler = UniformRelations::new_inclusive(-5, 5);
        for _ in 0..1_000 {
            let relation = sampler.sample(&mut rng);
            assert!((-5..=5).contains(&relation.limit()));
        }
    }
}
