use std::{
    collections::hash_map::DefaultHasher,
    fmt,
    hash::{Hash, Hasher},
};

use bitset::BitSet;

use super::constraint::{Clock, Relation, INFINITY, ZERO};

/// Writes the zone where every clock is non-negative and otherwise unconstrained.
/// Row 0 is (0, ≤), the diagonal is (0, ≤), and everything else is infinity.
pub fn init(relations: &mut [Relation], dimension: Clock) {
    let dimension = dimension as usize;
    assert!(dimension > 0, "DBM dimension must be positive");
    assert_eq!(dimension * dimension, relations.len(), "inconsistent DBM size");

    fill(relations, INFINITY);
    for j in 0..dimension {
        relations[j] = ZERO;
        relations[j * dimension + j] = ZERO;
    }
}

pub fn fill(relations: &mut [Relation], value: Relation) {
    for relation in relations.iter_mut() {
        *relation = value;
    }
}

/// Compares blocks of raw values by accumulating their differences with XOR.
/// This avoids branching on every single entry.
pub fn are_equal(lhs: &[Relation], rhs: &[Relation]) -> bool {
    if lhs.len() != rhs.len() {
        return false;
    }

    lhs.chunks(8).zip(rhs.chunks(8)).all(|(a, b)| {
        a.iter()
            .zip(b.iter())
            .fold(0, |diff, (x, y)| diff | (x.raw() ^ y.raw()))
            == 0
    })
}

/// The content hash of a matrix. Equal matrices of equal dimension have equal hashes.
pub fn hash_relations(dimension: Clock, relations: &[Relation]) -> u64 {
    let mut hasher = DefaultHasher::new();
    dimension.hash(&mut hasher);
    for relation in relations {
        relation.raw().hash(&mut hasher);
    }
    hasher.finish()
}

/// Combines hashes independently of their order by sorting them first.
pub fn sorted_hash(mut hashes: Vec<u64>) -> u64 {
    hashes.sort_unstable();
    let mut hasher = DefaultHasher::new();
    hashes.hash(&mut hasher);
    hasher.finish()
}

/// A dimension × dimension matrix of bits. It marks constraints of a DBM,
/// e.g., the ones that are part of the minimal graph.
pub struct BitMatrix {
    dimension: Clock,
    bits: BitSet,
}

impl BitMatrix {
    pub fn new(dimension: Clock) -> Self {
        let size = dimension as usize * dimension as usize;
        Self {
            dimension,
            bits: BitSet::with_capacity(size.max(1)),
        }
    }

    pub const fn dimension(&self) -> Clock {
        self.dimension
    }

    #[inline]
    fn index(&self, i: Clock, j: Clock) -> usize {
        i as usize * self.dimension as usize + j as usize
    }

    #[inline]
    pub fn test(&self, i: Clock, j: Clock) -> bool {
        self.bits.test(self.index(i, j))
    }

    /// Sets the bit and returns true if it was not already set.
    pub fn set(&mut self, i: Clock, j: Clock) -> bool {
        let index = self.index(i, j);
        if self.bits.test(index) {
            return false;
        }
        self.bits.set(index, true);
        true
    }

    /// Clears the bit and returns true if it was set.
    pub fn clear(&mut self, i: Clock, j: Clock) -> bool {
        let index = self.index(i, j);
        if !self.bits.test(index) {
            return false;
        }
        self.bits.set(index, false);
        true
    }

    pub fn toggle(&mut self, i: Clock, j: Clock) {
        let index = self.index(i, j);
        let value = self.bits.test(index);
        self.bits.set(index, !value);
    }

    pub fn count(&self) -> usize {
        if self.dimension == 0 {
            return 0;
        }
        self.bits.count() as usize
    }

    pub fn any(&self) -> bool {
        self.dimension > 0 && self.bits.any()
    }

    /// All set (i, j) pairs in row-major order.
    pub fn ones(&self) -> impl Iterator<Item = (Clock, Clock)> + '_ {
        let dimension = self.dimension;
        (0..dimension)
            .flat_map(move |i| (0..dimension).map(move |j| (i, j)))
            .filter(|(i, j)| self.test(*i, *j))
    }

    /// The number of 32-bit words needed to store the bits.
    pub fn words_len(dimension: Clock) -> usize {
        let size = dimension as usize * dimension as usize;
        (size + 31) / 32
    }

    /// Bit k of the matrix is bit (k % 32) of word (k / 32).
    pub fn to_words(&self) -> Vec<u32> {
        let size = self.dimension as usize * self.dimension as usize;
        let mut words = vec![0u32; Self::words_len(self.dimension)];
        for index in 0..size {
            if self.bits.test(index) {
                words[index / 32] |= 1 << (index % 32);
            }
        }
        words
    }

    pub fn from_words(dimension: Clock, words: &[u32]) -> Self {
        let mut matrix = Self::new(dimension);
        let size = dimension as usize * dimension as usize;
        for index in 0..size {
            let word = words.get(index / 32).copied().unwrap_or(0);
            if (word >> (index % 32)) & 1 == 1 {
                matrix.bits.set(index, true);
            }
        }
        matrix
    }
}

impl Clone for BitMatrix {
    fn clone(&self) -> Self {
        Self::from_words(self.dimension, &self.to_words())
    }
}

impl fmt::Debug for BitMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.ones()).finish()
    }
}
