use std::fmt;

use tracing::{debug, trace};

use super::{
    constraint::{Clock, Relation, INFINITY, REFERENCE, ZERO},
    dbm::{Canonical, Relationship, DBM},
    error::{Result, ZoneError},
    matrix::BitMatrix,
};

const DIMENSION_MASK: u32 = 0x0000_ffff;
const CODED_16: u32 = 0x0001_0000;
const COUPLES: u32 = 0x0002_0000;
const MINIMAL: u32 = 0x0004_0000;
const INDEX_SHIFT: u32 = 19;
const INDEX_MASK: u32 = 0x0018_0000;
const MANY: u32 = 0x0020_0000;
const COUNT_SHIFT: u32 = 22;
const MAX_SHORT_COUNT: usize = 0x3ff;

/// Infinity on 16 bits.
pub const INF16: i16 = i16::MAX >> 1;
/// The raw value of infinity on 16 bits.
pub const LS_INF16: i16 = INF16 << 1;

/// Controls how a DBM is encoded. Both reductions are on by default.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EncodingOptions {
    /// Only store the constraints of the minimal graph.
    pub minimize_graph: bool,
    /// Store the constraints on 16 bits if all of them fit.
    pub try_16bit: bool,
}

impl Default for EncodingOptions {
    fn default() -> Self {
        Self {
            minimize_graph: true,
            try_16bit: true,
        }
    }
}

impl EncodingOptions {
    pub const fn copy() -> Self {
        Self {
            minimize_graph: false,
            try_16bit: false,
        }
    }
}

fn malformed(message: impl Into<String>) -> ZoneError {
    ZoneError::MalformedEncoding(message.into())
}

/// The number of 32-bit words needed to store the bits.
const fn words_for_bits(bits: usize) -> usize {
    (bits + 31) >> 5
}

/// Finds the constraints that are not implied by other constraints.
///
/// Clocks whose difference is fixed form an equivalence class. Between
/// the representatives of the classes an edge is kept unless it is implied
/// by a path of two edges through a third representative. The members of
/// a class are connected by a cycle of edges.
pub fn analyze(dbm: &DBM<Canonical>) -> (BitMatrix, usize) {
    let dimension = dbm.dimension();
    let mut bits = BitMatrix::new(dimension);

    match dimension {
        0 | 1 => {}
        2 => {
            bits.set(REFERENCE, 1);
            if !dbm.upper(1).is_infinity() {
                bits.set(1, REFERENCE);
            }
        }
        _ => analyze_classes(dbm, &mut bits),
    }

    let count = bits.count();
    trace!(dimension, count, "analyzed minimal graph");
    (bits, count)
}

fn analyze_classes(dbm: &DBM<Canonical>, bits: &mut BitMatrix) {
    let dimension = dbm.dimension();
    let mut assigned = vec![false; dimension as usize];
    let mut next: Vec<Option<Clock>> = vec![None; dimension as usize];
    let mut representatives: Vec<Clock> = Vec::new();

    for i in REFERENCE..dimension {
        if assigned[i as usize] {
            continue;
        }

        assigned[i as usize] = true;
        representatives.push(i);

        let mut last = i;
        for j in i + 1..dimension {
            // Comparing the limits avoids overflowing the sum.
            if dbm[(i, j)].limit() == -dbm[(j, i)].limit() {
                next[last as usize] = Some(j);
                assigned[j as usize] = true;
                last = j;
            }
        }
    }

    for &p in representatives.iter() {
        for &q in representatives.iter() {
            let pq = dbm[(p, q)];
            if p == q || pq.is_infinity() {
                continue;
            }

            let redundant = representatives.iter().any(|&r| {
                let pr = dbm[(p, r)];
                let rq = dbm[(r, q)];
                r != p
                    && r != q
                    && !pr.is_infinity()
                    && !rq.is_infinity()
                    && pq >= pr.add_finite(&rq)
            });

            if !redundant {
                bits.set(p, q);
            }
        }
    }

    // Zero cycles.
    for &p in representatives.iter() {
        if next[p as usize].is_none() {
            continue;
        }

        let mut i = p;
        while let Some(j) = next[i as usize] {
            bits.set(i, j);
            i = j;
        }
        bits.set(i, p);
    }
}

/// Removes the lower bounds "x ≥ 0" as every clock is non-negative anyway.
pub fn clean_bit_matrix(dbm: &DBM<Canonical>, bits: &mut BitMatrix, count: usize) -> usize {
    let mut count = count;
    for j in REFERENCE + 1..dbm.dimension() {
        if dbm.lower(j) >= ZERO && bits.clear(REFERENCE, j) {
            count -= 1;
        }
    }
    count
}

/// The cleaned minimal graph of the DBM. Constraining the initial zone with
/// the marked constraints and closing it gives back the DBM.
pub fn minimal_graph(dbm: &DBM<Canonical>) -> (BitMatrix, usize) {
    let (mut bits, count) = analyze(dbm);
    let count = clean_bit_matrix(dbm, &mut bits, count);
    (bits, count)
}

/// The ways a DBM is written as words.
#[derive(Debug)]
enum Layout {
    /// Only the dimension for DBMs of dimension 0 or 1.
    Dimension,
    /// The minimal graph has no constraints.
    Trivial,
    /// All constraints but the diagonal.
    Copy { coded16: bool },
    /// The minimal graph with a bit matrix marking the stored constraints.
    BitMatrix {
        coded16: bool,
        bits: BitMatrix,
        count: usize,
    },
    /// The minimal graph with the (i, j) couples of the stored constraints.
    Couples {
        coded16: bool,
        code: u32,
        bits: BitMatrix,
        count: usize,
    },
}

impl Layout {
    fn plan(dbm: &DBM<Canonical>, options: EncodingOptions) -> Self {
        let dimension = dbm.dimension() as usize;
        let fits16 = dbm.max_range() < LS_INF16 as u32;

        if dimension <= 1 {
            return Layout::Dimension;
        }

        // Nothing to reduce. The 16 bit format is always tried.
        if dimension == 2 {
            if dbm.lower(1) == ZERO && dbm.upper(1).is_infinity() {
                return Layout::Trivial;
            }
            return Layout::Copy { coded16: fits16 };
        }

        let coded16 = options.try_16bit && fits16;
        if !options.minimize_graph {
            return Layout::Copy { coded16 };
        }

        let (bits, count) = minimal_graph(dbm);
        if count == 0 {
            return Layout::Trivial;
        }

        let c16 = coded16 as usize;
        let constraints = (count + c16) >> c16;
        let info = if count > MAX_SHORT_COUNT { 2 } else { 1 };
        let copy = 1 + ((dimension * (dimension - 1) + c16) >> c16);
        let matrix = info + constraints + BitMatrix::words_len(dimension as Clock);
        let (code, indices) = if dimension <= 16 {
            (0, words_for_bits(count << 3))
        } else if dimension <= 256 {
            (1, words_for_bits(count << 4))
        } else {
            (2, words_for_bits(count << 5))
        };
        let couples = info + constraints + indices;

        if copy <= matrix {
            if copy <= couples {
                return Layout::Copy { coded16 };
            }
        } else if couples >= matrix {
            return Layout::BitMatrix {
                coded16,
                bits,
                count,
            };
        }

        Layout::Couples {
            coded16,
            code,
            bits,
            count,
        }
    }

    fn size(&self, dimension: Clock) -> usize {
        let dimension = dimension as usize;
        match self {
            Layout::Dimension | Layout::Trivial => 1,
            Layout::Copy { coded16 } => {
                let c16 = *coded16 as usize;
                1 + ((dimension * (dimension - 1) + c16) >> c16)
            }
            Layout::BitMatrix { coded16, count, .. } => {
                let c16 = *coded16 as usize;
                info_size(*count)
                    + ((*count + c16) >> c16)
                    + BitMatrix::words_len(dimension as Clock)
            }
            Layout::Couples {
                coded16,
                code,
                count,
                ..
            } => {
                let c16 = *coded16 as usize;
                info_size(*count) + ((*count + c16) >> c16) + words_for_bits(*count << (3 + *code))
            }
        }
    }
}

const fn info_size(count: usize) -> usize {
    if count > MAX_SHORT_COUNT {
        2
    } else {
        1
    }
}

fn raw32to16(relation: Relation) -> u16 {
    if relation.is_infinity() {
        LS_INF16 as u16
    } else {
        relation.raw() as i16 as u16
    }
}

fn raw16to32(half: u16) -> Relation {
    if half as i16 == LS_INF16 {
        INFINITY
    } else {
        Relation::from_raw(half as i16 as i32)
    }
}

/// Appends the values either as words or as halves packed two per word,
/// low half first. An odd number of halves is padded with zero.
fn write_values(words: &mut Vec<u32>, values: &[Relation], coded16: bool) {
    if !coded16 {
        words.extend(values.iter().map(|value| value.raw() as u32));
        return;
    }

    for pair in values.chunks(2) {
        let low = raw32to16(pair[0]) as u32;
        let high = pair.get(1).map_or(0, |value| raw32to16(*value) as u32);
        words.push(low | (high << 16));
    }
}

fn write_header(words: &mut Vec<u32>, flags: u32, count: usize) {
    if count > MAX_SHORT_COUNT {
        words.push(flags | MANY);
        words.push(count as u32);
    } else {
        words.push(flags | ((count as u32) << COUNT_SHIFT));
    }
}

/// The constraints marked by the bits in row-major order.
fn marked(dbm: &DBM<Canonical>, bits: &BitMatrix) -> Vec<Relation> {
    bits.ones().map(|(i, j)| dbm[(i, j)]).collect()
}

/// Encodes the DBM with the cheapest layout.
pub fn encode(dbm: &DBM<Canonical>, options: EncodingOptions) -> Vec<u32> {
    let dimension = dbm.dimension();
    let layout = Layout::plan(dbm, options);
    let dim = dimension as u32;
    let mut words = Vec::with_capacity(layout.size(dimension));

    match &layout {
        Layout::Dimension => words.push(dim),
        Layout::Trivial => words.push(dim | MINIMAL | COUPLES),
        Layout::Copy { coded16 } => {
            words.push(if *coded16 { dim | CODED_16 } else { dim });
            let values: Vec<Relation> = dbm
                .relations()
                .iter()
                .enumerate()
                .filter(|(index, _)| index % (dimension as usize + 1) != 0)
                .map(|(_, relation)| *relation)
                .collect();
            write_values(&mut words, &values, *coded16);
        }
        Layout::BitMatrix {
            coded16,
            bits,
            count,
        } => {
            let flags = dim | MINIMAL | if *coded16 { CODED_16 } else { 0 };
            write_header(&mut words, flags, *count);
            write_values(&mut words, &marked(dbm, bits), *coded16);
            words.extend(bits.to_words());
        }
        Layout::Couples {
            coded16,
            code,
            bits,
            count,
        } => {
            let flags = dim
                | MINIMAL
                | COUPLES
                | (*code << INDEX_SHIFT)
                | if *coded16 { CODED_16 } else { 0 };
            write_header(&mut words, flags, *count);
            write_values(&mut words, &marked(dbm, bits), *coded16);

            let bit_size: u32 = 4 << *code;
            let mut packed = 0u32;
            let mut shift: u32 = 0;
            for (i, j) in bits.ones() {
                packed |= (i as u32) << shift;
                shift += bit_size;
                packed |= (j as u32) << shift;
                shift += bit_size;
                if shift == 32 {
                    words.push(packed);
                    packed = 0;
                    shift = 0;
                }
            }
            if shift > 0 {
                words.push(packed);
            }
        }
    }

    debug!(dimension, ?options, words = words.len(), "encoded DBM");
    debug_assert_eq!(layout.size(dimension), words.len());
    words
}

/// The number of words the DBM is encoded with.
pub fn encoded_size(dbm: &DBM<Canonical>, options: EncodingOptions) -> usize {
    Layout::plan(dbm, options).size(dbm.dimension())
}

/// Reads the dimension from the header.
pub fn dimension_of(words: &[u32]) -> Result<Clock> {
    let header = words.first().ok_or_else(|| malformed("missing header"))?;
    let dimension = (header & DIMENSION_MASK) as Clock;
    if dimension == 0 {
        return Err(malformed("dimension must be positive"));
    }
    Ok(dimension)
}

/// The stored constraints of an encoding of dimension 2 or more, read in place.
struct Packed<'a> {
    dimension: Clock,
    coded16: bool,
    values: &'a [u32],
    count: usize,
    indices: Indices<'a>,
}

enum Indices<'a> {
    /// Every constraint but the diagonal in row-major order.
    Copy,
    Matrix(BitMatrix),
    /// (i, j) couples of 4 << code bits each, packed from the low bits.
    Couples { words: &'a [u32], code: u32 },
}

impl<'a> Packed<'a> {
    fn parse(dimension: Clock, words: &'a [u32]) -> Result<Self> {
        let header = words[0];
        let coded16 = header & CODED_16 != 0;
        match (header & MINIMAL != 0, header & COUPLES != 0) {
            (false, false) => {
                let expected = Layout::Copy { coded16 }.size(dimension);
                if words.len() != expected {
                    return Err(malformed(format!(
                        "expected {} words but got {}",
                        expected,
                        words.len()
                    )));
                }
                let size = dimension as usize;
                Ok(Packed {
                    dimension,
                    coded16,
                    values: &words[1..],
                    count: size * (size - 1),
                    indices: Indices::Copy,
                })
            }
            (false, true) => Err(malformed("couples without a minimal graph")),
            (true, couples) => Self::parse_minimal(dimension, words, coded16, couples),
        }
    }

    fn parse_minimal(
        dimension: Clock,
        words: &'a [u32],
        coded16: bool,
        couples: bool,
    ) -> Result<Self> {
        let header = words[0];
        let (count, start) = if header & MANY != 0 {
            let count = *words.get(1).ok_or_else(|| malformed("missing constraint count"))?;
            (count as usize, 2)
        } else {
            ((header >> COUNT_SHIFT) as usize, 1)
        };

        let c16 = coded16 as usize;
        let offset = start + ((count + c16) >> c16);
        let indices = if couples {
            let code = (header & INDEX_MASK) >> INDEX_SHIFT;
            if code > 2 {
                return Err(malformed("unknown index size"));
            }
            if words.len() != offset + words_for_bits(count << (3 + code)) {
                return Err(malformed("unexpected number of words"));
            }
            Indices::Couples {
                words: &words[offset..],
                code,
            }
        } else {
            if words.len() != offset + BitMatrix::words_len(dimension) {
                return Err(malformed("unexpected number of words"));
            }
            let bits = BitMatrix::from_words(dimension, &words[offset..]);
            if bits.count() != count {
                return Err(malformed("bit matrix disagrees with the constraint count"));
            }
            Indices::Matrix(bits)
        };

        let packed = Packed {
            dimension,
            coded16,
            values: &words[start..offset],
            count,
            indices,
        };
        for (i, j, value) in packed.constraints() {
            if i >= dimension || j >= dimension || i == j {
                return Err(malformed(format!("invalid constraint index ({}, {})", i, j)));
            }
            if !value.is_valid() || value.is_infinity() {
                return Err(ZoneError::BoundOverflow {
                    limit: value.limit() as i64,
                });
            }
        }
        Ok(packed)
    }

    fn is_copy(&self) -> bool {
        matches!(self.indices, Indices::Copy)
    }

    fn value(&self, index: usize) -> Relation {
        if !self.coded16 {
            return Relation::from_raw(self.values[index] as i32);
        }
        let word = self.values[index >> 1];
        let half = if index & 1 == 0 { word } else { word >> 16 };
        raw16to32(half as u16)
    }

    fn indices(&self) -> Box<dyn Iterator<Item = (Clock, Clock)> + '_> {
        match &self.indices {
            Indices::Copy => {
                let row = self.dimension as usize - 1;
                Box::new((0..self.count).map(move |index| {
                    let i = index / row;
                    let column = index % row;
                    let j = if column >= i { column + 1 } else { column };
                    (i as Clock, j as Clock)
                }))
            }
            Indices::Matrix(bits) => Box::new(bits.ones()),
            Indices::Couples { words, code } => {
                let words = *words;
                let bit_size: u32 = 4 << *code;
                let mask: u32 = (1 << bit_size) - 1;
                let per_word = (32 / (2 * bit_size)) as usize;
                Box::new((0..self.count).map(move |index| {
                    let word = words[index / per_word];
                    let shift = (index % per_word) as u32 * 2 * bit_size;
                    (
                        ((word >> shift) & mask) as Clock,
                        ((word >> (shift + bit_size)) & mask) as Clock,
                    )
                }))
            }
        }
    }

    fn constraints(&self) -> impl Iterator<Item = (Clock, Clock, Relation)> + '_ {
        self.indices()
            .enumerate()
            .map(|(index, (i, j))| (i, j, self.value(index)))
    }

    fn decode(&self) -> Result<DBM<Canonical>> {
        let zone = if self.is_copy() {
            let size = self.dimension as usize;
            let mut relations = vec![ZERO; size * size];
            for (i, j, value) in self.constraints() {
                relations[i as usize * size + j as usize] = value;
            }
            DBM::from_relations(self.dimension, relations)?.close()
        } else {
            let mut dbm = DBM::universe(self.dimension).dirty();
            for (i, j, value) in self.constraints() {
                dbm.set_relation(i, j, value);
            }
            dbm.close()
        };
        zone.ok().ok_or_else(|| malformed("empty zone"))
    }
}

/// An encoding of dimension 1 is the header alone.
fn check_unit(words: &[u32]) -> Result<()> {
    if words.len() != 1 {
        return Err(malformed("trailing words"));
    }
    Ok(())
}

/// Decodes an encoding back into the closed DBM.
pub fn decode(words: &[u32]) -> Result<DBM<Canonical>> {
    let dimension = dimension_of(words)?;
    if dimension == 1 {
        check_unit(words)?;
        return Ok(DBM::zero(1));
    }
    Packed::parse(dimension, words)?.decode()
}

/// Returns true if the origin is included without decoding the zone.
pub fn has_zero(words: &[u32]) -> Result<bool> {
    let dimension = dimension_of(words)?;
    if dimension == 1 {
        return Ok(true);
    }

    let packed = Packed::parse(dimension, words)?;
    let origin = |(_, _, value): (Clock, Clock, Relation)| value >= ZERO;
    if packed.is_copy() {
        // Row 0 is stored first.
        return Ok(packed.constraints().take(dimension as usize - 1).all(origin));
    }
    let all = packed.constraints().all(origin);
    Ok(all)
}

fn check_dimension(dbm: &DBM<Canonical>, dimension: Clock) -> Result<()> {
    if dimension != dbm.dimension() {
        return Err(ZoneError::DimensionMismatch {
            expected: dbm.dimension(),
            actual: dimension as usize,
        });
    }
    Ok(())
}

/// Compares a DBM with an encoded DBM. The stored constraints are compared
/// in place and the first difference ends the comparison. A minimal graph is
/// expected to be the one [`encode`] writes.
pub fn is_equal(dbm: &DBM<Canonical>, words: &[u32]) -> Result<bool> {
    let dimension = dimension_of(words)?;
    if dimension != dbm.dimension() {
        return Ok(false);
    }
    if dimension == 1 {
        check_unit(words)?;
        return Ok(true);
    }

    let packed = Packed::parse(dimension, words)?;
    if !packed.constraints().all(|(i, j, value)| dbm[(i, j)] == value) {
        return Ok(false);
    }
    if packed.is_copy() {
        return Ok(true);
    }

    // Equal zones have equal minimal graphs.
    let (graph, count) = minimal_graph(dbm);
    Ok(count == packed.count && packed.indices().eq(graph.ones()))
}

/// The relation of the DBM to the encoded DBM. Stored copies are compared in
/// place. Against a minimal graph a subset or a difference is usually found in
/// place too, and the encoding is only decoded when the DBM may include it.
pub fn relation(dbm: &DBM<Canonical>, words: &[u32]) -> Result<Relationship> {
    let dimension = dimension_of(words)?;
    check_dimension(dbm, dimension)?;
    if dimension == 1 {
        check_unit(words)?;
        return Ok(Relationship::Equal);
    }

    let packed = Packed::parse(dimension, words)?;
    let mut looser = false;
    let mut tighter = false;
    for (i, j, value) in packed.constraints() {
        let own = dbm[(i, j)];
        looser |= own > value;
        tighter |= own < value;
        if looser && tighter {
            return Ok(Relationship::Different);
        }
    }

    if packed.is_copy() {
        return Ok(Relationship::from_flags(!looser, !tighter));
    }

    // The stored constraints are tight in the encoded zone, so a tighter one
    // excludes some of its valuations.
    match (looser, tighter) {
        (false, true) => Ok(Relationship::Subset),
        (false, false) => {
            let (graph, count) = minimal_graph(dbm);
            if count == packed.count && packed.indices().eq(graph.ones()) {
                Ok(Relationship::Equal)
            } else {
                trace!(dimension, "relation needs the decoded zone");
                Ok(dbm.relation(&packed.decode()?))
            }
        }
        _ => {
            trace!(dimension, "relation needs the decoded zone");
            Ok(dbm.relation(&packed.decode()?))
        }
    }
}

/// Enlarges the DBM to the convex union with the encoded DBM. A stored copy
/// is merged in place and an empty minimal graph stands for the universe.
pub fn convex_union(dbm: &mut DBM<Canonical>, words: &[u32]) -> Result<()> {
    let dimension = dimension_of(words)?;
    check_dimension(dbm, dimension)?;
    if dimension == 1 {
        return check_unit(words);
    }

    let packed = Packed::parse(dimension, words)?;
    if packed.is_copy() {
        dbm.loosen_to(packed.constraints());
    } else if packed.count == 0 {
        *dbm = DBM::universe(dimension);
    } else {
        dbm.convex_union(&packed.decode()?);
    }
    Ok(())
}

/// A well-formed encoding of a DBM. Encoding is deterministic so equal
/// zones encoded with the same options have equal encodings.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Encoding {
    words: Box<[u32]>,
}

impl Encoding {
    pub fn new(dbm: &DBM<Canonical>, options: EncodingOptions) -> Self {
        Self {
            words: encode(dbm, options).into_boxed_slice(),
        }
    }

    /// Validates the words by decoding them.
    pub fn from_words(words: Vec<u32>) -> Result<Self> {
        decode(&words)?;
        Ok(Self {
            words: words.into_boxed_slice(),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % 4 != 0 {
            return Err(malformed("length is not a multiple of 4"));
        }
        let words = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Self::from_words(words)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.words.iter().flat_map(|word| word.to_le_bytes()).collect()
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn dimension(&self) -> Clock {
        (self.words[0] & DIMENSION_MASK) as Clock
    }

    pub fn decode(&self) -> Result<DBM<Canonical>> {
        decode(&self.words)
    }

    pub fn has_zero(&self) -> Result<bool> {
        has_zero(&self.words)
    }

    pub fn is_equal(&self, dbm: &DBM<Canonical>) -> Result<bool> {
        is_equal(dbm, &self.words)
    }

    /// The relation of the DBM to this encoding.
    pub fn relation(&self, dbm: &DBM<Canonical>) -> Result<Relationship> {
        relation(dbm, &self.words)
    }
}

impl fmt::Debug for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Encoding[")?;
        for (index, word) in self.words.iter().enumerate() {
            if index > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:08x}", word)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use crate::zones::{
        constraint::{Constraint, Relation},
        dbm::{random_zone, Canonical, Relationship, DBM},
    };

    use super::*;

    fn closed(constraints: &[Constraint], dimension: Clock) -> DBM<Canonical> {
        match DBM::from_constraints(dimension, constraints).ok() {
            Some(dbm) => dbm,
            None => panic!("unexpected empty zone"),
        }
    }

    // x ≤ 5, y ≤ 5, x - y ≤ 2, y - x ≤ 2
    fn square() -> DBM<Canonical> {
        closed(
            &[
                Constraint::upper(1, Relation::weak(5)),
                Constraint::upper(2, Relation::weak(5)),
                Constraint::new(1, 2, Relation::weak(2)),
                Constraint::new(2, 1, Relation::weak(2)),
            ],
            3,
        )
    }

    #[test]
    fn small_dimensions() {
        struct Case {
            dbm: DBM<Canonical>,
            expected: Vec<u32>,
        }
        let cases = [
            Case {
                dbm: DBM::zero(1),
                expected: vec![1],
            },
            Case {
                dbm: DBM::universe(2),
                expected: vec![2 | 0x60000],
            },
            Case {
                dbm: closed(&[Constraint::upper(1, Relation::weak(5))], 2),
                expected: vec![2 | 0x10000, 1 | (11 << 16)],
            },
            Case {
                dbm: closed(&[Constraint::upper(1, Relation::weak(20000))], 2),
                expected: vec![2, 1, 40001],
            },
            Case {
                dbm: DBM::universe(4),
                expected: vec![4 | 0x60000],
            },
        ];

        for case in cases {
            let words = encode(&case.dbm, EncodingOptions::default());
            assert_eq!(case.expected, words);
            assert_eq!(Ok(case.dbm), decode(&words));
        }
    }

    #[test]
    fn square_layouts() {
        let dbm = square();

        let (bits, count) = minimal_graph(&dbm);
        assert_eq!(4, count);
        assert_eq!(
            vec![(1, 0), (1, 2), (2, 0), (2, 1)],
            bits.ones().collect::<Vec<_>>()
        );

        // Ties between copy and the minimal graph favour the copy.
        let words = encode(&dbm, EncodingOptions::default());
        assert_eq!(
            vec![3 | 0x10000, 1 | (1 << 16), 11 | (5 << 16), 11 | (5 << 16)],
            words
        );

        let options = EncodingOptions {
            minimize_graph: true,
            try_16bit: false,
        };
        let words = encode(&dbm, options);
        assert_eq!(vec![3 | 0x40000 | (4 << 22), 11, 5, 11, 5, 0xe8], words);
        assert_eq!(words.len(), encoded_size(&dbm, options));
        assert_eq!(Ok(dbm.clone()), decode(&words));

        let words = encode(&dbm, EncodingOptions::copy());
        assert_eq!(vec![3, 1, 1, 11, 5, 11, 5], words);
        assert_eq!(Ok(dbm), decode(&words));
    }

    #[test]
    fn sparse_zone_uses_couples() {
        let dbm = closed(&[Constraint::upper(1, Relation::weak(5))], 10);
        let options = EncodingOptions {
            minimize_graph: true,
            try_16bit: false,
        };
        assert_eq!(vec![10 | 0x60000 | (1 << 22), 11, 1], encode(&dbm, options));
        assert_eq!(
            vec![10 | 0x70000 | (1 << 22), 11, 1],
            encode(&dbm, EncodingOptions::default())
        );
        assert_eq!(Ok(dbm.clone()), decode(&encode(&dbm, options)));
    }

    #[test]
    fn zero_cycles_are_chained() {
        // x = y + 1, x ≤ 4
        let dbm = closed(
            &[
                Constraint::new(1, 2, Relation::weak(1)),
                Constraint::new(2, 1, Relation::weak(-1)),
                Constraint::upper(1, Relation::weak(4)),
            ],
            3,
        );
        let (bits, _) = analyze(&dbm);
        assert!(bits.test(1, 2));
        assert!(bits.test(2, 1));
        assert!(!bits.test(2, 0));
        assert_eq!(Ok(dbm.clone()), decode(&encode(&dbm, EncodingOptions::default())));
    }

    #[test]
    fn round_trip_random_zones() {
        let mut rng = rand::thread_rng();
        let options = [
            EncodingOptions::default(),
            EncodingOptions::copy(),
            EncodingOptions {
                minimize_graph: true,
                try_16bit: false,
            },
            EncodingOptions {
                minimize_graph: false,
                try_16bit: true,
            },
        ];

        for _ in 0..300 {
            let dimension = rng.gen_range(1..=20);
            let constraints = rng.gen_range(0..=dimension as usize * 2);
            let dbm = random_zone(&mut rng, dimension, constraints);

            for option in options {
                let words = encode(&dbm, option);
                assert_eq!(words, encode(&dbm, option));
                assert_eq!(words.len(), encoded_size(&dbm, option));
                assert_eq!(Ok(dbm.clone()), decode(&words));
                assert_eq!(Ok(true), is_equal(&dbm, &words));
                assert_eq!(Ok(Relationship::Equal), relation(&dbm, &words));
                assert_eq!(Ok(dbm.has_zero()), has_zero(&words));
            }
        }
    }

    #[test]
    fn large_dimension_index_codes() {
        let mut rng = rand::thread_rng();
        let dbm = random_zone(&mut rng, 260, 4);
        let words = encode(&dbm, EncodingOptions::default());
        assert_eq!(Ok(dbm), decode(&words));

        let dbm = random_zone(&mut rng, 40, 3);
        let words = encode(&dbm, EncodingOptions::default());
        assert_eq!(Ok(dbm), decode(&words));
    }

    #[test]
    fn relation_and_union_against_encoding() {
        let small = closed(&[Constraint::upper(1, Relation::weak(2))], 3);
        let large = closed(&[Constraint::upper(1, Relation::weak(7))], 3);
        let encoded = Encoding::new(&large, EncodingOptions::default());

        assert_eq!(Ok(Relationship::Subset), encoded.relation(&small));
        assert_eq!(Ok(false), encoded.is_equal(&small));

        let mut union = small.clone();
        assert_eq!(Ok(()), convex_union(&mut union, encoded.words()));
        assert_eq!(large, union);
    }

    #[test]
    fn bytes_round_trip() {
        let encoding = Encoding::new(&square(), EncodingOptions::default());
        let bytes = encoding.to_bytes();
        assert_eq!(encoding.len() * 4, bytes.len());
        assert_eq!(Ok(encoding.clone()), Encoding::from_bytes(&bytes));
        assert_eq!(3, encoding.dimension());
        assert_eq!(Ok(true), encoding.has_zero());
        assert!(Encoding::from_bytes(&bytes[1..]).is_err());
    }

    #[test]
    fn malformed_encodings() {
        struct Case {
            words: Vec<u32>,
        }
        let cases = [
            Case { words: vec![] },
            Case { words: vec![0] },
            Case {
                words: vec![3 | 0x20000],
            },
            Case { words: vec![3, 1] },
            Case {
                words: vec![3 | 0x40000 | (1 << 22), 11, 0],
            },
            Case {
                words: vec![3 | 0x60000 | (3 << 19) | (1 << 22), 11, 1],
            },
            // x ≥ 3 ∧ x ≤ 1
            Case {
                words: vec![2, (-5i32) as u32, 3],
            },
        ];

        for case in cases {
            assert!(decode(&case.words).is_err(), "{:?}", case.words);
        }
    }

    const ALL_OPTIONS: [EncodingOptions; 4] = [
        EncodingOptions {
            minimize_graph: true,
            try_16bit: true,
        },
        EncodingOptions {
            minimize_graph: true,
            try_16bit: false,
        },
        EncodingOptions {
            minimize_graph: false,
            try_16bit: true,
        },
        EncodingOptions {
            minimize_graph: false,
            try_16bit: false,
        },
    ];

    #[test]
    fn packed_comparisons_agree_with_decoded() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let dimension = rng.gen_range(1..=8);
            let lhs = random_zone(&mut rng, dimension, 4);
            let rhs = random_zone(&mut rng, dimension, 4);
            let mut joined = lhs.clone();
            joined.convex_union(&rhs);
            let mut later = lhs.clone();
            later.up();

            let pairs = [
                (&lhs, &rhs),
                (&lhs, &lhs),
                (&lhs, &joined),
                (&joined, &lhs),
                (&lhs, &later),
                (&later, &lhs),
            ];
            for options in ALL_OPTIONS {
                for (own, other) in pairs {
                    let words = encode(other, options);
                    assert_eq!(Ok(own == other), is_equal(own, &words), "{options:?}");
                    assert_eq!(Ok(own.relation(other)), relation(own, &words), "{options:?}");

                    let mut packed = own.clone();
                    assert_eq!(Ok(()), convex_union(&mut packed, &words));
                    let mut expected = own.clone();
                    expected.convex_union(other);
                    assert_eq!(expected, packed, "{options:?}");
                }
            }
        }
    }

    #[test]
    fn union_with_universe_encoding() {
        for options in ALL_OPTIONS {
            let words = encode(&DBM::universe(4), options);
            let mut dbm = closed(&[Constraint::lower(2, Relation::strict(-1))], 4);
            assert_eq!(Ok(Relationship::Subset), relation(&dbm, &words));
            assert_eq!(Ok(()), convex_union(&mut dbm, &words));
            assert!(dbm.is_init());
        }
    }

    #[test]
    fn packed_comparisons_check_dimensions() {
        let words = encode(&square(), EncodingOptions::default());
        let other = DBM::universe(4);
        assert_eq!(Ok(false), is_equal(&other, &words));
        assert_eq!(
            Err(ZoneError::DimensionMismatch {
                expected: 4,
                actual: 3
            }),
            relation(&other, &words)
        );
        let mut union = other.clone();
        assert!(convex_union(&mut union, &words).is_err());
        assert_eq!(other, union);

        assert_eq!(Ok(Relationship::Equal), relation(&DBM::zero(1), &[1]));
        assert!(relation(&DBM::zero(1), &[1, 0]).is_err());
    }

    #[test]
    fn has_zero_reads_row_zero_of_copies() {
        struct Case {
            dbm: DBM<Canonical>,
            expected: bool,
        }
        let cases = [
            Case {
                dbm: closed(&[Constraint::lower(2, Relation::weak(-3))], 3),
                expected: false,
            },
            Case {
                dbm: closed(&[Constraint::upper(2, Relation::strict(3))], 3),
                expected: true,
            },
            Case {
                dbm: closed(&[Constraint::new(1, 2, Relation::strict(0))], 3),
                expected: false,
            },
            Case {
                dbm: DBM::universe(2),
                expected: true,
            },
        ];

        for case in cases {
            for try_16bit in [true, false] {
                let options = EncodingOptions {
                    minimize_graph: false,
                    try_16bit,
                };
                let words = encode(&case.dbm, options);
                assert_eq!(Ok(case.expected), has_zero(&words), "{}", case.dbm);
            }
        }
    }

    #[test]
    fn has_zero_reads_lower_bounds() {
        let dbm = closed(&[Constraint::lower(1, Relation::weak(-3))], 4);
        let words = encode(&dbm, EncodingOptions::default());
        assert_eq!(Ok(false), has_zero(&words));
        assert_eq!(Ok(true), has_zero(&encode(&DBM::universe(5), EncodingOptions::default())));
    }
}
