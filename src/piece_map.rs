//! The bounded bit-set of piece availability (§3, §4.2).

use bitvec::prelude::{BitVec, Msb0};

use crate::PieceIndex;

/// Tracks which pieces of the shared file a peer (local or remote) has.
///
/// Backed by a most-significant-bit-first bit vector, matching the wire
/// bit-order rule: piece index `i` occupies bit `7 - (i mod 8)` of byte
/// `floor(i / 8)`.
///
/// Once a bit is set it is never cleared again -- there is no operation in
/// this type's API that clears a bit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PieceMap {
    bits: BitVec<Msb0, u8>,
}

impl PieceMap {
    /// Creates a new piece map of `piece_count` pieces, all unset.
    pub fn new(piece_count: usize) -> Self {
        Self {
            bits: std::iter::repeat(false).take(piece_count).collect(),
        }
    }

    /// Creates a new piece map of `piece_count` pieces, all set -- the
    /// representation of a seeder's initial piece map.
    pub fn new_full(piece_count: usize) -> Self {
        Self {
            bits: std::iter::repeat(true).take(piece_count).collect(),
        }
    }

    /// The number of pieces this map covers.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Sets the bit for `index`. Idempotent; setting an already-set bit is a
    /// no-op.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn set(&mut self, index: PieceIndex) {
        self.bits.set(index, true);
    }

    /// Returns whether the piece at `index` is present.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn has(&self, index: PieceIndex) -> bool {
        self.bits[index]
    }

    /// Returns true if every piece is present.
    pub fn is_complete(&self) -> bool {
        self.bits.all()
    }

    /// The number of pieces currently present.
    pub fn count(&self) -> usize {
        (0..self.bits.len()).filter(|&i| self.bits[i]).count()
    }

    /// Serializes the map to a byte string of length `ceil(len/8)`, MSB
    /// first within each byte. Trailing bits beyond `len` in the final byte
    /// are zero.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.bits.clone();
        // `BitVec`'s own byte conversion pads with the vector's declared
        // excess capacity, not necessarily zero; resizing up to a multiple of
        // 8 first guarantees the trailing padding bits we emit are zero.
        let padded_len = (bytes.len() + 7) / 8 * 8;
        bytes.resize(padded_len, false);
        bytes.into_vec()
    }

    /// Deserializes a map of `piece_count` pieces from `bytes`, which must be
    /// at least `ceil(piece_count/8)` bytes long. Trailing bits beyond
    /// `piece_count` in the input are ignored.
    pub fn from_bytes(bytes: &[u8], piece_count: usize) -> Self {
        let mut bits: BitVec<Msb0, u8> = BitVec::from_slice(bytes);
        bits.resize(piece_count, false);
        Self { bits }
    }

    /// Returns the indices present in `other` but missing from `self`.
    pub fn missing_from_self<'a>(
        &'a self,
        other: &'a PieceMap,
    ) -> impl Iterator<Item = PieceIndex> + 'a {
        debug_assert_eq!(self.len(), other.len());
        (0..self.len()).filter(move |&i| other.has(i) && !self.has(i))
    }

    /// Returns true if `other` has at least one piece that `self` lacks.
    pub fn is_interesting(&self, other: &PieceMap) -> bool {
        self.missing_from_self(other).next().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_set_and_has() {
        let mut map = PieceMap::new(4);
        assert!(!map.has(0));
        map.set(0);
        assert!(map.has(0));
        assert!(!map.has(1));
        // idempotent
        map.set(0);
        assert!(map.has(0));
    }

    #[test]
    fn test_is_complete() {
        let mut map = PieceMap::new(3);
        assert!(!map.is_complete());
        map.set(0);
        map.set(1);
        assert!(!map.is_complete());
        map.set(2);
        assert!(map.is_complete());
    }

    #[test]
    fn test_count() {
        let mut map = PieceMap::new(5);
        assert_eq!(map.count(), 0);
        map.set(1);
        map.set(4);
        assert_eq!(map.count(), 2);
    }

    #[test]
    fn test_new_full_is_complete() {
        assert!(PieceMap::new_full(5).is_complete());
        // zero pieces is vacuously complete
        assert!(PieceMap::new(0).is_complete());
    }

    // S3: NumPieces = 13, bits {0, 7, 8, 12} set, expect 0x81 0x88
    #[test]
    fn test_serialize_matches_spec_example() {
        let mut map = PieceMap::new(13);
        for i in [0, 7, 8, 12] {
            map.set(i);
        }
        assert_eq!(map.to_bytes(), vec![0x81, 0x88]);
    }

    #[test]
    fn test_deserialize_matches_spec_example() {
        let map = PieceMap::from_bytes(&[0x81, 0x88], 13);
        let present: Vec<_> = (0..13).filter(|&i| map.has(i)).collect();
        assert_eq!(present, vec![0, 7, 8, 12]);
    }

    // property 5: round-trip is the identity for a fixed piece count
    #[test]
    fn test_round_trip_identity() {
        for piece_count in [0, 1, 7, 8, 9, 13, 64, 100] {
            let mut map = PieceMap::new(piece_count);
            for i in (0..piece_count).step_by(3) {
                map.set(i);
            }
            let bytes = map.to_bytes();
            let decoded = PieceMap::from_bytes(&bytes, piece_count);
            assert_eq!(decoded, map);
            assert_eq!(decoded.to_bytes(), bytes);
        }
    }

    #[test]
    fn test_byte_length() {
        assert_eq!(PieceMap::new(1).to_bytes().len(), 1);
        assert_eq!(PieceMap::new(8).to_bytes().len(), 1);
        assert_eq!(PieceMap::new(9).to_bytes().len(), 2);
        assert_eq!(PieceMap::new(16).to_bytes().len(), 2);
    }

    #[test]
    fn test_missing_from_self_and_interesting() {
        let mut mine = PieceMap::new(5);
        mine.set(0);
        mine.set(1);

        let mut theirs = PieceMap::new(5);
        theirs.set(0);
        theirs.set(2);
        theirs.set(3);

        let missing: Vec<_> = mine.missing_from_self(&theirs).collect();
        assert_eq!(missing, vec![2, 3]);
        assert!(mine.is_interesting(&theirs));

        // a map that is a subset of ours is not interesting
        let mut subset = PieceMap::new(5);
        subset.set(0);
        assert!(!mine.is_interesting(&subset));
    }

    #[test]
    fn test_trailing_bits_ignored_on_decode() {
        // one stray bit set beyond piece_count=4 in a single byte must be
        // ignored
        let map = PieceMap::from_bytes(&[0b1111_1111], 4);
        assert!(map.is_complete());
        assert_eq!(map.len(), 4);
    }
}
