//! Hash expansion and the XOR row algebra shared by the solvers and the
//! verifier.

use blake2b_simd::{Hash as Blake2bHash, Params as Blake2bParams, State as Blake2bState};
use byteorder::{LittleEndian, WriteBytesExt};

use crate::params::Params;

/// Prepares a BLAKE2b state personalised for the parameters `(n, k)`.
pub(crate) fn initialise_state(n: u32, k: u32, digest_len: u8) -> Blake2bState {
    let mut personalization: Vec<u8> = Vec::from("ZcashPoW");
    personalization.write_u32::<LittleEndian>(n).unwrap();
    personalization.write_u32::<LittleEndian>(k).unwrap();

    Blake2bParams::new()
        .hash_length(digest_len as usize)
        .personal(&personalization)
        .to_state()
}

fn generate_hash(base_state: &Blake2bState, i: u32) -> Blake2bHash {
    let mut lei = [0u8; 4];
    (&mut lei[..]).write_u32::<LittleEndian>(i).unwrap();

    let mut state = base_state.clone();
    state.update(&lei);
    state.finalize()
}

/// Expands the hash for seed `i`, zeroing the padding bits in the high byte
/// of every collision block.
fn expand_hash(p: &Params, base_state: &Blake2bState, i: u32) -> Vec<u8> {
    let mut hash = generate_hash(base_state, i).as_bytes().to_vec();
    debug_assert_eq!(hash.len(), p.hash_length());

    let mask = 0xffu8 >> (8 * p.collision_byte_length() - p.collision_bit_length());
    for block in hash.chunks_mut(p.collision_byte_length()) {
        block[0] &= mask;
    }
    hash
}

/// Truncates an index with `ilen` significant bits to its leading 8 bits.
pub(crate) fn truncate_index(i: u32, ilen: u32) -> u8 {
    ((i >> (ilen - 8)) & 0xff) as u8
}

/// Rebuilds a full index from its truncation `t` and remainder `r`.
pub(crate) fn untruncate_index(t: u8, r: u32, ilen: u32) -> u32 {
    (u32::from(t) << (ilen - 8)) | r
}

/// Operations the collision reducer needs from either row variant.
pub(crate) trait StepRow: Sized {
    fn hash_bytes(&self) -> &[u8];

    /// XOR-merges two colliding rows, trimming `trim` leading hash bytes.
    /// Returns `None` when the pair fails the variant's admission check.
    fn merge(a: &Self, b: &Self, trim: usize) -> Option<Self>;
}

/// A row carrying the full 32-bit index history of every seed that
/// contributed to it.
#[derive(Clone)]
pub(crate) struct FullStepRow {
    pub(crate) hash: Vec<u8>,
    pub(crate) indices: Vec<u32>,
}

impl FullStepRow {
    pub(crate) fn new(p: &Params, base_state: &Blake2bState, i: u32) -> Self {
        FullStepRow {
            hash: expand_hash(p, base_state, i),
            indices: vec![i],
        }
    }

    pub(crate) fn from_children(a: FullStepRow, b: FullStepRow, trim: usize) -> Self {
        let hash: Vec<_> = a
            .hash
            .iter()
            .zip(b.hash.iter())
            .skip(trim)
            .map(|(a, b)| a ^ b)
            .collect();
        let indices = if a.indices_before(&b) {
            let mut indices = a.indices;
            indices.extend(b.indices.iter());
            indices
        } else {
            let mut indices = b.indices;
            indices.extend(a.indices.iter());
            indices
        };
        FullStepRow { hash, indices }
    }

    pub(crate) fn from_children_ref(a: &FullStepRow, b: &FullStepRow, trim: usize) -> Self {
        let hash: Vec<_> = a
            .hash
            .iter()
            .zip(b.hash.iter())
            .skip(trim)
            .map(|(a, b)| a ^ b)
            .collect();
        let mut indices = Vec::with_capacity(a.indices.len() + b.indices.len());
        if a.indices_before(b) {
            indices.extend(a.indices.iter());
            indices.extend(b.indices.iter());
        } else {
            indices.extend(b.indices.iter());
            indices.extend(a.indices.iter());
        }
        FullStepRow { hash, indices }
    }

    /// Canonical subtree ordering: the history whose leftmost index is
    /// strictly smaller goes first. Equal leftmost indices order the other
    /// row first.
    pub(crate) fn indices_before(&self, other: &FullStepRow) -> bool {
        self.indices[0] < other.indices[0]
    }

    pub(crate) fn is_zero(&self, len: usize) -> bool {
        self.hash.iter().take(len).all(|v| *v == 0)
    }

    /// Whether this row's subtree starts at the expected truncated index.
    pub(crate) fn is_valid_branch(&self, ilen: u32, t: u8) -> bool {
        truncate_index(self.indices[0], ilen) == t
    }
}

impl StepRow for FullStepRow {
    fn hash_bytes(&self) -> &[u8] {
        &self.hash
    }

    fn merge(a: &Self, b: &Self, trim: usize) -> Option<Self> {
        if distinct_indices(a, b) {
            Some(FullStepRow::from_children_ref(a, b, trim))
        } else {
            None
        }
    }
}

/// A row whose index history is truncated to 8 bits per contributing seed.
#[derive(Clone)]
pub(crate) struct TruncatedStepRow {
    pub(crate) hash: Vec<u8>,
    pub(crate) indices: Vec<u8>,
}

impl TruncatedStepRow {
    pub(crate) fn new(p: &Params, base_state: &Blake2bState, i: u32, ilen: u32) -> Self {
        TruncatedStepRow {
            hash: expand_hash(p, base_state, i),
            indices: vec![truncate_index(i, ilen)],
        }
    }

    pub(crate) fn from_children_ref(
        a: &TruncatedStepRow,
        b: &TruncatedStepRow,
        trim: usize,
    ) -> Self {
        let hash: Vec<_> = a
            .hash
            .iter()
            .zip(b.hash.iter())
            .skip(trim)
            .map(|(a, b)| a ^ b)
            .collect();
        let mut indices = Vec::with_capacity(a.indices.len() + b.indices.len());
        if a.indices_before(b) {
            indices.extend(a.indices.iter());
            indices.extend(b.indices.iter());
        } else {
            indices.extend(b.indices.iter());
            indices.extend(a.indices.iter());
        }
        TruncatedStepRow { hash, indices }
    }

    pub(crate) fn indices_before(&self, other: &TruncatedStepRow) -> bool {
        self.indices[0] < other.indices[0]
    }

    pub(crate) fn is_zero(&self, len: usize) -> bool {
        self.hash.iter().take(len).all(|v| *v == 0)
    }
}

impl StepRow for TruncatedStepRow {
    fn hash_bytes(&self) -> &[u8] {
        &self.hash
    }

    fn merge(a: &Self, b: &Self, trim: usize) -> Option<Self> {
        // Truncated histories cannot be checked for distinctness. A merge
        // whose remaining hash is zero and whose history pairs off exactly is
        // probably a duplicate contribution, and could not be recreated as a
        // full solution.
        let merged = TruncatedStepRow::from_children_ref(a, b, trim);
        if merged.is_zero(merged.hash.len()) && is_probably_duplicate(&merged.indices) {
            None
        } else {
            Some(merged)
        }
    }
}

pub(crate) fn has_collision<R: StepRow>(a: &R, b: &R, len: usize) -> bool {
    a.hash_bytes()
        .iter()
        .zip(b.hash_bytes().iter())
        .take(len)
        .all(|(a, b)| a == b)
}

pub(crate) fn distinct_indices(a: &FullStepRow, b: &FullStepRow) -> bool {
    for i in &(a.indices) {
        for j in &(b.indices) {
            if i == j {
                return false;
            }
        }
    }
    true
}

/// Whether every truncated index in the history can be paired with an equal
/// value elsewhere in the history.
pub(crate) fn is_probably_duplicate(indices: &[u8]) -> bool {
    let mut checked = vec![false; indices.len()];
    for z in 0..indices.len() {
        if checked[z] {
            continue;
        }
        for y in z + 1..indices.len() {
            if !checked[y] && indices[z] == indices[y] {
                checked[y] = true;
                checked[z] = true;
                break;
            }
        }
    }
    checked.iter().all(|c| *c)
}

#[cfg(test)]
mod tests {
    use proptest::collection::vec;
    use proptest::prelude::*;

    use super::{
        has_collision, initialise_state, is_probably_duplicate, truncate_index, untruncate_index,
        FullStepRow, StepRow, TruncatedStepRow,
    };
    use crate::params::Params;

    #[test]
    fn expansion_masks_padding_bits() {
        // (200, 9) has a 20-bit collision length, leaving four padding bits
        // in the high byte of every block.
        let p = Params::new(200, 9).unwrap();
        let state = initialise_state(200, 9, p.hash_output());
        for i in 0..32 {
            let row = FullStepRow::new(&p, &state, i);
            assert_eq!(row.hash.len(), p.hash_length());
            for block in row.hash.chunks(p.collision_byte_length()) {
                assert_eq!(block[0] & 0xf0, 0);
            }
        }
    }

    #[test]
    fn personalisation_binds_parameters() {
        let digest = |n, k| {
            let p = Params::new(n, k).unwrap();
            let mut state = initialise_state(n, k, p.hash_output());
            state.update(b"input");
            state.finalize().as_bytes().to_vec()
        };
        // (96, 5) and (96, 3) expand to the same digest length but must
        // produce unrelated streams.
        assert_ne!(digest(96, 5), digest(96, 3));
    }

    #[test]
    fn index_truncation_formulas() {
        assert_eq!(truncate_index(0x155, 9), 0xaa);
        assert_eq!(untruncate_index(0xaa, 1, 9), 0x155);
        assert_eq!(truncate_index(0x1ffff, 17), 0xff);
        assert_eq!(untruncate_index(0xff, 0x1ff, 17), 0x1ffff);
        assert_eq!(truncate_index(0xabcd, 17), 0x55);
        assert_eq!(untruncate_index(0x55, 0x1cd, 17), 0xabcd);
    }

    #[test]
    fn merge_orders_subtrees_canonically() {
        let a = FullStepRow {
            hash: vec![0x01, 0x02, 0x30],
            indices: vec![7],
        };
        let b = FullStepRow {
            hash: vec![0x01, 0x0f, 0x01],
            indices: vec![2],
        };
        let c = FullStepRow::from_children_ref(&a, &b, 1);
        assert_eq!(c.hash, vec![0x0d, 0x31]);
        assert_eq!(c.indices, vec![2, 7]);
        let d = FullStepRow::from_children(a, b, 1);
        assert_eq!(d.indices, vec![2, 7]);
    }

    #[test]
    fn merge_preserves_interleaved_histories() {
        // Histories are concatenated, never re-sorted: the interleave pattern
        // is part of the solution.
        let a = FullStepRow {
            hash: vec![1, 2],
            indices: vec![1, 4],
        };
        let b = FullStepRow {
            hash: vec![1, 3],
            indices: vec![4, 9],
        };
        assert!(FullStepRow::merge(&a, &b, 1).is_none());
        let c = FullStepRow {
            hash: vec![1, 3],
            indices: vec![2, 9],
        };
        let m = FullStepRow::merge(&a, &c, 1).unwrap();
        assert_eq!(m.indices, vec![1, 4, 2, 9]);
    }

    #[test]
    fn truncated_merge_screens_probable_duplicates() {
        let a = TruncatedStepRow {
            hash: vec![4, 0xaa],
            indices: vec![9],
        };
        let b = TruncatedStepRow {
            hash: vec![4, 0xaa],
            indices: vec![9],
        };
        // Zero remainder with a perfectly paired history is screened out.
        assert!(TruncatedStepRow::merge(&a, &b, 1).is_none());

        // A non-zero remainder survives even when the history pairs off.
        let c = TruncatedStepRow {
            hash: vec![4, 0x55],
            indices: vec![7],
        };
        let m = TruncatedStepRow::merge(&a, &c, 1).unwrap();
        assert_eq!(m.hash, vec![0xff]);
        assert_eq!(m.indices, vec![7, 9]);
    }

    #[test]
    fn has_collision_checks_leading_bytes() {
        let a = FullStepRow {
            hash: vec![1, 2, 3],
            indices: vec![0],
        };
        let b = FullStepRow {
            hash: vec![1, 2, 4],
            indices: vec![1],
        };
        assert!(has_collision(&a, &b, 2));
        assert!(!has_collision(&a, &b, 3));
    }

    #[test]
    fn probable_duplicate_examples() {
        assert!(is_probably_duplicate(&[3, 3]));
        assert!(is_probably_duplicate(&[1, 2, 2, 1]));
        assert!(is_probably_duplicate(&[1, 1, 1, 1]));
        assert!(!is_probably_duplicate(&[1, 2]));
        assert!(!is_probably_duplicate(&[1, 1, 1]));
    }

    proptest! {
        #[test]
        fn probable_duplicate_pairs_off_even_counts(indices in vec(any::<u8>(), 0..64_usize)) {
            let mut counts = [0u32; 256];
            for i in &indices {
                counts[usize::from(*i)] += 1;
            }
            prop_assert_eq!(
                is_probably_duplicate(&indices),
                counts.iter().all(|c| c % 2 == 0)
            );
        }
    }
}
