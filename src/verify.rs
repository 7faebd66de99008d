//! Verification functions for the [Equihash] proof-of-work algorithm.
//!
//! [Equihash]: https://zips.z.cash/protocol/protocol.pdf#equihash

use std::fmt;

use blake2b_simd::State as Blake2bState;
use tracing::debug;

use crate::params::Params;
use crate::row::{distinct_indices, has_collision, FullStepRow};

/// An Equihash solution failed to verify.
#[derive(Debug)]
pub struct Error(pub(crate) Kind);

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid solution: {}", self.0)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, PartialEq)]
pub(crate) enum Kind {
    InvalidParams,
    Collision,
    OutOfOrder,
    DuplicateIdxs,
    NonZeroRootHash,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::InvalidParams => f.write_str("invalid parameters"),
            Kind::Collision => f.write_str("invalid collision length between StepRows"),
            Kind::OutOfOrder => f.write_str("Index tree incorrectly ordered"),
            Kind::DuplicateIdxs => f.write_str("duplicate indices"),
            Kind::NonZeroRootHash => f.write_str("root hash of tree is non-zero"),
        }
    }
}

pub(crate) fn reject(kind: Kind) -> Error {
    debug!("Invalid solution: {}", kind);
    Error(kind)
}

fn checked_params(n: u32, k: u32, soln: &[u32]) -> Result<Params, Error> {
    let p = Params::new(n, k).ok_or_else(|| reject(Kind::InvalidParams))?;
    if soln.len() != p.solution_size() {
        debug!("Invalid solution size: {}", soln.len());
        return Err(reject(Kind::InvalidParams));
    }
    Ok(p)
}

fn validate_subtrees(p: &Params, a: &FullStepRow, b: &FullStepRow) -> Result<(), Kind> {
    if !has_collision(a, b, p.collision_byte_length()) {
        Err(Kind::Collision)
    } else if b.indices_before(a) {
        Err(Kind::OutOfOrder)
    } else if !distinct_indices(a, b) {
        Err(Kind::DuplicateIdxs)
    } else {
        Ok(())
    }
}

/// Validates `soln` by folding adjacent row pairs level by level.
pub fn is_valid_solution_iterative(
    n: u32,
    k: u32,
    base_state: &Blake2bState,
    soln: &[u32],
) -> Result<(), Error> {
    let p = checked_params(n, k, soln)?;

    let mut rows = Vec::with_capacity(soln.len());
    for i in soln {
        rows.push(FullStepRow::new(&p, base_state, *i));
    }

    let mut hash_len = p.hash_length();
    while rows.len() > 1 {
        let mut cur_rows = Vec::new();
        for pair in rows.chunks(2) {
            let a = &pair[0];
            let b = &pair[1];
            validate_subtrees(&p, a, b).map_err(reject)?;
            cur_rows.push(FullStepRow::from_children_ref(a, b, p.collision_byte_length()));
        }
        rows = cur_rows;
        hash_len -= p.collision_byte_length();
    }

    assert!(rows.len() == 1);

    if rows[0].is_zero(hash_len) {
        Ok(())
    } else {
        Err(reject(Kind::NonZeroRootHash))
    }
}

fn tree_validator(p: &Params, state: &Blake2bState, indices: &[u32]) -> Result<FullStepRow, Error> {
    if indices.len() > 1 {
        let end = indices.len();
        let mid = end / 2;
        let a = tree_validator(p, state, &indices[0..mid])?;
        let b = tree_validator(p, state, &indices[mid..end])?;
        validate_subtrees(p, &a, &b).map_err(reject)?;
        Ok(FullStepRow::from_children(a, b, p.collision_byte_length()))
    } else {
        Ok(FullStepRow::new(p, state, indices[0]))
    }
}

/// Validates `soln` by recursing down the index tree.
pub fn is_valid_solution_recursive(
    n: u32,
    k: u32,
    base_state: &Blake2bState,
    soln: &[u32],
) -> Result<(), Error> {
    let p = checked_params(n, k, soln)?;

    let root = tree_validator(&p, base_state, soln)?;

    // Hashes were trimmed at each level, so only the remaining length needs
    // checking.
    if root.is_zero(p.collision_byte_length()) {
        Ok(())
    } else {
        Err(reject(Kind::NonZeroRootHash))
    }
}

/// Checks whether `soln` is a valid solution over `base_state` with the
/// parameters `(n, k)`.
pub fn is_valid_solution(
    n: u32,
    k: u32,
    base_state: &Blake2bState,
    soln: &[u32],
) -> Result<(), Error> {
    // Recursive validation is faster
    is_valid_solution_recursive(n, k, base_state, soln)
}
