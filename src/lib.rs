//! An implementation of the [Equihash] Proof-of-Work function.
//!
//! Equihash is a memory-hard proof of work built on the Generalized Birthday
//! Problem: a solution is a set of `2^k` distinct indices whose expanded
//! BLAKE2b hashes XOR to zero across all `n` bits, subject to the canonical
//! ordering of the underlying tree of XOR reductions. This crate provides the
//! collision-search solvers (the memory-heavy [`basic_solve`] and the
//! memory-optimised [`optimised_solve`]) together with solution verification.
//!
//! [Equihash]: https://zips.z.cash/protocol/protocol.pdf#equihash

mod params;
mod row;
mod solve;
mod verify;

pub use solve::{basic_solve, optimised_solve, SolverCancelCheck, SolverError};
pub use verify::{
    is_valid_solution, is_valid_solution_iterative, is_valid_solution_recursive, Error,
};

use blake2b_simd::State as Blake2bState;

use params::Params;
use verify::{reject, Kind};

/// Prepares the BLAKE2b base state for the parameters `(n, k)`.
///
/// The state is personalised with `"ZcashPoW" || le32(n) || le32(k)` and
/// configured for digests the length of an expanded row hash, which equals
/// `n / 8` whenever the collision bit length is a whole number of bytes.
/// Callers feed the block header material and nonce into the returned state
/// before handing it to a solver or the verifier.
pub fn initialise_state(n: u32, k: u32) -> Result<Blake2bState, Error> {
    let p = Params::new(n, k).ok_or_else(|| reject(Kind::InvalidParams))?;
    Ok(row::initialise_state(n, k, p.hash_output()))
}
