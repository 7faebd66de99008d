//! Solvers for the Equihash collision search.

use std::collections::BTreeSet;
use std::fmt;

use blake2b_simd::State as Blake2bState;
use tracing::{debug, trace};

use crate::params::Params;
use crate::row::{
    distinct_indices, has_collision, untruncate_index, FullStepRow, StepRow, TruncatedStepRow,
};

/// Labelled points at which a solver polls its cancellation callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolverCancelCheck {
    ListGeneration,
    ListSorting,
    ListColliding,
    RoundEnd,
    FinalSorting,
    FinalColliding,
    PartialGeneration,
    PartialSorting,
    PartialSubtreeEnd,
    PartialIndexEnd,
    PartialEnd,
}

/// A solver run ended without producing a solution set.
#[derive(Debug, PartialEq, Eq)]
pub enum SolverError {
    /// The parameters failed validation.
    InvalidParams,
    /// The cancellation callback asked for the run to stop.
    Cancelled,
}

impl fmt::Display for SolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverError::InvalidParams => f.write_str("invalid parameters"),
            SolverError::Cancelled => f.write_str("solver cancelled"),
        }
    }
}

impl std::error::Error for SolverError {}

/// One collision reduction round: sorts `x` on the leading `clen` bytes,
/// merges every admissible pair within each run of colliding rows, and
/// compacts the merges back into `x` in place.
fn collision_round<R, C>(x: &mut Vec<R>, clen: usize, cancelled: &mut C) -> Result<(), SolverError>
where
    R: StepRow,
    C: FnMut(SolverCancelCheck) -> bool,
{
    trace!("- Sorting list");
    x.sort_unstable_by(|a, b| a.hash_bytes()[..clen].cmp(&b.hash_bytes()[..clen]));
    if cancelled(SolverCancelCheck::ListSorting) {
        return Err(SolverError::Cancelled);
    }

    trace!("- Finding collisions");
    let mut i = 0;
    let mut pos_free = 0;
    let mut xc = Vec::new();
    while i + 1 < x.len() {
        // Measure the run of rows sharing the leading collision bytes.
        let mut j = 1;
        while i + j < x.len() && has_collision(&x[i], &x[i + j], clen) {
            j += 1;
        }

        for l in 0..j - 1 {
            for m in l + 1..j {
                if let Some(merged) = R::merge(&x[i + l], &x[i + m], clen) {
                    xc.push(merged);
                }
            }
        }

        // Store merged rows in slots the scan has already consumed.
        while pos_free < i + j {
            match xc.pop() {
                Some(row) => {
                    x[pos_free] = row;
                    pos_free += 1;
                }
                None => break,
            }
        }

        i += j;
        if cancelled(SolverCancelCheck::ListColliding) {
            return Err(SolverError::Cancelled);
        }
    }

    // A trailing row without a collision partner may have left free slots.
    while pos_free < x.len() {
        match xc.pop() {
            Some(row) => {
                x[pos_free] = row;
                pos_free += 1;
            }
            None => break,
        }
    }

    if !xc.is_empty() {
        x.append(&mut xc);
    } else if pos_free < x.len() {
        x.truncate(pos_free);
        x.shrink_to_fit();
    }
    Ok(())
}

/// Finds collision solutions over `base_state`, keeping the full index
/// history of every row throughout the reduction.
///
/// Returns the deduplicated set of solutions, each in canonical subtree
/// order, or [`SolverError::Cancelled`] as soon as `cancelled` returns true.
pub fn basic_solve<C>(
    n: u32,
    k: u32,
    base_state: &Blake2bState,
    mut cancelled: C,
) -> Result<BTreeSet<Vec<u32>>, SolverError>
where
    C: FnMut(SolverCancelCheck) -> bool,
{
    use SolverCancelCheck::*;

    let p = Params::new(n, k).ok_or(SolverError::InvalidParams)?;
    debug!("N = {}, K = {}", p.n, p.k);

    debug!("Generating first list");
    let mut x = Vec::with_capacity(p.init_size() as usize);
    for i in 0..p.init_size() {
        x.push(FullStepRow::new(&p, base_state, i));
        if cancelled(ListGeneration) {
            return Err(SolverError::Cancelled);
        }
    }

    // Reduce until 2n/(k+1) hash bits remain.
    for r in 1..p.k {
        if x.is_empty() {
            break;
        }
        debug!("Round {}: size {}", r, x.len());
        collision_round(&mut x, p.collision_byte_length(), &mut cancelled)?;
        if cancelled(RoundEnd) {
            return Err(SolverError::Cancelled);
        }
    }

    // The final round collides on everything that remains, so any surviving
    // pair XOR-reduces to zero.
    debug!("Final round: size {}", x.len());
    let mut solns = BTreeSet::new();
    if x.len() > 1 {
        trace!("- Sorting list");
        x.sort_unstable_by(|a, b| a.hash.cmp(&b.hash));
        if cancelled(FinalSorting) {
            return Err(SolverError::Cancelled);
        }
        trace!("- Finding collisions");
        let hash_len = x[0].hash.len();
        let mut i = 0;
        while i + 1 < x.len() {
            let mut j = 1;
            while i + j < x.len() && has_collision(&x[i], &x[i + j], hash_len) {
                j += 1;
            }

            for l in 0..j - 1 {
                for m in l + 1..j {
                    if distinct_indices(&x[i + l], &x[i + m]) {
                        let res = FullStepRow::from_children_ref(&x[i + l], &x[i + m], 0);
                        solns.insert(res.indices);
                    }
                }
            }

            i += j;
            if cancelled(FinalColliding) {
                return Err(SolverError::Cancelled);
            }
        }
    }
    debug!("Found {} solutions", solns.len());
    Ok(solns)
}

/// Collision reduction specialised to subtree reconstruction: a merge is only
/// admitted when the two rows' leading indices truncate to the expected
/// left/right values in one of the two orderings, and the full index
/// histories are distinct.
fn collide_branches(x: &mut Vec<FullStepRow>, clen: usize, ilen: u32, lt: u8, rt: u8) {
    let mut i = 0;
    let mut pos_free = 0;
    let mut xc = Vec::new();
    while i + 1 < x.len() {
        let mut j = 1;
        while i + j < x.len() && has_collision(&x[i], &x[i + j], clen) {
            j += 1;
        }

        for l in 0..j - 1 {
            for m in l + 1..j {
                let a = &x[i + l];
                let b = &x[i + m];
                if distinct_indices(a, b) {
                    if a.is_valid_branch(ilen, lt) && b.is_valid_branch(ilen, rt) {
                        xc.push(FullStepRow::from_children_ref(a, b, clen));
                    } else if b.is_valid_branch(ilen, lt) && a.is_valid_branch(ilen, rt) {
                        xc.push(FullStepRow::from_children_ref(b, a, clen));
                    }
                }
            }
        }

        while pos_free < i + j {
            match xc.pop() {
                Some(row) => {
                    x[pos_free] = row;
                    pos_free += 1;
                }
                None => break,
            }
        }

        i += j;
    }

    while pos_free < x.len() {
        match xc.pop() {
            Some(row) => {
                x[pos_free] = row;
                pos_free += 1;
            }
            None => break,
        }
    }

    if !xc.is_empty() {
        x.append(&mut xc);
    } else if pos_free < x.len() {
        x.truncate(pos_free);
        x.shrink_to_fit();
    }
}

/// Finds collision solutions over `base_state` by first searching over 8-bit
/// index truncations, then recreating the full indices of each partial
/// solution subtree by subtree.
///
/// The truncated search may screen out solutions [`basic_solve`] would find,
/// but never produces one it would not.
pub fn optimised_solve<C>(
    n: u32,
    k: u32,
    base_state: &Blake2bState,
    mut cancelled: C,
) -> Result<BTreeSet<Vec<u32>>, SolverError>
where
    C: FnMut(SolverCancelCheck) -> bool,
{
    use SolverCancelCheck::*;

    let p = Params::new(n, k).ok_or(SolverError::InvalidParams)?;
    let ilen = p.collision_bit_length() as u32 + 1;
    let recreate_size = untruncate_index(1, 0, ilen);
    debug!("N = {}, K = {}", p.n, p.k);

    // Run the collision search over truncated indices first.
    let mut partial_solns: Vec<Vec<u8>> = Vec::new();
    {
        debug!("Generating first list");
        let mut xt = Vec::with_capacity(p.init_size() as usize);
        for i in 0..p.init_size() {
            xt.push(TruncatedStepRow::new(&p, base_state, i, ilen));
            if cancelled(ListGeneration) {
                return Err(SolverError::Cancelled);
            }
        }

        for r in 1..p.k {
            if xt.is_empty() {
                break;
            }
            debug!("Round {}: size {}", r, xt.len());
            collision_round(&mut xt, p.collision_byte_length(), &mut cancelled)?;
            if cancelled(RoundEnd) {
                return Err(SolverError::Cancelled);
            }
        }

        debug!("Final round: size {}", xt.len());
        if xt.len() > 1 {
            trace!("- Sorting list");
            xt.sort_unstable_by(|a, b| a.hash.cmp(&b.hash));
            if cancelled(FinalSorting) {
                return Err(SolverError::Cancelled);
            }
            trace!("- Finding collisions");
            let hash_len = xt[0].hash.len();
            let mut i = 0;
            while i + 1 < xt.len() {
                let mut j = 1;
                while i + j < xt.len() && has_collision(&xt[i], &xt[i + j], hash_len) {
                    j += 1;
                }

                for l in 0..j - 1 {
                    for m in l + 1..j {
                        let res = TruncatedStepRow::from_children_ref(&xt[i + l], &xt[i + m], 0);
                        partial_solns.push(res.indices);
                    }
                }

                i += j;
                if cancelled(FinalColliding) {
                    return Err(SolverError::Cancelled);
                }
            }
        }

        // The truncated list goes out of scope here, releasing its memory
        // before reconstruction begins.
    }
    debug!("Found {} partial solutions", partial_solns.len());

    // Now recreate the full indices of each partial solution, maintaining a
    // forest of reconstructed subtrees ordered by size: combining the
    // candidate list for leaf i with the occupied slots of `x` mirrors a
    // binary counter, so each subtree is collided exactly when its sibling
    // completes.
    debug!("Culling solutions");
    let mut solns = BTreeSet::new();
    let mut invalid_count = 0;
    'partials: for partial in &partial_solns {
        let mut x: Vec<Option<Vec<FullStepRow>>> = Vec::with_capacity(p.k as usize + 1);

        for i in 0..p.solution_size() {
            // Generate the candidate leaf list: every index consistent with
            // this truncation.
            let mut ic = Vec::with_capacity(recreate_size as usize);
            for j in 0..recreate_size {
                let new_index = untruncate_index(partial[i], j, ilen);
                ic.push(FullStepRow::new(&p, base_state, new_index));
                if cancelled(PartialGeneration) {
                    return Err(SolverError::Cancelled);
                }
            }

            let mut rti = i;
            for r in 0..=(p.k as usize) {
                if r < x.len() {
                    match x[r].take() {
                        Some(prev) => {
                            ic.extend(prev);
                            ic.sort_unstable_by(|a, b| a.hash.cmp(&b.hash));
                            if cancelled(PartialSorting) {
                                return Err(SolverError::Cancelled);
                            }
                            let lti = rti - (1usize << r);
                            collide_branches(
                                &mut ic,
                                p.collision_byte_length(),
                                ilen,
                                partial[lti],
                                partial[rti],
                            );

                            // An empty candidate list means this partial
                            // solution cannot be recreated.
                            if ic.is_empty() {
                                invalid_count += 1;
                                continue 'partials;
                            }

                            rti = lti;
                        }
                        None => {
                            x[r] = Some(ic);
                            break;
                        }
                    }
                } else {
                    x.push(Some(ic));
                    break;
                }
                if cancelled(PartialSubtreeEnd) {
                    return Err(SolverError::Cancelled);
                }
            }
            if cancelled(PartialIndexEnd) {
                return Err(SolverError::Cancelled);
            }
        }

        debug_assert_eq!(x.len(), p.k as usize + 1);
        if let Some(rows) = x.pop().flatten() {
            for row in rows {
                solns.insert(row.indices);
            }
        }
        if cancelled(PartialEnd) {
            return Err(SolverError::Cancelled);
        }
    }
    debug!("- Number of invalid solutions found: {}", invalid_count);
    debug!("Found {} solutions", solns.len());

    Ok(solns)
}
