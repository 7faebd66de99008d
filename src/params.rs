#[derive(Clone, Copy)]
pub(crate) struct Params {
    pub(crate) n: u32,
    pub(crate) k: u32,
}

impl Params {
    /// Returns `None` if the parameters are invalid.
    pub(crate) fn new(n: u32, k: u32) -> Option<Self> {
        // We place the following requirements on the parameters:
        // - n is a multiple of 8, so the hash output has an exact byte length.
        // - k < n, so the collision bit length is at least 1.
        // - n is a multiple of k + 1, so we have an integer collision bit length.
        // - the collision bit length is at least 8, so every index has a non-empty
        //   8-bit truncation, and less than 31, so seed indices fit in a u32.
        // - the expanded hash fits in a single BLAKE2b digest.
        if (n % 8 == 0) && (k < n) && (n % (k + 1) == 0) {
            let p = Params { n, k };
            if (8..31).contains(&p.collision_bit_length()) && p.hash_length() <= 64 {
                return Some(p);
            }
        }
        None
    }

    pub(crate) fn collision_bit_length(&self) -> usize {
        (self.n / (self.k + 1)) as usize
    }

    pub(crate) fn collision_byte_length(&self) -> usize {
        (self.collision_bit_length() + 7) / 8
    }

    /// Length in bytes of a freshly expanded row hash.
    pub(crate) fn hash_length(&self) -> usize {
        ((self.k as usize) + 1) * self.collision_byte_length()
    }

    /// Digest length the base hash state is personalised for.
    ///
    /// BLAKE2b's digest length is a parameter of the keyed function, so it is
    /// fixed when the base state is built. Row expansion reads a full
    /// [`hash_length`] digest; this coincides with `n / 8` whenever the
    /// collision bit length is a whole number of bytes.
    ///
    /// [`hash_length`]: Self::hash_length
    pub(crate) fn hash_output(&self) -> u8 {
        self.hash_length() as u8
    }

    /// Number of rows in a freshly generated list.
    pub(crate) fn init_size(&self) -> u32 {
        1u32 << (self.collision_bit_length() + 1)
    }

    /// Number of indices in a complete solution.
    pub(crate) fn solution_size(&self) -> usize {
        1usize << self.k
    }
}
