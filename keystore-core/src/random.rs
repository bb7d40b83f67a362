use rand::RngCore;

/// Source of cryptographically strong random bytes.
pub trait RandomSource: Send + Sync {
    /// Overwrites every byte of `dest` with fresh random bytes.
    fn fill(&self, dest: &mut [u8]);
}

/// Random source backed by the thread-local CSPRNG, seeded from the OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&self, dest: &mut [u8]) {
        rand::rng().fill_bytes(dest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_empty() {
        let mut bytes = [0u8; 0];
        OsRandom.fill(&mut bytes);
    }

    #[test]
    fn test_fill_is_fresh() {
        let mut first = [0u8; 32];
        let mut second = [0u8; 32];
        OsRandom.fill(&mut first);
        OsRandom.fill(&mut second);
        // 2^-256 chance of a false failure
        assert_ne!(first, second);
    }
}
