//! Two-share secret splitting.
//!
//! A plaintext is turned into two base64 shares `a` and `b` such that
//! `decode(a) XOR decode(b)` yields the plaintext bytes. Share `a` is a fresh
//! one-time pad drawn from a [`RandomSource`] on every call, so either share on
//! its own carries no information about the plaintext.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use zeroize::Zeroizing;

use crate::random::RandomSource;

/// The two complementary shares of a split secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharePair {
    a: String,
    b: String,
}

impl SharePair {
    /// The random pad share, written to the slot store
    pub fn a(&self) -> &str {
        &self.a
    }

    /// The masked share, written to the key/value store
    pub fn b(&self) -> &str {
        &self.b
    }

    /// Consumes the pair, returning `(a, b)`
    pub fn into_parts(self) -> (String, String) {
        (self.a, self.b)
    }
}

/// Splits `plaintext` into two shares using a fresh pad from `random`.
pub fn split(plaintext: &str, random: &dyn RandomSource) -> SharePair {
    let bytes = plaintext.as_bytes();
    // The pad is sized here, so a random source can never shorten it
    let mut pad = Zeroizing::new(vec![0u8; bytes.len()]);
    random.fill(&mut pad);

    let masked: Zeroizing<Vec<u8>> =
        Zeroizing::new(pad.iter().zip(bytes).map(|(p, x)| p ^ x).collect());

    SharePair {
        a: STANDARD.encode(pad.as_slice()),
        b: STANDARD.encode(masked.as_slice()),
    }
}

/// Recombines two shares produced by [`split`].
///
/// Returns `None` when either share is not valid base64, when the decoded
/// shares differ in length, or when the result is not valid UTF-8.
pub fn join(a: &str, b: &str) -> Option<String> {
    let a = Zeroizing::new(STANDARD.decode(a).ok()?);
    let b = Zeroizing::new(STANDARD.decode(b).ok()?);
    if a.len() != b.len() {
        return None;
    }

    let plain: Zeroizing<Vec<u8>> =
        Zeroizing::new(a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect());
    std::str::from_utf8(&plain).ok().map(str::to_owned)
}
