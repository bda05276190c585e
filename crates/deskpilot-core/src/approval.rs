//! Approval token minting and comparison.
//!
//! Tokens gate irreversible steps: 128 bits from the OS CSPRNG, URL-safe
//! base64 without padding. Comparison is constant-time so a token cannot be
//! recovered byte-by-byte through timing.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;

/// Number of random bytes per token (128 bits).
const TOKEN_BYTES: usize = 16;

/// Mint a fresh single-use approval token.
pub fn mint_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Constant-time token comparison. Differing lengths compare unequal
/// without leaking where the mismatch is.
pub fn tokens_match(candidate: &str, expected: &str) -> bool {
    candidate.as_bytes().ct_eq(expected.as_bytes()).into()
}
