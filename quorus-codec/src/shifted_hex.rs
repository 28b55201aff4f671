//! "Shifted hex" string encoding.
//!
//! Each nibble `n` maps to the letter `'a' + n`, high nibble first.
//! External identities render the same alphabet uppercased.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("character {0:?} is outside the shifted-hex alphabet")]
    InvalidCharacter(char),

    #[error("shifted-hex string length {0} is odd")]
    OddLength(usize),
}

/// Encode bytes as lowercase shifted hex.
pub fn encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);

    for byte in bytes {
        out.push((b'a' + (byte >> 4)) as char);
        out.push((b'a' + (byte & 0x0f)) as char);
    }

    out
}

/// Encode bytes as uppercase shifted hex, the rendering used for
/// external identity strings.
pub fn encode_upper(bytes: &[u8]) -> String {
    encode(bytes).to_ascii_uppercase()
}

/// Decode a shifted-hex string (either case) back into bytes.
pub fn decode(text: &str) -> Result<Vec<u8>, Error> {
    if text.len() % 2 != 0 {
        return Err(Error::OddLength(text.len()));
    }

    let mut nibbles = Vec::with_capacity(text.len());

    for c in text.chars() {
        let nibble = match c {
            'a'..='p' => c as u8 - b'a',
            'A'..='P' => c as u8 - b'A',
            _ => return Err(Error::InvalidCharacter(c)),
        };
        nibbles.push(nibble);
    }

    Ok(nibbles
        .chunks(2)
        .map(|pair| (pair[0] << 4) | pair[1])
        .collect())
}
