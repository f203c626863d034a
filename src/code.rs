//! Activation code generation and format validation.
//!
//! A code is an 11-symbol identifier followed by a 4-symbol checksum, all
//! drawn from a 32-symbol alphabet without `0`, `1`, `O` or `I`. The first six
//! identifier symbols encode the millisecond clock, the last five are random.
//! It is rendered as `AAAAA-BBBBB-CXXXX`; the hyphens are cosmetic.
//!
//! The checksum catches typos. It is not a signature.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub const ID_LEN: usize = 11;
pub const CHECKSUM_LEN: usize = 4;
pub const CODE_LEN: usize = ID_LEN + CHECKSUM_LEN;

const TIME_SYMBOLS: u32 = 6;
const RANDOM_SYMBOLS: u32 = 5;
const BITS_PER_SYMBOL: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeFormatError {
    Length(usize),
    Symbol(char),
    Checksum,
}

impl fmt::Display for CodeFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeFormatError::Length(n) => write!(f, "expected {} symbols, got {}", CODE_LEN, n),
            CodeFormatError::Symbol(c) => write!(f, "symbol {:?} is not in the code alphabet", c),
            CodeFormatError::Checksum => write!(f, "checksum mismatch"),
        }
    }
}

impl std::error::Error for CodeFormatError {}

/// A well-formed activation code, stored without hyphens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActivationCode(String);

impl ActivationCode {
    /// Parse user input. Hyphens and whitespace are ignored and lowercase
    /// letters are accepted.
    pub fn parse(input: &str) -> Result<Self, CodeFormatError> {
        let compact: String = input
            .chars()
            .filter(|c| *c != '-' && !c.is_whitespace())
            .map(|c| c.to_ascii_uppercase())
            .collect();

        let len = compact.chars().count();
        if len != CODE_LEN {
            return Err(CodeFormatError::Length(len));
        }
        if let Some(bad) = compact.chars().find(|c| !is_alphabet_symbol(*c)) {
            return Err(CodeFormatError::Symbol(bad));
        }

        let (id, checksum) = compact.split_at(ID_LEN);
        if compute_checksum(id) != checksum {
            return Err(CodeFormatError::Checksum);
        }

        Ok(Self(compact))
    }

    /// The 11-symbol identifier part.
    pub fn short_id(&self) -> &str {
        &self.0[..ID_LEN]
    }

    pub fn checksum(&self) -> &str {
        &self.0[ID_LEN..]
    }

    /// The code without hyphens.
    pub fn compact(&self) -> &str {
        &self.0
    }

    /// Grouped `AAAAA-BBBBB-CXXXX` rendering.
    pub fn display(&self) -> String {
        format!("{}-{}-{}", &self.0[..5], &self.0[5..10], &self.0[10..])
    }
}

impl fmt::Display for ActivationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

impl FromStr for ActivationCode {
    type Err = CodeFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ActivationCode {
    type Error = CodeFormatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ActivationCode> for String {
    fn from(code: ActivationCode) -> Self {
        code.display()
    }
}

fn is_alphabet_symbol(c: char) -> bool {
    c.is_ascii() && ALPHABET.contains(&(c as u8))
}

fn encode_symbols(mut value: u64, count: u32, out: &mut String) {
    let mut symbols = Vec::with_capacity(count as usize);
    for _ in 0..count {
        symbols.push(ALPHABET[(value % 32) as usize] as char);
        value /= 32;
    }
    out.extend(symbols.into_iter().rev());
}

/// Checksum of an 11-symbol identifier: the first four bytes of its SHA-256,
/// each reduced modulo 32 into the alphabet.
pub fn compute_checksum(short_id: &str) -> String {
    let digest = Sha256::digest(short_id.as_bytes());
    digest[..CHECKSUM_LEN]
        .iter()
        .map(|b| ALPHABET[(*b as usize) % ALPHABET.len()] as char)
        .collect()
}

/// Build the identifier from explicit clock and random components.
fn short_id_from(millis: u64, random: u64) -> String {
    let time_part = millis % (1 << (TIME_SYMBOLS * BITS_PER_SYMBOL));
    let random_part = random % (1 << (RANDOM_SYMBOLS * BITS_PER_SYMBOL));

    let mut id = String::with_capacity(ID_LEN);
    encode_symbols(time_part, TIME_SYMBOLS, &mut id);
    encode_symbols(random_part, RANDOM_SYMBOLS, &mut id);
    id
}

/// Generate a fresh activation code. Cannot fail.
pub fn generate_code() -> ActivationCode {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let random: u64 = rand::thread_rng().r#gen();
    let id = short_id_from(millis, random);
    let checksum = compute_checksum(&id);
    ActivationCode(format!("{}{}", id, checksum))
}

/// Source of activation codes used during issuance.
pub trait CodeSource: Send + Sync {
    fn next_code(&self) -> ActivationCode;
}

/// Clock-and-random codes from [`generate_code`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCodes;

impl CodeSource for SystemCodes {
    fn next_code(&self) -> ActivationCode {
        generate_code()
    }
}
