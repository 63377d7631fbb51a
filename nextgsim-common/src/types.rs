//! Common identity types for nextgsim
//!
//! Subscriber and equipment identities handled by the EMM layer, and the
//! MME-local UE identifier that keys every EMM session.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while validating a digit-string identity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The value contains a character other than `0`..`9`.
    #[error("{kind} contains non-digit character {found:?}")]
    NonDigit {
        /// Identity kind being parsed
        kind: &'static str,
        /// Offending character
        found: char,
    },
    /// The value has a length outside the allowed range.
    #[error("{kind} must have {expected} digits, got {actual}")]
    InvalidLength {
        /// Identity kind being parsed
        kind: &'static str,
        /// Human readable expected length
        expected: &'static str,
        /// Number of digits found
        actual: usize,
    },
}

fn check_digits(
    kind: &'static str,
    value: &str,
    min: usize,
    max: usize,
    expected: &'static str,
) -> Result<(), IdentityError> {
    if let Some(found) = value.chars().find(|c| !c.is_ascii_digit()) {
        return Err(IdentityError::NonDigit { kind, found });
    }
    let actual = value.len();
    if actual < min || actual > max {
        return Err(IdentityError::InvalidLength {
            kind,
            expected,
            actual,
        });
    }
    Ok(())
}

/// MME UE S1AP identifier.
///
/// Unique key of an EMM session inside one MME instance.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MmeUeS1apId(pub u32);

impl MmeUeS1apId {
    /// Returns the raw identifier value.
    pub fn value(self) -> u32 {
        self.0
    }
}

impl From<u32> for MmeUeS1apId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Debug for MmeUeS1apId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MmeUeS1apId({:#x})", self.0)
    }
}

impl fmt::Display for MmeUeS1apId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// International Mobile Subscriber Identity.
///
/// MCC + MNC + MSIN, 6 to 15 decimal digits per 3GPP TS 23.003.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Imsi(String);

impl Imsi {
    /// Minimum number of digits accepted.
    pub const MIN_DIGITS: usize = 6;
    /// Maximum number of digits accepted.
    pub const MAX_DIGITS: usize = 15;

    /// Parses an IMSI from its decimal digit string.
    pub fn parse(s: &str) -> Result<Self, IdentityError> {
        check_digits("IMSI", s, Self::MIN_DIGITS, Self::MAX_DIGITS, "6 to 15")?;
        Ok(Self(s.to_owned()))
    }

    /// Returns the digits as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the IMSI as a 64-bit integer, the form used for hash lookups.
    pub fn to_u64(&self) -> u64 {
        self.0
            .bytes()
            .fold(0u64, |acc, b| acc * 10 + u64::from(b - b'0'))
    }
}

impl TryFrom<String> for Imsi {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Imsi> for String {
    fn from(value: Imsi) -> Self {
        value.0
    }
}

impl fmt::Debug for Imsi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Imsi({})", self.0)
    }
}

impl fmt::Display for Imsi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// International Mobile Equipment Identity (15 digits, including the check digit).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Imei(String);

impl Imei {
    /// Number of digits in an IMEI.
    pub const DIGITS: usize = 15;

    /// Parses an IMEI from its decimal digit string.
    pub fn parse(s: &str) -> Result<Self, IdentityError> {
        check_digits("IMEI", s, Self::DIGITS, Self::DIGITS, "15")?;
        Ok(Self(s.to_owned()))
    }

    /// Returns the digits as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Imei {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Imei> for String {
    fn from(value: Imei) -> Self {
        value.0
    }
}

impl fmt::Debug for Imei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Imei({})", self.0)
    }
}

impl fmt::Display for Imei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// IMEI and Software Version Number (16 digits).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImeiSv(String);

impl ImeiSv {
    /// Number of digits in an IMEISV.
    pub const DIGITS: usize = 16;

    /// Parses an IMEISV from its decimal digit string.
    pub fn parse(s: &str) -> Result<Self, IdentityError> {
        check_digits("IMEISV", s, Self::DIGITS, Self::DIGITS, "16")?;
        Ok(Self(s.to_owned()))
    }

    /// Returns the digits as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the two-digit software version number.
    pub fn svn(&self) -> &str {
        &self.0[14..]
    }
}

impl TryFrom<String> for ImeiSv {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ImeiSv> for String {
    fn from(value: ImeiSv) -> Self {
        value.0
    }
}

impl fmt::Debug for ImeiSv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImeiSv({})", self.0)
    }
}

impl fmt::Display for ImeiSv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
