//! Mobile identities exchanged by the identification procedure
//!
//! # Reference
//!
//! 3GPP TS 24.008 Section 10.5.5.9 (Identity type 2) and
//! Section 10.5.1.4 (Mobile identity).

use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use nextgsim_common::{Imei, ImeiSv, Imsi};

/// Identity type 2 (3GPP TS 24.008 Section 10.5.5.9)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum IdentityType {
    /// No identity
    #[default]
    NoIdentity = 0b000,
    /// IMSI
    Imsi = 0b001,
    /// IMEI
    Imei = 0b010,
    /// IMEISV
    ImeiSv = 0b011,
    /// TMSI
    Tmsi = 0b100,
}

impl IdentityType {
    /// Returns true if the network may put this type in an Identity Request.
    ///
    /// The MME never asks for a TMSI: it allocated it in the first place.
    pub fn is_requestable(self) -> bool {
        !matches!(self, IdentityType::Tmsi)
    }
}

impl fmt::Display for IdentityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityType::NoIdentity => write!(f, "NO-IDENTITY"),
            IdentityType::Imsi => write!(f, "IMSI"),
            IdentityType::Imei => write!(f, "IMEI"),
            IdentityType::ImeiSv => write!(f, "IMEISV"),
            IdentityType::Tmsi => write!(f, "TMSI"),
        }
    }
}

/// Identity carried by an Identity Response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MobileIdentity {
    /// Subscriber identity
    Imsi(Imsi),
    /// Equipment identity
    Imei(Imei),
    /// Equipment identity and software version
    ImeiSv(ImeiSv),
    /// Temporary identity (never valid in an Identity Response to the MME)
    Tmsi(u32),
}

impl MobileIdentity {
    /// Returns the identity type of this identity.
    pub fn identity_type(&self) -> IdentityType {
        match self {
            MobileIdentity::Imsi(_) => IdentityType::Imsi,
            MobileIdentity::Imei(_) => IdentityType::Imei,
            MobileIdentity::ImeiSv(_) => IdentityType::ImeiSv,
            MobileIdentity::Tmsi(_) => IdentityType::Tmsi,
        }
    }
}

impl fmt::Display for MobileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MobileIdentity::Imsi(imsi) => write!(f, "imsi-{imsi}"),
            MobileIdentity::Imei(imei) => write!(f, "imei-{imei}"),
            MobileIdentity::ImeiSv(imeisv) => write!(f, "imeisv-{imeisv}"),
            MobileIdentity::Tmsi(tmsi) => write!(f, "tmsi-{tmsi:#010x}"),
        }
    }
}
