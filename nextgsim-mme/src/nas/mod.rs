//! NAS (Non-Access Stratum) Protocol Handling
//!
//! This module implements the network-side NAS handling of the MME:
//! - `identity`: identity types and mobile identities
//! - `emm`: EPS Mobility Management procedures
//!
//! # Reference
//!
//! Based on 3GPP TS 24.301.

pub mod emm;
pub mod identity;
