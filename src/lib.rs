//! FIFO capital gains for crypto assets under a March to February tax year.
//!
//! [`core`] holds transaction input and parsing, [`tax`] the lot ledgers, the
//! FIFO engine and per-year gain allocation.

extern crate self as fifotax;

pub mod core;
pub mod tax;
