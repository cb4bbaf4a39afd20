// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the translation core.
//!
//! Every fallible operation in this crate returns [`Error`]. The variants
//! correspond to error *kinds*, not to individual call sites: callers match
//! on the kind to decide whether to
//! treat a failure as fatal or as "try the next strategy" (see
//! `arch::x86_64::setup`).

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// No translation method is available to reach the requested space.
    #[error("no translation method available: {0}")]
    NoMethod(String),

    /// A page-table entry's present bit was clear, or a map range is absent.
    #[error("not present: {0}")]
    NotPresent(String),

    /// An attribute is unset, or a symbol/register could not be resolved.
    #[error("no data: {0}")]
    NoData(String),

    /// An attribute path does not exist.
    #[error("no such key: {0}")]
    NoKey(String),

    /// A type mismatch on attribute set, or a non-canonical address.
    #[error("invalid: {0}")]
    Invalid(String),

    /// An unrecognized version, paging form, or wire format.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// A structural error in parsed input (e.g. a malformed ELF note).
    #[error("corrupt input: {0}")]
    Corrupt(String),

    /// Allocation failure.
    #[error("out of memory")]
    OutOfMemory,

    /// Error propagated from a caller-supplied callback (reader/resolver).
    #[error("callback error: {0}")]
    System(String),

    /// Lock contention reported back to a caller that cannot block.
    #[error("busy")]
    Busy,
}

impl Error {
    /// True for the "expected" kinds that setup routines treat as
    /// "try the next strategy" rather than aborting (spec §7).
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Error::NoMethod(_)
                | Error::NoData(_)
                | Error::NotPresent(_)
                | Error::NotImplemented(_)
        )
    }

    pub fn no_method(msg: impl Into<String>) -> Self {
        Error::NoMethod(msg.into())
    }

    pub fn not_present(msg: impl Into<String>) -> Self {
        Error::NotPresent(msg.into())
    }

    pub fn no_data(msg: impl Into<String>) -> Self {
        Error::NoData(msg.into())
    }

    pub fn no_key(msg: impl Into<String>) -> Self {
        Error::NoKey(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::Invalid(msg.into())
    }

    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Error::NotImplemented(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Error::Corrupt(msg.into())
    }

    pub fn system(msg: impl Into<String>) -> Self {
        Error::System(msg.into())
    }
}
