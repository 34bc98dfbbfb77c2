//! Dependency resolver and transaction planner.
//!
//! The planner is a pure function of (requests, pkgdb snapshot,
//! repository pool, flags): it never mutates the database, never
//! performs I/O beyond reading local archive headers, and never returns
//! partial success. Its output is an ordered [`Transaction`] the
//! unpacker applies entry by entry.

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

mod plan;
mod sort;
mod transaction;

pub use plan::{plan, PlannerFlags, Request, RequestOp};
pub use transaction::{Transaction, TransactionAction, TransactionEntry};
