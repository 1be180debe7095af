//! toolpool is a connection pooling crate for external tool-provider
//! servers.
//!
//! toolpool maintains one bounded pool of reusable connections per server,
//! pre-warms each pool to a minimum population, evicts connections that sit
//! idle too long, and restores evicted population in the background.
//!
//! It uses the following terminology:
//! * Resources are named, out-of-process servers that connections point at.
//! * Handles are the opaque links to one resource, produced by a factory;
//!   the pool manages their lifecycle but places no constraints on their
//!   protocol.
//! * Leases are connections currently checked out to a caller, returned
//!   with an explicit release that reports whether the connection is still
//!   usable.
//!
//! # Usage
//!
//! * The main interface for this crate is [manager::PoolManager].
//! * To construct a manager, you must supply a [factory::Factory], the
//!   interface specifying "how to create and tear down a connection to a
//!   resource". Per-pool behavior (bounds, timeouts, sweep period) comes
//!   from [policy::PoolConfig].
//!
//! Acquire failures are values, not panics: an unregistered resource, a
//! failed creation, and a timed-out wait each map to their own
//! [pool::Error] variant, and everything else (disposal failures, sweep
//! trouble in one pool) is handled and logged where it happens.

// Public API
pub mod connection;
pub mod factory;
pub mod lease;
pub mod manager;
pub mod policy;
pub mod pool;

// Default implementations of generic interfaces
pub mod factories;

#[cfg(test)]
mod test_utils;
