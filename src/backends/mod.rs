//! Concrete `Lease`/`LeaseFactory` implementations, one module per backend
//! family. Each backend requires a different correctness argument:
//! compare-and-set, a uniqueness constraint, or a time-bound token.

pub mod mongo;
pub mod redis;
pub mod sql;
pub mod zookeeper;
