//! Egress identity management.
//!
//! The pool is the only state shared and mutated across concurrently
//! running sessions. Sessions get clones; health and usage fields on the
//! pool's copies are written by the pool alone.

pub mod pool;
pub mod probe;

pub use pool::{EgressPool, PoolStats};
pub use probe::{HttpHealthProbe, PROBE_ENDPOINTS};
