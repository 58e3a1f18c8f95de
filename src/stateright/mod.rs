//! Stateright model checking for the compute engine
//!
//! Exhaustive state-space exploration of the termination barrier. The async
//! engine is tested directly elsewhere; this model covers every interleaving
//! of routing, parsing-done reports, sentinels and shard draining for small
//! ingestor and shard counts.
//!
//! ## Running Model Checks
//!
//! ```bash
//! # Larger configurations are marked #[ignore]
//! cargo test stateright_barrier -- --ignored --nocapture
//! ```

pub mod barrier;
