//! # Relay Bus Test Suite
//!
//! Unified test crate containing:
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── benches/          # Criterion benchmarks (wire codec, pipeline, routing)
//! └── src/integration/  # Cross-crate flows through the public Server API
//!     ├── flows.rs      # Routing, aliasing, dispositions, swapped backends
//!     └── e2e_shout.rs  # The full shout round trip and teardown races
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p bus-tests
//!
//! # By category
//! cargo test -p bus-tests integration::flows
//!
//! # Benchmarks
//! cargo bench -p bus-tests
//! ```

pub mod integration;
