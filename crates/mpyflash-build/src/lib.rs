//! mpyflash-build - MicroPython source cache and firmware assembly
//!
//! Two pieces live here:
//!
//! - [`SourceManager`] keeps a local checkout of the MicroPython tree at a
//!   requested version. Updates build a new checkout next to the live one
//!   and switch a pointer file only once it is complete, so an interrupted
//!   update never leaves the cache unusable.
//! - [`Assembler`] stages a caller's modules and boot entrypoints into a
//!   frozen manifest and runs the port's build.
//!
//! Fetching and building go through the [`SourceFetcher`] and
//! [`BuildToolchain`] traits. [`GitFetcher`] and [`MakeToolchain`] are the
//! adapters for the real tools.
//!
//! Cache layout:
//!
//! ```text
//! <root>/state.toml           version, tag flag and dirty flag
//! <root>/current              name of the live checkout
//! <root>/checkouts/<name>/    source trees
//! <root>/staging/<profile>/   staged modules and manifest
//! <root>/build/<profile>/     port build directory
//! <root>/artifacts/           finished binaries
//! ```

pub mod assembler;
pub mod error;
pub mod git;
pub mod make;
pub mod manifest;
pub mod source;
pub mod state;

pub use assembler::{Assembler, BuildToolchain, ToolchainRequest};
pub use error::{BuildFailure, SourceManagerFailure};
pub use git::GitFetcher;
pub use make::MakeToolchain;
pub use source::{FetchedRef, SourceFetcher, SourceManager, DEFAULT_BRANCH};
pub use state::SourceCacheState;
