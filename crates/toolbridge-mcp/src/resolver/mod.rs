//! Launcher resolution.
//!
//! Turns an allow-listed launcher name such as `npx` into an absolute
//! executable path, recording every candidate that was checked so a failed
//! resolution can be diagnosed.
//!
//! Environment and filesystem access are injected (`EnvProvider`,
//! [`FsProvider`]) so resolution is testable without touching the host.

mod fs;
mod resolve;
mod types;

pub use fs::{FakeFs, FsProvider, SystemFs};
pub use resolve::{DEFAULT_SEARCH_DIRS, effective_child_path, resolve_executable};
pub use types::{Attempt, AttemptOutcome, ResolveError, ResolveResult};
