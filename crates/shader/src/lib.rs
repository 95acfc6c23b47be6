//! Shader Loader: include flattening and hot reload for gbuffers programs.
//!
//! # Invariants
//! - Include targets resolve against the including file's directory, never
//!   the working directory. Rooted targets are treated as relative.
//! - A file may appear many times in one flatten (diamond includes), but
//!   never while it is still being expanded.
//! - A failed flatten yields no partial source. Reloads keep the last good
//!   program.

mod include;
mod reload;
pub mod watcher;

pub use include::{FlattenedShader, IncludedFile, ShaderError, flatten, read_shader};
pub use reload::{ProgramReloader, ProgramSource, ReloadOutcome};
pub use watcher::{ReloadEvent, ShaderWatcher, WatchError};

pub fn crate_info() -> &'static str {
    "latinium-shader v0.1.0"
}
