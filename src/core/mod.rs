// This file is the module declaration file for the `core` module.
// In Rust, a `mod.rs` file within a directory (e.g., `src/core/`)
// serves two main purposes:
//
// 1. It declares the submodules contained within that directory.
// 2. It exposes these submodules to the parent module (`src/` in this case),
//    making them accessible to the entire crate.

// `config` module:
// The validated data model (`Descriptor`, `Source`, `Method`, `RemoteSpec`,
// mount, script and borg options) plus the per-invocation `RunConfig`. It also
// provides the `DescriptorProvider` trait and the `DescriptorLoader` that
// reads a descriptor file and runs it through the validator.
pub mod config;

// `engine` module:
// The `BackupEngine` state machine that walks every source through
// resolution, command synthesis, execution (or simulation) and cleanup, and
// the `RunReport` that decides the exit status.
pub mod engine;

// `errors` module:
// `ValidationError` diagnostics and the `BackupError` taxonomy.
pub mod errors;

// `process` module:
// The `CommandRunner` seam between the engine and real subprocesses, and the
// `Executor` that renders commands and honours dry-run.
pub mod process;

// `resolver` module:
// Local passthrough or on-demand sshfs mounts with a release guard.
pub mod resolver;

pub mod signals;
