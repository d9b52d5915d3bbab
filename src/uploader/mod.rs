pub mod folder;
pub mod scanner;
pub(crate) mod scheduler;
pub mod shutdown;
pub mod task;
pub(crate) mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use folder::{is_hidden, object_key, DiscoveredFile, EntryDecision, FolderWalker, TraversalPolicy, WalkEvent};
pub use scanner::{RunSummary, Scanner};
pub use shutdown::{listen_for_sys_interruption, shutdown_signal, wait_for_drain, ShutdownOutcome};
pub use task::{CleanupFn, FailureStage, ObjectData, UploadFailure, UploadTask};
