pub mod executor;
pub mod ingress;
pub mod instance;
pub mod reconciler;

pub use executor::{
    ExecutorConfig, SyncExecutor, TransferHandler, TransferKind, TransferStateView,
};
pub use ingress::{FileStorage, PreprocessorFn, PreprocessorMap};
pub use instance::{dispose_singleton, init_singleton, singleton, SyncInstance};
pub use reconciler::Reconciler;
