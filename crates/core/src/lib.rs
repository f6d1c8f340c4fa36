pub mod config;
pub mod errors;
pub mod operations;

pub use errors::{ProxyError, UpstreamError};
pub use operations::{
    registry, OperationCall, OperationDescriptor, OperationExecutor, OperationId, ParamKind,
    ResourceSnapshot, UpstreamBinding, POD_LOG_TAIL_LINES,
};
