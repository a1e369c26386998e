pub mod operation;

pub use operation::OperationPipeline;
