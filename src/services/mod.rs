pub mod progress;
pub mod result_sink;

pub use progress::{ProgressEvent, ProgressReporter, ProgressSnapshot, ProgressSubscription};
pub use result_sink::{FsResultSink, ResultSink, SinkHandle, StoredOutput};
