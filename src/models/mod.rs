pub mod batch;
pub mod loaders;
pub mod outcome;
pub mod quality;

pub use batch::{BatchRequest, WorkItem};
pub use loaders::{load_all_jobs, load_job_file, JobSpec};
pub use outcome::{ArchiveRef, BatchResult, ErrorKind, ItemOutcome, ItemStatus, OutputRef};
pub use quality::{Dimensions, Quality};
