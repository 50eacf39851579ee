pub mod job;
pub mod merge;
pub mod results;
pub mod task;
pub mod worker;

pub use job::{
    validate_plan, JobId, JobInfo, JobRequest, JobResultView, JobStatus, PlanError, TaskInfo,
    TaskSpec,
};
pub use merge::MergeRule;
pub use results::{JobPlan, MergeOutcome, MergedResult, MergerMessage, PartialResult, PlanEntry};
pub use task::{Task, TaskId, TaskOutcome, TaskStatus};
pub use worker::{
    TaskAssignmentRequest, TaskAssignmentResponse, TaskCompleteRequest, TaskCompleteResponse,
    TaskRef, WorkerHeartbeatRequest, WorkerHeartbeatResponse, WorkerId, WorkerMetrics,
    WorkerRegisterRequest, WorkerRegisterResponse,
};
