//! Service operation traits and the HTTP client implementing them.
//!
//! The runtime components never hold a concrete client; they hold the subset
//! trait they actually need (`DecisionOps` for the decider side,
//! `ActivityOps` for the activity worker, `WorkflowOps` for tooling), which
//! keeps tests on hand-rolled fakes and keeps the blast radius of transport
//! changes small.

mod transport;

pub use transport::{ops, SwfTransport, SwfTransportConfig};

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::swf::{
    ActivityTask, DecisionTask, DescribeWorkflowExecutionInput, GetWorkflowExecutionHistoryInput,
    History, ListClosedWorkflowExecutionsInput, ListOpenWorkflowExecutionsInput,
    PollForActivityTaskInput, PollForDecisionTaskInput, RecordActivityTaskHeartbeatInput,
    RecordActivityTaskHeartbeatOutput, RespondActivityTaskCanceledInput,
    RespondActivityTaskCompletedInput, RespondActivityTaskFailedInput,
    RespondDecisionTaskCompletedInput, SignalWorkflowExecutionInput, StartWorkflowExecutionInput,
    StartWorkflowExecutionOutput, WorkflowExecutionDetail, WorkflowExecutionInfos,
};

/// Operations used by the decider side: polling decision tasks (one page per
/// call, chained by `next_page_token`) and responding with decisions.
#[async_trait]
pub trait DecisionOps: Send + Sync {
    async fn poll_for_decision_task(
        &self,
        input: PollForDecisionTaskInput,
    ) -> CoreResult<DecisionTask>;

    async fn respond_decision_task_completed(
        &self,
        input: RespondDecisionTaskCompletedInput,
    ) -> CoreResult<()>;
}

/// Operations used by the activity worker.
#[async_trait]
pub trait ActivityOps: Send + Sync {
    async fn poll_for_activity_task(
        &self,
        input: PollForActivityTaskInput,
    ) -> CoreResult<ActivityTask>;

    async fn respond_activity_task_completed(
        &self,
        input: RespondActivityTaskCompletedInput,
    ) -> CoreResult<()>;

    async fn respond_activity_task_failed(
        &self,
        input: RespondActivityTaskFailedInput,
    ) -> CoreResult<()>;

    async fn respond_activity_task_canceled(
        &self,
        input: RespondActivityTaskCanceledInput,
    ) -> CoreResult<()>;

    async fn record_activity_task_heartbeat(
        &self,
        input: RecordActivityTaskHeartbeatInput,
    ) -> CoreResult<RecordActivityTaskHeartbeatOutput>;

    async fn get_workflow_execution_history(
        &self,
        input: GetWorkflowExecutionHistoryInput,
    ) -> CoreResult<History>;

    async fn signal_workflow_execution(
        &self,
        input: SignalWorkflowExecutionInput,
    ) -> CoreResult<()>;
}

/// Operations used by tooling and clients that drive workflows from outside.
#[async_trait]
pub trait WorkflowOps: Send + Sync {
    async fn start_workflow_execution(
        &self,
        input: StartWorkflowExecutionInput,
    ) -> CoreResult<StartWorkflowExecutionOutput>;

    async fn signal_workflow_execution(
        &self,
        input: SignalWorkflowExecutionInput,
    ) -> CoreResult<()>;

    async fn get_workflow_execution_history(
        &self,
        input: GetWorkflowExecutionHistoryInput,
    ) -> CoreResult<History>;

    async fn list_open_workflow_executions(
        &self,
        input: ListOpenWorkflowExecutionsInput,
    ) -> CoreResult<WorkflowExecutionInfos>;

    async fn list_closed_workflow_executions(
        &self,
        input: ListClosedWorkflowExecutionsInput,
    ) -> CoreResult<WorkflowExecutionInfos>;

    async fn describe_workflow_execution(
        &self,
        input: DescribeWorkflowExecutionInput,
    ) -> CoreResult<WorkflowExecutionDetail>;
}

/// HTTP client for the workflow service, implementing all operation traits
/// over an [`SwfTransport`].
#[derive(Debug, Clone)]
pub struct SwfClient {
    transport: SwfTransport,
}

impl SwfClient {
    pub fn new(config: SwfTransportConfig) -> CoreResult<Self> {
        Ok(SwfClient {
            transport: SwfTransport::new(config)?,
        })
    }

    pub fn from_transport(transport: SwfTransport) -> Self {
        SwfClient { transport }
    }
}

#[async_trait]
impl DecisionOps for SwfClient {
    async fn poll_for_decision_task(
        &self,
        input: PollForDecisionTaskInput,
    ) -> CoreResult<DecisionTask> {
        self.transport.call(ops::POLL_FOR_DECISION_TASK, &input).await
    }

    async fn respond_decision_task_completed(
        &self,
        input: RespondDecisionTaskCompletedInput,
    ) -> CoreResult<()> {
        self.transport
            .call_unit(ops::RESPOND_DECISION_TASK_COMPLETED, &input)
            .await
    }
}

#[async_trait]
impl ActivityOps for SwfClient {
    async fn poll_for_activity_task(
        &self,
        input: PollForActivityTaskInput,
    ) -> CoreResult<ActivityTask> {
        self.transport.call(ops::POLL_FOR_ACTIVITY_TASK, &input).await
    }

    async fn respond_activity_task_completed(
        &self,
        input: RespondActivityTaskCompletedInput,
    ) -> CoreResult<()> {
        self.transport
            .call_unit(ops::RESPOND_ACTIVITY_TASK_COMPLETED, &input)
            .await
    }

    async fn respond_activity_task_failed(
        &self,
        input: RespondActivityTaskFailedInput,
    ) -> CoreResult<()> {
        self.transport
            .call_unit(ops::RESPOND_ACTIVITY_TASK_FAILED, &input)
            .await
    }

    async fn respond_activity_task_canceled(
        &self,
        input: RespondActivityTaskCanceledInput,
    ) -> CoreResult<()> {
        self.transport
            .call_unit(ops::RESPOND_ACTIVITY_TASK_CANCELED, &input)
            .await
    }

    async fn record_activity_task_heartbeat(
        &self,
        input: RecordActivityTaskHeartbeatInput,
    ) -> CoreResult<RecordActivityTaskHeartbeatOutput> {
        self.transport
            .call(ops::RECORD_ACTIVITY_TASK_HEARTBEAT, &input)
            .await
    }

    async fn get_workflow_execution_history(
        &self,
        input: GetWorkflowExecutionHistoryInput,
    ) -> CoreResult<History> {
        self.transport
            .call(ops::GET_WORKFLOW_EXECUTION_HISTORY, &input)
            .await
    }

    async fn signal_workflow_execution(
        &self,
        input: SignalWorkflowExecutionInput,
    ) -> CoreResult<()> {
        self.transport
            .call_unit(ops::SIGNAL_WORKFLOW_EXECUTION, &input)
            .await
    }
}

#[async_trait]
impl WorkflowOps for SwfClient {
    async fn start_workflow_execution(
        &self,
        input: StartWorkflowExecutionInput,
    ) -> CoreResult<StartWorkflowExecutionOutput> {
        self.transport.call(ops::START_WORKFLOW_EXECUTION, &input).await
    }

    async fn signal_workflow_execution(
        &self,
        input: SignalWorkflowExecutionInput,
    ) -> CoreResult<()> {
        self.transport
            .call_unit(ops::SIGNAL_WORKFLOW_EXECUTION, &input)
            .await
    }

    async fn get_workflow_execution_history(
        &self,
        input: GetWorkflowExecutionHistoryInput,
    ) -> CoreResult<History> {
        self.transport
            .call(ops::GET_WORKFLOW_EXECUTION_HISTORY, &input)
            .await
    }

    async fn list_open_workflow_executions(
        &self,
        input: ListOpenWorkflowExecutionsInput,
    ) -> CoreResult<WorkflowExecutionInfos> {
        self.transport
            .call(ops::LIST_OPEN_WORKFLOW_EXECUTIONS, &input)
            .await
    }

    async fn list_closed_workflow_executions(
        &self,
        input: ListClosedWorkflowExecutionsInput,
    ) -> CoreResult<WorkflowExecutionInfos> {
        self.transport
            .call(ops::LIST_CLOSED_WORKFLOW_EXECUTIONS, &input)
            .await
    }

    async fn describe_workflow_execution(
        &self,
        input: DescribeWorkflowExecutionInput,
    ) -> CoreResult<WorkflowExecutionDetail> {
        self.transport
            .call(ops::DESCRIBE_WORKFLOW_EXECUTION, &input)
            .await
    }
}
