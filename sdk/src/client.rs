//! Client-side helpers for driving FSM-managed workflows from outside the
//! decider: starting executions, signaling, and reading the current state
//! back out of history markers.

use std::ops::ControlFlow;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use tiller_core::client::WorkflowOps;
use tiller_core::serializer::{JsonStateSerializer, StateSerializer};
use tiller_core::swf::{
    DescribeWorkflowExecutionInput, EventType, GetWorkflowExecutionHistoryInput,
    ListOpenWorkflowExecutionsInput, SignalWorkflowExecutionInput, StartWorkflowExecutionInput,
    StartWorkflowExecutionOutput, WorkflowExecution, WorkflowExecutionDetail,
    WorkflowExecutionInfos,
};

use crate::error::{Result, TillerError};
use crate::fsm::models::{FsmData, SerializedState, STATE_MARKER};

/// Operations against FSM-managed workflow executions of one data type.
pub struct FsmClient<T: FsmData> {
    ops: Arc<dyn WorkflowOps>,
    pub domain: String,
    serializer: Arc<dyn StateSerializer>,
    system_serializer: Arc<dyn StateSerializer>,
    _data: std::marker::PhantomData<fn() -> T>,
}

impl<T: FsmData> FsmClient<T> {
    pub fn new(ops: Arc<dyn WorkflowOps>, domain: impl Into<String>) -> Self {
        FsmClient {
            ops,
            domain: domain.into(),
            serializer: Arc::new(JsonStateSerializer),
            system_serializer: Arc::new(JsonStateSerializer),
            _data: std::marker::PhantomData,
        }
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn StateSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn with_system_serializer(mut self, serializer: Arc<dyn StateSerializer>) -> Self {
        self.system_serializer = serializer;
        self
    }

    /// Start a workflow execution whose input is the serialized zero-version
    /// state wrapping `data`. The template supplies type, task list, and
    /// timeouts; domain, id, and input are filled in here.
    pub async fn start(
        &self,
        template: StartWorkflowExecutionInput,
        workflow_id: &str,
        data: &T,
    ) -> Result<StartWorkflowExecutionOutput> {
        let state = SerializedState {
            state_version: 0,
            state_name: String::new(),
            state_data: self
                .serializer
                .as_ref()
                .serialize(data)
                .map_err(TillerError::StateSerialization)?,
            workflow_id: workflow_id.to_string(),
        };
        let input = StartWorkflowExecutionInput {
            domain: self.domain.clone(),
            workflow_id: workflow_id.to_string(),
            input: Some(
                self.serializer
                    .as_ref()
                    .serialize(&state)
                    .map_err(TillerError::StateSerialization)?,
            ),
            ..template
        };
        Ok(self.ops.start_workflow_execution(input).await?)
    }

    /// Signal an execution with a serializable payload.
    pub async fn signal<D: Serialize>(
        &self,
        workflow_id: &str,
        signal_name: &str,
        input: &D,
    ) -> Result<()> {
        let serialized = self
            .serializer
            .as_ref()
            .serialize(input)
            .map_err(TillerError::StateSerialization)?;
        self.signal_text(workflow_id, signal_name, serialized).await
    }

    /// Signal an execution with a raw string payload, sent without
    /// serialization so plain strings do not grow quotes.
    pub async fn signal_text(
        &self,
        workflow_id: &str,
        signal_name: &str,
        input: impl Into<String>,
    ) -> Result<()> {
        self.ops
            .signal_workflow_execution(SignalWorkflowExecutionInput {
                domain: self.domain.clone(),
                workflow_id: workflow_id.to_string(),
                signal_name: signal_name.to_string(),
                run_id: None,
                input: Some(input.into()),
            })
            .await?;
        Ok(())
    }

    /// Current state name and data of an execution, read from the latest
    /// `FSM.State` marker (or the start input for workflows that have not
    /// ticked yet).
    pub async fn get_state(&self, workflow_id: &str) -> Result<(String, T)> {
        let state = self.get_serialized_state(workflow_id).await?;
        let data: T = self
            .serializer
            .as_ref()
            .deserialize(&state.state_data)
            .map_err(TillerError::StateDeserialization)?;
        Ok((state.state_name, data))
    }

    /// The latest serialized state of an execution, paging backwards through
    /// history until a state marker or the start event is found.
    pub async fn get_serialized_state(&self, workflow_id: &str) -> Result<SerializedState> {
        let mut next_page_token: Option<String> = None;
        loop {
            let history = self
                .ops
                .get_workflow_execution_history(GetWorkflowExecutionHistoryInput {
                    domain: self.domain.clone(),
                    execution: WorkflowExecution {
                        workflow_id: workflow_id.to_string(),
                        run_id: None,
                    },
                    next_page_token,
                    reverse_order: true,
                })
                .await?;

            for event in &history.events {
                if event.is_marker(STATE_MARKER) {
                    let details = event
                        .marker_recorded_event_attributes
                        .as_ref()
                        .and_then(|a| a.details.as_deref())
                        .unwrap_or_default();
                    return self
                        .system_serializer
                        .as_ref()
                        .deserialize(details)
                        .map_err(TillerError::StateDeserialization);
                }
                if event.event_type == EventType::WorkflowExecutionStarted {
                    let input = event
                        .workflow_execution_started_event_attributes
                        .as_ref()
                        .and_then(|a| a.input.as_deref())
                        .unwrap_or_default();
                    return self
                        .serializer
                        .as_ref()
                        .deserialize(input)
                        .map_err(TillerError::StateDeserialization);
                }
            }

            next_page_token = history.next_page_token;
            if next_page_token.is_none() {
                debug!(workflow_id, "history exhausted without state");
                return Err(TillerError::MissingState);
            }
        }
    }

    /// Walk open executions page by page; the visitor returns
    /// `ControlFlow::Break(())` to stop early.
    pub async fn walk_open_workflow_infos<F>(
        &self,
        mut input: ListOpenWorkflowExecutionsInput,
        mut visit: F,
    ) -> Result<()>
    where
        F: FnMut(&WorkflowExecutionInfos) -> ControlFlow<()>,
    {
        input.domain = self.domain.clone();
        loop {
            let infos = self.ops.list_open_workflow_executions(input.clone()).await?;
            if visit(&infos).is_break() {
                return Ok(());
            }
            match infos.next_page_token {
                Some(token) => input.next_page_token = Some(token),
                None => return Ok(()),
            }
        }
    }

    /// Describe one execution.
    pub async fn describe(&self, workflow_id: &str) -> Result<WorkflowExecutionDetail> {
        Ok(self
            .ops
            .describe_workflow_execution(DescribeWorkflowExecutionInput {
                domain: self.domain.clone(),
                execution: WorkflowExecution {
                    workflow_id: workflow_id.to_string(),
                    run_id: None,
                },
            })
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde::Deserialize;
    use tiller_core::error::CoreResult;
    use tiller_core::swf::{
        History, HistoryEvent, ListClosedWorkflowExecutionsInput, MarkerRecordedEventAttributes,
        WorkflowExecutionInfo, WorkflowType,
    };

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct TestData {
        states: Vec<String>,
    }

    #[derive(Default)]
    struct FakeOps {
        starts: Mutex<Vec<StartWorkflowExecutionInput>>,
        signals: Mutex<Vec<SignalWorkflowExecutionInput>>,
        history: Mutex<Vec<History>>,
        open_pages: Mutex<Vec<WorkflowExecutionInfos>>,
    }

    #[async_trait]
    impl WorkflowOps for FakeOps {
        async fn start_workflow_execution(
            &self,
            input: StartWorkflowExecutionInput,
        ) -> CoreResult<StartWorkflowExecutionOutput> {
            self.starts.lock().push(input);
            Ok(StartWorkflowExecutionOutput {
                run_id: Some("run-1".to_string()),
            })
        }

        async fn signal_workflow_execution(
            &self,
            input: SignalWorkflowExecutionInput,
        ) -> CoreResult<()> {
            self.signals.lock().push(input);
            Ok(())
        }

        async fn get_workflow_execution_history(
            &self,
            _input: GetWorkflowExecutionHistoryInput,
        ) -> CoreResult<History> {
            let mut pages = self.history.lock();
            if pages.is_empty() {
                Ok(History::default())
            } else {
                Ok(pages.remove(0))
            }
        }

        async fn list_open_workflow_executions(
            &self,
            _input: ListOpenWorkflowExecutionsInput,
        ) -> CoreResult<WorkflowExecutionInfos> {
            let mut pages = self.open_pages.lock();
            if pages.is_empty() {
                Ok(WorkflowExecutionInfos::default())
            } else {
                Ok(pages.remove(0))
            }
        }

        async fn list_closed_workflow_executions(
            &self,
            _input: ListClosedWorkflowExecutionsInput,
        ) -> CoreResult<WorkflowExecutionInfos> {
            Ok(WorkflowExecutionInfos::default())
        }

        async fn describe_workflow_execution(
            &self,
            input: DescribeWorkflowExecutionInput,
        ) -> CoreResult<WorkflowExecutionDetail> {
            Ok(WorkflowExecutionDetail {
                execution_info: WorkflowExecutionInfo {
                    execution: input.execution,
                    workflow_type: WorkflowType::default(),
                    ..Default::default()
                },
                latest_execution_context: Some("working".to_string()),
            })
        }
    }

    fn client(ops: Arc<FakeOps>) -> FsmClient<TestData> {
        FsmClient::new(ops, "prod")
    }

    #[tokio::test]
    async fn test_start_wraps_data_in_zero_version_state() {
        let ops = Arc::new(FakeOps::default());
        let data = TestData {
            states: vec!["seed".to_string()],
        };

        client(ops.clone())
            .start(StartWorkflowExecutionInput::default(), "wf-1", &data)
            .await
            .unwrap();

        let starts = ops.starts.lock();
        assert_eq!(starts[0].domain, "prod");
        assert_eq!(starts[0].workflow_id, "wf-1");
        let state: SerializedState =
            serde_json::from_str(starts[0].input.as_deref().unwrap()).unwrap();
        assert_eq!(state.state_version, 0);
        assert_eq!(state.state_name, "");
        let inner: TestData = serde_json::from_str(&state.state_data).unwrap();
        assert_eq!(inner, data);
    }

    #[tokio::test]
    async fn test_signal_text_sends_plain_strings_unquoted() {
        let ops = Arc::new(FakeOps::default());
        client(ops.clone())
            .signal_text("wf-1", "poke", "simple")
            .await
            .unwrap();

        let signals = ops.signals.lock();
        assert_eq!(signals[0].input.as_deref(), Some("simple"));
        assert!(!signals[0].input.as_deref().unwrap().contains('"'));
    }

    #[tokio::test]
    async fn test_get_state_from_marker() {
        let ops = Arc::new(FakeOps::default());
        let serialized = SerializedState {
            state_version: 4,
            state_name: "working".to_string(),
            state_data: "{\"states\":[\"a\",\"b\"]}".to_string(),
            workflow_id: "wf-1".to_string(),
        };
        let mut marker = HistoryEvent::new(9, EventType::MarkerRecorded);
        marker.marker_recorded_event_attributes = Some(Box::new(MarkerRecordedEventAttributes {
            marker_name: STATE_MARKER.to_string(),
            details: Some(serde_json::to_string(&serialized).unwrap()),
            decision_task_completed_event_id: 8,
        }));
        // first page has no marker: exercises pagination
        ops.history.lock().push(History {
            events: vec![HistoryEvent::new(10, EventType::TimerFired)],
            next_page_token: Some("page2".to_string()),
        });
        ops.history.lock().push(History {
            events: vec![marker],
            next_page_token: None,
        });

        let (state, data) = client(ops).get_state("wf-1").await.unwrap();
        assert_eq!(state, "working");
        assert_eq!(data.states, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_get_state_missing() {
        let ops = Arc::new(FakeOps::default());
        ops.history.lock().push(History::default());
        let result = client(ops).get_state("wf-1").await;
        assert!(matches!(result, Err(TillerError::MissingState)));
    }

    #[tokio::test]
    async fn test_walk_open_stops_on_break() {
        let ops = Arc::new(FakeOps::default());
        let info = |id: &str| WorkflowExecutionInfo {
            execution: WorkflowExecution {
                workflow_id: id.to_string(),
                run_id: None,
            },
            workflow_type: WorkflowType::default(),
            ..Default::default()
        };
        ops.open_pages.lock().push(WorkflowExecutionInfos {
            execution_infos: vec![info("wf-1")],
            next_page_token: Some("more".to_string()),
        });
        ops.open_pages.lock().push(WorkflowExecutionInfos {
            execution_infos: vec![info("wf-2")],
            next_page_token: None,
        });

        let mut seen = Vec::new();
        client(ops)
            .walk_open_workflow_infos(ListOpenWorkflowExecutionsInput::default(), |page| {
                for info in &page.execution_infos {
                    seen.push(info.execution.workflow_id.clone());
                    if info.execution.workflow_id == "wf-1" {
                        return ControlFlow::Break(());
                    }
                }
                ControlFlow::Continue(())
            })
            .await
            .unwrap();

        assert_eq!(seen, vec!["wf-1".to_string()]);
    }

    #[tokio::test]
    async fn test_describe() {
        let ops = Arc::new(FakeOps::default());
        let detail = client(ops).describe("wf-1").await.unwrap();
        assert_eq!(detail.execution_info.execution.workflow_id, "wf-1");
        assert_eq!(detail.latest_execution_context.as_deref(), Some("working"));
    }
}
