//! Hooks around activity task execution.

use tiller_core::swf::ActivityTask;

use crate::activity::ActivityResult;
use crate::error::{Result, TillerError};

/// Observes and optionally rewrites activity task handling. All methods
/// default to pass-through no-ops.
pub trait ActivityInterceptor: Send + Sync {
    fn before_task(&self, _task: &ActivityTask) {}

    /// Runs after the handler; may rewrite the result before it is routed to
    /// a complete/fail/cancel response.
    fn after_task(&self, _task: &ActivityTask, result: Result<ActivityResult>) -> Result<ActivityResult> {
        result
    }

    fn after_task_complete(&self, _task: &ActivityTask, _result: &ActivityResult) {}
    fn after_task_failed(&self, _task: &ActivityTask, _error: &TillerError) {}
    fn after_task_canceled(&self, _task: &ActivityTask, _details: Option<&str>) {}
}

/// Interceptor that does nothing; the default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopActivityInterceptor;

impl ActivityInterceptor for NoopActivityInterceptor {}

/// Runs a list of interceptors in order; `after_task` results thread through
/// the chain.
pub struct ComposedActivityInterceptor {
    interceptors: Vec<std::sync::Arc<dyn ActivityInterceptor>>,
}

impl ComposedActivityInterceptor {
    pub fn new(interceptors: Vec<std::sync::Arc<dyn ActivityInterceptor>>) -> Self {
        ComposedActivityInterceptor { interceptors }
    }
}

impl ActivityInterceptor for ComposedActivityInterceptor {
    fn before_task(&self, task: &ActivityTask) {
        for interceptor in &self.interceptors {
            interceptor.before_task(task);
        }
    }

    fn after_task(&self, task: &ActivityTask, mut result: Result<ActivityResult>) -> Result<ActivityResult> {
        for interceptor in &self.interceptors {
            result = interceptor.after_task(task, result);
        }
        result
    }

    fn after_task_complete(&self, task: &ActivityTask, result: &ActivityResult) {
        for interceptor in &self.interceptors {
            interceptor.after_task_complete(task, result);
        }
    }

    fn after_task_failed(&self, task: &ActivityTask, error: &TillerError) {
        for interceptor in &self.interceptors {
            interceptor.after_task_failed(task, error);
        }
    }

    fn after_task_canceled(&self, task: &ActivityTask, details: Option<&str>) {
        for interceptor in &self.interceptors {
            interceptor.after_task_canceled(task, details);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingInterceptor {
        before: AtomicUsize,
        complete: AtomicUsize,
    }

    impl ActivityInterceptor for CountingInterceptor {
        fn before_task(&self, _task: &ActivityTask) {
            self.before.fetch_add(1, Ordering::SeqCst);
        }
        fn after_task_complete(&self, _task: &ActivityTask, _result: &ActivityResult) {
            self.complete.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct RewritingInterceptor;

    impl ActivityInterceptor for RewritingInterceptor {
        fn after_task(&self, _task: &ActivityTask, result: Result<ActivityResult>) -> Result<ActivityResult> {
            result.map(|_| ActivityResult::Text("rewritten".to_string()))
        }
    }

    #[test]
    fn test_noop_passes_result_through() {
        let interceptor = NoopActivityInterceptor;
        let result = interceptor.after_task(
            &ActivityTask::default(),
            Ok(ActivityResult::Text("original".to_string())),
        );
        assert!(matches!(result, Ok(ActivityResult::Text(s)) if s == "original"));
    }

    #[test]
    fn test_composed_runs_all_and_threads_result() {
        let counting = Arc::new(CountingInterceptor {
            before: AtomicUsize::new(0),
            complete: AtomicUsize::new(0),
        });
        let composed = ComposedActivityInterceptor::new(vec![
            counting.clone(),
            Arc::new(RewritingInterceptor),
        ]);

        let task = ActivityTask::default();
        composed.before_task(&task);
        assert_eq!(counting.before.load(Ordering::SeqCst), 1);

        let result = composed.after_task(&task, Ok(ActivityResult::Empty));
        assert!(matches!(result, Ok(ActivityResult::Text(s)) if s == "rewritten"));

        composed.after_task_complete(&task, &ActivityResult::Empty);
        assert_eq!(counting.complete.load(Ordering::SeqCst), 1);
    }
}
