use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::destination::{BatchExecer, BatchJudger};
use crate::error::{EtlError, EtlResult};
use crate::schedule::RetryJudger;

type FailureFn<R> = Arc<dyn Fn(&[R], usize) -> Option<EtlError> + Send + Sync>;

struct Inner<R> {
    call_sizes: Vec<usize>,
    written: Vec<R>,
}

/// Batch execer keeping every successfully written record in memory.
///
/// Clones share their state, so a test can keep a handle while the writer owns another one.
/// Failures are injected with [`RecordingExecer::fail_when`], which sees each batch together with
/// the zero based index of the call.
pub struct RecordingExecer<R> {
    inner: Arc<Mutex<Inner<R>>>,
    fail_when: Option<FailureFn<R>>,
    judger: Option<Arc<dyn BatchJudger>>,
}

impl<R> RecordingExecer<R> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                call_sizes: Vec::new(),
                written: Vec::new(),
            })),
            fail_when: None,
            judger: None,
        }
    }

    /// Fails a call whenever `fail_when` returns an error for it.
    pub fn fail_when<F>(mut self, fail_when: F) -> Self
    where
        F: Fn(&[R], usize) -> Option<EtlError> + Send + Sync + 'static,
    {
        self.fail_when = Some(Arc::new(fail_when));
        self
    }

    pub fn with_judger<J>(mut self, judger: J) -> Self
    where
        J: BatchJudger + 'static,
    {
        self.judger = Some(Arc::new(judger));
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner<R>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the size of every batch received, failed calls included.
    pub fn call_sizes(&self) -> Vec<usize> {
        self.lock().call_sizes.clone()
    }

    /// Returns the number of calls received.
    pub fn calls(&self) -> usize {
        self.lock().call_sizes.len()
    }
}

impl<R: Clone> RecordingExecer<R> {
    /// Returns the records of every successful call, in write order.
    pub fn written(&self) -> Vec<R> {
        self.lock().written.clone()
    }
}

impl<R> Default for RecordingExecer<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Clone for RecordingExecer<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            fail_when: self.fail_when.clone(),
            judger: self.judger.clone(),
        }
    }
}

impl<R> fmt::Debug for RecordingExecer<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingExecer")
            .field("calls", &self.calls())
            .field("has_judger", &self.judger.is_some())
            .finish_non_exhaustive()
    }
}

impl<R> BatchExecer<R> for RecordingExecer<R>
where
    R: Clone + Send + Sync + 'static,
{
    async fn batch_exec(&self, records: &[R]) -> EtlResult<()> {
        let mut inner = self.lock();
        let call = inner.call_sizes.len();
        inner.call_sizes.push(records.len());

        if let Some(fail_when) = &self.fail_when
            && let Some(err) = fail_when(records, call)
        {
            return Err(err);
        }

        inner.written.extend_from_slice(records);
        Ok(())
    }

    fn judger(&self) -> Option<Arc<dyn BatchJudger>> {
        self.judger.clone()
    }
}

/// Judger answering every error the same way.
#[derive(Debug, Clone, Copy)]
pub struct FixedJudger {
    retry: bool,
    one_by_one: bool,
}

impl FixedJudger {
    pub fn new(retry: bool, one_by_one: bool) -> Self {
        Self { retry, one_by_one }
    }
}

impl RetryJudger for FixedJudger {
    fn should_retry(&self, _err: &EtlError) -> bool {
        self.retry
    }
}

impl BatchJudger for FixedJudger {
    fn should_one_by_one(&self, _err: &EtlError) -> bool {
        self.one_by_one
    }
}
