//! Weighted job scheduler
//!
//! A scheduler goes through `Created -> Started -> SchedulingClosed -> Drained`. Jobs are queued with
//! [`JobScheduler::schedule`] and run on the tokio runtime; a job of weight `w` holds `w` of the scheduler's
//! `threads` permits for as long as it runs, so at most `threads` streams are active at any time regardless of
//! how the work is split into jobs. A failing job does not cancel its siblings: [`JobScheduler::wait`] returns
//! the first error once everything has finished and logs the rest.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use futures::future::BoxFuture;
use tracing::instrument;

use crate::progress::{JobProgress, Progress, ProgressDisplay};
use crate::transfer::Summary;

const STATUS_REFRESH: std::time::Duration = std::time::Duration::from_millis(200);

/// Work of one job; resolves to the number of bytes moved.
pub type JobTask = Box<dyn FnOnce(JobProgress) -> BoxFuture<'static, Result<u64>> + Send>;

pub struct TransferJob {
    /// Short label for progress output
    pub name: String,
    pub source: String,
    pub target: String,
    pub size: u64,
    pub weight: usize,
    pub task: JobTask,
}

impl std::fmt::Debug for TransferJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferJob")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("size", &self.size)
            .field("weight", &self.weight)
            .finish()
    }
}

enum State {
    Created,
    Started {
        sender: tokio::sync::mpsc::UnboundedSender<TransferJob>,
        dispatcher: tokio::task::JoinHandle<Result<Summary>>,
    },
    SchedulingClosed {
        dispatcher: tokio::task::JoinHandle<Result<Summary>>,
    },
    Drained,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Created => "created",
            State::Started { .. } => "started",
            State::SchedulingClosed { .. } => "scheduling-closed",
            State::Drained => "drained",
        }
    }
}

pub struct JobScheduler {
    limiter: throttle::Limiter,
    progress: Arc<Progress>,
    display: Option<ProgressDisplay>,
    status_line: Option<tokio::task::JoinHandle<()>>,
    state: State,
}

impl JobScheduler {
    pub fn new(threads: usize, display: Option<ProgressDisplay>) -> Self {
        Self {
            limiter: throttle::Limiter::new(threads),
            progress: Arc::new(Progress::new()),
            display,
            status_line: None,
            state: State::Created,
        }
    }

    pub fn threads(&self) -> usize {
        self.limiter.capacity()
    }

    pub fn progress(&self) -> &Arc<Progress> {
        &self.progress
    }

    /// User-visible one-line notice, kept clear of the progress bars.
    pub fn notice(&self, message: &str) {
        match &self.display {
            Some(display) => display.println(message),
            None => println!("{message}"),
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if !matches!(self.state, State::Created) {
            return Err(anyhow!("cannot start a scheduler that is {}", self.state.name()));
        }
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch(
            receiver,
            self.limiter.clone(),
            self.progress.clone(),
            self.display.clone(),
        ));
        if let Some(display) = &self.display {
            self.status_line = Some(display.spawn_status(self.progress.clone(), STATUS_REFRESH));
        }
        self.state = State::Started { sender, dispatcher };
        Ok(())
    }

    /// Queues a job; returns as soon as it is queued.
    pub fn schedule(&self, job: TransferJob) -> Result<()> {
        match &self.state {
            State::Started { sender, .. } => {
                tracing::debug!("scheduling {:?}", &job);
                sender
                    .send(job)
                    .map_err(|err| anyhow!("scheduler stopped before {:?} could be queued", err.0.source))
            }
            other => Err(anyhow!(
                "cannot schedule {:?} on a scheduler that is {}",
                job.source,
                other.name()
            )),
        }
    }

    /// No more jobs will be scheduled; calling it again is a no-op.
    pub fn done_scheduling(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, State::Drained) {
            State::Started { sender, dispatcher } => {
                drop(sender);
                self.state = State::SchedulingClosed { dispatcher };
                Ok(())
            }
            closed @ State::SchedulingClosed { .. } => {
                self.state = closed;
                Ok(())
            }
            other => {
                let name = other.name();
                self.state = other;
                Err(anyhow!("cannot close scheduling on a scheduler that is {}", name))
            }
        }
    }

    /// Waits for every queued job; the first job error wins.
    #[instrument(skip(self))]
    pub async fn wait(&mut self) -> Result<Summary> {
        let dispatcher = match std::mem::replace(&mut self.state, State::Drained) {
            State::SchedulingClosed { dispatcher } => dispatcher,
            other => {
                let name = other.name();
                self.state = other;
                return Err(anyhow!("cannot wait on a scheduler that is {}", name));
            }
        };
        let result = dispatcher.await.context("job dispatcher panicked");
        if let Some(status_line) = self.status_line.take() {
            status_line.abort();
        }
        result?
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        if let Some(status_line) = self.status_line.take() {
            status_line.abort();
        }
    }
}

async fn dispatch(
    mut receiver: tokio::sync::mpsc::UnboundedReceiver<TransferJob>,
    limiter: throttle::Limiter,
    progress: Arc<Progress>,
    display: Option<ProgressDisplay>,
) -> Result<Summary> {
    let mut join_set = tokio::task::JoinSet::new();
    let mut outcome = Outcome::default();
    while let Some(job) = receiver.recv().await {
        while let Some(res) = join_set.try_join_next() {
            outcome.record(res);
        }
        let permit = limiter.acquire(job.weight).await?;
        join_set.spawn(run_job(job, permit, progress.clone(), display.clone()));
    }
    while let Some(res) = join_set.join_next().await {
        outcome.record(res);
    }
    match outcome.error {
        Some(error) => Err(error),
        None => Ok(outcome.summary),
    }
}

#[derive(Default)]
struct Outcome {
    summary: Summary,
    error: Option<anyhow::Error>,
}

impl Outcome {
    fn record(&mut self, res: Result<Result<u64>, tokio::task::JoinError>) {
        let res = res.map_err(anyhow::Error::from).and_then(|inner| inner);
        match res {
            Ok(bytes) => {
                self.summary.files_transferred += 1;
                self.summary.bytes_transferred += bytes;
            }
            Err(error) if self.error.is_none() => {
                tracing::error!("{:#}", &error);
                self.error = Some(error);
            }
            Err(error) => {
                tracing::error!("{:#}", &error);
            }
        }
    }
}

#[instrument(skip(job, permit, progress, display), fields(source = %job.source, weight = permit.weight()))]
async fn run_job(
    job: TransferJob,
    permit: throttle::Permit,
    progress: Arc<Progress>,
    display: Option<ProgressDisplay>,
) -> Result<u64> {
    let _permit = permit;
    let _guard = progress.jobs.guard();
    let tracker = JobProgress::new(progress.clone(), display.as_ref(), &job.name, &job.target, job.size);
    tracker.report(0, job.size as i64);
    let TransferJob {
        source, target, size, task, ..
    } = job;
    match task(tracker.clone()).await {
        Ok(bytes) => {
            tracker.finish();
            tracing::debug!("transferred {:?} to {:?}", source, target);
            Ok(bytes)
        }
        Err(error) => {
            tracker.report(-1, size as i64);
            Err(error.context(format!("failed to transfer {:?} to {:?}", source, target)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    fn job<F>(name: &str, size: u64, weight: usize, work: F) -> TransferJob
    where
        F: FnOnce(JobProgress) -> BoxFuture<'static, Result<u64>> + Send + 'static,
    {
        TransferJob {
            name: name.to_string(),
            source: format!("/src/{name}"),
            target: format!("/dst/{name}"),
            size,
            weight,
            task: Box::new(work),
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn runs_every_job() -> Result<()> {
        let mut scheduler = JobScheduler::new(4, Some(ProgressDisplay::hidden(false)));
        scheduler.start()?;
        for i in 0..10u64 {
            scheduler.schedule(job(&format!("f{i}"), i, 1, move |progress| {
                async move {
                    progress.report(i as i64, i as i64);
                    Ok(i)
                }
                .boxed()
            }))?;
        }
        scheduler.done_scheduling()?;
        let summary = scheduler.wait().await?;
        assert_eq!(summary.files_transferred, 10);
        assert_eq!(summary.bytes_transferred, 45);
        assert_eq!(scheduler.progress().bytes_transferred.get(), 45);
        Ok(())
    }

    #[tokio::test]
    async fn weight_bounds_concurrency() -> Result<()> {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut scheduler = JobScheduler::new(4, None);
        scheduler.start()?;
        for i in 0..8 {
            let (active, peak) = (active.clone(), peak.clone());
            // weight 3: at most one of these fits next to a weight-1 job
            let weight = if i % 2 == 0 { 3 } else { 1 };
            scheduler.schedule(job(&format!("f{i}"), 0, weight, move |_| {
                async move {
                    let now = active.fetch_add(weight, Ordering::SeqCst) + weight;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    active.fetch_sub(weight, Ordering::SeqCst);
                    Ok(0)
                }
                .boxed()
            }))?;
        }
        scheduler.done_scheduling()?;
        scheduler.wait().await?;
        assert!(peak.load(Ordering::SeqCst) <= 4);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn first_error_is_reported_and_siblings_finish() -> Result<()> {
        let finished = Arc::new(AtomicUsize::new(0));
        let mut scheduler = JobScheduler::new(2, None);
        scheduler.start()?;
        scheduler.schedule(job("bad", 5, 1, |progress| {
            async move {
                progress.report(2, 5);
                Err(anyhow!("connection reset"))
            }
            .boxed()
        }))?;
        for i in 0..4 {
            let finished = finished.clone();
            scheduler.schedule(job(&format!("ok{i}"), 1, 1, move |_| {
                async move {
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                }
                .boxed()
            }))?;
        }
        scheduler.done_scheduling()?;
        let err = scheduler.wait().await.unwrap_err();
        assert!(format!("{err:#}").contains("connection reset"));
        assert!(format!("{err:#}").contains("/src/bad"));
        assert_eq!(finished.load(Ordering::SeqCst), 4);
        assert_eq!(scheduler.progress().files_failed.get(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn lifecycle_is_enforced() -> Result<()> {
        let mut scheduler = JobScheduler::new(1, None);
        assert!(scheduler.schedule(job("early", 0, 1, |_| async { Ok(0) }.boxed())).is_err());
        assert!(scheduler.done_scheduling().is_err());
        scheduler.start()?;
        assert!(scheduler.start().is_err());
        assert!(scheduler.wait().await.is_err());
        scheduler.done_scheduling()?;
        scheduler.done_scheduling()?;
        assert!(scheduler.schedule(job("late", 0, 1, |_| async { Ok(0) }.boxed())).is_err());
        assert_eq!(scheduler.wait().await?, Summary::default());
        assert!(scheduler.wait().await.is_err());
        Ok(())
    }
}
