use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use tracing::{Level, event, instrument};

#[derive(Debug)]
pub struct TlsCounter {
    // each thread bumps its own slot; readers sum them
    count: thread_local::ThreadLocal<AtomicU64>,
}

impl TlsCounter {
    pub fn new() -> Self {
        Self {
            count: thread_local::ThreadLocal::new(),
        }
    }

    pub fn add(&self, value: u64) {
        self.count
            .get_or(|| AtomicU64::new(0))
            .fetch_add(value, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn get(&self) -> u64 {
        self.count.iter().fold(0, |x, y| x + y.load(Ordering::Relaxed))
    }
}

impl Default for TlsCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct ProgressCounter {
    started: TlsCounter,
    finished: TlsCounter,
}

pub struct ProgressGuard<'a> {
    progress: &'a ProgressCounter,
}

impl<'a> ProgressGuard<'a> {
    pub fn new(progress: &'a ProgressCounter) -> Self {
        progress.started.inc();
        Self { progress }
    }
}

impl Drop for ProgressGuard<'_> {
    fn drop(&mut self) {
        self.progress.finished.inc();
    }
}

pub struct Status {
    pub started: u64,
    pub finished: u64,
}

impl ProgressCounter {
    pub fn guard(&self) -> ProgressGuard<'_> {
        ProgressGuard::new(self)
    }

    #[instrument(skip(self))]
    pub fn get(&self) -> Status {
        let mut status = Status {
            started: self.started.get(),
            finished: self.finished.get(),
        };
        if status.finished > status.started {
            event!(
                Level::DEBUG,
                "Progress inversion - started: {}, finished {}",
                status.started,
                status.finished
            );
            status.started = status.finished;
        }
        status
    }
}

/// Counters shared by every job of one scheduler.
#[derive(Debug)]
pub struct Progress {
    pub jobs: ProgressCounter,
    pub bytes_transferred: TlsCounter,
    pub files_transferred: TlsCounter,
    pub files_failed: TlsCounter,
    start_time: std::time::Instant,
}

impl Progress {
    pub fn new() -> Self {
        Self {
            jobs: Default::default(),
            bytes_transferred: Default::default(),
            files_transferred: Default::default(),
            files_failed: Default::default(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn get_duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ProgressPrinter<'a> {
    progress: &'a Progress,
    last_bytes: u64,
    last_update: std::time::Instant,
}

impl<'a> ProgressPrinter<'a> {
    pub fn new(progress: &'a Progress) -> Self {
        Self {
            progress,
            last_bytes: progress.bytes_transferred.get(),
            last_update: std::time::Instant::now(),
        }
    }

    /// One-line status: active jobs, completed files, bytes and rates.
    pub fn print(&mut self) -> String {
        let time_now = std::time::Instant::now();
        let jobs = self.progress.jobs.get();
        let total_duration_secs = self.progress.get_duration().as_secs_f64().max(f64::EPSILON);
        let curr_duration_secs = (time_now - self.last_update).as_secs_f64().max(f64::EPSILON);
        let bytes = self.progress.bytes_transferred.get();
        let average_bytes_rate = bytes as f64 / total_duration_secs;
        let current_bytes_rate = bytes.saturating_sub(self.last_bytes) as f64 / curr_duration_secs;
        self.last_bytes = bytes;
        self.last_update = time_now;
        format!(
            "active: {} | files: {} done, {} failed | {} ({}/s now, {}/s avg)",
            jobs.started - jobs.finished,
            self.progress.files_transferred.get(),
            self.progress.files_failed.get(),
            bytesize::ByteSize(bytes),
            bytesize::ByteSize(current_bytes_rate as u64),
            bytesize::ByteSize(average_bytes_rate as u64),
        )
    }
}

/// Terminal display: a status line plus one byte bar per active job.
#[derive(Clone)]
pub struct ProgressDisplay {
    multi: indicatif::MultiProgress,
    show_path: bool,
}

impl ProgressDisplay {
    pub fn new(show_path: bool) -> Self {
        Self {
            multi: indicatif::MultiProgress::new(),
            show_path,
        }
    }

    /// Display that draws nothing, for tests.
    pub fn hidden(show_path: bool) -> Self {
        Self {
            multi: indicatif::MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden()),
            show_path,
        }
    }

    /// Prints above the bars.
    pub fn println(&self, message: &str) {
        if let Err(err) = self.multi.println(message) {
            tracing::debug!("failed to print progress notice: {}", err);
        }
    }

    fn job_bar(&self, label: &str, path: &str, total: u64) -> indicatif::ProgressBar {
        let bar = self.multi.add(indicatif::ProgressBar::new(total));
        let style = indicatif::ProgressStyle::with_template(
            "{msg:40!} [{bar:30}] {bytes}/{total_bytes} {bytes_per_sec}",
        )
        .map(|style| style.progress_chars("=> "))
        .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar());
        bar.set_style(style);
        bar.set_message(if self.show_path { path.to_string() } else { label.to_string() });
        bar
    }

    /// Refreshes the status line every `delay` until the returned handle is aborted.
    pub fn spawn_status(&self, progress: Arc<Progress>, delay: std::time::Duration) -> tokio::task::JoinHandle<()> {
        let status = self.multi.insert(0, indicatif::ProgressBar::new_spinner());
        tokio::spawn(async move {
            let mut printer = ProgressPrinter::new(&progress);
            loop {
                status.set_message(printer.print());
                status.tick();
                tokio::time::sleep(delay).await;
            }
        })
    }
}

/// Progress of one transfer job.
///
/// Receives `(processed, total)` pairs from the transfer. `processed == -1` means the job failed: the bar is
/// abandoned and later reports are ignored.
#[derive(Clone)]
pub struct JobProgress {
    inner: Arc<JobProgressInner>,
}

struct JobProgressInner {
    progress: Arc<Progress>,
    bar: Option<indicatif::ProgressBar>,
    last: AtomicI64,
    stopped: AtomicBool,
}

impl JobProgress {
    pub fn new(progress: Arc<Progress>, display: Option<&ProgressDisplay>, label: &str, path: &str, total: u64) -> Self {
        Self {
            inner: Arc::new(JobProgressInner {
                progress,
                bar: display.map(|display| display.job_bar(label, path, total)),
                last: AtomicI64::new(0),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn report(&self, processed: i64, total: i64) {
        let inner = &self.inner;
        if inner.stopped.load(Ordering::Acquire) {
            return;
        }
        if processed < 0 {
            if !inner.stopped.swap(true, Ordering::AcqRel) {
                inner.progress.files_failed.inc();
                if let Some(bar) = &inner.bar {
                    bar.abandon();
                }
            }
            return;
        }
        let previous = inner.last.fetch_max(processed, Ordering::AcqRel);
        if processed > previous {
            inner
                .progress
                .bytes_transferred
                .add((processed - previous) as u64);
        }
        if let Some(bar) = &inner.bar {
            if total >= 0 {
                bar.set_length(total as u64);
            }
            bar.set_position(processed as u64);
        }
    }

    /// Marks the job done; a job that already reported failure stays failed.
    pub fn finish(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.progress.files_transferred.inc();
        if let Some(bar) = &self.inner.bar {
            bar.finish_and_clear();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Adapter for the remote filesystem's transfer callbacks.
    pub fn callback(&self) -> remote::ProgressCallback {
        let this = self.clone();
        Arc::new(move |processed, total| this.report(processed, total))
    }
}
