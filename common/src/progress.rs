//! Counters updated by the workers and read by the progress printer.
//!
//! Workers only ever add to per-thread slots, the printer sums them up.

/// Monotonic counter split into per-thread slots.
#[derive(Debug, Default)]
pub struct TlsCounter {
    slots: thread_local::ThreadLocal<std::sync::atomic::AtomicU64>,
}

impl TlsCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, value: u64) {
        self.slots
            .get_or_default()
            .fetch_add(value, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.add(1);
    }

    #[must_use]
    pub fn get(&self) -> u64 {
        self.slots
            .iter()
            .map(|slot| slot.load(std::sync::atomic::Ordering::Relaxed))
            .sum()
    }
}

/// Counts calls as they start and finish.
#[derive(Debug, Default)]
pub struct CallCounter {
    started: TlsCounter,
    finished: TlsCounter,
}

/// Marks one call as running until dropped.
#[derive(Debug)]
pub struct CallGuard<'a> {
    counter: &'a CallCounter,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.counter.finished.inc();
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CallStatus {
    pub started: u64,
    pub finished: u64,
}

impl CallStatus {
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.started - self.finished
    }
}

impl CallCounter {
    pub fn guard(&self) -> CallGuard<'_> {
        self.started.inc();
        CallGuard { counter: self }
    }

    #[must_use]
    pub fn get(&self) -> CallStatus {
        // read finished first: a call finishing between the two reads is then counted as running
        let finished = self.finished.get();
        let started = self.started.get();
        CallStatus {
            started: started.max(finished),
            finished,
        }
    }
}

/// Live counters shared by every worker of a run.
pub struct Progress {
    /// Remote calls (including retries) started/finished
    pub ops: CallCounter,
    pub folders_created: TlsCounter,
    pub folders_failed: TlsCounter,
    pub folders_skipped: TlsCounter,
    pub files_uploaded: TlsCounter,
    pub files_failed: TlsCounter,
    pub files_skipped: TlsCounter,
    pub bytes_uploaded: TlsCounter,
    pub retries: TlsCounter,
    start_time: std::time::Instant,
}

impl Progress {
    pub fn new() -> Self {
        Self {
            ops: Default::default(),
            folders_created: Default::default(),
            folders_failed: Default::default(),
            folders_skipped: Default::default(),
            files_uploaded: Default::default(),
            files_failed: Default::default(),
            files_skipped: Default::default(),
            bytes_uploaded: Default::default(),
            retries: Default::default(),
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
    last_ops: u64,
    last_bytes: u64,
    last_update: std::time::Instant,
}

impl<'a> ProgressPrinter<'a> {
    pub fn new(progress: &'a Progress) -> Self {
        Self {
            progress,
            last_ops: progress.ops.get().finished,
            last_bytes: progress.bytes_uploaded.get(),
            last_update: std::time::Instant::now(),
        }
    }

    pub fn print(&mut self) -> String {
        let time_now = std::time::Instant::now();
        let ops = self.progress.ops.get();
        let total_duration_secs = self.progress.get_duration().as_secs_f64();
        let curr_duration_secs = (time_now - self.last_update).as_secs_f64();
        let average_ops_rate = ops.finished as f64 / total_duration_secs;
        let current_ops_rate = (ops.finished - self.last_ops) as f64 / curr_duration_secs;
        let bytes = self.progress.bytes_uploaded.get();
        let average_bytes_rate = bytes as f64 / total_duration_secs;
        let current_bytes_rate = (bytes - self.last_bytes) as f64 / curr_duration_secs;
        // update self
        self.last_ops = ops.finished;
        self.last_bytes = bytes;
        self.last_update = time_now;
        format!(
            "---------------------\n\
            REMOTE CALLS:\n\
            in flight: {:>10}\n\
            average:   {:>10.2} calls/s\n\
            current:   {:>10.2} calls/s\n\
            retries:   {:>10}\n\
            -----------------------\n\
            UPLOADED:\n\
            average: {:>10}/s\n\
            current: {:>10}/s\n\
            total:   {:>10}\n\
            -----------------------\n\
            FOLDERS:\n\
            created: {:>10}\n\
            failed:  {:>10}\n\
            skipped: {:>10}\n\
            -----------------------\n\
            FILES:\n\
            uploaded: {:>10}\n\
            failed:   {:>10}\n\
            skipped:  {:>10}",
            ops.in_flight(),
            average_ops_rate,
            current_ops_rate,
            self.progress.retries.get(),
            bytesize::ByteSize(average_bytes_rate as u64),
            bytesize::ByteSize(current_bytes_rate as u64),
            bytesize::ByteSize(bytes),
            self.progress.folders_created.get(),
            self.progress.folders_failed.get(),
            self.progress.folders_skipped.get(),
            self.progress.files_uploaded.get(),
            self.progress.files_failed.get(),
            self.progress.files_skipped.get(),
        )
    }
}
