//! Terminal progress view backed by `indicatif`.

use std::sync::atomic::{AtomicU64, Ordering};

use album_dl::progress::{ProgressSink, TaskId, TaskProgress, TaskUpdate};
use dashmap::DashMap;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

const BAR_TEMPLATE: &str = "{msg:40!} [{bar:30}] {percent:>3}%";
const OVERALL_TEMPLATE: &str = "{msg} [{bar:30}] {pos}/{len} files";

/// One bar per file plus an overall bar counting finished files.
#[derive(Debug)]
pub(crate) struct ConsoleProgress {
    multi: MultiProgress,
    overall: ProgressBar,
    bars: DashMap<TaskId, ProgressBar>,
    next_id: AtomicU64,
}

impl ConsoleProgress {
    /// Draws to stderr.
    pub(crate) fn new(total_files: u64) -> Self {
        Self::with_target(total_files, ProgressDrawTarget::stderr())
    }

    pub(crate) fn with_target(total_files: u64, target: ProgressDrawTarget) -> Self {
        let multi = MultiProgress::with_draw_target(target);
        let overall = multi.add(ProgressBar::new(total_files));
        overall.set_style(
            ProgressStyle::with_template(OVERALL_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        overall.set_message("Overall");
        Self {
            multi,
            overall,
            bars: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    /// Files finished so far.
    pub(crate) fn finished_files(&self) -> u64 {
        self.overall.position()
    }

    /// Clears every remaining bar.
    pub(crate) fn finish(&self) {
        for entry in &self.bars {
            entry.value().finish_and_clear();
        }
        self.bars.clear();
        self.overall.finish_and_clear();
    }
}

impl ProgressSink for ConsoleProgress {
    fn add_task(&self, label: &str) -> TaskId {
        let task = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let bar = self.multi.add(ProgressBar::new(100));
        bar.set_style(
            ProgressStyle::with_template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_message(label.to_string());
        self.bars.insert(task, bar);
        task
    }

    fn update_task(&self, task: TaskId, update: TaskUpdate) {
        let mut reached_end = false;
        if let Some(progress) = update.progress
            && let Some(bar) = self.bars.get(&task)
        {
            match progress {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                TaskProgress::Completed(value) => bar.set_position(value.clamp(0.0, 100.0) as u64),
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                TaskProgress::Advance(value) => {
                    let next = bar.position() + value.max(0.0).round() as u64;
                    bar.set_position(next.min(100));
                }
            }
            reached_end = bar.position() >= 100;
        }

        // Finished files count once; hiding an unfinished row does not.
        if (reached_end || update.visible == Some(false))
            && let Some((_, bar)) = self.bars.remove(&task)
        {
            bar.finish_and_clear();
            self.multi.remove(&bar);
            if reached_end {
                self.overall.inc(1);
            }
        }
    }

    fn log(&self, event: &str, details: &str) {
        if self.multi.println(format!("[{event}] {details}")).is_err() {
            eprintln!("[{event}] {details}");
        }
    }
}
