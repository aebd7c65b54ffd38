use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Bar over the chunks of one batch commit
pub struct CommitProgress {
    pb: ProgressBar,
}

impl CommitProgress {
    pub fn new(total_records: usize, chunk_size: usize) -> Self {
        let chunks = total_records.div_ceil(chunk_size.max(1)) as u64;
        let pb = if console::Term::stdout().is_term() {
            ProgressBar::new(chunks)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) =
            ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} chunks {msg}")
        {
            pb.set_style(style.progress_chars("=> "));
        }
        Self { pb }
    }

    /// Record that `applied` of `total` chunks are persisted
    pub fn chunk_applied(&self, applied: usize, total: usize) {
        self.pb.set_length(total as u64);
        self.pb.set_position(applied as u64);
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }

    pub fn abandon(&self, msg: &str) {
        self.pb.abandon_with_message(msg.to_string());
    }
}

pub struct Spinner {
    pb: ProgressBar,
}

impl Spinner {
    pub fn new(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_message(message.to_string());
        if console::Term::stdout().is_term() {
            pb.enable_steady_tick(Duration::from_millis(100));
        }
        Self { pb }
    }

    pub fn set_message(&self, msg: &str) {
        self.pb.set_message(msg.to_string());
    }

    pub fn finish_and_clear(&self) {
        self.pb.finish_and_clear();
    }
}
