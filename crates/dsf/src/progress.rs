//! 📊 Transfer progress: how many files are home, how many bytes moved, how many gave up.
//!
//! Shared by every worker of a batch. Each finished transfer calls [`TransferProgress::record`],
//! which bumps the tallies, refreshes a small comfy-table under an indicatif bar and moves the
//! bar along. With `visible = false` the bar is hidden and only the tallies are kept, which
//! is what tests and `--json` runs want.
//!
//! 🦆 The duck watches the bar. The bar does not go faster. The duck knew.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};

const MIB: u64 = 1024 * 1024;
const RATE_WINDOW: Duration = Duration::from_secs(5);

/// 📦 Bytes, scaled to whatever unit reads best.
pub(crate) fn format_bytes(bytes: u64) -> String {
    const GIB: u64 = 1024 * MIB;
    match bytes {
        b if b >= GIB => format!("{:.2} GiB", b as f64 / GIB as f64),
        b if b >= MIB => format!("{:.2} MiB", b as f64 / MIB as f64),
        b if b >= 1024 => format!("{:.2} KiB", b as f64 / 1024.0),
        b => format!("{b} bytes"),
    }
}

/// 🔢 `1234567` → `1,234,567`
pub(crate) fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// ⏱️ MM:SS, or HH:MM:SS for the long hauls
pub(crate) fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// 🧮 A frozen copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ProgressSnapshot {
    pub(crate) files_done: u64,
    pub(crate) files_failed: u64,
    pub(crate) bytes_done: u64,
}

struct Tally {
    label: String,
    total_files: u64,
    total_bytes: u64,
    counts: ProgressSnapshot,
    bar: ProgressBar,
    /// (when, bytes so far, files so far)
    samples: VecDeque<(Instant, u64, u64)>,
    started: Instant,
}

impl Tally {
    fn rates(&mut self) -> (f64, f64) {
        let now = Instant::now();
        while let Some(&(at, _, _)) = self.samples.front() {
            if now.duration_since(at) > RATE_WINDOW {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        let files = self.counts.files_done + self.counts.files_failed;
        self.samples.push_back((now, self.counts.bytes_done, files));

        match self.samples.front() {
            Some(&(oldest, old_bytes, old_files)) => {
                let elapsed = now.duration_since(oldest).as_secs_f64();
                if elapsed > 0.0 {
                    let files_rate = files.saturating_sub(old_files) as f64 / elapsed;
                    let mib_rate =
                        self.counts.bytes_done.saturating_sub(old_bytes) as f64 / elapsed / MIB as f64;
                    return (files_rate, mib_rate);
                }
                (0.0, 0.0)
            }
            None => (0.0, 0.0),
        }
    }

    fn render(&mut self) {
        let (files_rate, mib_rate) = self.rates();
        let finished = self.counts.files_done + self.counts.files_failed;
        let elapsed = self.started.elapsed();
        let remaining = if finished > 0 && finished < self.total_files {
            let per_file = elapsed.as_secs_f64() / finished as f64;
            format_duration(Duration::from_secs_f64(
                per_file * (self.total_files - finished) as f64,
            ))
        } else {
            "--:--".to_string()
        };

        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        let right = |text: String| Cell::new(text).set_alignment(CellAlignment::Right);
        table.add_row(vec![
            right(format!("{files_rate:.1} files/s")),
            right(format!(
                "{} / {} files",
                format_number(finished),
                format_number(self.total_files)
            )),
        ]);
        table.add_row(vec![
            right(format!("{mib_rate:.2} MiB/s")),
            right(format!(
                "{} / {}",
                format_bytes(self.counts.bytes_done),
                format_bytes(self.total_bytes)
            )),
        ]);
        table.add_row(vec![
            right(format!("{} failed", format_number(self.counts.files_failed))),
            right(format!(
                "{} elapsed, {remaining} remaining",
                format_duration(elapsed)
            )),
        ]);

        self.bar.set_message(format!("{}\n{}", self.label, table));
        self.bar.set_position(finished);
    }
}

/// 📈 Cheap to clone, shared across workers.
#[derive(Clone)]
pub(crate) struct TransferProgress {
    inner: Arc<Mutex<Tally>>,
}

impl std::fmt::Debug for TransferProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferProgress")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl TransferProgress {
    pub(crate) fn new(label: impl Into<String>, total_files: u64, total_bytes: u64, visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::new(total_files)
        } else {
            ProgressBar::hidden()
        };
        bar.set_length(total_files);
        if let Ok(style) = ProgressStyle::default_bar().template("{msg}\n| [{bar:40.cyan/blue}]") {
            bar.set_style(style.progress_chars("=>-"));
        }

        let started = Instant::now();
        let tally = Tally {
            label: label.into(),
            total_files,
            total_bytes,
            counts: ProgressSnapshot::default(),
            bar,
            samples: VecDeque::from([(started, 0, 0)]),
            started,
        };
        Self {
            inner: Arc::new(Mutex::new(tally)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tally> {
        // a panicking worker must not take the counters down with it
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 🔄 One transfer finished, successfully or not.
    pub(crate) fn record(&self, ok: bool, bytes: u64) {
        let mut tally = self.lock();
        if ok {
            tally.counts.files_done += 1;
            tally.counts.bytes_done += bytes;
        } else {
            tally.counts.files_failed += 1;
        }
        tally.render();
    }

    pub(crate) fn snapshot(&self) -> ProgressSnapshot {
        self.lock().counts
    }

    /// ✅ Leave the final table on screen.
    pub(crate) fn finish(&self) {
        self.lock().bar.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_bytes_pick_their_own_units() {
        assert_eq!(format_bytes(512), "512 bytes");
        assert_eq!(format_bytes(2048), "2.00 KiB");
        assert_eq!(format_bytes(3 * MIB), "3.00 MiB");
        assert_eq!(format_bytes(1024 * MIB), "1.00 GiB");
    }

    #[test]
    fn the_one_where_big_numbers_get_commas() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn the_one_where_long_hauls_get_hours() {
        assert_eq!(format_duration(Duration::from_secs(65)), "01:05");
        assert_eq!(format_duration(Duration::from_secs(3725)), "01:02:05");
    }

    #[test]
    fn the_one_where_clones_share_one_scoreboard() {
        let progress = TransferProgress::new("test", 3, 30, false);
        let other = progress.clone();
        progress.record(true, 10);
        other.record(false, 0);
        other.record(true, 20);
        progress.finish();
        assert_eq!(
            progress.snapshot(),
            ProgressSnapshot {
                files_done: 2,
                files_failed: 1,
                bytes_done: 30
            }
        );
    }
}
