//! Following an encode through ffmpeg's `-progress` key/value output.
//!
//! With `-progress pipe:1 -nostats` the engine writes blocks of `key=value`
//! lines to stdout, each block ending in `progress=continue` or
//! `progress=end`. Only the encoded media time matters here.

/// Report granularity, in percent.
const STEP: u32 = 10;

/// A line of interest from the progress stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressLine {
    /// Media time written so far, in microseconds.
    OutTime(u64),
    /// `progress=end`: the engine has finished writing.
    End,
}

/// Parse one line of `-progress` output. Unknown keys and `N/A` values are
/// ignored.
pub fn parse_progress_line(line: &str) -> Option<ProgressLine> {
    let line = line.trim();
    if let Some(val) = line.strip_prefix("out_time_us=") {
        val.trim().parse().ok().map(ProgressLine::OutTime)
    } else if let Some(val) = line.strip_prefix("progress=") {
        (val.trim() == "end").then_some(ProgressLine::End)
    } else {
        None
    }
}

/// Turns progress lines into percentages of an expected output length,
/// reporting each 10% step at most once.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total_us: f64,
    last: Option<u32>,
}

impl ProgressTracker {
    /// `total_secs` is how much media the run will write.
    pub fn new(total_secs: f64) -> Self {
        Self {
            total_us: (total_secs * 1_000_000.0).max(1.0),
            last: None,
        }
    }

    /// Feed one line. Returns the percentage when a new step is reached.
    pub fn observe(&mut self, line: &str) -> Option<u32> {
        let percent = match parse_progress_line(line)? {
            ProgressLine::OutTime(us) => {
                (us as f64 / self.total_us * 100.0).clamp(0.0, 100.0) as u32
            }
            ProgressLine::End => 100,
        };
        let step = percent / STEP * STEP;
        if self.last.is_some_and(|last| step <= last) {
            return None;
        }
        self.last = Some(step);
        Some(step)
    }
}
