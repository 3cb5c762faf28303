//! Per-stage timing for one run.

use crate::core::StageId;
use std::fmt::Write;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Elapsed time of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTiming {
    /// The stage.
    pub stage: StageId,
    /// Wall time spent.
    pub elapsed: Duration,
}

/// Collects stage timings and logs a summary table.
///
/// Stages of a parallel group overlap, so their sum can exceed the total.
#[derive(Debug)]
pub struct StageTimer {
    start: Instant,
    steps: Vec<StageTiming>,
}

impl Default for StageTimer {
    fn default() -> Self {
        Self::start()
    }
}

impl StageTimer {
    /// Starts the run clock.
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            steps: Vec::new(),
        }
    }

    /// Records a finished stage.
    pub fn record(&mut self, stage: StageId, elapsed: Duration) {
        info!(stage = %stage, elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX), "Stage finished");
        self.steps.push(StageTiming { stage, elapsed });
    }

    /// Recorded timings in completion order.
    #[must_use]
    pub fn steps(&self) -> &[StageTiming] {
        &self.steps
    }

    /// Time since the run clock started.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.start.elapsed()
    }

    /// Renders the summary table.
    #[must_use]
    pub fn render(&self) -> String {
        let rule = "=".repeat(50);
        let mut out = String::new();
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "TIMING SUMMARY");
        let _ = writeln!(out, "{rule}");
        for step in &self.steps {
            let _ = writeln!(out, "  {:<35} {:>6.1}s", step.stage.as_str(), step.elapsed.as_secs_f64());
        }
        let _ = writeln!(out, "  {:<35} {:>6.1}s", "TOTAL", self.total().as_secs_f64());
        let _ = write!(out, "{rule}");
        out
    }

    /// Logs the summary table and returns the total.
    pub fn summary(&self) -> Duration {
        for line in self.render().lines() {
            info!("{line}");
        }
        self.total()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_records_and_totals() {
        let mut timer = StageTimer::start();
        tokio::time::sleep(Duration::from_secs(3)).await;
        timer.record(StageId::GenerateNarrative, Duration::from_millis(1500));
        timer.record(StageId::SynthesizeVoice, Duration::from_millis(1200));

        assert_eq!(timer.steps().len(), 2);
        assert_eq!(timer.steps()[0].stage, StageId::GenerateNarrative);
        assert_eq!(timer.summary(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_table() {
        let mut timer = StageTimer::start();
        timer.record(StageId::ComposeVideo, Duration::from_millis(2500));
        let table = timer.render();
        assert!(table.contains("TIMING SUMMARY"));
        assert!(table.contains("compose_video"));
        assert!(table.contains("2.5s"));
        assert!(table.contains("TOTAL"));
    }
}
