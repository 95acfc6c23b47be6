use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use latinium_common::ShaderStage;

/// Weight of the newest frame in the smoothed frame time.
const SMOOTHING: f64 = 0.1;

/// Running frame and reload counters shown under the program summary.
///
/// Frame times are folded into a total, a worst case and an exponentially
/// smoothed recent value, so nothing is kept per frame.
#[derive(Debug, Clone, Default)]
pub struct OverlayStats {
    frames: u64,
    frame_total: Duration,
    slowest: Duration,
    smoothed: Option<Duration>,
    reloads: u64,
    failures: u64,
    load_time: Option<Duration>,
}

impl OverlayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame(&mut self, dt: Duration) {
        self.frames += 1;
        self.frame_total += dt;
        self.slowest = self.slowest.max(dt);
        self.smoothed = Some(match self.smoothed {
            Some(prev) => prev.mul_f64(1.0 - SMOOTHING) + dt.mul_f64(SMOOTHING),
            None => dt,
        });
    }

    /// A program was loaded; `took` is the load time when it is known.
    pub fn record_reload(&mut self, took: Option<Duration>) {
        self.reloads += 1;
        if took.is_some() {
            self.load_time = took;
        }
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Mean over every recorded frame.
    pub fn mean_frame(&self) -> Duration {
        match u32::try_from(self.frames) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.frame_total / n,
            Err(_) => self.frame_total.div_f64(self.frames as f64),
        }
    }

    pub fn slowest_frame(&self) -> Duration {
        self.slowest
    }

    pub fn recent_frame(&self) -> Duration {
        self.smoothed.unwrap_or(Duration::ZERO)
    }

    /// Frames per second from the smoothed frame time, 0 before any frame.
    pub fn fps(&self) -> f64 {
        let recent = self.recent_frame().as_secs_f64();
        if recent > 0.0 { 1.0 / recent } else { 0.0 }
    }

    pub fn reloads(&self) -> u64 {
        self.reloads
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn load_time(&self) -> Option<Duration> {
        self.load_time
    }
}

/// One flattened stage as shown in the overlay.
#[derive(Debug, Clone)]
pub struct StageInfo {
    pub stage: ShaderStage,
    pub path: PathBuf,
    pub lines: usize,
    pub includes: usize,
}

/// Snapshot of viewer state for the debug overlay.
#[derive(Debug, Clone, Default)]
pub struct OverlayInfo {
    pub stages: Vec<StageInfo>,
    pub uniforms: usize,
    pub last_error: Option<String>,
}

/// Produces a presentation of the overlay state.
pub trait Overlay {
    type Output;

    fn render(&self, info: &OverlayInfo, stats: &OverlayStats) -> Self::Output;
}

/// Plain-text overlay for terminals and logs.
#[derive(Debug, Default)]
pub struct DebugOverlay;

impl DebugOverlay {
    pub fn new() -> Self {
        Self
    }
}

impl Overlay for DebugOverlay {
    type Output = String;

    fn render(&self, info: &OverlayInfo, stats: &OverlayStats) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== Shader Program ===");
        for stage in &info.stages {
            let _ = writeln!(
                out,
                "  {}: {} ({} lines, {} includes)",
                stage.stage,
                stage.path.display(),
                stage.lines,
                stage.includes
            );
        }
        let _ = writeln!(out, "Uniforms: {}", info.uniforms);

        let status = match &info.last_error {
            Some(_) => "FAILED",
            None => "ok",
        };
        let _ = write!(
            out,
            "Reloads: {} (failures: {}) status={status}",
            stats.reloads(),
            stats.failures()
        );
        if let Some(took) = stats.load_time() {
            let _ = write!(out, " last={took:?}");
        }
        out.push('\n');
        if let Some(err) = &info.last_error {
            let _ = writeln!(out, "Error: {err}");
        }

        let _ = writeln!(
            out,
            "Frame: recent={:.2}ms mean={:.2}ms worst={:.2}ms fps={:.1} ({} frames)",
            stats.recent_frame().as_secs_f64() * 1000.0,
            stats.mean_frame().as_secs_f64() * 1000.0,
            stats.slowest_frame().as_secs_f64() * 1000.0,
            stats.fps(),
            stats.frames()
        );
        out
    }
}
