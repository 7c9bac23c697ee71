use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use crate::messages::LoaderEvent;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadProgressStage {
    Reading,
    Decoding,
    Publishing,
}

impl LoadProgressStage {
    pub fn stage_label(self) -> &'static str {
        match self {
            Self::Reading => "Reading definition…",
            Self::Decoding => "Decoding samples…",
            Self::Publishing => "Publishing…",
        }
    }

    fn range(self) -> (f32, f32) {
        match self {
            Self::Reading => (0.0, 0.05),
            Self::Decoding => (0.05, 0.95),
            Self::Publishing => (0.95, 1.0),
        }
    }
}

pub struct ProgressReporter {
    tx: Sender<LoaderEvent>,
    last_emit: Instant,
    min_interval: Duration,
}

impl ProgressReporter {
    pub fn new(tx: Sender<LoaderEvent>) -> Self {
        let min_interval = Duration::from_millis(100);
        Self {
            tx,
            last_emit: Instant::now()
                .checked_sub(min_interval)
                .unwrap_or_else(Instant::now),
            min_interval,
        }
    }

    pub fn emit(&mut self, stage: LoadProgressStage, local_percent: f32, force: bool) {
        let local_percent = if local_percent.is_finite() {
            local_percent.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let now = Instant::now();
        if !force && now.duration_since(self.last_emit) < self.min_interval {
            return;
        }
        self.last_emit = now;

        let (start, end) = stage.range();
        let percent = (start + (end - start) * local_percent).clamp(0.0, 1.0);
        let _ = self.tx.send(LoaderEvent::Progress {
            percent,
            stage: format!("Loading ({})", stage.stage_label()),
        });
    }
}

/// Cooperative cancellation flag shared between a loader and its caller.
///
/// Loaders check it between files and between SF2 read blocks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
