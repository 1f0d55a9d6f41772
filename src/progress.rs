use std::fmt;
use std::path::PathBuf;

use log::{debug, info, warn};

/// Processing stage of a single image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Loading,
    Grayscale,
    ContrastEnhancement,
    Thresholding,
    Cleaning,
    Labeling,
    Measuring,
    Preview,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Loading => "loading",
            Stage::Grayscale => "converting to grayscale",
            Stage::ContrastEnhancement => "enhancing contrast",
            Stage::Thresholding => "thresholding",
            Stage::Cleaning => "removing objects and speckles",
            Stage::Labeling => "labeling airspaces",
            Stage::Measuring => "measuring",
            Stage::Preview => "writing preview",
        };
        f.write_str(name)
    }
}

/// Progress reported while a batch runs
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    BatchStarted { total: usize },
    ImageStarted { path: PathBuf },
    StageStarted { path: PathBuf, stage: Stage },
    ImageFinished { path: PathBuf },
    ImageFailed { path: PathBuf, message: String },
    BatchFinished { succeeded: usize, failed: usize, cancelled: bool },
}

/// Receives progress events; called from worker threads
pub trait ProgressObserver: Sync {
    fn on_event(&self, event: &ProgressEvent);
}

impl<F> ProgressObserver for F
where
    F: Fn(&ProgressEvent) + Sync,
{
    fn on_event(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Writes every event to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl ProgressObserver for LogObserver {
    fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::BatchStarted { total } => info!("Found {} images to process", total),
            ProgressEvent::ImageStarted { path } => info!("Processing {}", path.display()),
            ProgressEvent::StageStarted { path, stage } => {
                debug!("{}: {}", path.display(), stage)
            }
            ProgressEvent::ImageFinished { path } => info!("Finished {}", path.display()),
            ProgressEvent::ImageFailed { path, message } => {
                warn!("Failed to process {}: {}", path.display(), message)
            }
            ProgressEvent::BatchFinished { succeeded, failed, cancelled } => {
                if *cancelled {
                    warn!("Batch cancelled after {} images ({} failed)", succeeded, failed);
                } else {
                    info!("Batch finished: {} succeeded, {} failed", succeeded, failed);
                }
            }
        }
    }
}

/// Ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_event(&self, _event: &ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn closures_are_observers() {
        let seen = Mutex::new(Vec::new());
        let observer = |event: &ProgressEvent| seen.lock().unwrap().push(event.clone());
        observer.on_event(&ProgressEvent::BatchStarted { total: 2 });
        LogObserver.on_event(&ProgressEvent::BatchStarted { total: 2 });
        assert_eq!(seen.lock().unwrap().as_slice(), &[ProgressEvent::BatchStarted { total: 2 }]);
    }

    #[test]
    fn stage_names_are_readable() {
        assert_eq!(Stage::Labeling.to_string(), "labeling airspaces");
    }
}
