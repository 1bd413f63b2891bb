//! Turning byte counts from concurrent downloads into percentages

use crate::{image::ContentDigest, pull::PullObserver};
use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc, Mutex, PoisonError,
};

/// Overall progress when layer downloads begin and end
const LAYERS_START: u8 = 10;
const LAYERS_END: u8 = 90;

struct Shared {
    observer: Arc<dyn PullObserver>,
    /// Held while the observer is told, so reports arrive in order
    reported: Mutex<u8>,
    total_bytes: AtomicU64,
    done_bytes: AtomicU64,
    total_layers: AtomicUsize,
    done_layers: AtomicUsize,
}

#[derive(Clone)]
pub(crate) struct ProgressTracker {
    shared: Arc<Shared>,
}

impl ProgressTracker {
    pub(crate) fn new(observer: Arc<dyn PullObserver>) -> Self {
        ProgressTracker {
            shared: Arc::new(Shared {
                observer,
                reported: Mutex::new(0),
                total_bytes: AtomicU64::new(0),
                done_bytes: AtomicU64::new(0),
                total_layers: AtomicUsize::new(0),
                done_layers: AtomicUsize::new(0),
            }),
        }
    }

    /// Report overall progress; values below the last one reported are dropped
    pub(crate) fn overall(&self, percent: u8) {
        let percent = percent.min(100);
        let mut reported = self
            .shared
            .reported
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if percent > *reported {
            *reported = percent;
            self.shared.observer.overall_progress(percent);
        }
    }

    pub(crate) fn begin_layers(&self, total_bytes: u64, total_layers: usize) {
        self.shared.total_bytes.store(total_bytes, Ordering::SeqCst);
        self.shared.total_layers.store(total_layers, Ordering::SeqCst);
    }

    pub(crate) fn layer(&self, digest: &ContentDigest) -> LayerProgress {
        LayerProgress {
            tracker: self.clone(),
            digest: digest.clone(),
            done: AtomicU64::new(0),
            percent: Mutex::new(0),
        }
    }

    fn add_bytes(&self, bytes: u64) {
        let done = self.shared.done_bytes.fetch_add(bytes, Ordering::SeqCst) + bytes;
        let total = self.shared.total_bytes.load(Ordering::SeqCst);
        if total > 0 {
            self.overall(scale(done.min(total), total));
        }
    }

    fn layer_done(&self) {
        let done = self.shared.done_layers.fetch_add(1, Ordering::SeqCst) + 1;
        let total = self.shared.total_layers.load(Ordering::SeqCst);
        if total > 0 {
            self.overall(scale(done.min(total) as u64, total as u64));
        }
    }
}

fn scale(done: u64, total: u64) -> u8 {
    let span = (LAYERS_END - LAYERS_START) as u64;
    LAYERS_START + (done * span / total) as u8
}

/// Progress of one layer download
///
/// A restarted download reports from zero again; only bytes past the
/// furthest point already reached count toward the overall figure.
pub(crate) struct LayerProgress {
    tracker: ProgressTracker,
    digest: ContentDigest,
    done: AtomicU64,
    percent: Mutex<u8>,
}

impl LayerProgress {
    pub(crate) fn update(&self, done: u64, total: u64) {
        let previous = self.done.fetch_max(done, Ordering::SeqCst);
        if done > previous {
            self.tracker.add_bytes(done - previous);
        }
        if total > 0 {
            self.report((done.min(total) * 100 / total) as u8);
        }
    }

    pub(crate) fn finish(&self, size: u64) {
        let previous = self.done.fetch_max(size, Ordering::SeqCst);
        if size > previous {
            self.tracker.add_bytes(size - previous);
        }
        self.report(100);
        self.tracker.layer_done();
    }

    fn report(&self, percent: u8) {
        let mut reported = self.percent.lock().unwrap_or_else(PoisonError::into_inner);
        if percent > *reported {
            *reported = percent;
            self.tracker
                .shared
                .observer
                .layer_progress(&self.digest, percent);
        }
    }
}
