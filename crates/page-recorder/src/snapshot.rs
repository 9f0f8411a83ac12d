use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::record::{EncodedImage, SnapshotPayload};
use crate::timer::{TimerId, TimerScheduler};

/// Geometry of the visible viewport
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub scroll_x: f64,
    pub scroll_y: f64,
    /// Outer size, scrollbars included
    pub width: u32,
    pub height: u32,
    /// Width taken by a vertical scrollbar
    pub scrollbar_width: u32,
    /// Height taken by a horizontal scrollbar
    pub scrollbar_height: u32,
}

/// Area of the page to render into an image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRegion {
    pub x: f64,
    pub y: f64,
    pub width: u32,
    pub height: u32,
    pub background: String,
    pub mime_type: String,
}

/// Renders part of the page into an encoded image
pub trait ViewportCapture: Send + Sync {
    fn viewport(&self) -> Option<Viewport>;

    /// Returns `None` when capture is unavailable right now
    fn capture(&self, region: &CaptureRegion) -> Option<EncodedImage>;
}

/// Configuration for snapshot capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub enabled: bool,
    /// Quiescence window after a paint signal before capturing
    pub debounce_ms: u64,
    pub mime_type: String,
    pub background: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 100,
            mime_type: "image/png".to_string(),
            background: "#fff".to_string(),
        }
    }
}

impl SnapshotConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Single-slot debounce: at most one timer pending at any time
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: Option<TimerId>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    /// Cancel the pending timer, if any, and schedule a fresh one
    pub fn trigger(&mut self, scheduler: &dyn TimerScheduler) -> TimerId {
        if let Some(previous) = self.pending.take() {
            scheduler.cancel(previous);
        }
        let id = TimerId::next();
        scheduler.schedule(id, self.delay);
        self.pending = Some(id);
        id
    }

    /// Consume a fired timer. Returns false for stale or unknown ids.
    pub fn fire(&mut self, id: TimerId) -> bool {
        if self.pending == Some(id) {
            self.pending = None;
            true
        } else {
            false
        }
    }

    pub fn cancel(&mut self, scheduler: &dyn TimerScheduler) {
        if let Some(id) = self.pending.take() {
            scheduler.cancel(id);
        }
    }

    pub fn pending(&self) -> Option<TimerId> {
        self.pending
    }
}

/// Captures viewport images for a session, debounced on paint signals
pub struct SnapshotProvider {
    config: SnapshotConfig,
    capture: Arc<dyn ViewportCapture>,
    debouncer: Debouncer,
}

impl SnapshotProvider {
    pub fn new(config: SnapshotConfig, capture: Arc<dyn ViewportCapture>) -> Self {
        let debouncer = Debouncer::new(config.debounce());
        Self {
            config,
            capture,
            debouncer,
        }
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    /// Visible content area, excluding scrollbar insets
    pub fn capture_region(&self) -> Option<CaptureRegion> {
        let viewport = self.capture.viewport()?;
        let width = viewport.width.saturating_sub(viewport.scrollbar_width);
        let height = viewport.height.saturating_sub(viewport.scrollbar_height);
        if width == 0 || height == 0 {
            return None;
        }

        Some(CaptureRegion {
            x: viewport.scroll_x,
            y: viewport.scroll_y,
            width,
            height,
            background: self.config.background.clone(),
            mime_type: self.config.mime_type.clone(),
        })
    }

    /// Capture the viewport now. Best-effort: `None` if unavailable.
    pub fn capture(&self) -> Option<SnapshotPayload> {
        if !self.config.enabled {
            return None;
        }

        let region = match self.capture_region() {
            Some(region) => region,
            None => {
                tracing::debug!("viewport unavailable; snapshot skipped");
                return None;
            }
        };

        match self.capture.capture(&region) {
            Some(image) => Some(SnapshotPayload {
                image,
                width: region.width,
                height: region.height,
            }),
            None => {
                tracing::warn!(
                    width = region.width,
                    height = region.height,
                    "viewport capture failed; snapshot skipped"
                );
                None
            }
        }
    }

    /// Paint completed: restart the quiescence window
    pub fn on_paint(&mut self, scheduler: &dyn TimerScheduler) {
        if self.config.enabled {
            self.debouncer.trigger(scheduler);
        }
    }

    /// Returns true when the fired timer is the pending debounce timer
    pub fn on_timer_fired(&mut self, id: TimerId) -> bool {
        self.debouncer.fire(id)
    }

    pub fn cancel_pending(&mut self, scheduler: &dyn TimerScheduler) {
        self.debouncer.cancel(scheduler);
    }

    pub fn pending_timer(&self) -> Option<TimerId> {
        self.debouncer.pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDocument;
    use crate::timer::ManualScheduler;

    fn provider(document: &MockDocument) -> SnapshotProvider {
        SnapshotProvider::new(SnapshotConfig::default(), Arc::new(document.clone()))
    }

    #[test]
    fn test_region_excludes_scrollbars() {
        let document = MockDocument::new();
        document.set_viewport(Viewport {
            scroll_x: 0.0,
            scroll_y: 120.0,
            width: 1024,
            height: 768,
            scrollbar_width: 15,
            scrollbar_height: 0,
        });

        let region = provider(&document).capture_region().unwrap();
        assert_eq!(region.width, 1009);
        assert_eq!(region.height, 768);
        assert_eq!(region.y, 120.0);
        assert_eq!(region.mime_type, "image/png");
        assert_eq!(region.background, "#fff");
    }

    #[test]
    fn test_capture_uses_region_size() {
        let document = MockDocument::new();
        let payload = provider(&document).capture().unwrap();
        let region = document.last_capture_region().unwrap();

        assert_eq!(payload.width, region.width);
        assert_eq!(payload.height, region.height);
        assert!(payload.image.data_url.starts_with("data:image/png"));
    }

    #[test]
    fn test_capture_unavailable_is_not_an_error() {
        let document = MockDocument::new();
        document.set_capture_available(false);
        assert!(provider(&document).capture().is_none());
    }

    #[test]
    fn test_disabled_provider_never_captures() {
        let document = MockDocument::new();
        let scheduler = ManualScheduler::new();
        let mut provider = SnapshotProvider::new(
            SnapshotConfig {
                enabled: false,
                ..Default::default()
            },
            Arc::new(document.clone()),
        );

        assert!(provider.capture().is_none());
        provider.on_paint(&scheduler);
        assert!(scheduler.pending().is_empty());
    }

    #[test]
    fn test_debouncer_keeps_one_pending_timer() {
        let scheduler = ManualScheduler::new();
        let mut debouncer = Debouncer::new(Duration::from_millis(100));

        let first = debouncer.trigger(&scheduler);
        let second = debouncer.trigger(&scheduler);
        let third = debouncer.trigger(&scheduler);

        assert_eq!(scheduler.pending(), vec![third]);
        assert_eq!(scheduler.scheduled_total(), 3);

        assert!(!debouncer.fire(first));
        assert!(!debouncer.fire(second));
        assert!(debouncer.fire(third));
        assert!(!debouncer.fire(third));
        assert!(debouncer.pending().is_none());
    }

    #[test]
    fn test_debouncer_cancel() {
        let scheduler = ManualScheduler::new();
        let mut debouncer = Debouncer::new(Duration::from_millis(100));

        let id = debouncer.trigger(&scheduler);
        debouncer.cancel(&scheduler);

        assert!(scheduler.pending().is_empty());
        assert!(!debouncer.fire(id));
    }
}
