use crate::domain::DomainHandle;
use crate::error::CaptureError;
use crate::frame::ImageBuffer;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of one capture request, tagged with the cycle that asked for it
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub cycle_id: u64,
    pub result: Result<ImageBuffer, CaptureError>,
}

/// Receives capture outcomes on the I/O domain
pub type FrameHandler = Arc<dyn Fn(CaptureOutcome) + Send + Sync>;

pub(crate) struct FrameRoute {
    io: DomainHandle,
    in_flight: Arc<AtomicU64>,
    handler: FrameHandler,
}

impl FrameRoute {
    pub(crate) fn new(io: DomainHandle, in_flight: Arc<AtomicU64>, handler: FrameHandler) -> Self {
        Self {
            io,
            in_flight,
            handler,
        }
    }

    fn dispatch(&self, cycle_id: u64, result: Result<ImageBuffer, CaptureError>) {
        // Only the capture that is still in flight may clear the slot
        if self
            .in_flight
            .compare_exchange(cycle_id, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Discarding late frame for abandoned capture {}", cycle_id);
            return;
        }

        let handler = Arc::clone(&self.handler);
        let outcome = CaptureOutcome { cycle_id, result };
        if let Err(e) = self.io.post(async move { handler(outcome) }) {
            warn!("Dropping frame for capture {}: {}", cycle_id, e);
        }
    }
}

/// One-shot slot a camera driver fills with the captured frame.
///
/// Delivery moves the sink, so a driver can answer a capture at most once.
/// A sink dropped without delivery reports [`CaptureError::FrameDropped`].
pub struct FrameSink {
    cycle_id: u64,
    route: Option<Arc<FrameRoute>>,
}

impl FrameSink {
    pub(crate) fn new(cycle_id: u64, route: Arc<FrameRoute>) -> Self {
        Self {
            cycle_id,
            route: Some(route),
        }
    }

    pub fn cycle_id(&self) -> u64 {
        self.cycle_id
    }

    pub fn deliver(mut self, image: ImageBuffer) {
        self.dispatch(Ok(image));
    }

    pub fn fail(mut self, error: CaptureError) {
        self.dispatch(Err(error));
    }

    fn dispatch(&mut self, result: Result<ImageBuffer, CaptureError>) {
        if let Some(route) = self.route.take() {
            route.dispatch(self.cycle_id, result);
        }
    }
}

impl Drop for FrameSink {
    fn drop(&mut self) {
        if self.route.is_some() {
            warn!("Camera dropped capture {} without a frame", self.cycle_id);
            self.dispatch(Err(CaptureError::FrameDropped));
        }
    }
}

impl std::fmt::Debug for FrameSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSink")
            .field("cycle_id", &self.cycle_id)
            .field("pending", &self.route.is_some())
            .finish()
    }
}
