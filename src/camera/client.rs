use super::driver::CameraDriver;
use super::sink::{FrameHandler, FrameRoute, FrameSink};
use crate::domain::DomainHandle;
use crate::error::CaptureError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Front end over a [`CameraDriver`] that allows one capture in flight.
///
/// The in-flight slot holds the cycle id of the pending capture (0 when
/// idle). It is set by [`CaptureClient::trigger`] and cleared either by the
/// delivery for that same cycle or by [`CaptureClient::abandon`].
pub struct CaptureClient {
    driver: Arc<dyn CameraDriver>,
    route: Mutex<Option<Arc<FrameRoute>>>,
    in_flight: Arc<AtomicU64>,
}

impl CaptureClient {
    pub fn new(driver: Arc<dyn CameraDriver>) -> Self {
        Self {
            driver,
            route: Mutex::new(None),
            in_flight: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn driver_name(&self) -> &str {
        self.driver.name()
    }

    /// Prepare the camera. Outcomes are handed to `handler` on the `io`
    /// domain.
    pub async fn initialize(
        &self,
        io: DomainHandle,
        handler: FrameHandler,
    ) -> Result<(), CaptureError> {
        self.driver.initialize().await?;
        *self.route.lock() = Some(Arc::new(FrameRoute::new(
            io,
            Arc::clone(&self.in_flight),
            handler,
        )));
        info!("Capture client initialized with {} camera", self.driver.name());
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.route.lock().is_some()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) != 0
    }

    /// Ask the camera for one frame on behalf of `cycle_id` (non-zero).
    ///
    /// Fails with [`CaptureError::Busy`] while another capture is pending,
    /// leaving that capture untouched.
    pub fn trigger(&self, cycle_id: u64) -> Result<(), CaptureError> {
        if cycle_id == 0 {
            return Err(CaptureError::Driver {
                details: "capture id 0 is reserved".to_string(),
            });
        }

        let route = self
            .route
            .lock()
            .clone()
            .ok_or(CaptureError::NotInitialized)?;

        self.in_flight
            .compare_exchange(0, cycle_id, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| CaptureError::Busy)?;

        debug!("Triggering capture {}", cycle_id);
        if let Err(e) = self.driver.trigger(FrameSink::new(cycle_id, route)) {
            // The driver dropped the sink; make sure the slot is free
            let _ = self.in_flight.compare_exchange(
                cycle_id,
                0,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
            warn!("Camera rejected capture {}: {}", cycle_id, e);
            return Err(e);
        }
        Ok(())
    }

    /// Give up on the pending capture for `cycle_id`. A frame that arrives
    /// afterwards is discarded. Returns `false` if that capture was not
    /// pending.
    pub fn abandon(&self, cycle_id: u64) -> bool {
        let abandoned = self
            .in_flight
            .compare_exchange(cycle_id, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if abandoned {
            warn!("Abandoned capture {}", cycle_id);
        }
        abandoned
    }

    /// Release the camera. Pending captures are abandoned.
    pub async fn close(&self) {
        let pending = self.in_flight.swap(0, Ordering::SeqCst);
        if pending != 0 {
            debug!("Closing camera with capture {} pending", pending);
        }
        self.route.lock().take();
        self.driver.close().await;
        info!("Camera {} closed", self.driver.name());
    }
}
