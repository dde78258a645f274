use crate::app::{CycleStage, CycleState};
use crate::error::EventBusError;
use crate::gpio::Level;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Events that can occur in the doorbell system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SystemEvent {
    /// The doorbell button was pressed
    ButtonPressed { timestamp: SystemTime },
    /// The doorbell button was released
    ButtonReleased { timestamp: SystemTime },
    /// A press arrived while a capture cycle was active
    PressIgnored { state: CycleState },
    /// The capture cycle moved between states
    CycleStateChanged {
        cycle_id: u64,
        from: CycleState,
        to: CycleState,
    },
    /// A frame was delivered by the camera
    ImageCaptured { cycle_id: u64, bytes: usize },
    /// The classifier returned labels for the captured image
    AnnotationCompleted {
        cycle_id: u64,
        labels: Vec<(String, f32)>,
    },
    /// The event store accepted the record
    EventPublished { cycle_id: u64, event_id: String },
    /// A capture cycle was abandoned
    CycleFailed {
        cycle_id: u64,
        stage: CycleStage,
        error: String,
    },
    /// The heartbeat LED changed level
    HeartbeatToggled { level: Level },
    /// A system error occurred in a component
    SystemError { component: String, error: String },
    /// System shutdown requested
    ShutdownRequested { reason: String },
}

impl SystemEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            SystemEvent::ButtonPressed { .. } => "Button pressed".to_string(),
            SystemEvent::ButtonReleased { .. } => "Button released".to_string(),
            SystemEvent::PressIgnored { state } => {
                format!("Press ignored while {:?}", state)
            }
            SystemEvent::CycleStateChanged { cycle_id, from, to } => {
                format!("Cycle {}: {:?} -> {:?}", cycle_id, from, to)
            }
            SystemEvent::ImageCaptured { cycle_id, bytes } => {
                format!("Cycle {}: captured {} bytes", cycle_id, bytes)
            }
            SystemEvent::AnnotationCompleted { cycle_id, labels } => {
                format!("Cycle {}: {} labels", cycle_id, labels.len())
            }
            SystemEvent::EventPublished { cycle_id, event_id } => {
                format!("Cycle {}: published event {}", cycle_id, event_id)
            }
            SystemEvent::CycleFailed {
                cycle_id,
                stage,
                error,
            } => {
                format!("Cycle {} failed during {:?}: {}", cycle_id, stage, error)
            }
            SystemEvent::HeartbeatToggled { level } => format!("Heartbeat {}", level),
            SystemEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
            SystemEvent::ShutdownRequested { reason } => {
                format!("Shutdown requested: {}", reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            SystemEvent::ButtonPressed { .. } => "button_pressed",
            SystemEvent::ButtonReleased { .. } => "button_released",
            SystemEvent::PressIgnored { .. } => "press_ignored",
            SystemEvent::CycleStateChanged { .. } => "cycle_state_changed",
            SystemEvent::ImageCaptured { .. } => "image_captured",
            SystemEvent::AnnotationCompleted { .. } => "annotation_completed",
            SystemEvent::EventPublished { .. } => "event_published",
            SystemEvent::CycleFailed { .. } => "cycle_failed",
            SystemEvent::HeartbeatToggled { .. } => "heartbeat_toggled",
            SystemEvent::SystemError { .. } => "system_error",
            SystemEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }
}

/// Event bus for observing the pipeline, built on a broadcast channel.
///
/// Publishing never blocks and never fails: with no subscribers the event
/// is simply dropped.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SystemEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers, returning how many received it
    pub fn publish(&self, event: SystemEvent) -> usize {
        match &event {
            SystemEvent::SystemError { component, error } => {
                error!("System error in {}: {}", component, error);
            }
            SystemEvent::ShutdownRequested { reason } => {
                info!("Shutdown requested: {}", reason);
            }
            _ => debug!("Event: {}", event.description()),
        }

        self.sender.send(event).unwrap_or(0)
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if there are any active subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
    /// Accept only events belonging to one capture cycle
    Cycle(u64),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &SystemEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Cycle(id) => match event {
                SystemEvent::CycleStateChanged { cycle_id, .. }
                | SystemEvent::ImageCaptured { cycle_id, .. }
                | SystemEvent::AnnotationCompleted { cycle_id, .. }
                | SystemEvent::EventPublished { cycle_id, .. }
                | SystemEvent::CycleFailed { cycle_id, .. } => cycle_id == id,
                _ => false,
            },
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<SystemEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    /// Create a new event receiver with a filter
    pub fn new(bus: &EventBus, filter: EventFilter, name: impl Into<String>) -> Self {
        Self {
            receiver: bus.subscribe(),
            filter,
            name: name.into(),
        }
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Result<SystemEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged {
                        details: format!("Receiver lagged behind by {} events", n),
                    });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<SystemEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged {
                        details: format!("Receiver lagged behind by {} events", n),
                    });
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Drain every event currently queued that passes the filter
    pub fn drain(&mut self) -> Vec<SystemEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = self.try_recv() {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_basic_operations() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let delivered = event_bus.publish(SystemEvent::ImageCaptured {
            cycle_id: 3,
            bytes: 1024,
        });
        assert_eq!(delivered, 1);

        match receiver.recv().await.unwrap() {
            SystemEvent::ImageCaptured { cycle_id, bytes } => {
                assert_eq!(cycle_id, 3);
                assert_eq!(bytes, 1024);
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let event_bus = EventBus::new(4);
        assert!(!event_bus.has_subscribers());
        assert_eq!(
            event_bus.publish(SystemEvent::HeartbeatToggled { level: Level::High }),
            0
        );
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();
        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.publish(SystemEvent::ButtonPressed {
            timestamp: SystemTime::now(),
        });

        let _ = timeout(Duration::from_millis(100), receiver1.recv())
            .await
            .unwrap()
            .unwrap();
        let _ = timeout(Duration::from_millis(100), receiver2.recv())
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_event_filter() {
        let filter = EventFilter::EventTypes(vec!["button_pressed", "cycle_failed"]);
        let press = SystemEvent::ButtonPressed {
            timestamp: SystemTime::now(),
        };
        let tick = SystemEvent::HeartbeatToggled { level: Level::Low };

        assert!(filter.matches(&press));
        assert!(!filter.matches(&tick));
    }

    #[test]
    fn test_cycle_filter() {
        let filter = EventFilter::Cycle(7);
        assert!(filter.matches(&SystemEvent::CycleStateChanged {
            cycle_id: 7,
            from: CycleState::Idle,
            to: CycleState::Triggering,
        }));
        assert!(!filter.matches(&SystemEvent::ImageCaptured {
            cycle_id: 8,
            bytes: 1,
        }));
        assert!(!filter.matches(&SystemEvent::ButtonReleased {
            timestamp: SystemTime::now(),
        }));
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let event_bus = EventBus::new(10);
        let mut receiver = EventReceiver::new(
            &event_bus,
            EventFilter::EventTypes(vec!["cycle_failed"]),
            "test",
        );

        event_bus.publish(SystemEvent::HeartbeatToggled { level: Level::High });
        event_bus.publish(SystemEvent::CycleFailed {
            cycle_id: 1,
            stage: CycleStage::Annotation,
            error: "timeout".to_string(),
        });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type(), "cycle_failed");
        assert!(receiver.try_recv().unwrap().is_none());
    }
}
