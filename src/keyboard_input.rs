use crate::app::{ShutdownHandle, ShutdownReason};
use crate::error::Result;
use crate::gpio::{MockPeripheralDriver, Polarity};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::sync::Arc;
use std::time::Duration;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long a simulated press holds the line in its active level
const PRESS_HOLD: Duration = Duration::from_millis(150);

/// Keyboard-driven button for running without hardware.
///
/// SPACE drives the mock button line through a press and release, so the
/// press goes through the same sampling and debouncing as a real one.
pub struct KeyboardInputHandler {
    driver: Arc<MockPeripheralDriver>,
    button_pin: String,
    polarity: Polarity,
    shutdown: ShutdownHandle,
    cancellation_token: CancellationToken,
}

impl KeyboardInputHandler {
    pub fn new(
        driver: Arc<MockPeripheralDriver>,
        button_pin: &str,
        polarity: Polarity,
        shutdown: ShutdownHandle,
    ) -> Self {
        Self {
            driver,
            button_pin: button_pin.to_string(),
            polarity,
            shutdown,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Simulate one press and release of the button line
    pub fn press(&self) {
        press_line(&self.driver, &self.button_pin, self.polarity);
    }

    /// Start listening for keyboard input
    pub fn start(&self) -> Result<()> {
        info!("Starting keyboard input handler - press SPACE to ring, q to quit");

        let driver = Arc::clone(&self.driver);
        let button_pin = self.button_pin.clone();
        let polarity = self.polarity;
        let shutdown = self.shutdown.clone();
        let cancellation_token = self.cancellation_token.clone();

        task::spawn_blocking(move || {
            if let Err(e) = enable_raw_mode() {
                error!("Failed to enable raw mode for keyboard input: {}", e);
                return;
            }

            debug!("Raw mode enabled - keyboard handler active");

            loop {
                if cancellation_token.is_cancelled() {
                    debug!("Keyboard input handler stopping");
                    break;
                }

                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {
                        let Ok(Event::Key(key_event)) = event::read() else {
                            continue;
                        };
                        if key_event.kind != KeyEventKind::Press {
                            continue;
                        }

                        match key_event.code {
                            KeyCode::Char(' ') => {
                                info!("Space bar pressed - ringing the doorbell");
                                press_line(&driver, &button_pin, polarity);
                            }
                            KeyCode::Char('q') | KeyCode::Esc => {
                                info!("Quit key pressed - requesting shutdown");
                                shutdown.request(ShutdownReason::UserRequest);
                                break;
                            }
                            other => debug!("Key pressed: {:?}", other),
                        }
                    }
                    Ok(false) => {}
                    Err(e) => warn!("Error polling for keyboard events: {}", e),
                }
            }

            if let Err(e) = disable_raw_mode() {
                error!("Failed to disable raw mode: {}", e);
            }

            debug!("Keyboard input handler task exited");
        });

        Ok(())
    }

    /// Stop the keyboard input handler
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping keyboard input handler");
        self.cancellation_token.cancel();

        // Let the poll loop notice and restore the terminal
        tokio::time::sleep(Duration::from_millis(200)).await;

        let _ = disable_raw_mode();

        Ok(())
    }
}

fn press_line(driver: &MockPeripheralDriver, line: &str, polarity: Polarity) {
    driver.set_level(line, polarity.level_for(true));
    std::thread::sleep(PRESS_HOLD);
    driver.set_level(line, polarity.level_for(false));
}
