mod driver;
mod line;
mod mock;
#[cfg(all(target_os = "linux", feature = "hardware-gpio"))]
mod cdev;

pub use driver::{Direction, Level, PeripheralDriver, PinHandle, Polarity};
pub use line::GpioLine;
pub use mock::{GpioOp, MockPeripheralDriver};
#[cfg(all(target_os = "linux", feature = "hardware-gpio"))]
pub use cdev::CdevPeripheralDriver;
