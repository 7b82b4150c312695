// QMK RGB backlight driver - shared library
// Registry of live backlights and the load/unload glue around it

pub mod driver;
pub mod led_class;
pub mod registry;

pub use driver::{Driver, DriverConfig, FeedKind};
pub use led_class::{LocalLedClass, SetColorError};
pub use registry::{AttachOutcome, BacklightRegistry, ScanEntry};
