//! Intake services.

pub mod archive;
pub mod runs;
pub mod subscription;

pub use archive::archive_event;
pub use runs::{RunLauncher, SourceRunner};
pub use subscription::confirm_subscription;
