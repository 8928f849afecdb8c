pub mod hhmm;
pub mod logging;

pub use logging::init_logging;
