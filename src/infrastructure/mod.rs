pub mod logging;
pub mod wav;

pub use logging::init_logging;
