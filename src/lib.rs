// === Node-side driver for the transaction retry tracker ===
pub mod logging;
pub mod scenario;
pub mod settings;

pub use scenario::{replay, ReplayReport, Scenario};
pub use settings::NodeSettings;
