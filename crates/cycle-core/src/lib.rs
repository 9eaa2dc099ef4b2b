pub mod config;
pub mod control_loop;
pub mod error;
pub mod stats;
pub mod timebase;

pub use config::{CycleConfig, CycleConfigBuilder, WorkResult, DEFAULT_PERIOD};
pub use control_loop::CycleController;
pub use error::{BoxError, ConfigError, CycleError};
pub use stats::{CycleStats, StatsAccumulator};
pub use timebase::{spin_until, TimeBase};
