pub mod clock;
pub mod config;
pub mod game;
pub mod sim;
pub mod snapshot;
pub mod synchronizer;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use game::{GameCommandError, GameLocator, GameReadError, LiveGame, PlayerId};
pub use snapshot::{PlayerRecord, ShipRecord, Snapshot};
pub use synchronizer::{SyncCycle, SyncReport, Synchronizer};
pub use telemetry::{DedupWindow, TelemetryExtractor};
