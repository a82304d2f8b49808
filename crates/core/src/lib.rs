pub mod config;
pub mod config_loader;
pub mod events;
pub mod kelly;
pub mod position;
pub mod traits;
pub mod types;

pub use config::{
    AppConfig, ClobConfig, EdgeConfig, ExitConfig, LifecycleConfig, OddsConfig, PaperConfig,
    RiskConfig, ScheduleConfig, StoreConfig, TrackerConfig,
};
pub use config_loader::{ConfigError, ConfigLoader};
pub use events::{ChannelEventSink, EngineEvent, EventSink, NullEventSink, TracingEventSink};
pub use kelly::{KellySizer, KellyStake};
pub use position::{PendingEntry, Position, PositionStatus, TransitionError};
pub use traits::{
    EntryRequest, PositionStore, PriceFeed, RiskDecision, RiskGate, StoreError,
};
pub use types::{Asset, Outcome, PriceSample};
