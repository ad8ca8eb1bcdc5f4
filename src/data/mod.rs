pub mod source;
pub mod store;
pub mod updater;

pub use source::{BinanceDataSource, MarketDataSource};
pub use store::{IngestReport, RollingWindowStore};
pub use updater::DataUpdater;
