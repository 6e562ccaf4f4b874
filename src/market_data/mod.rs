pub mod dispatcher;
pub mod live_price;
pub mod price_series;
pub mod protocol;
pub mod snapshot;

pub use dispatcher::{DispatchStats, StreamDispatcher};
pub use live_price::LivePriceBook;
pub use price_series::RollingSeriesStore;
pub use protocol::{Candle, StreamKind};
pub use snapshot::{IndicatorSnapshot, SnapshotStore};
