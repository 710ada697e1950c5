pub mod error;
pub mod handler;
pub mod negotiation;
pub mod stats;
pub mod transfer;
pub mod transport;

pub use error::ClientError;
pub use handler::{ClientHandler, ConnectionParameters};
pub use negotiation::{negotiate, TransportFactory, TransportFactoryV1};
pub use stats::{RateTracker, StatisticsBroadcaster, TransferStatistics};
pub use transfer::{DownloadRequest, UploadRequest};
pub use transport::{ServerAddress, Transport, MAX_SEND_ATTEMPTS};
