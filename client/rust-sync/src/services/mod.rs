pub mod classifier;
pub mod coordinator;
pub mod fetcher;
pub mod resolver;
pub mod writer;

pub use classifier::{ChartDecoder, Classified, DecodeOutcome, PayloadClassifier};
pub use coordinator::{HydrationCoordinator, LogNotifier, NotificationSink};
pub use fetcher::{FetchOutcome, RemoteAnswerFetcher};
pub use writer::{DualStoreWriter, IncomingAnswer};
