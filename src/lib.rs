pub mod app;
pub mod codec;
pub mod config;
pub mod error;
#[cfg(feature = "hardware")]
pub mod hardware;
pub mod nmea;
pub mod reading;
pub mod session;
pub mod transport;

pub use app::run_broadcast;
pub use config::BroadcastConfig;
pub use error::{Error, Result};
pub use nmea::{EncodedSentence, SentenceKind};
pub use reading::{ReadingSnapshot, ReadingSource, SimulatedSource};
pub use session::{BroadcastSession, SessionOutcome, SessionState, StopReason};
pub use transport::{Endpoint, SentenceSink, TransportManager, TransportMode};
