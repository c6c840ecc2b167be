mod circuit;
mod classifier;
mod protocol;
mod transport;
#[cfg(test)]
mod tests;

pub use circuit::{BackoffPolicy, CircuitBreaker, CircuitState, CircuitTransition};
pub use classifier::ClassificationClient;
pub use protocol::{normalize_confidence, parse_response, ClassifyResponse, ClassifyResponseData, WireBoundingBox, WireDetection};
pub use transport::{ClassificationTransport, HttpTransport, ServiceHealth, TransportResponse};
