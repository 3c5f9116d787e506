use biometrics::{Collector, Counter, Moments};

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("parley.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter = Counter::new("parley.client.request_errors");
pub(crate) static CLIENT_REQUEST_DURATION: Moments =
    Moments::new("parley.client.request_duration_seconds");

pub(crate) static STREAM_CHUNKS: Counter = Counter::new("parley.stream.chunks");
pub(crate) static STREAM_BYTES: Counter = Counter::new("parley.stream.bytes");
pub(crate) static STREAM_TOKENS: Counter = Counter::new("parley.stream.tokens");
pub(crate) static STREAM_FRAME_ERRORS: Counter = Counter::new("parley.stream.frame_errors");
pub(crate) static STREAM_DURATION: Moments = Moments::new("parley.stream.duration_seconds");

pub(crate) static PERSIST_SAVES: Counter = Counter::new("parley.persist.saves");
pub(crate) static PERSIST_FAILURES: Counter = Counter::new("parley.persist.failures");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_moments(&CLIENT_REQUEST_DURATION);

    collector.register_counter(&STREAM_CHUNKS);
    collector.register_counter(&STREAM_BYTES);
    collector.register_counter(&STREAM_TOKENS);
    collector.register_counter(&STREAM_FRAME_ERRORS);
    collector.register_moments(&STREAM_DURATION);

    collector.register_counter(&PERSIST_SAVES);
    collector.register_counter(&PERSIST_FAILURES);
}
