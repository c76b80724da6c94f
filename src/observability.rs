use biometrics::{Collector, Counter, Moments};

pub(crate) static SESSION_SUBMITS: Counter = Counter::new("streamchat.session.submits");
pub(crate) static SESSION_COMPLETIONS: Counter = Counter::new("streamchat.session.completions");
pub(crate) static SESSION_FAILURES: Counter = Counter::new("streamchat.session.failures");
pub(crate) static SESSION_CANCELLATIONS: Counter =
    Counter::new("streamchat.session.cancellations");
pub(crate) static SESSION_MISSING_CREDENTIAL: Counter =
    Counter::new("streamchat.session.missing_credential");

pub(crate) static STREAM_FRAMES: Counter = Counter::new("streamchat.stream.frames");
pub(crate) static STREAM_MALFORMED_FRAMES: Counter =
    Counter::new("streamchat.stream.malformed_frames");
pub(crate) static STREAM_BYTES: Counter = Counter::new("streamchat.stream.bytes");
pub(crate) static STREAM_TTFB: Moments = Moments::new("streamchat.stream.ttfb_seconds");
pub(crate) static STREAM_DURATION: Moments = Moments::new("streamchat.stream.duration_seconds");

pub(crate) static STORE_ERRORS: Counter = Counter::new("streamchat.store.errors");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&SESSION_SUBMITS);
    collector.register_counter(&SESSION_COMPLETIONS);
    collector.register_counter(&SESSION_FAILURES);
    collector.register_counter(&SESSION_CANCELLATIONS);
    collector.register_counter(&SESSION_MISSING_CREDENTIAL);

    collector.register_counter(&STREAM_FRAMES);
    collector.register_counter(&STREAM_MALFORMED_FRAMES);
    collector.register_counter(&STREAM_BYTES);
    collector.register_moments(&STREAM_TTFB);
    collector.register_moments(&STREAM_DURATION);

    collector.register_counter(&STORE_ERRORS);
}
