use std::fs::OpenOptions;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use biometrics::{Collector, Counter, Moments, PlainTextEmitter};

use crate::error::Result;

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("mstech.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter = Counter::new("mstech.client.request_errors");
pub(crate) static CLIENT_REQUEST_DURATION: Moments =
    Moments::new("mstech.client.request_duration_seconds");

pub(crate) static STREAM_RECORDS: Counter = Counter::new("mstech.stream.records");
pub(crate) static STREAM_SKIPPED_RECORDS: Counter = Counter::new("mstech.stream.skipped_records");
pub(crate) static STREAM_ERRORS: Counter = Counter::new("mstech.stream.errors");
pub(crate) static STREAM_BYTES: Counter = Counter::new("mstech.stream.bytes");

pub(crate) static CHAT_EXCHANGES: Counter = Counter::new("mstech.chat.exchanges");
pub(crate) static CHAT_EXCHANGE_FAILURES: Counter = Counter::new("mstech.chat.exchange_failures");
pub(crate) static CHAT_EXCHANGE_DURATION: Moments =
    Moments::new("mstech.chat.exchange_duration_seconds");

pub(crate) static CONTACT_SUBMISSIONS: Counter = Counter::new("mstech.contact.submissions");
pub(crate) static CONTACT_REJECTED: Counter = Counter::new("mstech.contact.rejected");
pub(crate) static CONTACT_FAILURES: Counter = Counter::new("mstech.contact.failures");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: &Collector) {
    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_moments(&CLIENT_REQUEST_DURATION);

    collector.register_counter(&STREAM_RECORDS);
    collector.register_counter(&STREAM_SKIPPED_RECORDS);
    collector.register_counter(&STREAM_ERRORS);
    collector.register_counter(&STREAM_BYTES);

    collector.register_counter(&CHAT_EXCHANGES);
    collector.register_counter(&CHAT_EXCHANGE_FAILURES);
    collector.register_moments(&CHAT_EXCHANGE_DURATION);

    collector.register_counter(&CONTACT_SUBMISSIONS);
    collector.register_counter(&CONTACT_REJECTED);
    collector.register_counter(&CONTACT_FAILURES);
}

/// Append one plain-text reading of every registered sensor to `path`.
pub fn emit_biometrics(collector: &Collector, path: &Path) -> Result<()> {
    let output = OpenOptions::new().create(true).append(true).open(path)?;
    let mut emitter = PlainTextEmitter::new(output);
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default();
    collector.emit(&mut emitter, now)?;
    Ok(())
}
