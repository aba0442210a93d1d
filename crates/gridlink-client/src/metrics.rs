//! # Client Metrics
//!
//! With the `metrics` feature enabled, transfer and submission activity is
//! recorded as OpenTelemetry counters on the globally installed meter
//! provider. Install the provider before the first client call; instruments
//! are created lazily on first use.
//!
//! Without the feature every function below compiles to a no-op.

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Meter};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(feature = "metrics")]
struct Instruments {
    bytes_uploaded: Counter<u64>,
    chunks_uploaded: Counter<u64>,
    bytes_downloaded: Counter<u64>,
    transfer_errors: Counter<u64>,
    blobs_created: Counter<u64>,
    tasks_submitted: Counter<u64>,
}

#[cfg(feature = "metrics")]
static INSTRUMENTS: OnceLock<Instruments> = OnceLock::new();

#[cfg(feature = "metrics")]
fn instruments() -> &'static Instruments {
    INSTRUMENTS.get_or_init(|| {
        let meter: Meter = opentelemetry::global::meter("gridlink-client");
        Instruments {
            bytes_uploaded: meter
                .u64_counter("bytes_uploaded")
                .with_unit("By")
                .with_description("Blob bytes written to upload streams")
                .build(),
            chunks_uploaded: meter
                .u64_counter("chunks_uploaded")
                .with_description("Upload frames written")
                .build(),
            bytes_downloaded: meter
                .u64_counter("bytes_downloaded")
                .with_unit("By")
                .with_description("Blob bytes received from download streams")
                .build(),
            transfer_errors: meter
                .u64_counter("transfer_errors")
                .with_description("Failed or aborted upload/download streams")
                .build(),
            blobs_created: meter
                .u64_counter("blobs_created")
                .with_description("Blobs created, with or without content")
                .build(),
            tasks_submitted: meter
                .u64_counter("tasks_submitted")
                .with_description("Tasks accepted by the cluster")
                .build(),
        }
    })
}

#[cfg(feature = "metrics")]
pub fn record_chunk_uploaded(bytes: u64) {
    let i = instruments();
    i.chunks_uploaded.add(1, &[]);
    i.bytes_uploaded.add(bytes, &[]);
}

#[cfg(not(feature = "metrics"))]
pub fn record_chunk_uploaded(_bytes: u64) {}

#[cfg(feature = "metrics")]
pub fn record_bytes_downloaded(bytes: u64) {
    instruments().bytes_downloaded.add(bytes, &[]);
}

#[cfg(not(feature = "metrics"))]
pub fn record_bytes_downloaded(_bytes: u64) {}

#[cfg(feature = "metrics")]
pub fn increment_transfer_errors() {
    instruments().transfer_errors.add(1, &[]);
}

#[cfg(not(feature = "metrics"))]
pub fn increment_transfer_errors() {}

#[cfg(feature = "metrics")]
pub fn increment_blobs_created(count: u64) {
    instruments().blobs_created.add(count, &[]);
}

#[cfg(not(feature = "metrics"))]
pub fn increment_blobs_created(_count: u64) {}

#[cfg(feature = "metrics")]
pub fn increment_tasks_submitted(count: u64) {
    instruments().tasks_submitted.add(count, &[]);
}

#[cfg(not(feature = "metrics"))]
pub fn increment_tasks_submitted(_count: u64) {}
