//! Database telemetry instruments and recording helpers.

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, UpDownCounter};
use opentelemetry::KeyValue;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;

struct DbInstruments {
    queries: Counter<u64>,
    query_errors: Counter<u64>,
    query_duration_seconds: Histogram<f64>,
    rows_read: Counter<u64>,
    rows_inserted: Counter<u64>,
    row_errors: Counter<u64>,
    tables_created: Counter<u64>,
    open_connections: UpDownCounter<i64>,
}

fn instruments() -> &'static DbInstruments {
    static INSTRUMENTS: OnceLock<DbInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("monet_adapter.db");
        DbInstruments {
            queries: meter
                .u64_counter("monet_adapter.db.queries")
                .with_description("Commands submitted to MonetDB")
                .init(),
            query_errors: meter
                .u64_counter("monet_adapter.db.query.errors")
                .with_description("Commands that failed in transport or decoding")
                .init(),
            query_duration_seconds: meter
                .f64_histogram("monet_adapter.db.query.duration")
                .with_description("Round-trip duration of MonetDB commands")
                .with_unit("s")
                .init(),
            rows_read: meter
                .u64_counter("monet_adapter.db.rows.read")
                .with_description("Rows decoded from MonetDB result sets")
                .init(),
            rows_inserted: meter
                .u64_counter("monet_adapter.db.rows.inserted")
                .with_description("Rows inserted into MonetDB")
                .init(),
            row_errors: meter
                .u64_counter("monet_adapter.db.row.errors")
                .with_description("Rows that could not be scanned into samples")
                .init(),
            tables_created: meter
                .u64_counter("monet_adapter.catalog.tables.created")
                .with_description("Tables created by the adapter")
                .init(),
            open_connections: meter
                .i64_up_down_counter("monet_adapter.db.connections.open")
                .with_description("Connections currently open to MonetDB")
                .init(),
        }
    })
}

pub fn record_query(duration_seconds: f64, outcome: &'static str) {
    let i = instruments();
    let attrs = [KeyValue::new("outcome", outcome)];
    i.queries.add(1, &attrs);
    i.query_duration_seconds.record(duration_seconds, &attrs);
    if outcome != "ok" {
        i.query_errors.add(1, &attrs);
    }
}

pub fn record_rows_read(rows: u64) {
    instruments().rows_read.add(rows, &[]);
}

pub fn record_rows_inserted(rows: u64) {
    instruments().rows_inserted.add(rows, &[]);
}

pub fn record_row_error() {
    instruments().row_errors.add(1, &[]);
}

pub fn record_table_created() {
    instruments().tables_created.add(1, &[]);
}

/// Record the sampled open-connection count as a delta against the last sample.
pub fn record_open_connections(open: usize) {
    static LAST: AtomicI64 = AtomicI64::new(0);
    let open = open as i64;
    let previous = LAST.swap(open, Ordering::Relaxed);
    if open != previous {
        instruments().open_connections.add(open - previous, &[]);
    }
}
