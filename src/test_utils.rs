use tracing::Level;

/// Routes `tracing` output through the test harness so it shows up for failing tests.
pub fn trace_init() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::TRACE)
        .with_test_writer()
        .try_init();
}
