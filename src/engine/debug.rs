// ── Laminark Engine: Debug Logging ─────────────────────────────────────────
// LAMINARK_DEBUG=1 turns on stderr logs in the form
//   [ISO_TS] [LAMINARK:category] message
// where `category` is the last segment of the module path. Anything else
// (unset, 0, empty) leaves logging off entirely.

use std::io::Write;

/// Install the global logger. Safe to call more than once; later calls
/// are no-ops. Call this from every binary entry point before first use.
pub fn init_logging() {
    let enabled = std::env::var("LAMINARK_DEBUG")
        .map(|v| v == "1")
        .unwrap_or(false);

    let level = if enabled {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Off
    };

    let _ = env_logger::Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
            let category = record
                .target()
                .rsplit("::")
                .next()
                .unwrap_or(record.target());
            writeln!(buf, "[{ts}] [LAMINARK:{category}] {}", record.args())
        })
        .target(env_logger::Target::Stderr)
        .try_init();
}
