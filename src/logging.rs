//! Process-wide logger: `timestamp  LEVEL  target  message`, with the `lofi::` prefix stripped.

use std::io::Write;

use env_logger::{Builder, Env};

/// Environment variable holding an env_logger filter, e.g. `info,lofi::dsp=trace`.
pub const LOG_ENV: &str = "LOFI_LOG";

#[cfg(debug_assertions)]
const DEFAULT_FILTER: &str = "debug";
#[cfg(not(debug_assertions))]
const DEFAULT_FILTER: &str = "info";

pub fn init_logging() {
    let _ = builder().try_init();
}

fn builder() -> Builder {
    let mut builder = Builder::from_env(Env::default().filter_or(LOG_ENV, DEFAULT_FILTER));
    builder.format(|buf, record| {
        let ts = buf.timestamp_seconds();
        let style = buf.default_level_style(record.level());
        writeln!(
            buf,
            "{ts}  {style}{level:5}{style:#}  {target:5}  {message}",
            ts = ts,
            style = style,
            level = record.level(),
            target = short_target(record.target()),
            message = record.args()
        )
    });
    builder
}

fn short_target(target: &str) -> &str {
    target.strip_prefix("lofi::").unwrap_or(target)
}
