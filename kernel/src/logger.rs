//! Wires the `log` facade to the kernel's existing `printf!`/`Console`
//! path, so the rest of the kernel can use `log::{trace,debug,warn,...}!`
//! instead of the ad hoc, never-actually-enabled `debug_log!` macro.

use log::{Level, LevelFilter, Log, Metadata, Record};

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let level = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };

        printf!("[{}] {}\n", level, record.args());
    }

    fn flush(&self) {}
}

/// Install the kernel logger. Call once, early in `kmain` on hart 0,
/// before any subsystem that logs runs. The max level is fixed at
/// build time rather than read from a config file -- there is no
/// filesystem to read one from yet at this point in boot.
pub fn init() {
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(LevelFilter::Trace))
        .expect("logger already installed");
}
