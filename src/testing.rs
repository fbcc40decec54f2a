//! Logging support for the unit tests.

use spin::Once;

struct Logger;

impl log::Log for Logger {
    fn enabled(&self, _metadata: &log::Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &log::Record<'_>) {
        if self.enabled(record.metadata()) {
            let mod_path = record
                .module_path_static()
                .or_else(|| record.module_path())
                .unwrap_or("<n/a>");

            println!("[ {:>5} ] [{}] {}", record.level(), mod_path, record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: Logger = Logger;
static INIT: Once<()> = Once::new();

/// Install the test logger. Can be called from every test.
pub fn init_logging() {
    INIT.call_once(|| {
        // another harness may already own the global logger
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(log::LevelFilter::Trace);
    });
}
