use log::error;
use std::panic;

/// Pretty backtraces on stderr, plus a copy of the panic message in the log
/// file so headless runs leave a trace
pub fn initialize_panic_handler() {
    better_panic::install();

    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());
        let message = panic_info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic_info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        error!("Panic at {location}: {message}");
        log::logger().flush();

        default_hook(panic_info);

        std::process::exit(1);
    }));
}
