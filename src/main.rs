use std::process;

use flexi_logger::Logger;

fn main() {
    // Keep the handle alive for the whole run; dropping it stops logging.
    let _logger = Logger::try_with_env_or_str("info")
        .and_then(|logger| logger.log_to_stderr().start())
        .ok();

    if let Err(e) = bactquant::run() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
