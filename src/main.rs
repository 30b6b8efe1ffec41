use std::process::ExitCode;

use clap::Parser;

use matting::cli::{self, CliArgs};
use matting::logger;

fn main() -> ExitCode {
    let args = CliArgs::parse();
    let settings = args.load_settings();
    logger::init(settings.log_level_filter(), args.verbose);
    log::info!("matting {} starting", env!("CARGO_PKG_VERSION"));
    if let Some(path) = logger::log_path() {
        log::debug!("logging to {}", path.display());
    }
    cli::run(args, settings)
}
