use std::process;

use kmsutil::cli::{options::Options, KmsUtilClient};

fn main() {
    let options = Options::from_args();

    if let Err(e) = options.general.log_config().init_logging() {
        eprintln!("{}", e);
        process::exit(1);
    }

    process::exit(KmsUtilClient::report(options));
}
