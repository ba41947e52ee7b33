//! Entry point of the sample service binary.
//!
//! Delegates to [`sample_service::run`], which installs, uninstalls or hosts
//! the service depending on the verb.

use std::io;
use std::process;

fn main() {
    let status = sample_service::run(std::env::args_os(), &mut io::stdout(), &mut io::stderr());
    process::exit(status.code());
}
