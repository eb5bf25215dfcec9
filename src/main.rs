mod archiver;
mod cli;
mod commands;
mod env_loader;
mod error;

use error::ArchiveError;

fn main() {
    env_loader::load_dotenv();

    if let Err(err) = cli::run() {
        match err.downcast_ref::<ArchiveError>().and_then(ArchiveError::code) {
            Some(code) => eprintln!("error: {} {err:#}", code.as_str()),
            None => eprintln!("error: {err:#}"),
        }
        std::process::exit(1);
    }
}
