use std::path::Path;

use clap::{App, Arg, SubCommand};

use omnifs::config::Config;
use omnifs::io::Container;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let matches = App::new("omni_util")
        .version("0.1.0")
        .about("Maintenance tooling for omnifs container files.")
        .subcommand(
            SubCommand::with_name("fmt")
                .about("Formats a fresh, empty container from a configuration file.")
                .arg(
                    Arg::with_name("PATH")
                        .help("Path of the container file to create.")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::with_name("config")
                        .long("config")
                        .value_name("PATH")
                        .help("Configuration file describing the filesystem geometry.")
                        .default_value("config/default.uconf"),
                ),
        )
        .get_matches();

    if let Some(command) = matches.subcommand_matches("fmt") {
        let path = command.value_of("PATH").unwrap();
        let config = Config::load(Path::new(command.value_of("config").unwrap()))?;
        Container::new(path).format(&config)?;
        println!("Formatted {} ({} bytes)", path, config.total_size);
        return Ok(());
    }

    println!("{}", matches.usage());
    std::process::exit(2)
}
