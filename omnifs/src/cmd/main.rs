use std::path::Path;
use std::process;

use clap::{App, Arg};
use log::{error, info};

use omnifs::config::Config;
use omnifs::server;

fn main() {
    env_logger::init();

    let matches = App::new("omnifsd")
        .version("0.1.0")
        .about("Userspace virtual filesystem served over line-delimited JSON on TCP.")
        .arg(
            Arg::with_name("config")
                .long("config")
                .value_name("PATH")
                .help("Configuration file to load at startup.")
                .default_value("config/default.uconf"),
        )
        .arg(
            Arg::with_name("container")
                .long("container")
                .value_name("PATH")
                .help("Container file holding the persisted filesystem.")
                .default_value("data/filesystem.omni"),
        )
        .get_matches();

    let config_path = matches.value_of("config").unwrap();
    let container_path = matches.value_of("container").unwrap();

    let config = match Config::load(Path::new(config_path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config file ({}): {}", config_path, e);
            process::exit(1);
        }
    };

    info!(
        "filesystem: total_size={} block_size={} header_size={} max_files={} max_filename_length={}",
        config.total_size,
        config.block_size,
        config.header_size,
        config.max_files,
        config.max_filename_length
    );
    info!(
        "security: max_users={} admin_username={} require_auth={}",
        config.max_users, config.admin_username, config.require_auth
    );
    info!(
        "server: port={} max_connections={} queue_timeout={}",
        config.port, config.max_connections, config.queue_timeout
    );

    if let Err(e) = server::run(config, Path::new(container_path)) {
        error!("server terminated: {}", e);
        process::exit(1);
    }
}
