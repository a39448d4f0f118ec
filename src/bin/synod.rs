use std::env;
use std::process;

use log::{error, LevelFilter};

use synod::config::USAGE;
use synod::{Outcome, Simulation, SimulationConfig};

fn main() {
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.iter().any(|arg| arg == "-h" || arg == "--help") {
        println!("{}", USAGE);
        return;
    }

    let config = match SimulationConfig::load(args) {
        Ok(config) => config,
        Err(err) => {
            error!("{}", err);
            eprintln!("{}", USAGE);
            process::exit(1);
        }
    };

    match Simulation::new(config).run() {
        Ok(Outcome::Decided { .. }) => {}
        Ok(Outcome::TimedOut { .. }) => process::exit(1),
        Err(err) => {
            error!("{}", err);
            process::exit(1);
        }
    }
}
