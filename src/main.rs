use std::path::PathBuf;
use std::process::exit;
use std::rc::Rc;

use structopt::StructOpt;

use crate::loader::loader::load;
use crate::sim::{load_sim_config, Sim};

mod engine;
mod isa;
mod loader;
mod memory;
mod sim;
#[cfg(test)]
mod sim_tests;

#[derive(StructOpt, Debug)]
#[structopt(name = "Out-of-order CPU simulator")]
struct Opt {
    /// Path of the assembly file to load
    #[structopt(short, long, parse(from_os_str))]
    file: PathBuf,

    /// Sets a custom config file
    #[structopt(short, long, parse(from_os_str), default_value = "sim.yaml")]
    config: PathBuf,

    /// Number of cycles to simulate; 0 runs to completion
    #[structopt(short = "n", long, default_value = "0")]
    cycles: u64,

    /// Base address of the program text
    #[structopt(short, long, default_value = "0")]
    base_address: u32,
}

fn main() {
    env_logger::init();
    let opt = Opt::from_args();

    let config_path = opt.config.to_str().unwrap();
    let config = match load_sim_config(config_path) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("Failed to load {}. Cause: {}", config_path, error);
            exit(1);
        }
    };

    let path = opt.file.to_str().unwrap();
    let program = match load(path, opt.base_address) {
        Ok(program) => Rc::new(program),
        Err(error) => {
            eprintln!("Loading program '{}' failed: {}", path, error);
            exit(1);
        }
    };

    let mut sim = Sim::new(&config);
    sim.load(&program);
    sim.run(opt.cycles);

    let status = if sim.is_finished() { "complete" } else { "stopped" };
    println!(
        "Program {}: {} instructions retired in {} cycles (IPC {:.2})",
        status,
        sim.retired_count(),
        sim.cycle_count(),
        sim.ipc(),
    );
}
