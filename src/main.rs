use env_logger::Env;

use crate::cli::run;

pub mod cli;
mod config;
pub mod domain;
pub mod http;
pub mod ledger;
pub mod pin;
pub mod storage;
pub mod transfer;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    run()
}
