use std::env;
use std::sync::Arc;

use anyhow::Context as _;
use socks5_proxy::config::{self, Action, Config, EXIT_FAILURE, EX_USAGE, USAGE};
use socks5_proxy::{listener, log};
use tokio::runtime;

fn main() {
    let argv: Vec<String> = env::args().collect();
    let args: Vec<&str> = argv.iter().skip(1).map(String::as_str).collect();

    let config = match config::parse_args(&args) {
        Ok(Action::Run(config)) => config,
        Ok(Action::ShowUsage) => {
            print_usage();
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("{e}");
            print_usage();
            std::process::exit(EX_USAGE);
        }
    };

    log::init(config.verbose);

    match run(config) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            tracing::error!("{e:#}");
            std::process::exit(EXIT_FAILURE);
        }
    }
}

fn print_usage() {
    let prgm_name = env::args().next().unwrap_or_else(|| "socks5-proxy".to_owned());
    println!("Usage: {prgm_name} {USAGE}");
}

fn run(config: Config) -> anyhow::Result<()> {
    let rt = runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("runtime build failed")?;

    rt.block_on(async {
        let config = Arc::new(config);
        tokio::select! {
            res = listener::serve(config) => res,
            res = tokio::signal::ctrl_c() => res.context("ctrl-c event"),
        }
    })
}
