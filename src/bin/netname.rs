use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use log::{Level, error, info};

use netname::config::{self, NetworkConfig};
use netname::fallback::generate_fallback_config;
use netname::logger::init_logger;
use netname::netlink::NetlinkLinkOps;
use netname::rename::apply_renames;
use netname::sysfs::SysClassNet;

struct Args {
    config: Option<PathBuf>,
    strict_present: bool,
    strict_busy: bool,
    debug: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        config: None,
        strict_present: false,
        strict_busy: false,
        debug: false,
    };
    let mut iter = env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter
                    .next()
                    .ok_or_else(|| anyhow!("--config requires a path"))?;
                args.config = Some(PathBuf::from(path));
            }
            "--strict-present" => args.strict_present = true,
            "--strict-busy" => args.strict_busy = true,
            "--debug" => args.debug = true,
            other => return Err(anyhow!("unknown argument: {}", other)),
        }
    }
    Ok(args)
}

fn run(args: &Args) -> Result<()> {
    let reader = SysClassNet::new();

    match &args.config {
        Some(path) => {
            let cfg = NetworkConfig::from_file(path)?;
            let renames = config::rename_requests(&cfg);
            info!("Applying {} interface renames", renames.len());
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("unable to create tokio runtime")?;
            let links = NetlinkLinkOps::new(rt.handle().clone())?;
            apply_renames(
                &reader,
                &links,
                &renames,
                args.strict_present,
                args.strict_busy,
            )
        }
        None => match generate_fallback_config(&reader)? {
            Some(cfg) => {
                info!("Generated fallback network configuration");
                let out = serde_json::to_string_pretty(&cfg)
                    .map_err(|e| anyhow!("unable to serialize configuration: {}", e))?;
                println!("{}", out);
                Ok(())
            }
            None => {
                info!("No usable network interface found");
                Ok(())
            }
        },
    }
}

fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    // Use eprintln! here in case the logger does not initialize.
    if let Err(e) = init_logger(if args.debug { Level::Debug } else { Level::Info }) {
        eprintln!("unable to initialize logger: {}", e);
        return ExitCode::FAILURE;
    }
    if let Err(e) = run(&args) {
        error!("{:#}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
