use std::process::ExitCode;

use serde::Serialize;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use unitctl::{
    cli::{Cli, Commands, parse_args},
    error::SupervisorError,
    supervisor::Supervisor,
};

fn main() -> ExitCode {
    let args = parse_args();
    init_logging(&args);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            debug!("{} error: {err:?}", err.kind().as_ref());
            eprintln!("Error: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

fn run(args: Cli) -> Result<(), SupervisorError> {
    let supervisor = Supervisor::new(args.supervisor_config());

    match args.command {
        Commands::Start { service } => println!("{}", supervisor.start(&service)?),
        Commands::Stop { service } => println!("{}", supervisor.stop(&service)?),
        Commands::Restart { service } => println!("{}", supervisor.restart(&service)?),
        Commands::Status { service, json } => {
            let report = supervisor.status(&service)?;
            if json {
                print_json(&report);
            } else {
                println!("{report}");
            }
        }
        Commands::ListUnits { json } => {
            let listing = supervisor.list_units()?;
            if json {
                print_json(&listing);
            } else {
                println!("{listing}");
            }
        }
        Commands::DaemonReload => {
            println!("Reloading unit files...");
            println!("{}", supervisor.daemon_reload()?);
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(rendered) => println!("{rendered}"),
        Err(err) => error!("Failed to render JSON output: {err}"),
    }
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
