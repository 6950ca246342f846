use std::{
    error::Error,
    fs::{self, OpenOptions},
    io::{self, Write},
    net::SocketAddr,
    path::{Path, PathBuf},
};

use clap::Parser;
use env_logger::{Env, Target};
use log::{info, warn};
use pong::{Server, ServerConfig, Shell, cli::INTRO, prompt};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Serve at this address right away instead of opening the shell
    #[arg(long)]
    listen: Option<SocketAddr>,
    /// Maximum number of connected clients, 0 for unbounded
    #[arg(long, default_value_t = 0)]
    capacity: usize,
    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_logging(log_file: Option<&Path>) -> io::Result<()> {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    if let Some(path) = log_file {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn serve(address: SocketAddr, capacity: usize) -> Result<(), Box<dyn Error>> {
    let mut server = Server::new(ServerConfig::new(address).with_capacity(capacity));
    server.setup()?;

    let cancel = server.cancel_handle();
    ctrlc::set_handler(move || {
        info!("interrupt received, stopping server");
        if let Err(e) = cancel.cancel() {
            warn!("failed to wake the server, it stops at its next poll timeout: {e}");
        }
    })?;

    server.run()?;
    Ok(())
}

fn shell() -> Result<(), Box<dyn Error>> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut shell = Shell::new();

    writeln!(stdout, "{INTRO}")?;
    loop {
        let command = match prompt(stdin.lock(), &mut stdout)? {
            Ok(command) => command,
            Err(e) => {
                eprintln!("error: {e}");
                continue;
            }
        };

        if !shell.execute(command, &mut stdout)? {
            break;
        }
        stdout.flush()?;
    }

    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;

    match cli.listen {
        Some(address) => serve(address, cli.capacity),
        None => shell(),
    }
}
