use std::{error::Error, net::SocketAddr};

use clap::Parser;
use log::info;
use pong::{Client, ClientConfig};
use serde_json::Value;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server to exchange messages with
    #[arg(default_value = "127.0.0.1:2000")]
    address: SocketAddr,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut client = Client::connect(ClientConfig::new(cli.address))?;
    info!("{client}");
    client.start()?;

    let small = "Hello, World!".to_string();
    let big = " ".repeat(2048);

    for (name, payload) in [("small", small), ("big", big)] {
        client.send(&payload)?;
        let echoed = client.receive_json()?;
        let matches = echoed.as_ref().and_then(Value::as_str) == Some(payload.as_str());
        info!("{name} round trip matches: {matches}");
    }

    client.stop();
    Ok(())
}
