mod args;
mod client;
mod config;
mod error;
mod hub;
mod protocol;
mod signaling;
mod utils;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use args::{Args, Command};
use client::session::JoinOptions;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Note: webrtc_ice logs "unknown TransactionID" warnings for
    // late-arriving STUN responses, which are normal. Keep them quiet
    // below -vvv.
    let filter = match args.verbose {
        0 => "warn,roomdrop=info,webrtc_ice::agent=error",
        1 => "info,webrtc_ice::agent=error",
        2 => "debug,webrtc_ice::agent=error",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let ice = args.command.ice_config();
    match args.command {
        Command::Serve { addr } => hub::server::run(&addr).await,
        Command::Join {
            room,
            create,
            hub,
            save_dir,
            ..
        } => {
            client::cli::run(JoinOptions {
                hub_url: hub,
                room_id: room,
                create,
                ice,
                save_dir,
            })
            .await
        }
    }
}
