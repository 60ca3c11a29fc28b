//! Command-line argument parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::client::peer::IceConfig;
use crate::config::{
    DEFAULT_HUB_ADDR, DEFAULT_STUN_URL, DEFAULT_TURN_CREDENTIAL, DEFAULT_TURN_URL,
    DEFAULT_TURN_USERNAME,
};

/// roomdrop: room-based peer-to-peer file drop.
#[derive(Parser, Debug)]
#[command(author, version, about)]
#[command(propagate_version = true)]
pub struct Args {
    /// Verbosity level (-v, -vv, -vvv).
    #[clap(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the signaling hub.
    Serve {
        /// Listen address.
        #[clap(long, default_value = DEFAULT_HUB_ADDR)]
        addr: String,
    },

    /// Join a room and exchange files with its members.
    Join {
        /// Room id (at least 8 characters).
        room: String,

        /// Create the room instead of requiring it to exist.
        #[clap(long)]
        create: bool,

        /// HTTP base of the hub.
        #[clap(long, default_value = "http://127.0.0.1:5000")]
        hub: String,

        /// Directory that `save` writes received files into.
        #[clap(long, default_value = ".")]
        save_dir: PathBuf,

        /// STUN server URL.
        #[clap(long, default_value = DEFAULT_STUN_URL)]
        stun: String,

        /// TURN relay URL.
        #[clap(long, default_value = DEFAULT_TURN_URL)]
        turn: String,

        /// TURN username.
        #[clap(long, default_value = DEFAULT_TURN_USERNAME)]
        turn_username: String,

        /// TURN credential.
        #[clap(long, default_value = DEFAULT_TURN_CREDENTIAL)]
        turn_credential: String,
    },
}

impl Command {
    /// Assemble the ICE configuration for a `join` invocation.
    pub fn ice_config(&self) -> IceConfig {
        match self {
            Command::Join {
                stun,
                turn,
                turn_username,
                turn_credential,
                ..
            } => IceConfig {
                stun_url: stun.clone(),
                turn_url: turn.clone(),
                turn_username: turn_username.clone(),
                turn_credential: turn_credential.clone(),
            },
            Command::Serve { .. } => IceConfig::default(),
        }
    }
}
