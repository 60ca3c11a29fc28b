//! Client side: peer links, the transfer engine, and the session
//! coordinator that ties them to the signaling channel.

pub mod cli;
pub mod peer;
pub mod session;
pub mod tracker;
pub mod transfer;
pub mod validate;
