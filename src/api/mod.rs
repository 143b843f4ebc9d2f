//! Account access over the LetPot HTTP API.

pub mod client;

pub use client::LetPotClient;
