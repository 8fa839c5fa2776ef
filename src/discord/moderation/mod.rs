// Discord adapters for the word filter: the serenity-backed platform port,
// the message hook and the `/filters` admin commands.

pub mod commands;
pub mod filter_handler;
pub mod platform;

pub use filter_handler::handle_message_for_filters;
