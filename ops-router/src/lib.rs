mod command;
mod dispatch;

pub use command::{extract_speaker, parse_command, parse_line, Command};
pub use dispatch::{CommandHandlerT, CommandRouter};
