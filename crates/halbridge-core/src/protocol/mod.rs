//! MegaHAL line protocol.
//!
//! Outbound frames are `<payload>\n\n`: the payload followed by a blank line.
//! Inbound frames are single `\n`-terminated lines, one per reply.

mod command;
mod lines;

pub use command::{ControlCommand, MARKER, sanitize};
pub use lines::LineBuffer;

/// Frame a payload for the subprocess's stdin.
pub fn frame(payload: &str) -> String {
    format!("{payload}\n\n")
}
