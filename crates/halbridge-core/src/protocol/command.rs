//! Control commands and the outbound command filter.
//!
//! MegaHAL executes any input containing the marker `#` immediately followed
//! by one of its command keywords, wherever it appears in the line. Chat text
//! is scanned against the fixed keyword table below and every marker+keyword
//! token is cut out before the text reaches the subprocess.

/// Marker character that introduces a control command.
pub const MARKER: u8 = b'#';

/// Administrative commands understood by the subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlCommand {
    Quit,
    Exit,
    Save,
    Delay,
    Speech,
    Voices,
    Voice,
    Brain,
    Help,
    Quiet,
}

impl ControlCommand {
    /// Every command, longest keyword first where one is a prefix of another.
    pub const ALL: [Self; 10] = [
        Self::Quit,
        Self::Exit,
        Self::Save,
        Self::Delay,
        Self::Speech,
        Self::Voices,
        Self::Voice,
        Self::Brain,
        Self::Help,
        Self::Quiet,
    ];

    /// Upper-case keyword as listed in the subprocess's help text.
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::Quit => "QUIT",
            Self::Exit => "EXIT",
            Self::Save => "SAVE",
            Self::Delay => "DELAY",
            Self::Speech => "SPEECH",
            Self::Voices => "VOICES",
            Self::Voice => "VOICE",
            Self::Brain => "BRAIN",
            Self::Help => "HELP",
            Self::Quiet => "QUIET",
        }
    }

    /// Payload that issues this command, e.g. `#save`.
    pub fn wire(self) -> String {
        format!("{}{}", MARKER as char, self.keyword().to_ascii_lowercase())
    }

    /// Match a keyword at the start of `rest`, ignoring ASCII case.
    fn at_start_of(rest: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|cmd| {
            let keyword = cmd.keyword().as_bytes();
            rest.get(..keyword.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(keyword))
        })
    }
}

/// Remove every control command from `text` and trim the result.
///
/// Only the marker run and the keyword are removed; the rest of the message
/// survives. The scan repeats until nothing changes, so a removal can never
/// splice a fresh command together (`##qu#quitit` becomes empty).
pub fn sanitize(text: &str) -> String {
    let mut current = strip_commands(text);
    loop {
        let next = strip_commands(&current);
        if next.len() == current.len() {
            break;
        }
        current = next;
    }
    current.trim().to_string()
}

fn strip_commands(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    // Start of the slice not yet copied into `out`.
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != MARKER {
            i += 1;
            continue;
        }
        let run_end = i + bytes[i..].iter().take_while(|&&b| b == MARKER).count();
        match ControlCommand::at_start_of(&bytes[run_end..]) {
            Some(cmd) => {
                // Marker and keyword are ASCII, so both ends are char boundaries.
                out.push_str(&text[copied..i]);
                i = run_end + cmd.keyword().len();
                copied = i;
            }
            None => i = run_end,
        }
    }
    out.push_str(&text[copied..]);
    out
}
