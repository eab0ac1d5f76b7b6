//! Injection guard for rendered RCON commands.
//!
//! A "safe command" resolves a session index and renders a command template
//! against it before submission (see `ops-rcon`). The rendered string must
//! never carry characters that could smuggle a second command or line into
//! the RCON session.

const BANNED: [char; 4] = ['\n', '\r', ';', '|'];

/// Returns `true` when `cmd` contains none of the banned characters.
pub fn is_command_safe(cmd: &str) -> bool {
    !cmd.chars().any(|c| BANNED.contains(&c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_newline() {
        assert!(!is_command_safe("kick 3\nspawnitem 999 1"));
    }

    #[test]
    fn rejects_semicolon_and_pipe() {
        assert!(!is_command_safe("kick 3;drop table"));
        assert!(!is_command_safe("kick 3|drop table"));
    }

    #[test]
    fn accepts_plain_command() {
        assert!(is_command_safe("con 3 SetInventoryItemIntStat 5 1 0 0"));
    }
}
