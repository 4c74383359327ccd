//! Viewport size and key-to-bytes mapping for the display layer.

use std::fmt;
use std::str::FromStr;

/// Terminal size in character cells. Both dimensions are non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    cols: u16,
    rows: u16,
}

impl Viewport {
    pub fn new(cols: u16, rows: u16) -> Option<Self> {
        (cols > 0 && rows > 0).then_some(Self { cols, rows })
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }
}

impl fmt::Display for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// A named key as emitted by the display widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyInput {
    Enter,
    ShiftEnter,
    Tab,
    BackTab,
    Backspace,
    Escape,
    Delete,
    Up,
    Down,
    Right,
    Left,
    Home,
    End,
    PageUp,
    PageDown,
    Ctrl(char),
    Alt(char),
}

impl KeyInput {
    /// The byte sequence an xterm-compatible PTY expects for this key.
    ///
    /// Returns `None` for control combinations with no ASCII encoding.
    pub fn encode(self) -> Option<String> {
        let seq = match self {
            KeyInput::Enter => "\r",
            KeyInput::ShiftEnter => "\x1b\r",
            KeyInput::Tab => "\t",
            KeyInput::BackTab => "\x1b[Z",
            KeyInput::Backspace => "\x7f",
            KeyInput::Escape => "\x1b",
            KeyInput::Delete => "\x1b[3~",
            KeyInput::Up => "\x1b[A",
            KeyInput::Down => "\x1b[B",
            KeyInput::Right => "\x1b[C",
            KeyInput::Left => "\x1b[D",
            KeyInput::Home => "\x1b[H",
            KeyInput::End => "\x1b[F",
            KeyInput::PageUp => "\x1b[5~",
            KeyInput::PageDown => "\x1b[6~",
            KeyInput::Ctrl(c) => return ctrl_byte(c).map(|b| (b as char).to_string()),
            KeyInput::Alt(c) => return Some(format!("\x1b{c}")),
        };
        Some(seq.to_string())
    }
}

fn ctrl_byte(c: char) -> Option<u8> {
    match c.to_ascii_lowercase() {
        c @ 'a'..='z' => Some(c as u8 - b'a' + 1),
        '@' | ' ' | '2' => Some(0),
        '[' | '3' => Some(0x1b),
        '\\' | '4' => Some(0x1c),
        ']' | '5' => Some(0x1d),
        '^' | '6' => Some(0x1e),
        '_' | '/' | '7' => Some(0x1f),
        '?' | '8' => Some(0x7f),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown key: {0}")]
pub struct UnknownKey(pub String);

impl FromStr for KeyInput {
    type Err = UnknownKey;

    /// Parses names like `enter`, `up`, `ctrl-c`, `alt-b`, `shift-enter`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        let unknown = || UnknownKey(s.to_string());

        if let Some((modifier, key)) = name.split_once(['-', '+']) {
            let mut chars = key.chars();
            let single = match (chars.next(), chars.next()) {
                (Some(c), None) => Some(c),
                _ => None,
            };
            return match (modifier, key, single) {
                ("shift", "enter" | "return", _) => Ok(KeyInput::ShiftEnter),
                ("shift", "tab", _) => Ok(KeyInput::BackTab),
                ("ctrl" | "control" | "c", _, Some(c)) if ctrl_byte(c).is_some() => {
                    Ok(KeyInput::Ctrl(c))
                }
                ("alt" | "meta" | "option" | "m", _, Some(c)) => Ok(KeyInput::Alt(c)),
                _ => Err(unknown()),
            };
        }

        match name.as_str() {
            "enter" | "return" | "cr" => Ok(KeyInput::Enter),
            "tab" => Ok(KeyInput::Tab),
            "backtab" => Ok(KeyInput::BackTab),
            "backspace" | "bs" => Ok(KeyInput::Backspace),
            "escape" | "esc" => Ok(KeyInput::Escape),
            "delete" | "del" => Ok(KeyInput::Delete),
            "up" => Ok(KeyInput::Up),
            "down" => Ok(KeyInput::Down),
            "right" => Ok(KeyInput::Right),
            "left" => Ok(KeyInput::Left),
            "home" => Ok(KeyInput::Home),
            "end" => Ok(KeyInput::End),
            "pageup" | "pgup" => Ok(KeyInput::PageUp),
            "pagedown" | "pgdn" => Ok(KeyInput::PageDown),
            _ => Err(unknown()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_rejects_zero() {
        assert!(Viewport::new(0, 24).is_none());
        assert!(Viewport::new(80, 0).is_none());
        let viewport = Viewport::new(80, 24).unwrap();
        assert_eq!((viewport.cols(), viewport.rows()), (80, 24));
        assert_eq!(viewport.to_string(), "80x24");
    }

    #[test]
    fn test_named_keys() {
        assert_eq!("enter".parse::<KeyInput>().unwrap().encode().unwrap(), "\r");
        assert_eq!("Up".parse::<KeyInput>().unwrap().encode().unwrap(), "\x1b[A");
        assert_eq!("pgdn".parse::<KeyInput>().unwrap(), KeyInput::PageDown);
        assert_eq!("shift-tab".parse::<KeyInput>().unwrap().encode().unwrap(), "\x1b[Z");
    }

    #[test]
    fn test_ctrl_keys() {
        assert_eq!("ctrl-c".parse::<KeyInput>().unwrap().encode().unwrap(), "\x03");
        assert_eq!("Ctrl+D".parse::<KeyInput>().unwrap().encode().unwrap(), "\x04");
        assert_eq!(KeyInput::Ctrl('[').encode().unwrap(), "\x1b");
        assert_eq!(KeyInput::Ctrl('é').encode(), None);
        assert!("ctrl-é".parse::<KeyInput>().is_err());
    }

    #[test]
    fn test_alt_and_shift_enter() {
        assert_eq!("alt-b".parse::<KeyInput>().unwrap().encode().unwrap(), "\x1bb");
        assert_eq!("shift-enter".parse::<KeyInput>().unwrap().encode().unwrap(), "\x1b\r");
    }

    #[test]
    fn test_unknown_key() {
        let err = "hyper-x".parse::<KeyInput>().unwrap_err();
        assert_eq!(err.to_string(), "unknown key: hyper-x");
        assert!("f13".parse::<KeyInput>().is_err());
    }
}
