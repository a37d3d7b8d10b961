//! MicroPython REPL control characters and banner parsing

/// Ctrl-B: leave raw REPL, prints the banner
pub const CTRL_B: u8 = 0x02;
/// Ctrl-C: interrupt the running program
pub const CTRL_C: u8 = 0x03;
/// Ctrl-D: soft reset
pub const CTRL_D: u8 = 0x04;

/// Bytes sent to bring any REPL state back to a fresh friendly prompt:
/// interrupt whatever runs, leave raw mode, then soft reset.
pub const HANDSHAKE: &[u8] = &[b'\r', CTRL_C, CTRL_C, CTRL_B, CTRL_D];

/// Friendly REPL prompt
pub const PROMPT: &str = ">>> ";

const BANNER_PREFIX: &str = "MicroPython ";

/// Identity line printed by the REPL
///
/// `MicroPython v1.20.0 on 2023-04-26; ESP32 module with ESP32`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    /// Runtime version (e.g. "v1.20.0")
    pub version: String,
    /// Board description (e.g. "ESP32 module with ESP32")
    pub board: String,
    /// Chip identity (e.g. "ESP32")
    pub chip: String,
}

impl Banner {
    /// Parse a single banner line
    pub fn parse_line(line: &str) -> Option<Self> {
        let start = line.find(BANNER_PREFIX)?;
        let rest = &line[start + BANNER_PREFIX.len()..];

        let (version, rest) = rest.split_once(' ')?;
        let (_, board) = rest.split_once("; ")?;
        let board = board.trim();
        let (_, chip) = board.rsplit_once(" with ")?;
        let chip = chip.trim();

        if version.is_empty() || chip.is_empty() {
            return None;
        }

        Some(Banner {
            version: version.to_string(),
            board: board.to_string(),
            chip: chip.to_string(),
        })
    }

    /// Find the last banner in REPL output
    ///
    /// The handshake can make the REPL print more than one banner; the last
    /// one reflects the state after the soft reset.
    pub fn find_last(output: &str) -> Option<Self> {
        output.lines().rev().find_map(Banner::parse_line)
    }
}

/// Whether `output` holds a complete banner followed by a prompt
pub fn banner_complete(output: &str) -> bool {
    match output.rfind(BANNER_PREFIX) {
        Some(pos) => output[pos..].contains(PROMPT),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_esp32_banner() {
        let banner =
            Banner::parse_line("MicroPython v1.20.0 on 2023-04-26; ESP32 module with ESP32\r")
                .unwrap();
        assert_eq!(banner.version, "v1.20.0");
        assert_eq!(banner.board, "ESP32 module with ESP32");
        assert_eq!(banner.chip, "ESP32");
    }

    #[test]
    fn test_parse_banner_with_build_suffix() {
        let banner = Banner::parse_line(
            "MicroPython v1.22.0-preview.12.g1a2b3c on 2023-11-02; Generic ESP32S3 module with ESP32S3",
        )
        .unwrap();
        assert_eq!(banner.version, "v1.22.0-preview.12.g1a2b3c");
        assert_eq!(banner.chip, "ESP32S3");
    }

    #[test]
    fn test_find_last_banner() {
        let output = "\r\n>>> \r\nMicroPython v1.19.1 on 2022-06-18; ESP module with ESP8266\r\n\
                      Type \"help()\" for more information.\r\n>>> \r\nMPY: soft reboot\r\n\
                      MicroPython v1.19.1 on 2022-06-18; ESP module (1M) with ESP8266\r\n\
                      Type \"help()\" for more information.\r\n>>> ";
        let banner = Banner::find_last(output).unwrap();
        assert_eq!(banner.board, "ESP module (1M) with ESP8266");
        assert_eq!(banner.chip, "ESP8266");
        assert!(banner_complete(output));
    }

    #[test]
    fn test_rejects_non_banners() {
        assert!(Banner::parse_line("Traceback (most recent call last):").is_none());
        assert!(Banner::parse_line("MicroPython v1.20.0").is_none());
        assert!(Banner::parse_line("MicroPython v1.20.0 on 2023-04-26; mystery board").is_none());
        assert!(!banner_complete("MicroPython v1.20.0 on 2023-04-26; ESP32 module with ESP32\r\n"));
    }
}
