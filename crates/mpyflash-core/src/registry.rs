//! Boards identified during one invocation

use crate::board::Board;
use crate::error::DiscoveryFailure;

/// In-memory set of boards returned by discovery
///
/// Selecting among several boards is the caller's job; the registry only
/// answers "all of them" and "the only one".
#[derive(Debug, Clone, Default)]
pub struct BoardRegistry {
    boards: Vec<Board>,
}

impl BoardRegistry {
    /// Build a registry, keeping the first board seen for each port
    pub fn from_boards(boards: Vec<Board>) -> Self {
        let mut unique: Vec<Board> = Vec::with_capacity(boards.len());
        for board in boards {
            if unique.iter().any(|b| b.port == board.port) {
                log::debug!("Ignoring duplicate board entry for {}", board.port);
                continue;
            }
            unique.push(board);
        }
        Self { boards: unique }
    }

    /// All identified boards
    pub fn all(&self) -> &[Board] {
        &self.boards
    }

    /// The single identified board
    ///
    /// Fails with [`DiscoveryFailure::NoBoards`] or
    /// [`DiscoveryFailure::Ambiguous`] unless exactly one board was found.
    pub fn single(&self) -> Result<&Board, DiscoveryFailure> {
        match self.boards.as_slice() {
            [] => Err(DiscoveryFailure::NoBoards),
            [board] => Ok(board),
            many => Err(DiscoveryFailure::Ambiguous(many.len())),
        }
    }

    /// Look up a board by port name
    pub fn get(&self, port: &str) -> Option<&Board> {
        self.boards.iter().find(|b| b.port == port)
    }

    /// Restrict the registry to the given ports, keeping the selection order
    pub fn narrow<S: AsRef<str>>(&self, ports: &[S]) -> Result<Self, DiscoveryFailure> {
        let mut boards = Vec::with_capacity(ports.len());
        for port in ports {
            let port = port.as_ref();
            let board = self
                .get(port)
                .ok_or_else(|| DiscoveryFailure::UnknownPort(port.to_string()))?;
            boards.push(board.clone());
        }
        Ok(Self::from_boards(boards))
    }

    /// Number of boards
    pub fn len(&self) -> usize {
        self.boards.len()
    }

    /// Whether discovery found nothing
    pub fn is_empty(&self) -> bool {
        self.boards.is_empty()
    }

    /// Take the boards out of the registry
    pub fn into_inner(self) -> Vec<Board> {
        self.boards
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::ChipProfile;

    fn board(port: &str, profile: ChipProfile) -> Board {
        Board::new(port, 115200, profile, "test board")
    }

    #[test]
    fn test_single() {
        let empty = BoardRegistry::default();
        assert_eq!(empty.single(), Err(DiscoveryFailure::NoBoards));

        let one = BoardRegistry::from_boards(vec![board("/dev/ttyUSB0", ChipProfile::Esp32)]);
        assert_eq!(one.single().unwrap().port, "/dev/ttyUSB0");

        let two = BoardRegistry::from_boards(vec![
            board("/dev/ttyUSB0", ChipProfile::Esp32),
            board("/dev/ttyUSB1", ChipProfile::Esp32),
        ]);
        assert_eq!(two.single(), Err(DiscoveryFailure::Ambiguous(2)));
    }

    #[test]
    fn test_same_profile_different_ports_are_distinct() {
        let registry = BoardRegistry::from_boards(vec![
            board("/dev/ttyUSB0", ChipProfile::Esp8266),
            board("/dev/ttyUSB1", ChipProfile::Esp8266),
            board("/dev/ttyUSB0", ChipProfile::Esp8266),
        ]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_narrow() {
        let registry = BoardRegistry::from_boards(vec![
            board("/dev/ttyUSB0", ChipProfile::Esp32),
            board("/dev/ttyUSB1", ChipProfile::Esp8266),
        ]);

        let narrowed = registry.narrow(&["/dev/ttyUSB1"]).unwrap();
        assert_eq!(narrowed.single().unwrap().chip_profile, ChipProfile::Esp8266);

        assert_eq!(
            registry.narrow(&["/dev/ttyACM0"]).unwrap_err(),
            DiscoveryFailure::UnknownPort("/dev/ttyACM0".into())
        );
    }
}
