//! Per-board flashing sequence
//!
//! Each board moves through `Identified → Flashing → Flashed | FlashFailed`.
//! The artifact is only read; one artifact can be flashed to several boards
//! in turn.

use md5::{Digest, Md5};
use mpyflash_core::{Board, BuildArtifact, FlashParams, ProfileDatabase};
use mpyflash_serial::{PortOpener, ScopedPort, Transport};

use crate::error::{FlashFailure, Result};
use crate::loader::EspLoader;

/// Where a board is in the flashing sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashState {
    /// Board known, nothing written yet
    Identified,
    /// The port is open and the loader is being driven
    Flashing,
    /// Image written, verified and the board reset
    Flashed,
    /// Flashing stopped on an error
    FlashFailed,
}

/// Observer for flashing progress
pub trait FlashProgress {
    /// The board entered a new state
    fn state_changed(&mut self, _board: &Board, _state: FlashState) {}

    /// `done` of `total` blocks have been acknowledged
    fn blocks_written(&mut self, _board: &Board, _done: u32, _total: u32) {}
}

/// Ignores all progress
impl FlashProgress for () {}

/// Writes artifacts to boards through their ROM bootloader
pub struct Flasher<'a, O: PortOpener + ?Sized> {
    opener: &'a O,
    profiles: &'a ProfileDatabase,
}

impl<'a, O: PortOpener + ?Sized> Flasher<'a, O> {
    /// Create a flasher that opens ports through `opener`
    pub fn new(opener: &'a O, profiles: &'a ProfileDatabase) -> Self {
        Self { opener, profiles }
    }

    /// Flash `artifact` to `board`
    ///
    /// Profile checks happen before the port is opened. The port is closed
    /// before the final state is reported. Nothing is retried.
    pub fn flash(
        &self,
        board: &Board,
        artifact: &BuildArtifact,
        progress: &mut dyn FlashProgress,
    ) -> Result<()> {
        progress.state_changed(board, FlashState::Identified);

        let result = self.try_flash(board, artifact, progress);

        match &result {
            Ok(()) => {
                log::info!("Flashed {} to {}", artifact.path.display(), board.port);
                progress.state_changed(board, FlashState::Flashed);
            }
            Err(e) => {
                log::debug!("{}: flashing failed: {}", board.port, e);
                progress.state_changed(board, FlashState::FlashFailed);
            }
        }
        result
    }

    fn try_flash(
        &self,
        board: &Board,
        artifact: &BuildArtifact,
        progress: &mut dyn FlashProgress,
    ) -> Result<()> {
        let params = self.flash_params(board, artifact)?;

        let image = std::fs::read(&artifact.path)?;
        let size = u32::try_from(image.len())
            .map_err(|_| FlashFailure::Io(format!("{} is too large", artifact.path.display())))?;

        let mut port = ScopedPort::open(self.opener, &board.port, board.baud)?;
        progress.state_changed(board, FlashState::Flashing);

        write_image(&mut *port, board, params, &image, size, progress)
    }

    fn flash_params(&self, board: &Board, artifact: &BuildArtifact) -> Result<&'a FlashParams> {
        let unsupported = || FlashFailure::UnsupportedProfile {
            board: board.chip_profile,
            artifact: artifact.chip_profile,
        };

        if artifact.chip_profile != board.chip_profile || !board.chip_profile.is_known() {
            return Err(unsupported());
        }

        self.profiles
            .get(board.chip_profile)
            .and_then(|entry| entry.flash.as_ref())
            .ok_or_else(unsupported)
    }
}

fn write_image<T: Transport + ?Sized>(
    transport: &mut T,
    board: &Board,
    params: &FlashParams,
    image: &[u8],
    size: u32,
    progress: &mut dyn FlashProgress,
) -> Result<()> {
    let mut loader = EspLoader::new(transport, params);

    loader.enter_bootloader()?;
    loader.sync()?;
    if params.spi_attach {
        loader.spi_attach()?;
    }

    let total = loader.flash_begin(size, params.offset)?;
    for (seq, block) in image.chunks(params.block_size as usize).enumerate() {
        loader.flash_block(block, seq as u32)?;
        progress.blocks_written(board, seq as u32 + 1, total);
    }

    if params.md5_verify {
        let expected = format!("{:x}", Md5::digest(image));
        let actual = loader.flash_md5(params.offset, size)?;
        if expected != actual {
            return Err(FlashFailure::VerificationMismatch { expected, actual });
        }
        log::debug!("{}: MD5 verified ({})", board.port, expected);
    }

    loader.flash_end(true)?;
    loader.hard_reset()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::*;
    use crate::slip::{self, Decoder};
    use mpyflash_core::ChipProfile;
    use mpyflash_serial::{PortGuard, Result as SerialResult};
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tempfile::NamedTempFile;

    #[derive(Default)]
    struct RomState {
        opens: usize,
        commands: Vec<u8>,
        begin_args: Vec<u32>,
        flash: Vec<u8>,
    }

    #[derive(Clone, Copy, Default)]
    struct RomFaults {
        wrong_md5: bool,
        mute_on: Option<u8>,
    }

    struct FakeRom {
        status_bytes: usize,
        faults: RomFaults,
        decoder: Decoder,
        pending: Vec<u8>,
        state: Arc<Mutex<RomState>>,
    }

    impl FakeRom {
        fn handle(&mut self, pkt: &[u8]) {
            let cmd = pkt[1];
            let chk = u32::from_le_bytes([pkt[4], pkt[5], pkt[6], pkt[7]]);
            let data = &pkt[8..];
            let mut state = self.state.lock().unwrap();
            state.commands.push(cmd);

            if self.faults.mute_on == Some(cmd) {
                return;
            }

            let word = |i: usize| u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
            let mut body = Vec::new();
            let mut error = None;

            match cmd {
                ESP_FLASH_BEGIN => {
                    state.begin_args = (0..data.len() / 4).map(|i| word(i * 4)).collect();
                    state.flash.clear();
                }
                ESP_FLASH_DATA => {
                    let len = word(0) as usize;
                    let block = &data[16..16 + len];
                    if checksum(block) as u32 != chk {
                        error = Some(0x07);
                    } else {
                        state.flash.extend_from_slice(block);
                    }
                }
                ESP_SPI_FLASH_MD5 => {
                    let len = word(4) as usize;
                    let digest = if self.faults.wrong_md5 {
                        "0".repeat(32)
                    } else {
                        format!("{:x}", Md5::digest(&state.flash[..len]))
                    };
                    body.extend_from_slice(digest.as_bytes());
                }
                _ => {}
            }

            let mut status = vec![0u8; self.status_bytes];
            if let Some(code) = error {
                status[0] = 1;
                status[1] = code;
            }
            body.extend(status);

            let mut resp = vec![DIR_RESPONSE, cmd];
            resp.extend_from_slice(&(body.len() as u16).to_le_bytes());
            resp.extend_from_slice(&[0; 4]);
            resp.extend(body);
            self.pending.extend(slip::encode(&resp));
        }
    }

    impl Transport for FakeRom {
        fn write(&mut self, data: &[u8]) -> SerialResult<()> {
            self.decoder.push(data);
            while let Some(pkt) = self.decoder.next_frame() {
                self.handle(&pkt);
            }
            Ok(())
        }

        fn read_nonblock(&mut self, buf: &mut [u8], _timeout_ms: u32) -> SerialResult<usize> {
            let n = self.pending.len().min(buf.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            Ok(n)
        }

        fn flush(&mut self) -> SerialResult<()> {
            Ok(())
        }

        fn clear_input(&mut self) -> SerialResult<()> {
            self.pending.clear();
            Ok(())
        }

        fn set_dtr(&mut self, _level: bool) -> SerialResult<()> {
            Ok(())
        }

        fn set_rts(&mut self, _level: bool) -> SerialResult<()> {
            Ok(())
        }
    }

    struct RomOpener {
        status_bytes: usize,
        faults: RomFaults,
        state: Arc<Mutex<RomState>>,
    }

    impl RomOpener {
        fn new(status_bytes: usize, faults: RomFaults) -> Self {
            Self {
                status_bytes,
                faults,
                state: Arc::default(),
            }
        }

        fn state(&self) -> std::sync::MutexGuard<'_, RomState> {
            self.state.lock().unwrap()
        }
    }

    impl PortOpener for RomOpener {
        type Port = FakeRom;

        fn open(&self, _port: &str, _baud: u32) -> SerialResult<FakeRom> {
            self.state.lock().unwrap().opens += 1;
            Ok(FakeRom {
                status_bytes: self.status_bytes,
                faults: self.faults,
                decoder: Decoder::new(),
                pending: Vec::new(),
                state: self.state.clone(),
            })
        }
    }

    #[derive(Default)]
    struct Recorder {
        states: Vec<FlashState>,
        blocks: Vec<(u32, u32)>,
    }

    impl FlashProgress for Recorder {
        fn state_changed(&mut self, _board: &Board, state: FlashState) {
            self.states.push(state);
        }

        fn blocks_written(&mut self, _board: &Board, done: u32, total: u32) {
            self.blocks.push((done, total));
        }
    }

    fn image_file(len: usize) -> (NamedTempFile, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i * 7 % 251) as u8).collect();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();
        (file, data)
    }

    fn board(port: &str, profile: ChipProfile) -> Board {
        Board::new(port, 115200, profile, "test board")
    }

    #[test]
    fn test_flash_esp32() {
        let db = ProfileDatabase::builtin().unwrap();
        let opener = RomOpener::new(4, RomFaults::default());
        let (file, data) = image_file(2500);
        let artifact = BuildArtifact::new(file.path(), ChipProfile::Esp32);
        let board = board("/dev/esp-ok0", ChipProfile::Esp32);
        let mut rec = Recorder::default();

        Flasher::new(&opener, &db).flash(&board, &artifact, &mut rec).unwrap();

        assert_eq!(
            rec.states,
            vec![FlashState::Identified, FlashState::Flashing, FlashState::Flashed]
        );
        assert_eq!(rec.blocks, vec![(1, 3), (2, 3), (3, 3)]);

        let state = opener.state();
        assert_eq!(
            state.commands,
            vec![
                ESP_SYNC,
                ESP_SPI_ATTACH,
                ESP_FLASH_BEGIN,
                ESP_FLASH_DATA,
                ESP_FLASH_DATA,
                ESP_FLASH_DATA,
                ESP_SPI_FLASH_MD5,
                ESP_FLASH_END,
            ]
        );
        // erase size, blocks, block size, offset
        assert_eq!(state.begin_args, vec![2500, 3, 1024, 0x1000]);
        // Last block padded with 0xFF.
        assert_eq!(state.flash.len(), 3072);
        assert_eq!(&state.flash[..2500], &data[..]);
        assert!(state.flash[2500..].iter().all(|&b| b == 0xFF));
        assert!(!PortGuard::is_claimed("/dev/esp-ok0"));
    }

    #[test]
    fn test_flash_esp8266_uses_quirks() {
        let db = ProfileDatabase::builtin().unwrap();
        let opener = RomOpener::new(2, RomFaults::default());
        let (file, _) = image_file(0x10000);
        let artifact = BuildArtifact::new(file.path(), ChipProfile::Esp8266);

        Flasher::new(&opener, &db)
            .flash(&board("/dev/esp-8266", ChipProfile::Esp8266), &artifact, &mut ())
            .unwrap();

        let state = opener.state();
        assert!(!state.commands.contains(&ESP_SPI_ATTACH));
        assert!(!state.commands.contains(&ESP_SPI_FLASH_MD5));
        assert_eq!(state.begin_args, vec![esp8266_erase_size(0, 0x10000), 64, 1024, 0]);
    }

    #[test]
    fn test_begin_takes_encrypted_word_on_s3() {
        let db = ProfileDatabase::builtin().unwrap();
        let opener = RomOpener::new(4, RomFaults::default());
        let (file, _) = image_file(100);
        let artifact = BuildArtifact::new(file.path(), ChipProfile::Esp32S3);

        Flasher::new(&opener, &db)
            .flash(&board("/dev/esp-s3", ChipProfile::Esp32S3), &artifact, &mut ())
            .unwrap();

        assert_eq!(opener.state().begin_args, vec![100, 1, 1024, 0, 0]);
    }

    #[test]
    fn test_md5_mismatch() {
        let db = ProfileDatabase::builtin().unwrap();
        let faults = RomFaults {
            wrong_md5: true,
            ..Default::default()
        };
        let opener = RomOpener::new(4, faults);
        let (file, _) = image_file(1500);
        let artifact = BuildArtifact::new(file.path(), ChipProfile::Esp32);
        let mut rec = Recorder::default();

        let err = Flasher::new(&opener, &db)
            .flash(&board("/dev/esp-md5", ChipProfile::Esp32), &artifact, &mut rec)
            .unwrap_err();

        assert!(matches!(err, FlashFailure::VerificationMismatch { .. }));
        assert_eq!(rec.states.last(), Some(&FlashState::FlashFailed));
        assert!(!opener.state().commands.contains(&ESP_FLASH_END));
        assert!(!PortGuard::is_claimed("/dev/esp-md5"));
    }

    #[test]
    fn test_profile_mismatch_touches_nothing() {
        let db = ProfileDatabase::builtin().unwrap();
        let opener = RomOpener::new(4, RomFaults::default());
        let (file, _) = image_file(100);
        let artifact = BuildArtifact::new(file.path(), ChipProfile::Esp8266);
        let mut rec = Recorder::default();

        let err = Flasher::new(&opener, &db)
            .flash(&board("/dev/esp-mis", ChipProfile::Esp32), &artifact, &mut rec)
            .unwrap_err();

        assert!(matches!(err, FlashFailure::UnsupportedProfile { .. }));
        assert_eq!(rec.states, vec![FlashState::Identified, FlashState::FlashFailed]);
        assert_eq!(opener.state().opens, 0);
    }

    #[test]
    fn test_unknown_profile_is_refused() {
        let db = ProfileDatabase::builtin().unwrap();
        let opener = RomOpener::new(4, RomFaults::default());
        let (file, _) = image_file(100);
        let artifact = BuildArtifact::new(file.path(), ChipProfile::Unknown);

        let err = Flasher::new(&opener, &db)
            .flash(&board("/dev/esp-unk", ChipProfile::Unknown), &artifact, &mut ())
            .unwrap_err();

        assert!(matches!(err, FlashFailure::UnsupportedProfile { .. }));
        assert_eq!(opener.state().opens, 0);
    }

    #[test]
    fn test_silent_loader_times_out() {
        let db = ProfileDatabase::builtin().unwrap();
        let faults = RomFaults {
            mute_on: Some(ESP_FLASH_DATA),
            ..Default::default()
        };
        let opener = RomOpener::new(4, faults);
        let (file, _) = image_file(100);
        let artifact = BuildArtifact::new(file.path(), ChipProfile::Esp32);

        let err = Flasher::new(&opener, &db)
            .flash(&board("/dev/esp-mute", ChipProfile::Esp32), &artifact, &mut ())
            .unwrap_err();

        assert!(matches!(err, FlashFailure::TransferTimeout("FLASH_DATA")));
        assert!(!PortGuard::is_claimed("/dev/esp-mute"));
    }

    #[test]
    fn test_port_in_use() {
        let db = ProfileDatabase::builtin().unwrap();
        let opener = RomOpener::new(4, RomFaults::default());
        let (file, _) = image_file(100);
        let artifact = BuildArtifact::new(file.path(), ChipProfile::Esp32);
        let _held = PortGuard::acquire("/dev/esp-held").unwrap();

        let err = Flasher::new(&opener, &db)
            .flash(&board("/dev/esp-held", ChipProfile::Esp32), &artifact, &mut ())
            .unwrap_err();

        assert!(matches!(err, FlashFailure::PortUnavailable { .. }));
        assert_eq!(opener.state().opens, 0);
    }
}
