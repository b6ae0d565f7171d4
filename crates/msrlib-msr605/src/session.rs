//! Session -- the protocol engine for one MSR605 device.
//!
//! A session owns the transport, the two byte queues, and the identity
//! cache. Every command follows the same shape: write the request, then
//! loop over [`Synchronizer::sync`], the cancel check, and a response
//! matcher until the reply is complete or the wait fails. Commands that
//! wait for a swipe resynchronize the device after a failure.

use std::time::Duration;

use msrlib_core::error::{Error, Result};
use msrlib_core::transport::Transport;
use msrlib_core::types::{Coercivity, Led, Status, Tracks};
use msrlib_transport::{SerialConfig, SerialTransport};
use tracing::{debug, info, warn};

use crate::builder::SessionConfig;
use crate::commands::{self, RESP_COMM_OK, RESP_ERASE_FAIL, RESP_HICO, RESP_LOCO, RESP_OK};
use crate::frame::{self, Match, TrackFrameParser};
use crate::identity::{self, Capabilities, Identity};
use crate::sync::{CancelSource, MAX_QUEUE, Synchronizer};

const ERASE_REPLIES: [&[u8]; 2] = [&RESP_OK, &RESP_ERASE_FAIL];
const COERCIVITY_REPLIES: [&[u8]; 2] = [&RESP_HICO, &RESP_LOCO];

/// Whether a failed exchange resynchronizes the device before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recovery {
    None,
    ResetAndFlush,
}

/// A session with one MSR605 reader.
///
/// Constructed via [`Msr605Builder`](crate::builder::Msr605Builder). All
/// operations take `&mut self`; a session is driven by one task at a time.
pub struct Session {
    config: SessionConfig,
    path: String,
    transport: Option<Box<dyn Transport>>,
    sync: Synchronizer,
    identity: Identity,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("path", &self.path)
            .field("active", &self.is_active())
            .field("config", &self.config)
            .field("identity", &self.identity)
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        let path = std::mem::take(&mut self.path);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(port = %path, "Session dropped while active, resetting reader");
                handle.spawn(async move {
                    if let Err(e) = transport.send(&commands::cmd_reset()).await {
                        debug!(port = %path, error = %e, "Reset on drop failed");
                    }
                    if let Err(e) = transport.close().await {
                        debug!(port = %path, error = %e, "Close on drop failed");
                    }
                });
            }
            Err(_) => {
                warn!(port = %path, "Session dropped outside a runtime, reader not reset");
            }
        }
    }
}

impl Session {
    /// Create an inactive session.
    ///
    /// This is called by [`Msr605Builder`](crate::builder::Msr605Builder);
    /// callers should use the builder API instead.
    pub(crate) fn new(config: SessionConfig) -> Self {
        Session {
            config,
            path: String::new(),
            transport: None,
            sync: Synchronizer::new(None),
            identity: Identity::default(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Device path of the active session, empty when inactive.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_active(&self) -> bool {
        self.transport.is_some()
    }

    /// Device bytes received but not yet matched to a response.
    pub fn buffered(&self) -> &[u8] {
        self.sync.device_queue()
    }

    // -----------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------

    /// Open the serial device at `path` (raw 8N1, configured baud rate,
    /// exclusive access) and activate the session.
    ///
    /// `cancel` is watched for an abort request while waiting for the
    /// reader: a line terminator on it cancels the pending command.
    pub async fn start(&mut self, path: &str, cancel: Option<CancelSource>) -> Result<()> {
        if self.is_active() {
            return Err(Error::AlreadyActive);
        }
        let config = SerialConfig {
            baud_rate: self.config.baud_rate,
            ..Default::default()
        };
        let transport = SerialTransport::open_with_config(path, config).await?;
        self.start_with_transport(path, Box::new(transport), cancel)
            .await
    }

    /// Activate the session over a caller-provided transport.
    pub async fn start_with_transport(
        &mut self,
        path: &str,
        transport: Box<dyn Transport>,
        cancel: Option<CancelSource>,
    ) -> Result<()> {
        if self.is_active() {
            return Err(Error::AlreadyActive);
        }
        self.path = path.to_string();
        self.transport = Some(transport);
        self.sync = Synchronizer::new(cancel);
        self.identity.clear();
        info!(port = %self.path, "Session started");
        Ok(())
    }

    /// Forget the identity cache, close the transport, and deactivate.
    pub async fn stop(&mut self) -> Result<()> {
        let mut transport = self.transport.take().ok_or(Error::NotActive)?;
        self.identity.clear();
        self.sync.clear();
        self.sync.set_cancel_source(None);
        let closed = transport.close().await;
        info!(port = %self.path, "Session stopped");
        self.path.clear();
        closed
    }

    fn transport(&mut self) -> Result<&mut Box<dyn Transport>> {
        self.transport.as_mut().ok_or(Error::NoMedium)
    }

    // -----------------------------------------------------------------
    // Raw I/O
    // -----------------------------------------------------------------

    /// Write all of `data`, retrying interrupted writes.
    pub async fn write_exact(&mut self, data: &[u8]) -> Result<()> {
        let transport = self.transport()?;
        loop {
            match transport.send(data).await {
                Err(Error::Interrupted) => continue,
                other => return other,
            }
        }
    }

    /// Fill `buf` completely, serving bytes already in the device queue
    /// before reading the transport.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let transport = self.transport.as_deref_mut().ok_or(Error::NoMedium)?;
        let mut filled = self.sync.take_device(buf);
        while filled < buf.len() {
            match transport.receive(&mut buf[filled..]).await {
                Ok(n) => filled += n,
                Err(Error::Interrupted) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Clear both queues and discard the transport's pending I/O.
    pub async fn flush(&mut self) -> Result<()> {
        let transport = self.transport.as_deref_mut().ok_or(Error::NoMedium)?;
        self.sync.clear();
        transport.discard_pending().await
    }

    // -----------------------------------------------------------------
    // Engine
    // -----------------------------------------------------------------

    /// Issue `command` and wait for `matcher` to recognize the reply.
    async fn exchange<T>(
        &mut self,
        command: &[u8],
        recovery: Recovery,
        timeout: Option<Duration>,
        mut matcher: impl FnMut(&[u8]) -> Result<Match<T>>,
    ) -> Result<T> {
        self.write_exact(command).await?;
        let outcome = self.await_response(timeout, &mut matcher).await;
        if let Err(cause) = &outcome {
            match recovery {
                Recovery::ResetAndFlush => self.recover(cause).await,
                Recovery::None if !matches!(cause, Error::Cancelled) => {
                    self.discard_unmatched().await
                }
                Recovery::None => {}
            }
        }
        outcome
    }

    async fn await_response<T>(
        &mut self,
        timeout: Option<Duration>,
        matcher: &mut impl FnMut(&[u8]) -> Result<Match<T>>,
    ) -> Result<T> {
        loop {
            match matcher(self.sync.device_queue())? {
                Match::Complete { value, consumed } => {
                    self.sync.consume(consumed);
                    return Ok(value);
                }
                Match::Incomplete => {
                    let queued = self.sync.device_queue().len();
                    if queued > MAX_QUEUE {
                        warn!(port = %self.path, bytes = queued, "Response exceeds queue limit");
                        return Err(Error::protocol(queued, "response exceeds queue limit"));
                    }
                }
            }

            let transport = self.transport.as_deref_mut().ok_or(Error::NoMedium)?;
            match self.sync.sync(transport, timeout).await {
                Ok(()) => {}
                Err(Error::Interrupted) => continue,
                Err(e) => {
                    debug!(port = %self.path, error = %e, "Wait for response ended");
                    return Err(e);
                }
            }

            if self.sync.cancel() {
                self.sync.clear_cancel();
                debug!(port = %self.path, "Command cancelled");
                return Err(Error::Cancelled);
            }
        }
    }

    /// Drop a rejected or late reply so the next command starts clean.
    /// The cancel queue is left alone.
    async fn discard_unmatched(&mut self) {
        let dropped = self.sync.clear_device();
        if let Some(transport) = self.transport.as_deref_mut() {
            if let Err(e) = transport.discard_pending().await {
                warn!(port = %self.path, error = %e, "Discard after failed command failed");
            }
        }
        debug!(port = %self.path, bytes = dropped, "Discarded unmatched reply");
    }

    /// Resynchronize after a failed swipe command. Failures here are logged
    /// and never replace `cause`.
    async fn recover(&mut self, cause: &Error) {
        debug!(port = %self.path, error = %cause, "Resynchronizing reader");
        tokio::time::sleep(self.config.quiescence).await;
        if let Err(e) = self.reset().await {
            warn!(port = %self.path, error = %e, "Reset during recovery failed");
        }
        // A cancel leaves in-flight device bytes alone.
        if !matches!(cause, Error::Cancelled) {
            if let Err(e) = self.flush().await {
                warn!(port = %self.path, error = %e, "Flush during recovery failed");
            }
        }
    }

    fn check_status(status: Status) -> Result<()> {
        if status.is_ok() {
            Ok(())
        } else {
            Err(Error::Status(status))
        }
    }

    // -----------------------------------------------------------------
    // Device control
    // -----------------------------------------------------------------

    /// Return the reader to idle. The device does not acknowledge.
    pub async fn reset(&mut self) -> Result<()> {
        debug!(port = %self.path, "Reset");
        self.write_exact(&commands::cmd_reset()).await
    }

    pub async fn led(&mut self, led: Led) -> Result<()> {
        debug!(port = %self.path, %led, "LED");
        self.write_exact(&commands::cmd_led(led)).await
    }

    pub async fn off(&mut self) -> Result<()> {
        self.led(Led::Off).await
    }

    pub async fn on(&mut self) -> Result<()> {
        self.led(Led::On).await
    }

    pub async fn green(&mut self) -> Result<()> {
        self.led(Led::Green).await
    }

    pub async fn yellow(&mut self) -> Result<()> {
        self.led(Led::Yellow).await
    }

    pub async fn red(&mut self) -> Result<()> {
        self.led(Led::Red).await
    }

    /// Communication self-test.
    pub async fn test_comm(&mut self) -> Result<()> {
        let timeout = self.config.sync_timeout;
        self.exchange(&commands::cmd_test_comm(), Recovery::None, timeout, |buf| {
            frame::match_fixed(buf, &RESP_COMM_OK)
        })
        .await
    }

    /// RAM self-test.
    pub async fn test_ram(&mut self) -> Result<()> {
        let timeout = self.config.sync_timeout;
        self.exchange(&commands::cmd_test_ram(), Recovery::None, timeout, |buf| {
            frame::match_fixed(buf, &RESP_OK)
        })
        .await
    }

    /// Sensor self-test. Completes when a card is swiped; there is no
    /// timeout, only the cancel channel ends the wait early.
    pub async fn test_sensor(&mut self) -> Result<()> {
        self.exchange(
            &commands::cmd_test_sensor(),
            Recovery::ResetAndFlush,
            None,
            |buf| frame::match_fixed(buf, &RESP_OK),
        )
        .await
    }

    // -----------------------------------------------------------------
    // Identity
    // -----------------------------------------------------------------

    /// Model digit (`'2'`, `'3'`, `'5'`, ...). Queried once per session.
    pub async fn model(&mut self) -> Result<char> {
        if let Some(model) = self.identity.model {
            return Ok(model as char);
        }
        let timeout = self.config.sync_timeout;
        let model = self
            .exchange(&commands::cmd_model(), Recovery::None, timeout, frame::match_model)
            .await?;
        debug!(port = %self.path, model = ?(model as char), "Model identified");
        self.identity.model = Some(model);
        Ok(model as char)
    }

    /// Firmware version string such as `REVH1.02`. Queried once per session.
    pub async fn firmware(&mut self) -> Result<String> {
        if let Some(firmware) = &self.identity.firmware {
            return Ok(firmware.clone());
        }
        let timeout = self.config.sync_timeout;
        let firmware = self
            .exchange(
                &commands::cmd_firmware(),
                Recovery::None,
                timeout,
                frame::match_firmware,
            )
            .await?;
        debug!(port = %self.path, firmware = %firmware, "Firmware identified");
        self.identity.firmware = Some(firmware.clone());
        Ok(firmware)
    }

    pub async fn has_track1(&mut self) -> bool {
        self.model()
            .await
            .is_ok_and(|m| identity::model_has_track1(m as u8))
    }

    /// Every model reads track 2, so this reports whether the model query
    /// succeeds at all.
    pub async fn has_track2(&mut self) -> bool {
        self.model().await.is_ok()
    }

    pub async fn has_track3(&mut self) -> bool {
        self.model()
            .await
            .is_ok_and(|m| identity::model_has_track3(m as u8))
    }

    pub async fn capabilities(&mut self) -> Capabilities {
        Capabilities {
            track1: self.has_track1().await,
            track2: self.has_track2().await,
            track3: self.has_track3().await,
        }
    }

    // -----------------------------------------------------------------
    // Track operations
    // -----------------------------------------------------------------

    /// Erase the selected tracks on the next swiped card.
    ///
    /// At least one track must be selected; an empty selection fails with
    /// [`Error::InvalidParameter`] before anything is sent.
    pub async fn erase(&mut self, track1: bool, track2: bool, track3: bool) -> Result<()> {
        let mask = commands::erase_mask(track1, track2, track3)?;
        debug!(port = %self.path, mask, "Erase, waiting for swipe");
        let timeout = self.config.sync_timeout;
        let choice = self
            .exchange(
                &commands::cmd_erase(mask),
                Recovery::ResetAndFlush,
                timeout,
                |buf| frame::match_choice(buf, &ERASE_REPLIES),
            )
            .await?;
        match choice {
            0 => Ok(()),
            _ => Err(Error::Status(Status::IoError)),
        }
    }

    /// Write three tracks to the next swiped card.
    pub async fn write(&mut self, tracks: &Tracks) -> Result<()> {
        let command = commands::cmd_write(tracks)?;
        debug!(port = %self.path, bytes = command.len(), "Write, waiting for swipe");
        let timeout = self.config.sync_timeout;
        let status = self
            .exchange(&command, Recovery::ResetAndFlush, timeout, frame::match_status)
            .await?;
        Self::check_status(status)
    }

    /// Read the three tracks of the next swiped card.
    ///
    /// Absent or garbled tracks come back as `Empty` or `Error`; only a
    /// non-OK status fails the call.
    pub async fn read(&mut self) -> Result<Tracks> {
        self.read_with(commands::cmd_read(), TrackFrameParser::delimited())
            .await
    }

    /// Read the unparsed bitstreams of the next swiped card.
    ///
    /// Decode the payloads with [`raw::decode_symbols`](crate::raw::decode_symbols).
    pub async fn read_raw(&mut self) -> Result<Tracks> {
        self.read_with(commands::cmd_read_raw(), TrackFrameParser::length_prefixed())
            .await
    }

    async fn read_with(&mut self, command: Vec<u8>, mut parser: TrackFrameParser) -> Result<Tracks> {
        debug!(port = %self.path, "Read, waiting for swipe");
        let timeout = self.config.sync_timeout;
        let frame = self
            .exchange(&command, Recovery::ResetAndFlush, timeout, |buf| {
                parser.advance(buf)
            })
            .await?;
        Self::check_status(frame.status)?;
        Ok(frame.tracks)
    }

    // -----------------------------------------------------------------
    // Coercivity
    // -----------------------------------------------------------------

    pub async fn set_coercivity(&mut self, coercivity: Coercivity) -> Result<()> {
        debug!(port = %self.path, %coercivity, "Set coercivity");
        let timeout = self.config.sync_timeout;
        self.exchange(
            &commands::cmd_set_coercivity(coercivity),
            Recovery::None,
            timeout,
            |buf| frame::match_fixed(buf, &RESP_OK),
        )
        .await
    }

    pub async fn coercivity(&mut self) -> Result<Coercivity> {
        let timeout = self.config.sync_timeout;
        let choice = self
            .exchange(
                &commands::cmd_get_coercivity(),
                Recovery::None,
                timeout,
                |buf| frame::match_choice(buf, &COERCIVITY_REPLIES),
            )
            .await?;
        Ok(match choice {
            0 => Coercivity::High,
            _ => Coercivity::Low,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Msr605Builder;
    use crate::commands::{ESC, FS};
    use msrlib_core::TrackData;
    use msrlib_test_harness::MockTransport;
    use tokio::io::AsyncWriteExt;

    const RESET: [u8; 2] = [ESC, b'a'];

    async fn make_session(mock: &MockTransport) -> Session {
        Msr605Builder::new()
            .quiescence(Duration::from_millis(1))
            .open_with_transport("/dev/mock", Box::new(mock.clone()), None)
            .await
            .unwrap()
    }

    fn read_frame(t1: &[u8], t2: &[u8], t3: &[u8], status: u8) -> Vec<u8> {
        let mut buf = vec![ESC, b's', ESC, 1];
        buf.extend_from_slice(t1);
        buf.extend_from_slice(&[ESC, 2]);
        buf.extend_from_slice(t2);
        buf.extend_from_slice(&[ESC, 3]);
        buf.extend_from_slice(t3);
        buf.extend_from_slice(&[FS, ESC, status]);
        buf
    }

    // -----------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn lifecycle_errors() {
        let mock = MockTransport::new();
        let mut session = make_session(&mock).await;

        let again = session
            .start_with_transport("/dev/other", Box::new(MockTransport::new()), None)
            .await;
        assert!(matches!(again, Err(Error::AlreadyActive)));
        assert_eq!(session.path(), "/dev/mock");

        session.stop().await.unwrap();
        assert!(!session.is_active());
        assert!(!mock.is_connected());
        assert!(matches!(session.stop().await, Err(Error::NotActive)));
        assert!(matches!(session.reset().await, Err(Error::NoMedium)));
        assert!(matches!(session.test_comm().await, Err(Error::NoMedium)));
    }

    #[tokio::test]
    async fn start_missing_device_stays_inactive() {
        let mut session = Msr605Builder::new().build();
        let result = session.start("/dev/msrlib-no-such-device", None).await;
        assert!(matches!(result, Err(Error::Device { .. })));
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn stop_clears_identity_cache() {
        let mock = MockTransport::new();
        mock.expect(&[ESC, b't'], &[ESC, b'3', b'S']);
        let mut session = make_session(&mock).await;
        session.model().await.unwrap();
        session.stop().await.unwrap();

        let mock = MockTransport::new();
        mock.expect(&[ESC, b't'], &[ESC, b'5', b'S']);
        session
            .start_with_transport("/dev/mock", Box::new(mock.clone()), None)
            .await
            .unwrap();
        assert_eq!(session.model().await.unwrap(), '5');
        assert_eq!(mock.send_count(), 1);
    }

    #[tokio::test]
    async fn drop_resets_and_closes() {
        let mock = MockTransport::new();
        mock.expect_silent(&RESET);
        let session = make_session(&mock).await;
        drop(session);

        for _ in 0..10 {
            if !mock.is_connected() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!mock.is_connected());
        assert_eq!(mock.sent_data(), vec![RESET.to_vec()]);
    }

    // -----------------------------------------------------------------
    // Raw I/O
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn read_exact_collects_chunks() {
        let mock = MockTransport::new();
        mock.set_chunk_size(1);
        mock.push_inbound(&[1, 2, 3, 4]);
        let mut session = make_session(&mock).await;

        let mut buf = [0u8; 4];
        session.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn read_exact_inactive_is_no_medium() {
        let mut session = Msr605Builder::new().build();
        let mut buf = [0u8; 1];
        assert!(matches!(
            session.read_exact(&mut buf).await,
            Err(Error::NoMedium)
        ));
    }

    #[tokio::test]
    async fn write_failure_is_short_io() {
        let mock = MockTransport::new();
        mock.fail_next_send(std::io::ErrorKind::BrokenPipe);
        let mut session = make_session(&mock).await;
        assert!(matches!(session.reset().await, Err(Error::ShortIo(_))));
    }

    // -----------------------------------------------------------------
    // Device control
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn led_commands() {
        let mock = MockTransport::new();
        for opcode in [0x83, 0x84, 0x85, 0x82, 0x81] {
            mock.expect_silent(&[ESC, opcode]);
        }
        let mut session = make_session(&mock).await;

        session.green().await.unwrap();
        session.yellow().await.unwrap();
        session.red().await.unwrap();
        session.on().await.unwrap();
        session.off().await.unwrap();
        assert_eq!(mock.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn self_tests() {
        let mock = MockTransport::new();
        mock.expect(&[ESC, b'e'], &[ESC, b'y']);
        mock.expect(&[ESC, 0x87], &[ESC, b'0']);
        mock.expect(&[ESC, 0x86], &[ESC, b'0']);
        let mut session = make_session(&mock).await;

        session.test_comm().await.unwrap();
        session.test_ram().await.unwrap();
        session.test_sensor().await.unwrap();
        assert!(session.buffered().is_empty());
    }

    #[tokio::test]
    async fn test_comm_with_bytewise_delivery_and_interrupt() {
        let mock = MockTransport::new();
        mock.expect(&[ESC, b'e'], &[ESC, b'y']);
        mock.set_chunk_size(1);
        mock.interrupt_next_receive();
        let mut session = make_session(&mock).await;

        session.test_comm().await.unwrap();
    }

    #[tokio::test]
    async fn test_comm_wrong_reply_is_protocol_error() {
        let mock = MockTransport::new();
        mock.expect(&[ESC, b'e'], &[ESC, b'n']);
        let mut session = make_session(&mock).await;

        assert!(matches!(
            session.test_comm().await,
            Err(Error::Protocol { position: 1, .. })
        ));
    }

    #[tokio::test]
    async fn wrong_reply_is_dropped_before_next_command() {
        let mock = MockTransport::new();
        mock.expect(&[ESC, b'e'], &[ESC, b'n']);
        mock.expect(&[ESC, b'e'], &[ESC, b'y']);
        let mut session = make_session(&mock).await;

        assert!(matches!(
            session.test_comm().await,
            Err(Error::Protocol { position: 1, .. })
        ));
        assert!(session.buffered().is_empty());
        assert_eq!(mock.discard_count(), 1);

        session.test_comm().await.unwrap();
        assert_eq!(mock.remaining_expectations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_reply_is_dropped_after_timeout() {
        let mock = MockTransport::new();
        mock.expect(&[ESC, b't'], &[ESC]);
        mock.expect(&[ESC, b't'], &[ESC, b'5', b'S']);
        let mut session = make_session(&mock).await;

        assert!(matches!(session.model().await, Err(Error::Timeout)));
        assert!(session.buffered().is_empty());
        assert_eq!(session.model().await.unwrap(), '5');
    }

    #[tokio::test(start_paused = true)]
    async fn queued_reply_matches_without_waiting() {
        let mock = MockTransport::new();
        mock.expect(&[ESC, b'e'], &[ESC, b'y', ESC, b'y']);
        mock.expect_silent(&[ESC, b'e']);
        let mut session = make_session(&mock).await;

        session.test_comm().await.unwrap();
        assert_eq!(session.buffered(), &[ESC, b'y']);
        // Nothing more arrives; a wait would end in a timeout.
        session.test_comm().await.unwrap();
        assert!(session.buffered().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sensor_waits_without_timeout() {
        let mock = MockTransport::new();
        mock.expect(&[ESC, 0x86], &[]);
        let mut session = make_session(&mock).await;

        // Far beyond the configured sync timeout.
        let waited =
            tokio::time::timeout(Duration::from_secs(60), session.test_sensor()).await;
        assert!(waited.is_err());
    }

    // -----------------------------------------------------------------
    // Identity
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn model_is_memoized() {
        let mock = MockTransport::new();
        mock.expect(&[ESC, b't'], &[ESC, b'3', b'S']);
        let mut session = make_session(&mock).await;

        assert_eq!(session.model().await.unwrap(), '3');
        assert_eq!(session.model().await.unwrap(), '3');
        assert_eq!(
            session.capabilities().await,
            Capabilities {
                track1: true,
                track2: true,
                track3: true
            }
        );
        assert_eq!(mock.send_count(), 1);
    }

    #[tokio::test]
    async fn firmware_is_memoized() {
        let mock = MockTransport::new();
        mock.expect(&[ESC, b'v'], b"\x1bREVH1.02");
        let mut session = make_session(&mock).await;

        assert_eq!(session.firmware().await.unwrap(), "REVH1.02");
        assert_eq!(session.firmware().await.unwrap(), "REVH1.02");
        assert_eq!(mock.send_count(), 1);
    }

    #[tokio::test]
    async fn track2_only_model() {
        let mock = MockTransport::new();
        mock.expect(&[ESC, b't'], &[ESC, b'1', b'S']);
        let mut session = make_session(&mock).await;

        assert!(!session.has_track1().await);
        assert!(session.has_track2().await);
        assert!(!session.has_track3().await);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_model_query_reports_no_tracks() {
        let mock = MockTransport::new();
        mock.expect(&[ESC, b't'], &[]);
        let mut session = make_session(&mock).await;

        assert!(!session.has_track2().await);
        assert_eq!(session.identity, Identity::default());
    }

    // -----------------------------------------------------------------
    // Erase
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn erase_all_sends_mask_7() {
        let mock = MockTransport::new();
        mock.expect(&[ESC, b'c', 7], &[ESC, b'0']);
        let mut session = make_session(&mock).await;

        session.erase(true, true, true).await.unwrap();
        assert_eq!(mock.sent_data(), vec![vec![ESC, b'c', 7]]);
    }

    #[tokio::test]
    async fn erase_track1_sends_mask_0() {
        let mock = MockTransport::new();
        mock.expect(&[ESC, b'c', 0], &[ESC, b'0']);
        let mut session = make_session(&mock).await;

        session.erase(true, false, false).await.unwrap();
        assert_eq!(mock.sent_data(), vec![vec![ESC, b'c', 0]]);
    }

    #[tokio::test]
    async fn erase_failure_is_io_error() {
        let mock = MockTransport::new();
        mock.expect(&[ESC, b'c', 4], &[ESC, b'A']);
        let mut session = make_session(&mock).await;

        assert!(matches!(
            session.erase(false, false, true).await,
            Err(Error::Status(Status::IoError))
        ));
    }

    #[tokio::test]
    async fn erase_nothing_sends_nothing() {
        let mock = MockTransport::new();
        let mut session = make_session(&mock).await;

        assert!(matches!(
            session.erase(false, false, false).await,
            Err(Error::InvalidParameter(_))
        ));
        assert_eq!(mock.send_count(), 0);
    }

    // -----------------------------------------------------------------
    // Write / read
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let mock = MockTransport::loopback();
        let mut session = make_session(&mock).await;
        let tracks = Tracks::new(
            TrackData::data("%B4111111111111111^DOE/JOHN^2512?"),
            TrackData::data(";4111111111111111=2512?"),
            TrackData::Empty,
        );

        session.write(&tracks).await.unwrap();
        let read = session.read().await.unwrap();
        assert_eq!(read, tracks);
    }

    #[tokio::test]
    async fn write_appends_end_sentinel() {
        let mock = MockTransport::loopback();
        let mut session = make_session(&mock).await;
        let tracks = Tracks::new(TrackData::Empty, TrackData::data(";123"), TrackData::data("99"));

        session.write(&tracks).await.unwrap();
        let read = session.read().await.unwrap();
        assert_eq!(read.track1, TrackData::Empty);
        assert_eq!(read.track2, TrackData::data(";123?"));
        assert_eq!(read.track3, TrackData::data("99?"));
    }

    #[tokio::test]
    async fn write_rejects_error_marker_before_io() {
        let mock = MockTransport::new();
        let mut session = make_session(&mock).await;
        let tracks = Tracks::new(TrackData::Error, TrackData::Empty, TrackData::Empty);

        assert!(matches!(
            session.write(&tracks).await,
            Err(Error::InvalidParameter(_))
        ));
        assert_eq!(mock.send_count(), 0);
    }

    #[tokio::test]
    async fn write_without_card_reports_status() {
        let mock = MockTransport::new();
        let command = commands::cmd_write(&Tracks::default()).unwrap();
        mock.expect(&command, &[ESC, b'9']);
        let mut session = make_session(&mock).await;

        assert!(matches!(
            session.write(&Tracks::default()).await,
            Err(Error::Status(Status::NoMedium))
        ));
    }

    #[tokio::test]
    async fn read_non_ok_status_fails() {
        let mock = MockTransport::new();
        mock.expect(&[ESC, b'r'], &read_frame(b"", b"", b"", b'1'));
        let mut session = make_session(&mock).await;

        assert!(matches!(
            session.read().await,
            Err(Error::Status(Status::IoError))
        ));
    }

    #[tokio::test]
    async fn read_bytewise_matches_whole() {
        let response = read_frame(b"%AB?", b";12?", b"3??", b'0');
        let mock = MockTransport::new();
        mock.expect(&[ESC, b'r'], &response);
        mock.set_chunk_size(1);
        let mut session = make_session(&mock).await;

        let tracks = session.read().await.unwrap();
        assert_eq!(tracks.track1, TrackData::data("%AB?"));
        assert_eq!(tracks.track2, TrackData::data(";12?"));
        assert_eq!(tracks.track3, TrackData::data("3?"));
    }

    #[tokio::test]
    async fn read_raw_returns_bitstreams() {
        let mut response = vec![ESC, b's', ESC, 1, 2, 0xA5, 0x5A, ESC, 2, 0, ESC, 3, 1, 0x0F];
        response.extend_from_slice(&[b'?', FS, ESC, b'0']);
        let mock = MockTransport::new();
        mock.expect(&[ESC, b'm'], &response);
        let mut session = make_session(&mock).await;

        let tracks = session.read_raw().await.unwrap();
        assert_eq!(tracks.track1, TrackData::data(vec![0xA5, 0x5A]));
        assert_eq!(tracks.track2, TrackData::Empty);
        assert_eq!(tracks.track3, TrackData::data(vec![0x0F]));
    }

    // -----------------------------------------------------------------
    // Failure and recovery
    // -----------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn read_timeout_recovers_and_stays_active() {
        let mock = MockTransport::new();
        mock.expect(&[ESC, b'r'], &[]);
        mock.expect_silent(&RESET);
        mock.expect_silent(&RESET);
        let mut session = make_session(&mock).await;

        assert!(matches!(session.read().await, Err(Error::Timeout)));
        assert!(session.is_active());
        assert_eq!(mock.discard_count(), 1);

        session.reset().await.unwrap();
        session.flush().await.unwrap();
        assert_eq!(mock.discard_count(), 2);
        assert_eq!(mock.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn read_protocol_error_recovers() {
        let mock = MockTransport::new();
        mock.expect(&[ESC, b'r'], &[ESC, b'q']);
        mock.expect_silent(&RESET);
        let mut session = make_session(&mock).await;

        assert!(matches!(
            session.read().await,
            Err(Error::Protocol { position: 1, .. })
        ));
        assert_eq!(mock.remaining_expectations(), 0);
        assert_eq!(mock.discard_count(), 1);
        assert!(session.buffered().is_empty());
    }

    #[tokio::test]
    async fn recovery_failure_keeps_original_error() {
        let mock = MockTransport::new();
        mock.expect(&[ESC, b'r'], &[0x00]);
        // No expectation for the reset: the mock rejects it.
        let mut session = make_session(&mock).await;

        assert!(matches!(
            session.read().await,
            Err(Error::Protocol { position: 0, .. })
        ));
    }

    #[tokio::test]
    async fn oversized_response_is_protocol_error() {
        let mut response = vec![ESC, b's', ESC, 1];
        response.extend(std::iter::repeat_n(b'A', MAX_QUEUE + 10));
        let mock = MockTransport::new();
        mock.expect(&[ESC, b'r'], &response);
        mock.expect_silent(&RESET);
        let mut session = make_session(&mock).await;

        assert!(matches!(session.read().await, Err(Error::Protocol { .. })));
    }

    #[tokio::test]
    async fn cancel_preserves_device_bytes() {
        let partial = [ESC, b's', ESC, 1, b'%'];
        let mock = MockTransport::new();
        mock.expect(&[ESC, b'r'], &partial);
        mock.expect_silent(&RESET);
        let (mut tx, rx) = tokio::io::duplex(16);
        let mut session = Msr605Builder::new()
            .quiescence(Duration::from_millis(1))
            .open_with_transport("/dev/mock", Box::new(mock.clone()), Some(Box::new(rx)))
            .await
            .unwrap();

        tx.write_all(b"\n").await.unwrap();
        assert!(matches!(session.read().await, Err(Error::Cancelled)));

        // Bytes already received stay queued; nothing was flushed.
        assert_eq!(session.buffered().len() + mock.pending_inbound(), partial.len());
        assert_eq!(&partial[..session.buffered().len()], session.buffered());
        assert_eq!(mock.discard_count(), 0);
        assert_eq!(mock.sent_data().last(), Some(&RESET.to_vec()));
        assert!(session.sync.cancel_queue().is_empty());
    }

    // -----------------------------------------------------------------
    // Coercivity
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn coercivity_set_and_get() {
        let mock = MockTransport::new();
        mock.expect(&[ESC, b'x'], &[ESC, b'0']);
        mock.expect(&[ESC, b'd'], &[ESC, b'H']);
        mock.expect(&[ESC, b'y'], &[ESC, b'0']);
        mock.expect(&[ESC, b'd'], &[ESC, b'L']);
        let mut session = make_session(&mock).await;

        session.set_coercivity(Coercivity::High).await.unwrap();
        assert_eq!(session.coercivity().await.unwrap(), Coercivity::High);
        session.set_coercivity(Coercivity::Low).await.unwrap();
        assert_eq!(session.coercivity().await.unwrap(), Coercivity::Low);
    }
}
