//! Bounded waits for replies that complete asynchronously on the reader

use log::{debug, warn};

use crate::frame::{Frame, Opcode, Payload};
use crate::reader::RainReader;
use crate::transport::RainTransport;
use crate::types::{RainError, Result};

/// Keep-alive probes sent while waiting for a "set" to complete
pub const LONG_WAIT_ATTEMPTS: usize = 5;
/// Keep-alive probes sent while waiting for the reader to wake up
pub const WAKE_ATTEMPTS: usize = 15;

impl<T: RainTransport> RainReader<T> {
    /// One receive within the short timeout, resynchronized on `expected`
    ///
    /// The frame may be empty or malformed; callers validate it.
    pub fn await_short(&mut self, expected: Opcode) -> Result<Frame> {
        let raw = self
            .transport
            .receive(self.timing.short_timeout)
            .map_err(|e| RainError::Transport(format!("{:?}", e)))?;
        debug!("Received {} bytes: {:02X?}", raw.len(), raw);
        Ok(Frame::resynchronize(&raw, expected))
    }

    /// Prod the reader with keep-alives until it echoes `expected`
    ///
    /// Gives up after [`LONG_WAIT_ATTEMPTS`] and returns whatever the last
    /// attempt produced.
    pub fn await_long(&mut self, expected: Opcode) -> Result<Frame> {
        let mut last = Ok(Frame::default());
        for attempt in 1..=LONG_WAIT_ATTEMPTS {
            last = self
                .send(Opcode::KeepAlive, &Payload::Empty)
                .and_then(|_| self.await_short(expected));
            if matches!(&last, Ok(frame) if frame.matches(expected)) {
                debug!("{:?} completed after {} keep-alive(s)", expected, attempt);
                return last;
            }
            self.pause(self.timing.pacing)?;
        }

        warn!(
            "No {:?} completion after {} keep-alives",
            expected, LONG_WAIT_ATTEMPTS
        );
        last
    }

    /// Send keep-alives until the reader answers at all, then check the answer
    pub fn keep_alive_until_awake(&mut self) -> Result<()> {
        let mut last = Ok(Frame::default());
        for _ in 0..WAKE_ATTEMPTS {
            last = self
                .send(Opcode::KeepAlive, &Payload::Empty)
                .and_then(|_| self.await_short(Opcode::KeepAlive));
            if matches!(&last, Ok(frame) if !frame.is_empty()) {
                break;
            }
            self.pause(self.timing.pacing)?;
        }
        if self.stop.is_stopped() {
            return Err(RainError::Stopped);
        }

        let frame = last?;
        if frame.is_empty() {
            warn!("Reader silent after {} keep-alives", WAKE_ATTEMPTS);
            return Err(RainError::EmptyResponse(format!(
                "no keep-alive reply after {} attempts",
                WAKE_ATTEMPTS
            )));
        }
        frame.validate(Opcode::KeepAlive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::StopSignal;
    use crate::frame::decode_request;
    use crate::reader::Timing;
    use crate::test_support::{MockTransport, healthy_reply, ok};
    use crate::types::{OperatingState, TxPowerSet};

    fn reader(transport: MockTransport) -> RainReader<MockTransport> {
        RainReader::with_timing(transport, Timing::immediate())
    }

    #[test]
    fn test_await_short_returns_empty_frame_on_silence() {
        let mut rfid = reader(MockTransport::silent());
        let frame = rfid.await_short(Opcode::GetTemp).unwrap();
        assert!(frame.is_empty());
    }

    #[test]
    fn test_await_long_stops_at_matching_reply() {
        // The set answer only shows up once the reader is prodded,
        // glued to the keep-alive reply
        let mut prods = 0;
        let transport = MockTransport::responding(move |req| {
            match decode_request(req).ok()?.0 {
                Opcode::KeepAlive => {
                    prods += 1;
                    if prods < 3 {
                        return Some(ok(Opcode::KeepAlive, &[]));
                    }
                    let mut reply = ok(Opcode::SetTxPower, &[]);
                    reply.extend_from_slice(&ok(Opcode::KeepAlive, &[]));
                    Some(reply)
                }
                _ => None,
            }
        });
        let log = transport.sent_log();
        let mut rfid = reader(transport);

        let frame = rfid.await_long(Opcode::SetTxPower).unwrap();
        assert!(frame.matches(Opcode::SetTxPower));
        assert_eq!(log.count(Opcode::KeepAlive), 3);
    }

    #[test]
    fn test_await_long_gives_up_after_five_probes() {
        let transport = MockTransport::responding(|_| Some(ok(Opcode::KeepAlive, &[])));
        let log = transport.sent_log();
        let mut rfid = reader(transport);

        let frame = rfid.await_long(Opcode::SetTxPower).unwrap();
        assert!(!frame.matches(Opcode::SetTxPower));
        assert_eq!(log.count(Opcode::KeepAlive), LONG_WAIT_ATTEMPTS);
    }

    #[test]
    fn test_set_falls_back_to_long_wait_and_fails() {
        // Set is never answered, keep-alives are
        let transport = MockTransport::responding(|req| match decode_request(req).ok()?.0 {
            Opcode::KeepAlive => Some(ok(Opcode::KeepAlive, &[])),
            _ => None,
        });
        let log = transport.sent_log();
        let mut rfid = reader(transport);

        let result = rfid.set_tx_power(&TxPowerSet([30.0; 4]));
        assert!(matches!(result, Err(RainError::ProtocolMismatch { .. })));
        assert_eq!(log.count(Opcode::SetTxPower), 1);
        assert_eq!(log.count(Opcode::KeepAlive), LONG_WAIT_ATTEMPTS);
    }

    #[test]
    fn test_set_on_silent_reader_reports_attempted_value() {
        let mut rfid = reader(MockTransport::silent());

        let result = rfid.set_tx_power(&TxPowerSet([27.5; 4]));
        match result {
            Err(RainError::EmptyResponse(context)) => assert!(context.contains("27.5")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_keep_alive_until_awake_stops_at_first_reply() {
        let mut probes = 0;
        let transport = MockTransport::responding(move |req| {
            probes += 1;
            if probes < 4 { None } else { healthy_reply(req) }
        });
        let log = transport.sent_log();
        let mut rfid = reader(transport);

        assert!(rfid.keep_alive_until_awake().is_ok());
        assert_eq!(log.count(Opcode::KeepAlive), 4);
    }

    #[test]
    fn test_keep_alive_until_awake_is_bounded() {
        let transport = MockTransport::silent();
        let log = transport.sent_log();
        let mut rfid = reader(transport);

        assert!(matches!(
            rfid.keep_alive_until_awake(),
            Err(RainError::EmptyResponse(_))
        ));
        assert_eq!(log.count(Opcode::KeepAlive), WAKE_ATTEMPTS);
    }

    #[test]
    fn test_keep_alive_until_awake_rejects_wrong_reply() {
        let transport = MockTransport::responding(|_| Some(ok(Opcode::GetTemp, &[0x10, 0x64])));
        let mut rfid = reader(transport);

        assert!(matches!(
            rfid.keep_alive_until_awake(),
            Err(RainError::ProtocolMismatch { .. })
        ));
    }

    #[test]
    fn test_stop_interrupts_retries() {
        let transport = MockTransport::silent();
        let log = transport.sent_log();
        let mut rfid = reader(transport);
        rfid.stop_signal().stop();

        assert_eq!(rfid.keep_alive_until_awake(), Err(RainError::Stopped));
        assert_eq!(rfid.set_op_state(OperatingState::TagRead), Err(RainError::Stopped));
        assert!(log.frames().is_empty());
    }

    #[test]
    fn test_stale_reply_after_stop_reports_stopped() {
        // Stop lands while the keep-alive is in flight and a leftover set reply comes back
        let stop = StopSignal::new();
        let raise = stop.clone();
        let transport = MockTransport::responding(move |_| {
            raise.stop();
            Some(ok(Opcode::SetTxPower, &[]))
        });
        let log = transport.sent_log();
        let mut rfid = reader(transport);
        rfid.set_stop_signal(stop);

        assert_eq!(rfid.keep_alive_until_awake(), Err(RainError::Stopped));
        assert_eq!(log.count(Opcode::KeepAlive), 1);
    }
}
