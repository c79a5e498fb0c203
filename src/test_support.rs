//! In-memory reader simulation for unit tests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::frame::{Opcode, decode_request};
use crate::transport::RainTransport;

/// Build a response frame: marker, length, opcode word, status, payload
pub(crate) fn response(opcode: u16, status: u16, payload: &[u8]) -> Vec<u8> {
    let length = (6 + payload.len()) as u16;
    let mut frame = vec![0xF6, 0x28];
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(&opcode.to_be_bytes());
    frame.extend_from_slice(&status.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

pub(crate) fn ok(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    response(opcode.response_code(), 0x0000, payload)
}

pub(crate) const VERSION_PAYLOAD: &[u8] = b"1.2.0\x001.2.0\x002.0.0\x001.0\x00";

pub(crate) const TAG_REPORT_PAYLOAD: &[u8] = &[
    0x00, 0x06, 0x06, 0x07, 0xE7, 0x2E, 0x62, 0xB6, 0x35, 0xCE, 0x00, 0x02, 0x00, 0x14, 0x01,
    0x11, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x47, 0x51, 0x00, 0x13, 0x00,
    0x03, 0x9E, 0xFF, 0x03,
];

/// Answer a command the way a healthy, idle reader would
pub(crate) fn healthy_reply(request: &[u8]) -> Option<Vec<u8>> {
    let (opcode, body) = decode_request(request).ok()?;
    let payload: Vec<u8> = match opcode {
        Opcode::GetVersion => VERSION_PAYLOAD.to_vec(),
        Opcode::GetTemp => vec![0x10, 0x64],
        Opcode::GetOpRegion => b"FCC\x00".to_vec(),
        Opcode::GetTxPower => vec![0x0B, 0xB8, 0x0B, 0xB8, 0x0B, 0xB8, 0x0B, 0xB8],
        Opcode::GetAntEnables => vec![0x00, 0x0F],
        Opcode::GetOpState => vec![0x00, 0x00, 0x00, 0x04],
        Opcode::GetTagReport => TAG_REPORT_PAYLOAD.to_vec(),
        Opcode::GetEventMask => vec![0x00, 0x00, 0x00, 0x3F],
        Opcode::GetOpParams => {
            let mut payload = body.get(..2).unwrap_or(&[0x00, 0x00][..]).to_vec();
            payload.extend_from_slice(&[0x00, 0x00, 0xEA, 0x60]);
            payload
        }
        _ => Vec::new(),
    };
    Some(ok(opcode, &payload))
}

/// Every frame written to a [`MockTransport`], shared with the test body
#[derive(Clone, Default)]
pub(crate) struct SentLog(Arc<Mutex<Vec<Vec<u8>>>>);

impl SentLog {
    pub(crate) fn frames(&self) -> Vec<Vec<u8>> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn opcodes(&self) -> Vec<Opcode> {
        self.frames()
            .iter()
            .filter_map(|frame| decode_request(frame).ok().map(|(opcode, _)| opcode))
            .collect()
    }

    pub(crate) fn count(&self, opcode: Opcode) -> usize {
        self.opcodes().iter().filter(|&&op| op == opcode).count()
    }

    /// Payloads of every command with the given opcode, in send order
    pub(crate) fn payloads(&self, opcode: Opcode) -> Vec<Vec<u8>> {
        self.frames()
            .iter()
            .filter_map(|frame| match decode_request(frame) {
                Ok((op, body)) if op == opcode => Some(body.to_vec()),
                _ => None,
            })
            .collect()
    }
}

type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

/// Mock transport that answers each send through a responder closure,
/// or plays back a fixed script of receive buffers
pub(crate) struct MockTransport {
    sent: SentLog,
    pending: VecDeque<Vec<u8>>,
    responder: Responder,
    fail_open: bool,
}

impl MockTransport {
    pub(crate) fn responding<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        Self {
            sent: SentLog::default(),
            pending: VecDeque::new(),
            responder: Box::new(responder),
            fail_open: false,
        }
    }

    pub(crate) fn healthy() -> Self {
        Self::responding(healthy_reply)
    }

    /// Each receive returns the next buffer, then nothing
    pub(crate) fn scripted(buffers: Vec<Vec<u8>>) -> Self {
        let mut transport = Self::responding(|_| None);
        transport.pending = buffers.into();
        transport
    }

    pub(crate) fn silent() -> Self {
        Self::responding(|_| None)
    }

    pub(crate) fn failing_open() -> Self {
        let mut transport = Self::silent();
        transport.fail_open = true;
        transport
    }

    pub(crate) fn sent_log(&self) -> SentLog {
        self.sent.clone()
    }
}

impl RainTransport for MockTransport {
    type Error = std::io::Error;

    fn open(&mut self) -> Result<(), Self::Error> {
        if self.fail_open {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no such device",
            ));
        }
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        self.sent.0.lock().unwrap().push(data.to_vec());
        if let Some(reply) = (self.responder)(data) {
            self.pending.push_back(reply);
        }
        Ok(())
    }

    fn receive(&mut self, _timeout: Duration) -> Result<Vec<u8>, Self::Error> {
        Ok(self.pending.pop_front().unwrap_or_default())
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
