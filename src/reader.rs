use log::{debug, warn};
use std::time::Duration;

use crate::channel::StopSignal;
use crate::frame::{
    Frame, Opcode, Payload, encode_request, read_be_uint, read_i16, read_u16, read_u32,
};
use crate::transport::RainTransport;
use crate::types::{
    AntennaEnables, EventMask, OperatingState, OperationalParamValue, OperationalParameter,
    RainError, ReplyReason, Result, TagReport, TxPowerSet, Version,
};

/// Delays observed around each exchange with the reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Bound on a single receive
    pub short_timeout: Duration,
    /// Delay between sending a query and reading its answer
    pub query_settle: Duration,
    /// Delay between sending a "set" and reading its answer
    pub set_settle: Duration,
    /// Delay between retry attempts and idle keep-alives
    pub pacing: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            short_timeout: Duration::from_secs(1),
            query_settle: Duration::from_millis(500),
            set_settle: Duration::from_secs(1),
            pacing: Duration::from_secs(1),
        }
    }
}

impl Timing {
    /// No delays at all; for simulated readers
    pub const fn immediate() -> Self {
        Self {
            short_timeout: Duration::ZERO,
            query_settle: Duration::ZERO,
            set_settle: Duration::ZERO,
            pacing: Duration::ZERO,
        }
    }
}

pub struct RainReader<T: RainTransport> {
    pub(crate) transport: T,
    pub(crate) timing: Timing,
    pub(crate) stop: StopSignal,
}

impl<T: RainTransport> RainReader<T> {
    /// Create a new reader instance with the given transport and production timing
    pub fn new(transport: T) -> Self {
        Self::with_timing(transport, Timing::default())
    }

    pub fn with_timing(transport: T, timing: Timing) -> Self {
        Self {
            transport,
            timing,
            stop: StopSignal::new(),
        }
    }

    /// Make every wait of this reader return early once `stop` is raised
    pub fn set_stop_signal(&mut self, stop: StopSignal) {
        self.stop = stop;
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn open(&mut self) -> Result<()> {
        self.transport
            .open()
            .map_err(|e| RainError::Transport(format!("{:?}", e)))
    }

    pub fn close(&mut self) -> Result<()> {
        self.transport
            .close()
            .map_err(|e| RainError::Transport(format!("{:?}", e)))
    }

    /// Get firmware, SDK, software and hardware revisions
    pub fn get_version(&mut self) -> Result<Version> {
        self.query(Opcode::GetVersion, Payload::Empty)
            .and_then(|frame| Self::parse_version(&frame))
    }

    /// Get the module temperature in °C
    pub fn get_temperature(&mut self) -> Result<f32> {
        let frame = self.query(Opcode::GetTemp, Payload::Empty)?;
        read_u16(frame.payload(), 0)
            .map(|raw| raw as f32 / 100.0)
            .ok_or_else(|| {
                RainError::InvalidResponse(format!(
                    "Temperature response too short: {:02X?}",
                    frame.as_bytes()
                ))
            })
    }

    /// Get the regulatory region name (e.g. "FCC")
    pub fn get_op_region(&mut self) -> Result<String> {
        let frame = self.query(Opcode::GetOpRegion, Payload::Empty)?;
        let payload = frame.payload();
        let end = payload.iter().position(|&b| b == 0x00).unwrap_or(payload.len());
        if end == 0 {
            return Err(RainError::InvalidResponse("Region response has no name".into()));
        }
        Ok(String::from_utf8_lossy(&payload[..end]).into_owned())
    }

    pub fn set_op_region(&mut self, region: &str) -> Result<()> {
        if region.is_empty() || region.as_bytes().contains(&0x00) {
            return Err(RainError::InvalidParameter(format!(
                "Invalid operating region name: {:?}",
                region
            )));
        }
        self.apply(Opcode::SetOpRegion, Payload::Text(region.into()), || {
            format!("Invalid operating region: {}", region)
        })
    }

    /// Get transmit power of all four antennas
    pub fn get_tx_power(&mut self) -> Result<TxPowerSet> {
        let frame = self.query(Opcode::GetTxPower, Payload::Empty)?;
        let payload = frame.payload();
        let mut words = [0u16; 4];
        for (i, word) in words.iter_mut().enumerate() {
            *word = read_u16(payload, i * 2).ok_or_else(|| {
                RainError::InvalidResponse(format!(
                    "TX power response too short: {} bytes",
                    payload.len()
                ))
            })?;
        }
        Ok(TxPowerSet::from_centi_dbm(words))
    }

    pub fn set_tx_power(&mut self, power: &TxPowerSet) -> Result<()> {
        let words = power.to_centi_dbm()?;
        self.apply(Opcode::SetTxPower, Payload::Words(words), || {
            format!(
                "Unable to set tx power to {}, {}, {}, {}",
                power.0[0], power.0[1], power.0[2], power.0[3]
            )
        })
    }

    pub fn get_ant_enables(&mut self) -> Result<AntennaEnables> {
        let frame = self.query(Opcode::GetAntEnables, Payload::Empty)?;
        read_u16(frame.payload(), 0)
            .map(AntennaEnables::from_bits)
            .ok_or_else(|| {
                RainError::InvalidResponse(format!(
                    "Antenna enables response too short: {:02X?}",
                    frame.as_bytes()
                ))
            })
    }

    pub fn set_ant_enables(&mut self, enables: AntennaEnables) -> Result<()> {
        self.apply(Opcode::SetAntEnables, Payload::Word(enables.to_bits()), || {
            format!("Unable to set antenna enables to {:?}", enables.0)
        })
    }

    pub fn get_op_state(&mut self) -> Result<OperatingState> {
        let frame = self.query(Opcode::GetOpState, Payload::Empty)?;
        read_u16(frame.payload(), 2)
            .map(OperatingState::from_code)
            .ok_or_else(|| {
                RainError::InvalidResponse(format!(
                    "Operating state response too short: {:02X?}",
                    frame.as_bytes()
                ))
            })
    }

    pub fn set_op_state(&mut self, state: OperatingState) -> Result<()> {
        self.apply(Opcode::SetOpState, Payload::Word(state.code()), || {
            format!("Unable to set operating state to {:?}", state)
        })
    }

    pub fn get_operational_param(
        &mut self,
        param: OperationalParameter,
    ) -> Result<OperationalParamValue> {
        debug!("Getting operational param '{}'", param);
        let frame = self.query(
            Opcode::GetOpParams,
            Payload::Raw(param.code().to_be_bytes().to_vec()),
        )?;
        let payload = frame.payload();
        let code = read_u16(payload, 0).ok_or_else(|| {
            RainError::InvalidResponse(format!(
                "Operational param response too short: {:02X?}",
                frame.as_bytes()
            ))
        })?;
        Ok(OperationalParamValue {
            param: OperationalParameter::from_code(code),
            value: read_be_uint(&payload[2..]) as u32,
        })
    }

    pub fn set_operational_param(&mut self, param: OperationalParameter, value: u32) -> Result<()> {
        debug!("Setting operational param '{}' to {}", param, value);
        let payload = Payload::Param {
            code: param.code().to_be_bytes().to_vec(),
            value,
        };
        self.apply(Opcode::SetOpParams, payload, || {
            format!("Unable to set '{}' to '{}'", param, value)
        })
    }

    pub fn get_event_mask(&mut self) -> Result<EventMask> {
        let frame = self.query(Opcode::GetEventMask, Payload::Empty)?;
        read_u32(frame.payload(), 0)
            .map(EventMask::from_bits)
            .ok_or_else(|| {
                RainError::InvalidResponse(format!(
                    "Event mask response too short: {:02X?}",
                    frame.as_bytes()
                ))
            })
    }

    pub fn set_event_mask(&mut self, mask: EventMask) -> Result<()> {
        self.apply(Opcode::SetEventMask, Payload::Int32(mask.to_bits()), || {
            format!("Unable to set event mask to 0x{:08X}", mask.to_bits())
        })
    }

    /// Ask the reader to report on the tag population (empty EPC filter)
    pub fn get_tag_report(&mut self) -> Result<TagReport> {
        self.query(Opcode::GetTagReport, Payload::Raw(vec![0x00, 0x00]))
            .and_then(|frame| Self::parse_tag_report(&frame))
    }

    /// Single liveness probe
    pub fn keep_alive(&mut self) -> Result<()> {
        self.send(Opcode::KeepAlive, &Payload::Empty)?;
        self.await_short(Opcode::KeepAlive)?.validate(Opcode::KeepAlive)
    }

    fn parse_version(frame: &Frame) -> Result<Version> {
        let mut fields = frame
            .payload()
            .split(|&b| b == 0x00)
            .map(|field| String::from_utf8_lossy(field).into_owned());
        let mut next = || {
            fields.next().filter(|field| !field.is_empty()).ok_or_else(|| {
                RainError::InvalidResponse(format!(
                    "Invalid version response: {:02X?}",
                    frame.as_bytes()
                ))
            })
        };
        Ok(Version {
            firmware: next()?,
            sdk: next()?,
            software: next()?,
            hardware: next()?,
        })
    }

    fn parse_tag_report(frame: &Frame) -> Result<TagReport> {
        const FIXED_LEN: usize = 12;

        let payload = frame.payload();
        if payload.len() < FIXED_LEN {
            return Err(RainError::InvalidResponse(format!(
                "Tag report too short: {} bytes",
                payload.len()
            )));
        }
        // Length is checked above, so the fixed fields are present
        let word = |offset| read_u16(payload, offset).unwrap_or_default();
        Ok(TagReport {
            reply_reason: ReplyReason::from_code(word(0)),
            rssi_raw: read_i16(payload, 2).unwrap_or_default(),
            power_dbm: read_i16(payload, 4).unwrap_or_default(),
            timestamp: read_u32(payload, 6).unwrap_or_default(),
            antenna_id: word(10),
            epc_data: payload[FIXED_LEN..].to_vec(),
        })
    }

    /// Send a query, give the reader time to answer and validate what comes back
    fn query(&mut self, opcode: Opcode, payload: Payload) -> Result<Frame> {
        self.send(opcode, &payload)?;
        self.pause(self.timing.query_settle)?;
        let frame = self.await_short(opcode)?;
        frame.validate(opcode).map_err(|e| match e {
            RainError::Device { status, .. } => RainError::Device {
                status,
                context: format!("Unable to get {:?}", opcode),
            },
            other => other,
        })?;
        Ok(frame)
    }

    /// Send a "set" and confirm it, waiting for asynchronous completion if the
    /// reader does not answer right away
    fn apply<F>(&mut self, opcode: Opcode, payload: Payload, describe: F) -> Result<()>
    where
        F: FnOnce() -> String,
    {
        self.send(opcode, &payload)?;
        self.pause(self.timing.set_settle)?;
        let mut frame = self.await_short(opcode)?;
        if frame.is_empty() {
            debug!("No immediate answer to {:?}, waiting for completion", opcode);
            frame = self.await_long(opcode)?;
        }

        frame.validate(opcode).map_err(|e| {
            let context = describe();
            warn!("{}: {}", context, e);
            match e {
                RainError::Device { status, .. } => RainError::Device { status, context },
                RainError::EmptyResponse(_) => RainError::EmptyResponse(context),
                other => other,
            }
        })
    }

    /// Write one command; nothing goes out once the stop signal is raised
    pub(crate) fn send(&mut self, opcode: Opcode, payload: &Payload) -> Result<()> {
        if self.stop.is_stopped() {
            debug!("Stopped, not sending {:?}", opcode);
            return Err(RainError::Stopped);
        }
        let cmd = encode_request(opcode, payload);
        debug!("Sending command: {:02X?}", cmd);
        self.transport
            .send(&cmd)
            .map_err(|e| RainError::Transport(format!("{:?}", e)))
    }

    /// Wait for `duration`, or fail with `Stopped` as soon as the stop signal is raised
    pub(crate) fn pause(&self, duration: Duration) -> Result<()> {
        if self.stop.wait(duration) {
            Err(RainError::Stopped)
        } else {
            Ok(())
        }
    }
}
