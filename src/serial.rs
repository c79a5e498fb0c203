//! Serial port transport for desktop using serialport crate

use crate::transport::RainTransport;
use log::info;
use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

/// Port settings for the reader's UART link
#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub port_name: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    /// Timeout applied to each low-level read
    pub read_timeout: Duration,
    /// Time given to the link to settle after opening, before buffers are flushed
    pub settle: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port_name: "/dev/ttymxc2".into(),
            baud_rate: 115_200,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            read_timeout: Duration::from_millis(100),
            settle: Duration::from_secs(2),
        }
    }
}

pub struct SerialTransport {
    settings: SerialSettings,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            settings,
            port: None,
        }
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, std::io::Error> {
        let name = &self.settings.port_name;
        self.port.as_mut().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                format!("serial port {} is not open", name),
            )
        })
    }

    fn flush_buffers(port: &mut Box<dyn SerialPort>) -> Result<(), std::io::Error> {
        port.clear(ClearBuffer::All).map_err(std::io::Error::other)
    }
}

impl RainTransport for SerialTransport {
    type Error = std::io::Error;

    fn open(&mut self) -> Result<(), Self::Error> {
        let mut port = serialport::new(&self.settings.port_name, self.settings.baud_rate)
            .data_bits(self.settings.data_bits)
            .parity(self.settings.parity)
            .stop_bits(self.settings.stop_bits)
            .timeout(self.settings.read_timeout)
            .open()
            .map_err(std::io::Error::other)?;
        std::thread::sleep(self.settings.settle);
        Self::flush_buffers(&mut port)?;
        info!("Opened serial port {}", self.settings.port_name);

        self.port = Some(port);
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        let port = self.port()?;
        Self::flush_buffers(port)?;
        port.write_all(data)?;
        port.flush()
    }

    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, Self::Error> {
        let port = self.port()?;
        let deadline = Instant::now() + timeout;

        loop {
            let waiting = port.bytes_to_read().map_err(std::io::Error::other)? as usize;
            if waiting > 0 {
                let mut buf = vec![0u8; waiting];
                let read = port.read(&mut buf)?;
                buf.truncate(read);
                if !buf.is_empty() {
                    return Ok(buf);
                }
            }
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        if self.port.take().is_some() {
            info!("Closed serial port {}", self.settings.port_name);
        }
        Ok(())
    }
}
