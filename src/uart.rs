//! UART transport for ESP32 using esp-idf-svc

use crate::transport::RainTransport;
use esp_idf_svc::hal::delay::TickType;
use esp_idf_svc::hal::gpio::{self, InputPin, OutputPin};
use esp_idf_svc::hal::peripheral::Peripheral;
use esp_idf_svc::hal::uart::{self, UartDriver};
use std::time::{Duration, Instant};

/// The driver is installed when constructed; `open` and `close` only reset the receive FIFO.
pub struct UartTransport<'a> {
    uart: UartDriver<'a>,
}

impl<'a> UartTransport<'a> {
    pub fn new(
        uart: impl Peripheral<P = impl uart::Uart> + 'a,
        tx: impl Peripheral<P = impl OutputPin> + 'a,
        rx: impl Peripheral<P = impl InputPin> + 'a,
        baud_rate: u32,
    ) -> Result<Self, esp_idf_svc::sys::EspError> {
        let config = uart::config::Config::default().baudrate(baud_rate.into());
        let uart = UartDriver::new(
            uart,
            tx,
            rx,
            Option::<gpio::Gpio0>::None,
            Option::<gpio::Gpio0>::None,
            &config,
        )?;

        Ok(Self { uart })
    }
}

impl RainTransport for UartTransport<'_> {
    type Error = esp_idf_svc::sys::EspError;

    fn open(&mut self) -> Result<(), Self::Error> {
        std::thread::sleep(Duration::from_millis(500));
        self.uart.clear_rx()
    }

    fn send(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        self.uart.clear_rx()?;
        let mut written = 0;
        while written < data.len() {
            written += self.uart.write(&data[written..])?;
        }
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, Self::Error> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 256];

        loop {
            let read = self.uart.read(&mut buf, TickType::from(Duration::from_millis(1)).ticks())?;
            if read > 0 {
                return Ok(buf[..read].to_vec());
            }
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
        }
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        self.uart.clear_rx()
    }
}
