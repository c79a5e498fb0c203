//! Session worker: wait for a start request, configure the reader, optionally
//! read tags, report one aggregated result per cycle.

use log::{error, info, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

use crate::channel::{ConfigChannel, StopSignal};
use crate::reader::RainReader;
use crate::transport::RainTransport;
use crate::types::{
    AntennaEnables, OperatingState, RainError, Result, TagReport, TxPowerSet, Version,
};

/// Tag report polls per cycle before giving up
pub const TAG_REPORT_ATTEMPTS: usize = 10;

/// Parameters for one session cycle, supplied by the host
#[derive(Debug, Clone, PartialEq)]
pub struct SessionParameters {
    pub enable_tag_report: bool,
    pub enable_sound_effect: bool,
    pub region: String,
    pub tx_power: TxPowerSet,
    pub antennas: AntennaEnables,
}

impl Default for SessionParameters {
    fn default() -> Self {
        Self {
            enable_tag_report: false,
            enable_sound_effect: false,
            region: "FCC".into(),
            tx_power: TxPowerSet([30.0; 4]),
            antennas: AntennaEnables([true, false, false, false]),
        }
    }
}

/// Individual steps of a cycle, used as error keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Step {
    KeepAlive,
    SetIdleState,
    SetRegion,
    SetTxPower,
    SetAntennaEnables,
    GetVersion,
    GetTemperature,
    GetRegion,
    GetTxPower,
    GetAntennaEnables,
    SetTagReadState,
    GetOpState,
    GetTagReport,
    RestoreIdleState,
}

impl Step {
    pub fn name(self) -> &'static str {
        match self {
            Self::KeepAlive => "keep_alive",
            Self::SetIdleState => "set_idle_state",
            Self::SetRegion => "set_region",
            Self::SetTxPower => "set_tx_power",
            Self::SetAntennaEnables => "set_antenna_enables",
            Self::GetVersion => "get_version",
            Self::GetTemperature => "get_temperature",
            Self::GetRegion => "get_region",
            Self::GetTxPower => "get_tx_power",
            Self::GetAntennaEnables => "get_antenna_enables",
            Self::SetTagReadState => "set_tag_read_state",
            Self::GetOpState => "get_op_state",
            Self::GetTagReport => "get_tag_report",
            Self::RestoreIdleState => "restore_idle_state",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything one cycle obtained, plus an error message per failed step
///
/// A step with no entry in `errors` succeeded or was not attempted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleResult {
    pub alive: bool,
    pub version: Option<Version>,
    pub temperature: Option<f32>,
    pub region: Option<String>,
    pub tx_power: Option<TxPowerSet>,
    pub antennas: Option<AntennaEnables>,
    pub op_state: Option<OperatingState>,
    pub tag_report: Option<TagReport>,
    pub errors: BTreeMap<Step, String>,
}

impl CycleResult {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error(&self, step: Step) -> Option<&str> {
        self.errors.get(&step).map(String::as_str)
    }

    /// Keep the value of a successful step, note the error of a failed one
    fn record<V>(&mut self, step: Step, result: Result<V>) -> Option<V> {
        match result {
            Ok(value) => {
                self.errors.remove(&step);
                Some(value)
            }
            Err(e) => {
                warn!("Step {} failed: {}", step, e);
                self.errors.insert(step, e.to_string());
                None
            }
        }
    }
}

/// What the session worker tells the host
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// One per completed cycle
    Cycle(CycleResult),
    /// A tag was reported and the cycle asked for a sound effect
    TagDetected,
    /// The transport could not be opened; the worker has exited
    Halted(RainError),
}

enum State {
    AwaitingStart,
    Configuring(SessionParameters, CycleResult),
    ReadingTags(SessionParameters, CycleResult),
    Reporting(CycleResult),
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            Self::AwaitingStart => "AwaitingStart",
            Self::Configuring(..) => "Configuring",
            Self::ReadingTags(..) => "ReadingTags",
            Self::Reporting(_) => "Reporting",
        }
    }
}

pub struct Session<T: RainTransport> {
    reader: RainReader<T>,
    channel: ConfigChannel,
    events: Sender<SessionEvent>,
}

impl<T: RainTransport> Session<T> {
    pub fn new(
        reader: RainReader<T>,
        channel: ConfigChannel,
        events: Sender<SessionEvent>,
    ) -> Self {
        Self {
            reader,
            channel,
            events,
        }
    }

    /// Open the transport and run cycles until the reader's stop signal is raised
    ///
    /// Returns the open error if the transport cannot be opened, after
    /// emitting it as [`SessionEvent::Halted`].
    pub fn run(mut self) -> Result<()> {
        if let Err(e) = self.reader.open() {
            error!("Unable to open reader transport: {}", e);
            let _ = self.events.send(SessionEvent::Halted(e.clone()));
            return Err(e);
        }
        info!("Reader session started");

        self.run_cycles();

        if let Err(e) = self.reader.close() {
            warn!("Unable to close reader transport: {}", e);
        }
        info!("Reader session stopped");
        Ok(())
    }

    fn run_cycles(&mut self) {
        let mut state = State::AwaitingStart;
        loop {
            let next = match state {
                State::AwaitingStart => match self.await_start() {
                    Some(next) => next,
                    None => return,
                },
                State::Configuring(params, mut cycle) => {
                    self.configure(&params, &mut cycle);
                    if params.enable_tag_report {
                        State::ReadingTags(params, cycle)
                    } else {
                        State::Reporting(cycle)
                    }
                }
                State::ReadingTags(params, mut cycle) => {
                    self.read_tags(&params, &mut cycle);
                    State::Reporting(cycle)
                }
                State::Reporting(cycle) => {
                    info!(
                        "Cycle complete: {} step error(s), tag report {}",
                        cycle.errors.len(),
                        if cycle.tag_report.is_some() { "obtained" } else { "absent" }
                    );
                    if self.events.send(SessionEvent::Cycle(cycle)).is_err() {
                        warn!("Result receiver dropped, ending session");
                        return;
                    }
                    State::AwaitingStart
                }
            };
            info!("Session state: {}", next.name());
            state = next;
        }
    }

    /// Keep the reader awake until a start request arrives; `None` once stopped
    fn await_start(&mut self) -> Option<State> {
        loop {
            let requested = self.channel.peek().is_some();
            let alive = self.reader.keep_alive_until_awake();
            if alive == Err(RainError::Stopped) {
                return None;
            }
            if self.reader.pause(self.reader.timing.pacing).is_err() {
                return None;
            }
            if !requested {
                continue;
            }
            let Some(params) = self.channel.take() else {
                continue;
            };

            info!("Start requested: {:?}", params);
            let mut cycle = CycleResult::default();
            return Some(match cycle.record(Step::KeepAlive, alive) {
                Some(()) => {
                    cycle.alive = true;
                    State::Configuring(params, cycle)
                }
                None => State::Reporting(cycle),
            });
        }
    }

    fn configure(&mut self, params: &SessionParameters, cycle: &mut CycleResult) {
        let reader = &mut self.reader;

        // Idle first so setup does not disturb RF
        cycle.record(Step::SetIdleState, reader.set_op_state(OperatingState::Idle));
        cycle.record(Step::SetRegion, reader.set_op_region(&params.region));
        cycle.record(Step::SetTxPower, reader.set_tx_power(&params.tx_power));
        cycle.record(Step::SetAntennaEnables, reader.set_ant_enables(params.antennas));

        cycle.version = cycle.record(Step::GetVersion, reader.get_version());
        cycle.temperature = cycle.record(Step::GetTemperature, reader.get_temperature());
        cycle.region = cycle.record(Step::GetRegion, reader.get_op_region());
        cycle.tx_power = cycle.record(Step::GetTxPower, reader.get_tx_power());
        cycle.antennas = cycle.record(Step::GetAntennaEnables, reader.get_ant_enables());

        for _ in 0..2 {
            cycle.alive = cycle
                .record(Step::KeepAlive, reader.keep_alive_until_awake())
                .is_some();
        }
    }

    fn read_tags(&mut self, params: &SessionParameters, cycle: &mut CycleResult) {
        let reader = &mut self.reader;

        cycle.record(Step::SetTagReadState, reader.set_op_state(OperatingState::TagRead));
        cycle.op_state = cycle.record(Step::GetOpState, reader.get_op_state());

        let mut outcome = Err(RainError::EmptyResponse("no tag report requested".into()));
        for attempt in 1..=TAG_REPORT_ATTEMPTS {
            outcome = reader.get_tag_report();
            match &outcome {
                Ok(report) => {
                    info!("Tag report on attempt {}: {:?}", attempt, report);
                    break;
                }
                Err(RainError::Stopped) => break,
                Err(_) => {}
            }
        }
        cycle.tag_report = cycle.record(Step::GetTagReport, outcome);

        // Back to idle whether or not a tag was seen
        cycle.record(Step::RestoreIdleState, reader.set_op_state(OperatingState::Idle));

        if cycle.tag_report.is_some() && params.enable_sound_effect {
            let _ = self.events.send(SessionEvent::TagDetected);
        }
    }
}

/// A session worker running on its own thread
pub struct SessionHandle {
    events: Receiver<SessionEvent>,
    stop: StopSignal,
    worker: Option<JoinHandle<Result<()>>>,
}

impl SessionHandle {
    pub fn events(&self) -> &Receiver<SessionEvent> {
        &self.events
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// Raise the stop signal and wait for the worker to close the transport
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.stop.stop();
        match self.worker.take() {
            Some(worker) => worker
                .join()
                .unwrap_or_else(|_| Err(RainError::Transport("session worker panicked".into()))),
            None => Ok(()),
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Session ended with error: {}", e);
        }
    }
}

/// Start the session loop on a dedicated thread
///
/// The reader's stop signal is replaced by the handle's, so stopping the
/// handle interrupts every wait inside the loop.
pub fn spawn_session<T>(mut reader: RainReader<T>, channel: ConfigChannel) -> Result<SessionHandle>
where
    T: RainTransport + Send + 'static,
{
    let stop = StopSignal::new();
    reader.set_stop_signal(stop.clone());
    let (tx, rx) = mpsc::channel();

    let worker = std::thread::Builder::new()
        .name("rain-session".into())
        .spawn(move || Session::new(reader, channel, tx).run())
        .map_err(|e| RainError::Transport(format!("{:?}", e)))?;

    Ok(SessionHandle {
        events: rx,
        stop,
        worker: Some(worker),
    })
}
