// 50 Hz control loop with command watchdog
//
// Each tick: drain drive commands, fall back to zero if they went stale, pass
// both axes through their speed limiters, throttle the two motors, issue one
// telemetry GET and publish the telemetry record plus health.

use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::{
    AxisConfig, CMD_TIMEOUT, LOOP_HZ, RuntimeConfig, TOPIC_CMD_DRIVE, TOPIC_HEALTH,
    TOPIC_TELEMETRY,
};
use crate::limiter::SpeedLimiter;
use crate::messages::{DriveActuation, DriveCommand, RuntimeHealth, TelemetryRecord};
use crate::motor::kinematics::duty_to_speed;
use crate::motor::{
    Motor, Sabertooth, SabertoothError, SerialTransport, SimulatedController, Transport,
    body_to_wheel_duty,
};

/// Consecutive unanswered GETs before the link is reported down
const LINK_DOWN_AFTER: u32 = 5;

/// Telemetry requests, one per tick, round robin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Poll {
    Battery,
    Current(u8),
    Temperature(u8),
    DutyCycle(u8),
}

const POLL_SEQUENCE: [Poll; 7] = [
    Poll::Battery,
    Poll::Current(1),
    Poll::Current(2),
    Poll::Temperature(1),
    Poll::Temperature(2),
    Poll::DutyCycle(1),
    Poll::DutyCycle(2),
];

pub struct Runtime<T: Transport> {
    controller: Sabertooth<T>,
    linear: SpeedLimiter,
    angular: SpeedLimiter,
    tick_frequency: u32,
    started: Instant,
    latest_cmd: Option<DriveCommand>,
    cmd_received_at: Instant,
    cmd_stale: bool,
    actuation: DriveActuation,
    poll_index: usize,
    missed_replies: u32,
}

impl<T: Transport> Runtime<T> {
    pub fn new(controller: Sabertooth<T>, config: &RuntimeConfig) -> Self {
        let limiter = |axis: &AxisConfig| {
            SpeedLimiter::new(axis.limits)
                .with_frequency(config.tick_frequency)
                .with_input_timeout(config.input_timeout)
                .with_exponential_mapping(axis.exponential_mapping)
        };
        Self {
            controller,
            linear: limiter(&config.linear),
            angular: limiter(&config.angular),
            tick_frequency: config.tick_frequency,
            started: Instant::now(),
            latest_cmd: None,
            cmd_received_at: Instant::now(),
            cmd_stale: true, // Start stale until first cmd
            actuation: DriveActuation::default(),
            poll_index: 0,
            missed_replies: 0,
        }
    }

    pub fn controller(&self) -> &Sabertooth<T> {
        &self.controller
    }

    /// Last limited velocities sent to the motors
    pub fn actuation(&self) -> DriveActuation {
        self.actuation
    }

    pub fn health(&self) -> RuntimeHealth {
        if self.missed_replies >= LINK_DOWN_AFTER {
            RuntimeHealth::LinkDown
        } else if self.cmd_stale {
            RuntimeHealth::CmdStale
        } else {
            RuntimeHealth::Ok
        }
    }

    /// Configure the controller before the first tick
    pub fn start(&mut self, serial_timeout_ms: i16) -> Result<(), SabertoothError> {
        self.controller.set_timeout(serial_timeout_ms)?;
        self.controller.startup()?;
        self.controller.stop()
    }

    /// Process incoming command
    pub fn on_command(&mut self, cmd: DriveCommand) {
        debug!("Received command: {:?}", &cmd);
        self.latest_cmd = Some(cmd);
        self.cmd_received_at = Instant::now();
    }

    /// Tick counter at the limiter frequency
    pub fn current_tick(&self) -> u32 {
        let ticks = self.started.elapsed().as_secs_f64() * f64::from(self.tick_frequency);
        (ticks as u64) as u32
    }

    /// Raw target based on watchdog state
    fn target(&mut self) -> DriveActuation {
        let cmd_age = self.cmd_received_at.elapsed();

        if cmd_age > CMD_TIMEOUT {
            // Watchdog triggered - stop the robot
            if !self.cmd_stale {
                warn!("Command stale ({:?} old), stopping robot", cmd_age);
            }
            self.cmd_stale = true;
            DriveActuation::default()
        } else if let Some(ref cmd) = self.latest_cmd {
            self.cmd_stale = false;
            DriveActuation::from(cmd)
        } else {
            // No command ever received
            self.cmd_stale = true;
            DriveActuation::default()
        }
    }

    /// Run one control tick at `tick`
    pub fn step(&mut self, tick: u32) -> Result<DriveActuation, SabertoothError> {
        let target = self.target();
        let linear = self.linear.limit(target.linear, tick);
        let angular = self.angular.limit(target.angular, tick);
        if linear.factor < 1.0 || angular.factor < 1.0 {
            debug!(
                "Limited linear x{:.3}, angular x{:.3}",
                linear.factor, angular.factor
            );
        }

        let duty = body_to_wheel_duty(linear.velocity, angular.velocity);
        self.controller.throttle(1, duty.left)?;
        self.controller.throttle(2, duty.right)?;

        self.actuation = DriveActuation {
            linear: linear.velocity,
            angular: angular.velocity,
        };
        self.poll_telemetry()?;
        Ok(self.actuation)
    }

    /// Issue the next telemetry GET. Timeouts are counted, not fatal.
    fn poll_telemetry(&mut self) -> Result<(), SabertoothError> {
        let poll = POLL_SEQUENCE[self.poll_index];
        self.poll_index = (self.poll_index + 1) % POLL_SEQUENCE.len();

        let result = match poll {
            Poll::Battery => self.controller.read_battery(),
            Poll::Current(m) => self.controller.read_current(m).map(|_| ()),
            Poll::Temperature(m) => self.controller.read_temperature(m).map(|_| ()),
            Poll::DutyCycle(m) => self.controller.read_duty_cycle(m).map(|_| ()),
        };

        match result {
            Ok(()) => {
                self.missed_replies = 0;
                Ok(())
            }
            Err(SabertoothError::Timeout { address }) => {
                self.missed_replies = self.missed_replies.saturating_add(1);
                if self.missed_replies == LINK_DOWN_AFTER {
                    warn!("Controller {} stopped answering {:?} requests", address, poll);
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Snapshot of the cached telemetry
    pub fn record(&self) -> TelemetryRecord {
        let m1 = self.controller.telemetry(Motor::One);
        let m2 = self.controller.telemetry(Motor::Two);
        let mm_per_s = |duty: i16| (duty_to_speed(duty) * 1000.0).round() as i16;
        TelemetryRecord::from_telemetry(m1, m2, [mm_per_s(m1.duty_cycle), mm_per_s(m2.duty_cycle)])
    }

    /// Stop and brake both motors
    pub fn halt(&mut self) -> Result<(), SabertoothError> {
        self.controller.stop()?;
        self.controller.shutdown()
    }
}

pub async fn run(config: RuntimeConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    config.validate()?;

    if config.simulate {
        info!("Using simulated controller at address {}", config.address);
        let transport = SimulatedController::new(config.address);
        drive(transport, &config).await
    } else {
        info!("Opening controller on {} @ {} baud", config.port, config.baudrate);
        let transport = SerialTransport::open_with_baudrate(&config.port, config.baudrate)?;
        drive(transport, &config).await
    }
}

async fn drive<T: Transport>(
    transport: T,
    config: &RuntimeConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let controller =
        Sabertooth::new(transport, config.address).with_reply_timeout(config.reply_timeout());
    let mut runtime = Runtime::new(controller, config);
    runtime.start(config.serial_timeout_ms)?;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD_DRIVE).await?;
    let pub_telemetry = session.declare_publisher(TOPIC_TELEMETRY).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout",
        LOOP_HZ,
        CMD_TIMEOUT.as_millis()
    );
    info!("Subscribed to: {}", TOPIC_CMD_DRIVE);
    info!("Publishing to: {}, {}", TOPIC_TELEMETRY, TOPIC_HEALTH);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, halting motors");
                runtime.halt()?;
                return Ok(());
            }
        }

        // 1. Drain all pending commands (non-blocking), keep latest
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<DriveCommand>(&payload) {
                Ok(cmd) => runtime.on_command(cmd),
                Err(e) => warn!("Failed to parse command: {}", e),
            }
        }

        // 2. Limit, actuate and poll telemetry; serial waits are bounded but blocking
        let now = runtime.current_tick();
        tokio::task::block_in_place(|| runtime.step(now))?;

        // 3. Publish telemetry
        let telemetry_json = serde_json::to_string(&runtime.record())?;
        pub_telemetry.put(telemetry_json).await?;

        // 4. Publish health
        let health_json = serde_json::to_string(&runtime.health())?;
        pub_health.put(health_json).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::packet::REPLY_FRAME_LEN;

    fn config() -> RuntimeConfig {
        RuntimeConfig {
            simulate: true,
            ..RuntimeConfig::default()
        }
    }

    fn sim_runtime() -> Runtime<SimulatedController> {
        let cfg = config();
        let controller = Sabertooth::new(SimulatedController::new(cfg.address), cfg.address);
        Runtime::new(controller, &cfg)
    }

    /// Link that accepts frames but never answers
    struct SilentLink;

    impl Transport for SilentLink {
        fn send(&mut self, _frame: &[u8]) -> crate::motor::transport::Result<()> {
            Ok(())
        }

        fn receive(
            &mut self,
            _timeout: Duration,
        ) -> crate::motor::transport::Result<Option<[u8; REPLY_FRAME_LEN]>> {
            Ok(None)
        }
    }

    #[test]
    fn test_no_command_is_stale_and_still() {
        let mut runtime = sim_runtime();
        runtime.start(0).unwrap();
        runtime.step(0).unwrap();
        let out = runtime.step(20).unwrap();

        assert_eq!(out, DriveActuation::default());
        assert_eq!(runtime.health(), RuntimeHealth::CmdStale);
        assert_eq!(runtime.controller().transport().duty_cycle(Motor::One), 0);
    }

    #[test]
    fn test_command_ramps_under_limits() {
        let mut runtime = sim_runtime();
        let limits = config().linear.limits;
        runtime.on_command(DriveCommand {
            linear: 1.0,
            angular: 0.0,
        });

        let mut previous = 0.0;
        runtime.step(0).unwrap();
        for i in 1..=10 {
            let out = runtime.step(i * 20).unwrap();
            assert!(out.linear <= limits.max_vel);
            assert!(out.linear - previous <= limits.max_acc * 0.02 + 1e-6);
            previous = out.linear;
        }
        assert!(previous > 0.0);
        assert_eq!(runtime.health(), RuntimeHealth::Ok);

        let left = runtime.controller().transport().duty_cycle(Motor::One);
        let right = runtime.controller().transport().duty_cycle(Motor::Two);
        assert!(left > 0);
        assert_eq!(left, right);
    }

    #[test]
    fn test_polling_fills_record() {
        let mut runtime = sim_runtime();
        runtime.on_command(DriveCommand {
            linear: 0.5,
            angular: 0.0,
        });
        for i in 0..(POLL_SEQUENCE.len() as u32 * 2) {
            runtime.step(i * 20).unwrap();
        }

        let record = runtime.record();
        assert_eq!(record.voltage, 240);
        assert!(record.duty_cycle_1 > 0);
        assert!(record.velocity_1 > 0);
        assert!(record.temperature_1 >= 25);
        assert_eq!(runtime.controller().rejected_replies(), 0);
    }

    #[test]
    fn test_silent_link_reports_down() {
        let cfg = config();
        let controller = Sabertooth::new(SilentLink, cfg.address);
        let mut runtime = Runtime::new(controller, &cfg);

        for i in 0..LINK_DOWN_AFTER {
            runtime.step(i * 20).unwrap();
        }
        assert_eq!(runtime.health(), RuntimeHealth::LinkDown);
    }

    #[test]
    fn test_halt_brakes() {
        let mut runtime = sim_runtime();
        runtime.halt().unwrap();
        assert!(runtime.controller().transport().is_shutdown());
    }
}
