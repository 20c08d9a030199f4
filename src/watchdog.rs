//! Power watchdog: ends the process if the machine stays on battery.
//!
//! A long batch on a laptop unplugged from the wall drains the battery fast.
//! A background thread polls the power source; after the machine has been on
//! battery for `battery_limit_secs` it calls `on_expire` (in production a
//! hard `process::exit`). Going back to mains power resets the clock.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::WatchdogConfig;

/// Sleep granularity for shutdown responsiveness.
const SLEEP_GRANULARITY_MS: u64 = 250;

/// Where the machine currently draws power from.
pub trait PowerSource {
    fn on_battery(&self) -> bool;
}

/// Queries the operating system. Unknown platforms and unreadable state are
/// reported as mains power.
pub struct SystemPowerSource;

impl PowerSource for SystemPowerSource {
    fn on_battery(&self) -> bool {
        if cfg!(target_os = "macos") {
            match std::process::Command::new("pmset").args(["-g", "ps"]).output() {
                Ok(out) => parse_pmset(&String::from_utf8_lossy(&out.stdout)),
                Err(e) => {
                    tracing::debug!(error = %e, "pmset unavailable");
                    false
                }
            }
        } else if cfg!(target_os = "linux") {
            linux_on_battery(Path::new("/sys/class/power_supply"))
        } else {
            false
        }
    }
}

/// `pmset -g ps` prints "Now drawing from 'Battery Power'" when unplugged.
pub fn parse_pmset(output: &str) -> bool {
    output.contains("Battery Power")
}

/// Scan a sysfs `power_supply` directory. Any online mains adapter means
/// mains power; otherwise a discharging battery means battery power.
pub fn linux_on_battery(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };

    let read = |path: &Path, name: &str| {
        std::fs::read_to_string(path.join(name))
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };

    let mut discharging = false;
    for entry in entries.flatten() {
        let path = entry.path();
        match read(&path, "type").as_str() {
            "Mains" => {
                if read(&path, "online") == "1" {
                    return false;
                }
            }
            "Battery" => {
                if read(&path, "status") == "Discharging" {
                    discharging = true;
                }
            }
            _ => {}
        }
    }
    discharging
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Mains,
    OnBattery { elapsed: Duration },
    Expired { elapsed: Duration },
}

/// Tracks how long the machine has been on battery without interruption.
#[derive(Debug)]
pub struct BatteryClock {
    limit: Duration,
    since: Option<Instant>,
}

impl BatteryClock {
    pub fn new(limit: Duration) -> Self {
        Self { limit, since: None }
    }

    pub fn observe(&mut self, on_battery: bool, now: Instant) -> PowerState {
        if !on_battery {
            self.since = None;
            return PowerState::Mains;
        }
        let since = *self.since.get_or_insert(now);
        let elapsed = now.saturating_duration_since(since);
        if elapsed >= self.limit {
            PowerState::Expired { elapsed }
        } else {
            PowerState::OnBattery { elapsed }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogTiming {
    pub poll: Duration,
    pub limit: Duration,
}

impl From<&WatchdogConfig> for WatchdogTiming {
    fn from(config: &WatchdogConfig) -> Self {
        Self {
            poll: Duration::from_secs(config.poll_interval_secs),
            limit: Duration::from_secs(config.battery_limit_secs),
        }
    }
}

/// Handle for the watchdog thread. Dropping it stops and joins the thread.
pub struct WatchdogHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl WatchdogHandle {
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// Start polling `source` on a separate thread.
///
/// `on_expire` runs at most once, after which the thread exits.
pub fn start_power_watchdog(
    source: Box<dyn PowerSource + Send>,
    timing: WatchdogTiming,
    on_expire: Box<dyn FnOnce() + Send>,
) -> WatchdogHandle {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();

    let handle = std::thread::spawn(move || {
        tracing::info!(
            poll_secs = timing.poll.as_secs_f32(),
            limit_secs = timing.limit.as_secs(),
            "Power watchdog started"
        );
        watchdog_loop(source.as_ref(), timing, &flag, on_expire);
    });

    WatchdogHandle {
        shutdown,
        handle: Some(handle),
    }
}

fn watchdog_loop(
    source: &dyn PowerSource,
    timing: WatchdogTiming,
    shutdown: &AtomicBool,
    on_expire: Box<dyn FnOnce() + Send>,
) {
    let mut clock = BatteryClock::new(timing.limit);
    let step = Duration::from_millis(SLEEP_GRANULARITY_MS).min(timing.poll.max(Duration::from_millis(1)));

    while !shutdown.load(Ordering::Relaxed) {
        match clock.observe(source.on_battery(), Instant::now()) {
            PowerState::Mains => {}
            PowerState::OnBattery { elapsed } => {
                tracing::warn!(
                    elapsed_secs = elapsed.as_secs(),
                    limit_secs = timing.limit.as_secs(),
                    "Running on battery power, plug in to keep the batch going"
                );
            }
            PowerState::Expired { elapsed } => {
                tracing::error!(
                    elapsed_secs = elapsed.as_secs(),
                    "On battery too long, terminating"
                );
                on_expire();
                return;
            }
        }

        let wake = Instant::now() + timing.poll;
        while Instant::now() < wake {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            std::thread::sleep(step);
        }
    }
}
