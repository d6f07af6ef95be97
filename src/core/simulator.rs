//! Attack traffic simulation for defensive testing.
//!
//! Generates waves of synthetic events for the common attack profiles and
//! feeds them through the engine on a cancellable task.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{error, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;

use crate::core::engine::ProtectionEngine;
use crate::core::event::{Event, Protocol, TcpFlags};
use crate::core::fusion::Action;

const COMMON_PORTS: [u16; 12] = [80, 443, 22, 21, 25, 53, 110, 143, 3306, 3389, 8080, 8443];
const FLOOD_SIZES: [u64; 8] = [64, 128, 256, 512, 1024, 1500, 4096, 8192];
/// First two octets of simulated botnet ranges
const BOTNET_PREFIXES: [(u8, u8); 9] = [
    (192, 168),
    (10, 0),
    (172, 16),
    (45, 142),
    (185, 220),
    (209, 141),
    (23, 129),
    (198, 98),
    (51, 75),
];
/// Share of mixed-profile packets drawn from the non-volumetric profiles
const MIXED_VECTOR_SHARE: f64 = 0.3;
/// Packets evaluated between cooperative yields
const YIELD_EVERY: u64 = 64;

pub const MAX_WAVES: u32 = 1_000;
pub const MAX_WAVE_SIZE: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackProfile {
    Volumetric,
    SynFlood,
    Slowloris,
    DnsAmplification,
    PortScan,
    Mixed,
}

/// Synthetic event generator
pub struct AttackSimulator<R: Rng> {
    rng: R,
    target: IpAddr,
}

impl AttackSimulator<StdRng> {
    /// Reproducible generator
    pub fn seeded(seed: u64, target: IpAddr) -> Self {
        Self::new(StdRng::seed_from_u64(seed), target)
    }
}

impl<R: Rng> AttackSimulator<R> {
    pub fn new(rng: R, target: IpAddr) -> Self {
        Self { rng, target }
    }

    /// Source from a botnet range most of the time, anywhere otherwise
    fn botnet_source(&mut self) -> IpAddr {
        if self.rng.gen_bool(0.7) {
            let (a, b) = BOTNET_PREFIXES[self.rng.gen_range(0..BOTNET_PREFIXES.len())];
            IpAddr::V4(Ipv4Addr::new(a, b, self.rng.gen(), self.rng.gen_range(1..=254)))
        } else {
            self.random_source()
        }
    }

    fn random_source(&mut self) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(
            self.rng.gen_range(1..=223),
            self.rng.gen(),
            self.rng.gen(),
            self.rng.gen_range(1..=254),
        ))
    }

    fn pick<T: Copy, const N: usize>(&mut self, items: &[T; N]) -> T {
        items[self.rng.gen_range(0..N)]
    }

    /// One event of the given profile arriving at `at`
    pub fn packet(&mut self, profile: AttackProfile, at: DateTime<Utc>) -> Event {
        let target = self.target;
        match profile {
            AttackProfile::Volumetric => {
                let source = self.botnet_source();
                let size = self.pick(&FLOOD_SIZES);
                let port = self.pick(&COMMON_PORTS);
                let event = Event::new(source, Protocol::Tcp, size, at).with_destination(target, port);
                match self.rng.gen_range(0..5) {
                    0 => event.with_flags(TcpFlags::syn()),
                    1 => Event { protocol: Protocol::Udp, ..event },
                    2 => Event { protocol: Protocol::Http, ..event },
                    3 => Event { protocol: Protocol::Icmp, ..event },
                    _ => Event { protocol: Protocol::Udp, destination_port: Some(53), ..event },
                }
            }
            AttackProfile::SynFlood => {
                let port = self.pick(&[80, 443, 22]);
                Event::new(self.botnet_source(), Protocol::Tcp, 64, at)
                    .with_destination(target, port)
                    .with_flags(TcpFlags::syn())
            }
            AttackProfile::PortScan => {
                let flags = self.pick(&["SYN", "FIN", "NULL", "XMAS"]);
                let port = self.rng.gen_range(1..=u16::MAX);
                Event::new(self.random_source(), Protocol::Tcp, 40, at)
                    .with_destination(target, port)
                    .with_flags(TcpFlags::parse(flags))
            }
            AttackProfile::Slowloris => {
                let size = self.rng.gen_range(100..=300);
                Event::new(self.botnet_source(), Protocol::Http, size, at).with_destination(target, 80)
            }
            AttackProfile::DnsAmplification => {
                // spoofed queries carrying the victim as source, aimed at open resolvers
                let resolver = IpAddr::V4(Ipv4Addr::new(8, 8, self.rng.gen_range(4..=8), self.rng.gen_range(1..=254)));
                let size = self.rng.gen_range(40..100);
                Event::new(target, Protocol::Udp, size, at).with_destination(resolver, 53)
            }
            AttackProfile::Mixed => {
                let profile = if self.rng.gen_bool(MIXED_VECTOR_SHARE) {
                    self.pick(&[
                        AttackProfile::SynFlood,
                        AttackProfile::PortScan,
                        AttackProfile::Slowloris,
                        AttackProfile::DnsAmplification,
                    ])
                } else {
                    AttackProfile::Volumetric
                };
                self.packet(profile, at)
            }
        }
    }

    /// `size` events spaced `spacing` apart starting at `start`
    pub fn wave(
        &mut self,
        profile: AttackProfile,
        size: usize,
        start: DateTime<Utc>,
        spacing: chrono::Duration,
    ) -> Vec<Event> {
        (0..size)
            .map(|i| self.packet(profile, start + spacing * i as i32))
            .collect()
    }
}

/// What to simulate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationPlan {
    pub profile: AttackProfile,
    #[serde(default = "default_waves")]
    pub waves: u32,
    #[serde(default = "default_wave_size")]
    pub wave_size: usize,
    #[serde(default = "default_wave_interval_ms")]
    pub wave_interval_ms: u64,
    pub seed: Option<u64>,
    pub target: Option<IpAddr>,
}

fn default_waves() -> u32 {
    10
}

impl SimulationPlan {
    /// Reject plans larger than one simulation may run
    pub fn check_bounds(&self) -> Result<(), String> {
        if self.waves == 0 || self.waves > MAX_WAVES {
            return Err(format!("waves must lie in 1..={}, got {}", MAX_WAVES, self.waves));
        }
        if self.wave_size == 0 || self.wave_size > MAX_WAVE_SIZE {
            return Err(format!("wave_size must lie in 1..={}, got {}", MAX_WAVE_SIZE, self.wave_size));
        }
        Ok(())
    }
}

fn default_wave_size() -> usize {
    50
}

fn default_wave_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationStats {
    pub waves_completed: u32,
    pub packets_sent: u64,
    pub blocked: u64,
    pub throttled: u64,
    pub unique_sources: usize,
}

/// Handle to a running simulation task
pub struct SimulationHandle {
    stop: watch::Sender<bool>,
    join: JoinHandle<SimulationStats>,
}

impl SimulationHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel the simulation and collect what it sent so far
    pub async fn stop(self) -> SimulationStats {
        let _ = self.stop.send(true);
        self.wait().await
    }

    /// Wait for the plan to run to completion
    pub async fn wait(self) -> SimulationStats {
        match self.join.await {
            Ok(stats) => stats,
            Err(e) => {
                error!("Simulation task failed: {}", e);
                SimulationStats::default()
            }
        }
    }
}

/// Run `plan` against the engine on a background task
pub fn spawn_simulation(engine: Arc<ProtectionEngine>, plan: SimulationPlan) -> SimulationHandle {
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let rng = match plan.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let target = plan.target.unwrap_or(IpAddr::V4(Ipv4Addr::new(10, 10, 0, 1)));

    let join = tokio::spawn(async move {
        let mut simulator = AttackSimulator::new(rng, target);
        let mut stats = SimulationStats::default();
        let mut sources = HashSet::new();
        info!(
            "Starting {:?} simulation: {} waves of {} packets",
            plan.profile, plan.waves, plan.wave_size
        );

        'waves: for wave in 0..plan.waves {
            for _ in 0..plan.wave_size {
                if *stop_rx.borrow() {
                    break 'waves;
                }
                let event = simulator.packet(plan.profile, Utc::now());
                sources.insert(event.source);
                let decision = engine.evaluate(event);
                stats.packets_sent += 1;
                match decision.action {
                    Action::Block => stats.blocked += 1,
                    Action::Throttle => stats.throttled += 1,
                    Action::Monitor | Action::Allow => {}
                }
                if stats.packets_sent % YIELD_EVERY == 0 {
                    tokio::task::yield_now().await;
                }
            }
            stats.waves_completed += 1;

            if wave + 1 < plan.waves {
                tokio::select! {
                    _ = time::sleep(Duration::from_millis(plan.wave_interval_ms)) => {}
                    _ = stop_rx.changed() => break 'waves,
                }
            }
        }

        stats.unique_sources = sources.len();
        info!(
            "Simulation finished: {} packets, {} blocked, {} throttled",
            stats.packets_sent, stats.blocked, stats.throttled
        );
        stats
    });

    SimulationHandle { stop: stop_tx, join }
}
