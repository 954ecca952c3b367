//! Scenario runner - executes the deterministic scenarios.

use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use car2x_core::{
    AgentConfig, Dispatch, FilterOutcome, GeoPoint, InboundDispatcher, LocationFilter,
    LocationFix, PeerEntry, ProximityRanker, V2vMessage,
};
use car2x_env::V2xContext;

use crate::context::SimContext;
use crate::scenarios::ScenarioId;
use crate::trace::{noisy_drive, offset_point, DriveConfig};
use crate::vehicle::SimVehicle;

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Every failed assertion, in order
    pub failures: Vec<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

impl ScenarioResult {
    /// First failure message, if any.
    pub fn failure_reason(&self) -> Option<&str> {
        self.failures.first().map(String::as_str)
    }
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    /// Raw fixes offered to a filter
    pub fixes_offered: u64,

    /// Fixes that passed the filter
    pub fixes_accepted: u64,

    /// Rejections by reason code
    pub rejections: BTreeMap<String, u64>,

    /// Datagrams injected on the vehicle port
    pub datagrams_injected: u64,

    /// Warnings shown
    pub warnings: u64,

    /// CAMs handed to the network
    pub cams_sent: u64,

    /// Failed CAM sends
    pub send_failures: u64,

    /// Final virtual time (ms)
    pub sim_time_ms: u64,
}

impl ScenarioMetrics {
    fn record(&mut self, outcome: &FilterOutcome) {
        self.fixes_offered += 1;
        match outcome {
            FilterOutcome::Accepted(_) => self.fixes_accepted += 1,
            FilterOutcome::Rejected(reason) => {
                *self.rejections.entry(reason.code().to_string()).or_default() += 1;
            }
        }
    }

    fn capture(&mut self, vehicle: &SimVehicle) {
        self.cams_sent = vehicle.network.sent_count() as u64;
        self.send_failures = vehicle.network.send_failures();
        self.warnings = vehicle.sink.warnings().len() as u64;
        self.sim_time_ms = vehicle.ctx.now().as_millis() as u64;
    }
}

/// Collects assertion failures instead of panicking.
#[derive(Default)]
struct Checks {
    failures: Vec<String>,
}

impl Checks {
    fn check(&mut self, ok: bool, message: impl FnOnce() -> String) {
        if !ok {
            let message = message();
            warn!("✗ {message}");
            self.failures.push(message);
        }
    }
}

/// Runs scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Length of the time-driven scenarios
    duration: Duration,
}

impl ScenarioRunner {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            duration: Duration::from_secs(30),
        }
    }

    /// Sets the length of the time-driven scenarios (at least 6 s).
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration = Duration::from_secs_f64(secs.max(6.0));
        self
    }

    /// Runs a scenario on a fresh simulation runtime and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let mut checks = Checks::default();
        let mut metrics = ScenarioMetrics::default();

        let outcome = SimContext::block_on(async {
            match scenario {
                ScenarioId::JumpRejection => self.run_filter_pair(500, false, &mut checks, &mut metrics),
                ScenarioId::SlowDrift => self.run_filter_pair(2000, true, &mut checks, &mut metrics),
                ScenarioId::DenmDisplay => self.run_denm_display(&mut checks, &mut metrics).await,
                ScenarioId::GarbageIgnored => self.run_garbage_ignored(&mut checks, &mut metrics).await,
                ScenarioId::NoisyDrive => self.run_noisy_drive(&mut checks, &mut metrics).await,
                ScenarioId::LinkOutage => self.run_link_outage(&mut checks, &mut metrics).await,
                ScenarioId::NearestPeers => self.run_nearest_peers(&mut checks, &mut metrics).await,
            }
        });
        if let Err(e) = outcome {
            checks.check(false, || format!("simulation runtime unavailable: {e}"));
        }

        let passed = checks.failures.is_empty();
        if passed {
            info!("✓ {} passed", scenario.name());
        }
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            failures: checks.failures,
            metrics,
        }
    }

    /// Runs every scenario in order.
    pub fn run_all(&self) -> Vec<ScenarioResult> {
        ScenarioId::all().into_iter().map(|s| self.run(s)).collect()
    }

    fn vehicle(&self, checks: &mut Checks) -> Option<SimVehicle> {
        match SimVehicle::new(self.seed, AgentConfig::default()) {
            Ok(vehicle) => Some(vehicle),
            Err(e) => {
                checks.check(false, || format!("vehicle setup failed: {e}"));
                None
            }
        }
    }

    /// Two fixes 0.0001° of latitude apart, `gap_ms` apart in time.
    fn run_filter_pair(
        &self,
        gap_ms: i64,
        expect_accepted: bool,
        checks: &mut Checks,
        metrics: &mut ScenarioMetrics,
    ) {
        let mut filter = LocationFilter::default();
        let first = LocationFix::new(10.0, 20.0, 5.0, 0.0, 1000);
        let second = LocationFix::new(10.0001, 20.0, 5.0, 0.0, 1000 + gap_ms);

        let outcome = filter.accept(first, first.timestamp);
        metrics.record(&outcome);
        checks.check(outcome == FilterOutcome::Accepted(first), || {
            format!("first fix not accepted: {outcome:?}")
        });

        let outcome = filter.accept(second, second.timestamp);
        metrics.record(&outcome);
        let implied = first.position().distance_to(&second.position()) / (gap_ms as f64 / 1000.0);
        debug!("implied speed {implied:.1} m/s over {gap_ms} ms");

        if expect_accepted {
            checks.check(outcome == FilterOutcome::Accepted(second), || {
                format!("second fix at {implied:.1} m/s should be accepted, got {outcome:?}")
            });
        } else {
            checks.check(
                outcome.reason().map(|r| r.code()) == Some("position_jump"),
                || format!("second fix at {implied:.1} m/s should be a position_jump, got {outcome:?}"),
            );
        }
        checks.check(filter.last_accepted().is_some(), || "filter lost its state".into());
    }

    async fn run_denm_display(&self, checks: &mut Checks, metrics: &mut ScenarioMetrics) {
        let Some(vehicle) = self.vehicle(checks) else { return };

        vehicle.network.inject(
            r#"{"type":"DENM","event":"obstacle","cause":"debris","severity":"high","distance_m":42.5}"#,
        );
        metrics.datagrams_injected += 1;
        vehicle.advance(Duration::from_millis(10)).await;

        let warning = vehicle.sink.last_warning().unwrap_or_default();
        for needle in ["obstacle", "debris", "high", "42.50 m"] {
            checks.check(warning.contains(needle), || {
                format!("warning is missing {needle:?}: {warning:?}")
            });
        }
        checks.check(!warning.contains("Speed:"), || {
            format!("absent speed was displayed: {warning:?}")
        });

        metrics.capture(&vehicle);
        vehicle.agent.shutdown().await;
    }

    async fn run_garbage_ignored(&self, checks: &mut Checks, metrics: &mut ScenarioMetrics) {
        let Some(vehicle) = self.vehicle(checks) else { return };
        let mut rng = vehicle.ctx.rng(1);

        let mut payloads: Vec<Vec<u8>> = vec![
            b"not json at all".to_vec(),
            b"[\"DENM\"]".to_vec(),
            br#"{"type":"SPAT","phase":3}"#.to_vec(),
            br#"{"type":"DENM","event":"obstacle"}"#.to_vec(),
            br#"{"type":"V2V","vehicles":"none"}"#.to_vec(),
            br#"{"type":42}"#.to_vec(),
            Vec::new(),
        ];
        for _ in 0..8 {
            let len = rng.gen_range(1..256);
            payloads.push((0..len).map(|_| rng.gen::<u8>()).collect());
        }

        for payload in &payloads {
            vehicle.network.inject(payload.clone());
        }
        metrics.datagrams_injected += payloads.len() as u64;
        vehicle.advance(Duration::from_millis(10)).await;

        checks.check(vehicle.sink.warnings().is_empty(), || {
            format!("garbage produced warnings: {:?}", vehicle.sink.warnings())
        });
        checks.check(vehicle.sink.statuses().is_empty(), || {
            format!("garbage produced status lines: {:?}", vehicle.sink.statuses())
        });

        // The loop must still be alive for a valid message afterwards.
        vehicle.network.inject(
            r#"{"type":"DENM","event":"roadworks","cause":"lane closed","severity":"low"}"#,
        );
        metrics.datagrams_injected += 1;
        vehicle.advance(Duration::from_millis(10)).await;
        checks.check(vehicle.sink.warnings().len() == 1, || {
            format!("expected exactly one warning, got {:?}", vehicle.sink.warnings())
        });

        // The dispatcher itself reports nothing for garbage.
        let dispatcher_view = InboundDispatcher::new(
            vehicle.agent.position(),
            ProximityRanker::default(),
            vehicle.sink.clone(),
            vehicle.sink.clone(),
        );
        for payload in &payloads {
            let dispatched = dispatcher_view.dispatch(payload);
            checks.check(dispatched == Dispatch::Ignored, || {
                format!("payload {:?} was routed", String::from_utf8_lossy(payload))
            });
        }

        metrics.capture(&vehicle);
        vehicle.agent.shutdown().await;
    }

    async fn run_noisy_drive(&self, checks: &mut Checks, metrics: &mut ScenarioMetrics) {
        let Some(mut vehicle) = self.vehicle(checks) else { return };
        let config = DriveConfig::default();
        let samples = (self.duration.as_millis() / config.step.as_millis().max(1)) as usize;
        let mut rng = vehicle.ctx.rng(2);
        let trace = match noisy_drive(&mut rng, &config, vehicle.ctx.epoch_millis(), samples) {
            Ok(trace) => trace,
            Err(e) => {
                checks.check(false, || format!("trace generation failed: {e}"));
                return;
            }
        };

        // Shadow filter fed identically to the agent's pump.
        let mut shadow = LocationFilter::default();
        let mut accepted_positions = Vec::new();
        let mut faults = 0u64;

        if let Err(e) = vehicle.agent.start_broadcasting() {
            checks.check(false, || format!("start failed: {e}"));
            return;
        }

        for sample in &trace {
            vehicle.advance_to(sample.offset).await;
            let outcome = shadow.accept(sample.fix, vehicle.ctx.epoch_millis());
            metrics.record(&outcome);

            match (sample.fault, outcome) {
                (Some(fault), FilterOutcome::Rejected(reason)) => {
                    faults += 1;
                    checks.check(reason == fault.expected_reason(), || {
                        format!("{fault:?} at {:?} rejected as {reason}", sample.offset)
                    });
                }
                (Some(fault), FilterOutcome::Accepted(_)) => {
                    checks.check(false, || format!("{fault:?} at {:?} was accepted", sample.offset));
                }
                (None, FilterOutcome::Accepted(fix)) => {
                    accepted_positions.push((fix.latitude, fix.longitude));
                }
                (None, FilterOutcome::Rejected(reason)) => {
                    checks.check(false, || {
                        format!("clean fix at {:?} rejected as {reason}", sample.offset)
                    });
                }
            }

            vehicle.deliver(sample.fix).await;
        }
        vehicle.advance(Duration::from_millis(600)).await;
        vehicle.agent.stop_broadcasting();

        let cams = vehicle.network.sent_cams();
        checks.check(!cams.is_empty(), || "no CAM was broadcast".into());
        for cam in &cams {
            checks.check(accepted_positions.contains(&(cam.lat, cam.lon)), || {
                format!("CAM at ({}, {}) does not match any accepted fix", cam.lat, cam.lon)
            });
        }

        let gps_ok = vehicle.sink.count_status("GPS OK") as u64;
        checks.check(gps_ok == metrics.fixes_accepted, || {
            format!(
                "agent accepted {gps_ok} fixes, shadow filter accepted {}",
                metrics.fixes_accepted
            )
        });
        info!(
            "noisy_drive: {} fixes, {} faults, {} CAMs",
            trace.len(),
            faults,
            cams.len()
        );

        metrics.capture(&vehicle);
        vehicle.agent.shutdown().await;
    }

    async fn run_link_outage(&self, checks: &mut Checks, metrics: &mut ScenarioMetrics) {
        let Some(mut vehicle) = self.vehicle(checks) else { return };
        let config = DriveConfig {
            fault_rate: 0.0,
            ..DriveConfig::default()
        };
        let samples = (self.duration.as_millis() / config.step.as_millis().max(1)) as usize;
        let mut rng = vehicle.ctx.rng(3);
        let trace = match noisy_drive(&mut rng, &config, vehicle.ctx.epoch_millis(), samples) {
            Ok(trace) => trace,
            Err(e) => {
                checks.check(false, || format!("trace generation failed: {e}"));
                return;
            }
        };

        let outage_start = self.duration / 3;
        let outage_end = outage_start + Duration::from_secs(2);
        let mut sent_before = 0;
        let mut sent_at_heal = 0;
        let mut link_up = true;

        if let Err(e) = vehicle.agent.start_broadcasting() {
            checks.check(false, || format!("start failed: {e}"));
            return;
        }

        for sample in &trace {
            vehicle.advance_to(sample.offset).await;
            if link_up && sample.offset >= outage_start && sample.offset < outage_end {
                sent_before = vehicle.network.sent_count();
                vehicle.network.set_link(false);
                link_up = false;
                info!("link down at {:?}", sample.offset);
            } else if !link_up && sample.offset >= outage_end {
                sent_at_heal = vehicle.network.sent_count();
                vehicle.network.set_link(true);
                link_up = true;
                info!("link up at {:?}", sample.offset);
            }
            vehicle.deliver(sample.fix).await;
        }
        vehicle.advance(Duration::from_millis(600)).await;

        checks.check(sent_before > 0, || "no CAM before the outage".into());
        checks.check(sent_at_heal == sent_before, || {
            format!("{} CAMs sent while the link was down", sent_at_heal - sent_before)
        });
        checks.check(vehicle.network.send_failures() >= 3, || {
            format!("only {} failed sends during a 2 s outage", vehicle.network.send_failures())
        });
        checks.check(
            vehicle.sink.count_status("Error sending CAM: Network link down") >= 3,
            || "send failures were not reported".into(),
        );
        checks.check(vehicle.network.sent_count() > sent_at_heal, || {
            "beacons did not resume after the outage".into()
        });
        checks.check(vehicle.agent.is_broadcasting(), || "outage stopped broadcasting".into());

        vehicle.agent.stop_broadcasting();
        metrics.capture(&vehicle);
        vehicle.agent.shutdown().await;
    }

    async fn run_nearest_peers(&self, checks: &mut Checks, metrics: &mut ScenarioMetrics) {
        let Some(mut vehicle) = self.vehicle(checks) else { return };
        let origin = GeoPoint::new(48.137, 11.575);
        let mut rng = vehicle.ctx.rng(4);

        let peers: Vec<PeerEntry> = (0..8)
            .map(|i| {
                let distance = 30.0 + 250.0 * i as f64 + rng.gen_range(0.0..200.0);
                let bearing = rng.gen_range(0.0..std::f64::consts::TAU);
                let p = offset_point(origin, distance * bearing.cos(), distance * bearing.sin());
                PeerEntry::new(format!("PEER{i}"), p.lat, p.lon, rng.gen_range(0.0..90.0))
            })
            .collect();
        let mut expected: Vec<(f64, String)> = peers
            .iter()
            .map(|p| (origin.distance_to(&GeoPoint::new(p.lat, p.lon)), p.vehicle_id.clone()))
            .collect();
        expected.sort_by(|a, b| a.0.total_cmp(&b.0));
        let expected_ids: Vec<String> = expected.into_iter().take(3).map(|(_, id)| id).collect();

        let mut shuffled = peers.clone();
        for i in (1..shuffled.len()).rev() {
            shuffled.swap(i, rng.gen_range(0..=i));
        }
        let payload = match (V2vMessage { vehicles: shuffled }).encode() {
            Ok(payload) => payload,
            Err(e) => {
                checks.check(false, || format!("V2V encoding failed: {e}"));
                return;
            }
        };

        // Before any fix: placeholder only.
        vehicle.network.inject(payload.clone());
        vehicle.advance(Duration::from_millis(10)).await;
        let waiting = vehicle.sink.last_warning().unwrap_or_default();
        checks.check(waiting.contains("(Waiting for GPS to compute nearest...)"), || {
            format!("expected placeholder, got {waiting:?}")
        });

        if let Err(e) = vehicle.agent.start_broadcasting() {
            checks.check(false, || format!("start failed: {e}"));
            return;
        }
        let fix = vehicle.fix_now(origin.lat, origin.lon, 0.0);
        vehicle.deliver(fix).await;

        vehicle.network.inject(payload);
        metrics.datagrams_injected += 2;
        vehicle.advance(Duration::from_millis(10)).await;

        let warning = vehicle.sink.last_warning().unwrap_or_default();
        let shown: Vec<String> = warning
            .lines()
            .skip(2)
            .filter_map(|line| line.split(" | ").next())
            .map(str::to_string)
            .collect();
        checks.check(shown == expected_ids, || {
            format!("expected nearest {expected_ids:?}, shown {shown:?}")
        });
        checks.check(warning.contains("Total: 8"), || format!("wrong total in {warning:?}"));

        let direct = vehicle
            .agent
            .position()
            .snapshot()
            .map(|me| car2x_core::rank(&me, peers, 3).map(|r| r.peer.vehicle_id).collect::<Vec<_>>());
        checks.check(direct.as_ref() == Some(&expected_ids), || {
            format!("direct ranking {direct:?} differs from {expected_ids:?}")
        });

        vehicle.agent.stop_broadcasting();
        metrics.capture(&vehicle);
        vehicle.agent.shutdown().await;
    }
}
