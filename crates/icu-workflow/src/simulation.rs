//! 生命体征模拟驱动
//!
//! 后台任务周期性地扰动患者生命体征，随后重新预测、更新就绪跟踪并广播。
//! 扰动以患者首次被观察到的体征为基线，避免随机游走漂移。

use icu_core::{utils::default_bed_label, Patient, Result, Vitals};
use icu_database::{NewPatient, TransferStore};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

use crate::vitals::VitalsPipeline;

/// 基础变化幅度 5%
const BASE_VARIATION: f64 = 0.05;

/// 模拟参数
#[derive(Debug, Clone)]
pub struct SimulationSettings {
    pub interval: Duration,
    /// 每次间隔额外的随机延迟上限
    pub jitter: Duration,
    pub patients_per_tick: usize,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            jitter: Duration::from_millis(1000),
            patients_per_tick: 1,
        }
    }
}

/// 稳定性模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilityPattern {
    Stable,
    Unstable,
    Improving,
    Deteriorating,
}

impl StabilityPattern {
    pub const ALL: [StabilityPattern; 4] = [
        StabilityPattern::Stable,
        StabilityPattern::Unstable,
        StabilityPattern::Improving,
        StabilityPattern::Deteriorating,
    ];

    pub fn variation(&self) -> f64 {
        let factor = match self {
            StabilityPattern::Stable => 0.5,
            StabilityPattern::Unstable => 2.0,
            StabilityPattern::Improving => 0.8,
            StabilityPattern::Deteriorating => 1.5,
        };
        BASE_VARIATION * factor
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StabilityPattern::Stable => "stable",
            StabilityPattern::Unstable => "unstable",
            StabilityPattern::Improving => "improving",
            StabilityPattern::Deteriorating => "deteriorating",
        }
    }
}

/// 按模式扰动基线体征并限制在生理范围内
pub fn perturb_vitals(baseline: &Vitals, pattern: StabilityPattern, rng: &mut impl Rng) -> Vitals {
    let v = pattern.variation();
    let mut scale = |value: f64, low: f64, high: f64| value * (1.0 + rng.gen_range(low..=high));

    Vitals {
        heart_rate: round(scale(baseline.heart_rate, -v, v).clamp(30.0, 200.0), 1),
        // SpO2 和 GCS 变化较小
        spo2: round(scale(baseline.spo2, -v * 0.5, v * 0.3).clamp(70.0, 100.0), 1),
        respiratory_rate: round(scale(baseline.respiratory_rate, -v, v).clamp(6.0, 45.0), 1),
        systolic_bp: round(scale(baseline.systolic_bp, -v, v).clamp(60.0, 220.0), 1),
        lactate: round(scale(baseline.lactate, -v * 0.8, v * 1.2).clamp(0.3, 15.0), 2),
        gcs: round(scale(baseline.gcs, -v * 0.3, v * 0.3).clamp(3.0, 15.0), 1),
        on_ventilator: baseline.on_ventilator,
        on_pressors: baseline.on_pressors,
        comorbidity_score: baseline.comorbidity_score,
    }
}

fn round(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

/// 生命体征模拟器
pub struct VitalsSimulator {
    pipeline: Arc<VitalsPipeline>,
    settings: SimulationSettings,
    rng: Mutex<StdRng>,
    baselines: Mutex<HashMap<String, Vitals>>,
}

impl VitalsSimulator {
    pub fn new(pipeline: Arc<VitalsPipeline>, settings: SimulationSettings) -> Self {
        Self::with_rng(pipeline, settings, StdRng::from_entropy())
    }

    /// 使用指定随机源，测试中用固定种子
    pub fn with_rng(pipeline: Arc<VitalsPipeline>, settings: SimulationSettings, rng: StdRng) -> Self {
        Self {
            pipeline,
            settings,
            rng: Mutex::new(rng),
            baselines: Mutex::new(HashMap::new()),
        }
    }

    /// 以新的体征作为患者基线（手动录入后调用）
    pub async fn rebase(&self, patient_id: &str, vitals: &Vitals) {
        self.baselines
            .lock()
            .await
            .insert(patient_id.to_string(), vitals.clone());
    }

    /// 执行一轮模拟，返回本轮更新的患者ID
    pub async fn tick(&self) -> Result<Vec<String>> {
        let patients = self.pipeline.store().list_active_patients().await?;

        // 出科患者不再参与模拟，基线随之丢弃
        self.baselines
            .lock()
            .await
            .retain(|id, _| patients.iter().any(|p| &p.patient_id == id));

        if patients.is_empty() {
            tracing::debug!("No active patients to simulate");
            return Ok(Vec::new());
        }

        let plan = self.plan(&patients).await;

        let mut updated = Vec::with_capacity(plan.len());
        for (patient_id, pattern, vitals) in plan {
            match self.pipeline.record(&patient_id, &vitals).await {
                Ok(assessment) => {
                    tracing::debug!(
                        "Simulated {} ({}): HR {:.1}, SpO2 {:.1}, {}",
                        patient_id,
                        pattern.as_str(),
                        vitals.heart_rate,
                        vitals.spo2,
                        assessment.prediction.label.as_str()
                    );
                    updated.push(patient_id);
                }
                Err(e) => tracing::error!("Simulation update failed for {}: {}", patient_id, e),
            }
        }
        Ok(updated)
    }

    /// 选择患者并生成新体征；持锁期间不做任何 IO
    async fn plan(&self, patients: &[Patient]) -> Vec<(String, StabilityPattern, Vitals)> {
        let mut rng = self.rng.lock().await;
        let mut baselines = self.baselines.lock().await;

        let count = self.settings.patients_per_tick.min(patients.len());
        let chosen: Vec<&Patient> = patients.choose_multiple(&mut *rng, count).collect();

        chosen
            .into_iter()
            .map(|patient| {
                let baseline = baselines
                    .entry(patient.patient_id.clone())
                    .or_insert_with(|| patient.vitals.clone());
                let pattern = *StabilityPattern::ALL
                    .choose(&mut *rng)
                    .unwrap_or(&StabilityPattern::Stable);
                let vitals = perturb_vitals(baseline, pattern, &mut *rng);
                (patient.patient_id.clone(), pattern, vitals)
            })
            .collect()
    }

    #[cfg(test)]
    async fn baseline_count(&self) -> usize {
        self.baselines.lock().await.len()
    }

    fn next_delay(&self, rng: &mut StdRng) -> Duration {
        let jitter_ms = self.settings.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 { 0 } else { rng.gen_range(0..=jitter_ms) };
        self.settings.interval + Duration::from_millis(jitter)
    }

    /// 运行模拟循环，直到收到关闭信号
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Vitals simulation started (interval {:?}, {} patients per tick)",
            self.settings.interval,
            self.settings.patients_per_tick
        );

        loop {
            let delay = {
                let mut rng = self.rng.lock().await;
                self.next_delay(&mut rng)
            };

            // 只在等待期间响应关闭；一轮开始后总是完整执行
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.tick().await {
                tracing::error!("Simulation tick failed: {}", e);
            }
        }

        tracing::info!("Vitals simulation stopped");
    }
}

/// 演示患者: (姓名, 年龄, 心率, SpO2, 呼吸, 收缩压, 乳酸, GCS, 呼吸机, 升压药, 合并症评分)
type DemoProfile = (&'static str, i32, f64, f64, f64, f64, f64, f64, bool, bool, f64);

const DEMO_PATIENTS: [DemoProfile; 12] = [
    ("Lucas Edwards", 64, 82.0, 97.0, 16.0, 124.0, 1.1, 15.0, false, false, 2.0),
    ("Charlotte Collins", 71, 104.0, 95.0, 21.0, 98.0, 2.0, 13.0, false, false, 4.0),
    ("Henry Stewart", 58, 122.0, 89.0, 28.0, 86.0, 4.2, 9.0, true, true, 6.0),
    ("Emma Rodriguez", 49, 88.0, 96.0, 18.0, 118.0, 1.4, 14.0, true, false, 3.0),
    ("Alexander Thompson", 77, 92.0, 95.0, 19.0, 102.0, 1.8, 15.0, false, true, 5.0),
    ("Olivia Martinez", 66, 116.0, 92.0, 24.0, 94.0, 2.6, 12.0, false, false, 4.0),
    ("William Johnson", 55, 76.0, 98.0, 14.0, 130.0, 0.9, 15.0, false, false, 1.0),
    ("Sophia Davis", 62, 100.0, 95.0, 20.0, 104.0, 2.1, 14.0, false, false, 3.0),
    ("James Wilson", 81, 128.0, 88.0, 30.0, 82.0, 5.1, 8.0, true, true, 7.0),
    ("Isabella Brown", 45, 84.0, 97.0, 17.0, 120.0, 1.2, 13.0, true, false, 2.0),
    ("Benjamin Garcia", 69, 90.0, 96.0, 18.0, 110.0, 1.6, 15.0, false, true, 4.0),
    ("Mia Anderson", 73, 112.0, 93.0, 23.0, 92.0, 2.4, 12.0, false, false, 5.0),
];

/// 写入十二名演示患者（ICU-040 至 ICU-051）；已有活动患者时跳过
pub async fn seed_demo_patients(store: &dyn TransferStore) -> Result<usize> {
    let existing = store.list_active_patients().await?;
    if !existing.is_empty() {
        tracing::info!("Store already has {} active patients, skipping demo seed", existing.len());
        return Ok(0);
    }

    let icu = store.find_department_by_name("ICU").await?;
    let mut created = 0;

    for (offset, profile) in DEMO_PATIENTS.iter().enumerate() {
        let (name, age, hr, spo2, resp, sbp, lactate, gcs, vent, pressors, comorbidity) = *profile;
        let patient_id = format!("ICU-{:03}", 40 + offset);

        store
            .create_patient(&NewPatient {
                bed: Some(default_bed_label(&patient_id)),
                patient_id,
                name: name.to_string(),
                age,
                department_id: icu.as_ref().map(|d| d.id),
                vitals: Vitals {
                    heart_rate: hr,
                    spo2,
                    respiratory_rate: resp,
                    systolic_bp: sbp,
                    lactate,
                    gcs,
                    on_ventilator: vent,
                    on_pressors: pressors,
                    comorbidity_score: comorbidity,
                },
            })
            .await?;
        if let Some(icu) = &icu {
            store.adjust_occupancy(icu.id, 1).await?;
        }
        created += 1;
    }

    tracing::info!("Seeded {} demo patients", created);
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use icu_core::{IcuError, TransferRequest, TransferStatus};
    use icu_database::MemoryStore;
    use crate::readiness::ReadinessTracker;
    use icu_notify::{ChannelSink, NotificationHub};
    use icu_prediction::{PredictionCache, PredictionService, RuleBasedClassifier};

    fn stable_vitals() -> Vitals {
        Vitals {
            heart_rate: 80.0,
            spo2: 98.0,
            respiratory_rate: 16.0,
            systolic_bp: 120.0,
            lactate: 1.0,
            gcs: 15.0,
            on_ventilator: false,
            on_pressors: false,
            comorbidity_score: 1.0,
        }
    }

    async fn add_patient(store: &MemoryStore, id: &str, vitals: Vitals) {
        store
            .create_patient(&NewPatient {
                patient_id: id.to_string(),
                name: "Sophia Davis".to_string(),
                age: 62,
                bed: None,
                department_id: None,
                vitals,
            })
            .await
            .unwrap();
    }

    fn simulator(store: Arc<MemoryStore>, hub: Arc<NotificationHub>, per_tick: usize) -> VitalsSimulator {
        let pipeline = VitalsPipeline::new(
            store.clone(),
            PredictionService::new(Arc::new(RuleBasedClassifier::default())),
            Arc::new(PredictionCache::new(store.clone())),
            Arc::new(ReadinessTracker::new(store)),
            hub,
        );
        VitalsSimulator::with_rng(
            Arc::new(pipeline),
            SimulationSettings {
                interval: Duration::from_millis(10),
                jitter: Duration::ZERO,
                patients_per_tick: per_tick,
            },
            StdRng::seed_from_u64(7),
        )
    }

    #[test]
    fn test_pattern_variation() {
        assert!((StabilityPattern::Stable.variation() - 0.025).abs() < 1e-12);
        assert!((StabilityPattern::Unstable.variation() - 0.10).abs() < 1e-12);
        assert!((StabilityPattern::Improving.variation() - 0.04).abs() < 1e-12);
        assert!((StabilityPattern::Deteriorating.variation() - 0.075).abs() < 1e-12);
    }

    #[test]
    fn test_perturbation_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut baseline = stable_vitals();
        baseline.spo2 = 100.0;

        for _ in 0..500 {
            let vitals = perturb_vitals(&baseline, StabilityPattern::Unstable, &mut rng);
            assert!(vitals.spo2 <= 100.0);
            assert!(vitals.gcs <= 15.0);
            assert!((72.0..=88.0).contains(&vitals.heart_rate));
            assert!(!vitals.on_ventilator);
        }
    }

    #[tokio::test]
    async fn test_tick_updates_and_broadcasts() {
        let store = Arc::new(MemoryStore::new());
        add_patient(&store, "ICU-040", stable_vitals()).await;
        add_patient(&store, "ICU-041", stable_vitals()).await;

        let hub = Arc::new(NotificationHub::new());
        let (sink, mut events) = ChannelSink::pair();
        hub.subscribe(Arc::new(sink)).await;

        let sim = simulator(store.clone(), hub, 1);
        let updated = sim.tick().await.unwrap();
        assert_eq!(updated.len(), 1);

        let history = store.vitals_history(&updated[0], 10).await.unwrap();
        assert_eq!(history.len(), 1);

        let payload = events.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["type"], "vitals_update");
        assert_eq!(value["data"]["patient_id"], updated[0].as_str());
        assert_eq!(value["data"]["prediction"]["prediction"], "Ready");
    }

    #[tokio::test]
    async fn test_ready_since_survives_repeated_ticks() {
        let store = Arc::new(MemoryStore::new());
        add_patient(&store, "ICU-040", stable_vitals()).await;
        let sim = simulator(store.clone(), Arc::new(NotificationHub::new()), 1);
        let tracker = ReadinessTracker::new(store.clone());

        sim.tick().await.unwrap();
        let first = tracker.get_ready_since("ICU-040").await.unwrap();
        assert!(first.is_some());

        for _ in 0..5 {
            sim.tick().await.unwrap();
        }
        assert_eq!(tracker.get_ready_since("ICU-040").await.unwrap(), first);
        assert!(store.latest_prediction("ICU-040").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_active_request_blocks_readiness() {
        let store = Arc::new(MemoryStore::new());
        add_patient(&store, "ICU-040", stable_vitals()).await;
        let now = Utc::now();
        store
            .insert_transfer_request(
                &TransferRequest {
                    request_id: "TR-20250101-ICU-040-0000ABCD".to_string(),
                    patient_id: "ICU-040".to_string(),
                    requesting_nurse: "nurse_sarah".to_string(),
                    reviewing_doctor: None,
                    approving_admin: None,
                    target_department_id: None,
                    status: TransferStatus::Pending,
                    prediction: None,
                    notes: None,
                    created_at: now,
                    updated_at: now,
                },
                false,
            )
            .await
            .unwrap();

        let sim = simulator(store.clone(), Arc::new(NotificationHub::new()), 1);
        sim.tick().await.unwrap();

        let tracker = ReadinessTracker::new(store);
        assert!(tracker.get_ready_since("ICU-040").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rebase_replaces_baseline() {
        let store = Arc::new(MemoryStore::new());
        add_patient(&store, "ICU-040", stable_vitals()).await;
        let sim = simulator(store.clone(), Arc::new(NotificationHub::new()), 1);
        sim.tick().await.unwrap();

        let mut ventilated = stable_vitals();
        ventilated.on_ventilator = true;
        sim.rebase("ICU-040", &ventilated).await;
        sim.tick().await.unwrap();

        let patient = store.get_patient("ICU-040").await.unwrap().unwrap();
        assert!(patient.vitals.on_ventilator);
        let tracker = ReadinessTracker::new(store);
        assert!(tracker.get_ready_since("ICU-040").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        add_patient(&store, "ICU-040", stable_vitals()).await;
        let sim = Arc::new(simulator(store.clone(), Arc::new(NotificationHub::new()), 1));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(sim.run(rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("simulation did not stop")
            .unwrap();
        assert!(!store.vitals_history("ICU-040", 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_during_wait_skips_tick() {
        let store = Arc::new(MemoryStore::new());
        add_patient(&store, "ICU-040", stable_vitals()).await;
        let sim = Arc::new(simulator(store.clone(), Arc::new(NotificationHub::new()), 1));

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), sim.run(rx))
            .await
            .expect("simulation did not stop");
        assert!(store.vitals_history("ICU-040", 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_discharged_patient_baseline_is_dropped() {
        let store = Arc::new(MemoryStore::new());
        add_patient(&store, "ICU-040", stable_vitals()).await;
        add_patient(&store, "ICU-041", stable_vitals()).await;
        let sim = simulator(store.clone(), Arc::new(NotificationHub::new()), 2);

        sim.tick().await.unwrap();
        assert_eq!(sim.baseline_count().await, 2);

        store.deactivate_patient("ICU-040").await.unwrap();
        let updated = sim.tick().await.unwrap();
        assert_eq!(updated, vec!["ICU-041".to_string()]);
        assert_eq!(sim.baseline_count().await, 1);

        store.deactivate_patient("ICU-041").await.unwrap();
        assert!(sim.tick().await.unwrap().is_empty());
        assert_eq!(sim.baseline_count().await, 0);
    }

    #[tokio::test]
    async fn test_demo_seed_is_skipped_when_patients_exist() {
        let store = MemoryStore::seeded().await.unwrap();
        assert_eq!(seed_demo_patients(&store).await.unwrap(), 12);
        assert_eq!(seed_demo_patients(&store).await.unwrap(), 0);

        let patients = store.list_active_patients().await.unwrap();
        assert_eq!(patients.first().map(|p| p.patient_id.as_str()), Some("ICU-040"));
        assert_eq!(patients.last().map(|p| p.patient_id.as_str()), Some("ICU-051"));

        let icu = store.find_department_by_name("ICU").await.unwrap().unwrap();
        assert_eq!(icu.current_occupancy, 12);
        assert!(matches!(
            store.create_patient(&NewPatient {
                patient_id: "ICU-040".to_string(),
                name: "Duplicate".to_string(),
                age: 50,
                bed: None,
                department_id: None,
                vitals: stable_vitals(),
            })
            .await,
            Err(IcuError::Conflict(_))
        ));
    }
}
