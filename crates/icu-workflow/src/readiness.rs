//! 就绪持续时间跟踪
//!
//! 每位患者一条记录：当前是否就绪，以及首次进入就绪的时间。
//! 重复标记就绪不会重置开始时间，只有显式清除才会。

use chrono::{DateTime, Utc};
use icu_core::{ReadyState, Result};
use icu_database::TransferStore;
use std::sync::Arc;

/// 就绪跟踪器
pub struct ReadinessTracker {
    store: Arc<dyn TransferStore>,
}

impl ReadinessTracker {
    pub fn new(store: Arc<dyn TransferStore>) -> Self {
        Self { store }
    }

    /// 设置就绪状态，返回更新后的记录
    pub async fn set_ready(
        &self,
        patient_id: &str,
        is_ready: bool,
        at: Option<DateTime<Utc>>,
    ) -> Result<ReadyState> {
        let now = Utc::now();
        let previous = self.store.get_ready_state(patient_id).await?;

        let state = if is_ready {
            let ready_since = previous
                .as_ref()
                .filter(|p| p.currently_ready)
                .and_then(|p| p.ready_since)
                .unwrap_or_else(|| at.unwrap_or(now));
            ReadyState {
                patient_id: patient_id.to_string(),
                currently_ready: true,
                ready_since: Some(ready_since),
                updated_at: now,
            }
        } else {
            ReadyState {
                patient_id: patient_id.to_string(),
                currently_ready: false,
                ready_since: None,
                updated_at: now,
            }
        };

        let changed = previous.as_ref().map(|p| p.currently_ready) != Some(state.currently_ready);
        if changed {
            tracing::debug!("Patient {} readiness -> {}", patient_id, state.currently_ready);
        }

        self.store.put_ready_state(&state).await?;
        Ok(state)
    }

    /// 清除就绪状态（有活动申请或出科时）
    pub async fn clear(&self, patient_id: &str) -> Result<()> {
        self.set_ready(patient_id, false, None).await.map(|_| ())
    }

    /// 仅在当前就绪时返回开始时间
    pub async fn get_ready_since(&self, patient_id: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .store
            .get_ready_state(patient_id)
            .await?
            .filter(|s| s.currently_ready)
            .and_then(|s| s.ready_since))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use icu_database::MemoryStore;

    fn tracker() -> ReadinessTracker {
        ReadinessTracker::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_first_ready_moment_is_kept() {
        let tracker = tracker();
        let first = Utc::now() - Duration::hours(3);

        tracker.set_ready("ICU-040", true, Some(first)).await.unwrap();
        tracker.set_ready("ICU-040", true, None).await.unwrap();
        tracker.set_ready("ICU-040", true, Some(Utc::now())).await.unwrap();

        assert_eq!(tracker.get_ready_since("ICU-040").await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn test_not_ready_clears_both_fields() {
        let tracker = tracker();
        tracker.set_ready("ICU-040", true, None).await.unwrap();

        let state = tracker.set_ready("ICU-040", false, None).await.unwrap();
        assert!(!state.currently_ready);
        assert!(state.ready_since.is_none());
        assert!(tracker.get_ready_since("ICU-040").await.unwrap().is_none());

        // 从未就绪的患者同样可以清除
        let state = tracker.set_ready("ICU-041", false, None).await.unwrap();
        assert!(state.ready_since.is_none());
    }

    #[tokio::test]
    async fn test_ready_again_after_clear_gets_new_stamp() {
        let tracker = tracker();
        let first = Utc::now() - Duration::hours(5);
        let second = Utc::now() - Duration::minutes(10);

        tracker.set_ready("ICU-040", true, Some(first)).await.unwrap();
        tracker.clear("ICU-040").await.unwrap();
        tracker.set_ready("ICU-040", true, Some(second)).await.unwrap();

        assert_eq!(tracker.get_ready_since("ICU-040").await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_unknown_patient_has_no_stamp() {
        assert!(tracker().get_ready_since("ICU-999").await.unwrap().is_none());
    }
}
