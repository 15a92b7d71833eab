//! 通用工具函数

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// 生成唯一的转科申请ID
///
/// 格式: `TR-<日期>-<患者ID>-<随机后缀>`，随机后缀取自 UUID v4。
pub fn generate_request_id(patient_id: &str, now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "TR-{}-{}-{}",
        now.format("%Y%m%d"),
        patient_id,
        suffix[..8].to_ascii_uppercase()
    )
}

/// 验证转科申请ID格式
pub fn is_valid_request_id(request_id: &str) -> bool {
    let parts: Vec<&str> = request_id.splitn(3, '-').collect();
    if parts.len() != 3 || parts[0] != "TR" {
        return false;
    }
    let date_ok = parts[1].len() == 8 && parts[1].chars().all(|c| c.is_ascii_digit());
    let tail_ok = parts[2]
        .rsplit_once('-')
        .map(|(patient, suffix)| {
            !patient.is_empty() && suffix.len() == 8 && suffix.chars().all(|c| c.is_ascii_hexdigit())
        })
        .unwrap_or(false);
    date_ok && tail_ok
}

/// 生成默认床位号
pub fn default_bed_label(patient_id: &str) -> String {
    format!("Bed-{}", patient_id)
}
