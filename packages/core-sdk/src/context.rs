use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/**
 * \brief 单个街区的指标记录（由仪表盘导入的表格数据转换而来）。
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistrictRecord {
    pub name: String,
    #[serde(default)]
    pub indicators: BTreeMap<String, f64>,
}

/**
 * \brief 数据集摘要：各指标在所有街区上的平均值，用于充实提示词。
 */
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetContext {
    pub district_count: usize,
    pub averages: BTreeMap<String, f64>,
}

impl DatasetContext {
    /**
     * \brief 计算每个指标的平均值；仅统计提供了该指标的街区，忽略非有限值。
     */
    pub fn from_records(records: &[DistrictRecord]) -> Self {
        let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        for record in records {
            for (key, value) in &record.indicators {
                if !value.is_finite() {
                    continue;
                }
                let entry = sums.entry(key.clone()).or_insert((0.0, 0));
                entry.0 += value;
                entry.1 += 1;
            }
        }
        let averages = sums
            .into_iter()
            .map(|(key, (sum, n))| (key, sum / n as f64))
            .collect();
        Self {
            district_count: records.len(),
            averages,
        }
    }

    /** \brief 从 JSON 数组文件加载街区记录。 */
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read context file {} failed", path.display()))?;
        let records: Vec<DistrictRecord> =
            serde_json::from_str(&raw).context("parse district records failed")?;
        Ok(Self::from_records(&records))
    }

    pub fn is_empty(&self) -> bool {
        self.district_count == 0
    }

    /**
     * \brief 将摘要与用户问题拼接为最终提示词。
     */
    pub fn render_prompt(&self, message: &str) -> String {
        if self.is_empty() {
            return message.to_string();
        }
        let mut out = format!(
            "You are assisting an urban planner. Dataset summary ({} districts):\n",
            self.district_count
        );
        for (key, avg) in &self.averages {
            out.push_str(&format!("- average {}: {:.2}\n", key, avg));
        }
        out.push_str("\nQuestion: ");
        out.push_str(message);
        out
    }
}
