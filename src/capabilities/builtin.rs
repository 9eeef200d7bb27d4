//! 内置能力：数据生成、直方图渲染、描述统计、报告
//!
//! 四个能力共享一个 ArtifactStore。数据集与图像都以 JSON 存入仓库，图像记录其来源数据集，
//! 因此下游能力拿到图像句柄时也能找回原始数据。

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Map, Value};

use crate::capabilities::{
    ArtifactHandle, ArtifactStore, Capability, CapabilityKind, CapabilityOutput, CapabilityRegistry,
    ARTIFACT_ARG,
};

/// 报告变体名，与内置命令表一致
pub const REPORT_VARIANTS: [&str; 3] = ["brief", "detailed", "technical"];

const MAX_ROWS: u64 = 100_000;

/// 注册全部内置能力
pub fn register_builtin(registry: &mut CapabilityRegistry, store: Arc<ArtifactStore>, default_rows: usize) {
    registry.register(GenerateDataCapability::new(store.clone(), default_rows));
    registry.register(RenderChartCapability::new(store.clone()));
    registry.register(ComputeStatisticsCapability::new(store.clone()));
    registry.register(GenerateReportCapability::new(store));
}

/// 从参数中的句柄找回数据集数值；图像句柄沿 source 回溯一次
fn dataset_values(store: &ArtifactStore, args: &Map<String, Value>) -> anyhow::Result<Vec<f64>> {
    let handle = args
        .get(ARTIFACT_ARG)
        .and_then(Value::as_str)
        .map(ArtifactHandle::from)
        .ok_or_else(|| anyhow!("missing '{}' argument", ARTIFACT_ARG))?;

    let mut content = store
        .get(&handle)
        .ok_or_else(|| anyhow!("unknown artifact {}", handle))?;
    if content.get("kind").and_then(Value::as_str) == Some("figure") {
        let source = content
            .get("source")
            .and_then(Value::as_str)
            .map(ArtifactHandle::from)
            .ok_or_else(|| anyhow!("figure {} has no source dataset", handle))?;
        content = store
            .get(&source)
            .ok_or_else(|| anyhow!("source dataset {} is gone", source))?;
    }

    let values: Vec<f64> = content
        .get("values")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("artifact {} is not a dataset", handle))?
        .iter()
        .filter_map(Value::as_f64)
        .collect();
    if values.is_empty() {
        bail!("dataset {} is empty", handle);
    }
    Ok(values)
}

/// 生成随机数据集（正态或均匀分布）
pub struct GenerateDataCapability {
    store: Arc<ArtifactStore>,
    default_rows: usize,
}

impl GenerateDataCapability {
    pub fn new(store: Arc<ArtifactStore>, default_rows: usize) -> Self {
        Self {
            store,
            default_rows: default_rows.max(1),
        }
    }
}

#[async_trait]
impl Capability for GenerateDataCapability {
    fn name(&self) -> &str {
        "generate_data"
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Data
    }

    fn description(&self) -> &str {
        "Generate a numeric dataset. Args: {\"rows\": int, \"distribution\": \"normal|uniform\", \"mean\": float, \"std\": float, \"seed\": int (optional)}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "rows": {"type": "integer", "minimum": 1},
                "distribution": {"type": "string", "enum": ["normal", "uniform"]},
                "mean": {"type": "number"},
                "std": {"type": "number", "minimum": 0},
                "seed": {"type": "integer"}
            },
            "required": []
        })
    }

    fn default_args(&self) -> Map<String, Value> {
        let mut args = Map::new();
        args.insert("rows".into(), json!(self.default_rows));
        args.insert("distribution".into(), json!("normal"));
        args.insert("mean".into(), json!(0.0));
        args.insert("std".into(), json!(1.0));
        args
    }

    async fn invoke(&self, args: Map<String, Value>) -> anyhow::Result<CapabilityOutput> {
        let rows = args
            .get("rows")
            .and_then(Value::as_u64)
            .context("'rows' must be a positive integer")?;
        if rows == 0 || rows > MAX_ROWS {
            bail!("'rows' must be between 1 and {}", MAX_ROWS);
        }
        let mean = args.get("mean").and_then(Value::as_f64).unwrap_or(0.0);
        let std = args.get("std").and_then(Value::as_f64).unwrap_or(1.0);
        if !mean.is_finite() {
            bail!("'mean' must be a finite number");
        }
        if !std.is_finite() || std < 0.0 {
            bail!("'std' must be a non-negative number");
        }
        let distribution = args
            .get("distribution")
            .and_then(Value::as_str)
            .unwrap_or("normal");

        let mut rng = match args.get("seed").and_then(Value::as_u64) {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let values: Vec<f64> = match distribution {
            "normal" => (0..rows).map(|_| mean + std * standard_normal(&mut rng)).collect(),
            "uniform" => {
                let half = std * 3f64.sqrt();
                let (low, high) = (mean - half, mean + half);
                // gen_range 要求区间非空且宽度有限
                if half > 0.0 && !(low < high && (high - low).is_finite()) {
                    bail!("uniform range around mean {} with std {} is not representable", mean, std);
                }
                (0..rows)
                    .map(|_| if half > 0.0 { rng.gen_range(low..high) } else { mean })
                    .collect()
            }
            other => bail!("unsupported distribution '{}'", other),
        };

        let handle = self
            .store
            .put("dataset", json!({ "kind": "dataset", "distribution": distribution, "values": values }));
        tracing::debug!(handle = %handle, rows, "dataset generated");

        Ok(CapabilityOutput::success(
            format!("Generated {} {} rows", rows, distribution),
            json!({ "rows": rows, "distribution": distribution }),
        )
        .with_artifact(handle))
    }
}

/// Box-Muller
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// 直方图渲染：输出图像描述（分箱计数与样式参数），并回传参数快照
pub struct RenderChartCapability {
    store: Arc<ArtifactStore>,
}

impl RenderChartCapability {
    pub fn new(store: Arc<ArtifactStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Capability for RenderChartCapability {
    fn name(&self) -> &str {
        "render_chart"
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Visualization
    }

    fn description(&self) -> &str {
        "Render a histogram of the latest dataset. Args: {\"colormap\": str, \"alpha\": 0..1, \"bins\": int, \"line_width\": float, \"marker_size\": float, \"grid\": bool, \"legend\": bool}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "artifact": {"type": "string"},
                "colormap": {"type": "string"},
                "alpha": {"type": "number", "minimum": 0, "maximum": 1},
                "bins": {"type": "integer", "minimum": 1, "maximum": 500},
                "line_width": {"type": "number"},
                "marker_size": {"type": "number"},
                "grid": {"type": "boolean"},
                "legend": {"type": "boolean"}
            },
            "required": []
        })
    }

    fn default_args(&self) -> Map<String, Value> {
        let mut args = Map::new();
        args.insert("colormap".into(), json!("viridis"));
        args.insert("alpha".into(), json!(0.7));
        args.insert("bins".into(), json!(20));
        args.insert("grid".into(), json!(true));
        args.insert("legend".into(), json!(false));
        args
    }

    fn consumes_artifact(&self) -> bool {
        true
    }

    async fn invoke(&self, args: Map<String, Value>) -> anyhow::Result<CapabilityOutput> {
        let values = dataset_values(&self.store, &args)?;

        let alpha = args.get("alpha").and_then(Value::as_f64).unwrap_or(0.7);
        if !(0.0..=1.0).contains(&alpha) {
            bail!("alpha {} is outside 0..=1", alpha);
        }
        let bins = args.get("bins").and_then(Value::as_u64).unwrap_or(20);
        if bins == 0 || bins > 500 {
            bail!("bins {} is outside 1..=500", bins);
        }

        let counts = histogram(&values, bins as usize);
        let source = args.get(ARTIFACT_ARG).cloned().unwrap_or(Value::Null);
        let mut style = args.clone();
        style.remove(ARTIFACT_ARG);

        let handle = self.store.put(
            "figure",
            json!({ "kind": "figure", "source": source, "style": style, "counts": counts }),
        );

        Ok(CapabilityOutput::success(
            format!(
                "Rendered histogram with {} bins ({})",
                bins,
                args.get("colormap").and_then(Value::as_str).unwrap_or("viridis")
            ),
            json!({ "bins": bins, "counts": counts }),
        )
        .with_artifact(handle)
        .with_parameters(args))
    }
}

fn histogram(values: &[f64], bins: usize) -> Vec<u64> {
    let mut counts = vec![0u64; bins];
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    let width = (max - min) / bins as f64;
    for v in values {
        let idx = if width > 0.0 {
            (((v - min) / width) as usize).min(bins - 1)
        } else {
            0
        };
        counts[idx] += 1;
    }
    counts
}

/// 描述统计
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
}

impl Summary {
    pub fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let variance = if count > 1 {
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64
        } else {
            0.0
        };
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let median = if count % 2 == 0 {
            (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
        } else {
            sorted[count / 2]
        };
        Some(Self {
            count,
            mean,
            std: variance.sqrt(),
            min: sorted[0],
            max: sorted[count - 1],
            median,
        })
    }

    fn to_value(&self) -> Value {
        json!({
            "count": self.count,
            "mean": self.mean,
            "std": self.std,
            "min": self.min,
            "max": self.max,
            "median": self.median,
        })
    }

    pub fn render(&self, variant: &str) -> Option<String> {
        let text = match variant {
            "brief" => format!(
                "{} values, mean {:.3}, std {:.3}.",
                self.count, self.mean, self.std
            ),
            "detailed" => format!(
                "The dataset has {} values. Mean {:.3}, median {:.3}, standard deviation {:.3}. \
                Values range from {:.3} to {:.3}.",
                self.count, self.mean, self.median, self.std, self.min, self.max
            ),
            "technical" => format!(
                "n={} mean={:.6} median={:.6} sd={:.6} (sample, ddof=1) min={:.6} max={:.6} range={:.6}",
                self.count,
                self.mean,
                self.median,
                self.std,
                self.min,
                self.max,
                self.max - self.min
            ),
            _ => return None,
        };
        Some(text)
    }

    fn variants(&self, names: &[&str]) -> BTreeMap<String, String> {
        names
            .iter()
            .filter_map(|v| self.render(v).map(|text| (v.to_string(), text)))
            .collect()
    }
}

/// 统计：计算摘要并重新生成全部报告变体
pub struct ComputeStatisticsCapability {
    store: Arc<ArtifactStore>,
}

impl ComputeStatisticsCapability {
    pub fn new(store: Arc<ArtifactStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Capability for ComputeStatisticsCapability {
    fn name(&self) -> &str {
        "compute_statistics"
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Statistics
    }

    fn description(&self) -> &str {
        "Compute descriptive statistics (count, mean, std, min, max, median) of the latest dataset."
    }

    fn consumes_artifact(&self) -> bool {
        true
    }

    async fn invoke(&self, args: Map<String, Value>) -> anyhow::Result<CapabilityOutput> {
        let values = dataset_values(&self.store, &args)?;
        let summary = Summary::of(&values).context("no values to summarize")?;
        Ok(CapabilityOutput::success(
            format!("Computed statistics over {} values", summary.count),
            summary.to_value(),
        )
        .with_records(summary.variants(&REPORT_VARIANTS)))
    }
}

/// 报告：按请求的变体生成文本
pub struct GenerateReportCapability {
    store: Arc<ArtifactStore>,
}

impl GenerateReportCapability {
    pub fn new(store: Arc<ArtifactStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Capability for GenerateReportCapability {
    fn name(&self) -> &str {
        "generate_report"
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Report
    }

    fn description(&self) -> &str {
        "Write a report of the latest dataset. Args: {\"variant\": \"brief|detailed|technical|all\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "variant": {"type": "string", "enum": ["brief", "detailed", "technical", "all"]}
            },
            "required": []
        })
    }

    fn default_args(&self) -> Map<String, Value> {
        let mut args = Map::new();
        args.insert("variant".into(), json!("all"));
        args
    }

    fn consumes_artifact(&self) -> bool {
        true
    }

    async fn invoke(&self, args: Map<String, Value>) -> anyhow::Result<CapabilityOutput> {
        let requested = args.get("variant").and_then(Value::as_str).unwrap_or("all");
        let names: Vec<&str> = if requested == "all" {
            REPORT_VARIANTS.to_vec()
        } else if REPORT_VARIANTS.contains(&requested) {
            vec![requested]
        } else {
            bail!("unknown report variant '{}'", requested);
        };

        let values = dataset_values(&self.store, &args)?;
        let summary = Summary::of(&values).context("no values to report on")?;
        let records = summary.variants(&names);
        let body = records
            .iter()
            .map(|(name, text)| format!("## {}\n{}", name, text))
            .collect::<Vec<_>>()
            .join("\n\n");

        Ok(CapabilityOutput::success(body, json!({ "variants": names })).with_records(records))
    }
}
