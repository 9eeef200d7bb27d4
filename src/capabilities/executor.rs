//! 能力执行器
//!
//! 每次只调用一个能力：补齐默认参数 -> 调用（捕获 Err 与 panic）-> 失败时先记录到 ErrorTracker ->
//! 归一化为 Envelope -> 成功时更新该种类对应的状态切片并清零连续失败计数。
//! 每次调用输出结构化审计日志（JSON）。执行器不做序列化写入历史，那是调用方的事。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures_util::FutureExt;
use serde_json::{Map, Value};

use crate::capabilities::{
    ArtifactHandle, Capability, CapabilityCall, CapabilityKind, CapabilityOutput, CapabilityRegistry,
    Diagnostic, Envelope, Status,
};
use crate::core::state::{ParameterSnapshot, SessionState};
use crate::core::{ErrorCategory, ErrorTracker};

/// 参数中承载上游产物句柄的键
pub const ARTIFACT_ARG: &str = "artifact";

const DEFAULT_PREVIEW_CHARS: usize = 200;

/// 各种类执行器对会话状态的读写
trait SliceExecutor: Sync {
    /// 调用前的状态处理
    fn before_invoke(&self, _state: &mut SessionState) {}

    /// 成功后的状态更新
    fn on_success(
        &self,
        capability: &str,
        resolved: &Map<String, Value>,
        output: &CapabilityOutput,
        state: &mut SessionState,
    );
}

/// 数据生成：记录最新产物
struct DataExecutor;

impl SliceExecutor for DataExecutor {
    fn on_success(
        &self,
        _capability: &str,
        _resolved: &Map<String, Value>,
        output: &CapabilityOutput,
        state: &mut SessionState,
    ) {
        if let Some(handle) = &output.artifact {
            state.set_latest_artifact(handle.clone());
        }
    }
}

/// 可视化：记录新图像，并保存带能力 id 的参数快照（优先用能力返回的侧车快照）
struct VisualizationExecutor;

impl SliceExecutor for VisualizationExecutor {
    fn on_success(
        &self,
        capability: &str,
        resolved: &Map<String, Value>,
        output: &CapabilityOutput,
        state: &mut SessionState,
    ) {
        if let Some(handle) = &output.artifact {
            state.set_latest_artifact(handle.clone());
        }
        let params = output.parameters.clone().unwrap_or_else(|| resolved.clone());
        state.set_parameter_snapshot(ParameterSnapshot::new(capability, params));
    }
}

/// 统计：调用前立即作废全部报告变体，成功后整体替换
struct StatisticsExecutor;

impl SliceExecutor for StatisticsExecutor {
    fn before_invoke(&self, state: &mut SessionState) {
        state.invalidate_analysis_outputs();
    }

    fn on_success(
        &self,
        _capability: &str,
        _resolved: &Map<String, Value>,
        output: &CapabilityOutput,
        state: &mut SessionState,
    ) {
        state.replace_analysis_outputs(output.records.clone().unwrap_or_default());
    }
}

/// 报告：写入本次生成的变体
struct ReportExecutor;

impl SliceExecutor for ReportExecutor {
    fn on_success(
        &self,
        _capability: &str,
        _resolved: &Map<String, Value>,
        output: &CapabilityOutput,
        state: &mut SessionState,
    ) {
        if let Some(records) = &output.records {
            state.store_report_variants(records.clone());
        }
    }
}

fn slice_executor(kind: CapabilityKind) -> &'static dyn SliceExecutor {
    match kind {
        CapabilityKind::Data => &DataExecutor,
        CapabilityKind::Visualization => &VisualizationExecutor,
        CapabilityKind::Statistics => &StatisticsExecutor,
        CapabilityKind::Report => &ReportExecutor,
    }
}

/// 能力执行器：持有注册表，负责单次调用的完整生命周期
pub struct CapabilityExecutor {
    registry: CapabilityRegistry,
    preview_chars: usize,
}

impl CapabilityExecutor {
    pub fn new(registry: CapabilityRegistry) -> Self {
        Self {
            registry,
            preview_chars: DEFAULT_PREVIEW_CHARS,
        }
    }

    pub fn with_preview_chars(mut self, chars: usize) -> Self {
        self.preview_chars = chars.max(16);
        self
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn kind_of(&self, name: &str) -> Option<CapabilityKind> {
        self.registry.kind_of(name)
    }

    pub fn capability_names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// 执行一次能力调用。任何失败都在这里被转为错误信封，不会向上传播
    pub async fn execute(
        &self,
        call: &CapabilityCall,
        state: &mut SessionState,
        errors: &mut ErrorTracker,
    ) -> Envelope {
        let start = Instant::now();
        let args_preview = self.args_preview(&call.args);

        let Some(capability) = self.registry.get(&call.capability) else {
            let diagnostic = Diagnostic::new(
                ErrorCategory::UnknownCapability,
                format!("Unknown capability: {}", call.capability),
            );
            return self.fail(call, &call.args, diagnostic, state, errors, start, &args_preview);
        };
        let kind = capability.kind();
        let slice = slice_executor(kind);

        let resolved = match resolve_args(capability.as_ref(), &call.args, state) {
            Ok(args) => args,
            Err(diagnostic) => {
                return self.fail(call, &call.args, diagnostic, state, errors, start, &args_preview);
            }
        };

        slice.before_invoke(state);

        let outcome = AssertUnwindSafe(capability.invoke(resolved.clone()))
            .catch_unwind()
            .await;

        let output = match outcome {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                let chain: Vec<String> = e.chain().map(|c| c.to_string()).collect();
                let diagnostic = Diagnostic::new(ErrorCategory::ExecutionFailed, e.to_string())
                    .with_fault(serde_json::json!({ "error": e.to_string(), "chain": chain }))
                    .with_trace(format!("{:?}", e));
                return self.fail(call, &resolved, diagnostic, state, errors, start, &args_preview);
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                let diagnostic = Diagnostic::new(
                    ErrorCategory::Panicked,
                    format!("capability panicked: {}", message),
                )
                .with_fault(serde_json::json!({ "panic": message }));
                return self.fail(call, &resolved, diagnostic, state, errors, start, &args_preview);
            }
        };

        if output.status == Status::Error {
            let diagnostic = output.diagnostic.clone().unwrap_or_else(|| {
                Diagnostic::new(ErrorCategory::CapabilityReported, output.message.clone())
            });
            return self.fail(call, &resolved, diagnostic, state, errors, start, &args_preview);
        }

        slice.on_success(&call.capability, &resolved, &output, state);
        errors.record_success(state, &call.capability);
        audit(&call.capability, kind, true, start, &args_preview);

        Envelope {
            capability: call.capability.clone(),
            status: Status::Success,
            message: output.message.clone(),
            payload: success_payload(&output),
            error_id: None,
        }
    }

    /// 失败路径：先在内存中的诊断对象上记录 ErrorRecord，再构造信封
    #[allow(clippy::too_many_arguments)]
    fn fail(
        &self,
        call: &CapabilityCall,
        args: &Map<String, Value>,
        diagnostic: Diagnostic,
        state: &mut SessionState,
        errors: &mut ErrorTracker,
        start: Instant,
        args_preview: &str,
    ) -> Envelope {
        let context = serde_json::json!({
            "turn": state.turn(),
            "args": Value::Object(args.clone()),
        });
        let error_id = errors.record_failure(state, &call.capability, &diagnostic, Some(context));
        let kind = self.registry.kind_of(&call.capability);
        audit_failure(&call.capability, kind, diagnostic.category, start, args_preview);

        Envelope {
            capability: call.capability.clone(),
            status: Status::Error,
            message: diagnostic.message.clone(),
            payload: serde_json::json!({ "category": diagnostic.category }),
            error_id: Some(error_id),
        }
    }

    fn args_preview(&self, args: &Map<String, Value>) -> String {
        let s = Value::Object(args.clone()).to_string();
        if s.chars().count() > self.preview_chars {
            format!("{}...", s.chars().take(self.preview_chars).collect::<String>())
        } else {
            s
        }
    }
}

/// 默认参数在下，调用参数在上；消费产物的能力缺 artifact 时取会话最新产物
fn resolve_args(
    capability: &dyn Capability,
    provided: &Map<String, Value>,
    state: &SessionState,
) -> Result<Map<String, Value>, Diagnostic> {
    let mut args = capability.default_args();
    for (k, v) in provided {
        args.insert(k.clone(), v.clone());
    }

    if capability.consumes_artifact() {
        let missing = args.get(ARTIFACT_ARG).map_or(true, |v| v.is_null());
        if missing {
            let handle = state.latest_artifact().ok_or_else(|| {
                Diagnostic::new(
                    ErrorCategory::MissingArtifact,
                    format!(
                        "{} needs an artifact but none has been produced yet",
                        capability.name()
                    ),
                )
            })?;
            args.insert(ARTIFACT_ARG.to_string(), Value::String(handle.to_string()));
        } else if !args.get(ARTIFACT_ARG).map_or(false, Value::is_string) {
            return Err(Diagnostic::new(
                ErrorCategory::InvalidArguments,
                format!("{}: '{}' must be a string handle", capability.name(), ARTIFACT_ARG),
            ));
        }
    }
    Ok(args)
}

fn success_payload(output: &CapabilityOutput) -> Value {
    match (&output.payload, &output.artifact) {
        (Value::Object(obj), Some(handle)) => {
            let mut obj = obj.clone();
            obj.insert(ARTIFACT_ARG.to_string(), Value::String(handle.to_string()));
            Value::Object(obj)
        }
        (Value::Null, Some(handle)) => serde_json::json!({ ARTIFACT_ARG: handle }),
        (other, Some(handle)) => serde_json::json!({ "value": other, ARTIFACT_ARG: handle }),
        (other, None) => other.clone(),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn audit(capability: &str, kind: CapabilityKind, ok: bool, start: Instant, args_preview: &str) {
    let audit = serde_json::json!({
        "event": "capability_audit",
        "capability": capability,
        "kind": kind,
        "ok": ok,
        "duration_ms": start.elapsed().as_millis() as u64,
        "args_preview": args_preview,
    });
    tracing::info!(audit = %audit, "capability");
}

fn audit_failure(
    capability: &str,
    kind: Option<CapabilityKind>,
    category: ErrorCategory,
    start: Instant,
    args_preview: &str,
) {
    let audit = serde_json::json!({
        "event": "capability_audit",
        "capability": capability,
        "kind": kind,
        "ok": false,
        "category": category,
        "duration_ms": start.elapsed().as_millis() as u64,
        "args_preview": args_preview,
    });
    tracing::info!(audit = %audit, "capability");
}

/// 便于测试与快速通道判断产物是否更新
pub fn artifact_of(envelope: &Envelope) -> Option<ArtifactHandle> {
    envelope
        .payload
        .get(ARTIFACT_ARG)
        .and_then(Value::as_str)
        .map(ArtifactHandle::from)
}
