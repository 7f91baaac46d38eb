use serde::{Deserialize, Serialize};

/**
 * \brief 一次补全请求，由 HTTP 层或调用方构造。
 */
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /** \brief 用户提示词 */
    pub prompt: String,
    /** \brief 首选模型；为空时使用配置中的默认模型 */
    pub primary_model: Option<String>,
    /** \brief 是否允许回退到配置的次级模型 */
    pub allow_fallback: bool,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            primary_model: None,
            allow_fallback: true,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.primary_model = Some(model.into());
        self
    }

    pub fn single_model(mut self) -> Self {
        self.allow_fallback = false;
        self
    }
}

/**
 * \brief 已去重的候选模型列表，首选模型显式保存。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateList {
    /** \brief 首选模型，恒等于 candidates[0]（列表非空时） */
    pub primary: String,
    /** \brief 依次尝试的候选模型 */
    pub candidates: Vec<String>,
}

impl CandidateList {
    /**
     * \brief 以首选模型开头，追加次级模型并去重（保留首次出现顺序）。
     */
    pub fn build<'a>(primary: &str, secondary: impl IntoIterator<Item = &'a String>) -> Self {
        let primary = primary.trim();
        let merged = std::iter::once(primary.to_string())
            .chain(secondary.into_iter().cloned())
            .collect::<Vec<_>>();
        Self {
            primary: primary.to_string(),
            candidates: dedup_models(&merged),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.candidates.iter().map(String::as_str)
    }
}

/**
 * \brief 去除重复与空白模型名，保留首次出现顺序。
 */
pub fn dedup_models(models: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(models.len());
    for model in models {
        let model = model.trim();
        if model.is_empty() || out.iter().any(|m| m == model) {
            continue;
        }
        out.push(model.to_string());
    }
    out
}

/**
 * \brief 单个候选模型的尝试结果。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success(String),
    EmptyResponse,
    BackendError(String),
}

impl AttemptOutcome {
    /**
     * \brief 将后端原始文本归类：去除首尾空白后为空即视为空响应。
     */
    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            AttemptOutcome::EmptyResponse
        } else {
            AttemptOutcome::Success(trimmed.to_string())
        }
    }

    /** \brief 失败时的可读描述，供日志与汇总错误使用。 */
    pub fn failure_message(&self) -> Option<String> {
        match self {
            AttemptOutcome::Success(_) => None,
            AttemptOutcome::EmptyResponse => Some("empty response".to_string()),
            AttemptOutcome::BackendError(msg) => Some(msg.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelAttemptResult {
    pub model: String,
    pub outcome: AttemptOutcome,
}

/**
 * \brief 补全成功结果。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResponse {
    /** \brief 返回给调用方的文本（回退时已附加说明） */
    pub text: String,
    /** \brief 实际服务的模型是否不同于首选模型 */
    pub used_fallback: bool,
    /** \brief 实际服务的模型 */
    pub serving_model: String,
}

/**
 * \brief 全部候选失败时的汇总报告。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    /** \brief 最后一次失败的原因；无候选时为空 */
    pub last_error: Option<String>,
    /** \brief 每个候选均已尝试且失败 */
    pub exhausted: bool,
}

impl FailureReport {
    pub fn no_candidates() -> Self {
        Self {
            last_error: None,
            exhausted: false,
        }
    }

    pub fn details(&self) -> String {
        match (&self.last_error, self.exhausted) {
            (Some(err), _) => err.clone(),
            (None, true) => "all candidate models failed".to_string(),
            (None, false) => "no candidate models configured".to_string(),
        }
    }
}

/**
 * \brief 为回退模型生成的回复附加说明。
 */
pub fn annotate_fallback(text: &str, model: &str) -> String {
    format!("{}\n\n_(Used fallback model '{}')_", text, model)
}
