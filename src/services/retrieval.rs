//! 检索服务
//!
//! 把操作员的自由文本命令解析为类型库中的类型名：
//! 1. `/name` 快速通道：精确匹配，不访问解析模型
//! 2. 本地词法预匹配：分数足够高时直接命中
//! 3. 外部解析模型：只接受候选列表中出现的名称

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RetrievalConfig;
use crate::error::{AppError, Result};
use crate::models::TypeDescriptor;
use crate::storage::TypeRepository;

/// 检索结果
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// 命中唯一类型
    Resolved(String),
    /// 没有合适的类型
    NoMatch,
    /// 多个候选无法区分
    Ambiguous(Vec<String>),
}

/// 外部指令解析模型
///
/// 返回模型的原始回复文本，由适配器负责解释。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TypeInterpreter: Send + Sync {
    async fn interpret(&self, query: &str, catalog: &[TypeDescriptor]) -> Result<String>;
}

const SYSTEM_PROMPT: &str =
    "You are a concise classifier returning only a gesture id or None.";

/// 构造解析模型提示词
pub fn build_prompt(query: &str, catalog: &[TypeDescriptor]) -> String {
    let lines = catalog
        .iter()
        .map(TypeDescriptor::catalog_line)
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are a gesture type selector. Given a natural language user query (maybe noisy ASR). \
         Choose the best gesture id from the catalog. If nothing fits, answer None. \
         Just output the id or None.\nCatalog:\n{}\nQuery: {}\nAnswer:",
        lines, query
    )
}

/// OpenAI 兼容的对话补全接口客户端
pub struct ChatInterpreter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatInterpreter {
    pub fn new(config: &RetrievalConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| AppError::Config(format!("无法创建 HTTP 客户端: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl TypeInterpreter for ChatInterpreter {
    async fn interpret(&self, query: &str, catalog: &[TypeDescriptor]) -> Result<String> {
        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&serde_json::json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": SYSTEM_PROMPT},
                    {"role": "user", "content": build_prompt(query, catalog)},
                ],
                "stream": false
            }));
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::RetrievalUnavailable(format!(
                "解析模型返回 {}: {}",
                status, error_text
            )));
        }

        let body: ChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| AppError::RetrievalUnavailable("解析模型回复为空".into()))
    }
}

/// 本地词法匹配
pub struct LocalMatcher {
    word: Regex,
}

impl LocalMatcher {
    const MAX_QUERY_CHARS: usize = 256;

    pub fn new() -> Result<Self> {
        Ok(Self {
            word: Regex::new(r"[a-zA-Z]+")?,
        })
    }

    /// 查询与类型描述的相似度
    ///
    /// 基础分为归一化最长公共子序列，另加显示名称、意图短语、用途关键词命中的奖励。
    pub fn score(&self, query: &str, descriptor: &TypeDescriptor) -> f64 {
        let q: String = query
            .trim()
            .to_lowercase()
            .chars()
            .take(Self::MAX_QUERY_CHARS)
            .collect();
        let base = similarity(&q, &descriptor.name.to_lowercase());

        let bonus_label = match &descriptor.label {
            Some(label) if !label.is_empty() && q.contains(&label.to_lowercase()) => 0.15,
            _ => 0.0,
        };

        let bonus_intent = (descriptor
            .intents
            .iter()
            .filter(|it| !it.is_empty() && q.contains(&it.to_lowercase()))
            .count() as f64
            * 0.1)
            .min(0.3);

        let bonus_usage = match &descriptor.usage {
            Some(usage) => {
                let usage = usage.to_lowercase();
                let hits = self
                    .word
                    .find_iter(&usage)
                    .filter(|m| m.as_str().len() > 3 && q.contains(m.as_str()))
                    .count();
                (hits as f64 * 0.05).min(0.15)
            }
            None => 0.0,
        };

        base + bonus_label + bonus_intent + bonus_usage
    }

    /// 按分数降序排列的候选
    pub fn rank(&self, query: &str, catalog: &[TypeDescriptor]) -> Vec<(String, f64)> {
        let mut scored: Vec<(String, f64)> = catalog
            .iter()
            .map(|d| (d.name.clone(), self.score(query, d)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored
    }
}

/// 2 * LCS / (|a| + |b|)
fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for ca in &a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    2.0 * prev[b.len()] as f64 / (a.len() + b.len()) as f64
}

/// 解释解析模型的回复
///
/// 不在候选列表中的名称一律视为无匹配。
pub fn parse_reply(reply: &str, known: &[TypeDescriptor]) -> Resolution {
    let is_known = |name: &str| known.iter().any(|d| d.name == name);
    let clean = |s: &str| -> String {
        s.trim()
            .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '.' | '。' | '*'))
            .trim()
            .to_string()
    };

    let whole = clean(reply);
    if whole.is_empty()
        || ["none", "no match", "null", "n/a"]
            .iter()
            .any(|w| whole.eq_ignore_ascii_case(w))
    {
        return Resolution::NoMatch;
    }
    if is_known(&whole) {
        return Resolution::Resolved(whole);
    }

    let pieces: Vec<String> = reply
        .split([',', '\n', ';', '，'])
        .map(clean)
        .filter(|p| !p.is_empty())
        .collect();
    let mut names: Vec<String> = Vec::new();
    for piece in &pieces {
        if is_known(piece) && !names.contains(piece) {
            names.push(piece.clone());
        }
    }

    match names.len() {
        0 => Resolution::NoMatch,
        1 if pieces.len() == 1 => Resolution::Resolved(names.remove(0)),
        1 => Resolution::NoMatch,
        _ => Resolution::Ambiguous(names),
    }
}

/// 检索适配器
pub struct RetrievalAdapter {
    interpreter: Arc<dyn TypeInterpreter>,
    matcher: LocalMatcher,
    config: RetrievalConfig,
}

impl RetrievalAdapter {
    pub fn new(interpreter: Arc<dyn TypeInterpreter>, config: RetrievalConfig) -> Result<Self> {
        Ok(Self {
            interpreter,
            matcher: LocalMatcher::new()?,
            config,
        })
    }

    /// 只有类型名、没有目录元数据时的便捷入口
    pub async fn resolve_names(&self, command_text: &str, known_names: &[String]) -> Result<Resolution> {
        let catalog: Vec<TypeDescriptor> =
            known_names.iter().map(|n| TypeDescriptor::bare(n.clone())).collect();
        self.resolve(command_text, &catalog).await
    }

    /// 解析命令文本
    pub async fn resolve(&self, command_text: &str, known: &[TypeDescriptor]) -> Result<Resolution> {
        let text = command_text.trim();

        if let Some(name) = text.strip_prefix('/') {
            let name = name.trim();
            return if known.iter().any(|d| d.name == name) {
                debug!("Fast-path selection: {}", name);
                Ok(Resolution::Resolved(name.to_string()))
            } else {
                Err(AppError::NotFound(format!("类型 '{}' 不存在", name)))
            };
        }

        if text.is_empty() || known.is_empty() {
            return Ok(Resolution::NoMatch);
        }

        if self.config.local_match {
            if let Some(resolution) = self.local_resolution(text, known) {
                return Ok(resolution);
            }
        }

        let timeout = Duration::from_millis(self.config.timeout_ms);
        let reply = match tokio::time::timeout(timeout, self.interpreter.interpret(text, known)).await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(AppError::RetrievalUnavailable(msg))) => {
                return Err(AppError::RetrievalUnavailable(msg));
            }
            Ok(Err(e)) => return Err(AppError::RetrievalUnavailable(e.to_string())),
            Err(_) => {
                return Err(AppError::RetrievalUnavailable(format!(
                    "解析模型 {}ms 内未响应",
                    self.config.timeout_ms
                )));
            }
        };

        let resolution = parse_reply(&reply, known);
        if resolution == Resolution::NoMatch && !reply.trim().is_empty() {
            debug!("Interpreter reply not accepted: {:?}", reply.trim());
        }
        Ok(resolution)
    }

    fn local_resolution(&self, text: &str, known: &[TypeDescriptor]) -> Option<Resolution> {
        let ranked = self.matcher.rank(text, known);
        let threshold = self.config.local_accept_threshold;
        let (best, best_score) = ranked.first()?;
        if *best_score < threshold {
            return None;
        }

        let close: Vec<String> = ranked
            .iter()
            .take_while(|(_, s)| *s >= threshold && best_score - s < self.config.ambiguity_margin)
            .map(|(n, _)| n.clone())
            .collect();

        if close.len() > 1 {
            debug!("Local match ambiguous: {:?}", close);
            Some(Resolution::Ambiguous(close))
        } else {
            debug!("Local match: {} ({:.2})", best, best_score);
            Some(Resolution::Resolved(best.clone()))
        }
    }
}

/// 一次后台检索的结果
#[derive(Debug)]
pub struct RetrievalOutcome {
    /// 提交序号，用于丢弃过期结果
    pub generation: u64,
    pub query: String,
    pub result: Result<Resolution>,
}

/// 后台检索执行器
///
/// 每次提交都会使之前未完成的检索失效（新命令优先）。
pub struct RetrievalWorker {
    adapter: Arc<RetrievalAdapter>,
    repository: Arc<dyn TypeRepository>,
    generation: Arc<AtomicU64>,
    in_flight: Option<JoinHandle<()>>,
    tx: mpsc::UnboundedSender<RetrievalOutcome>,
}

impl RetrievalWorker {
    pub fn new(
        adapter: Arc<RetrievalAdapter>,
        repository: Arc<dyn TypeRepository>,
    ) -> (Self, mpsc::UnboundedReceiver<RetrievalOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                adapter,
                repository,
                generation: Arc::new(AtomicU64::new(0)),
                in_flight: None,
                tx,
            },
            rx,
        )
    }

    /// 提交新的检索，返回其序号
    pub fn submit(&mut self, query: String) -> u64 {
        let generation = self.invalidate();

        let adapter = self.adapter.clone();
        let repository = self.repository.clone();
        let current = self.generation.clone();
        let tx = self.tx.clone();

        info!("Retrieving type for: {}", query);
        self.in_flight = Some(tokio::spawn(async move {
            let result = match repository.descriptors().await {
                Ok(known) => adapter.resolve(&query, &known).await,
                Err(e) => Err(e),
            };
            if current.load(Ordering::SeqCst) != generation {
                debug!("Dropping stale retrieval #{}", generation);
                return;
            }
            if tx
                .send(RetrievalOutcome {
                    generation,
                    query,
                    result,
                })
                .is_err()
            {
                warn!("Retrieval result receiver dropped");
            }
        }));

        generation
    }

    /// 使未完成的检索失效，返回新的序号
    pub fn invalidate(&mut self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = self.in_flight.take() {
            previous.abort();
        }
        generation
    }

    /// 结果是否仍然有效
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

impl Drop for RetrievalWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TypeRecord;
    use crate::storage::MemoryTypeLibrary;

    fn config() -> RetrievalConfig {
        RetrievalConfig {
            timeout_ms: 100,
            ..Default::default()
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn adapter_with(mock: MockTypeInterpreter) -> RetrievalAdapter {
        RetrievalAdapter::new(Arc::new(mock), config()).unwrap()
    }

    #[tokio::test]
    async fn test_fast_path_never_calls_interpreter() {
        let mut mock = MockTypeInterpreter::new();
        mock.expect_interpret().never();
        let adapter = adapter_with(mock);

        let result = adapter
            .resolve_names("/processed_tape", &names(&["processed_tape", "foo"]))
            .await
            .unwrap();
        assert_eq!(result, Resolution::Resolved("processed_tape".into()));
    }

    #[tokio::test]
    async fn test_fast_path_unknown_is_not_found() {
        let mut mock = MockTypeInterpreter::new();
        mock.expect_interpret().never();
        let adapter = adapter_with(mock);

        let err = adapter
            .resolve_names("/Processed_Tape", &names(&["processed_tape"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_interpreter_known_name_resolves() {
        let mut mock = MockTypeInterpreter::new();
        mock.expect_interpret()
            .times(1)
            .returning(|_, _| Ok("processed_tape".to_string()));
        let adapter = adapter_with(mock);

        let result = adapter
            .resolve_names("pick up the tape", &names(&["processed_tape"]))
            .await
            .unwrap();
        assert_eq!(result, Resolution::Resolved("processed_tape".into()));
    }

    #[tokio::test]
    async fn test_interpreter_invented_name_is_no_match() {
        let mut mock = MockTypeInterpreter::new();
        mock.expect_interpret()
            .times(1)
            .returning(|_, _| Ok("nonexistent_type".to_string()));
        let adapter = adapter_with(mock);

        let result = adapter
            .resolve_names("pick up the tape", &names(&["processed_tape"]))
            .await
            .unwrap();
        assert_eq!(result, Resolution::NoMatch);
    }

    #[tokio::test]
    async fn test_interpreter_failure_is_retrieval_unavailable() {
        let mut mock = MockTypeInterpreter::new();
        mock.expect_interpret()
            .returning(|_, _| Err(AppError::Internal("socket closed".into())));
        let adapter = adapter_with(mock);

        let err = adapter
            .resolve_names("grab the cup", &names(&["box"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RetrievalUnavailable(_)));
        assert!(err.is_retryable());
    }

    struct SlowInterpreter;

    #[async_trait]
    impl TypeInterpreter for SlowInterpreter {
        async fn interpret(&self, _query: &str, _catalog: &[TypeDescriptor]) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("box".into())
        }
    }

    #[tokio::test]
    async fn test_interpreter_timeout_is_retrieval_unavailable() {
        let adapter = RetrievalAdapter::new(Arc::new(SlowInterpreter), config()).unwrap();
        let err = adapter
            .resolve_names("grab the cup", &names(&["box"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RetrievalUnavailable(_)));
    }

    #[tokio::test]
    async fn test_local_match_short_circuits_interpreter() {
        let mut mock = MockTypeInterpreter::new();
        mock.expect_interpret().never();
        let adapter = adapter_with(mock);

        let result = adapter
            .resolve_names("processed tape", &names(&["processed_tape", "box"]))
            .await
            .unwrap();
        assert_eq!(result, Resolution::Resolved("processed_tape".into()));
    }

    #[tokio::test]
    async fn test_empty_library_is_no_match() {
        let mut mock = MockTypeInterpreter::new();
        mock.expect_interpret().never();
        let adapter = adapter_with(mock);

        assert_eq!(
            adapter.resolve_names("grab it", &[]).await.unwrap(),
            Resolution::NoMatch
        );
    }

    #[test]
    fn test_parse_reply_variants() {
        let known: Vec<TypeDescriptor> = ["box", "cup", "tape"]
            .iter()
            .map(|n| TypeDescriptor::bare(*n))
            .collect();

        assert_eq!(parse_reply("  `box`. ", &known), Resolution::Resolved("box".into()));
        assert_eq!(parse_reply("None", &known), Resolution::NoMatch);
        assert_eq!(parse_reply("", &known), Resolution::NoMatch);
        assert_eq!(parse_reply("Box", &known), Resolution::NoMatch);
        assert_eq!(
            parse_reply("box, cup", &known),
            Resolution::Ambiguous(vec!["box".into(), "cup".into()])
        );
        assert_eq!(parse_reply("box, spoon", &known), Resolution::NoMatch);
    }

    #[test]
    fn test_similarity_bounds() {
        assert_eq!(similarity("box", "box"), 1.0);
        assert_eq!(similarity("abc", "xyz"), 0.0);
        assert!(similarity("pick up the tape", "processed_tape") < 0.75);
    }

    #[test]
    fn test_intent_bonus_raises_score() {
        let matcher = LocalMatcher::new().unwrap();
        let plain = TypeDescriptor::bare("box");
        let rich = TypeDescriptor {
            name: "box".into(),
            intents: vec!["lift the carton".into()],
            usage: Some("Wrapping large cardboard boxes".into()),
            ..Default::default()
        };
        let query = "please lift the carton made of cardboard";
        assert!(matcher.score(query, &rich) > matcher.score(query, &plain) + 0.1);
    }

    #[tokio::test]
    async fn test_worker_discards_superseded_results() {
        let mut mock = MockTypeInterpreter::new();
        mock.expect_interpret().returning(|_, _| Ok("box".to_string()));
        let adapter = Arc::new(adapter_with(mock));
        let library = MemoryTypeLibrary::with_records(
            2,
            vec![
                TypeRecord::new("box", vec![0.0; 2], vec![1.0; 2]),
                TypeRecord::new("cup", vec![0.0; 2], vec![1.0; 2]),
            ],
        )
        .unwrap();

        let (mut worker, mut rx) = RetrievalWorker::new(adapter, Arc::new(library));
        let first = worker.submit("grab the thing".into());
        let second = worker.submit("/cup".into());
        assert!(!worker.is_current(first));
        assert!(worker.is_current(second));

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.generation, second);
        assert_eq!(outcome.result.unwrap(), Resolution::Resolved("cup".into()));
        assert!(rx.try_recv().is_err());
    }
}
