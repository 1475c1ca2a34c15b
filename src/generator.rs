//! Passage generation: prompt construction, backend invocation, and the
//! deterministic fallback synthesizer.
//!
//! Generation is two-tier. The primary path renders the interpolation
//! prompt template and submits it to a [`GenerationBackend`]; the output
//! is accepted only if it passes [`self_check`]. Whenever the backend is
//! unconfigured, fails, returns nothing, or produces text that fails the
//! check, the deterministic [`fallback_generate`] synthesizer substitutes
//! a well-formed passage instead. No second backend attempt is made — the
//! validator's retry prompt is informational only.
//!
//! Prompt templates are loaded once at construction; a missing template
//! file is a configuration error, never a request-time failure.

use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use regex::Regex;

use crate::config::GenerationConfig;
use crate::selfcheck::self_check;

/// Sampling configuration passed to the backend on every call.
#[derive(Debug, Clone)]
pub struct SamplingParams {
    pub max_new_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
}

impl From<&GenerationConfig> for SamplingParams {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            max_new_tokens: config.max_new_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
        }
    }
}

/// Trait for text-generation backends.
///
/// An absent or failing backend is a recoverable condition: the generator
/// falls back to rule-based synthesis rather than surfacing the error.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, prompt: &str, params: &SamplingParams) -> Result<String>;
}

/// Generation backend speaking an OpenAI-style chat completions API.
///
/// A single attempt per call, no retry: generation failures are absorbed
/// by the fallback path, so retrying here would only add latency.
pub struct HttpBackend {
    endpoint: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

impl HttpBackend {
    /// Create a backend from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `model` is unset or the configured API key
    /// environment variable is not set.
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for HTTP backend"))?;

        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.api_key_env))?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            model,
            api_key,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl GenerationBackend for HttpBackend {
    async fn generate(&self, prompt: &str, params: &SamplingParams) -> Result<String> {
        let client = reqwest::Client::builder().timeout(self.timeout).build()?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": params.max_new_tokens,
            "temperature": params.temperature,
            "top_p": params.top_p,
        });

        let response = client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Generation API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        let content = json
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid generation response: missing content"))?;

        Ok(content.to_string())
    }
}

/// Read a required prompt resource, trimmed.
fn load_text(path: &Path) -> Result<String> {
    if !path.exists() {
        bail!("Required prompt file is missing: {}", path.display());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;
    Ok(content.trim().to_string())
}

/// Renders prompts and produces checked interpolation passages.
pub struct Generator {
    template: String,
    style_guide: String,
    backend: Option<Arc<dyn GenerationBackend>>,
    params: SamplingParams,
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("template", &self.template)
            .field("style_guide", &self.style_guide)
            .field("backend", &self.backend.as_ref().map(|_| "<backend>"))
            .field("params", &self.params)
            .finish()
    }
}

impl Generator {
    pub fn new(
        template: String,
        style_guide: String,
        backend: Option<Arc<dyn GenerationBackend>>,
        params: SamplingParams,
    ) -> Self {
        Self {
            template,
            style_guide,
            backend,
            params,
        }
    }

    /// Load `interpolate.md` and `style_guide.md` from the prompts
    /// directory. Missing files fail here, at assembly time.
    pub fn from_dir(
        dir: &Path,
        backend: Option<Arc<dyn GenerationBackend>>,
        params: SamplingParams,
    ) -> Result<Self> {
        let template = load_text(&dir.join("interpolate.md"))?;
        let style_guide = load_text(&dir.join("style_guide.md"))?;
        Ok(Self::new(template, style_guide, backend, params))
    }

    /// Fill the template placeholders `{date}`, `{context}`, `{hint}`,
    /// `{style_guide}`.
    fn render_prompt(&self, date: &str, context: &str, hint: Option<&str>) -> String {
        let context_block = if context.trim().is_empty() {
            "文脈情報は提供されませんでした。"
        } else {
            context.trim()
        };
        let hint_block = hint
            .filter(|h| !h.is_empty())
            .unwrap_or("特筆すべきヒントはありません。");

        self.template
            .replace("{date}", date)
            .replace("{context}", context_block)
            .replace("{hint}", hint_block)
            .replace("{style_guide}", &self.style_guide)
    }

    /// Generate the interpolated passage for `date`.
    ///
    /// Always returns usable text: backend output that is empty or fails
    /// the self-check is replaced by the deterministic fallback.
    pub async fn generate_interpolation(
        &self,
        date: &str,
        context: &str,
        hint: Option<&str>,
    ) -> String {
        let prompt = self.render_prompt(date, context, hint);

        let mut generated = String::new();
        match &self.backend {
            Some(backend) => match backend.generate(&prompt, &self.params).await {
                Ok(text) => generated = text,
                Err(e) => {
                    tracing::warn!(
                        "generation backend failed ({e:#}), falling back to rule-based output"
                    );
                }
            },
            None => tracing::debug!("no generation backend configured"),
        }

        if generated.trim().is_empty() {
            generated = fallback_generate(date, context, hint);
        } else {
            let report = self_check(&generated, Some(date));
            if !report.passed {
                tracing::info!(
                    "self-check rejected backend output: {}",
                    report.retry_prompt.as_deref().unwrap_or("(no detail)")
                );
                generated = fallback_generate(date, context, hint);
            }
        }

        generated.trim().to_string()
    }
}

static ENUM_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]+[.)、\-]\s*").unwrap());
static PAREN_ASIDE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"（.*?）").unwrap());
// 午前中 before 午前 so the longer prefix wins under leftmost-first matching.
static TIME_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(朝|午前中|午前|昼|午後|夕方|夜|終日)(から|には|にかけて|まで|は|に)?").unwrap()
});
static LEAD_PARTICLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:には|に|は|で|を|と|が|へ|も)\s*").unwrap());
static LEAD_PUNCT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[、。,.\s]+").unwrap());

/// Reduce one context line to a bare event clause: strip enumeration
/// markers, parenthetical asides, time-of-day prefixes and their
/// particles, leading function words, and surrounding punctuation.
fn normalize_point(text: &str) -> String {
    let no_enum = ENUM_PREFIX.replace(text, "");
    let no_paren = PAREN_ASIDE.replace_all(&no_enum, "");
    let spaced = no_paren.replace('\u{3000}', " ");
    let trimmed = spaced.trim();
    let no_time = TIME_PREFIX.replace(trimmed, "");
    let no_particle = LEAD_PARTICLE.replace(&no_time, "");
    let no_punct = LEAD_PUNCT.replace(&no_particle, "");
    no_punct
        .trim_matches(|c| matches!(c, '。' | '．' | '.' | '、' | ','))
        .to_string()
}

/// Wrap a fragment as `prefix + fragment + 。`, substituting
/// `fallback_phrase` when the fragment is empty after cleanup.
fn ensure_sentence(prefix: &str, fragment: &str, fallback_phrase: &str) -> String {
    let normalized = fragment
        .trim()
        .trim_matches(|c| matches!(c, '。' | '．' | '.' | ' '));
    let normalized = if normalized.is_empty() {
        fallback_phrase
    } else {
        normalized
    };
    format!("{}{}。", prefix, normalized)
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Deterministic interpolation when no backend output is usable.
///
/// Produces a header line `"{date} の記録"` and exactly three body
/// paragraphs built from up to three key points extracted from the
/// context, padded with a filler sentence until the body character count
/// reaches 210 without exceeding 280.
pub fn fallback_generate(date: &str, context: &str, hint: Option<&str>) -> String {
    let date_header = format!("{} の記録", date);

    let context_lines: Vec<&str> = context
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.trim_matches(|c| c == '・' || c == ' '))
        .collect();

    // Up to three event candidates.
    let mut key_points: Vec<String> = Vec::new();
    for line in &context_lines {
        let normalized = normalize_point(line);
        if !normalized.is_empty() {
            key_points.push(normalized);
        }
        if key_points.len() >= 3 {
            break;
        }
    }

    if key_points.is_empty() {
        key_points.push("文脈情報が不足していますが、穏やかな一日だったと記録します".to_string());
    }

    let hint_sentence = hint
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .unwrap_or("特記事項は記録されていません。");

    let mut paragraphs: Vec<String> = Vec::new();

    let mut lead = format!(
        "今日の出来事は提供された資料をもとに整理しました。{}",
        hint_sentence
    )
    .trim()
    .to_string();
    if !lead.ends_with('。') {
        lead.push('。');
    }
    paragraphs.push(lead);

    let morning = key_points[0].as_str();
    let afternoon = key_points
        .get(1)
        .map(String::as_str)
        .unwrap_or("落ち着いた時間が流れました");
    let body = format!(
        "{}{}",
        ensure_sentence("午前中は", morning, "静かに過ごしました"),
        ensure_sentence("午後は", afternoon, "落ち着いた時間が流れました")
    );
    paragraphs.push(body);

    let closing_core = key_points
        .get(2)
        .map(String::as_str)
        .unwrap_or("一日の終わりに簡単な振り返りを行い、記録を整えました");
    let summary = ensure_sentence("一日の締めくくりとして", closing_core, "記録を整えました");
    paragraphs.push(summary);

    let filler_sentence = "全体として落ち着いた雰囲気で、記録の整理と次の準備に時間を充てました。";
    let mut body_len: usize = paragraphs.iter().map(|p| char_len(p)).sum();
    while body_len < 210 && body_len + char_len(filler_sentence) <= 280 {
        let last = paragraphs.last_mut().unwrap();
        *last = format!("{}。{}", last.trim_end_matches('。'), filler_sentence);
        body_len = paragraphs.iter().map(|p| char_len(p)).sum();
    }

    let mut out = vec![date_header];
    out.extend(paragraphs);
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NO_SOURCES_NOTICE;

    struct ScriptedBackend {
        output: String,
    }

    #[async_trait]
    impl GenerationBackend for ScriptedBackend {
        async fn generate(&self, _prompt: &str, _params: &SamplingParams) -> Result<String> {
            Ok(self.output.clone())
        }
    }

    fn params() -> SamplingParams {
        SamplingParams {
            max_new_tokens: 220,
            temperature: 0.7,
            top_p: 0.9,
        }
    }

    fn generator(backend: Option<Arc<dyn GenerationBackend>>) -> Generator {
        Generator::new(
            "日付: {date}\n文脈:\n{context}\nヒント: {hint}\n{style_guide}".to_string(),
            "落ち着いた文体で書く。".to_string(),
            backend,
            params(),
        )
    }

    #[test]
    fn test_normalize_point_strips_enumeration() {
        assert_eq!(normalize_point("1. 買い物に行った。"), "買い物に行った");
        assert_eq!(normalize_point("02) 散歩した"), "散歩した");
    }

    #[test]
    fn test_normalize_point_strips_time_prefix_and_particle() {
        assert_eq!(normalize_point("午前中は散歩した"), "散歩した");
        assert_eq!(normalize_point("夜にかけて雨が降った"), "雨が降った");
        assert_eq!(normalize_point("終日家で過ごした"), "家で過ごした");
    }

    #[test]
    fn test_normalize_point_strips_parenthetical_aside() {
        assert_eq!(
            normalize_point("図書館へ行った（駅前の新しい方）。"),
            "図書館へ行った"
        );
    }

    #[test]
    fn test_normalize_point_strips_leading_particle() {
        assert_eq!(normalize_point("には公園を歩いた"), "公園を歩いた");
        assert_eq!(normalize_point("、夕方の散歩に出た"), "夕方の散歩に出た");
    }

    #[test]
    fn test_fallback_shape_with_empty_context() {
        let out = fallback_generate("2025-09-24", "", None);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "2025-09-24 の記録");

        let body_len: usize = lines[1..].iter().map(|l| char_len(l)).sum();
        assert!(
            (200..=280).contains(&body_len),
            "body length {} out of band",
            body_len
        );
    }

    #[test]
    fn test_fallback_uses_key_points_from_context() {
        let context = "01. 朝は雨が降っていた\n02. 午後は図書館で勉強した\n03. 夜は早めに休んだ";
        let out = fallback_generate("2025-09-24", context, None);
        assert!(out.contains("午前中は雨が降っていた。"));
        assert!(out.contains("午後は図書館で勉強した。"));
        assert!(out.contains("一日の締めくくりとして早めに休んだ。"));
    }

    #[test]
    fn test_fallback_includes_hint() {
        let out = fallback_generate("2025-09-24", "", Some("台風が接近していた"));
        assert!(out.contains("台風が接近していた。"));
    }

    #[test]
    fn test_fallback_passes_its_own_self_check_core_predicates() {
        for context in ["", NO_SOURCES_NOTICE, "01. 散歩した\n02. 読書した"] {
            let out = fallback_generate("2025-09-24", context, None);
            let report = self_check(&out, Some("2025-09-24"));
            for name in ["header_format", "structure", "banned_words"] {
                let check = report.checks.iter().find(|c| c.name == name).unwrap();
                assert!(check.passed, "{} failed for context {:?}", name, context);
            }
        }
    }

    #[test]
    fn test_render_prompt_fills_placeholders() {
        let g = generator(None);
        let prompt = g.render_prompt("2025-09-24", "01. 散歩した", Some("晴れ"));
        assert!(prompt.contains("日付: 2025-09-24"));
        assert!(prompt.contains("01. 散歩した"));
        assert!(prompt.contains("ヒント: 晴れ"));
        assert!(prompt.contains("落ち着いた文体で書く。"));
    }

    #[test]
    fn test_render_prompt_defaults_for_empty_context_and_hint() {
        let g = generator(None);
        let prompt = g.render_prompt("2025-09-24", "  ", None);
        assert!(prompt.contains("文脈情報は提供されませんでした。"));
        assert!(prompt.contains("特筆すべきヒントはありません。"));
    }

    #[tokio::test]
    async fn test_no_backend_yields_fallback_header() {
        let g = generator(None);
        let out = g
            .generate_interpolation("2025-09-24", NO_SOURCES_NOTICE, None)
            .await;
        assert!(out.starts_with("2025-09-24 の記録"));
    }

    #[tokio::test]
    async fn test_rejected_backend_output_is_replaced_by_fallback() {
        // Two body lines: fails the structure check.
        let bad = "2025-09-24 の記録\n今日は散歩した。\n夜は読書した。";
        let g = generator(Some(Arc::new(ScriptedBackend {
            output: bad.to_string(),
        })));
        let out = g.generate_interpolation("2025-09-24", "", None).await;
        assert_ne!(out, bad);
        assert!(out.starts_with("2025-09-24 の記録"));
        assert_eq!(out.lines().count(), 4);
    }

    #[tokio::test]
    async fn test_accepted_backend_output_is_kept() {
        let body: String = "あ".repeat(79);
        let good = format!(
            "2025-09-24 の記録\n{}。\n{}。\n{}。",
            body, body, body
        );
        let g = generator(Some(Arc::new(ScriptedBackend {
            output: good.clone(),
        })));
        let out = g.generate_interpolation("2025-09-24", "", None).await;
        assert_eq!(out, good);
    }

    #[test]
    fn test_from_dir_fails_on_missing_template() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("style_guide.md"), "文体ガイド").unwrap();
        let err = Generator::from_dir(dir.path(), None, params()).unwrap_err();
        assert!(err.to_string().contains("interpolate.md"));
    }

    #[test]
    fn test_from_dir_loads_both_resources() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("interpolate.md"), "{date} {context} {hint} {style_guide}")
            .unwrap();
        std::fs::write(dir.path().join("style_guide.md"), "文体ガイド").unwrap();
        let g = Generator::from_dir(dir.path(), None, params()).unwrap();
        let prompt = g.render_prompt("2025-09-24", "c", Some("h"));
        assert!(prompt.contains("文体ガイド"));
    }
}
