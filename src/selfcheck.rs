//! Rule-based validation of generated diary passages.
//!
//! [`self_check`] runs five independent predicates over a candidate
//! passage — date presence, banned words, header format, body structure,
//! body length, and punctuation — and aggregates them into a
//! [`SelfCheckReport`]. Each failed predicate contributes a repair
//! instruction to the report's `retry_prompt`.
//!
//! The retry prompt is informational: the generator substitutes its
//! deterministic fallback on failure instead of re-calling the backend,
//! keeping latency and cost bounded.

use serde::Serialize;

/// Casual/slang intensifiers the diary register never uses.
const BANNED_WORDS: [&str; 5] = ["超", "マジ", "ヤバい", "ヤベー", "まじで"];

/// Inclusive bounds for the concatenated body character count.
pub const BODY_LEN_MIN: usize = 200;
pub const BODY_LEN_MAX: usize = 280;

/// One predicate verdict.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    fn new(name: &str, passed: bool, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed,
            detail: detail.into(),
        }
    }
}

/// Aggregate verdict over all predicates.
#[derive(Debug, Clone, Serialize)]
pub struct SelfCheckReport {
    /// Conjunction of all individual check results.
    pub passed: bool,
    pub checks: Vec<CheckResult>,
    /// Repair instructions for a prospective re-generation; present iff
    /// `passed` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_prompt: Option<String>,
}

/// Validate a generated passage against the expected date.
///
/// Checks that need lines to inspect (header, structure, length,
/// punctuation) are skipped when the text has none; header format is only
/// evaluated when an expected date is known.
pub fn self_check(text: &str, expected_date: Option<&str>) -> SelfCheckReport {
    let mut checks: Vec<CheckResult> = Vec::new();
    let mut issues: Vec<String> = Vec::new();

    let expected = expected_date.map(str::trim).filter(|s| !s.is_empty());

    match expected {
        Some(date) => {
            // The date may appear hyphenated or as bare digits.
            let date_digits = date.replace('-', "");
            let text_digits = text.replace('-', "");
            let matched = text.contains(date) || text_digits.contains(&date_digits);
            let detail = if matched {
                "本文に日付が含まれている"
            } else {
                "本文に指定日付が含まれていない"
            };
            checks.push(CheckResult::new("date_presence", matched, detail));
            if !matched {
                issues.push("本文に日付を含める".to_string());
            }
        }
        None => {
            checks.push(CheckResult::new(
                "date_presence",
                true,
                "期待する日付が指定されていないためスキップ",
            ));
        }
    }

    let banned_hits: Vec<&str> = BANNED_WORDS
        .iter()
        .copied()
        .filter(|w| text.contains(w))
        .collect();
    let banned_passed = banned_hits.is_empty();
    let detail = if banned_passed {
        "禁則語なし".to_string()
    } else {
        format!("禁則語 {} を削除", banned_hits.join(", "))
    };
    checks.push(CheckResult::new("banned_words", banned_passed, detail));
    if !banned_passed {
        issues.push("禁則語を除去する".to_string());
    }

    let lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    if !lines.is_empty() {
        if let Some(date) = expected {
            let header = lines[0].trim();
            let expected_header = format!("{} の記録", date);
            let header_ok = header == expected_header;
            let header_detail = if header_ok {
                "見出し行が規定形式".to_string()
            } else {
                format!("見出しを『{}』に合わせる", expected_header)
            };
            checks.push(CheckResult::new("header_format", header_ok, header_detail));
            if !header_ok {
                issues.push("見出し形式を修正する".to_string());
            }
        }

        let body_lines = &lines[1..];
        let blank_line_found = body_lines.iter().any(|l| l.trim().is_empty());
        let non_empty_count = body_lines.iter().filter(|l| !l.trim().is_empty()).count();
        let structure_passed = !blank_line_found && non_empty_count == 3;
        let structure_detail = if structure_passed {
            "本文3段落・空行なし"
        } else {
            "本文の段落数・空行を見直す"
        };
        checks.push(CheckResult::new(
            "structure",
            structure_passed,
            structure_detail,
        ));
        if !structure_passed {
            issues.push("本文構成を整える".to_string());
        }

        if !body_lines.is_empty() {
            let body_text: String = body_lines.concat();
            let body_len = body_text.chars().count();
            let len_passed = (BODY_LEN_MIN..=BODY_LEN_MAX).contains(&body_len);
            let len_detail = if len_passed {
                "本文文字数が規定範囲".to_string()
            } else {
                format!(
                    "本文文字数を{}〜{}字に調整する (現在{}字)",
                    BODY_LEN_MIN, BODY_LEN_MAX, body_len
                )
            };
            checks.push(CheckResult::new("length", len_passed, len_detail));
            if !len_passed {
                issues.push("本文文字数を調整する".to_string());
            }

            let punctuation_ok = !body_text
                .chars()
                .any(|c| matches!(c, '!' | '?' | '！' | '？'));
            let punctuation_detail = if punctuation_ok {
                "禁則記号なし"
            } else {
                "感嘆符・疑問符などを削除"
            };
            checks.push(CheckResult::new(
                "punctuation",
                punctuation_ok,
                punctuation_detail,
            ));
            if !punctuation_ok {
                issues.push("禁則記号を削除する".to_string());
            }
        }
    }

    let passed = issues.is_empty();
    let retry_prompt = if passed {
        None
    } else {
        Some(build_retry_prompt(&issues, expected))
    };

    SelfCheckReport {
        passed,
        checks,
        retry_prompt,
    }
}

fn build_retry_prompt(issues: &[String], expected: Option<&str>) -> String {
    let focus = expected.unwrap_or("日付未指定");
    format!(
        "次の点を修正して再生成: {}。対象日: {}",
        issues.join("、"),
        focus
    )
}
