//! Code-block extraction and antihack hardening (§4.7).
//!
//! Supplemented from `original_source`'s fenced-code extraction helper
//! (a priority-ordered list of language-tagged fences, first match wins)
//! and its antihack prologue check (`exit(0)` injected at the top of a
//! submission to short-circuit a harness that only checks the process exit
//! code). Written in the teacher's style: plain functions over a small
//! value type, `regex` compiled once via `once_cell::Lazy` rather than
//! rebuilt per call.

use once_cell::sync::Lazy;
use regex::Regex;

/// A single fenced code block found in a model response, tagged with the
/// language hint on its opening fence (if any) and the priority order it
/// was extracted in (lower is earlier/preferred, §4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub language_hint: Option<String>,
    pub code: String,
    pub priority: usize,
}

static FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```([A-Za-z0-9_+-]*)\n(.*?)```").expect("static regex"));

/// Extract every fenced block from `text`, most-preferred first: blocks
/// whose fence language hint matches `preferred_language` sort before
/// unlabeled blocks, which sort before blocks labeled with something else
/// (§4.7 "fenced-block priority extraction").
pub fn extract_code_blocks(text: &str, preferred_language: Option<&str>) -> Vec<CodeBlock> {
    let mut blocks: Vec<CodeBlock> = FENCE_RE
        .captures_iter(text)
        .map(|caps| {
            let hint = caps.get(1).map(|m| m.as_str().to_string()).filter(|s| !s.is_empty());
            let code = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
            CodeBlock { language_hint: hint, code, priority: 0 }
        })
        .collect();

    blocks.sort_by_key(|b| match (&b.language_hint, preferred_language) {
        (Some(hint), Some(pref)) if hint.eq_ignore_ascii_case(pref) => 0,
        (None, _) => 1,
        _ => 2,
    });
    for (i, block) in blocks.iter_mut().enumerate() {
        block.priority = i;
    }
    blocks
}

/// Pick the single best block to submit, per `extract_code_blocks`'
/// priority order. Falls back to the raw text itself (trimmed) when no
/// fence is present, matching `original_source`'s "assume the whole
/// response is code" fallback for plain-text completions.
pub fn submit_code_blocks(text: &str, preferred_language: Option<&str>) -> String {
    let blocks = extract_code_blocks(text, preferred_language);
    blocks.into_iter().next().map(|b| b.code).unwrap_or_else(|| text.trim().to_string())
}

static EXIT_ZERO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(exit\s*\(\s*0\s*\)|os\._exit\s*\(\s*0\s*\)|sys\.exit\s*\(\s*0\s*\)|Environment\.Exit\s*\(\s*0\s*\)|System\.exit\s*\(\s*0\s*\))")
        .expect("static regex")
});

/// Reject submissions that open with a call that forces a zero exit code
/// before the real logic runs — a harness that only inspects `return_code`
/// would otherwise always see success (§4.7 antihack).
pub fn contains_exit_zero_prologue(code: &str) -> bool {
    let prologue: String = code.lines().take(3).collect::<Vec<_>>().join("\n");
    EXIT_ZERO_RE.is_match(&prologue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_single_fenced_block() {
        let text = "here:\n```python\nprint(1)\n```\ndone";
        let blocks = extract_code_blocks(text, Some("python"));
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].code.trim(), "print(1)");
    }

    #[test]
    fn preferred_language_block_sorts_first() {
        let text = "```bash\necho hi\n```\n```python\nprint(1)\n```";
        let blocks = extract_code_blocks(text, Some("python"));
        assert_eq!(blocks[0].language_hint.as_deref(), Some("python"));
    }

    #[test]
    fn submit_falls_back_to_raw_text_without_fences() {
        let text = "print(1)";
        assert_eq!(submit_code_blocks(text, Some("python")), "print(1)");
    }

    #[test]
    fn detects_exit_zero_prologue() {
        assert!(contains_exit_zero_prologue("exit(0)\nprint('hacked')"));
        assert!(contains_exit_zero_prologue("import sys\nsys.exit(0)\n"));
    }

    #[test]
    fn does_not_flag_exit_zero_deep_in_submission() {
        let code = "def f():\n    pass\n\ndef g():\n    pass\n\ndef h():\n    exit(0)\n";
        assert!(!contains_exit_zero_prologue(code));
    }
}
