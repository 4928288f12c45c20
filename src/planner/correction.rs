use crate::config::ExecutionConfig;
use crate::error::StepFault;
use crate::planner::{FailureCategory, PlanStep};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Upper bound on a step's attempt counter, the first attempt included.
    pub max_retries: u32,
    /// Separate cap on retries granted for `timeout-or-resource` failures.
    pub max_resource_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_resource_retries: 2,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            max_resource_retries: config.max_resource_retries,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationReason {
    NonRetryable,
    AttemptsExhausted,
    ResourceRetriesExhausted,
}

impl EscalationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NonRetryable => "non_retryable_failure",
            Self::AttemptsExhausted => "max_attempts_reached",
            Self::ResourceRetriesExhausted => "max_resource_retries_reached",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionDecision {
    Retry,
    Terminal(EscalationReason),
}

/// Classifies step failures and decides whether a bounded retry is allowed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelfCorrectionController {
    policy: RetryPolicy,
}

impl SelfCorrectionController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Precedence: faults with a fixed category, then the executor's hint,
    /// then diagnostic keywords. Unexplained verification misses count as
    /// assertion failures; anything else is `unknown`.
    pub fn classify(
        fault: &StepFault,
        diagnostics: &str,
        hint: Option<FailureCategory>,
    ) -> FailureCategory {
        if let Some(category) = fault.forced_category() {
            return category;
        }
        if let Some(category) = hint {
            return category;
        }

        let text = format!("{fault}\n{diagnostics}").to_ascii_lowercase();
        if let Some(category) = classify_text(&text) {
            return category;
        }

        if matches!(fault, StepFault::Verification(_)) {
            FailureCategory::AssertionFailure
        } else {
            FailureCategory::Unknown
        }
    }

    /// Decision for a step whose latest attempt failed with `category`.
    /// `step.attempts` is the number of attempts already consumed.
    pub fn decide(&self, step: &PlanStep, category: FailureCategory) -> CorrectionDecision {
        if !category.is_retryable() {
            return CorrectionDecision::Terminal(EscalationReason::NonRetryable);
        }
        if step.attempts >= self.policy.max_retries {
            return CorrectionDecision::Terminal(EscalationReason::AttemptsExhausted);
        }
        if category == FailureCategory::TimeoutOrResource
            && step.resource_retries >= self.policy.max_resource_retries
        {
            return CorrectionDecision::Terminal(EscalationReason::ResourceRetriesExhausted);
        }
        CorrectionDecision::Retry
    }
}

const RESOURCE_MARKERS: &[&str] = &[
    "timed out",
    "timeout",
    "deadline exceeded",
    "out of memory",
    "cannot allocate memory",
    "no space left",
    "too many open files",
    "resource temporarily unavailable",
    "rate limit",
    "too many requests",
    "status 429",
    "status: 429",
    "http 429",
    "sigkill",
];

/// Resource markers that only count as whole words.
const RESOURCE_WORDS: &[&str] = &["killed", "oom"];

const SYNTAX_MARKERS: &[&str] = &[
    "syntax error",
    "syntaxerror",
    "parse error",
    "parseerror",
    "unexpected token",
    "unexpected end of",
    "unterminated",
    "unclosed delimiter",
    "expected one of",
    "indentationerror",
    "invalid syntax",
];

const MISSING_DEPENDENCY_MARKERS: &[&str] = &[
    "no such file",
    "command not found",
    "module not found",
    "modulenotfounderror",
    "no module named",
    "cannot find module",
    "unresolved import",
    "could not resolve",
    "package not found",
    "missing dependency",
    "not installed",
    "cannot find crate",
    "importerror",
];

const ASSERTION_MARKERS: &[&str] = &[
    "assertion",
    "assert_eq",
    "assertionerror",
    "test failed",
    "tests failed",
    "expected:",
    "left:",
    "mismatch",
];

fn classify_text(text: &str) -> Option<FailureCategory> {
    let table = [
        (RESOURCE_MARKERS, FailureCategory::TimeoutOrResource),
        (SYNTAX_MARKERS, FailureCategory::Syntax),
        (MISSING_DEPENDENCY_MARKERS, FailureCategory::MissingDependency),
        (ASSERTION_MARKERS, FailureCategory::AssertionFailure),
    ];
    if RESOURCE_WORDS.iter().any(|word| contains_word(text, word)) {
        return Some(FailureCategory::TimeoutOrResource);
    }
    table
        .iter()
        .find(|(markers, _)| markers.iter().any(|marker| text.contains(marker)))
        .map(|(_, category)| *category)
}

fn contains_word(text: &str, word: &str) -> bool {
    text.match_indices(word).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + word.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}
