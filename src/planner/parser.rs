use crate::error::{OracleError, PlanValidationError};
use crate::planner::{
    ActionKind, CorrectiveAction, Plan, PlanStatus, PlanStep, StepStatus, VerificationCriterion,
};
use serde::Deserialize;
use uuid::Uuid;

pub struct PlanParser;

#[derive(Deserialize)]
struct RawPlan {
    #[serde(default)]
    id: Option<String>,
    goal: String,
    #[serde(default)]
    version: Option<u64>,
    steps: Vec<RawStep>,
}

#[derive(Deserialize)]
struct RawStep {
    id: String,
    action_kind: ActionKind,
    #[serde(default)]
    targets: Vec<String>,
    description: String,
    #[serde(default)]
    verification_criteria: Vec<VerificationCriterion>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    skip_tolerant: bool,
}

impl PlanParser {
    pub fn schema_prompt() -> &'static str {
        concat!(
            "When creating a plan, respond with a JSON object in this exact format:\n",
            "{\n",
            "  \"id\": \"<unique-id>\",\n",
            "  \"goal\": \"<goal being achieved>\",\n",
            "  \"steps\": [\n",
            "    {\n",
            "      \"id\": \"<step-id>\",\n",
            "      \"action_kind\": \"edit\" | \"create\" | \"delete\" | \"run\" | \"test\",\n",
            "      \"targets\": [\"<file path or command>\"],\n",
            "      \"description\": \"<what this step does>\",\n",
            "      \"verification_criteria\": [\"<predicate>\"],\n",
            "      \"depends_on\": [\"<step-ids this depends on>\"]\n",
            "    }\n",
            "  ]\n",
            "}\n\n",
            "Steps with no dependencies use \"depends_on\": [].\n",
            "Wrap the JSON in a ```json code fence.",
        )
    }

    pub fn fix_schema_prompt() -> &'static str {
        concat!(
            "Respond with a single JSON object describing the corrective action:\n",
            "{\n",
            "  \"action_kind\": \"edit\" | \"create\" | \"delete\" | \"run\" | \"test\",\n",
            "  \"targets\": [\"<file path or command>\"],\n",
            "  \"description\": \"<what the fix does>\",\n",
            "  \"rationale\": \"<why it addresses the failure>\"\n",
            "}",
        )
    }

    /// Parses an authored plan (from a file or the oracle) into a validated,
    /// fresh `Plan`. Run state in the input is ignored.
    pub fn parse(json_str: &str) -> Result<Plan, PlanValidationError> {
        let raw: RawPlan = serde_json::from_str(json_str)
            .map_err(|error| PlanValidationError::Malformed(format!("invalid plan JSON: {error}")))?;

        if raw.steps.is_empty() {
            return Err(PlanValidationError::Malformed(
                "plan must have at least one step".into(),
            ));
        }

        let steps = raw
            .steps
            .into_iter()
            .map(|rs| PlanStep {
                verification_criteria: rs.verification_criteria,
                targets: rs.targets,
                depends_on: rs.depends_on,
                skip_tolerant: rs.skip_tolerant,
                ..PlanStep::new(rs.id, rs.action_kind, rs.description)
            })
            .collect::<Vec<_>>();

        let id = raw
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut plan = Plan::new(id, raw.goal, steps)?;
        if let Some(version) = raw.version {
            plan.version = version.max(Plan::INITIAL_VERSION);
        }
        debug_assert!(plan.status == PlanStatus::Draft);
        debug_assert!(plan.steps.iter().all(|s| s.status == StepStatus::Pending));
        Ok(plan)
    }

    /// Parses and validates a corrective action returned by the oracle.
    pub fn parse_fix(json_str: &str) -> Result<CorrectiveAction, OracleError> {
        let fix: CorrectiveAction = serde_json::from_str(json_str)
            .map_err(|error| OracleError::Malformed(format!("invalid fix JSON: {error}")))?;
        fix.validate()?;
        Ok(fix)
    }

    pub fn extract_json(text: &str) -> Option<&str> {
        if let Some(start) = text.find("```json") {
            let json_start = start + "```json".len();
            let rest = &text[json_start..];
            if let Some(end) = rest.find("```") {
                let candidate = rest[..end].trim();
                if !candidate.is_empty() {
                    return Some(candidate);
                }
            }
        }

        if let Some(start) = text.find("```\n{") {
            let json_start = start + "```\n".len();
            let rest = &text[json_start..];
            if let Some(end) = rest.find("```") {
                let candidate = rest[..end].trim();
                if !candidate.is_empty() {
                    return Some(candidate);
                }
            }
        }

        let open = text.find('{')?;
        let close = text.rfind('}')?;
        if close > open {
            return Some(&text[open..=close]);
        }

        None
    }
}
