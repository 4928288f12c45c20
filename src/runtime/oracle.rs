use crate::config::OracleConfig;
use crate::error::OracleError;
use crate::planner::{
    ActionKind, CorrectiveAction, FixRequest, Plan, PlanParser, PlanningContext, ReasoningOracle,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

pub fn build_oracle_client(timeout_secs: u64) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Oracle backed by a planning service speaking plain JSON over HTTP.
///
/// `POST {endpoint}/plan` and `POST {endpoint}/fix` return free text that
/// contains the JSON document described by the schema sent with the request.
pub struct HttpOracle {
    endpoint: String,
    client: Client,
}

#[derive(Serialize)]
struct PlanRequest<'a> {
    goal: &'a str,
    context: &'a PlanningContext,
    schema: &'static str,
}

#[derive(Serialize)]
struct FixRequestBody<'a> {
    request: &'a FixRequest,
    schema: &'static str,
}

impl HttpOracle {
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client: build_oracle_client(timeout_secs),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<String, OracleError> {
        let url = format!("{}/{path}", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| OracleError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(OracleError::Request(format!("{url} returned {status}: {text}")));
        }

        response
            .text()
            .await
            .map_err(|e| OracleError::Request(e.to_string()))
    }
}

fn json_payload(text: &str) -> Result<&str, OracleError> {
    PlanParser::extract_json(text)
        .ok_or_else(|| OracleError::Malformed("response contains no JSON object".into()))
}

#[async_trait]
impl ReasoningOracle for HttpOracle {
    async fn propose_plan(
        &self,
        goal: &str,
        context: &PlanningContext,
    ) -> Result<Plan, OracleError> {
        tracing::info!(goal, endpoint = %self.endpoint, "requesting plan from oracle");
        let body = PlanRequest {
            goal,
            context,
            schema: PlanParser::schema_prompt(),
        };
        let text = self.post("plan", &body).await?;
        PlanParser::parse(json_payload(&text)?).map_err(OracleError::InvalidPlan)
    }

    async fn propose_fix(&self, request: &FixRequest) -> Result<CorrectiveAction, OracleError> {
        tracing::info!(
            step_id = %request.step.id,
            category = %request.failure_category,
            "requesting fix from oracle"
        );
        let body = FixRequestBody {
            request,
            schema: PlanParser::fix_schema_prompt(),
        };
        let text = self.post("fix", &body).await?;
        PlanParser::parse_fix(json_payload(&text)?)
    }
}

/// Used when no planning service is configured: plans must be authored by
/// hand and every fix is "retry unchanged".
pub struct PassthroughOracle;

#[async_trait]
impl ReasoningOracle for PassthroughOracle {
    async fn propose_plan(
        &self,
        _goal: &str,
        _context: &PlanningContext,
    ) -> Result<Plan, OracleError> {
        Err(OracleError::Unsupported(
            "planning without oracle.endpoint configured",
        ))
    }

    async fn propose_fix(&self, request: &FixRequest) -> Result<CorrectiveAction, OracleError> {
        Ok(CorrectiveAction {
            action_kind: ActionKind::Test,
            targets: Vec::new(),
            description: format!("retry {} unchanged", request.step.id),
            rationale: format!("no oracle available for {} failure", request.failure_category),
        })
    }
}

pub fn create_oracle(config: &OracleConfig) -> Arc<dyn ReasoningOracle> {
    match config.endpoint.as_deref().map(str::trim) {
        Some(endpoint) if !endpoint.is_empty() => {
            Arc::new(HttpOracle::new(endpoint, config.timeout_secs))
        }
        _ => Arc::new(PassthroughOracle),
    }
}
