//! Background flows started by client events. Each flow owns one surface,
//! reports progress through `/status` patches and publishes its outcome by
//! replacing `/results`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use a2ui_protocol::{Patch, SessionId};
use a2ui_rpc::{AgentClient, RpcError, ToolClient};
use a2ui_session::SessionRegistry;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::surfaces::{self, StatusUpdate, SurfaceSpec};

/// Remote collaborators shared by every flow.
#[derive(Debug, Clone)]
pub struct Backends {
    pub tools: ToolClient,
    pub toeslagen: AgentClient,
    pub bezwaar: AgentClient,
    pub genui: AgentClient,
    pub tool_timeout: Duration,
    pub agent_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Toeslagen,
    Bezwaar,
    GenuiSearch,
}

impl Flow {
    /// Maps a client event name to the flow it starts.
    pub fn from_event(name: &str) -> Option<Self> {
        match name {
            "toeslagen/check" => Some(Self::Toeslagen),
            "bezwaar/analyse" => Some(Self::Bezwaar),
            "genui/search" => Some(Self::GenuiSearch),
            _ => None,
        }
    }

    fn surface(self) -> &'static SurfaceSpec {
        surfaces::lookup(Some(match self {
            Self::Toeslagen => "toeslagen",
            Self::Bezwaar => "bezwaar",
            Self::GenuiSearch => "genui_search",
        }))
    }
}

#[derive(Debug, Error)]
enum FlowError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    /// The session was disposed mid-flow; nobody is listening any more.
    #[error("session is gone")]
    SessionGone,
}

type FlowResult<T> = Result<T, FlowError>;

#[derive(Debug, Clone)]
pub struct FlowRunner {
    registry: SessionRegistry,
    backends: Arc<Backends>,
}

impl FlowRunner {
    pub fn new(registry: SessionRegistry, backends: Backends) -> Self {
        Self {
            registry,
            backends: Arc::new(backends),
        }
    }

    pub fn spawn(&self, flow: Flow, session_id: SessionId, inputs: Value) -> JoinHandle<()> {
        let runner = self.clone();
        tokio::spawn(async move { runner.run(flow, session_id, inputs).await })
    }

    /// Drive `flow` to completion. Remote failures end the flow and are
    /// reported on its surface.
    #[instrument(skip(self, inputs), fields(session_id = %session_id))]
    pub async fn run(&self, flow: Flow, session_id: SessionId, inputs: Value) {
        let ctx = FlowContext {
            registry: &self.registry,
            backends: &self.backends,
            session_id,
            surface: flow.surface(),
        };
        let outcome = match flow {
            Flow::Toeslagen => ctx.toeslagen(&inputs).await,
            Flow::Bezwaar => ctx.bezwaar(&inputs).await,
            Flow::GenuiSearch => ctx.genui_search(&inputs).await,
        };
        match outcome {
            Ok(()) => info!("flow finished"),
            Err(FlowError::SessionGone) => debug!("flow abandoned, session gone"),
            Err(FlowError::Rpc(error)) => {
                warn!(%error, "flow failed");
                if let Err(report) =
                    ctx.status(StatusUpdate::failed(format!("A2UI: Fout: {error}")))
                {
                    debug!(error = %report, "failure not reported on surface");
                }
            }
        }
    }
}

struct FlowContext<'a> {
    registry: &'a SessionRegistry,
    backends: &'a Backends,
    session_id: SessionId,
    surface: &'static SurfaceSpec,
}

impl FlowContext<'_> {
    async fn toeslagen(&self, inputs: &Value) -> FlowResult<()> {
        self.open("A2UI: Nieuwe check gestart…")?;
        self.status(StatusUpdate::working("A2UI: Regels ophalen (MCP)…", "rules_lookup"))?;

        let rules = self
            .tool(
                "rules_lookup",
                json!({"regeling": inputs["regeling"], "jaar": inputs["jaar"]}),
            )
            .await?;
        let checklist = self
            .tool(
                "doc_checklist",
                json!({"regeling": inputs["regeling"], "situatie": inputs["situatie"]}),
            )
            .await?;
        let risks = self.tool("risk_notes", object_or_empty(inputs)).await?;

        let items = checklist_items(&rules, &checklist, &risks);
        self.results(Value::Array(items.clone()))?;

        self.status(StatusUpdate::working(
            "A2UI: Uitleg in B1-taal (A2A)…",
            "explain_toeslagen",
        ))?;
        let explained = self
            .capability(
                &self.backends.toeslagen,
                "explain_toeslagen",
                json!({"items": items}),
            )
            .await?;
        if let Some(items) = explained.get("items").filter(|items| items.is_array()) {
            self.results(items.clone())?;
        }

        self.status(StatusUpdate::done("A2UI: Klaar."))
    }

    async fn bezwaar(&self, inputs: &Value) -> FlowResult<()> {
        let text = inputs["text"].as_str().unwrap_or_default().to_owned();
        self.open("A2UI: Nieuwe analyse gestart…")?;
        self.status(StatusUpdate::working("A2UI: Brief analyseren (MCP)…", "extract_entities"))?;

        let entities = self.tool("extract_entities", json!({"text": text})).await?;
        let classification = self.tool("classify_case", json!({"text": text})).await?;
        let snippets = self
            .tool("policy_snippets", json!({"type": classification["type"]}))
            .await?;

        self.status(StatusUpdate::working(
            "A2UI: Dossier structureren (A2A)…",
            "structure_bezwaar",
        ))?;
        let structured = self
            .capability(
                &self.backends.bezwaar,
                "structure_bezwaar",
                json!({
                    "raw_text": text,
                    "entities": entities,
                    "classification": classification,
                    "snippets": array_or_empty(&snippets["snippets"]),
                }),
            )
            .await?;
        self.results(json!([structured]))?;

        self.status(StatusUpdate::done("A2UI: Klaar."))
    }

    /// Blank queries are ignored without touching the surface.
    async fn genui_search(&self, inputs: &Value) -> FlowResult<()> {
        let query = inputs["query"].as_str().unwrap_or_default().trim().to_owned();
        if query.is_empty() {
            return Ok(());
        }
        self.open("A2UI: Nieuwe zoekrun gestart…")?;
        self.status(StatusUpdate::working("A2UI: Bronnen ophalen (MCP)…", "bd_search"))?;

        let search = self.tool("bd_search", json!({"query": query, "k": 5})).await?;
        let citations = array_or_empty(&search["items"]);
        self.results(json!([citations_block("Bronnen (MCP)", &citations)]))?;

        self.status(StatusUpdate::working(
            "A2UI: UI-blokken samenstellen (A2A)…",
            "compose_ui",
        ))?;
        let composed = self
            .capability(
                &self.backends.genui,
                "compose_ui",
                json!({"query": query, "citations": citations}),
            )
            .await;
        let (blocks, source) = match composed {
            Ok(data) => match data.get("blocks").filter(|blocks| is_non_empty_array(blocks)) {
                Some(blocks) => (blocks.clone(), "agent"),
                None => (json!([citations_block("Bronnen", &citations)]), "fallback"),
            },
            Err(FlowError::Rpc(error)) => {
                warn!(%error, "compose_ui failed, showing citations only");
                (json!([citations_block("Bronnen", &citations)]), "fallback")
            }
            Err(gone) => return Err(gone),
        };
        self.results(blocks)?;

        self.status(StatusUpdate::done(format!("A2UI: Klaar. (bron: {source})")))
    }

    fn open(&self, message: &str) -> FlowResult<()> {
        self.registry
            .open_surface(
                &self.session_id,
                self.surface.surface_id(),
                self.surface.title,
                surfaces::initial_model(message),
            )
            .map_err(|error| {
                debug!(%error, "surface open dropped");
                FlowError::SessionGone
            })
    }

    fn status(&self, update: StatusUpdate) -> FlowResult<()> {
        self.apply(update.into_patches())
    }

    fn results(&self, results: Value) -> FlowResult<()> {
        self.apply(surfaces::results_patch(results))
    }

    fn apply(&self, patches: Vec<Patch>) -> FlowResult<()> {
        self.registry
            .push_patch_and_apply(&self.session_id, self.surface.surface_id(), patches)
            .map(|_| ())
            .map_err(|error| {
                debug!(%error, "surface update dropped");
                FlowError::SessionGone
            })
    }

    async fn tool(&self, name: &str, arguments: Value) -> FlowResult<Value> {
        let started = Instant::now();
        let outcome = self
            .backends
            .tools
            .call(name, arguments, self.backends.tool_timeout)
            .await;
        self.trace("MCP", name, started, outcome.is_ok())?;
        Ok(outcome?)
    }

    async fn capability(
        &self,
        client: &AgentClient,
        capability: &str,
        payload: Value,
    ) -> FlowResult<Value> {
        let started = Instant::now();
        let outcome = client
            .invoke(capability, payload, self.backends.agent_timeout)
            .await;
        self.trace("A2A", capability, started, outcome.is_ok())?;
        Ok(outcome?)
    }

    /// Surface the latency of every remote call in the status bar.
    fn trace(&self, channel: &str, name: &str, started: Instant, ok: bool) -> FlowResult<()> {
        let ms = started.elapsed().as_millis();
        let message = if ok {
            format!("{channel}: {name} ({ms}ms)")
        } else {
            format!("{channel}: {name} mislukt ({ms}ms)")
        };
        self.status(StatusUpdate::working(message, name))
    }
}

/// Flattens conditions, required documents and attention points into the
/// `{category, text}` items the explainer agent expects.
fn checklist_items(rules: &Value, checklist: &Value, risks: &Value) -> Vec<Value> {
    let conditions = array_or_empty(&rules["voorwaarden"]);
    let documents = array_or_empty(&checklist["documenten"]);
    let notes = array_or_empty(&risks["aandachtspunten"]);

    let text_of = |item: &Value| match item {
        Value::String(text) => text.clone(),
        other => other["text"].as_str().unwrap_or_default().to_owned(),
    };
    let tagged = |category: &'static str, items: Vec<Value>| {
        items
            .into_iter()
            .map(move |item| json!({"category": category, "text": text_of(&item)}))
    };

    tagged("voorwaarde", conditions)
        .chain(tagged("document", documents))
        .chain(tagged("aandachtspunt", notes))
        .collect()
}

fn citations_block(title: &str, citations: &[Value]) -> Value {
    json!({"kind": "citations", "title": title, "items": citations})
}

fn array_or_empty(value: &Value) -> Vec<Value> {
    value.as_array().cloned().unwrap_or_default()
}

fn is_non_empty_array(value: &Value) -> bool {
    value.as_array().is_some_and(|items| !items.is_empty())
}

fn object_or_empty(value: &Value) -> Value {
    if value.is_object() {
        value.clone()
    } else {
        json!({})
    }
}
