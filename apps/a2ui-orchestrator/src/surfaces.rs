//! The fixed set of surfaces the UI knows how to render, and the patches the
//! flows use to drive their status block.

use a2ui_protocol::{Patch, SurfaceId};
use chrono::Local;
use serde_json::{Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceSpec {
    pub id: &'static str,
    pub title: &'static str,
    /// Status message shown on a freshly opened surface.
    pub prompt: &'static str,
}

pub static CATALOG: [SurfaceSpec; 4] = [
    SurfaceSpec {
        id: "home",
        title: "Belastingdienst Assistants",
        prompt: "A2UI: Kies een assistent om te starten.",
    },
    SurfaceSpec {
        id: "toeslagen",
        title: "Toeslagen Check",
        prompt: "A2UI: Vul de gegevens in en klik op Check.",
    },
    SurfaceSpec {
        id: "bezwaar",
        title: "Bezwaar Assistent",
        prompt: "A2UI: Plak een bezwaarbrief en klik op Analyseer.",
    },
    SurfaceSpec {
        id: "genui_search",
        title: "Generatieve UI — Zoeken",
        prompt: "A2UI: Stel een vraag en klik op Zoek.",
    },
];

pub fn home() -> &'static SurfaceSpec {
    &CATALOG[0]
}

/// Unknown or missing ids resolve to the home surface.
pub fn lookup(id: Option<&str>) -> &'static SurfaceSpec {
    id.and_then(|id| CATALOG.iter().find(|spec| spec.id == id))
        .unwrap_or_else(home)
}

impl SurfaceSpec {
    pub fn surface_id(&self) -> SurfaceId {
        SurfaceId::from(self.id)
    }

    pub fn initial_model(&self) -> Value {
        initial_model(self.prompt)
    }
}

pub fn initial_model(message: &str) -> Value {
    json!({
        "status": {
            "loading": false,
            "message": message,
            "step": "idle",
            "lastRefresh": timestamp(),
        },
        "results": [],
    })
}

/// Local wall-clock time at second precision, as rendered in the status bar.
pub fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Partial update of a surface's `/status` block. Every update refreshes
/// `lastRefresh`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusUpdate {
    pub loading: Option<bool>,
    pub message: Option<String>,
    pub step: Option<String>,
}

impl StatusUpdate {
    pub fn working(message: impl Into<String>, step: impl Into<String>) -> Self {
        Self {
            loading: Some(true),
            message: Some(message.into()),
            step: Some(step.into()),
        }
    }

    pub fn done(message: impl Into<String>) -> Self {
        Self {
            loading: Some(false),
            message: Some(message.into()),
            step: Some("done".to_owned()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            loading: Some(false),
            message: Some(message.into()),
            step: Some("error".to_owned()),
        }
    }

    pub fn into_patches(self) -> Vec<Patch> {
        let mut patches = Vec::with_capacity(4);
        if let Some(loading) = self.loading {
            patches.push(Patch::replace("/status/loading", loading));
        }
        if let Some(message) = self.message {
            patches.push(Patch::replace("/status/message", message));
        }
        if let Some(step) = self.step {
            patches.push(Patch::replace("/status/step", step));
        }
        patches.push(Patch::replace("/status/lastRefresh", timestamp()));
        patches
    }
}

pub fn results_patch(results: Value) -> Vec<Patch> {
    vec![Patch::replace("/results", results)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use a2ui_protocol::apply_patches;

    #[test]
    fn lookup_falls_back_to_home() {
        assert_eq!(lookup(Some("bezwaar")).title, "Bezwaar Assistent");
        assert_eq!(lookup(Some("genui_search")).id, "genui_search");
        assert_eq!(lookup(Some("nope")).id, "home");
        assert_eq!(lookup(None).id, "home");
    }

    #[test]
    fn initial_model_is_idle_with_no_results() {
        let model = lookup(Some("toeslagen")).initial_model();
        assert_eq!(model["status"]["loading"], false);
        assert_eq!(model["status"]["step"], "idle");
        assert_eq!(
            model["status"]["message"],
            "A2UI: Vul de gegevens in en klik op Check."
        );
        assert_eq!(model["results"], json!([]));
    }

    #[test]
    fn status_update_only_touches_given_fields() {
        let patches = StatusUpdate {
            message: Some("MCP: bd_search (12ms)".to_owned()),
            ..StatusUpdate::default()
        }
        .into_patches();
        let paths: Vec<&str> = patches.iter().map(|patch| patch.path.as_str()).collect();
        assert_eq!(paths, ["/status/message", "/status/lastRefresh"]);
    }

    #[test]
    fn status_patches_apply_to_an_initial_model() {
        let mut model = initial_model("start");
        let report = apply_patches(&mut model, &StatusUpdate::failed("Fout").into_patches());
        assert!(report.is_clean());
        assert_eq!(model["status"]["loading"], false);
        assert_eq!(model["status"]["step"], "error");
        assert_eq!(model["status"]["message"], "Fout");
    }
}
