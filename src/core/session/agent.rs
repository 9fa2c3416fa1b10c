//! Agent definitions, handoff routing and tool execution.
//!
//! Every agent a session may switch to is declared up front. Handoffs are
//! exposed to the model as `transfer_to_<agent>` function tools; the mapping
//! from tool name back to the target agent is an explicit [`HandoffTable`]
//! built from the declarations, so no agent name is ever parsed out of a
//! tool name.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::core::realtime::openai::messages::ToolDef;

/// Name of the agent used when nothing else is configured.
pub const DEFAULT_AGENT_NAME: &str = "kiwiChatAgent";

/// Voice of the default agent.
pub const DEFAULT_AGENT_VOICE: &str = "sage";

const DEFAULT_AGENT_INSTRUCTIONS: &str = "You are a friendly New Zealand voice assistant. \
Speak with a natural Kiwi accent, keep replies short and conversational, \
and use light Kiwi phrasing such as \"Kia ora\" and \"Sweet as\" where it fits.";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("No agents configured")]
    Empty,

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Agent `{agent}` hands off to unknown agent `{target}`")]
    UnknownHandoffTarget { agent: String, target: String },
}

pub type AgentResult<T> = Result<T, AgentError>;

/// Declaration of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default)]
    pub instructions: String,
    /// Short description shown to other agents in their handoff tool
    #[serde(default)]
    pub handoff_description: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolDef>,
    /// Names of the agents this agent may hand the conversation to
    #[serde(default)]
    pub handoffs: Vec<String>,
}

fn default_voice() -> String {
    DEFAULT_AGENT_VOICE.to_string()
}

impl AgentConfig {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            voice: default_voice(),
            instructions: instructions.into(),
            handoff_description: None,
            tools: Vec::new(),
            handoffs: Vec::new(),
        }
    }

    /// The built-in Kiwi chat agent.
    pub fn kiwi_chat() -> Self {
        Self::new(DEFAULT_AGENT_NAME, DEFAULT_AGENT_INSTRUCTIONS)
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn with_tool(mut self, tool: ToolDef) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_handoff(mut self, target: impl Into<String>) -> Self {
        self.handoffs.push(target.into());
        self
    }
}

/// Function tool name used to hand off to `target`.
pub fn handoff_tool_name(target: &str) -> String {
    format!("transfer_to_{target}")
}

/// Lookup from handoff tool name to target agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandoffTable(HashMap<String, String>);

impl HandoffTable {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn target_for(&self, tool_name: &str) -> Option<&str> {
        self.0.get(tool_name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The agents available to a session, one of which is the root.
#[derive(Debug, Clone)]
pub struct AgentSet {
    root: String,
    agents: HashMap<String, AgentConfig>,
}

impl AgentSet {
    /// Build a set whose root is the first agent in `agents`.
    pub fn new(agents: Vec<AgentConfig>) -> AgentResult<Self> {
        let root = agents.first().ok_or(AgentError::Empty)?.name.clone();
        let agents: HashMap<_, _> = agents.into_iter().map(|a| (a.name.clone(), a)).collect();

        for agent in agents.values() {
            if let Some(target) = agent.handoffs.iter().find(|t| !agents.contains_key(*t)) {
                return Err(AgentError::UnknownHandoffTarget {
                    agent: agent.name.clone(),
                    target: target.clone(),
                });
            }
        }

        Ok(Self { root, agents })
    }

    pub fn root(&self) -> &AgentConfig {
        &self.agents[&self.root]
    }

    pub fn get(&self, name: &str) -> AgentResult<&AgentConfig> {
        self.agents
            .get(name)
            .ok_or_else(|| AgentError::UnknownAgent(name.to_string()))
    }

    /// Handoff tools of every agent, keyed by tool name.
    pub fn handoff_table(&self) -> HandoffTable {
        HandoffTable::from_pairs(self.agents.values().flat_map(|agent| {
            agent
                .handoffs
                .iter()
                .map(|target| (handoff_tool_name(target), target.clone()))
        }))
    }

    /// Tools advertised to the model while `agent` is active.
    pub fn tools_for(&self, agent: &AgentConfig) -> Vec<ToolDef> {
        let mut tools = agent.tools.clone();
        for target in &agent.handoffs {
            let description = self
                .agents
                .get(target)
                .and_then(|a| a.handoff_description.clone())
                .unwrap_or_else(|| format!("Hand the conversation to {target}."));
            tools.push(ToolDef::function(
                handoff_tool_name(target),
                description,
                json!({"type": "object", "properties": {}, "additionalProperties": false}),
            ));
        }
        tools
    }
}

impl Default for AgentSet {
    fn default() -> Self {
        let agent = AgentConfig::kiwi_chat();
        Self {
            root: agent.name.clone(),
            agents: HashMap::from([(agent.name.clone(), agent)]),
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool failed: {0}")]
    Failed(String),
}

/// Executes function tools requested by the model.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, name: &str, arguments: Value) -> Result<Value, ToolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agents() -> AgentSet {
        AgentSet::new(vec![
            AgentConfig::kiwi_chat().with_handoff("meterHelper"),
            AgentConfig::new("meterHelper", "Help find the meter.").with_tool(ToolDef::function(
                "lookup_meter",
                "Find a meter by address",
                json!({"type": "object"}),
            )),
        ])
        .unwrap()
    }

    #[test]
    fn test_root_is_first_agent() {
        assert_eq!(agents().root().name, DEFAULT_AGENT_NAME);
        assert_eq!(agents().root().voice, "sage");
    }

    #[test]
    fn test_handoff_table() {
        let table = agents().handoff_table();
        assert_eq!(table.len(), 1);
        assert_eq!(table.target_for("transfer_to_meterHelper"), Some("meterHelper"));
        assert_eq!(table.target_for("lookup_meter"), None);
    }

    #[test]
    fn test_tools_include_handoffs() {
        let set = agents();
        let names: Vec<_> = set
            .tools_for(set.root())
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, ["transfer_to_meterHelper"]);

        let helper = set.get("meterHelper").unwrap();
        assert_eq!(set.tools_for(helper)[0].name, "lookup_meter");
    }

    #[test]
    fn test_invalid_sets() {
        assert_eq!(AgentSet::new(vec![]).unwrap_err(), AgentError::Empty);
        let err = AgentSet::new(vec![AgentConfig::kiwi_chat().with_handoff("ghost")]).unwrap_err();
        assert!(matches!(err, AgentError::UnknownHandoffTarget { .. }));
        assert!(agents().get("ghost").is_err());
    }

    #[test]
    fn test_agent_config_from_yaml() {
        let agent: AgentConfig = serde_yaml::from_str(
            "name: helper\ninstructions: Be helpful\nhandoffs: [kiwiChatAgent]\n",
        )
        .unwrap();
        assert_eq!(agent.voice, "sage");
        assert_eq!(agent.handoffs, ["kiwiChatAgent"]);
    }
}
