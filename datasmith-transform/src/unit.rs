// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Discriminated transform units and their resolution from a request.

use crate::agent::{AgentEndpoint, AgentTransformer};
use crate::error::TransformError;
use crate::script::{script_name, ScriptRegistry, ScriptTransformer};
use crate::transformer::{Item, Transformer};
use datasmith_core::{ItemFormat, Operation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A resolved transform unit
pub enum TransformUnit {
    Script(ScriptTransformer),
    Agent(AgentTransformer),
}

impl Transformer for TransformUnit {
    fn name(&self) -> &str {
        match self {
            TransformUnit::Script(s) => s.name(),
            TransformUnit::Agent(a) => a.name(),
        }
    }

    fn apply(&self, item: &Item) -> Result<Vec<Item>, TransformError> {
        match self {
            TransformUnit::Script(s) => s.apply(item),
            TransformUnit::Agent(a) => a.apply(item),
        }
    }
}

/// Serializable description of which unit a job uses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransformUnitSpec {
    /// A registered script by name
    Script { name: String },
    /// The script named `<format>_<operation>` for each file's format
    ScriptByFormat,
    /// A remote agent
    Agent { agent_id: String },
}

/// Turns a [`TransformUnitSpec`] into a runnable [`TransformUnit`]
#[derive(Clone)]
pub struct UnitResolver {
    scripts: Arc<ScriptRegistry>,
    agents: Option<AgentEndpoint>,
}

impl UnitResolver {
    pub fn new(scripts: Arc<ScriptRegistry>, agents: Option<AgentEndpoint>) -> Self {
        Self { scripts, agents }
    }

    pub fn scripts(&self) -> &Arc<ScriptRegistry> {
        &self.scripts
    }

    /// Resolve for one file. `format` is only consulted for `ScriptByFormat`.
    pub fn resolve(
        &self,
        spec: &TransformUnitSpec,
        operation: Operation,
        format: Option<ItemFormat>,
    ) -> Result<TransformUnit, TransformError> {
        match spec {
            TransformUnitSpec::Script { name } => self.scripts.get(name).map(TransformUnit::Script),
            TransformUnitSpec::ScriptByFormat => {
                let format = format.ok_or_else(|| {
                    TransformError::UnknownScript(format!("<unknown format>_{}", operation))
                })?;
                let name = script_name(format.script_prefix(), operation.as_str());
                self.scripts.get(&name).map(TransformUnit::Script)
            }
            TransformUnitSpec::Agent { agent_id } => {
                let endpoint = self
                    .agents
                    .clone()
                    .ok_or_else(|| TransformError::NotConfigured("agent.base_url".into()))?;
                AgentTransformer::new(agent_id.clone(), endpoint).map(TransformUnit::Agent)
            }
        }
    }

    /// Fail fast on specs that can never resolve (unknown script, no agent endpoint)
    pub fn check(&self, spec: &TransformUnitSpec) -> Result<(), TransformError> {
        match spec {
            TransformUnitSpec::Script { name } if !self.scripts.contains(name) => {
                Err(TransformError::UnknownScript(name.clone()))
            }
            TransformUnitSpec::Agent { .. } if self.agents.is_none() => {
                Err(TransformError::NotConfigured("agent.base_url".into()))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn resolver(with_agent: bool) -> UnitResolver {
        let agents = with_agent.then(|| AgentEndpoint {
            base_url: "http://127.0.0.1:9".into(),
            api_key: None,
            timeout: Duration::from_secs(1),
        });
        UnitResolver::new(Arc::new(ScriptRegistry::with_builtins()), agents)
    }

    #[test]
    fn test_resolve_by_format_convention() {
        let r = resolver(false);
        let unit = r
            .resolve(&TransformUnitSpec::ScriptByFormat, Operation::Clean, Some(ItemFormat::Text))
            .unwrap();
        assert_eq!(unit.name(), "text_clean");
        assert_eq!(unit.apply(&json!(" a ")).unwrap(), vec![json!("a")]);

        let missing = r.resolve(&TransformUnitSpec::ScriptByFormat, Operation::Annotate, Some(ItemFormat::Json));
        assert!(matches!(missing, Err(TransformError::UnknownScript(n)) if n == "json_annotate"));
    }

    #[test]
    fn test_agent_requires_endpoint() {
        let spec = TransformUnitSpec::Agent { agent_id: "a1".into() };
        assert!(resolver(false).check(&spec).is_err());
        assert!(resolver(true).check(&spec).is_ok());
        let unit = resolver(true).resolve(&spec, Operation::AgentProcess, None).unwrap();
        assert_eq!(unit.name(), "a1");
    }

    #[test]
    fn test_spec_serde() {
        let spec: TransformUnitSpec =
            serde_json::from_value(json!({"type": "script", "name": "json_clean"})).unwrap();
        assert_eq!(spec, TransformUnitSpec::Script { name: "json_clean".into() });
    }
}
