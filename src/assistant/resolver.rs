//! Reconciles the named assistant on the service with the configured one.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::{Mutex, RwLock};

use crate::assistant::api::{Assistant, AssistantApi, NewAssistant};
use crate::config::AssistantConfig;
use crate::error::AssistantError;
use crate::tools::ToolRegistry;

/// Behavior given to an assistant when it has to be created.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantProfile {
    pub instructions: String,
    /// Enabled tools, in the service's `{"type": ...}` form.
    pub tools: Vec<Value>,
}

impl AssistantProfile {
    /// Profile from the configured instructions, with the code interpreter (if
    /// enabled) plus one function tool per registered capability.
    pub async fn build(config: &AssistantConfig, registry: Option<&ToolRegistry>) -> Self {
        let mut tools = Vec::new();
        if config.code_interpreter {
            tools.push(json!({ "type": "code_interpreter" }));
        }
        if let Some(registry) = registry {
            tools.extend(registry.function_tools().await);
        }
        Self {
            instructions: config.instructions.clone(),
            tools,
        }
    }
}

/// Ensures exactly one assistant with a given name exists with the wanted model.
pub struct AssistantResolver {
    api: Arc<dyn AssistantApi>,
    profile: AssistantProfile,
    resolved: RwLock<Option<Assistant>>,
    /// Serializes resolutions so concurrent callers never both create.
    gate: Mutex<()>,
}

impl AssistantResolver {
    pub fn new(api: Arc<dyn AssistantApi>, profile: AssistantProfile) -> Self {
        Self {
            api,
            profile,
            resolved: RwLock::new(None),
            gate: Mutex::new(()),
        }
    }

    /// Find, align or create the assistant called `name`, and adopt it.
    ///
    /// Always lists remote assistants; repeated calls converge on the same one.
    pub async fn resolve(&self, name: &str, model: &str) -> Result<String, AssistantError> {
        let _guard = self.gate.lock().await;
        tracing::info!(name = %name, model = %model, "Resolving assistant");

        let existing = self
            .api
            .list_assistants()
            .await?
            .into_iter()
            .find(|a| a.name.as_deref() == Some(name));

        let assistant = match existing {
            Some(assistant) if assistant.model == model => assistant,
            Some(assistant) => {
                tracing::info!(
                    assistant_id = %assistant.id,
                    "Updating assistant model from {} to {}",
                    assistant.model,
                    model
                );
                let mut updated = self
                    .api
                    .update_assistant_model(&assistant.id, model)
                    .await?;
                // Keep the local view aligned even if the service echoes a stale model.
                updated.model = model.to_string();
                updated
            }
            None => {
                let request = NewAssistant {
                    name: name.to_string(),
                    model: model.to_string(),
                    instructions: self.profile.instructions.clone(),
                    tools: self.profile.tools.clone(),
                };
                let created = self.api.create_assistant(&request).await?;
                tracing::info!(assistant_id = %created.id, "Created assistant");
                created
            }
        };

        let id = assistant.id.clone();
        *self.resolved.write().await = Some(assistant);
        Ok(id)
    }

    /// Id of the adopted assistant, if resolution ran.
    pub async fn assistant_id(&self) -> Option<String> {
        self.resolved.read().await.as_ref().map(|a| a.id.clone())
    }

    /// The adopted assistant, if resolution ran.
    pub async fn assistant(&self) -> Option<Assistant> {
        self.resolved.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::mock::FakeAssistantApi;
    use crate::tools::builtin::WeatherTool;

    fn profile() -> AssistantProfile {
        AssistantProfile {
            instructions: "Answer with emoji only.".into(),
            tools: vec![json!({"type": "code_interpreter"})],
        }
    }

    #[tokio::test]
    async fn creates_when_missing_and_is_idempotent() {
        let api = Arc::new(FakeAssistantApi::new());
        let resolver = AssistantResolver::new(api.clone(), profile());

        let first = resolver.resolve("bot", "gpt-4o").await.unwrap();
        let second = resolver.resolve("bot", "gpt-4o").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(api.calls("assistants.create"), 1);
        assert_eq!(api.calls("assistants.list"), 2);
        assert_eq!(api.assistants().len(), 1);
        assert_eq!(resolver.assistant_id().await, Some(first));

        let created = &api.assistants()[0];
        assert_eq!(created.instructions.as_deref(), Some("Answer with emoji only."));
        assert_eq!(created.tools, vec![json!({"type": "code_interpreter"})]);
    }

    #[tokio::test]
    async fn adopts_existing_with_matching_model() {
        let api = Arc::new(FakeAssistantApi::new());
        let existing = api.insert_assistant("bot", "gpt-4o");
        let resolver = AssistantResolver::new(api.clone(), profile());

        assert_eq!(resolver.resolve("bot", "gpt-4o").await.unwrap(), existing);
        assert_eq!(api.calls("assistants.create"), 0);
        assert_eq!(api.calls("assistants.update"), 0);
    }

    #[tokio::test]
    async fn aligns_model_of_existing_assistant() {
        let api = Arc::new(FakeAssistantApi::new());
        let existing = api.insert_assistant("bot", "gpt-3.5-turbo");
        api.insert_assistant("other", "gpt-4o");
        let resolver = AssistantResolver::new(api.clone(), profile());

        assert_eq!(resolver.resolve("bot", "gpt-4o").await.unwrap(), existing);
        assert_eq!(api.calls("assistants.update"), 1);
        assert_eq!(resolver.assistant().await.unwrap().model, "gpt-4o");
        let remote = api
            .assistants()
            .into_iter()
            .find(|a| a.id == existing)
            .unwrap();
        assert_eq!(remote.model, "gpt-4o");
    }

    #[tokio::test]
    async fn profile_lists_interpreter_and_function_tools() {
        let registry = ToolRegistry::new();
        registry.register_sync(Arc::new(WeatherTool::new()));

        let profile = AssistantProfile::build(&AssistantConfig::default(), Some(&registry)).await;
        assert_eq!(profile.tools.len(), 2);
        assert_eq!(profile.tools[0]["type"], "code_interpreter");
        assert_eq!(profile.tools[1]["function"]["name"], "get_weather");

        let bare = AssistantConfig {
            code_interpreter: false,
            ..AssistantConfig::default()
        };
        assert!(AssistantProfile::build(&bare, None).await.tools.is_empty());
    }

    #[tokio::test]
    async fn unresolved_has_no_id() {
        let api = Arc::new(FakeAssistantApi::new());
        let resolver = AssistantResolver::new(api, profile());
        assert!(resolver.assistant_id().await.is_none());
    }

    #[tokio::test]
    async fn concurrent_resolutions_create_once() {
        let api = Arc::new(FakeAssistantApi::new());
        let resolver = Arc::new(AssistantResolver::new(api.clone(), profile()));

        let (a, b) = tokio::join!(
            resolver.resolve("bot", "gpt-4o"),
            resolver.resolve("bot", "gpt-4o")
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(api.calls("assistants.create"), 1);
    }
}
