//! Tool shape conversion and streaming tool-name inference.
//!
//! Chat Completions nests the function payload under `function`; Responses
//! keeps `name`/`description`/`parameters` at the top level; Anthropic uses
//! `input_schema`. Tool choice mirrors the same nesting. The
//! [`ToolCatalog`] records the request's tool definitions so a streaming
//! converter can guess the tool name when an upstream starts emitting
//! argument deltas before naming the call.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::protocol::{anthropic, chat, responses};

pub fn chat_tools_to_responses(tools: &[chat::Tool]) -> Vec<responses::Tool> {
    tools
        .iter()
        .map(|tool| responses::Tool {
            r#type: "function".to_string(),
            name: Some(tool.function.name.clone()),
            description: tool.function.description.clone(),
            parameters: Some(tool.function.parameters.clone().unwrap_or_else(empty_object)),
            unknown_fields: Default::default(),
        })
        .collect()
}

pub fn responses_tools_to_chat(tools: &[responses::Tool]) -> Vec<chat::Tool> {
    tools
        .iter()
        .filter(|tool| tool.r#type == "function")
        .map(|tool| chat::Tool {
            r#type: chat::ToolType::Function,
            function: chat::FunctionDef {
                name: tool.name.clone().unwrap_or_default(),
                description: tool.description.clone(),
                parameters: Some(tool.parameters.clone().unwrap_or_else(empty_object)),
            },
        })
        .collect()
}

pub fn chat_tools_to_anthropic(tools: &[chat::Tool]) -> Vec<anthropic::Tool> {
    tools
        .iter()
        .map(|tool| anthropic::Tool {
            name: tool.function.name.clone(),
            description: tool.function.description.clone(),
            input_schema: tool.function.parameters.clone().unwrap_or_else(empty_object),
        })
        .collect()
}

pub fn anthropic_tools_to_chat(tools: &[anthropic::Tool]) -> Vec<chat::Tool> {
    tools
        .iter()
        .map(|tool| chat::Tool {
            r#type: chat::ToolType::Function,
            function: chat::FunctionDef {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: Some(tool.input_schema.clone()),
            },
        })
        .collect()
}

pub fn responses_tools_to_anthropic(tools: &[responses::Tool]) -> Vec<anthropic::Tool> {
    tools
        .iter()
        .filter(|tool| tool.r#type == "function")
        .map(|tool| anthropic::Tool {
            name: tool.name.clone().unwrap_or_default(),
            description: tool.description.clone(),
            input_schema: tool.parameters.clone().unwrap_or_else(empty_object),
        })
        .collect()
}

pub fn anthropic_tools_to_responses(tools: &[anthropic::Tool]) -> Vec<responses::Tool> {
    tools
        .iter()
        .map(|tool| responses::Tool {
            r#type: "function".to_string(),
            name: Some(tool.name.clone()),
            description: tool.description.clone(),
            parameters: Some(tool.input_schema.clone()),
            unknown_fields: Default::default(),
        })
        .collect()
}

pub fn chat_tool_choice_to_responses(choice: &chat::ToolChoice) -> responses::ToolChoice {
    match choice {
        chat::ToolChoice::Mode(mode) => responses::ToolChoice::Mode(mode.clone()),
        chat::ToolChoice::Function { function, .. } => responses::ToolChoice::Function {
            r#type: "function".to_string(),
            name: function.name.clone(),
        },
    }
}

pub fn responses_tool_choice_to_chat(choice: &responses::ToolChoice) -> chat::ToolChoice {
    match choice {
        responses::ToolChoice::Mode(mode) => chat::ToolChoice::Mode(mode.clone()),
        responses::ToolChoice::Function { name, .. } => chat::ToolChoice::Function {
            r#type: chat::ToolType::Function,
            function: chat::FunctionName { name: name.clone() },
        },
    }
}

pub fn chat_tool_choice_to_anthropic(choice: &chat::ToolChoice) -> Option<anthropic::ToolChoice> {
    match choice {
        chat::ToolChoice::Mode(mode) => match mode.as_str() {
            "auto" => Some(anthropic::ToolChoice::Auto),
            "required" => Some(anthropic::ToolChoice::Any),
            "none" => Some(anthropic::ToolChoice::None),
            _ => None,
        },
        chat::ToolChoice::Function { function, .. } => Some(anthropic::ToolChoice::Tool {
            name: function.name.clone(),
        }),
    }
}

pub fn anthropic_tool_choice_to_chat(choice: &anthropic::ToolChoice) -> chat::ToolChoice {
    match choice {
        anthropic::ToolChoice::Auto => chat::ToolChoice::Mode("auto".to_string()),
        anthropic::ToolChoice::Any => chat::ToolChoice::Mode("required".to_string()),
        anthropic::ToolChoice::None => chat::ToolChoice::Mode("none".to_string()),
        anthropic::ToolChoice::Tool { name } => chat::ToolChoice::Function {
            r#type: chat::ToolType::Function,
            function: chat::FunctionName { name: name.clone() },
        },
    }
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

/// Tool definitions captured from the request, used for streaming name
/// inference.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    entries: Vec<CatalogEntry>,
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    name: String,
    param_keys: BTreeSet<String>,
}

impl ToolCatalog {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tool name at the given declaration position.
    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|entry| entry.name.as_str())
    }

    pub fn from_chat(tools: &[chat::Tool]) -> Self {
        let entries = tools
            .iter()
            .map(|tool| CatalogEntry {
                name: tool.function.name.clone(),
                param_keys: schema_property_keys(tool.function.parameters.as_ref()),
            })
            .collect();
        Self { entries }
    }

    pub fn from_responses(tools: &[responses::Tool]) -> Self {
        let entries = tools
            .iter()
            .filter(|tool| tool.r#type == "function")
            .filter_map(|tool| {
                tool.name.clone().map(|name| CatalogEntry {
                    name,
                    param_keys: schema_property_keys(tool.parameters.as_ref()),
                })
            })
            .collect();
        Self { entries }
    }

    pub fn from_anthropic(tools: &[anthropic::Tool]) -> Self {
        let entries = tools
            .iter()
            .map(|tool| CatalogEntry {
                name: tool.name.clone(),
                param_keys: schema_property_keys(Some(&tool.input_schema)),
            })
            .collect();
        Self { entries }
    }

    /// Guess which tool a buffered argument string belongs to.
    ///
    /// The argument keys are matched against each tool's parameter keys: a
    /// unique subset match wins outright; when the subset match is
    /// ambiguous, a unique exact key-set match breaks the tie.
    pub fn guess(&self, arguments: &str) -> Option<&str> {
        if arguments.is_empty() {
            return None;
        }

        let parsed: Value = serde_json::from_str(arguments).ok()?;
        let object = parsed.as_object()?;

        let keys: BTreeSet<String> = object.keys().cloned().collect();
        if keys.is_empty() {
            return None;
        }

        let subset: Vec<&CatalogEntry> = self
            .entries
            .iter()
            .filter(|entry| entry.param_keys.is_empty() || keys.is_subset(&entry.param_keys))
            .collect();

        if let [only] = subset.as_slice() {
            return Some(only.name.as_str());
        }

        let exact: Vec<&CatalogEntry> = self.entries.iter().filter(|entry| entry.param_keys == keys).collect();

        match exact.as_slice() {
            [only] => Some(only.name.as_str()),
            _ => None,
        }
    }
}

fn schema_property_keys(schema: Option<&Value>) -> BTreeSet<String> {
    schema
        .and_then(|schema| schema.get("properties"))
        .and_then(Value::as_object)
        .map(|props| props.keys().cloned().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chat_tool(name: &str, properties: Value) -> chat::Tool {
        chat::Tool {
            r#type: chat::ToolType::Function,
            function: chat::FunctionDef {
                name: name.to_string(),
                description: None,
                parameters: Some(json!({"type": "object", "properties": properties})),
            },
        }
    }

    #[test]
    fn chat_and_responses_tool_shapes_round_trip() {
        let tools = vec![chat_tool("get_weather", json!({"location": {"type": "string"}}))];

        let flat = chat_tools_to_responses(&tools);
        assert_eq!(flat[0].name.as_deref(), Some("get_weather"));
        assert!(flat[0].parameters.is_some());

        let nested = responses_tools_to_chat(&flat);
        assert_eq!(nested[0].function.name, "get_weather");
    }

    #[test]
    fn tool_choice_nesting_mirrors_tools() {
        let choice = chat::ToolChoice::Function {
            r#type: chat::ToolType::Function,
            function: chat::FunctionName {
                name: "get_weather".to_string(),
            },
        };

        let flat = chat_tool_choice_to_responses(&choice);
        let value = serde_json::to_value(&flat).unwrap();
        assert_eq!(value["name"], "get_weather");
        assert!(value.get("function").is_none());

        let nested = responses_tool_choice_to_chat(&flat);
        let value = serde_json::to_value(&nested).unwrap();
        assert_eq!(value["function"]["name"], "get_weather");
    }

    #[test]
    fn unique_subset_match_wins() {
        let catalog = ToolCatalog::from_chat(&[
            chat_tool("get_weather", json!({"location": {}, "unit": {}})),
            chat_tool("get_time", json!({"timezone": {}})),
        ]);

        assert_eq!(catalog.guess(r#"{"location": "SF"}"#), Some("get_weather"));
    }

    #[test]
    fn ambiguous_subset_falls_back_to_exact_match() {
        let catalog = ToolCatalog::from_chat(&[
            chat_tool("broad", json!({"a": {}, "b": {}, "c": {}})),
            chat_tool("narrow", json!({"a": {}, "b": {}})),
        ]);

        // {"a": 1} is a subset of both, no exact match either.
        assert_eq!(catalog.guess(r#"{"a": 1}"#), None);

        // {"a": 1, "b": 2} is a subset of both but exactly matches `narrow`.
        assert_eq!(catalog.guess(r#"{"a": 1, "b": 2}"#), Some("narrow"));
    }

    #[test]
    fn incomplete_json_never_matches() {
        let catalog = ToolCatalog::from_chat(&[chat_tool("get_weather", json!({"location": {}}))]);
        assert_eq!(catalog.guess(r#"{"loc"#), None);
        assert_eq!(catalog.guess(""), None);
    }

    #[test]
    fn anthropic_input_schema_maps_to_parameters() {
        let tools = vec![anthropic::Tool {
            name: "search".to_string(),
            description: Some("Search the web".to_string()),
            input_schema: json!({"type": "object", "properties": {"query": {}}}),
        }];

        let chat_tools = anthropic_tools_to_chat(&tools);
        assert_eq!(chat_tools[0].function.name, "search");

        let catalog = ToolCatalog::from_anthropic(&tools);
        assert_eq!(catalog.guess(r#"{"query": "rust"}"#), Some("search"));
    }
}
