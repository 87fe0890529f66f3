//! Weather lookup against a fixed table of locations.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::tools::tool::{Tool, ToolContext, ToolError, require_str};

/// Current-weather tool backed by a static table, for exercising tool calls end to end.
#[derive(Debug, Default)]
pub struct WeatherTool;

impl WeatherTool {
    pub fn new() -> Self {
        Self
    }
}

fn lookup(location: &str) -> Option<Value> {
    match location.trim().to_lowercase().as_str() {
        "jakarta" => Some(json!({
            "temperature": "30C",
            "condition": "Sunny",
            "wind_speed": "5 km/h"
        })),
        "bandung" => Some(json!({
            "temperature": "25C",
            "condition": "Cloudy",
            "wind_speed": "7 km/h"
        })),
        _ => None,
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn source_name(&self) -> &str {
        "HardcodedWeather"
    }

    fn description(&self) -> &str {
        "Get the current weather information"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "Location for which to get the weather"
                }
            },
            "required": ["location"]
        })
    }

    async fn invoke(&self, params: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let location = require_str(&params, "location")?;
        Ok(lookup(location).unwrap_or_else(|| json!({ "error": "Location not supported" })))
    }
}
