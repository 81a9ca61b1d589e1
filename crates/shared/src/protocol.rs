//! Declarative surfaces and well-known bus topics.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const MAP_CONTROLLERS_TOPIC: &str = "/controller/mapControllers";
pub const ADD_OBSERVERS_TOPIC: &str = "/controller/addObservers";
pub const MODEL_TOPIC_PREFIX: &str = "/model/";

pub fn controller_observers_topic(controller_name: &str) -> String {
    format!("/controller/{controller_name}/addObservers")
}

pub fn model_topic(key: &str) -> String {
    format!("{MODEL_TOPIC_PREFIX}{key}")
}

/// Site map as written in configuration files.
///
/// ```json
/// [
///   {"pattern": "#menu-navigation",
///    "controllers": [{"controller": "sample.MenuController", "params": {"selected": 0}}]},
///   {"pattern": {"location": "home\\.htm"},
///    "controllers": [{"controller": "sample.HomeController"}]}
/// ]
/// ```
pub type SiteMapDocument = Vec<SiteMapEntryConfig>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteMapEntryConfig {
    pub pattern: PatternConfig,
    pub controllers: Vec<ControllerBinding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatternConfig {
    Selector(String),
    Location { location: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerBinding {
    pub controller: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
}

impl ControllerBinding {
    pub fn new(controller: impl Into<String>) -> Self {
        Self {
            controller: controller.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = Some(params);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SiteMapFile {
    #[serde(rename = "site")]
    entries: SiteMapDocument,
}

/// Parses a site map from JSON (a top-level array) or TOML (`[[site]]` tables).
pub fn parse_site_map(raw: &str) -> Result<SiteMapDocument, String> {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('[') && !trimmed.starts_with("[[") {
        return serde_json::from_str(raw).map_err(|err| format!("invalid JSON site map: {err}"));
    }
    toml_site_map(raw)
}

fn toml_site_map(raw: &str) -> Result<SiteMapDocument, String> {
    let file: SiteMapFile =
        toml::from_str(raw).map_err(|err| format!("invalid TOML site map: {err}"))?;
    Ok(file.entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_follow_naming_scheme() {
        assert_eq!(model_topic("profile"), "/model/profile");
        assert_eq!(
            controller_observers_topic("sample.MenuController"),
            "/controller/sample.MenuController/addObservers"
        );
    }

    #[test]
    fn json_site_map_accepts_selector_and_location_patterns() {
        let raw = r##"[
            {"pattern": "#menu", "controllers": [{"controller": "Menu", "params": {"selected": 0}}]},
            {"pattern": {"location": "home\\.htm$"}, "controllers": [{"controller": "Home"}]}
        ]"##;
        let doc = parse_site_map(raw).expect("site map");
        assert_eq!(doc.len(), 2);
        assert_eq!(doc[0].pattern, PatternConfig::Selector("#menu".into()));
        assert_eq!(
            doc[1].pattern,
            PatternConfig::Location {
                location: "home\\.htm$".into()
            }
        );
        assert!(doc[1].controllers[0].params.is_none());
    }

    #[test]
    fn toml_site_map_uses_site_tables() {
        let raw = r##"
[[site]]
pattern = "#hello"
controllers = [{ controller = "helloworld.HelloController", params = { greeting = "hi" } }]

[[site]]
pattern = { location = "index" }
controllers = [{ controller = "helloworld.PageController" }]
"##;
        let doc = parse_site_map(raw).expect("site map");
        assert_eq!(doc.len(), 2);
        let params = doc[0].controllers[0].params.as_ref().expect("params");
        assert_eq!(params["greeting"], Value::String("hi".into()));
    }
}
