//! Data-driven layouts.
//!
//! A [`TemplateLayout`] is a layout described entirely in JSON: a markup
//! template, a stylesheet, a field schema and a mapping from source document
//! paths to layout data. A [`TemplateRegistry`] loads a set of them and turns
//! them into [`LayoutDefinition`]s.
//!
//! Template syntax:
//!
//! - `{{ path }}` inserts the value at `path`, HTML-escaped
//! - `{{#if path}} .. {{else}} .. {{/if}}` renders a branch on truthiness
//! - `{{#each path}} .. {{/each}}` repeats its body per array item; inside,
//!   `this` is the item (`{{ this.name }}`)

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::layout::{LayoutComponent, LayoutDefinition, SourceDocument};
use crate::rendering::StyleRoot;
use crate::resolver::{get_path, set_path, FieldPath};
use crate::schema::FieldSpec;
use crate::{Dimensions, EditorConfig, Error, LayoutData, Result};

/// Where one data key comes from in the source document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Binding {
    /// Dotted document path
    Path(String),
    /// Document path with a fallback value
    WithDefault {
        from: String,
        #[serde(default)]
        default: Value,
    },
}

impl Binding {
    fn resolve(&self, document: &SourceDocument) -> Value {
        match self {
            Binding::Path(path) => document.get(path).unwrap_or(Value::Null),
            Binding::WithDefault { from, default } => match document.get(from) {
                Some(Value::Null) | None => default.clone(),
                Some(value) => value,
            },
        }
    }
}

/// JSON description of one layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateLayout {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub dimensions: Option<Dimensions>,
    pub markup: String,
    #[serde(default)]
    pub stylesheet: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    /// Data path -> document binding. Empty means "copy every document field".
    #[serde(default)]
    pub prepare: BTreeMap<String, Binding>,
}

impl TemplateLayout {
    /// Compile into a layout definition. Template syntax errors surface here.
    pub fn into_definition(self, defaults: Dimensions) -> Result<LayoutDefinition> {
        let nodes = parse(&self.markup).map_err(|e| Error::TemplateError(format!("layout {:?}: {}", self.id, e)))?;
        let component = TemplateComponent {
            nodes: Arc::new(nodes),
            stylesheet: self.stylesheet,
        };
        let bindings = self.prepare;
        let prepare = move |document: &SourceDocument| prepare_data(&bindings, document);
        let dimensions = self.dimensions.unwrap_or(defaults);

        let mut definition = LayoutDefinition::new(self.id, component, prepare)
            .with_fields(self.fields)
            .with_dimensions(dimensions.width, dimensions.height);
        if let Some(title) = self.title {
            definition = definition.with_title(title);
        }
        Ok(definition)
    }
}

fn prepare_data(bindings: &BTreeMap<String, Binding>, document: &SourceDocument) -> LayoutData {
    if bindings.is_empty() {
        return Value::Object(document.fields.clone());
    }
    let mut data = Value::Object(Map::new());
    for (key, binding) in bindings {
        set_path(&mut data, &FieldPath::parse(key), binding.resolve(document));
    }
    data
}

/// A set of template layouts, usually read from a JSON file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateRegistry {
    pub layouts: Vec<TemplateLayout>,
}

impl TemplateRegistry {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Compile every layout. Layouts without dimensions get the configured default.
    pub fn into_definitions(self, config: &EditorConfig) -> Result<Vec<LayoutDefinition>> {
        self.layouts
            .into_iter()
            .map(|layout| layout.into_definition(config.default_dimensions))
            .collect()
    }
}

struct TemplateComponent {
    nodes: Arc<Vec<Node>>,
    stylesheet: String,
}

impl LayoutComponent for TemplateComponent {
    fn render(&self, data: &LayoutData, head: &mut StyleRoot) -> Result<String> {
        head.inject(self.stylesheet.as_str());
        let mut out = String::new();
        render_nodes(&self.nodes, data, None, &mut out);
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Var(String),
    If { path: String, then: Vec<Node>, otherwise: Vec<Node> },
    Each { path: String, body: Vec<Node> },
}

/// Where a nested block stopped
enum Stop {
    End,
    Else,
    Close(String),
}

fn parse(source: &str) -> std::result::Result<Vec<Node>, String> {
    let mut rest = source;
    let (nodes, stop) = parse_block(&mut rest)?;
    match stop {
        Stop::End => Ok(nodes),
        Stop::Else => Err("{{else}} outside of {{#if}}".into()),
        Stop::Close(tag) => Err(format!("unexpected {{{{/{}}}}}", tag)),
    }
}

fn parse_block<'a>(rest: &mut &'a str) -> std::result::Result<(Vec<Node>, Stop), String> {
    let mut nodes = Vec::new();
    loop {
        let source: &'a str = *rest;
        let Some(open) = source.find("{{") else {
            if !source.is_empty() {
                nodes.push(Node::Text(source.to_string()));
            }
            *rest = "";
            return Ok((nodes, Stop::End));
        };
        if open > 0 {
            nodes.push(Node::Text(source[..open].to_string()));
        }
        let after = &source[open + 2..];
        let close = after.find("}}").ok_or("unterminated {{")?;
        let tag = after[..close].trim();
        *rest = &after[close + 2..];

        if let Some(path) = tag.strip_prefix("#if ") {
            let (then, stop) = parse_block(rest)?;
            let otherwise = match stop {
                Stop::Else => {
                    let (otherwise, stop) = parse_block(rest)?;
                    expect_close(stop, "if")?;
                    otherwise
                }
                stop => {
                    expect_close(stop, "if")?;
                    Vec::new()
                }
            };
            nodes.push(Node::If { path: path.trim().to_string(), then, otherwise });
        } else if let Some(path) = tag.strip_prefix("#each ") {
            let (body, stop) = parse_block(rest)?;
            expect_close(stop, "each")?;
            nodes.push(Node::Each { path: path.trim().to_string(), body });
        } else if tag == "else" {
            return Ok((nodes, Stop::Else));
        } else if let Some(name) = tag.strip_prefix('/') {
            return Ok((nodes, Stop::Close(name.trim().to_string())));
        } else if tag.is_empty() || tag.starts_with('#') {
            return Err(format!("bad tag {{{{{}}}}}", tag));
        } else {
            nodes.push(Node::Var(tag.to_string()));
        }
    }
}

fn expect_close(stop: Stop, block: &str) -> std::result::Result<(), String> {
    match stop {
        Stop::Close(name) if name == block => Ok(()),
        Stop::Close(name) => Err(format!("{{{{#{}}}}} closed by {{{{/{}}}}}", block, name)),
        Stop::Else => Err(format!("{{{{else}}}} inside {{{{#{}}}}}", block)),
        Stop::End => Err(format!("unclosed {{{{#{}}}}}", block)),
    }
}

fn lookup<'a>(data: &'a Value, item: Option<&'a Value>, path: &str) -> Option<&'a Value> {
    match (path.split_once('.'), item) {
        (_, Some(item)) if path == "this" => Some(item),
        (Some(("this", rest)), Some(item)) => get_path(item, &FieldPath::parse(rest)),
        _ => get_path(data, &FieldPath::parse(path)),
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Number(n)) => n.as_f64() != Some(0.0),
        Some(Value::Object(_)) => true,
    }
}

fn render_nodes(nodes: &[Node], data: &Value, item: Option<&Value>, out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Var(path) => match lookup(data, item, path) {
                Some(Value::String(s)) => escape_into(s, out),
                Some(Value::Null) | None => {}
                Some(other) => escape_into(&other.to_string(), out),
            },
            Node::If { path, then, otherwise } => {
                let branch = if truthy(lookup(data, item, path)) { then } else { otherwise };
                render_nodes(branch, data, item, out);
            }
            Node::Each { path, body } => {
                if let Some(Value::Array(items)) = lookup(data, item, path) {
                    for entry in items {
                        render_nodes(body, data, Some(entry), out);
                    }
                }
            }
        }
    }
}

fn escape_into(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(markup: &str, data: Value) -> String {
        let nodes = parse(markup).unwrap();
        let mut out = String::new();
        render_nodes(&nodes, &data, None, &mut out);
        out
    }

    #[test]
    fn variables_are_escaped() {
        let out = render("<h1>{{ title }}</h1><p>{{author.name}}</p>", json!({"title": "<b>&</b>", "author": {"name": "O'Neil"}}));
        assert_eq!(out, "<h1>&lt;b&gt;&amp;&lt;/b&gt;</h1><p>O&#39;Neil</p>");
    }

    #[test]
    fn missing_values_render_empty_and_numbers_print() {
        assert_eq!(render("[{{nope}}]", json!({})), "[]");
        assert_eq!(render("{{n}} min", json!({"n": 5})), "5 min");
    }

    #[test]
    fn if_else_and_each() {
        let markup = "{{#if tags}}{{#each tags}}<i>{{this}}</i>{{/each}}{{else}}none{{/if}}";
        assert_eq!(render(markup, json!({"tags": ["a", "b"]})), "<i>a</i><i>b</i>");
        assert_eq!(render(markup, json!({"tags": []})), "none");

        let people = "{{#each people}}{{this.name}};{{/each}}";
        assert_eq!(render(people, json!({"people": [{"name": "x"}, {"name": "y"}]})), "x;y;");
    }

    #[test]
    fn malformed_templates_are_rejected() {
        assert!(parse("{{#if a}}open").is_err());
        assert!(parse("{{#if a}}x{{/each}}").is_err());
        assert!(parse("{{/if}}").is_err());
        assert!(parse("{{title").is_err());
        assert!(parse("{{else}}").is_err());
    }

    #[test]
    fn registry_builds_definitions() {
        let registry = TemplateRegistry::from_json(
            r#"{
                "layouts": [{
                    "id": "card",
                    "title": "Card",
                    "markup": "<h1>{{title}}</h1><p>{{byline}}</p>",
                    "stylesheet": "h1 { font-size: 64px; }",
                    "fields": [{"title": "Title", "name": "title", "type": "string"}],
                    "prepare": {
                        "title": "title",
                        "byline": {"from": "author.name", "default": "Staff"}
                    }
                }, {
                    "id": "square",
                    "dimensions": {"width": 600, "height": 600},
                    "markup": "<div>{{title}}</div>"
                }]
            }"#,
        )
        .unwrap();
        let definitions = registry.into_definitions(&EditorConfig::default()).unwrap();
        assert_eq!(definitions.len(), 2);
        assert_eq!(definitions[0].title, "Card");
        assert_eq!(definitions[0].dimensions, Dimensions::default());
        assert_eq!(definitions[1].dimensions, Dimensions { width: 600, height: 600 });

        let doc = SourceDocument::new("1").with_field("title", json!("Hi"));
        let data = definitions[0].prepare(&doc);
        assert_eq!(data, json!({"title": "Hi", "byline": "Staff"}));

        let mut head = StyleRoot::new();
        let html = definitions[0].component.render(&data, &mut head).unwrap();
        assert_eq!(html, "<h1>Hi</h1><p>Staff</p>");
        assert!(head.sheets()[0].contains("64px"));

        // no bindings: the document's fields are the data
        assert_eq!(definitions[1].prepare(&doc), json!({"title": "Hi"}));
    }

    #[test]
    fn template_errors_name_the_layout() {
        let layout = TemplateLayout {
            id: "broken".into(),
            title: None,
            dimensions: None,
            markup: "{{#each x}}".into(),
            stylesheet: String::new(),
            fields: vec![],
            prepare: BTreeMap::new(),
        };
        let err = layout.into_definition(Dimensions::default()).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }
}
