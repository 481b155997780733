//! Decoded event records and their JSON shape.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value as Json};
use thiserror::Error;

use crate::evtx::binxml::{Element, Node};

pub const EVENT_ID_PATH: &[&str] = &["Event", "System", "EventID"];
pub const CHANNEL_PATH: &[&str] = &["Event", "System", "Channel"];
pub const USER_ID_PATH: &[&str] = &["Event", "System", "Security", "UserID"];
pub const SYSTEM_TIME_PATH: &[&str] = &["Event", "System", "TimeCreated", "SystemTime"];

#[derive(Debug, Error, PartialEq)]
pub enum FieldError {
    #[error("field {0} not present")]
    Missing(String),
    #[error("field {path}: {reason}")]
    Invalid { path: String, reason: String },
}

fn joined(path: &[&str]) -> String {
    path.join("/")
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvtxRecord {
    pub record_id: u64,
    /// FILETIME from the record header.
    pub written: u64,
    /// Absolute offset of the chunk the record came from.
    pub chunk_offset: u64,
    pub value: Json,
}

impl EvtxRecord {
    pub fn get_path(&self, path: &[&str]) -> Option<&Json> {
        path.iter()
            .try_fold(&self.value, |node, key| node.as_object()?.get(*key))
    }

    fn path_str(&self, path: &[&str]) -> Result<&str, FieldError> {
        match self.get_path(path) {
            Some(Json::String(s)) => Ok(s.as_str()),
            Some(other) => Err(FieldError::Invalid {
                path: joined(path),
                reason: format!("expected a string, found {other}"),
            }),
            None => Err(FieldError::Missing(joined(path))),
        }
    }

    /// Numeric event identifier. Elements carrying `Qualifiers` keep the id
    /// under `Value`.
    pub fn event_id(&self) -> Result<i64, FieldError> {
        let raw = self
            .get_path(EVENT_ID_PATH)
            .ok_or_else(|| FieldError::Missing(joined(EVENT_ID_PATH)))?;
        let raw = match raw {
            Json::Object(map) => map
                .get("Value")
                .ok_or_else(|| FieldError::Missing(format!("{}/Value", joined(EVENT_ID_PATH))))?,
            other => other,
        };
        let invalid = |reason: String| FieldError::Invalid {
            path: joined(EVENT_ID_PATH),
            reason,
        };
        match raw {
            Json::Number(n) => n
                .as_i64()
                .ok_or_else(|| invalid(format!("{n} is not an integer"))),
            Json::String(s) => s
                .trim()
                .parse()
                .map_err(|_| invalid(format!("{s:?} is not an integer"))),
            other => Err(invalid(format!("unexpected value {other}"))),
        }
    }

    pub fn channel(&self) -> Result<&str, FieldError> {
        self.path_str(CHANNEL_PATH)
    }

    pub fn username(&self) -> Result<&str, FieldError> {
        self.path_str(USER_ID_PATH)
    }

    pub fn timestamp(&self) -> Result<DateTime<Utc>, FieldError> {
        let raw = self.path_str(SYSTEM_TIME_PATH)?;
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|err| FieldError::Invalid {
                path: joined(SYSTEM_TIME_PATH),
                reason: err.to_string(),
            })
    }
}

/// Map decoded root nodes to `{"<root>": ...}`.
pub fn nodes_to_json(nodes: &[Node]) -> Json {
    let mut root = Map::new();
    for node in nodes {
        if let Node::Element(element) = node {
            insert_or_append(&mut root, element.name.clone(), element_to_json(element));
        }
    }
    Json::Object(root)
}

fn element_to_json(element: &Element) -> Json {
    let has_child_elements = element
        .children
        .iter()
        .any(|node| matches!(node, Node::Element(_)));
    let attributes: Vec<_> = element
        .attributes
        .iter()
        .filter(|attr| attr.name != "xmlns" && !attr.name.starts_with("xmlns:"))
        .collect();
    let text = text_of(&element.children);

    if attributes.is_empty() && !has_child_elements {
        return text.unwrap_or(Json::Null);
    }

    let mut map = Map::new();
    for attr in attributes {
        let value = match &attr.value {
            Node::Text(value) => value.to_json(),
            _ => Json::Null,
        };
        insert_or_append(&mut map, attr.name.clone(), value);
    }
    for node in &element.children {
        let Node::Element(child) = node else { continue };
        match data_name(child) {
            Some(name) => {
                let mut unnamed = child.clone();
                unnamed.attributes.retain(|attr| attr.name != "Name");
                insert_or_append(&mut map, name, element_to_json(&unnamed));
            }
            None => insert_or_append(&mut map, child.name.clone(), element_to_json(child)),
        }
    }
    if let Some(text) = text {
        insert_or_append(&mut map, "Value".to_string(), text);
    }
    Json::Object(map)
}

/// `<Data Name="x">` children are keyed by `x`.
fn data_name(element: &Element) -> Option<String> {
    if element.name != "Data" {
        return None;
    }
    element.attributes.iter().find_map(|attr| match &attr.value {
        Node::Text(value) if attr.name == "Name" => Some(value.to_text()),
        _ => None,
    })
}

fn text_of(children: &[Node]) -> Option<Json> {
    let texts: Vec<_> = children
        .iter()
        .filter_map(|node| match node {
            Node::Text(value) => Some(value),
            _ => None,
        })
        .collect();
    match texts.as_slice() {
        [] => None,
        [single] => Some(single.to_json()),
        many => Some(Json::String(
            many.iter().map(|value| value.to_text()).collect(),
        )),
    }
}

fn insert_or_append(map: &mut Map<String, Json>, key: String, value: Json) {
    match map.get_mut(&key) {
        Some(Json::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Json::Array(vec![first, value]);
        }
        None => {
            map.insert(key, value);
        }
    }
}
