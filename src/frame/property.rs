//! Entity and attribute tables for property lookups.

use crate::prtg::TableRow;
use regex::Regex;
use std::sync::OnceLock;

/// Object kind a property query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Group,
    Device,
    Sensor,
}

impl Entity {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "group" => Some(Entity::Group),
            "device" => Some(Entity::Device),
            "sensor" => Some(Entity::Sensor),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Group => "group",
            Entity::Device => "device",
            Entity::Sensor => "sensor",
        }
    }

    /// Name of the row column matched against the requested entity name.
    pub fn name_of<'a>(&self, row: &'a TableRow) -> &'a str {
        match self {
            Entity::Group => &row.group,
            Entity::Device => &row.device,
            Entity::Sensor => &row.sensor,
        }
    }
}

/// One attribute reading.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Number(f64),
    Text(String),
}

pub type Accessor = fn(&TableRow) -> PropertyValue;

/// Attribute name to accessor. `_raw` entries read the unformatted column.
const ATTRIBUTES: &[(&str, Accessor)] = &[
    ("active", |row| PropertyValue::Text(row.active.to_string())),
    ("active_raw", |row| PropertyValue::Number(row.active_raw as f64)),
    ("message", |row| PropertyValue::Text(clean_message_html(&row.message))),
    ("message_raw", |row| PropertyValue::Text(row.message_raw.clone())),
    ("priority", |row| PropertyValue::Text(row.priority.clone())),
    ("priority_raw", |row| PropertyValue::Number(row.priority_raw as f64)),
    ("status", |row| PropertyValue::Text(row.status.clone())),
    ("status_raw", |row| PropertyValue::Number(row.status_raw as f64)),
    ("tags", |row| PropertyValue::Text(row.tags.clone())),
    ("tags_raw", |row| PropertyValue::Text(row.tags_raw.clone())),
];

/// Find the accessor for an attribute name.
pub fn attribute(name: &str) -> Option<Accessor> {
    ATTRIBUTES
        .iter()
        .find(|(attr, _)| *attr == name)
        .map(|(_, accessor)| *accessor)
}

/// Names of every supported attribute.
pub fn attribute_names() -> impl Iterator<Item = &'static str> {
    ATTRIBUTES.iter().map(|(name, _)| *name)
}

/// Strip the status markup PRTG wraps around formatted messages.
pub fn clean_message_html(message: &str) -> String {
    static MARKUP: OnceLock<Regex> = OnceLock::new();
    let re = MARKUP.get_or_init(|| {
        Regex::new(r#"<div class="(?:status|moreicon)">|</div>"#).unwrap()
    });
    re.replace_all(message, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> TableRow {
        TableRow {
            group: "Servers".into(),
            device: "web01".into(),
            sensor: "Ping".into(),
            active: true,
            active_raw: 1,
            message: r#"<div class="status">OK</div><div class="moreicon"></div> "#.into(),
            message_raw: "OK".into(),
            priority: "***".into(),
            priority_raw: 3,
            status: "Up".into(),
            status_raw: 3,
            tags: "ping prod".into(),
            tags_raw: "ping prod".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_every_attribute_resolves() {
        let row = row();
        for name in attribute_names() {
            let accessor = attribute(name).unwrap();
            let value = accessor(&row);
            if name.ends_with("_raw") && name != "message_raw" && name != "tags_raw" {
                assert!(matches!(value, PropertyValue::Number(_)), "{}", name);
            } else {
                assert!(matches!(value, PropertyValue::Text(_)), "{}", name);
            }
        }
        assert_eq!(attribute_names().count(), 10);
    }

    #[test]
    fn test_attribute_values() {
        let row = row();
        assert_eq!(attribute("status").unwrap()(&row), PropertyValue::Text("Up".into()));
        assert_eq!(attribute("status_raw").unwrap()(&row), PropertyValue::Number(3.0));
        assert_eq!(attribute("active").unwrap()(&row), PropertyValue::Text("true".into()));
        assert_eq!(attribute("message").unwrap()(&row), PropertyValue::Text("OK".into()));
        assert!(attribute("name").is_none());
        assert!(attribute("Status").is_none());
    }

    #[test]
    fn test_clean_message_html() {
        assert_eq!(
            clean_message_html(r#"<div class="status">Down</div> <div class="moreicon"></div>"#),
            "Down"
        );
        assert_eq!(clean_message_html("  plain  "), "plain");
        assert_eq!(clean_message_html("<b>kept</b>"), "<b>kept</b>");
    }

    #[test]
    fn test_entity_parse() {
        assert_eq!(Entity::parse("group"), Some(Entity::Group));
        assert_eq!(Entity::parse("sensor").map(|e| e.as_str()), Some("sensor"));
        assert_eq!(Entity::parse("probe"), None);
        assert_eq!(Entity::Device.name_of(&row()), "web01");
    }
}
