//! Extraction strategies for fetched pages
//!
//! A rule's `parser_type` tag is resolved once, at configuration validation,
//! through the [`ParserRegistry`]. Strategies are stateless and shared.
//!
//! Both built-in strategies walk the page the same way: the "root" node gets
//! the rule's "root" steps, every "dom" step spawns child nodes named by its
//! `item_key`, and each processed node yields one item nested under its parent.

mod html;
mod json;

pub use html::HtmlParser;
pub use json::JsonParser;

use crate::config::{ParseRule, RuleConf};
use crate::state::{Item, Task};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

/// Name of the node representing the whole page
pub const ROOT_NODE: &str = "root";

/// Tasks and items extracted from one page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutput {
    pub tasks: Vec<Task>,
    pub items: Vec<Item>,
}

/// An extraction strategy
pub trait Parser: Send + Sync {
    /// Tag used in `parser_type`
    fn name(&self) -> &'static str;

    /// Checks that a parse step is usable by this strategy
    fn check_rule(&self, step: &ParseRule) -> Result<(), String>;

    /// Extracts child tasks and items from a page
    ///
    /// Child tasks carry the `item_key` of the producing "url" step as their
    /// rule name; the owning crawler fills in its own name.
    fn parse(&self, page: &str, page_url: &str, rule: &RuleConf) -> Result<ParseOutput, String>;
}

/// Maps `parser_type` tags to extraction strategies
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn Parser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in "html" and "json" strategies
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(HtmlParser));
        registry.register(Arc::new(JsonParser));
        registry
    }

    pub fn register(&mut self, parser: Arc<dyn Parser>) {
        self.parsers.insert(parser.name().to_string(), parser);
    }

    pub fn get(&self, tag: &str) -> Option<Arc<dyn Parser>> {
        self.parsers.get(tag).cloned()
    }

    /// Registered tags, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.parsers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserRegistry")
            .field("parsers", &self.names())
            .finish()
    }
}

/// Arena of per-node items, folded into a nested tree once the walk ends
///
/// Children always get a higher index than their parent, so a reverse pass
/// sees every child before its parent.
#[derive(Debug, Default)]
pub(crate) struct ItemTree {
    slots: Vec<Slot>,
}

#[derive(Debug)]
struct Slot {
    name: String,
    parent: Option<usize>,
    item: Item,
}

impl ItemTree {
    pub(crate) fn push(&mut self, name: String, parent: Option<usize>, item: Item) -> usize {
        self.slots.push(Slot { name, parent, item });
        self.slots.len() - 1
    }

    /// Nests each item under its parent and returns the top-level items
    pub(crate) fn into_items(self) -> Vec<Item> {
        let mut children: Vec<Vec<(String, Item)>> = vec![Vec::new(); self.slots.len()];
        let mut top = Vec::new();

        for (index, slot) in self.slots.into_iter().enumerate().rev() {
            let mut item = slot.item;
            let pending = std::mem::take(&mut children[index]);
            for (name, child) in pending.into_iter().rev() {
                attach(&mut item, &name, Value::Object(child));
            }
            match slot.parent {
                Some(parent) => children[parent].push((slot.name, item)),
                None => top.push(item),
            }
        }

        top.reverse();
        top
    }
}

/// Adds a value under `key`, turning an existing entry into a list
pub(crate) fn attach(item: &mut Item, key: &str, value: Value) {
    match item.get_mut(key) {
        None => {
            item.insert(key.to_string(), value);
        }
        Some(Value::Array(list)) => list.push(value),
        Some(existing) => {
            let previous = existing.take();
            *existing = Value::Array(vec![previous, value]);
        }
    }
}

/// Stores extracted values: one value as a scalar, several as a list
pub(crate) fn merge_values(item: &mut Item, key: &str, mut values: Vec<Value>) {
    if values.is_empty() {
        return;
    }
    if !item.contains_key(key) && values.len() == 1 {
        item.insert(key.to_string(), values.remove(0));
        return;
    }
    match item.get_mut(key) {
        None => {
            item.insert(key.to_string(), Value::Array(values));
        }
        Some(Value::Array(list)) => list.extend(values),
        Some(existing) => {
            let mut list = vec![existing.take()];
            list.extend(values);
            *existing = Value::Array(list);
        }
    }
}

/// Compiles an optional step regex
pub(crate) fn compile_regex(step: &ParseRule) -> Result<Option<Regex>, String> {
    step.regex
        .as_deref()
        .filter(|pattern| !pattern.is_empty())
        .map(|pattern| {
            Regex::new(pattern).map_err(|e| format!("invalid regex '{}': {}", pattern, e))
        })
        .transpose()
}

/// Applies a capture regex: whole matches without groups, else every group
pub(crate) fn regex_capture(content: &str, regex: &Regex) -> Vec<String> {
    let mut values = Vec::new();
    for captures in regex.captures_iter(content) {
        if captures.len() == 1 {
            values.push(captures[0].to_string());
        } else {
            values.extend(
                captures
                    .iter()
                    .skip(1)
                    .flatten()
                    .map(|group| group.as_str().to_string()),
            );
        }
    }
    values
}

/// Resolves a link against the page URL
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - fragment-only links
/// - Non-HTTP(S) URLs after resolution
pub(crate) fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    let absolute_url = base_url.join(href).ok()?;
    if absolute_url.scheme() == "http" || absolute_url.scheme() == "https" {
        Some(absolute_url.to_string())
    } else {
        None
    }
}

/// Builds child tasks from resolved URLs
pub(crate) fn child_tasks(step: &ParseRule, urls: &[String]) -> Vec<Task> {
    urls.iter()
        .map(|url| {
            let mut task = Task::new(String::new(), step.item_key.clone(), url.clone());
            task.is_seed = step.is_seed_url;
            task
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registry_defaults() {
        let registry = ParserRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["html", "json"]);
        assert!(registry.get("html").is_some());
        assert!(registry.get("xml").is_none());
    }

    #[test]
    fn test_merge_values_scalar_then_list() {
        let mut item = Item::new();
        merge_values(&mut item, "tag", vec![json!("a")]);
        assert_eq!(item["tag"], json!("a"));

        merge_values(&mut item, "tag", vec![json!("b"), json!("c")]);
        assert_eq!(item["tag"], json!(["a", "b", "c"]));

        merge_values(&mut item, "empty", vec![]);
        assert!(!item.contains_key("empty"));
    }

    #[test]
    fn test_attach_builds_list() {
        let mut item = Item::new();
        attach(&mut item, "entry", json!({"n": 1}));
        attach(&mut item, "entry", json!({"n": 2}));
        attach(&mut item, "entry", json!({"n": 3}));
        assert_eq!(item["entry"], json!([{"n": 1}, {"n": 2}, {"n": 3}]));
    }

    #[test]
    fn test_item_tree_preserves_sibling_order() {
        let mut tree = ItemTree::default();
        let root = tree.push(ROOT_NODE.to_string(), None, Item::new());
        for n in 1..=3 {
            let mut item = Item::new();
            item.insert("n".to_string(), json!(n));
            tree.push("entry".to_string(), Some(root), item);
        }

        let items = tree.into_items();
        assert_eq!(items.len(), 1);
        assert_eq!(
            Value::Object(items[0].clone()),
            json!({"entry": [{"n": 1}, {"n": 2}, {"n": 3}]})
        );
    }

    #[test]
    fn test_regex_capture_groups() {
        let regex = Regex::new(r"(\d+)-(\d+)").unwrap();
        assert_eq!(regex_capture("1-2 and 3-4", &regex), vec!["1", "2", "3", "4"]);

        let regex = Regex::new(r"\d+").unwrap();
        assert_eq!(regex_capture("a1b22", &regex), vec!["1", "22"]);
    }

    #[test]
    fn test_resolve_link() {
        let base = Url::parse("https://example.com/news/").unwrap();
        assert_eq!(
            resolve_link("story/1", &base),
            Some("https://example.com/news/story/1".to_string())
        );
        assert_eq!(resolve_link("mailto:a@b.c", &base), None);
        assert_eq!(resolve_link("#top", &base), None);
        assert_eq!(resolve_link("ftp://example.com/x", &base), None);
    }
}
