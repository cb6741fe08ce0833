//! JSON extraction strategy
//!
//! Selectors are JSON pointers (RFC 6901) relative to the current node. Without
//! "root" steps the page itself is the item: an object yields one item and an
//! array yields one item per object element.

use super::{
    child_tasks, compile_regex, merge_values, regex_capture, resolve_link, ItemTree, ParseOutput,
    Parser, ROOT_NODE,
};
use crate::config::{ParseRule, RuleConf};
use crate::state::Item;
use serde_json::Value;
use std::collections::VecDeque;
use url::Url;

/// JSON-pointer based extraction
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParser;

/// Values addressed by a pointer; arrays are flattened one level
fn select<'a>(node: &'a Value, pointer: &str) -> Vec<&'a Value> {
    match node.pointer(pointer) {
        Some(Value::Array(list)) => list.iter().collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(value) => vec![value],
    }
}

impl Parser for JsonParser {
    fn name(&self) -> &'static str {
        "json"
    }

    fn check_rule(&self, step: &ParseRule) -> Result<(), String> {
        match step.rule_type.as_str() {
            "dom" | "url" | "string" => {}
            other => return Err(format!("unsupported rule_type '{}'", other)),
        }
        if !step.selector.is_empty() && !step.selector.starts_with('/') {
            return Err(format!(
                "selector '{}' is not a JSON pointer",
                step.selector
            ));
        }
        // A dom step on the node itself would never terminate
        if step.rule_type == "dom" && step.selector.is_empty() {
            return Err("dom step needs a non-empty pointer".to_string());
        }
        compile_regex(step)?;
        Ok(())
    }

    fn parse(&self, page: &str, page_url: &str, rule: &RuleConf) -> Result<ParseOutput, String> {
        if page.trim().is_empty() {
            return Err("page is empty".to_string());
        }
        let document: Value =
            serde_json::from_str(page).map_err(|e| format!("invalid JSON page: {}", e))?;

        if !rule.rules.contains_key(ROOT_NODE) {
            return whole_page(document);
        }

        let base_url =
            Url::parse(page_url).map_err(|e| format!("invalid page url '{}': {}", page_url, e))?;
        let mut tree = ItemTree::default();
        let mut output = ParseOutput::default();

        let mut pending: VecDeque<(&Value, String, Option<usize>)> = VecDeque::new();
        pending.push_back((&document, ROOT_NODE.to_string(), None));

        while let Some((node, name, parent)) = pending.pop_front() {
            let Some(steps) = rule.rules.get(&name) else {
                continue;
            };

            let mut item = Item::new();
            let mut children = Vec::new();

            for step in steps {
                let regex = compile_regex(step)?;
                let matches = select(node, &step.selector);

                match step.rule_type.as_str() {
                    "dom" => {
                        children.extend(matches.into_iter().map(|v| (v, step.item_key.clone())));
                    }
                    "url" => {
                        let urls: Vec<String> = matches
                            .into_iter()
                            .filter_map(Value::as_str)
                            .filter_map(|href| resolve_link(href, &base_url))
                            .filter(|url| regex.as_ref().map_or(true, |re| re.is_match(url)))
                            .collect();
                        output.tasks.extend(child_tasks(step, &urls));
                        merge_values(
                            &mut item,
                            &step.item_key,
                            urls.into_iter().map(Value::String).collect(),
                        );
                    }
                    "string" => {
                        let mut values = Vec::new();
                        for value in matches {
                            match (value, &regex) {
                                (Value::String(text), Some(re)) => values.extend(
                                    regex_capture(text, re).into_iter().map(Value::String),
                                ),
                                (Value::String(text), None) => {
                                    values.push(Value::String(text.trim().to_string()))
                                }
                                (other, _) => values.push(other.clone()),
                            }
                        }
                        merge_values(&mut item, &step.item_key, values);
                    }
                    other => return Err(format!("unsupported rule_type '{}'", other)),
                }
            }

            let slot = tree.push(name, parent, item);
            pending.extend(
                children
                    .into_iter()
                    .map(|(value, key)| (value, key, Some(slot))),
            );
        }

        output.items = tree.into_items();
        Ok(output)
    }
}

fn whole_page(document: Value) -> Result<ParseOutput, String> {
    let items = match document {
        Value::Object(item) => vec![item],
        Value::Array(list) => list
            .into_iter()
            .filter_map(|value| match value {
                Value::Object(item) => Some(item),
                _ => None,
            })
            .collect(),
        _ => return Err("JSON page is neither an object nor an array".to_string()),
    };
    Ok(ParseOutput {
        tasks: Vec::new(),
        items,
    })
}
