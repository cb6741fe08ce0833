//! HTML extraction strategy
//!
//! Selectors are CSS selectors evaluated with `scraper`. Step types:
//! - `dom`: every match becomes a child node named `item_key`
//! - `url`: links (the `attr` attribute, `href` by default) resolved against the page URL
//! - `string`: trimmed text content, or the `attr` attribute when set
//! - `html`: outer HTML of every match

use super::{
    child_tasks, compile_regex, merge_values, regex_capture, resolve_link, ItemTree, ParseOutput,
    Parser, ROOT_NODE,
};
use crate::config::{ParseRule, RuleConf};
use crate::state::Item;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::VecDeque;
use url::Url;

/// Default attribute read by `url` steps
const DEFAULT_LINK_ATTR: &str = "href";

/// CSS-selector based extraction
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlParser;

fn parse_selector(selector: &str) -> Result<Selector, String> {
    Selector::parse(selector).map_err(|e| format!("invalid selector '{}': {:?}", selector, e))
}

impl Parser for HtmlParser {
    fn name(&self) -> &'static str {
        "html"
    }

    fn check_rule(&self, step: &ParseRule) -> Result<(), String> {
        match step.rule_type.as_str() {
            "dom" | "url" | "string" | "html" => {}
            other => return Err(format!("unsupported rule_type '{}'", other)),
        }
        if step.selector.trim().is_empty() {
            return Err("empty selector".to_string());
        }
        parse_selector(&step.selector)?;
        compile_regex(step)?;
        Ok(())
    }

    fn parse(&self, page: &str, page_url: &str, rule: &RuleConf) -> Result<ParseOutput, String> {
        if page.trim().is_empty() {
            return Err("page is empty".to_string());
        }
        let base_url =
            Url::parse(page_url).map_err(|e| format!("invalid page url '{}': {}", page_url, e))?;

        let document = Html::parse_document(page);
        let mut tree = ItemTree::default();
        let mut output = ParseOutput::default();

        let mut pending: VecDeque<(ElementRef<'_>, String, Option<usize>)> = VecDeque::new();
        pending.push_back((document.root_element(), ROOT_NODE.to_string(), None));

        while let Some((node, name, parent)) = pending.pop_front() {
            let Some(steps) = rule.rules.get(&name) else {
                continue;
            };

            let mut item = Item::new();
            let mut children = Vec::new();

            for step in steps {
                let selector = parse_selector(&step.selector)?;
                let regex = compile_regex(step)?;
                let matches = node.select(&selector);

                match step.rule_type.as_str() {
                    "dom" => {
                        children.extend(matches.map(|element| (element, step.item_key.clone())));
                    }
                    "url" => {
                        let attr = step.attr.as_deref().unwrap_or(DEFAULT_LINK_ATTR);
                        let urls: Vec<String> = matches
                            .filter_map(|element| element.value().attr(attr))
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
                        for element in matches {
                            let text = match step.attr.as_deref() {
                                Some(attr) => match element.value().attr(attr) {
                                    Some(value) => value.trim().to_string(),
                                    None => continue,
                                },
                                None => element.text().collect::<String>().trim().to_string(),
                            };
                            match &regex {
                                Some(re) => values.extend(regex_capture(&text, re)),
                                None => values.push(text),
                            }
                        }
                        merge_values(
                            &mut item,
                            &step.item_key,
                            values.into_iter().map(Value::String).collect(),
                        );
                    }
                    "html" => {
                        let values = matches.map(|element| Value::String(element.html())).collect();
                        merge_values(&mut item, &step.item_key, values);
                    }
                    other => return Err(format!("unsupported rule_type '{}'", other)),
                }
            }

            let slot = tree.push(name, parent, item);
            pending.extend(
                children
                    .into_iter()
                    .map(|(element, key)| (element, key, Some(slot))),
            );
        }

        output.items = tree.into_items();
        Ok(output)
    }
}
