use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::TextTo3DNodeData;

static VARIABLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{(#[a-zA-Z0-9_]{1,50}(?:\.[a-zA-Z_][a-zA-Z0-9_]{0,29}){1,10}#)\}\}").unwrap()
});

/// A `{{#node.variable#}}` reference found in a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableSelector {
    /// The reference as written, e.g. `#start.topic#`.
    pub variable: String,
    /// The reference split into selector segments, e.g. `["start", "topic"]`.
    pub value_selector: Vec<String>,
}

/// Extracts the variable references of `template`, deduplicated, in order of first appearance.
pub fn extract_variable_selectors(template: &str) -> Vec<VariableSelector> {
    let mut selectors: Vec<VariableSelector> = Vec::new();
    for caps in VARIABLE_RE.captures_iter(template) {
        let variable = &caps[1];
        if selectors.iter().any(|selector| selector.variable == variable) {
            continue;
        }
        selectors.push(VariableSelector {
            variable: variable.to_string(),
            value_selector: variable.trim_matches('#').split('.').map(str::to_string).collect(),
        });
    }
    selectors
}

/// Maps every variable the node reads to the selector the engine must provide, keyed by
/// `"{node_id}.{variable}"`.
pub fn variable_selector_mapping(
    node_id: &str,
    data: &TextTo3DNodeData,
) -> BTreeMap<String, Vec<String>> {
    let mut mapping = BTreeMap::new();
    mapping.insert("query".to_string(), data.query_variable_selector.clone());
    for selector in extract_variable_selectors(&data.instruction) {
        mapping.insert(selector.variable, selector.value_selector);
    }

    mapping
        .into_iter()
        .map(|(key, value)| (format!("{}.{}", node_id, key), value))
        .collect()
}
