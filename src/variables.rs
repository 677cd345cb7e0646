//! Placeholder tokens and their substitution.
//!
//! A token is the literal `{{identifier}}`; the identifier is opaque and is
//! matched exactly. Substitution only happens on a copy of the model at
//! print/export time. Tokens with no value are left verbatim.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::markup::{EditorSurface, escape_html};
use crate::model::{DocumentModel, ObjectKind};

/// Token (`{{name}}`, or a bare `name`) -> replacement value.
pub type ValueMap = HashMap<String, String>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateVariable {
    pub key: String,
    pub label: String,
    pub group: String,
}

impl TemplateVariable {
    fn new(identifier: &str, label: &str, group: &str) -> Self {
        Self {
            key: token(identifier),
            label: label.to_string(),
            group: group.to_string(),
        }
    }
}

/// The static catalogue offered by the insertion menu.
pub fn catalogue() -> Vec<TemplateVariable> {
    vec![
        TemplateVariable::new("paciente", "Nome do paciente", "Paciente"),
        TemplateVariable::new("cpf", "CPF", "Paciente"),
        TemplateVariable::new("data_nascimento", "Data de nascimento", "Paciente"),
        TemplateVariable::new("idade", "Idade", "Paciente"),
        TemplateVariable::new("telefone", "Telefone", "Paciente"),
        TemplateVariable::new("endereco", "Endereço", "Paciente"),
        TemplateVariable::new("convenio", "Convênio", "Paciente"),
        TemplateVariable::new("data_consulta", "Data da consulta", "Consulta"),
        TemplateVariable::new("hora_consulta", "Hora da consulta", "Consulta"),
        TemplateVariable::new("procedimento", "Procedimento", "Consulta"),
        TemplateVariable::new("medico", "Nome do profissional", "Profissional"),
        TemplateVariable::new("crm", "CRM", "Profissional"),
        TemplateVariable::new("especialidade", "Especialidade", "Profissional"),
        TemplateVariable::new("clinica", "Nome da clínica", "Clínica"),
        TemplateVariable::new("endereco_clinica", "Endereço da clínica", "Clínica"),
        TemplateVariable::new("telefone_clinica", "Telefone da clínica", "Clínica"),
        TemplateVariable::new("data", "Data atual", "Data"),
        TemplateVariable::new("hora", "Hora atual", "Data"),
    ]
}

/// Wraps an identifier as a token; already-wrapped tokens pass through.
pub fn token(identifier: &str) -> String {
    if is_token(identifier) {
        identifier.to_string()
    } else {
        format!("{{{{{identifier}}}}}")
    }
}

pub fn is_token(text: &str) -> bool {
    text.len() > 4
        && text.starts_with("{{")
        && text.ends_with("}}")
        && !text[2..text.len() - 2].contains(['{', '}'])
}

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{[^{}]+\}\}").expect("valid regex"))
}

/// Distinct tokens in order of first appearance.
pub fn tokens_in(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    token_regex()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Writes the literal token at the surface's caret.
pub fn insert_variable(surface: &mut dyn EditorSurface, key: &str) {
    surface.insert_at_caret(&escape_html(&token(key)));
}

/// Inserts the literal token into plain text (a rectangle's text) at a byte offset.
pub fn insert_into_text(text: &mut String, caret: usize, key: &str) -> usize {
    let mut caret = caret.min(text.len());
    while !text.is_char_boundary(caret) {
        caret += 1;
    }
    let token = token(key);
    text.insert_str(caret, &token);
    caret + token.len()
}

/// One pattern matching every mapped token, each escaped so braces and dots
/// match literally.
struct Substitution {
    pattern: Option<Regex>,
    values: HashMap<String, String>,
}

impl Substitution {
    /// When both `name` and `{{name}}` are mapped, the braced key wins.
    fn new(values: &ValueMap) -> Self {
        let mut keyed: HashMap<String, (bool, &String)> = HashMap::with_capacity(values.len());
        for (key, value) in values {
            let braced = is_token(key);
            match keyed.entry(token(key)) {
                Entry::Vacant(slot) => {
                    slot.insert((braced, value));
                }
                Entry::Occupied(mut slot) => {
                    if braced && !slot.get().0 {
                        slot.insert((braced, value));
                    }
                }
            }
        }
        let values: HashMap<String, String> = keyed
            .into_iter()
            .map(|(token, (_, value))| (token, value.clone()))
            .collect();
        let mut tokens: Vec<&String> = values.keys().collect();
        tokens.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
        let pattern = if tokens.is_empty() {
            None
        } else {
            let alternation = tokens
                .iter()
                .map(|t| regex::escape(t))
                .collect::<Vec<_>>()
                .join("|");
            Regex::new(&alternation).ok()
        };
        Self { pattern, values }
    }

    fn apply(&self, text: &str, escape: bool) -> String {
        let Some(pattern) = &self.pattern else {
            return text.to_string();
        };
        pattern
            .replace_all(text, |caps: &Captures| {
                let matched = &caps[0];
                match self.values.get(matched) {
                    Some(value) if escape => escape_html(value),
                    Some(value) => value.clone(),
                    None => matched.to_string(),
                }
            })
            .into_owned()
    }
}

/// Replaces tokens in plain text. Values are inserted as-is.
pub fn substitute_text(text: &str, values: &ValueMap) -> String {
    Substitution::new(values).apply(text, false)
}

/// Replaces tokens in markup. Values are HTML-escaped so they cannot open tags.
pub fn substitute_markup(markup: &str, values: &ValueMap) -> String {
    Substitution::new(values).apply(markup, true)
}

/// A copy of `model` with every mapped token replaced in the content and in
/// rectangle texts. The input model is untouched.
pub fn resolve(model: &DocumentModel, values: &ValueMap) -> DocumentModel {
    let substitution = Substitution::new(values);
    let mut resolved = model.clone();
    resolved.content = substitution.apply(&model.content, true);
    for object in &mut resolved.objects {
        if let ObjectKind::Rectangle(rect) = &mut object.kind {
            rect.text = substitution.apply(&rect.text, false);
        }
    }
    resolved
}

/// Tokens present in the model that `values` does not map.
pub fn unresolved_tokens(model: &DocumentModel, values: &ValueMap) -> Vec<String> {
    let mapped: BTreeSet<String> = values.keys().map(|k| token(k)).collect();
    let mut seen = BTreeSet::new();
    let rect_texts = model.objects.iter().filter_map(|o| match &o.kind {
        ObjectKind::Rectangle(rect) => Some(rect.text.as_str()),
        _ => None,
    });
    std::iter::once(model.content.as_str())
        .chain(rect_texts)
        .flat_map(tokens_in)
        .filter(|t| !mapped.contains(t) && seen.insert(t.clone()))
        .collect()
}
