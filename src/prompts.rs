//! Prompt templates for rating one argument on one quality dimension.
//!
//! A prompt is a list of knowledge sections followed by the option list and
//! the `### Your answer:` marker. Placeholders are bound from an explicit
//! [`PromptContext`]; unknown placeholder names are rejected when a builder is
//! constructed, not when a prompt is rendered.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::ratings::PromptVariant;
use crate::taxonomy::QualityDimension;

// =============================================================================
// Inputs
// =============================================================================

/// One argument to be rated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argument {
    pub id: String,
    pub issue: String,
    pub stance: String,
    pub conclusion: String,
    #[serde(alias = "text")]
    pub argument: String,
}

/// Named fields available to templates: argument fields merged with
/// dimension fields.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub argument: &'a Argument,
    pub dimension: &'a QualityDimension,
}

/// Placeholders a [`PromptContext`] can fill.
pub const CONTEXT_FIELDS: &[&str] = &[
    "id",
    "issue",
    "stance",
    "conclusion",
    "argument",
    "dimension",
    "definition",
    "question",
    "definition_novice",
    "question_novice",
];

const KNOWLEDGE_TYPES: &str = "knowledge_types";

impl<'a> PromptContext<'a> {
    pub fn new(argument: &'a Argument, dimension: &'a QualityDimension) -> Self {
        Self {
            argument,
            dimension,
        }
    }

    pub fn field(&self, name: &str) -> Option<&'a str> {
        let a = self.argument;
        let d = self.dimension;
        Some(match name {
            "id" => &a.id,
            "issue" => &a.issue,
            "stance" => &a.stance,
            "conclusion" => &a.conclusion,
            "argument" => &a.argument,
            "dimension" => &d.dimension,
            "definition" => &d.definition,
            "question" => &d.question,
            "definition_novice" => &d.definition_novice,
            "question_novice" => &d.question_novice,
            _ => return None,
        })
    }
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("unknown placeholder '{{{name}}}' in {location}")]
    UnknownPlaceholder { name: String, location: String },
    #[error("template '{0}' has no {{knowledge_types}} slot")]
    MissingKnowledgeSlot(String),
}

// =============================================================================
// Templates
// =============================================================================

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("Invalid placeholder regex"));

fn placeholders(text: &str) -> BTreeSet<&str> {
    PLACEHOLDER
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect()
}

/// Closing part of a prompt around the `{knowledge_types}` slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptTemplate {
    pub slug: &'static str,
    pub variant: PromptVariant,
    pub reasoning: bool,
    pub body: &'static str,
}

impl PromptTemplate {
    /// Condition name used in replicate file names, e.g. `novice-reasoning`.
    pub fn condition(&self) -> String {
        if self.reasoning {
            format!("{}-reasoning", self.variant)
        } else {
            self.variant.to_string()
        }
    }
}

pub const EXPERT_TEMPLATE: PromptTemplate = PromptTemplate {
    slug: "expert",
    variant: PromptVariant::Expert,
    reasoning: false,
    body: "{knowledge_types} Choose one of the options below:
3 - High
2 - Medium
1 - Low
? - Cannot judge

### Your answer:",
};

pub const EXPERT_REASONING_TEMPLATE: PromptTemplate = PromptTemplate {
    slug: "expert_reasoning",
    variant: PromptVariant::Expert,
    reasoning: true,
    body: "{knowledge_types} Choose one of the options below and explain your reasoning:
3 - High
2 - Medium
1 - Low
? - Cannot judge

### Your answer:",
};

pub const NOVICE_TEMPLATE: PromptTemplate = PromptTemplate {
    slug: "novice",
    variant: PromptVariant::Novice,
    reasoning: false,
    body: "{knowledge_types}

### Task:
Choose one of the options below.

{question_novice}
3 - High
2 - Medium
1 - Low
? - Cannot judge

### Your answer:",
};

pub const NOVICE_REASONING_TEMPLATE: PromptTemplate = PromptTemplate {
    slug: "novice_reasoning",
    variant: PromptVariant::Novice,
    reasoning: true,
    body: "{knowledge_types}

### Task:
Choose one of the options below and explain your reasoning.

{question_novice}
3 - High
2 - Medium
1 - Low
? - Cannot judge

### Your answer:",
};

pub const TEMPLATES: &[PromptTemplate] = &[
    EXPERT_TEMPLATE,
    EXPERT_REASONING_TEMPLATE,
    NOVICE_TEMPLATE,
    NOVICE_REASONING_TEMPLATE,
];

pub fn template_for(variant: PromptVariant, reasoning: bool) -> PromptTemplate {
    TEMPLATES
        .iter()
        .find(|t| t.variant == variant && t.reasoning == reasoning)
        .copied()
        .unwrap_or(EXPERT_TEMPLATE)
}

pub fn template_by_slug(slug: &str) -> Option<PromptTemplate> {
    TEMPLATES.iter().find(|t| t.slug == slug).copied()
}

// =============================================================================
// Knowledge sections
// =============================================================================

pub const EXPERT_SECTIONS: &[&str] = &[
    "### Instruction:\nPlease answer the following questions for the given comment from an online debate forum on a given issue.",
    "### Issue:\n{issue}",
    "### Stance:\n{stance}",
    "### Argument:\n{argument}",
    "### Quality dimension definition:\n{dimension}: {definition}",
    "### Question:\n{question}",
];

pub const NOVICE_SECTIONS: &[&str] = &[
    "### Instruction:\nPlease rate the quality dimension of the given argument from an online debate forum.",
    "### Conclusion:\n{conclusion}",
    "### Reason(s):\n{argument}",
    "### Quality dimension definition:\n{dimension}: {definition_novice}",
];

fn default_sections(variant: PromptVariant) -> &'static [&'static str] {
    match variant {
        PromptVariant::Expert => EXPERT_SECTIONS,
        PromptVariant::Novice => NOVICE_SECTIONS,
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Validated template plus knowledge sections.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    template: PromptTemplate,
    sections: Vec<String>,
    custom: bool,
}

impl PromptBuilder {
    pub fn new(template: PromptTemplate) -> Result<Self, PromptError> {
        if !placeholders(template.body).contains(KNOWLEDGE_TYPES) {
            return Err(PromptError::MissingKnowledgeSlot(template.slug.to_string()));
        }
        check_placeholders(template.body, &format!("template '{}'", template.slug), true)?;

        let sections: Vec<String> = default_sections(template.variant)
            .iter()
            .map(|s| s.to_string())
            .collect();
        for (i, section) in sections.iter().enumerate() {
            check_placeholders(section, &format!("default section {i}"), false)?;
        }

        Ok(Self {
            template,
            sections,
            custom: false,
        })
    }

    /// Add a custom section. The first call replaces the default sections.
    pub fn with_knowledge(mut self, section: impl Into<String>) -> Result<Self, PromptError> {
        let section = section.into();
        check_placeholders(
            &section,
            &format!("custom section {}", if self.custom { self.sections.len() } else { 0 }),
            false,
        )?;
        if !self.custom {
            self.sections.clear();
            self.custom = true;
        }
        self.sections.push(section);
        Ok(self)
    }

    pub fn template(&self) -> PromptTemplate {
        self.template
    }

    pub fn build(&self, argument: &Argument, dimension: &QualityDimension) -> String {
        let ctx = PromptContext::new(argument, dimension);
        let knowledge = self
            .sections
            .iter()
            .map(|s| fill(s, &ctx, None))
            .collect::<Vec<_>>()
            .join("\n\n");
        fill(self.template.body, &ctx, Some(&knowledge))
    }
}

fn check_placeholders(text: &str, location: &str, allow_knowledge: bool) -> Result<(), PromptError> {
    for name in placeholders(text) {
        let known = CONTEXT_FIELDS.contains(&name) || (allow_knowledge && name == KNOWLEDGE_TYPES);
        if !known {
            return Err(PromptError::UnknownPlaceholder {
                name: name.to_string(),
                location: location.to_string(),
            });
        }
    }
    Ok(())
}

/// Single-pass substitution; inserted values are never re-expanded.
fn fill(text: &str, ctx: &PromptContext<'_>, knowledge: Option<&str>) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures<'_>| {
            let name = &caps[1];
            if name == KNOWLEDGE_TYPES {
                if let Some(k) = knowledge {
                    return k.to_string();
                }
            }
            ctx.field(name)
                .map(str::to_string)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn argument() -> Argument {
        Argument {
            id: "arg1".into(),
            issue: "School uniforms".into(),
            stance: "pro".into(),
            conclusion: "Uniforms help".into(),
            argument: "They reduce {bullying} over clothes.".into(),
        }
    }

    fn dimension() -> QualityDimension {
        QualityDimension {
            dimension: "Clarity".into(),
            definition: "Clear language.".into(),
            question: "How clear is it?".into(),
            definition_novice: "Easy to follow.".into(),
            question_novice: "How easy is it to follow?".into(),
        }
    }

    #[test]
    fn expert_prompt_layout() {
        let p = PromptBuilder::new(EXPERT_TEMPLATE)
            .unwrap()
            .build(&argument(), &dimension());
        assert!(p.starts_with("### Instruction:"));
        assert!(p.contains("### Issue:\nSchool uniforms\n\n### Stance:\npro"));
        assert!(p.contains("Clarity: Clear language."));
        assert!(p.contains("How clear is it? Choose one of the options below:"));
        assert!(p.ends_with("### Your answer:"));
    }

    #[test]
    fn novice_prompt_uses_novice_fields() {
        let p = PromptBuilder::new(NOVICE_REASONING_TEMPLATE)
            .unwrap()
            .build(&argument(), &dimension());
        assert!(p.contains("### Conclusion:\nUniforms help"));
        assert!(p.contains("Clarity: Easy to follow."));
        assert!(p.contains("explain your reasoning.\n\nHow easy is it to follow?\n3 - High"));
        assert!(!p.contains("### Issue:"));
    }

    #[test]
    fn argument_text_is_not_re_expanded() {
        let p = PromptBuilder::new(EXPERT_TEMPLATE)
            .unwrap()
            .build(&argument(), &dimension());
        assert!(p.contains("They reduce {bullying} over clothes."));
    }

    #[test]
    fn unknown_placeholder_fails_at_construction() {
        let err = PromptBuilder::new(EXPERT_TEMPLATE)
            .unwrap()
            .with_knowledge("### Topic:\n{topic}")
            .unwrap_err();
        assert!(matches!(err, PromptError::UnknownPlaceholder { ref name, .. } if name == "topic"));
    }

    #[test]
    fn custom_sections_replace_defaults() {
        let p = PromptBuilder::new(EXPERT_TEMPLATE)
            .unwrap()
            .with_knowledge("### Argument:\n{argument}")
            .unwrap()
            .build(&argument(), &dimension());
        assert!(p.starts_with("### Argument:"));
        assert!(!p.contains("### Instruction:"));
    }

    #[test]
    fn condition_names() {
        assert_eq!(EXPERT_TEMPLATE.condition(), "expert");
        assert_eq!(NOVICE_REASONING_TEMPLATE.condition(), "novice-reasoning");
        assert_eq!(
            template_for(PromptVariant::Novice, false).slug,
            NOVICE_TEMPLATE.slug
        );
    }
}
