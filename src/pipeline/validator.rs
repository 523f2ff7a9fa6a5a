//! Definition Validator
//!
//! Checks a raw JSON definition and produces the typed, normalized form.
//! Pure: no I/O, no logging. Callers persist and audit.

use crate::pipeline::types::{codes, ValidationIssue, ValidationReport};
use crate::scheme::{Definition, FieldDef, FieldType, RuleDef, RuleOperator, StepDef};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;

static SNAKE_CASE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("snake case pattern"));
static SECTION_ID_STYLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9][A-Z0-9-]*$").expect("section id pattern"));

const TOP_LEVEL_KEYS: [&str; 8] = [
    "schemeId", "name", "title", "description", "fields", "steps", "rules", "sections",
];

/// Stateless definition validator
#[derive(Debug, Default, Clone, Copy)]
pub struct DefinitionValidator;

/// Accumulates findings while walking a document
#[derive(Default)]
struct Findings {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Findings {
    fn error(&mut self, code: &str, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationIssue::new(code, path, message));
    }

    fn warn(&mut self, code: &str, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ValidationIssue::new(code, path, message));
    }

    /// Read a string. Missing or blank required strings are errors.
    fn string(&mut self, obj: &Map<String, Value>, key: &str, path: &str, required: bool) -> Option<String> {
        let key_path = join(path, key);
        match obj.get(key) {
            None | Some(Value::Null) => {
                if required {
                    self.error(codes::MISSING_KEY, key_path, format!("'{}' is required", key));
                }
                None
            }
            Some(Value::String(s)) => {
                let trimmed = s.trim();
                if trimmed.is_empty() && required {
                    self.error(codes::MISSING_KEY, key_path, format!("'{}' must not be empty", key));
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            Some(_) => {
                self.error(codes::WRONG_TYPE, key_path, format!("'{}' must be a string", key));
                None
            }
        }
    }

    fn bool(&mut self, obj: &Map<String, Value>, key: &str, path: &str) -> bool {
        match obj.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => {
                self.error(codes::WRONG_TYPE, join(path, key), format!("'{}' must be a boolean", key));
                false
            }
        }
    }

    /// Read an array. `None` when absent or mistyped.
    fn array<'a>(&mut self, obj: &'a Map<String, Value>, key: &str, path: &str, required: bool) -> Option<&'a Vec<Value>> {
        match obj.get(key) {
            None | Some(Value::Null) => {
                if required {
                    self.error(codes::MISSING_KEY, join(path, key), format!("'{}' is required", key));
                }
                None
            }
            Some(Value::Array(items)) => Some(items),
            Some(_) => {
                self.error(codes::WRONG_TYPE, join(path, key), format!("'{}' must be an array", key));
                None
            }
        }
    }

    /// Read an array of strings, reporting non-string items
    fn string_list(&mut self, obj: &Map<String, Value>, key: &str, path: &str, required: bool) -> Option<Vec<String>> {
        let items = self.array(obj, key, path, required)?;
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            match item.as_str() {
                Some(s) => out.push(s.trim().to_string()),
                None => self.error(
                    codes::WRONG_TYPE,
                    format!("{}[{}]", join(path, key), i),
                    format!("'{}' entries must be strings", key),
                ),
            }
        }
        Some(out)
    }

    fn check_unique(&mut self, seen: &mut HashSet<String>, id: &str, path: &str, kind: &str) {
        if !seen.insert(id.to_string()) {
            self.error(codes::DUPLICATE_ID, path, format!("duplicate {} id '{}'", kind, id));
        }
    }

    fn check_snake_case(&mut self, id: &str, path: &str, kind: &str) {
        if !SNAKE_CASE.is_match(id) {
            self.warn(
                codes::NAMING_STYLE,
                path,
                format!("{} id '{}' should be snake_case", kind, id),
            );
        }
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

impl DefinitionValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a raw definition document
    pub fn validate(&self, raw: &Value) -> ValidationReport {
        let Some(obj) = raw.as_object() else {
            return ValidationReport {
                normalized: None,
                errors: vec![ValidationIssue::new(
                    codes::MALFORMED_INPUT,
                    "$",
                    "definition must be a JSON object",
                )],
                warnings: Vec::new(),
            };
        };

        let mut findings = Findings::default();

        for key in obj.keys() {
            if !TOP_LEVEL_KEYS.contains(&key.as_str()) {
                findings.warn(codes::UNKNOWN_KEY, key.clone(), format!("unknown key '{}' is ignored", key));
            }
        }

        let scheme_id = findings.string(obj, "schemeId", "", true);
        let name = self.read_name(obj, &mut findings);
        let description = findings.string(obj, "description", "", false).filter(|d| !d.is_empty());

        let slots = self.read_sections(obj, &mut findings);
        let fields = self.read_fields(obj, &mut findings);
        let steps = self.read_steps(obj, &mut findings);
        let rules = self.read_rules(obj, &mut findings);

        self.check_references(&fields, &steps, &rules, &slots, &mut findings);

        let normalized = match (scheme_id, name) {
            (Some(scheme_id), Some(name)) if findings.errors.is_empty() => Some(Definition {
                scheme_id,
                name,
                description,
                fields,
                steps,
                rules,
                sections: slots,
            }),
            _ => None,
        };

        ValidationReport {
            normalized,
            errors: findings.errors,
            warnings: findings.warnings,
        }
    }

    fn read_name(&self, obj: &Map<String, Value>, findings: &mut Findings) -> Option<String> {
        if obj.contains_key("name") {
            return findings.string(obj, "name", "", true);
        }
        if obj.contains_key("title") {
            findings.warn(codes::DEPRECATED, "title", "'title' is deprecated; use 'name'");
            return findings.string(obj, "title", "", true);
        }
        findings.error(codes::MISSING_KEY, "name", "'name' is required");
        None
    }

    fn read_sections(&self, obj: &Map<String, Value>, findings: &mut Findings) -> Vec<String> {
        let Some(slots) = findings.string_list(obj, "sections", "", false) else {
            return Vec::new();
        };
        if slots.is_empty() {
            findings.warn(codes::EMPTY_COLLECTION, "sections", "'sections' is empty");
        }

        let mut seen = HashSet::new();
        for (i, id) in slots.iter().enumerate() {
            let path = format!("sections[{}]", i);
            if id.is_empty() {
                findings.error(codes::MISSING_KEY, path, "section id must not be empty");
                continue;
            }
            findings.check_unique(&mut seen, id, &path, "section");
            if !SECTION_ID_STYLE.is_match(id) {
                findings.warn(
                    codes::NAMING_STYLE,
                    path,
                    format!("section id '{}' should be uppercase letters, digits and hyphens", id),
                );
            }
        }
        slots
    }

    fn read_fields(&self, obj: &Map<String, Value>, findings: &mut Findings) -> Vec<FieldDef> {
        let Some(items) = findings.array(obj, "fields", "", true) else {
            return Vec::new();
        };
        if items.is_empty() {
            findings.error(codes::MISSING_KEY, "fields", "at least one field is required");
        }

        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let path = format!("fields[{}]", i);
            let Some(field) = item.as_object() else {
                findings.error(codes::WRONG_TYPE, path, "field must be an object");
                continue;
            };

            let id = findings.string(field, "id", &path, true);
            let label = findings.string(field, "label", &path, true);
            let required = findings.bool(field, "required", &path);
            let deprecated = findings.bool(field, "deprecated", &path);
            let options = findings.string_list(field, "options", &path, false).unwrap_or_default();

            let field_type = match findings.string(field, "type", &path, true) {
                Some(name) => match FieldType::parse(&name) {
                    Some((field_type, alias)) => {
                        if alias {
                            findings.warn(
                                codes::DEPRECATED,
                                join(&path, "type"),
                                format!("type '{}' is deprecated; use '{:?}'", name, field_type).to_lowercase(),
                            );
                        }
                        Some(field_type)
                    }
                    None => {
                        findings.error(
                            codes::UNKNOWN_TYPE,
                            join(&path, "type"),
                            format!("unknown field type '{}' (expected one of: {})", name, FieldType::KNOWN.join(", ")),
                        );
                        None
                    }
                },
                None => None,
            };

            if let Some(id) = &id {
                findings.check_unique(&mut seen, id, &join(&path, "id"), "field");
                findings.check_snake_case(id, &join(&path, "id"), "field");
                if deprecated {
                    findings.warn(codes::DEPRECATED, path.clone(), format!("field '{}' is marked deprecated", id));
                }
            }
            if let Some(field_type) = field_type {
                if field_type.needs_options() && options.is_empty() {
                    findings.error(
                        codes::MISSING_OPTIONS,
                        join(&path, "options"),
                        format!("{:?} fields need at least one option", field_type).to_lowercase(),
                    );
                }
            }

            if let (Some(id), Some(label), Some(field_type)) = (id, label, field_type) {
                fields.push(FieldDef {
                    id,
                    label,
                    field_type,
                    required,
                    options,
                    deprecated,
                });
            }
        }
        fields
    }

    fn read_steps(&self, obj: &Map<String, Value>, findings: &mut Findings) -> Vec<StepDef> {
        let Some(items) = findings.array(obj, "steps", "", true) else {
            return Vec::new();
        };
        if items.is_empty() {
            findings.error(codes::MISSING_KEY, "steps", "at least one step is required");
        }

        let mut seen = HashSet::new();
        let mut steps = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let path = format!("steps[{}]", i);
            let Some(step) = item.as_object() else {
                findings.error(codes::WRONG_TYPE, path, "step must be an object");
                continue;
            };

            let id = findings.string(step, "id", &path, true);
            let title = findings.string(step, "title", &path, true);
            let step_fields = findings.string_list(step, "fields", &path, false).unwrap_or_default();
            let section = findings.string(step, "section", &path, false).filter(|s| !s.is_empty());
            let next = findings.string(step, "next", &path, false).filter(|s| !s.is_empty());

            if step_fields.is_empty() {
                findings.warn(codes::EMPTY_COLLECTION, join(&path, "fields"), "step collects no fields");
            }
            if let Some(id) = &id {
                findings.check_unique(&mut seen, id, &join(&path, "id"), "step");
                findings.check_snake_case(id, &join(&path, "id"), "step");
            }

            if let (Some(id), Some(title)) = (id, title) {
                steps.push(StepDef {
                    id,
                    title,
                    fields: step_fields,
                    section,
                    next,
                });
            }
        }
        steps
    }

    fn read_rules(&self, obj: &Map<String, Value>, findings: &mut Findings) -> Vec<RuleDef> {
        let Some(items) = findings.array(obj, "rules", "", false) else {
            return Vec::new();
        };
        if items.is_empty() {
            findings.warn(codes::EMPTY_COLLECTION, "rules", "'rules' is empty");
        }

        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let path = format!("rules[{}]", i);
            let Some(rule) = item.as_object() else {
                findings.error(codes::WRONG_TYPE, path, "rule must be an object");
                continue;
            };

            let id = findings.string(rule, "id", &path, true);
            let field = findings.string(rule, "field", &path, true);
            let require = findings.string_list(rule, "require", &path, true);
            let operator = match findings.string(rule, "operator", &path, true) {
                Some(name) => {
                    let parsed = RuleOperator::parse(&name);
                    if parsed.is_none() {
                        findings.error(
                            codes::UNKNOWN_OPERATOR,
                            join(&path, "operator"),
                            format!("unknown operator '{}' (expected equals, notEquals, present or absent)", name),
                        );
                    }
                    parsed
                }
                None => None,
            };
            let value = rule.get("value").filter(|v| !v.is_null()).cloned();

            if let Some(operator) = operator {
                if operator.needs_value() && value.is_none() {
                    findings.error(
                        codes::MISSING_KEY,
                        join(&path, "value"),
                        format!("'value' is required for operator {:?}", operator),
                    );
                }
            }
            if let Some(require) = &require {
                if require.is_empty() {
                    findings.error(codes::MISSING_KEY, join(&path, "require"), "rule must require at least one field");
                }
            }
            if let Some(id) = &id {
                findings.check_unique(&mut seen, id, &join(&path, "id"), "rule");
                findings.check_snake_case(id, &join(&path, "id"), "rule");
            }

            if let (Some(id), Some(field), Some(operator), Some(require)) = (id, field, operator, require) {
                rules.push(RuleDef {
                    id,
                    field,
                    operator,
                    value: if operator.needs_value() { value } else { None },
                    require,
                });
            }
        }
        rules
    }

    /// Dangling references between entities of the same document
    fn check_references(
        &self,
        fields: &[FieldDef],
        steps: &[StepDef],
        rules: &[RuleDef],
        slots: &[String],
        findings: &mut Findings,
    ) {
        let field_ids: HashSet<&str> = fields.iter().map(|f| f.id.as_str()).collect();
        let step_ids: HashSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();
        let slot_ids: HashSet<&str> = slots.iter().map(String::as_str).collect();

        for (i, step) in steps.iter().enumerate() {
            for (j, field_id) in step.fields.iter().enumerate() {
                if !field_ids.contains(field_id.as_str()) {
                    findings.error(
                        codes::DANGLING_REFERENCE,
                        format!("steps[{}].fields[{}]", i, j),
                        format!("step '{}' references undeclared field '{}'", step.id, field_id),
                    );
                }
            }
            if let Some(next) = &step.next {
                if !step_ids.contains(next.as_str()) {
                    findings.error(
                        codes::DANGLING_REFERENCE,
                        format!("steps[{}].next", i),
                        format!("step '{}' continues to undeclared step '{}'", step.id, next),
                    );
                }
            }
            if let Some(section) = &step.section {
                if !slot_ids.contains(section.as_str()) {
                    findings.error(
                        codes::DANGLING_REFERENCE,
                        format!("steps[{}].section", i),
                        format!("step '{}' references section '{}' not listed in 'sections'", step.id, section),
                    );
                }
            }
        }

        for (i, rule) in rules.iter().enumerate() {
            if !field_ids.contains(rule.field.as_str()) {
                findings.error(
                    codes::DANGLING_REFERENCE,
                    format!("rules[{}].field", i),
                    format!("rule '{}' tests undeclared field '{}'", rule.id, rule.field),
                );
            }
            for (j, target) in rule.require.iter().enumerate() {
                if !field_ids.contains(target.as_str()) {
                    findings.error(
                        codes::DANGLING_REFERENCE,
                        format!("rules[{}].require[{}]", i, j),
                        format!("rule '{}' requires undeclared field '{}'", rule.id, target),
                    );
                }
            }
        }

        let placed: HashSet<&str> = steps
            .iter()
            .flat_map(|s| s.fields.iter().map(String::as_str))
            .collect();
        for (i, field) in fields.iter().enumerate() {
            if field.required && !placed.contains(field.id.as_str()) {
                findings.error(
                    codes::REQUIRED_FIELD_UNPLACED,
                    format!("fields[{}]", i),
                    format!("required field '{}' is not collected by any step", field.id),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn valid_definition() -> Value {
        json!({
            "schemeId": "SCM-TEST",
            "name": "Vendor onboarding",
            "description": "Collects registration details",
            "fields": [
                { "id": "company_name", "label": "Company name", "type": "text", "required": true },
                { "id": "is_registered", "label": "GST registered?", "type": "boolean" },
                { "id": "gst_number", "label": "GST number", "type": "text" },
                { "id": "turnover_band", "label": "Turnover", "type": "select", "options": ["small", "large"] }
            ],
            "steps": [
                { "id": "company", "title": "Company", "fields": ["company_name", "is_registered"], "section": "SEC-INTRO", "next": "tax" },
                { "id": "tax", "title": "Tax", "fields": ["gst_number", "turnover_band"] }
            ],
            "rules": [
                { "id": "gst_when_registered", "field": "is_registered", "operator": "equals", "value": true, "require": ["gst_number"] }
            ],
            "sections": ["SEC-INTRO"]
        })
    }

    fn codes_of(issues: &[ValidationIssue]) -> Vec<&str> {
        issues.iter().map(|i| i.code.as_str()).collect()
    }

    #[test]
    fn test_valid_definition_normalizes() {
        let report = DefinitionValidator::new().validate(&valid_definition());

        assert!(report.is_valid(), "unexpected errors: {:?}", report.errors);
        assert!(report.warnings.is_empty(), "unexpected warnings: {:?}", report.warnings);

        let definition = report.normalized.unwrap();
        assert_eq!(definition.scheme_id, "SCM-TEST");
        assert_eq!(definition.fields.len(), 4);
        assert_eq!(definition.steps[0].next.as_deref(), Some("tax"));
        assert_eq!(definition.rules[0].operator, RuleOperator::Equals);
    }

    #[test]
    fn test_non_object_is_malformed() {
        for raw in [json!([1, 2]), json!("text"), json!(null)] {
            let report = DefinitionValidator::new().validate(&raw);
            assert!(report.normalized.is_none());
            assert_eq!(codes_of(&report.errors), vec![codes::MALFORMED_INPUT]);
        }
    }

    #[test]
    fn test_missing_required_keys() {
        let report = DefinitionValidator::new().validate(&json!({ "schemeId": "SCM-TEST" }));

        assert!(report.normalized.is_none());
        let paths: Vec<&str> = report.errors.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"name"));
        assert!(paths.contains(&"fields"));
        assert!(paths.contains(&"steps"));
    }

    #[test]
    fn test_duplicate_ids_are_errors() {
        let mut raw = valid_definition();
        raw["fields"][2]["id"] = json!("company_name");

        let report = DefinitionValidator::new().validate(&raw);
        assert!(report.normalized.is_none());
        assert!(codes_of(&report.errors).contains(&codes::DUPLICATE_ID));
    }

    #[test]
    fn test_dangling_references_are_errors() {
        let mut raw = valid_definition();
        raw["steps"][1]["fields"] = json!(["gst_number", "pan_number"]);
        raw["steps"][1]["next"] = json!("review");
        raw["rules"][0]["require"] = json!(["missing_field"]);

        let report = DefinitionValidator::new().validate(&raw);
        let dangling: Vec<&str> = report
            .errors
            .iter()
            .filter(|e| e.code == codes::DANGLING_REFERENCE)
            .map(|e| e.path.as_str())
            .collect();
        assert_eq!(dangling, vec!["steps[1].fields[1]", "steps[1].next", "rules[0].require[0]"]);
    }

    #[test]
    fn test_step_section_must_be_a_declared_slot() {
        let mut raw = valid_definition();
        raw["sections"] = json!(["SEC-OTHER"]);

        let report = DefinitionValidator::new().validate(&raw);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].path, "steps[0].section");
    }

    #[test]
    fn test_unknown_type_and_missing_options() {
        let mut raw = valid_definition();
        raw["fields"][1]["type"] = json!("checkbox");
        raw["fields"][3]["options"] = json!([]);

        let report = DefinitionValidator::new().validate(&raw);
        let found = codes_of(&report.errors);
        assert!(found.contains(&codes::UNKNOWN_TYPE));
        assert!(found.contains(&codes::MISSING_OPTIONS));
    }

    #[test]
    fn test_required_field_must_be_placed() {
        let mut raw = valid_definition();
        raw["steps"][0]["fields"] = json!(["is_registered"]);

        let report = DefinitionValidator::new().validate(&raw);
        assert_eq!(codes_of(&report.errors), vec![codes::REQUIRED_FIELD_UNPLACED]);
    }

    #[test]
    fn test_deprecations_warn_and_normalize() {
        let mut raw = valid_definition();
        let obj = raw.as_object_mut().unwrap();
        let name = obj.remove("name").unwrap();
        obj.insert("title".to_string(), name);
        raw["fields"][2]["type"] = json!("upload");
        raw["fields"][1]["deprecated"] = json!(true);

        let report = DefinitionValidator::new().validate(&raw);
        assert!(report.is_valid(), "unexpected errors: {:?}", report.errors);
        assert_eq!(
            codes_of(&report.warnings),
            vec![codes::DEPRECATED, codes::DEPRECATED, codes::DEPRECATED]
        );

        let definition = report.normalized.unwrap();
        assert_eq!(definition.name, "Vendor onboarding");
        assert_eq!(definition.fields[2].field_type, FieldType::File);
    }

    #[test]
    fn test_style_and_empty_collection_warnings() {
        let mut raw = valid_definition();
        raw["fields"][0]["id"] = json!("CompanyName");
        raw["steps"][0]["fields"] = json!(["CompanyName", "is_registered"]);
        raw["rules"] = json!([]);
        raw["extra"] = json!(1);

        let report = DefinitionValidator::new().validate(&raw);
        assert!(report.is_valid(), "unexpected errors: {:?}", report.errors);
        let found = codes_of(&report.warnings);
        assert!(found.contains(&codes::NAMING_STYLE));
        assert!(found.contains(&codes::EMPTY_COLLECTION));
        assert!(found.contains(&codes::UNKNOWN_KEY));
    }

    #[test]
    fn test_wrong_types_are_errors() {
        let mut raw = valid_definition();
        raw["fields"][0]["required"] = json!("yes");
        raw["steps"] = json!({ "id": "not-an-array" });

        let report = DefinitionValidator::new().validate(&raw);
        let wrong: Vec<&str> = report
            .errors
            .iter()
            .filter(|e| e.code == codes::WRONG_TYPE)
            .map(|e| e.path.as_str())
            .collect();
        assert!(wrong.contains(&"fields[0].required"));
        assert!(wrong.contains(&"steps"));
    }

    #[test]
    fn test_validation_is_deterministic() {
        let validator = DefinitionValidator::new();
        let first = validator.validate(&valid_definition());
        let second = validator.validate(&valid_definition());
        assert_eq!(first.normalized, second.normalized);
    }
}
