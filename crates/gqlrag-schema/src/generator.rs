//! DSL generation.
//!
//! Turns every root query and mutation field of a [`TypeGraph`] into one
//! [`DslRecord`]: a parameterized operation template plus the metadata used
//! for retrieval.

use std::collections::{BTreeMap, BTreeSet};

use gqlrag_core::{
    DslRecord, FieldDef, GenerationConflict, OperationKind, SchemaError, SchemaTypeKind,
    TypeGraph, identifier_words, is_builtin_scalar,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::template::analyze;

/// Configuration for DSL generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Operations to skip. Entries match the field name or the DSL name; a
    /// trailing `*` matches by prefix.
    pub denylist: Vec<String>,
    /// Levels of nested selection below the root field
    pub selection_depth: usize,
    /// Emit `type_definitions` for related types
    pub include_type_definitions: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            denylist: Vec::new(),
            selection_depth: 2,
            include_type_definitions: true,
        }
    }
}

/// Output of one generation run.
#[derive(Debug, Clone, Default)]
pub struct GenerationReport {
    /// Records sorted by name
    pub records: Vec<DslRecord>,
    /// Name collisions and how they were resolved
    pub conflicts: Vec<GenerationConflict>,
    /// Base names of operations skipped by the denylist
    pub excluded: Vec<String>,
}

/// Generates DSL records from a schema.
pub struct DslGenerator {
    config: GeneratorConfig,
}

struct Operation<'g> {
    kind: OperationKind,
    field: &'g FieldDef,
    signature: String,
}

impl DslGenerator {
    /// Create a generator.
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    /// Generate one record per non-excluded root operation.
    pub fn generate(&self, graph: &TypeGraph) -> Result<GenerationReport, SchemaError> {
        let mut report = GenerationReport::default();
        let mut groups: BTreeMap<String, Vec<Operation<'_>>> = BTreeMap::new();

        for kind in OperationKind::ALL {
            for field in graph.root_operations(kind) {
                let base = format!("{kind}_{}", snake_case(&field.name));
                if self.is_denied(&field.name, &base) {
                    debug!("Excluding {} by denylist", base);
                    report.excluded.push(base);
                    continue;
                }
                groups.entry(base).or_default().push(Operation {
                    kind,
                    field,
                    signature: signature(field),
                });
            }
        }

        let mut taken: BTreeSet<String> = groups.keys().cloned().collect();
        let mut named = Vec::new();

        for (base, mut operations) in groups {
            if operations.len() == 1 {
                named.extend(operations.into_iter().map(|op| (base.clone(), op)));
                continue;
            }

            operations.sort_by(|a, b| a.signature.cmp(&b.signature));
            let mut resolved = vec![base.clone()];
            for op in operations.iter().skip(1) {
                let name = resolve_name(&base, op.field, &taken);
                taken.insert(name.clone());
                resolved.push(name);
            }

            let conflict = GenerationConflict {
                base_name: base,
                operations: operations.iter().map(|op| op.signature.clone()).collect(),
                resolved: resolved.clone(),
            };
            warn!("{}", conflict);
            report.conflicts.push(conflict);

            named.extend(resolved.into_iter().zip(operations));
        }

        for (name, op) in named {
            report.records.push(self.build_record(graph, name, &op)?);
        }
        report.records.sort_by(|a, b| a.dsl_name.cmp(&b.dsl_name));

        info!(
            "Generated {} DSL records ({} conflicts, {} excluded)",
            report.records.len(),
            report.conflicts.len(),
            report.excluded.len()
        );
        Ok(report)
    }

    fn is_denied(&self, field_name: &str, dsl_name: &str) -> bool {
        self.config.denylist.iter().any(|entry| match entry.strip_suffix('*') {
            Some(prefix) => field_name.starts_with(prefix) || dsl_name.starts_with(prefix),
            None => entry == field_name || entry == dsl_name,
        })
    }

    fn build_record(
        &self,
        graph: &TypeGraph,
        dsl_name: String,
        op: &Operation<'_>,
    ) -> Result<DslRecord, SchemaError> {
        let field = op.field;
        let variables: Vec<String> = field.arguments.iter().map(|a| a.name.clone()).collect();
        let query_template = self.render_template(graph, op.kind, &dsl_name, field);

        let info = analyze(&query_template).map_err(|e| {
            SchemaError::Invalid(format!("generated template for {dsl_name} is invalid: {e}"))
        })?;
        info.check_consistency().map_err(|reason| {
            SchemaError::Invalid(format!("generated template for {dsl_name}: {reason}"))
        })?;

        let return_type = field.field_type.named().to_string();
        let related_types = related_types(graph, field);
        let type_definitions = if self.config.include_type_definitions {
            type_definitions(graph, &related_types)
        } else {
            BTreeMap::new()
        };

        let record = DslRecord {
            description: field
                .description
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map_or_else(|| format!("{} {}", op.kind, field.name), str::to_string),
            keywords: keywords(&field.name, &return_type),
            dsl_name,
            kind: op.kind,
            query_template,
            variables,
            related_types,
            return_type,
            type_definitions,
        };
        record.validate()?;

        debug!("Generated {}", record.dsl_name);
        Ok(record)
    }

    fn render_template(
        &self,
        graph: &TypeGraph,
        kind: OperationKind,
        dsl_name: &str,
        field: &FieldDef,
    ) -> String {
        let mut out = format!("{kind} {}", pascal_case(dsl_name));

        if !field.arguments.is_empty() {
            let declarations: Vec<String> = field
                .arguments
                .iter()
                .map(|arg| match &arg.default_value {
                    Some(default) => format!("${}: {} = {default}", arg.name, arg.value_type),
                    None => format!("${}: {}", arg.name, arg.value_type),
                })
                .collect();
            out.push('(');
            out.push_str(&declarations.join(", "));
            out.push(')');
        }

        out.push_str(" {\n  ");
        out.push_str(&field.name);
        if !field.arguments.is_empty() {
            let bindings: Vec<String> = field
                .arguments
                .iter()
                .map(|arg| format!("{}: ${}", arg.name, arg.name))
                .collect();
            out.push('(');
            out.push_str(&bindings.join(", "));
            out.push(')');
        }

        let return_type = field.field_type.named();
        if graph.is_composite(return_type) {
            let mut path = vec![return_type.to_string()];
            out.push_str(" {\n");
            self.render_selection(graph, return_type, self.config.selection_depth, 2, &mut path, &mut out);
            out.push_str("  }");
        }
        out.push_str("\n}\n");
        out
    }

    /// Append the selection lines for `type_name` at `indent` levels.
    fn render_selection(
        &self,
        graph: &TypeGraph,
        type_name: &str,
        depth: usize,
        indent: usize,
        path: &mut Vec<String>,
        out: &mut String,
    ) {
        let pad = "  ".repeat(indent);
        let Some(ty) = graph.get(type_name) else {
            out.push_str(&format!("{pad}__typename\n"));
            return;
        };

        if ty.kind == SchemaTypeKind::Union {
            out.push_str(&format!("{pad}__typename\n"));
            for member in &ty.possible_types {
                if path.contains(member) {
                    continue;
                }
                out.push_str(&format!("{pad}... on {member} {{\n"));
                path.push(member.clone());
                self.render_selection(graph, member, depth, indent + 1, path, out);
                path.pop();
                out.push_str(&format!("{pad}}}\n"));
            }
            return;
        }

        let mut selected = 0;
        for field in &ty.fields {
            if field.arguments.iter().any(|a| a.is_required()) {
                continue;
            }
            let target = field.field_type.named();
            if graph.is_leaf(target) {
                out.push_str(&format!("{pad}{}\n", field.name));
                selected += 1;
            } else if depth > 1 && graph.is_composite(target) && !path.iter().any(|p| p == target) {
                out.push_str(&format!("{pad}{} {{\n", field.name));
                path.push(target.to_string());
                self.render_selection(graph, target, depth - 1, indent + 1, path, out);
                path.pop();
                out.push_str(&format!("{pad}}}\n"));
                selected += 1;
            }
        }

        if selected == 0 {
            out.push_str(&format!("{pad}__typename\n"));
        }
    }
}

impl Default for DslGenerator {
    fn default() -> Self {
        Self::new(GeneratorConfig::default())
    }
}

/// `field(arg: Type, ...): Return`
fn signature(field: &FieldDef) -> String {
    let args: Vec<String> = field
        .arguments
        .iter()
        .map(|a| format!("{}: {}", a.name, a.value_type))
        .collect();
    format!("{}({}): {}", field.name, args.join(", "), field.field_type)
}

/// Name for a colliding operation that lost the base name.
fn resolve_name(base: &str, field: &FieldDef, taken: &BTreeSet<String>) -> String {
    if !field.arguments.is_empty() {
        let args: Vec<String> = field.arguments.iter().map(|a| snake_case(&a.name)).collect();
        let candidate = format!("{base}_with_{}", args.join("_and_"));
        if !taken.contains(&candidate) {
            return candidate;
        }
    }

    (2..)
        .map(|n| format!("{base}_{n}"))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}

/// `boardTemplates` -> `board_templates`
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev: Option<char> = None;

    for c in name.chars() {
        if c.is_ascii_uppercase() {
            if prev.is_some_and(|p| p.is_ascii_lowercase() || p.is_ascii_digit()) {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
        prev = Some(c);
    }

    out.trim_matches('_').to_string()
}

/// `query_board_templates` -> `QueryBoardTemplates`
fn pascal_case(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

fn keywords(field_name: &str, return_type: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    identifier_words(field_name)
        .into_iter()
        .chain(identifier_words(return_type))
        .filter(|word| seen.insert(word.clone()))
        .collect()
}

/// Return type plus every non-built-in type reachable from the arguments, first-seen order.
fn related_types(graph: &TypeGraph, field: &FieldDef) -> Vec<String> {
    let mut related = Vec::new();
    let return_type = field.field_type.named();
    if !is_builtin_scalar(return_type) {
        related.push(return_type.to_string());
    }

    let mut stack: Vec<String> = field
        .arguments
        .iter()
        .rev()
        .map(|a| a.value_type.named().to_string())
        .collect();

    while let Some(name) = stack.pop() {
        if is_builtin_scalar(&name) || related.contains(&name) {
            continue;
        }
        if let Some(ty) = graph.get(&name) {
            stack.extend(
                ty.input_fields
                    .iter()
                    .rev()
                    .map(|f| f.value_type.named().to_string()),
            );
        }
        related.push(name);
    }

    related
}

fn type_definitions(
    graph: &TypeGraph,
    related: &[String],
) -> BTreeMap<String, BTreeMap<String, String>> {
    related
        .iter()
        .filter_map(|name| graph.get(name))
        .filter_map(|ty| {
            let fields: BTreeMap<String, String> = ty
                .fields
                .iter()
                .map(|f| (f.name.clone(), f.field_type.to_string()))
                .chain(
                    ty.input_fields
                        .iter()
                        .map(|f| (f.name.clone(), f.value_type.to_string())),
                )
                .collect();
            (!fields.is_empty()).then(|| (ty.name.clone(), fields))
        })
        .collect()
}
