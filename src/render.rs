//! Noir rendering of compiled queries.
//!
//! Produces the three files of a Nargo package: `src/sparql.nr` with the
//! query-specific `checkBinding`, `src/main.nr` from one of the embedded
//! templates, and `Nargo.toml`. Every assertion is printed from the
//! [`ConstraintProgram`] as-is; nothing here decides semantics.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::algebra::CompareOp;
use crate::error::Result;
use crate::program::{Assertion, CompiledProgramMetadata, CompiledQuery, ConstraintProgram, FieldExpr};

// Embedded so the wasm build needs no filesystem access.
const MAIN_TEMPLATE: &str = include_str!("../template/main-verify.template.nr");
const MAIN_TEMPLATE_SIMPLE: &str = include_str!("../template/main-simple.template.nr");

/// Signed 64-bit ordering of field elements. `x + 2^63` lands below `2^64`
/// exactly for the field elements that encode an `i64`; anything else makes
/// the comparison false.
const SIGNED_COMPARISONS: &str = "\
fn biased(x: Field) -> Field {
    x + 0x8000000000000000
}

fn in_i64(x: Field) -> bool {
    biased(x).lt(0x10000000000000000)
}

fn signed_lt(a: Field, b: Field) -> bool {
    in_i64(a) & in_i64(b) & biased(a).lt(biased(b))
}

fn signed_le(a: Field, b: Field) -> bool {
    in_i64(a) & in_i64(b) & !biased(b).lt(biased(a))
}
";

/// Relative location of the `consts`, `types` and `utils` Noir libraries.
pub const NOIR_LIB_PATH: &str = "../noir/lib";

const NOIR_KEYWORDS: &[&str] = &[
    "as", "assert", "assert_eq", "comptime", "constrain", "contract", "crate", "dep", "else",
    "enum", "false", "fn", "for", "global", "if", "impl", "in", "let", "loop", "mod", "mut",
    "pub", "return", "self", "struct", "trait", "true", "type", "unchecked", "unconstrained",
    "use", "where", "while",
];

/// A rendered Nargo package.
#[derive(Clone, Debug, Serialize)]
pub struct Circuit {
    pub sparql_nr: String,
    pub main_nr: String,
    pub nargo_toml: String,
    pub metadata: CompiledProgramMetadata,
}

impl Circuit {
    /// Writes the package under `dir`, creating it if needed.
    pub fn write_to(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir.join("src"))?;
        fs::write(dir.join("src/sparql.nr"), &self.sparql_nr)?;
        fs::write(dir.join("src/main.nr"), &self.main_nr)?;
        fs::write(dir.join("Nargo.toml"), &self.nargo_toml)?;
        fs::write(
            dir.join("metadata.json"),
            serde_json::to_string_pretty(&self.metadata)?,
        )?;
        info!(dir = %dir.display(), "circuit written");
        Ok(())
    }
}

/// Maps a SPARQL variable name onto a Noir identifier. Names that start with
/// a digit or collide with a keyword get a leading underscore.
pub fn noir_ident(name: &str) -> String {
    let starts_with_digit = name.chars().next().is_some_and(|c| c.is_ascii_digit());
    if starts_with_digit || NOIR_KEYWORDS.contains(&name) {
        format!("_{name}")
    } else {
        name.to_string()
    }
}

pub fn render(query: &CompiledQuery) -> Circuit {
    let has_hidden = !query.hidden_inputs.is_empty();

    let template = if query.skip_signing {
        MAIN_TEMPLATE_SIMPLE
    } else {
        MAIN_TEMPLATE
    };
    let (h0, h1, h2) = if has_hidden {
        (", Hidden", ",\n    hidden: Hidden", ", hidden")
    } else {
        ("", "", "")
    };
    let main_nr = template
        .replace("{{h0}}", h0)
        .replace("{{h1}}", h1)
        .replace("{{h2}}", h2);

    Circuit {
        sparql_nr: sparql_nr(query),
        main_nr,
        nargo_toml: nargo_toml(query.skip_signing),
        metadata: query.metadata(),
    }
}

fn sparql_nr(query: &CompiledQuery) -> String {
    let mut out = String::new();
    out.push_str("// Generated by sparql_proof\n");
    out.push_str("use dep::consts;\n");
    if query.skip_signing {
        // Triple is declared by the simple main.nr
        out.push_str("use super::Triple;\n");
    } else {
        out.push_str("use dep::types::Triple;\n");
    }
    out.push('\n');

    let _ = writeln!(out, "pub(crate) type BGP = [Triple; {}];", query.bgp_slot_count);
    out.push_str("pub(crate) struct Variables {\n");
    for v in &query.projected_variables {
        let _ = writeln!(out, "    pub(crate) {}: Field,", noir_ident(v));
    }
    out.push_str("}\n\n");

    let has_hidden = !query.hidden_inputs.is_empty();
    if has_hidden {
        let _ = writeln!(out, "pub(crate) type Hidden = [Field; {}];\n", query.hidden_inputs.len());
    }

    if query.branches.iter().any(|b| has_comparison(&b.full_assertion())) {
        out.push_str(SIGNED_COMPARISONS);
        out.push('\n');
    }

    let _ = writeln!(
        out,
        "pub(crate) fn checkBinding(bgp: BGP, variables: Variables{}) {{",
        if has_hidden { ", hidden: Hidden" } else { "" }
    );
    match query.branches.as_slice() {
        [only] => {
            for conjunct in conjuncts(only) {
                let _ = writeln!(out, "    assert({});", assertion(&conjunct));
            }
        }
        branches => {
            for (i, branch) in branches.iter().enumerate() {
                let _ = writeln!(out, "    let branch_{i} = {};", assertion(&branch.full_assertion()));
            }
            let any = (0..branches.len())
                .map(|i| format!("branch_{i}"))
                .collect::<Vec<_>>()
                .join(" | ");
            let _ = writeln!(out, "    assert({});", if any.is_empty() { "false".into() } else { any });
        }
    }
    out.push_str("}\n");
    out
}

fn conjuncts(program: &ConstraintProgram) -> Vec<Assertion> {
    match program.full_assertion() {
        Assertion::And(parts) => parts,
        Assertion::True => Vec::new(),
        other => vec![other],
    }
}

fn nargo_toml(skip_signing: bool) -> String {
    let mut out = String::from(
        "[package]\nname = \"sparql_proof\"\ntype = \"bin\"\nauthors = [\"\"]\n\n[dependencies]\n",
    );
    let libs: &[&str] = if skip_signing {
        &["consts"]
    } else {
        &["consts", "types", "utils"]
    };
    for lib in libs {
        let _ = writeln!(out, "{lib} = {{ path = \"{NOIR_LIB_PATH}/{lib}\" }}");
    }
    out
}

fn field_expr(expr: &FieldExpr) -> String {
    match expr {
        FieldExpr::Slot { slot, pos } => format!("bgp[{slot}].terms[{pos}]"),
        FieldExpr::Var(name) => format!("variables.{}", noir_ident(name)),
        FieldExpr::Hidden(i) => format!("hidden[{i}]"),
        FieldExpr::Const(f) => f.to_hex(),
        FieldExpr::Hash2(parts) => {
            let [a, b] = parts.as_ref();
            format!("consts::hash2([{}, {}])", field_expr(a), field_expr(b))
        }
        FieldExpr::Hash4(parts) => {
            let [a, b, c, d] = parts.as_ref();
            format!(
                "consts::hash4([{}, {}, {}, {}])",
                field_expr(a),
                field_expr(b),
                field_expr(c),
                field_expr(d)
            )
        }
    }
}

fn assertion(a: &Assertion) -> String {
    match a {
        Assertion::True => "true".into(),
        Assertion::False => "false".into(),
        Assertion::Eq(l, r) => format!("({} == {})", field_expr(l), field_expr(r)),
        Assertion::Compare { op, left, right } => {
            let (l, r) = (field_expr(left), field_expr(right));
            match op {
                CompareOp::Lt => format!("signed_lt({l}, {r})"),
                CompareOp::Le => format!("signed_le({l}, {r})"),
                CompareOp::Gt => format!("signed_lt({r}, {l})"),
                CompareOp::Ge => format!("signed_le({r}, {l})"),
            }
        }
        Assertion::Not(inner) => format!("!{}", assertion(inner)),
        Assertion::And(parts) => join(parts, " & "),
        Assertion::Or(parts) => join(parts, " | "),
    }
}

fn has_comparison(a: &Assertion) -> bool {
    match a {
        Assertion::Compare { .. } => true,
        Assertion::Not(inner) => has_comparison(inner),
        Assertion::And(parts) | Assertion::Or(parts) => parts.iter().any(has_comparison),
        Assertion::True | Assertion::False | Assertion::Eq(..) => false,
    }
}

fn join(parts: &[Assertion], sep: &str) -> String {
    let body = parts.iter().map(assertion).collect::<Vec<_>>().join(sep);
    format!("({body})")
}
