use std::path::PathBuf;

use anyhow::{bail, Context};
use cilsplice::prelude::*;

pub struct PatchOptions {
    pub path: PathBuf,
    pub output: Option<PathBuf>,
    pub search_dirs: Vec<PathBuf>,
    pub plan: PathBuf,
    pub container: String,
    pub router_type: String,
    pub router_field: String,
}

#[derive(Debug)]
enum PlanEntry {
    Splice(SpliceSpec),
    Marker(MarkerSpec),
}

/// Split a `Namespace.Type::Method` target into its two halves.
fn parse_target(text: &str) -> anyhow::Result<(String, String)> {
    match text.split_once("::") {
        Some((ty, method)) if !ty.is_empty() && !method.is_empty() => {
            Ok((ty.to_string(), method.to_string()))
        }
        _ => bail!("expected Type::Method, found {text:?}"),
    }
}

/// Parse one plan line. Grammar:
///
/// ```text
/// hook <Type>::<Method> <prefix|postfix|both> [params=N] [suffix=S]
/// marker <Type>::<Method> "<literal>"
/// ```
///
/// Blank lines and lines starting with `#` are skipped.
fn parse_line(line: &str) -> anyhow::Result<Option<PlanEntry>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut words = line.split_whitespace();
    match words.next() {
        Some("hook") => {
            let target = words.next().context("hook line is missing a target")?;
            let (target_type, method_name) = parse_target(target)?;
            let role = words.next().context("hook line is missing a role")?;
            let (prefix, postfix) = match role {
                "prefix" => (true, false),
                "postfix" => (false, true),
                "both" => (true, true),
                other => bail!("unknown hook role {other:?} (expected prefix, postfix, or both)"),
            };

            let mut selector = MethodSelector::Any;
            let mut suffix = None;
            for option in words {
                if let Some(count) = option.strip_prefix("params=") {
                    let count: usize = count
                        .parse()
                        .with_context(|| format!("invalid params count in {option:?}"))?;
                    selector = MethodSelector::ParamCount(count);
                } else if let Some(value) = option.strip_prefix("suffix=") {
                    suffix = Some(value.to_string());
                } else {
                    bail!("unknown hook option {option:?}");
                }
            }

            Ok(Some(PlanEntry::Splice(SpliceSpec {
                target_type,
                method_name,
                selector,
                suffix,
                prefix,
                postfix,
            })))
        }
        Some("marker") => {
            let target = words.next().context("marker line is missing a target")?;
            let (target_type, method_name) = parse_target(target)?;
            let rest = line
                .split_once(target)
                .map(|(_, rest)| rest.trim())
                .unwrap_or("");
            let literal = rest
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .with_context(|| format!("marker literal must be double-quoted, found {rest:?}"))?;

            Ok(Some(PlanEntry::Marker(MarkerSpec {
                target_type,
                method_name,
                selector: MethodSelector::Any,
                literal: literal.to_string(),
            })))
        }
        Some(other) => bail!("unknown plan directive {other:?}"),
        None => Ok(None),
    }
}

fn parse_plan(text: &str) -> anyhow::Result<Vec<PlanEntry>> {
    let mut entries = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let entry =
            parse_line(line).with_context(|| format!("plan line {}: {line:?}", number + 1))?;
        if let Some(entry) = entry {
            entries.push(entry);
        }
    }
    Ok(entries)
}

pub fn run(opts: &PatchOptions) -> anyhow::Result<()> {
    let plan_text = std::fs::read_to_string(&opts.plan)
        .with_context(|| format!("failed to read plan {}", opts.plan.display()))?;
    let entries = parse_plan(&plan_text)?;
    if entries.is_empty() {
        bail!("plan {} contains no splices", opts.plan.display());
    }

    let wiring = HookWiring {
        container: opts.container.clone(),
        router_type: opts.router_type.clone(),
        router_field: opts.router_field.clone(),
    };
    let mut session = RewriteSession::open(&opts.path, wiring)
        .with_context(|| format!("failed to load {}", opts.path.display()))?;

    // With search directories configured, every declared dependency must
    // resolve at a satisfying version before any splice is attempted.
    if !opts.search_dirs.is_empty() {
        let mut resolver = ImageResolver::new();
        for dir in &opts.search_dirs {
            resolver.add_search_dir(dir);
        }
        for dep in &session.image().assembly_refs {
            resolver
                .resolve(&dep.name, &dep.version)
                .with_context(|| format!("unresolved dependency {}", dep.name))?;
        }
    }

    session.install_hook_container()?;

    for entry in &entries {
        match entry {
            PlanEntry::Splice(spec) => session
                .splice(spec)
                .with_context(|| format!("splicing {}::{}", spec.target_type, spec.method_name))?,
            PlanEntry::Marker(spec) => session.splice_marker(spec).with_context(|| {
                format!("splicing marker in {}::{}", spec.target_type, spec.method_name)
            })?,
        }
    }

    let output = opts.output.clone().unwrap_or_else(|| opts.path.clone());
    session
        .commit(&output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    log::info!("wrote {} ({} splices)", output.display(), entries.len());
    Ok(())
}
