use std::collections::BTreeMap;

use anyhow::Context as _;

pub(crate) type EnvVars = BTreeMap<String, String>;

/// Process environment with `--env KEY=VALUE` overrides applied on top.
pub(crate) fn merged_env(overrides: &[String]) -> anyhow::Result<EnvVars> {
    let mut map: EnvVars = std::env::vars().collect();

    for raw in overrides {
        let (k, v) = parse_env_override(raw)?;
        map.insert(k, v);
    }

    Ok(map)
}

fn parse_env_override(s: &str) -> anyhow::Result<(String, String)> {
    let (k, v) = s
        .split_once('=')
        .with_context(|| format!("invalid --env (expected KEY=VALUE): {s}"))?;
    if k.is_empty() {
        anyhow::bail!("invalid --env (empty KEY): {s}");
    }
    Ok((k.to_string(), v.to_string()))
}

/// Expands `${NAME}` and `${NAME:-default}`. A `$` not followed by `{` is kept as is.
pub(crate) fn expand(input: &str, env: &EnvVars) -> anyhow::Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .with_context(|| format!("unterminated `${{` in: {}", line_of(input, rest, start)))?;
        let body = &after[..end];

        let (name, default) = match body.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (body, None),
        };
        if !is_var_name(name) {
            anyhow::bail!("invalid variable name `{name}` in `${{{body}}}`");
        }

        match (env.get(name), default) {
            (Some(value), _) => out.push_str(value),
            (None, Some(default)) => out.push_str(default),
            (None, None) => anyhow::bail!(
                "environment variable `{name}` is not set (use --env {name}=VALUE or `${{{name}:-default}}`)"
            ),
        }

        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

fn is_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn line_of<'a>(input: &'a str, rest: &'a str, start: usize) -> &'a str {
    let offset = input.len() - rest.len() + start;
    let line_start = input[..offset].rfind('\n').map_or(0, |i| i + 1);
    let line_end = input[offset..].find('\n').map_or(input.len(), |i| offset + i);
    input[line_start..line_end].trim()
}
