use std::collections::HashMap;

use tracing::trace;

use crate::spec::{ArgValue, CommandError, CommandSpec, ParamKind, ParamSpec};

/// Custom converters, keyed by the name used in `ParamKind::Custom`.
/// The server registers converters that need live state (block names,
/// online players, loaded worlds).
pub type ConverterTable =
    HashMap<&'static str, Box<dyn Fn(&str) -> Result<ArgValue, String> + Send + Sync>>;

/// Parse the tokens after the command name against the declared
/// parameters. Follows positional, rest-positional, and consume-rest
/// parameter kinds; leftover tokens are an error.
pub fn parse_args(
    spec: &CommandSpec,
    tokens: &[&str],
    converters: &ConverterTable,
) -> Result<Vec<ArgValue>, CommandError> {
    trace!(command = spec.name, ?tokens, "parsing command arguments");
    let mut values = Vec::with_capacity(spec.params.len());
    let mut cursor = 0usize;

    for param in &spec.params {
        match &param.kind {
            ParamKind::Greedy(inner) => {
                // Consume-rest: join whatever is left and coerce once.
                if cursor >= tokens.len() {
                    values.push(missing(param)?);
                } else {
                    let joined = tokens[cursor..].join(" ");
                    cursor = tokens.len();
                    values.push(coerce(param.name, inner, &joined, converters)?);
                }
            }
            ParamKind::Rest(inner) => {
                let mut items = Vec::new();
                while cursor < tokens.len() {
                    items.push(coerce(param.name, inner, tokens[cursor], converters)?);
                    cursor += 1;
                }
                values.push(ArgValue::List(items));
            }
            kind => {
                if cursor >= tokens.len() {
                    values.push(missing(param)?);
                } else {
                    values.push(coerce(param.name, kind, tokens[cursor], converters)?);
                    cursor += 1;
                }
            }
        }
    }

    if cursor < tokens.len() {
        return Err(CommandError::Usage(format!(
            "Too Many Arguments! Expected: {} Got: {}",
            spec.params.len(),
            tokens.len()
        )));
    }
    Ok(values)
}

fn missing(param: &ParamSpec) -> Result<ArgValue, CommandError> {
    match &param.default {
        Some(default) => Ok(default.clone()),
        None => Err(CommandError::Usage(format!(
            "Expected Field '{}' But Got Nothing",
            param.name
        ))),
    }
}

fn coerce(
    name: &str,
    kind: &ParamKind,
    token: &str,
    converters: &ConverterTable,
) -> Result<ArgValue, CommandError> {
    let mismatch = || {
        CommandError::Usage(format!(
            "Arg '{}' Expected {} But Got '{}'",
            name,
            kind.display_name(),
            token
        ))
    };
    match kind {
        ParamKind::Int => token
            .parse::<i32>()
            .map(ArgValue::Int)
            .map_err(|_| mismatch()),
        ParamKind::Float => token
            .parse::<f64>()
            .map(ArgValue::Float)
            .map_err(|_| mismatch()),
        ParamKind::Bool => match token.to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => Ok(ArgValue::Bool(true)),
            "false" | "f" | "no" | "n" | "0" => Ok(ArgValue::Bool(false)),
            _ => Err(mismatch()),
        },
        ParamKind::Str => Ok(ArgValue::Str(token.to_string())),
        ParamKind::Union(variants) => {
            for variant in variants {
                if let Ok(value) = coerce(name, variant, token, converters) {
                    return Ok(value);
                }
            }
            Err(mismatch())
        }
        ParamKind::Custom(converter_name) => {
            let converter = converters.get(converter_name).ok_or_else(|| {
                CommandError::Usage(format!("No Converter For Type '{converter_name}'"))
            })?;
            converter(token).map_err(CommandError::Usage)
        }
        // Rest/Greedy are unwrapped by the caller before coercion.
        ParamKind::Rest(inner) | ParamKind::Greedy(inner) => {
            coerce(name, inner, token, converters)
        }
    }
}
