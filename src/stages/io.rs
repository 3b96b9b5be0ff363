// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 expflow contributors

//! File and console stages

use regex::{Captures, Regex, Replacer};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::StageContext;
use crate::errors::{ExpflowError, ExpflowResult};
use crate::executors::FileStore;
use crate::stage::{fn_stage, StageRef, Value};
use crate::types::TypeExpr;

/// `string -> JSON`: read the named file and parse it
pub fn file_to_json(ctx: &StageContext) -> StageRef {
    let files = ctx.files.clone();
    fn_stage("fileToJSON", TypeExpr::string(), TypeExpr::json(), move |input| {
        read_json(files.clone(), input, "fileToJSON")
    })
}

/// `string -> string`: read the named file as text
pub fn file_to_string(ctx: &StageContext) -> StageRef {
    let files = ctx.files.clone();
    fn_stage("fileToString", TypeExpr::string(), TypeExpr::string(), move |input| {
        read_text(files.clone(), input, "fileToString")
    })
}

/// `unit -> JSON`: read a fixed file as JSON, ignoring the input
pub fn json_reader(ctx: &StageContext, path: impl Into<PathBuf>) -> StageRef {
    let files = ctx.files.clone();
    let path = path.into();
    let name = format!("JSONReader: {}", path.display());
    fn_stage(name, TypeExpr::unit(), TypeExpr::json(), move |_| {
        let input = Value::Text(path.to_string_lossy().into_owned());
        read_json(files.clone(), input, "JSONReader")
    })
}

/// `unit -> string`: read a fixed file as text, ignoring the input
pub fn file_reader(ctx: &StageContext, path: impl Into<PathBuf>) -> StageRef {
    let files = ctx.files.clone();
    let path = path.into();
    let name = format!("fileReader: {}", path.display());
    fn_stage(name, TypeExpr::unit(), TypeExpr::string(), move |_| {
        let input = Value::Text(path.to_string_lossy().into_owned());
        read_text(files.clone(), input, "fileReader")
    })
}

async fn read_json(files: Arc<dyn FileStore>, input: Value, stage: &'static str) -> ExpflowResult<Value> {
    let path = PathBuf::from(input.into_text(stage)?);
    tracing::info!("reading {} as JSON", path.display());
    let bytes = files.read(&path).await?;
    let json = serde_json::from_slice(&bytes).map_err(|e| ExpflowError::FileReadError {
        path,
        error: format!("invalid JSON: {}", e),
    })?;
    Ok(Value::Json(json))
}

async fn read_text(files: Arc<dyn FileStore>, input: Value, stage: &'static str) -> ExpflowResult<Value> {
    let path = PathBuf::from(input.into_text(stage)?);
    tracing::info!("reading {} as string", path.display());
    Ok(Value::Text(files.read_to_string(&path).await?))
}

/// `a -> a`: print the value and pass it through
pub fn console_output() -> StageRef {
    let t = TypeExpr::fresh_var();
    fn_stage("consoleOutput", t.clone(), t, |input: Value| async move {
        println!("{}", input);
        Ok::<_, ExpflowError>(input)
    })
}

/// `(a, string) -> (a, string)`: print the tag, a separator, then the value
pub fn tagged_console_output() -> StageRef {
    let t = TypeExpr::tuple(TypeExpr::fresh_var(), TypeExpr::string());
    fn_stage("taggedConsoleOutput", t.clone(), t, |input: Value| async move {
        print_tagged(input)
    })
}

fn print_tagged(input: Value) -> ExpflowResult<Value> {
    let (value, tag) = input.into_pair("taggedConsoleOutput")?;
    println!("{}", tag);
    println!("----------------");
    println!("{}", value);
    Ok(Value::pair(value, tag))
}

/// `(a, string) -> a`: write the left value to the path on the right
pub fn to_file(ctx: &StageContext) -> StageRef {
    let files = ctx.files.clone();
    let t = TypeExpr::fresh_var();
    fn_stage(
        "toFile",
        TypeExpr::tuple(t.clone(), TypeExpr::string()),
        t,
        move |input| write_pair(files.clone(), input),
    )
}

async fn write_pair(files: Arc<dyn FileStore>, input: Value) -> ExpflowResult<Value> {
    let (data, path) = input.into_pair("toFile")?;
    let path = PathBuf::from(path.into_text("toFile")?);
    write_value(files.as_ref(), &path, &data).await?;
    Ok(data)
}

/// `a -> a`: write the value to a fixed path and pass it through
pub fn file_output(ctx: &StageContext, path: impl Into<PathBuf>) -> StageRef {
    let files = ctx.files.clone();
    let path = path.into();
    let t = TypeExpr::fresh_var();
    fn_stage(
        format!("fileOutput: {}", path.display()),
        t.clone(),
        t,
        move |input| write_through(files.clone(), path.clone(), input),
    )
}

async fn write_through(files: Arc<dyn FileStore>, path: PathBuf, input: Value) -> ExpflowResult<Value> {
    write_value(files.as_ref(), &path, &input).await?;
    Ok(input)
}

async fn write_value(files: &dyn FileStore, path: &Path, data: &Value) -> ExpflowResult<()> {
    files.write(path, &data.to_file_contents()).await?;
    tracing::info!("written results into \"{}\"", path.display());
    Ok(())
}

fn anchored(spec: &str) -> ExpflowResult<Regex> {
    Regex::new(&format!("^(?:{})$", spec)).map_err(|e| ExpflowError::invalid_pattern(spec, e))
}

pub(crate) fn is_url(spec: &str) -> bool {
    spec.starts_with("http://") || spec.starts_with("https://")
}

/// `unit -> [string]`: names in the working directory matching `^spec$`.
///
/// A URL spec yields itself. Fails with `InvalidPattern` when `spec` is not
/// a valid regular expression.
pub fn file_inputs(ctx: &StageContext, spec: &str) -> ExpflowResult<StageRef> {
    let name = format!("fileInputs: {}", spec);
    let output_type = TypeExpr::list(TypeExpr::string());

    if is_url(spec) {
        let url = spec.to_string();
        return Ok(fn_stage(name, TypeExpr::unit(), output_type, move |_| {
            let url = url.clone();
            async move { Ok::<_, ExpflowError>(Value::List(vec![Value::Text(url)])) }
        }));
    }

    let pattern = anchored(spec)?;
    let files = ctx.files.clone();
    let dir = ctx.options.working_dir.clone();
    Ok(fn_stage(name, TypeExpr::unit(), output_type, move |_| {
        list_matching(files.clone(), dir.clone(), pattern.clone())
    }))
}

async fn list_matching(files: Arc<dyn FileStore>, dir: PathBuf, pattern: Regex) -> ExpflowResult<Value> {
    let names = files.list(&dir).await?;
    let matched: Vec<Value> = names
        .into_iter()
        .filter(|name| pattern.is_match(name))
        .map(Value::Text)
        .collect();
    if matched.is_empty() {
        tracing::warn!("no inputs match '{}'", pattern.as_str());
    }
    Ok(Value::List(matched))
}

/// `string -> string`: derive an output name from an input name.
///
/// The first match of `spec` in the input is replaced with `pattern`, read
/// as a JavaScript replacement string: `$1`..`$99` and `$<name>` refer to
/// capture groups, `$&` to the whole match, `` $` `` and `$'` to the text
/// before and after it, and `$$` is a literal `$`. Inputs that do not match
/// pass through unchanged.
pub fn output_name(spec: &str, pattern: &str) -> ExpflowResult<StageRef> {
    let regex = Regex::new(spec).map_err(|e| ExpflowError::invalid_pattern(spec, e))?;
    let pattern = pattern.to_string();
    Ok(fn_stage("outputName", TypeExpr::string(), TypeExpr::string(), move |input: Value| {
        let named = rename(&regex, &pattern, input);
        async move { named }
    }))
}

fn rename(regex: &Regex, pattern: &str, input: Value) -> ExpflowResult<Value> {
    let input = input.into_text("outputName")?;
    let template = JsTemplate {
        template: pattern,
        haystack: &input,
        named_groups: regex.capture_names().any(|name| name.is_some()),
    };
    Ok(Value::Text(regex.replacen(&input, 1, template).into_owned()))
}

/// Replacement string with JavaScript `String.prototype.replace` semantics
struct JsTemplate<'a> {
    template: &'a str,
    haystack: &'a str,
    named_groups: bool,
}

impl Replacer for JsTemplate<'_> {
    fn replace_append(&mut self, caps: &Captures<'_>, dst: &mut String) {
        let (start, end) = caps.get(0).map_or((0, 0), |m| (m.start(), m.end()));
        let group = |i: usize| caps.get(i).map_or("", |m| m.as_str());
        let mut rest = self.template;

        while let Some(pos) = rest.find('$') {
            dst.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];
            let bytes = after.as_bytes();

            let consumed = match bytes.first() {
                Some(b'$') => {
                    dst.push('$');
                    1
                }
                Some(b'&') => {
                    dst.push_str(group(0));
                    1
                }
                Some(b'`') => {
                    dst.push_str(&self.haystack[..start]);
                    1
                }
                Some(b'\'') => {
                    dst.push_str(&self.haystack[end..]);
                    1
                }
                Some(d) if d.is_ascii_digit() => {
                    let one = usize::from(d - b'0');
                    let two = bytes
                        .get(1)
                        .filter(|d2| d2.is_ascii_digit())
                        .map(|d2| one * 10 + usize::from(d2 - b'0'));
                    match two {
                        Some(n) if n >= 1 && n < caps.len() => {
                            dst.push_str(group(n));
                            2
                        }
                        _ if one >= 1 && one < caps.len() => {
                            dst.push_str(group(one));
                            1
                        }
                        _ => {
                            dst.push('$');
                            0
                        }
                    }
                }
                Some(b'<') if self.named_groups => match after.find('>') {
                    Some(close) => {
                        dst.push_str(caps.name(&after[1..close]).map_or("", |m| m.as_str()));
                        close + 1
                    }
                    None => {
                        dst.push('$');
                        0
                    }
                },
                _ => {
                    dst.push('$');
                    0
                }
            };
            rest = &after[consumed..];
        }
        dst.push_str(rest);
    }
}
