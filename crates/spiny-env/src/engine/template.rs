//! Command templates: `{envpython} -m pytest {projectdir}/tests`.
//!
//! A template is split into arguments first (single and double quotes group,
//! backslash escapes) and placeholders are substituted inside each argument,
//! so a path containing spaces stays one argument.

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Unterminated quote in command {0:?}")]
    UnterminatedQuote(String),

    #[error("Empty command")]
    Empty,
}

/// Values substituted into command templates.
#[derive(Debug, Clone, Copy)]
pub struct Placeholders<'a> {
    pub basepython: &'a Path,
    pub envdir: &'a Path,
    pub envpython: &'a Path,
    pub projectdir: &'a Path,
    pub changedir: &'a Path,
}

impl Placeholders<'_> {
    fn substitute(&self, arg: &str) -> String {
        if !arg.contains('{') {
            return arg.to_string();
        }
        [
            ("{basepython}", self.basepython),
            ("{envdir}", self.envdir),
            ("{envpython}", self.envpython),
            ("{projectdir}", self.projectdir),
            ("{changedir}", self.changedir),
        ]
        .into_iter()
        .fold(arg.to_string(), |acc, (key, value)| {
            acc.replace(key, &value.to_string_lossy())
        })
    }
}

/// Split a command line the way a POSIX shell would, without expansions.
pub fn split_command(line: &str) -> Result<Vec<String>, TemplateError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            '\'' => {
                in_arg = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err(TemplateError::UnterminatedQuote(line.to_string())),
                    }
                }
            }
            '"' => {
                in_arg = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\')) => current.push(c),
                            Some(c) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => {
                                return Err(TemplateError::UnterminatedQuote(line.to_string()))
                            }
                        },
                        Some(c) => current.push(c),
                        None => return Err(TemplateError::UnterminatedQuote(line.to_string())),
                    }
                }
            }
            '\\' => {
                in_arg = true;
                if let Some(c) = chars.next() {
                    current.push(c);
                }
            }
            c => {
                in_arg = true;
                current.push(c);
            }
        }
    }
    if in_arg {
        args.push(current);
    }
    Ok(args)
}

/// Split `template` and substitute placeholders into every argument.
pub fn render(template: &str, values: &Placeholders<'_>) -> Result<Vec<String>, TemplateError> {
    let args = split_command(template)?;
    if args.is_empty() {
        return Err(TemplateError::Empty);
    }
    Ok(args.iter().map(|a| values.substitute(a)).collect())
}
