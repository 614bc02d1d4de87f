//! `{{placeholder}}` templates used for output file names and worker commands.
//!
//! Both template kinds parse their placeholders once, when the configuration is loaded, against a
//! closed set of fields. Rendering therefore never meets an unknown placeholder.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::TemplateError;
use crate::types::jobs::definition::{FilenameFields, Tag};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<F> {
    Literal(String),
    Field(F),
}

/// Splits `template` into literal text and `{{...}}` placeholders resolved by `resolve`.
fn parse_segments<F>(
    template: &str,
    resolve: impl Fn(&str) -> Option<F>,
) -> Result<Vec<Segment<F>>, TemplateError> {
    let mut segments = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        if open > 0 {
            segments.push(Segment::Literal(rest[..open].to_string()));
        }
        let after_open = &rest[open + 2..];
        let close = after_open.find("}}").ok_or_else(|| TemplateError::Unterminated(template.to_string()))?;
        let placeholder = after_open[..close].trim();
        let field = resolve(placeholder).ok_or_else(|| TemplateError::UnknownPlaceholder {
            placeholder: placeholder.to_string(),
            template: template.to_string(),
        })?;
        segments.push(Segment::Field(field));
        rest = &after_open[close + 2..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }
    Ok(segments)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilenameField {
    Start,
    End,
    Tag(Tag),
    /// Renders `<value>-` when the tag is present and nothing otherwise.
    TagWithDash(Tag),
}

impl FilenameField {
    fn resolve(placeholder: &str) -> Option<Self> {
        match placeholder {
            "start" => Some(Self::Start),
            "end" => Some(Self::End),
            other => match other.strip_suffix('-') {
                Some(tag) => Tag::from_str(tag).ok().map(Self::TagWithDash),
                None => Tag::from_str(other).ok().map(Self::Tag),
            },
        }
    }
}

/// Template producing a file name from the fields of a parsed job file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameTemplate {
    raw: String,
    segments: Vec<Segment<FilenameField>>,
}

impl FilenameTemplate {
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        Ok(Self { raw: template.to_string(), segments: parse_segments(template, FilenameField::resolve)? })
    }

    pub fn render(&self, fields: &FilenameFields) -> String {
        let mut out = String::with_capacity(self.raw.len() + 16);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(FilenameField::Start) => out.push_str(&fields.start.to_string()),
                Segment::Field(FilenameField::End) => out.push_str(&fields.end.to_string()),
                Segment::Field(FilenameField::Tag(tag)) => out.push_str(fields.tag(*tag).unwrap_or_default()),
                Segment::Field(FilenameField::TagWithDash(tag)) => {
                    if let Some(value) = fields.tag(*tag) {
                        out.push_str(value);
                        out.push('-');
                    }
                }
            }
        }
        out
    }
}

impl fmt::Display for FilenameTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CommandField {
    /// `{{in_file}}` is `{{in_file_0}}`
    InFile(usize),
    OutFile(usize),
    Job,
    Start,
    End,
}

impl CommandField {
    fn resolve(placeholder: &str) -> Option<Self> {
        match placeholder {
            "in_file" => Some(Self::InFile(0)),
            "out_file" => Some(Self::OutFile(0)),
            "job" => Some(Self::Job),
            "start" => Some(Self::Start),
            "end" => Some(Self::End),
            other => {
                if let Some(index) = other.strip_prefix("in_file_") {
                    index.parse().ok().map(Self::InFile)
                } else if let Some(index) = other.strip_prefix("out_file_") {
                    index.parse().ok().map(Self::OutFile)
                } else {
                    None
                }
            }
        }
    }
}

/// Values substituted into a worker command.
#[derive(Debug, Clone)]
pub struct CommandContext<'a> {
    pub job: &'a str,
    pub start: u64,
    pub end: u64,
    pub in_files: &'a [PathBuf],
    pub out_files: &'a [PathBuf],
}

/// Worker command template, e.g. `prover prove --in {{in_file}} --out {{out_file}}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    raw: String,
    segments: Vec<Segment<CommandField>>,
}

impl CommandTemplate {
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        Ok(Self { raw: template.to_string(), segments: parse_segments(template, CommandField::resolve)? })
    }

    /// Checks that every indexed placeholder fits a job with the given number of inputs and outputs.
    pub fn check_arity(&self, num_inputs: usize, num_outputs: usize) -> Result<(), TemplateError> {
        for segment in &self.segments {
            match segment {
                Segment::Field(CommandField::InFile(index)) if *index >= num_inputs => {
                    return Err(TemplateError::IndexOutOfRange {
                        placeholder: format!("in_file_{index}"),
                        index: *index,
                        available: num_inputs,
                    });
                }
                Segment::Field(CommandField::OutFile(index)) if *index >= num_outputs => {
                    return Err(TemplateError::IndexOutOfRange {
                        placeholder: format!("out_file_{index}"),
                        index: *index,
                        available: num_outputs,
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn render(&self, ctx: &CommandContext<'_>) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.raw.len() + 64);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(CommandField::InFile(index)) => out.push_str(&path_at(ctx.in_files, *index, "in_file")?),
                Segment::Field(CommandField::OutFile(index)) => {
                    out.push_str(&path_at(ctx.out_files, *index, "out_file")?)
                }
                Segment::Field(CommandField::Job) => out.push_str(ctx.job),
                Segment::Field(CommandField::Start) => out.push_str(&ctx.start.to_string()),
                Segment::Field(CommandField::End) => out.push_str(&ctx.end.to_string()),
            }
        }
        Ok(out)
    }
}

fn path_at(paths: &[PathBuf], index: usize, name: &str) -> Result<String, TemplateError> {
    paths.get(index).map(|p| p.display().to_string()).ok_or_else(|| TemplateError::IndexOutOfRange {
        placeholder: format!("{name}_{index}"),
        index,
        available: paths.len(),
    })
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
