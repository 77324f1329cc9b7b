//! Command tags: the mutations a reply asks the executor to perform, and the
//! display wrappers stripped before the reply is shown.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::scanner::{self, escape_attr, Element};

pub const WRITE_TAG: &str = "dec-write";
pub const RENAME_TAG: &str = "dec-rename";
pub const DELETE_TAG: &str = "dec-delete";
pub const ADD_DEPENDENCY_TAG: &str = "dec-add-dependency";

pub const COMMAND_TAGS: [&str; 4] = [WRITE_TAG, RENAME_TAG, DELETE_TAG, ADD_DEPENDENCY_TAG];

pub const THINKING_TAG: &str = "thinking";
pub const CODE_TAG: &str = "dec-code";
pub const ERROR_TAG: &str = "dec-error";
pub const SUCCESS_TAG: &str = "dec-success";

/// A mutation requested by the model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Write {
        path: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Rename {
        from: String,
        to: String,
    },
    Delete {
        path: String,
    },
    AddDependency {
        package: String,
    },
}

impl Command {
    pub fn write(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Write {
            path: path.into(),
            content: content.into(),
            description: None,
        }
    }

    pub fn tag_name(&self) -> &'static str {
        match self {
            Self::Write { .. } => WRITE_TAG,
            Self::Rename { .. } => RENAME_TAG,
            Self::Delete { .. } => DELETE_TAG,
            Self::AddDependency { .. } => ADD_DEPENDENCY_TAG,
        }
    }

    /// Short human label, used in logs and error notes.
    pub fn summary(&self) -> String {
        match self {
            Self::Write { path, .. } => format!("write {path}"),
            Self::Rename { from, to } => format!("rename {from} -> {to}"),
            Self::Delete { path } => format!("delete {path}"),
            Self::AddDependency { package } => format!("add dependency {package}"),
        }
    }

    fn from_element(el: &Element<'_>) -> Option<Self> {
        match el.name {
            WRITE_TAG => Some(Self::Write {
                path: el.required_attr("file_path")?,
                content: el.body?.trim().to_string(),
                description: el.required_attr("description"),
            }),
            RENAME_TAG => Some(Self::Rename {
                from: el.required_attr("from")?,
                to: el.required_attr("to")?,
            }),
            DELETE_TAG => Some(Self::Delete {
                path: el.required_attr("file_path")?,
            }),
            ADD_DEPENDENCY_TAG => Some(Self::AddDependency {
                package: el.required_attr("package")?,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Write {
                path,
                content,
                description,
            } => {
                write!(f, "<{WRITE_TAG} file_path=\"{}\"", escape_attr(path))?;
                if let Some(d) = description {
                    write!(f, " description=\"{}\"", escape_attr(d))?;
                }
                write!(f, ">\n{content}\n</{WRITE_TAG}>")
            }
            Self::Rename { from, to } => write!(
                f,
                "<{RENAME_TAG} from=\"{}\" to=\"{}\" />",
                escape_attr(from),
                escape_attr(to)
            ),
            Self::Delete { path } => {
                write!(f, "<{DELETE_TAG} file_path=\"{}\" />", escape_attr(path))
            }
            Self::AddDependency { package } => write!(
                f,
                "<{ADD_DEPENDENCY_TAG} package=\"{}\" />",
                escape_attr(package)
            ),
        }
    }
}

/// Commands in source order plus the user-facing text that remains.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedResponse {
    pub commands: Vec<Command>,
    pub cleaned: String,
    pub has_commands: bool,
}

/// Extract every well-formed command and produce the cleaned text.
pub fn parse_response(text: &str) -> ParsedResponse {
    let found = scanner::scan_with(text, &COMMAND_TAGS, Command::from_element);
    let stripped = scanner::remove_spans(text, found.iter().map(|m| &m.span));
    let commands: Vec<Command> = found.into_iter().map(|m| m.value).collect();
    ParsedResponse {
        has_commands: !commands.is_empty(),
        cleaned: clean_wrappers(&stripped),
        commands,
    }
}

/// Apply the wrapper rules and trim.
pub fn clean_wrappers(text: &str) -> String {
    let text = scanner::rewrite(text, &[THINKING_TAG], |el| {
        el.body.map(|_| String::new())
    });
    let text = unwrap_element(&text, CODE_TAG);
    let text = unwrap_element(&text, ERROR_TAG);
    let text = unwrap_element(&text, SUCCESS_TAG);
    text.trim().to_string()
}

fn unwrap_element(text: &str, name: &str) -> String {
    scanner::rewrite(text, &[name], |el| Some(el.body.unwrap_or_default().to_string()))
}

/// Render commands back to tags, one per paragraph.
pub fn render_commands(commands: &[Command]) -> String {
    commands
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n\n")
}
