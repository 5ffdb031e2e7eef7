//! Colon-delimited command vocabulary shared by the host and the local worker.
//!
//! A command is either a bare keyword or `NAMESPACE:field:...`. Fields are split at most
//! as many times as the command has fields, so the last field keeps any delimiters it
//! contains.

pub const DELIMITER: char = ':';
pub const EXIT: &str = "EXIT";
pub const GET_CHARACTERS: &str = "GET_CHARACTERS";
pub const SAVE_BUILD_STRING: &str = "SAVE_BUILD_STRING";

const ADD_CHARACTER: &str = "ADD_CHARACTER";
const AUTO_ADD: &str = "AUTO_ADD";
const DELETE_CHARACTER: &str = "DELETE_CHARACTER";
const TOGGLE_ACTIVITY: &str = "TOGGLE_ACTIVITY";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("{namespace} expects {expected} fields, got {found}")]
    MissingFields {
        namespace: &'static str,
        expected: usize,
        found: usize,
    },
}

/// Split `line` into at most `fields` parts; errors when fewer are present.
fn split_fields<'a>(
    line: &'a str,
    namespace: &'static str,
    fields: usize,
) -> Result<Vec<&'a str>, CommandError> {
    let parts: Vec<&str> = line.splitn(fields, DELIMITER).collect();
    if parts.len() < fields {
        return Err(CommandError::MissingFields {
            namespace,
            expected: fields,
            found: parts.len(),
        });
    }
    Ok(parts)
}

fn has_namespace(line: &str, namespace: &str) -> bool {
    line.strip_prefix(namespace)
        .is_some_and(|rest| rest.starts_with(DELIMITER))
}

/// One build string keyed by class, spec and build kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildEntry {
    pub class: String,
    pub spec: String,
    pub build_type: String,
    pub build: String,
}

impl BuildEntry {
    /// Whether `line` belongs to the build-save family handled by the host.
    pub fn matches(line: &str) -> bool {
        has_namespace(line.trim(), SAVE_BUILD_STRING)
    }

    pub fn parse(line: &str) -> Result<BuildEntry, CommandError> {
        let parts = split_fields(line.trim(), SAVE_BUILD_STRING, 5)?;
        Ok(BuildEntry {
            class: parts[1].trim().to_string(),
            spec: parts[2].trim().to_string(),
            build_type: parts[3].trim().to_string(),
            build: parts[4].to_string(),
        })
    }
}

/// Requests understood by the local worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    GetCharacters,
    AddCharacter {
        region: String,
        realm: String,
        name: String,
    },
    AutoAdd {
        region: String,
        name: String,
    },
    DeleteCharacter {
        name: String,
        realm: String,
    },
    ToggleActivity {
        name: String,
        realm: String,
        activity: String,
    },
    Exit,
    Other(String),
}

impl Request {
    pub fn parse(line: &str) -> Result<Request, CommandError> {
        let line = line.trim();
        let field = |s: &str| s.trim().to_string();

        if line == GET_CHARACTERS {
            return Ok(Request::GetCharacters);
        }
        if line == EXIT {
            return Ok(Request::Exit);
        }
        if has_namespace(line, ADD_CHARACTER) {
            let p = split_fields(line, ADD_CHARACTER, 4)?;
            return Ok(Request::AddCharacter {
                region: field(p[1]),
                realm: field(p[2]),
                name: field(p[3]),
            });
        }
        if has_namespace(line, AUTO_ADD) {
            let p = split_fields(line, AUTO_ADD, 3)?;
            return Ok(Request::AutoAdd {
                region: field(p[1]),
                name: field(p[2]),
            });
        }
        if has_namespace(line, DELETE_CHARACTER) {
            let p = split_fields(line, DELETE_CHARACTER, 3)?;
            return Ok(Request::DeleteCharacter {
                name: field(p[1]),
                realm: field(p[2]),
            });
        }
        if has_namespace(line, TOGGLE_ACTIVITY) {
            let p = split_fields(line, TOGGLE_ACTIVITY, 4)?;
            return Ok(Request::ToggleActivity {
                name: field(p[1]),
                realm: field(p[2]),
                activity: field(p[3]),
            });
        }
        Ok(Request::Other(line.to_string()))
    }
}
