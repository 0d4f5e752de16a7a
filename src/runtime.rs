use std::collections::HashSet;

use thiserror::Error;

use crate::types::{VarType, resolve_type, resolve_var_type};

/// Host-side declarations the compiler resolves scripts against: callable
/// native functions and subscribable listeners, each addressed by a
/// host-assigned internal id. Function and listener ids live in separate
/// namespaces.
#[derive(Debug, Default, PartialEq)]
pub struct RuntimeManifest {
    pub functions: Vec<NativeFunction>,
    pub listeners: Vec<Listener>,
}

#[derive(Debug, PartialEq)]
pub struct NativeFunction {
    pub name: String,
    pub params: Vec<Parameter>,
    pub return_type: VarType,
    pub internal_id: i32,
}

#[derive(Debug, PartialEq)]
pub struct Listener {
    pub name: String,
    pub params: Vec<Parameter>,
    pub internal_id: i32,
}

#[derive(Debug, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub ty: VarType,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("invalid runtime definition at line {line}")]
    MalformedLine { line: usize },
    #[error("invalid parameter type '{type_text}' at line {line}")]
    UnknownParameterType { line: usize, type_text: String },
    #[error("cannot validate runtime: {kind} '{name}' has negative internal ID {id}")]
    NegativeId {
        kind: &'static str,
        name: String,
        id: i64,
    },
    #[error("cannot validate runtime: {kind} '{name}' reuses internal ID {id}")]
    DuplicateId {
        kind: &'static str,
        name: String,
        id: i32,
    },
}

const HEAD_WORDS: [&str; 6] = ["void", "int", "long", "string", "bool", "listener"];

/// Parses the line-oriented `.arl` manifest format:
///
/// ```text
/// # comment
/// listener button_pressed(int id) -> 3;
/// void log(string message) -> 0;
/// ```
pub fn parse_manifest(data: &str) -> Result<RuntimeManifest, ManifestError> {
    let mut manifest = RuntimeManifest::default();

    for (index, raw_line) in data.lines().enumerate() {
        let line_number = index + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
            continue;
        }

        let entry = parse_line(line, line_number)?;
        match entry {
            Entry::Listener(listener) => manifest.listeners.push(listener),
            Entry::Function(function) => manifest.functions.push(function),
        }
    }

    validate(&manifest)?;
    Ok(manifest)
}

enum Entry {
    Function(NativeFunction),
    Listener(Listener),
}

fn parse_line(line: &str, line_number: usize) -> Result<Entry, ManifestError> {
    let malformed = || ManifestError::MalformedLine { line: line_number };

    let body = line.strip_suffix(';').ok_or_else(malformed)?.trim_end();
    let (signature, id_text) = body.rsplit_once("->").ok_or_else(malformed)?;
    let id: i64 = id_text.trim().parse().map_err(|_| malformed())?;

    let signature = signature.trim_end();
    let open = signature.find('(').ok_or_else(malformed)?;
    let params_text = signature[open + 1..]
        .strip_suffix(')')
        .ok_or_else(malformed)?;

    let mut head_and_name = signature[..open].split_whitespace();
    let head = head_and_name.next().ok_or_else(malformed)?;
    let name = head_and_name.next().ok_or_else(malformed)?;
    if head_and_name.next().is_some()
        || !HEAD_WORDS.contains(&head)
        || !is_identifier(name)
    {
        return Err(malformed());
    }

    let kind = if head == "listener" { "listener" } else { "function" };
    if id < 0 {
        return Err(ManifestError::NegativeId {
            kind,
            name: name.to_string(),
            id,
        });
    }
    let id = i32::try_from(id).map_err(|_| malformed())?;

    let params = parse_parameters(params_text, line_number)?;

    if head == "listener" {
        Ok(Entry::Listener(Listener {
            name: name.to_string(),
            params,
            internal_id: id,
        }))
    } else {
        let return_type = resolve_type(head).ok_or_else(malformed)?;
        Ok(Entry::Function(NativeFunction {
            name: name.to_string(),
            params,
            return_type,
            internal_id: id,
        }))
    }
}

fn parse_parameters(text: &str, line_number: usize) -> Result<Vec<Parameter>, ManifestError> {
    let mut params = Vec::new();
    if text.trim().is_empty() {
        return Ok(params);
    }

    for piece in text.split(',') {
        let mut words = piece.split_whitespace();
        let (Some(type_text), Some(name), None) = (words.next(), words.next(), words.next())
        else {
            return Err(ManifestError::MalformedLine { line: line_number });
        };
        let ty =
            resolve_var_type(type_text).ok_or_else(|| ManifestError::UnknownParameterType {
                line: line_number,
                type_text: type_text.to_string(),
            })?;
        if !is_identifier(name) {
            return Err(ManifestError::MalformedLine { line: line_number });
        }
        params.push(Parameter {
            name: name.to_string(),
            ty,
        });
    }
    Ok(params)
}

fn is_identifier(text: &str) -> bool {
    let mut bytes = text.bytes();
    let Some(first) = bytes.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == b'_')
        && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn validate(manifest: &RuntimeManifest) -> Result<(), ManifestError> {
    let mut seen = HashSet::new();
    for function in &manifest.functions {
        if !seen.insert(function.internal_id) {
            return Err(ManifestError::DuplicateId {
                kind: "function",
                name: function.name.clone(),
                id: function.internal_id,
            });
        }
    }

    let mut seen = HashSet::new();
    for listener in &manifest.listeners {
        if !seen.insert(listener.internal_id) {
            return Err(ManifestError::DuplicateId {
                kind: "listener",
                name: listener.name.clone(),
                id: listener.internal_id,
            });
        }
    }

    Ok(())
}

impl RuntimeManifest {
    pub fn find_listener(&self, name: &str) -> Option<&Listener> {
        self.listeners.iter().find(|listener| listener.name == name)
    }

    /// Exact overload resolution: name, arity, and every positional
    /// parameter type must match. First manifest-order match wins.
    pub fn find_function(&self, name: &str, arg_types: &[VarType]) -> Option<&NativeFunction> {
        self.functions.iter().find(|function| {
            function.name == name
                && function.params.len() == arg_types.len()
                && function
                    .params
                    .iter()
                    .zip(arg_types)
                    .all(|(param, ty)| param.ty == *ty)
        })
    }

    pub fn find_function_by_id(&self, id: i32) -> Option<&NativeFunction> {
        self.functions
            .iter()
            .find(|function| function.internal_id == id)
    }
}
