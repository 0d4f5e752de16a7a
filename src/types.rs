use std::fmt;

/// Static type of a variable, parameter, or native return value.
///
/// `Void` is only valid in return position; `Native` wraps a host-defined
/// type tag originating from the `native<tag>` source syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarType {
    Int,
    Long,
    Str,
    Bool,
    Void,
    Native(String),
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarType::Int => write!(f, "int"),
            VarType::Long => write!(f, "long"),
            VarType::Str => write!(f, "string"),
            VarType::Bool => write!(f, "bool"),
            VarType::Void => write!(f, "void"),
            VarType::Native(tag) => write!(f, "native<{tag}>"),
        }
    }
}

/// Resolves a variable-position type spelling. `void` is rejected here.
pub fn resolve_var_type(text: &str) -> Option<VarType> {
    match text {
        "int" => Some(VarType::Int),
        "long" => Some(VarType::Long),
        "string" => Some(VarType::Str),
        "bool" => Some(VarType::Bool),
        _ => text
            .strip_prefix("native<")
            .and_then(|rest| rest.strip_suffix('>'))
            .map(|tag| VarType::Native(tag.to_string())),
    }
}

/// Resolves a return-position type spelling; accepts everything
/// [`resolve_var_type`] does plus `void`.
pub fn resolve_type(text: &str) -> Option<VarType> {
    match text {
        "void" => Some(VarType::Void),
        _ => resolve_var_type(text),
    }
}

/// Renders an argument type list the way diagnostics print call signatures.
pub fn type_list_to_string(types: &[VarType]) -> String {
    types
        .iter()
        .map(VarType::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
