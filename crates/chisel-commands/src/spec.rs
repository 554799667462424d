use thiserror::Error;

/// Errors surfaced to the invoking player as chat messages.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown Command '{0}'")]
    UnknownCommand(String),
    #[error("{0}")]
    Usage(String),
    #[error("You Are Not An Operator!")]
    NotOperator,
    #[error("This Command Is Disabled!")]
    Disabled,
}

/// A parsed command argument.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Int(i32),
    Float(f64),
    Bool(bool),
    Str(String),
    List(Vec<ArgValue>),
    None,
}

impl ArgValue {
    pub fn as_int(&self) -> Option<i32> {
        match self {
            ArgValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ArgValue::Float(v) => Some(*v),
            ArgValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArgValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ArgValue::None)
    }
}

/// The declared type of one parameter, driving coercion.
#[derive(Debug, Clone)]
pub enum ParamKind {
    Int,
    Float,
    Bool,
    Str,
    /// Consume every remaining token, coercing each to the inner kind.
    Rest(Box<ParamKind>),
    /// Join every remaining token with single spaces and coerce once.
    Greedy(Box<ParamKind>),
    /// Try each variant in order; first successful coercion wins.
    Union(Vec<ParamKind>),
    /// Resolved through the converter table at parse time (e.g. a block
    /// or world name).
    Custom(&'static str),
}

impl ParamKind {
    /// Human-readable type name used in coercion error messages.
    pub fn display_name(&self) -> String {
        match self {
            ParamKind::Int => "int".into(),
            ParamKind::Float => "float".into(),
            ParamKind::Bool => "bool".into(),
            ParamKind::Str => "str".into(),
            ParamKind::Rest(inner) => format!("{}...", inner.display_name()),
            ParamKind::Greedy(inner) => inner.display_name(),
            ParamKind::Union(variants) => variants
                .iter()
                .map(|v| v.display_name())
                .collect::<Vec<_>>()
                .join(" or "),
            ParamKind::Custom(name) => (*name).into(),
        }
    }
}

/// One declared parameter. A `default` makes the parameter optional;
/// `ArgValue::None` is the conventional default for "may be absent".
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub default: Option<ArgValue>,
}

impl ParamSpec {
    pub fn required(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            default: None,
        }
    }

    pub fn optional(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            default: Some(ArgValue::None),
        }
    }

    pub fn with_default(name: &'static str, kind: ParamKind, default: ArgValue) -> Self {
        Self {
            name,
            kind,
            default: Some(default),
        }
    }
}

/// Static description of a command: identity, gating, and parameters.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub name: &'static str,
    pub activators: Vec<&'static str>,
    pub description: &'static str,
    pub op_only: bool,
    pub params: Vec<ParamSpec>,
}

impl CommandSpec {
    pub fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            activators: Vec::new(),
            description,
            op_only: false,
            params: Vec::new(),
        }
    }

    pub fn activator(mut self, activator: &'static str) -> Self {
        self.activators.push(activator);
        self
    }

    pub fn op_only(mut self) -> Self {
        self.op_only = true;
        self
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    /// Usage line shown by /help, e.g. `/teleport <posX> <posY> <posZ>`.
    pub fn usage(&self) -> String {
        let mut out = format!("/{}", self.name);
        for param in &self.params {
            if param.default.is_some() {
                out.push_str(&format!(" [{}]", param.name));
            } else {
                out.push_str(&format!(" <{}>", param.name));
            }
        }
        out
    }
}
