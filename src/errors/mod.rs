//! Error taxonomy for the bridge boundary
//!
//! Every failure a host caller can observe is one of the variants below.
//! Errors are materialized at the dispatch boundary; native faults never
//! unwind across it.

use std::fmt;

pub type BridgeResult<T> = Result<T, BridgeError>;

/// What kind of name failed to resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Function,
    Class,
    Method,
    Property,
    Parameter,
    Module,
}

impl fmt::Display for NameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Method => "method",
            Self::Property => "property",
            Self::Parameter => "parameter",
            Self::Module => "module",
        };
        f.write_str(label)
    }
}

/// Position of a failing element inside a composite value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Element index in a sequence
    Index(usize),
    /// Key in a mapping (display form)
    Key(String),
    /// Slot in a fixed-arity tuple
    Slot(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "index {}", i),
            Self::Key(k) => write!(f, "key \"{}\"", k),
            Self::Slot(i) => write!(f, "slot {}", i),
        }
    }
}

/// A value could not be converted to or from its required type
///
/// Carries the expected type, the actual tag of the offending value, and
/// the path of indices/keys leading to it inside a composite.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionError {
    pub expected: String,
    pub actual: String,
    pub path: Vec<PathSegment>,
}

impl ConversionError {
    pub fn mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
            actual: actual.into(),
            path: Vec::new(),
        }
    }

    /// Wrap this error with the position of the failing element in the
    /// enclosing container.
    pub fn nested(mut self, segment: PathSegment) -> Self {
        self.path.insert(0, segment);
        self
    }
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {}, found {}", self.expected, self.actual)?;
        if !self.path.is_empty() {
            let mut first = true;
            write!(f, " (at ")?;
            for segment in &self.path {
                if !first {
                    write!(f, ", ")?;
                }
                write!(f, "{}", segment)?;
                first = false;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConversionError {}

/// Failure signal raised by native code
///
/// The message text is preserved verbatim across the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    pub message: String,
}

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for NativeError {}

/// Uniform error value returned to the host for any failed call
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// An argument or property value failed marshalling
    TypeConversion {
        parameter: String,
        position: Option<usize>,
        source: ConversionError,
    },
    /// Wrong number of positional arguments, or a required parameter
    /// missing from named arguments
    Arity {
        callable: String,
        expected: usize,
        found: usize,
    },
    /// Function, class, method, property, or parameter name not found
    UnknownName { kind: NameKind, name: String },
    /// Operation attempted on an invalid or expired handle
    ObjectHandle { class: String, reason: String },
    /// Native code signaled failure
    Native(NativeError),
    /// A captured callable does not satisfy the restricted closure grammar
    ClosureValidation { reason: String },
    /// A persisted closure could not be reconstructed
    Serialization { reason: String },
    /// Load-time registration violation (duplicate name, double load)
    Registration {
        module: Option<String>,
        name: String,
        reason: String,
    },
}

impl BridgeError {
    pub fn unknown_function(name: impl Into<String>) -> Self {
        Self::UnknownName { kind: NameKind::Function, name: name.into() }
    }

    pub fn unknown_class(name: impl Into<String>) -> Self {
        Self::UnknownName { kind: NameKind::Class, name: name.into() }
    }

    pub fn unknown_method(name: impl Into<String>) -> Self {
        Self::UnknownName { kind: NameKind::Method, name: name.into() }
    }

    pub fn unknown_property(name: impl Into<String>) -> Self {
        Self::UnknownName { kind: NameKind::Property, name: name.into() }
    }

    pub fn unknown_parameter(name: impl Into<String>) -> Self {
        Self::UnknownName { kind: NameKind::Parameter, name: name.into() }
    }

    pub fn arity(callable: impl Into<String>, expected: usize, found: usize) -> Self {
        Self::Arity { callable: callable.into(), expected, found }
    }

    pub fn native(message: impl Into<String>) -> Self {
        Self::Native(NativeError::new(message))
    }

    pub fn handle(class: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ObjectHandle { class: class.into(), reason: reason.into() }
    }

    pub fn closure_validation(reason: impl Into<String>) -> Self {
        Self::ClosureValidation { reason: reason.into() }
    }

    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization { reason: reason.into() }
    }

    pub fn registration(
        module: Option<&str>,
        name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Registration {
            module: module.map(str::to_owned),
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// True when the error originated in native code rather than in the
    /// bridge machinery itself.
    pub fn is_native(&self) -> bool {
        matches!(self, Self::Native(_))
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeConversion { parameter, position, source } => {
                write!(f, "type conversion failed for parameter '{}'", parameter)?;
                if let Some(pos) = position {
                    write!(f, " (position {})", pos)?;
                }
                write!(f, ": {}", source)
            }
            Self::Arity { callable, expected, found } => write!(
                f,
                "'{}' expects {} argument(s), got {}",
                callable, expected, found
            ),
            Self::UnknownName { kind, name } => {
                write!(f, "unknown {}: '{}'", kind, name)
            }
            Self::ObjectHandle { class, reason } => {
                write!(f, "invalid handle to class '{}': {}", class, reason)
            }
            Self::Native(err) => write!(f, "native error: {}", err),
            Self::ClosureValidation { reason } => {
                write!(f, "callable not capturable: {}", reason)
            }
            Self::Serialization { reason } => {
                write!(f, "closure serialization failed: {}", reason)
            }
            Self::Registration { module, name, reason } => match module {
                Some(m) => write!(
                    f,
                    "registration of '{}' in module '{}' failed: {}",
                    name, m, reason
                ),
                None => write!(f, "registration of '{}' failed: {}", name, reason),
            },
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TypeConversion { source, .. } => Some(source),
            Self::Native(err) => Some(err),
            _ => None,
        }
    }
}

impl From<NativeError> for BridgeError {
    fn from(err: NativeError) -> Self {
        Self::Native(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_error_path() {
        let err = ConversionError::mismatch("integer", "string")
            .nested(PathSegment::Key("c".to_string()))
            .nested(PathSegment::Index(2));
        let text = err.to_string();
        assert!(text.contains("expected integer"));
        assert!(text.contains("index 2"));
        assert!(text.contains("key \"c\""));
    }

    #[test]
    fn test_native_message_verbatim() {
        let err = BridgeError::native("Divide by zero Error");
        assert_eq!(err.to_string(), "native error: Divide by zero Error");
        assert!(err.is_native());
    }

    #[test]
    fn test_arity_display() {
        let err = BridgeError::arity("add_integers", 2, 3);
        assert_eq!(err.to_string(), "'add_integers' expects 2 argument(s), got 3");
    }
}
