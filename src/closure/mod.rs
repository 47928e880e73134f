//! Serializable references to registered functions
//!
//! A host-side callable may be captured for persistence only when it fits
//! the restricted "simple call" grammar: a direct reference to a
//! registered function, or a lambda whose body is exactly one call to a
//! registered function with every argument either a lambda parameter
//! (passed through unchanged), a value computable from the enclosing
//! scope at capture time (captured as a literal), or a nested call
//! satisfying the same grammar. The captured form stores a registry key
//! plus bound values, never executable code, so it survives a process
//! restart provided the function is registered again. Anything the
//! grammar does not clearly admit is rejected rather than guessed at.

use crate::errors::{BridgeError, BridgeResult};
use crate::registry::function::FunctionRegistry;
use crate::value::VariantValue;
use num_traits::ToPrimitive;
use rustpython_parser::ast::{self, Expr};
use rustpython_parser::{parse, Mode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Nesting limit applied when no bridge configuration is in play
pub const DEFAULT_MAX_NESTING: usize = 16;

/// Registry key plus ordered bound arguments for one captured callable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosureInfo {
    pub function: String,
    pub bound: Vec<BoundArg>,
}

/// One bound argument slot of a captured callable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BoundArg {
    /// Pass-through of the callable's i-th declared parameter
    Param(usize),
    /// Value captured from the enclosing scope or a literal constant
    Literal(VariantValue),
    /// Nested simple call, surfaced to the callee as a closure value
    Closure(ClosureInfo),
}

impl ClosureInfo {
    pub fn new(function: &str, bound: Vec<BoundArg>) -> Self {
        Self { function: function.to_string(), bound }
    }

    pub fn to_json(&self) -> BridgeResult<String> {
        serde_json::to_string(self).map_err(|e| BridgeError::serialization(e.to_string()))
    }

    pub fn from_json(text: &str) -> BridgeResult<Self> {
        serde_json::from_str(text).map_err(|e| BridgeError::serialization(e.to_string()))
    }

    pub fn to_bytes(&self) -> BridgeResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| BridgeError::serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> BridgeResult<Self> {
        bincode::deserialize(bytes).map_err(|e| BridgeError::serialization(e.to_string()))
    }

    /// Decode a persisted closure and check every referenced function key
    /// against the registry, recursively
    pub fn reconstruct(bytes: &[u8], registry: &FunctionRegistry) -> BridgeResult<Self> {
        let info = Self::from_bytes(bytes)?;
        info.verify_registered(registry)?;
        Ok(info)
    }

    fn verify_registered(&self, registry: &FunctionRegistry) -> BridgeResult<()> {
        if !registry.contains(&self.function) {
            return Err(BridgeError::serialization(format!(
                "closure references unregistered function '{}'",
                self.function
            )));
        }
        for slot in &self.bound {
            if let BoundArg::Closure(nested) = slot {
                nested.verify_registered(registry)?;
            }
        }
        Ok(())
    }
}

/// Snapshot of the enclosing host scope at capture time
///
/// Only names present here are "evaluable immediately" for literal
/// capture; everything else is rejected.
#[derive(Debug, Clone, Default)]
pub struct CaptureScope {
    bindings: HashMap<String, VariantValue>,
}

impl CaptureScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: VariantValue) -> Self {
        self.bindings.insert(name.to_string(), value);
        self
    }

    pub fn insert(&mut self, name: &str, value: VariantValue) {
        self.bindings.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&VariantValue> {
        self.bindings.get(name)
    }
}

/// Validate a host callable against the restricted grammar
pub fn capture(
    source: &str,
    scope: &CaptureScope,
    registry: &FunctionRegistry,
) -> BridgeResult<ClosureInfo> {
    capture_with_limit(source, scope, registry, DEFAULT_MAX_NESTING)
}

pub fn capture_with_limit(
    source: &str,
    scope: &CaptureScope,
    registry: &FunctionRegistry,
    max_nesting: usize,
) -> BridgeResult<ClosureInfo> {
    let expr = parse_callable(source)?;
    match &expr {
        Expr::Name(name) => {
            let id = name.id.as_str();
            let descriptor = registry.lookup(id).ok_or_else(|| {
                BridgeError::closure_validation(format!(
                    "'{}' is not a registered function",
                    id
                ))
            })?;
            Ok(ClosureInfo {
                function: id.to_string(),
                bound: (0..descriptor.arity()).map(BoundArg::Param).collect(),
            })
        }
        Expr::Lambda(lambda) => {
            let params = lambda_params(&lambda.args)?;
            validate_call(&lambda.body, &params, scope, registry, max_nesting)
        }
        other => Err(BridgeError::closure_validation(format!(
            "callable must be a function reference or a lambda, found {}",
            expr_label(other)
        ))),
    }
}

fn parse_callable(source: &str) -> BridgeResult<Expr> {
    match parse(source.trim(), Mode::Expression, "<capture>") {
        Ok(ast::Mod::Expression(module)) => Ok(*module.body),
        Ok(_) => Err(BridgeError::closure_validation(
            "callable source did not parse as an expression",
        )),
        Err(e) => Err(BridgeError::closure_validation(format!(
            "callable source does not parse: {}",
            e
        ))),
    }
}

fn lambda_params(args: &ast::Arguments) -> BridgeResult<Vec<String>> {
    if args.vararg.is_some()
        || args.kwarg.is_some()
        || !args.kwonlyargs.is_empty()
        || !args.posonlyargs.is_empty()
    {
        return Err(BridgeError::closure_validation(
            "lambda may declare plain positional parameters only",
        ));
    }
    let mut params = Vec::with_capacity(args.args.len());
    for arg in &args.args {
        if arg.default.is_some() {
            return Err(BridgeError::closure_validation(
                "lambda parameters may not declare defaults",
            ));
        }
        params.push(arg.def.arg.as_str().to_string());
    }
    Ok(params)
}

fn validate_call(
    expr: &Expr,
    params: &[String],
    scope: &CaptureScope,
    registry: &FunctionRegistry,
    depth: usize,
) -> BridgeResult<ClosureInfo> {
    if depth == 0 {
        return Err(BridgeError::closure_validation(
            "closure nesting exceeds the configured limit",
        ));
    }
    let call = match expr {
        Expr::Call(call) => call,
        other => {
            return Err(BridgeError::closure_validation(format!(
                "lambda body must be a single call, found {}",
                expr_label(other)
            )))
        }
    };
    if !call.keywords.is_empty() {
        return Err(BridgeError::closure_validation(
            "keyword arguments are not capturable",
        ));
    }
    let function = match call.func.as_ref() {
        Expr::Name(name) => name.id.as_str().to_string(),
        other => {
            return Err(BridgeError::closure_validation(format!(
                "call target must be a plain function name, found {}",
                expr_label(other)
            )))
        }
    };
    let descriptor = registry.lookup(&function).ok_or_else(|| {
        BridgeError::closure_validation(format!(
            "'{}' is not a registered function",
            function
        ))
    })?;
    if call.args.len() != descriptor.arity() {
        return Err(BridgeError::closure_validation(format!(
            "call supplies {} argument(s) but '{}' declares {}",
            call.args.len(),
            function,
            descriptor.arity()
        )));
    }

    let mut bound = Vec::with_capacity(call.args.len());
    for arg in &call.args {
        bound.push(validate_arg(arg, params, scope, registry, depth)?);
    }
    Ok(ClosureInfo { function, bound })
}

fn validate_arg(
    expr: &Expr,
    params: &[String],
    scope: &CaptureScope,
    registry: &FunctionRegistry,
    depth: usize,
) -> BridgeResult<BoundArg> {
    match expr {
        Expr::Name(name) => {
            let id = name.id.as_str();
            if let Some(index) = params.iter().position(|p| p.as_str() == id) {
                Ok(BoundArg::Param(index))
            } else if let Some(value) = scope.get(id) {
                Ok(BoundArg::Literal(value.clone()))
            } else {
                Err(BridgeError::closure_validation(format!(
                    "'{}' is neither a lambda parameter nor resolvable in the capture scope",
                    id
                )))
            }
        }
        Expr::Constant(constant) => literal(&constant.value).map(BoundArg::Literal),
        Expr::UnaryOp(unary) if matches!(unary.op, ast::UnaryOp::USub) => {
            // Negative numeric literals parse as unary minus
            match unary.operand.as_ref() {
                Expr::Constant(constant) => match literal(&constant.value)? {
                    VariantValue::Integer(i) => Ok(BoundArg::Literal(VariantValue::Integer(-i))),
                    VariantValue::Float(x) => Ok(BoundArg::Literal(VariantValue::Float(-x))),
                    _ => Err(BridgeError::closure_validation(
                        "negation applies to numeric literals only",
                    )),
                },
                _ => Err(BridgeError::closure_validation(
                    "operators over parameters are not capturable",
                )),
            }
        }
        Expr::Call(_) => {
            validate_call(expr, params, scope, registry, depth - 1).map(BoundArg::Closure)
        }
        other => Err(BridgeError::closure_validation(format!(
            "argument is not capturable: {}",
            expr_label(other)
        ))),
    }
}

fn literal(constant: &ast::Constant) -> BridgeResult<VariantValue> {
    match constant {
        ast::Constant::None => Ok(VariantValue::Undefined),
        ast::Constant::Bool(b) => Ok(VariantValue::Integer(*b as i64)),
        ast::Constant::Int(value) => value.to_i64().map(VariantValue::Integer).ok_or_else(|| {
            BridgeError::closure_validation("integer literal exceeds 64 bits")
        }),
        ast::Constant::Float(x) => Ok(VariantValue::Float(*x)),
        ast::Constant::Str(s) => Ok(VariantValue::String(s.clone())),
        _ => Err(BridgeError::closure_validation(
            "unsupported literal in captured call",
        )),
    }
}

fn expr_label(expr: &Expr) -> &'static str {
    match expr {
        Expr::BinOp(_) => "an operator expression",
        Expr::BoolOp(_) => "a boolean expression",
        Expr::Compare(_) => "a comparison",
        Expr::Attribute(_) => "attribute access",
        Expr::Subscript(_) => "a subscript",
        Expr::IfExp(_) => "a conditional expression",
        Expr::Lambda(_) => "a nested lambda",
        Expr::List(_) | Expr::Tuple(_) | Expr::Dict(_) | Expr::Set(_) => "a container display",
        Expr::Starred(_) => "a starred argument",
        Expr::JoinedStr(_) => "an f-string",
        _ => "an unsupported expression",
    }
}

/// Materialize the callee argument list for one invocation
///
/// Pass-through slots draw from `args`, literals are cloned, nested
/// closures surface as closure values the callee may later invoke.
pub fn bind(info: &ClosureInfo, args: &[VariantValue]) -> BridgeResult<Vec<VariantValue>> {
    let required = info
        .bound
        .iter()
        .filter_map(|slot| match slot {
            BoundArg::Param(i) => Some(i + 1),
            _ => None,
        })
        .max()
        .unwrap_or(0);
    if args.len() < required {
        return Err(BridgeError::arity(&info.function, required, args.len()));
    }

    let mut bound = Vec::with_capacity(info.bound.len());
    for slot in &info.bound {
        match slot {
            BoundArg::Param(i) => bound.push(args[*i].clone()),
            BoundArg::Literal(value) => bound.push(value.clone()),
            BoundArg::Closure(nested) => bound.push(VariantValue::Closure(nested.clone())),
        }
    }
    Ok(bound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::function::CallableDescriptor;

    fn registry() -> FunctionRegistry {
        let registry = FunctionRegistry::new();
        registry
            .register(
                CallableDescriptor::new("add", None, &["a", "b"], None, |a: i64, b: i64| a + b)
                    .unwrap(),
            )
            .unwrap();
        registry
            .register(
                CallableDescriptor::new("negate", None, &["n"], None, |n: i64| -n).unwrap(),
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_simple_call_accepted() {
        let info = capture("lambda p: add(p, 3)", &CaptureScope::new(), &registry()).unwrap();
        assert_eq!(info.function, "add");
        assert_eq!(
            info.bound,
            vec![BoundArg::Param(0), BoundArg::Literal(VariantValue::Integer(3))]
        );
    }

    #[test]
    fn test_operator_over_parameter_rejected() {
        let err =
            capture("lambda p: add(p + 1, 3)", &CaptureScope::new(), &registry()).unwrap_err();
        assert!(matches!(err, BridgeError::ClosureValidation { .. }));
    }

    #[test]
    fn test_direct_reference_accepted() {
        let info = capture("add", &CaptureScope::new(), &registry()).unwrap();
        assert_eq!(info.function, "add");
        assert_eq!(info.bound, vec![BoundArg::Param(0), BoundArg::Param(1)]);
    }

    #[test]
    fn test_scope_name_captured_as_literal() {
        let scope = CaptureScope::new().with("offset", VariantValue::Integer(40));
        let info = capture("lambda p: add(p, offset)", &scope, &registry()).unwrap();
        assert_eq!(
            info.bound,
            vec![BoundArg::Param(0), BoundArg::Literal(VariantValue::Integer(40))]
        );
    }

    #[test]
    fn test_unresolvable_name_rejected() {
        let err =
            capture("lambda p: add(p, offset)", &CaptureScope::new(), &registry()).unwrap_err();
        assert!(matches!(err, BridgeError::ClosureValidation { .. }));
    }

    #[test]
    fn test_nested_call_accepted() {
        let info =
            capture("lambda p: add(p, negate(3))", &CaptureScope::new(), &registry()).unwrap();
        match &info.bound[1] {
            BoundArg::Closure(nested) => {
                assert_eq!(nested.function, "negate");
                assert_eq!(nested.bound, vec![BoundArg::Literal(VariantValue::Integer(3))]);
            }
            other => panic!("expected nested closure, got {:?}", other),
        }
    }

    #[test]
    fn test_unregistered_target_rejected() {
        let err =
            capture("lambda p: missing(p)", &CaptureScope::new(), &registry()).unwrap_err();
        assert!(matches!(err, BridgeError::ClosureValidation { .. }));
    }

    #[test]
    fn test_multiple_statements_rejected() {
        let err = capture("lambda p: [add(p, 1), add(p, 2)]", &CaptureScope::new(), &registry())
            .unwrap_err();
        assert!(matches!(err, BridgeError::ClosureValidation { .. }));
    }

    #[test]
    fn test_negative_literal_accepted() {
        let info = capture("lambda p: add(p, -7)", &CaptureScope::new(), &registry()).unwrap();
        assert_eq!(info.bound[1], BoundArg::Literal(VariantValue::Integer(-7)));
    }

    #[test]
    fn test_serialization_round_trip() {
        let info = capture("lambda p: add(p, 3)", &CaptureScope::new(), &registry()).unwrap();

        let json = info.to_json().unwrap();
        assert_eq!(ClosureInfo::from_json(&json).unwrap(), info);

        let bytes = info.to_bytes().unwrap();
        assert_eq!(ClosureInfo::from_bytes(&bytes).unwrap(), info);
    }

    #[test]
    fn test_reconstruct_checks_registry() {
        let info = capture("lambda p: add(p, 3)", &CaptureScope::new(), &registry()).unwrap();
        let bytes = info.to_bytes().unwrap();

        let empty = FunctionRegistry::new();
        let err = ClosureInfo::reconstruct(&bytes, &empty).unwrap_err();
        assert!(matches!(err, BridgeError::Serialization { .. }));

        let restored = ClosureInfo::reconstruct(&bytes, &registry()).unwrap();
        assert_eq!(restored, info);
    }

    #[test]
    fn test_bind_materializes_arguments() {
        let info = capture("lambda p: add(p, 3)", &CaptureScope::new(), &registry()).unwrap();
        let bound = bind(&info, &[VariantValue::Integer(5)]).unwrap();
        assert_eq!(bound, vec![VariantValue::Integer(5), VariantValue::Integer(3)]);

        let err = bind(&info, &[]).unwrap_err();
        assert!(matches!(err, BridgeError::Arity { .. }));
    }
}
