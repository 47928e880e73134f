//! Function descriptors and the process-wide function registry
//!
//! Design: dynamic invocation without reflection. Each registered function
//! is erased into an invoker closure that owns the knowledge of how to
//! unpack a `VariantValue` argument list into the exact native call. The
//! registry is an append-only name-keyed table populated at module load.

use crate::errors::{BridgeError, BridgeResult, NativeError};
use crate::value::{FromVariant, IntoVariant, VariantValue};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

/// Erased invocation entry point
pub type Invoker =
    Box<dyn Fn(&[VariantValue]) -> BridgeResult<VariantValue> + Send + Sync>;

/// Marker for natively infallible functions
pub struct Pure;

/// Marker for functions returning `Result<_, NativeError>`
pub struct Fallible;

/// A statically-typed function erasable into an [`Invoker`]
///
/// Implemented for `Fn` items of arity 0..=6 over `FromVariant` parameters,
/// in both infallible and `Result<_, NativeError>` flavors. The `Marker`
/// parameter disambiguates the two blanket impls during inference.
pub trait NativeFunction<Args, Marker>: Send + Sync + 'static {
    fn arity() -> usize;

    fn into_invoker(self) -> Invoker;
}

macro_rules! native_function_impls {
    ($(($($A:ident $a:ident $idx:tt),*) => $arity:expr;)+) => {$(
        impl<F, R $(, $A)*> NativeFunction<($($A,)*), Pure> for F
        where
            F: Fn($($A),*) -> R + Send + Sync + 'static,
            R: IntoVariant,
            $($A: FromVariant,)*
        {
            fn arity() -> usize {
                $arity
            }

            fn into_invoker(self) -> Invoker {
                Box::new(move |args: &[VariantValue]| {
                    if args.len() != $arity {
                        return Err(BridgeError::arity("", $arity, args.len()));
                    }
                    $(let $a = <$A as FromVariant>::from_variant(&args[$idx]).map_err(|e| {
                        BridgeError::TypeConversion {
                            parameter: String::new(),
                            position: Some($idx),
                            source: e,
                        }
                    })?;)*
                    Ok((self)($($a),*).into_variant())
                })
            }
        }

        impl<F, R $(, $A)*> NativeFunction<($($A,)*), Fallible> for F
        where
            F: Fn($($A),*) -> Result<R, NativeError> + Send + Sync + 'static,
            R: IntoVariant,
            $($A: FromVariant,)*
        {
            fn arity() -> usize {
                $arity
            }

            fn into_invoker(self) -> Invoker {
                Box::new(move |args: &[VariantValue]| {
                    if args.len() != $arity {
                        return Err(BridgeError::arity("", $arity, args.len()));
                    }
                    $(let $a = <$A as FromVariant>::from_variant(&args[$idx]).map_err(|e| {
                        BridgeError::TypeConversion {
                            parameter: String::new(),
                            position: Some($idx),
                            source: e,
                        }
                    })?;)*
                    Ok((self)($($a),*).map_err(BridgeError::Native)?.into_variant())
                })
            }
        }
    )+};
}

native_function_impls! {
    () => 0;
    (A0 a0 0) => 1;
    (A0 a0 0, A1 a1 1) => 2;
    (A0 a0 0, A1 a1 1, A2 a2 2) => 3;
    (A0 a0 0, A1 a1 1, A2 a2 2, A3 a3 3) => 4;
    (A0 a0 0, A1 a1 1, A2 a2 2, A3 a3 3, A4 a4 4) => 5;
    (A0 a0 0, A1 a1 1, A2 a2 2, A3 a3 3, A4 a4 4, A5 a5 5) => 6;
}

/// Registered metadata plus invoker for one function
///
/// Built once at module-registration time, immutable thereafter, owned by
/// the [`FunctionRegistry`] for the lifetime of the loaded module.
pub struct CallableDescriptor {
    public_name: String,
    internal_name: String,
    params: Vec<String>,
    doc: Option<String>,
    invoker: Invoker,
}

impl CallableDescriptor {
    /// Erase `function` into a descriptor. The declared parameter list
    /// must match the function's arity; a mismatch is surfaced here, at
    /// build time, not at call time.
    pub fn new<F, A, M>(
        public_name: &str,
        internal_name: Option<&str>,
        params: &[&str],
        doc: Option<&str>,
        function: F,
    ) -> BridgeResult<Self>
    where
        F: NativeFunction<A, M>,
    {
        if params.len() != F::arity() {
            return Err(BridgeError::registration(
                None,
                public_name,
                format!(
                    "declared {} parameter name(s) for a function of arity {}",
                    params.len(),
                    F::arity()
                ),
            ));
        }
        Ok(Self {
            public_name: public_name.to_string(),
            internal_name: internal_name.unwrap_or(public_name).to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            doc: doc.map(str::to_owned),
            invoker: function.into_invoker(),
        })
    }

    pub fn public_name(&self) -> &str {
        &self.public_name
    }

    pub fn internal_name(&self) -> &str {
        &self.internal_name
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    /// Run the erased entry point over an ordered argument list, filling
    /// in the callable and parameter names the invoker cannot know.
    pub fn invoke(&self, args: &[VariantValue]) -> BridgeResult<VariantValue> {
        (self.invoker)(args).map_err(|e| self.attribute(e))
    }

    fn attribute(&self, error: BridgeError) -> BridgeError {
        match error {
            BridgeError::Arity { expected, found, .. } => {
                BridgeError::arity(&self.public_name, expected, found)
            }
            BridgeError::TypeConversion { position: Some(i), source, .. } => {
                BridgeError::TypeConversion {
                    parameter: self.params.get(i).cloned().unwrap_or_default(),
                    position: Some(i),
                    source,
                }
            }
            other => other,
        }
    }
}

impl fmt::Debug for CallableDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallableDescriptor")
            .field("public_name", &self.public_name)
            .field("internal_name", &self.internal_name)
            .field("params", &self.params)
            .finish()
    }
}

/// Append-only name → descriptor table
#[derive(Default)]
pub struct FunctionRegistry {
    table: DashMap<String, Arc<CallableDescriptor>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self { table: DashMap::new() }
    }

    /// Register a descriptor under its public name. Re-registration of a
    /// live name is a load-time error.
    pub fn register(&self, descriptor: CallableDescriptor) -> BridgeResult<()> {
        let name = descriptor.public_name().to_string();
        match self.table.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(BridgeError::registration(
                None,
                name,
                "function name already registered",
            )),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(descriptor));
                Ok(())
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<CallableDescriptor>> {
        self.table.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    /// Remove a name; used when a module is unloaded
    pub fn remove(&self, name: &str) -> bool {
        self.table.remove(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.table.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(a: i64, b: i64) -> i64 {
        a + b
    }

    #[test]
    fn test_erased_invocation() {
        let desc =
            CallableDescriptor::new("add", None, &["a", "b"], None, add).unwrap();
        let result = desc
            .invoke(&[VariantValue::Integer(5), VariantValue::Integer(10)])
            .unwrap();
        assert_eq!(result, VariantValue::Integer(15));
    }

    #[test]
    fn test_conversion_error_names_parameter() {
        let desc =
            CallableDescriptor::new("add", None, &["a", "b"], None, add).unwrap();
        let err = desc
            .invoke(&[VariantValue::Integer(5), VariantValue::String("x".into())])
            .unwrap_err();
        match err {
            BridgeError::TypeConversion { parameter, position, .. } => {
                assert_eq!(parameter, "b");
                assert_eq!(position, Some(1));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_fallible_function() {
        let divide = |a: i64, b: i64| -> Result<i64, NativeError> {
            if b == 0 {
                Err(NativeError::new("Divide by zero Error"))
            } else {
                Ok(a / b)
            }
        };
        let desc =
            CallableDescriptor::new("divide", None, &["a", "b"], None, divide).unwrap();
        let err = desc
            .invoke(&[VariantValue::Integer(10), VariantValue::Integer(0)])
            .unwrap_err();
        assert_eq!(err, BridgeError::native("Divide by zero Error"));
    }

    #[test]
    fn test_param_count_checked_at_build() {
        let result = CallableDescriptor::new("add", None, &["a"], None, add);
        assert!(matches!(result, Err(BridgeError::Registration { .. })));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = FunctionRegistry::new();
        registry
            .register(CallableDescriptor::new("add", None, &["a", "b"], None, add).unwrap())
            .unwrap();
        let err = registry
            .register(CallableDescriptor::new("add", None, &["a", "b"], None, add).unwrap())
            .unwrap_err();
        assert!(matches!(err, BridgeError::Registration { .. }));
    }

    #[test]
    fn test_remove_supports_unload() {
        let registry = FunctionRegistry::new();
        registry
            .register(CallableDescriptor::new("add", None, &["a", "b"], None, add).unwrap())
            .unwrap();
        assert!(registry.remove("add"));
        assert!(registry.lookup("add").is_none());
    }
}
