//! Name-resolving dispatch over the registries
//!
//! Design: one blocking round trip per call. Resolve the name, reorder and
//! marshal the arguments (all-or-nothing, before any native code runs),
//! invoke the erased entry point under the host gate, marshal the result
//! back. Native faults (explicit failure results and caught panics) are
//! materialized as error values; nothing unwinds into the host.

use crate::closure::{self, ClosureInfo};
use crate::errors::{BridgeError, BridgeResult};
use crate::host;
use crate::object::ObjectHandle;
use crate::registry::class::{ClassDescriptor, ClassRegistry};
use crate::registry::function::FunctionRegistry;
use crate::value::VariantValue;
use smallvec::SmallVec;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::debug;

/// Arguments to a dispatch: positional, or keyword-style by parameter name
pub enum CallArgs {
    Positional(Vec<VariantValue>),
    Named(Vec<(String, VariantValue)>),
}

impl CallArgs {
    pub fn len(&self) -> usize {
        match self {
            Self::Positional(values) => values.len(),
            Self::Named(pairs) => pairs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<VariantValue>> for CallArgs {
    fn from(values: Vec<VariantValue>) -> Self {
        Self::Positional(values)
    }
}

impl From<Vec<(String, VariantValue)>> for CallArgs {
    fn from(pairs: Vec<(String, VariantValue)>) -> Self {
        Self::Named(pairs)
    }
}

type ArgBuf = SmallVec<[VariantValue; 8]>;

/// Resolves names to descriptors and executes marshaled calls
pub struct Dispatcher {
    functions: Arc<FunctionRegistry>,
    classes: Arc<ClassRegistry>,
    catch_panics: bool,
}

impl Dispatcher {
    pub fn new(functions: Arc<FunctionRegistry>, classes: Arc<ClassRegistry>) -> Self {
        Self { functions, classes, catch_panics: true }
    }

    /// Whether native panics are converted to error values (default on).
    /// Disable only in tests that assert on panic propagation.
    pub fn catch_panics(mut self, enabled: bool) -> Self {
        self.catch_panics = enabled;
        self
    }

    /// Call a registered function by name
    pub fn invoke(&self, name: &str, args: CallArgs) -> BridgeResult<VariantValue> {
        let _host = host::acquire();
        let descriptor = self
            .functions
            .lookup(name)
            .ok_or_else(|| BridgeError::unknown_function(name))?;
        let ordered = order_args(name, descriptor.params(), args)?;
        debug!(function = name, arity = ordered.len(), "dispatch");
        self.run(|| descriptor.invoke(&ordered))
    }

    /// Call a method with the instance as implicit first bound argument
    pub fn invoke_method(
        &self,
        handle: &ObjectHandle,
        name: &str,
        args: CallArgs,
    ) -> BridgeResult<VariantValue> {
        let _host = host::acquire();
        let class = self.resolve_class(handle)?;
        let method = class
            .method(name)
            .ok_or_else(|| BridgeError::unknown_method(name))?;
        let ordered = order_args(name, method.params(), args)?;
        debug!(class = class.name(), method = name, "method dispatch");
        self.run(|| method.invoke(handle, &ordered))
    }

    /// Attribute-style read, routed to the class getter table
    pub fn get_property(&self, handle: &ObjectHandle, name: &str) -> BridgeResult<VariantValue> {
        let _host = host::acquire();
        let class = self.resolve_class(handle)?;
        let getter = class
            .getter(name)
            .ok_or_else(|| BridgeError::unknown_property(name))?;
        self.run(|| getter(handle))
    }

    /// Attribute-style write, routed to the class setter table
    pub fn set_property(
        &self,
        handle: &ObjectHandle,
        name: &str,
        value: VariantValue,
    ) -> BridgeResult<()> {
        let _host = host::acquire();
        let class = self.resolve_class(handle)?;
        let setter = class
            .setter(name)
            .ok_or_else(|| BridgeError::unknown_property(name))?;
        self.run(|| setter(handle, &value))
    }

    /// Invoke a captured closure, re-resolving its function key now
    ///
    /// An unregistered key is the expected failure when a closure is
    /// reloaded without its originating module.
    pub fn invoke_closure(
        &self,
        info: &ClosureInfo,
        args: &[VariantValue],
    ) -> BridgeResult<VariantValue> {
        let _host = host::acquire();
        let descriptor = self
            .functions
            .lookup(&info.function)
            .ok_or_else(|| BridgeError::unknown_function(&info.function))?;
        let bound = closure::bind(info, args)?;
        debug!(function = %info.function, "closure dispatch");
        self.run(|| descriptor.invoke(&bound))
    }

    fn resolve_class(&self, handle: &ObjectHandle) -> BridgeResult<Arc<ClassDescriptor>> {
        self.classes.lookup(handle.class_name()).ok_or_else(|| {
            BridgeError::handle(
                handle.class_name(),
                "class is not registered with the bridge",
            )
        })
    }

    fn run<R>(&self, call: impl FnOnce() -> BridgeResult<R>) -> BridgeResult<R> {
        if !self.catch_panics {
            return call();
        }
        match catch_unwind(AssertUnwindSafe(call)) {
            Ok(result) => result,
            Err(payload) => Err(BridgeError::native(panic_message(payload))),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "native code panicked".to_string()
    }
}

/// Reorder arguments against the declared parameter names
///
/// Positional arity must match exactly; named arguments must each match a
/// declared name, fill every slot, and fill each slot once.
fn order_args(callable: &str, params: &[String], args: CallArgs) -> BridgeResult<ArgBuf> {
    match args {
        CallArgs::Positional(values) => {
            if values.len() != params.len() {
                return Err(BridgeError::arity(callable, params.len(), values.len()));
            }
            Ok(values.into_iter().collect())
        }
        CallArgs::Named(pairs) => {
            let found = pairs.len();
            let mut slots: SmallVec<[Option<VariantValue>; 8]> =
                params.iter().map(|_| None).collect();
            for (name, value) in pairs {
                let index = params
                    .iter()
                    .position(|p| *p == name)
                    .ok_or_else(|| BridgeError::unknown_parameter(&name))?;
                if slots[index].is_some() {
                    return Err(BridgeError::arity(callable, params.len(), found));
                }
                slots[index] = Some(value);
            }
            let mut ordered = ArgBuf::new();
            for slot in slots {
                match slot {
                    Some(value) => ordered.push(value),
                    None => return Err(BridgeError::arity(callable, params.len(), found)),
                }
            }
            Ok(ordered)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::NativeError;
    use crate::registry::function::CallableDescriptor;

    fn registry_with_add() -> Arc<FunctionRegistry> {
        let registry = FunctionRegistry::new();
        registry
            .register(
                CallableDescriptor::new("add", None, &["a", "b"], None, |a: i64, b: i64| a + b)
                    .unwrap(),
            )
            .unwrap();
        Arc::new(registry)
    }

    fn dispatcher(functions: Arc<FunctionRegistry>) -> Dispatcher {
        Dispatcher::new(functions, Arc::new(ClassRegistry::new()))
    }

    #[test]
    fn test_positional_invoke() {
        let d = dispatcher(registry_with_add());
        let result = d
            .invoke("add", vec![VariantValue::Integer(5), VariantValue::Integer(10)].into())
            .unwrap();
        assert_eq!(result, VariantValue::Integer(15));
    }

    #[test]
    fn test_named_matches_positional() {
        let d = dispatcher(registry_with_add());
        let named = d
            .invoke(
                "add",
                vec![
                    ("b".to_string(), VariantValue::Integer(10)),
                    ("a".to_string(), VariantValue::Integer(5)),
                ]
                .into(),
            )
            .unwrap();
        assert_eq!(named, VariantValue::Integer(15));
    }

    #[test]
    fn test_arity_too_few_and_too_many() {
        let d = dispatcher(registry_with_add());
        for count in [1usize, 3] {
            let args = vec![VariantValue::Integer(1); count];
            let err = d.invoke("add", args.into()).unwrap_err();
            assert_eq!(err, BridgeError::arity("add", 2, count));
        }
    }

    #[test]
    fn test_unknown_named_argument() {
        let d = dispatcher(registry_with_add());
        let err = d
            .invoke(
                "add",
                vec![
                    ("a".to_string(), VariantValue::Integer(1)),
                    ("c".to_string(), VariantValue::Integer(2)),
                ]
                .into(),
            )
            .unwrap_err();
        assert!(matches!(err, BridgeError::UnknownName { .. }));
    }

    #[test]
    fn test_missing_named_slot_is_arity_error() {
        let d = dispatcher(registry_with_add());
        let err = d
            .invoke("add", vec![("a".to_string(), VariantValue::Integer(1))].into())
            .unwrap_err();
        assert_eq!(err, BridgeError::arity("add", 2, 1));
    }

    #[test]
    fn test_unknown_function() {
        let d = dispatcher(registry_with_add());
        let err = d.invoke("missing", Vec::<VariantValue>::new().into()).unwrap_err();
        assert_eq!(err, BridgeError::unknown_function("missing"));
    }

    #[test]
    fn test_native_failure_is_captured() {
        let registry = FunctionRegistry::new();
        registry
            .register(
                CallableDescriptor::new(
                    "divide",
                    None,
                    &["a", "b"],
                    None,
                    |a: i64, b: i64| -> Result<i64, NativeError> {
                        if b == 0 {
                            Err(NativeError::new("Divide by zero Error"))
                        } else {
                            Ok(a / b)
                        }
                    },
                )
                .unwrap(),
            )
            .unwrap();
        let d = dispatcher(Arc::new(registry));
        let err = d
            .invoke("divide", vec![VariantValue::Integer(10), VariantValue::Integer(0)].into())
            .unwrap_err();
        assert_eq!(err, BridgeError::native("Divide by zero Error"));
    }

    #[test]
    fn test_native_panic_is_captured() {
        let registry = FunctionRegistry::new();
        registry
            .register(
                CallableDescriptor::new("boom", None, &[], None, || -> i64 {
                    panic!("native overflow")
                })
                .unwrap(),
            )
            .unwrap();
        let d = dispatcher(Arc::new(registry));
        let err = d.invoke("boom", Vec::<VariantValue>::new().into()).unwrap_err();
        assert_eq!(err, BridgeError::native("native overflow"));
    }

    #[test]
    fn test_conversion_failure_aborts_before_invocation() {
        use std::sync::atomic::{AtomicBool, Ordering};
        static RAN: AtomicBool = AtomicBool::new(false);

        let registry = FunctionRegistry::new();
        registry
            .register(
                CallableDescriptor::new("observe", None, &["n"], None, |n: i64| {
                    RAN.store(true, Ordering::SeqCst);
                    n
                })
                .unwrap(),
            )
            .unwrap();
        let d = dispatcher(Arc::new(registry));
        let err = d
            .invoke("observe", vec![VariantValue::String("nope".into())].into())
            .unwrap_err();
        assert!(matches!(err, BridgeError::TypeConversion { .. }));
        assert!(!RAN.load(Ordering::SeqCst));
    }
}
