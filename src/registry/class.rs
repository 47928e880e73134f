//! Class descriptors, member dispatch tables, and the class registry
//!
//! A class surfaces to the host as a name plus member tables: methods,
//! getter/setter pairs, and default properties (a field exposed directly
//! as a getter+setter pair). Instances reach the host as `ObjectHandle`s
//! produced by registered functions; the handle carries the class name
//! used to resolve its descriptor at dispatch time.

use crate::errors::{BridgeError, BridgeResult, NativeError};
use crate::object::{NativeObject, ObjectHandle};
use crate::registry::function::{Fallible, Pure};
use crate::value::{FromVariant, IntoVariant, VariantValue};
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Erased method entry point: instance handle plus ordered arguments
pub type MethodInvoker =
    Box<dyn Fn(&ObjectHandle, &[VariantValue]) -> BridgeResult<VariantValue> + Send + Sync>;

pub type PropertyGetter =
    Box<dyn Fn(&ObjectHandle) -> BridgeResult<VariantValue> + Send + Sync>;

pub type PropertySetter =
    Box<dyn Fn(&ObjectHandle, &VariantValue) -> BridgeResult<()> + Send + Sync>;

/// A statically-typed method erasable into a [`MethodInvoker`]
///
/// Implemented for `Fn(&mut T, ...)` items of arity 0..=5 beyond the
/// instance, in infallible and `Result<_, NativeError>` flavors.
pub trait NativeMethod<T, Args, Marker>: Send + Sync + 'static {
    fn arity() -> usize;

    fn into_invoker(self) -> MethodInvoker;
}

macro_rules! native_method_impls {
    ($(($($A:ident $a:ident $idx:tt),*) => $arity:expr;)+) => {$(
        impl<T, F, R $(, $A)*> NativeMethod<T, ($($A,)*), Pure> for F
        where
            T: NativeObject,
            F: Fn(&mut T $(, $A)*) -> R + Send + Sync + 'static,
            R: IntoVariant,
            $($A: FromVariant,)*
        {
            fn arity() -> usize {
                $arity
            }

            fn into_invoker(self) -> MethodInvoker {
                Box::new(move |handle: &ObjectHandle, args: &[VariantValue]| {
                    if args.len() != $arity {
                        return Err(BridgeError::arity("", $arity, args.len()));
                    }
                    // Arguments marshal before the instance lock is taken:
                    // a conversion failure leaves the call entirely unrun.
                    $(let $a = <$A as FromVariant>::from_variant(&args[$idx]).map_err(|e| {
                        BridgeError::TypeConversion {
                            parameter: String::new(),
                            position: Some($idx),
                            source: e,
                        }
                    })?;)*
                    let result = handle.with_mut(|obj: &mut T| (self)(obj $(, $a)*))?;
                    Ok(result.into_variant())
                })
            }
        }

        impl<T, F, R $(, $A)*> NativeMethod<T, ($($A,)*), Fallible> for F
        where
            T: NativeObject,
            F: Fn(&mut T $(, $A)*) -> Result<R, NativeError> + Send + Sync + 'static,
            R: IntoVariant,
            $($A: FromVariant,)*
        {
            fn arity() -> usize {
                $arity
            }

            fn into_invoker(self) -> MethodInvoker {
                Box::new(move |handle: &ObjectHandle, args: &[VariantValue]| {
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
                    let result = handle.with_mut(|obj: &mut T| (self)(obj $(, $a)*))?;
                    Ok(result.map_err(BridgeError::Native)?.into_variant())
                })
            }
        }
    )+};
}

native_method_impls! {
    () => 0;
    (A0 a0 0) => 1;
    (A0 a0 0, A1 a1 1) => 2;
    (A0 a0 0, A1 a1 1, A2 a2 2) => 3;
    (A0 a0 0, A1 a1 1, A2 a2 2, A3 a3 3) => 4;
    (A0 a0 0, A1 a1 1, A2 a2 2, A3 a3 3, A4 a4 4) => 5;
}

/// Registered metadata plus invoker for one method, bound to an
/// instance-taking first argument
pub struct MethodDescriptor {
    name: String,
    params: Vec<String>,
    doc: Option<String>,
    invoker: MethodInvoker,
}

impl MethodDescriptor {
    pub fn new<T, F, A, M>(
        name: &str,
        params: &[&str],
        doc: Option<&str>,
        method: F,
    ) -> BridgeResult<Self>
    where
        F: NativeMethod<T, A, M>,
    {
        if params.len() != F::arity() {
            return Err(BridgeError::registration(
                None,
                name,
                format!(
                    "declared {} parameter name(s) for a method of arity {}",
                    params.len(),
                    F::arity()
                ),
            ));
        }
        Ok(Self {
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            doc: doc.map(str::to_owned),
            invoker: method.into_invoker(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
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

    pub fn invoke(
        &self,
        handle: &ObjectHandle,
        args: &[VariantValue],
    ) -> BridgeResult<VariantValue> {
        (self.invoker)(handle, args).map_err(|e| match e {
            BridgeError::Arity { expected, found, .. } => {
                BridgeError::arity(&self.name, expected, found)
            }
            BridgeError::TypeConversion { position: Some(i), source, .. } => {
                BridgeError::TypeConversion {
                    parameter: self.params.get(i).cloned().unwrap_or_default(),
                    position: Some(i),
                    source,
                }
            }
            other => other,
        })
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

/// Member dispatch tables for one registered class
///
/// Immutable after registration; owned by the [`ClassRegistry`].
pub struct ClassDescriptor {
    name: String,
    methods: HashMap<String, Arc<MethodDescriptor>>,
    getters: HashMap<String, PropertyGetter>,
    setters: HashMap<String, PropertySetter>,
    default_properties: Vec<String>,
}

impl ClassDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self, name: &str) -> Option<&Arc<MethodDescriptor>> {
        self.methods.get(name)
    }

    pub fn getter(&self, name: &str) -> Option<&PropertyGetter> {
        self.getters.get(name)
    }

    pub fn setter(&self, name: &str) -> Option<&PropertySetter> {
        self.setters.get(name)
    }

    pub fn method_names(&self) -> Vec<String> {
        self.methods.keys().cloned().collect()
    }

    pub fn property_names(&self) -> Vec<String> {
        self.getters.keys().cloned().collect()
    }

    pub fn default_properties(&self) -> &[String] {
        &self.default_properties
    }
}

impl fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("name", &self.name)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("properties", &self.getters.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Member registration for a class of native type `T`
///
/// Member registration happens where the class is defined; the finished
/// descriptor is then registered once per module. `property` exposes a
/// field as an agreeing getter+setter pair by construction; split
/// `getter`/`setter` registration under one name must agree on type,
/// which the builder cannot witness after erasure; that agreement is the
/// registrant's obligation.
pub struct ClassBuilder<T: NativeObject> {
    name: String,
    methods: Vec<MethodDescriptor>,
    getters: Vec<(String, PropertyGetter)>,
    setters: Vec<(String, PropertySetter)>,
    default_properties: Vec<String>,
    deferred_error: Option<BridgeError>,
    _marker: PhantomData<fn(T)>,
}

impl<T: NativeObject> ClassBuilder<T> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            methods: Vec::new(),
            getters: Vec::new(),
            setters: Vec::new(),
            default_properties: Vec::new(),
            deferred_error: None,
            _marker: PhantomData,
        }
    }

    pub fn method<F, A, M>(mut self, name: &str, params: &[&str], method: F) -> Self
    where
        F: NativeMethod<T, A, M>,
    {
        match MethodDescriptor::new(name, params, None, method) {
            Ok(descriptor) => self.methods.push(descriptor),
            Err(e) => {
                if self.deferred_error.is_none() {
                    self.deferred_error = Some(e);
                }
            }
        }
        self
    }

    pub fn getter<R>(
        mut self,
        name: &str,
        get: impl Fn(&T) -> R + Send + Sync + 'static,
    ) -> Self
    where
        R: IntoVariant + 'static,
    {
        self.getters.push((name.to_string(), erase_getter(get)));
        self
    }

    pub fn setter<V>(
        mut self,
        name: &str,
        set: impl Fn(&mut T, V) + Send + Sync + 'static,
    ) -> Self
    where
        V: FromVariant + 'static,
    {
        self.setters
            .push((name.to_string(), erase_setter(name, set)));
        self
    }

    /// Expose a field directly as a getter+setter pair under one public
    /// name. Both directions run through the same value type `V`.
    pub fn property<V>(
        mut self,
        name: &str,
        get: impl Fn(&T) -> V + Send + Sync + 'static,
        set: impl Fn(&mut T, V) + Send + Sync + 'static,
    ) -> Self
    where
        V: IntoVariant + FromVariant + 'static,
    {
        self.getters.push((name.to_string(), erase_getter(get)));
        self.setters
            .push((name.to_string(), erase_setter(name, set)));
        self.default_properties.push(name.to_string());
        self
    }

    /// Validate name uniqueness and produce the descriptor
    pub fn build(self) -> BridgeResult<ClassDescriptor> {
        if let Some(error) = self.deferred_error {
            return Err(error);
        }

        let class = self.name;
        let mut methods = HashMap::new();
        for descriptor in self.methods {
            let name = descriptor.name().to_string();
            if methods.insert(name.clone(), Arc::new(descriptor)).is_some() {
                return Err(duplicate_member(&class, &name, "method"));
            }
        }

        let mut getters = HashMap::new();
        for (name, getter) in self.getters {
            if methods.contains_key(&name) {
                return Err(duplicate_member(&class, &name, "member"));
            }
            if getters.insert(name.clone(), getter).is_some() {
                return Err(duplicate_member(&class, &name, "getter"));
            }
        }

        let mut setters = HashMap::new();
        for (name, setter) in self.setters {
            if methods.contains_key(&name) {
                return Err(duplicate_member(&class, &name, "member"));
            }
            if setters.insert(name.clone(), setter).is_some() {
                return Err(duplicate_member(&class, &name, "setter"));
            }
        }

        Ok(ClassDescriptor {
            name: class,
            methods,
            getters,
            setters,
            default_properties: self.default_properties,
        })
    }
}

fn duplicate_member(class: &str, name: &str, table: &str) -> BridgeError {
    BridgeError::registration(
        Some(class),
        name,
        format!("{} name already registered in this class", table),
    )
}

fn erase_getter<T, R>(get: impl Fn(&T) -> R + Send + Sync + 'static) -> PropertyGetter
where
    T: NativeObject,
    R: IntoVariant + 'static,
{
    Box::new(move |handle: &ObjectHandle| {
        handle.with_ref(|obj: &T| get(obj)).map(IntoVariant::into_variant)
    })
}

fn erase_setter<T, V>(
    name: &str,
    set: impl Fn(&mut T, V) + Send + Sync + 'static,
) -> PropertySetter
where
    T: NativeObject,
    V: FromVariant + 'static,
{
    let property = name.to_string();
    Box::new(move |handle: &ObjectHandle, value: &VariantValue| {
        let converted = V::from_variant(value).map_err(|e| BridgeError::TypeConversion {
            parameter: property.clone(),
            position: None,
            source: e,
        })?;
        handle.with_mut(|obj: &mut T| set(obj, converted))
    })
}

/// Append-only name → class descriptor table
#[derive(Default)]
pub struct ClassRegistry {
    table: DashMap<String, Arc<ClassDescriptor>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self { table: DashMap::new() }
    }

    pub fn register(&self, descriptor: ClassDescriptor) -> BridgeResult<()> {
        let name = descriptor.name().to_string();
        match self.table.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(BridgeError::registration(
                None,
                name,
                "class name already registered",
            )),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(descriptor));
                Ok(())
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<ClassDescriptor>> {
        self.table.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    pub fn remove(&self, name: &str) -> bool {
        self.table.remove(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.table.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;

    struct Pair {
        one: i64,
        two: String,
    }

    impl NativeObject for Pair {
        fn class_name(&self) -> &'static str {
            "Pair"
        }
        fn clone_object(&self) -> Box<dyn NativeObject> {
            Box::new(Pair { one: self.one, two: self.two.clone() })
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn pair_class() -> ClassDescriptor {
        ClassBuilder::<Pair>::new("Pair")
            .method("shift", &["delta"], |p: &mut Pair, delta: i64| {
                p.one += delta;
                p.one
            })
            .property("two", |p: &Pair| p.two.clone(), |p: &mut Pair, v: String| p.two = v)
            .getter("one", |p: &Pair| p.one)
            .build()
            .unwrap()
    }

    #[test]
    fn test_method_dispatch() {
        let class = pair_class();
        let handle = ObjectHandle::new(Pair { one: 1, two: "a".into() });
        let result = class
            .method("shift")
            .unwrap()
            .invoke(&handle, &[VariantValue::Integer(4)])
            .unwrap();
        assert_eq!(result, VariantValue::Integer(5));
    }

    #[test]
    fn test_property_set_then_get() {
        let class = pair_class();
        let handle = ObjectHandle::new(Pair { one: 0, two: String::new() });
        class
            .setter("two")
            .unwrap()(&handle, &VariantValue::String("x".into()))
            .unwrap();
        let value = class.getter("two").unwrap()(&handle).unwrap();
        assert_eq!(value, VariantValue::String("x".into()));
    }

    #[test]
    fn test_setter_type_error_names_property() {
        let class = pair_class();
        let handle = ObjectHandle::new(Pair { one: 0, two: String::new() });
        let err = class
            .setter("two")
            .unwrap()(&handle, &VariantValue::Integer(3))
            .unwrap_err();
        match err {
            BridgeError::TypeConversion { parameter, .. } => assert_eq!(parameter, "two"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_duplicate_member_rejected() {
        let result = ClassBuilder::<Pair>::new("Pair")
            .getter("one", |p: &Pair| p.one)
            .getter("one", |p: &Pair| p.one)
            .build();
        assert!(matches!(result, Err(BridgeError::Registration { .. })));
    }

    #[test]
    fn test_method_property_collision_rejected() {
        let result = ClassBuilder::<Pair>::new("Pair")
            .method("one", &[], |p: &mut Pair| p.one)
            .getter("one", |p: &Pair| p.one)
            .build();
        assert!(matches!(result, Err(BridgeError::Registration { .. })));
    }
}
