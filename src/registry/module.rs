//! Module registration surface and the bridge facade
//!
//! A loaded module contributes one function table and one class table,
//! retrieved through the two accessor entry points of [`ExtensionModule`]
//! (or assembled declaratively with [`ModuleBuilder`]). Registration
//! happens exactly once per module at load time; a duplicate name or a
//! double load is surfaced immediately, never at call time.

use crate::closure::{self, CaptureScope, ClosureInfo};
use crate::config::BridgeConfig;
use crate::dispatch::Dispatcher;
use crate::errors::{BridgeError, BridgeResult, NameKind};
use crate::registry::class::{ClassDescriptor, ClassRegistry};
use crate::registry::function::{
    CallableDescriptor, FunctionRegistry, NativeFunction,
};
use dashmap::DashMap;
use std::sync::Arc;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::info;

/// The two well-known accessor entry points a loadable module exposes
pub trait ExtensionModule: Send + Sync {
    fn name(&self) -> &str;

    /// Function registration table, built fresh for the loader
    fn functions(&self) -> BridgeResult<Vec<CallableDescriptor>> {
        Ok(Vec::new())
    }

    /// Class registration table, built fresh for the loader
    fn classes(&self) -> BridgeResult<Vec<ClassDescriptor>> {
        Ok(Vec::new())
    }
}

/// Declarative registration step: ordered entries of
/// `(internal_name, public_name, parameter_names, docstring?)`
pub struct ModuleBuilder {
    name: String,
    functions: Vec<CallableDescriptor>,
    classes: Vec<ClassDescriptor>,
    deferred_error: Option<BridgeError>,
}

impl ModuleBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            functions: Vec::new(),
            classes: Vec::new(),
            deferred_error: None,
        }
    }

    pub fn function<F, A, M>(self, public_name: &str, params: &[&str], f: F) -> Self
    where
        F: NativeFunction<A, M>,
    {
        self.entry(public_name, None, params, None, f)
    }

    pub fn function_with_doc<F, A, M>(
        self,
        public_name: &str,
        params: &[&str],
        doc: &str,
        f: F,
    ) -> Self
    where
        F: NativeFunction<A, M>,
    {
        self.entry(public_name, None, params, Some(doc), f)
    }

    /// Publish under a name different from the internal one
    pub fn function_renamed<F, A, M>(
        self,
        internal_name: &str,
        public_name: &str,
        params: &[&str],
        f: F,
    ) -> Self
    where
        F: NativeFunction<A, M>,
    {
        self.entry(public_name, Some(internal_name), params, None, f)
    }

    fn entry<F, A, M>(
        mut self,
        public_name: &str,
        internal_name: Option<&str>,
        params: &[&str],
        doc: Option<&str>,
        f: F,
    ) -> Self
    where
        F: NativeFunction<A, M>,
    {
        match CallableDescriptor::new(public_name, internal_name, params, doc, f) {
            Ok(descriptor) => self.functions.push(descriptor),
            Err(e) => {
                if self.deferred_error.is_none() {
                    self.deferred_error = Some(e);
                }
            }
        }
        self
    }

    /// Attach a class descriptor (typically a `ClassBuilder::build` result)
    pub fn class(mut self, descriptor: BridgeResult<ClassDescriptor>) -> Self {
        match descriptor {
            Ok(descriptor) => self.classes.push(descriptor),
            Err(e) => {
                if self.deferred_error.is_none() {
                    self.deferred_error = Some(e);
                }
            }
        }
        self
    }

    /// Install the collected tables into `bridge`, consuming the builder
    pub fn install(self, bridge: &Bridge) -> BridgeResult<()> {
        if let Some(error) = self.deferred_error {
            return Err(error);
        }
        bridge.install(&self.name, self.functions, self.classes)
    }
}

struct ModuleManifest {
    functions: Vec<String>,
    classes: Vec<String>,
}

/// Process-wide bridge state: the registries, the set of loaded modules,
/// and the dispatch configuration
pub struct Bridge {
    functions: Arc<FunctionRegistry>,
    classes: Arc<ClassRegistry>,
    loaded: DashMap<String, ModuleManifest>,
    load_lock: Mutex<()>,
    config: BridgeConfig,
}

static GLOBAL: Lazy<Bridge> = Lazy::new(Bridge::new);

impl Bridge {
    pub fn new() -> Self {
        Self::with_config(BridgeConfig::default())
    }

    pub fn with_config(config: BridgeConfig) -> Self {
        Self {
            functions: Arc::new(FunctionRegistry::new()),
            classes: Arc::new(ClassRegistry::new()),
            loaded: DashMap::new(),
            load_lock: Mutex::new(()),
            config,
        }
    }

    /// The process-wide instance used by embedding hosts
    pub fn global() -> &'static Bridge {
        &GLOBAL
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// A dispatcher over this bridge's registries
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            Arc::clone(&self.functions),
            Arc::clone(&self.classes),
        )
        .catch_panics(self.config.dispatch.catch_panics)
    }

    /// Load a module through its accessor entry points
    pub fn load(&self, module: &dyn ExtensionModule) -> BridgeResult<()> {
        let functions = module.functions()?;
        let classes = module.classes()?;
        self.install(module.name(), functions, classes)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.contains_key(name)
    }

    /// Remove a module's names from the registries
    ///
    /// Closures captured against the module keep their keys; invoking
    /// them afterwards fails with an unknown-name error until the module
    /// is loaded again.
    pub fn unload(&self, name: &str) -> BridgeResult<()> {
        let _guard = self.load_lock.lock();
        let (_, manifest) = self.loaded.remove(name).ok_or(BridgeError::UnknownName {
            kind: NameKind::Module,
            name: name.to_string(),
        })?;
        for function in &manifest.functions {
            self.functions.remove(function);
        }
        for class in &manifest.classes {
            self.classes.remove(class);
        }
        info!(module = name, "module unloaded");
        Ok(())
    }

    /// Validate a host callable against the restricted closure grammar
    pub fn capture(&self, source: &str, scope: &CaptureScope) -> BridgeResult<ClosureInfo> {
        closure::capture_with_limit(
            source,
            scope,
            &self.functions,
            self.config.closure.max_nesting,
        )
    }

    pub(crate) fn install(
        &self,
        name: &str,
        functions: Vec<CallableDescriptor>,
        classes: Vec<ClassDescriptor>,
    ) -> BridgeResult<()> {
        let _guard = self.load_lock.lock();

        if self.loaded.contains_key(name) {
            return Err(BridgeError::registration(
                Some(name),
                name,
                "module already loaded; registration occurs once per load",
            ));
        }

        // Validate the whole load before touching the registries so a
        // duplicate name leaves no partial registration behind.
        let mut seen = std::collections::HashSet::new();
        for descriptor in &functions {
            let public = descriptor.public_name();
            if !seen.insert(public.to_string()) {
                return Err(BridgeError::registration(
                    Some(name),
                    public,
                    "duplicate function name within module",
                ));
            }
            if self.functions.contains(public) {
                return Err(BridgeError::registration(
                    Some(name),
                    public,
                    "function name already registered by another module",
                ));
            }
        }
        let mut seen_classes = std::collections::HashSet::new();
        for descriptor in &classes {
            let class = descriptor.name();
            if !seen_classes.insert(class.to_string()) {
                return Err(BridgeError::registration(
                    Some(name),
                    class,
                    "duplicate class name within module",
                ));
            }
            if self.classes.contains(class) {
                return Err(BridgeError::registration(
                    Some(name),
                    class,
                    "class name already registered by another module",
                ));
            }
        }

        let manifest = ModuleManifest {
            functions: functions.iter().map(|d| d.public_name().to_string()).collect(),
            classes: classes.iter().map(|d| d.name().to_string()).collect(),
        };
        let function_count = functions.len();
        let class_count = classes.len();

        for descriptor in functions {
            self.functions.register(descriptor)?;
        }
        for descriptor in classes {
            self.classes.register(descriptor)?;
        }
        self.loaded.insert(name.to_string(), manifest);

        info!(
            module = name,
            functions = function_count,
            classes = class_count,
            "module loaded"
        );
        Ok(())
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::VariantValue;

    fn add(a: i64, b: i64) -> i64 {
        a + b
    }

    #[test]
    fn test_builder_install_and_dispatch() {
        let bridge = Bridge::new();
        ModuleBuilder::new("arith")
            .function_with_doc("add_integers", &["a", "b"], "Add two integers.", add)
            .install(&bridge)
            .unwrap();

        assert!(bridge.is_loaded("arith"));
        let result = bridge
            .dispatcher()
            .invoke(
                "add_integers",
                vec![VariantValue::Integer(5), VariantValue::Integer(10)].into(),
            )
            .unwrap();
        assert_eq!(result, VariantValue::Integer(15));
    }

    #[test]
    fn test_double_load_rejected() {
        let bridge = Bridge::new();
        ModuleBuilder::new("m").function("f", &[], || 1i64).install(&bridge).unwrap();
        let err = ModuleBuilder::new("m")
            .function("g", &[], || 2i64)
            .install(&bridge)
            .unwrap_err();
        assert!(matches!(err, BridgeError::Registration { .. }));
    }

    #[test]
    fn test_duplicate_name_is_load_time_and_atomic() {
        let bridge = Bridge::new();
        let err = ModuleBuilder::new("m")
            .function("f", &[], || 1i64)
            .function("f", &[], || 2i64)
            .install(&bridge)
            .unwrap_err();
        assert!(matches!(err, BridgeError::Registration { .. }));
        // Nothing from the failed load is visible
        assert!(!bridge.is_loaded("m"));
        assert!(bridge.functions().lookup("f").is_none());
    }

    #[test]
    fn test_unload_removes_names() {
        let bridge = Bridge::new();
        ModuleBuilder::new("m").function("f", &[], || 1i64).install(&bridge).unwrap();
        bridge.unload("m").unwrap();
        assert!(!bridge.is_loaded("m"));
        assert!(bridge.functions().lookup("f").is_none());
        assert!(matches!(
            bridge.unload("m"),
            Err(BridgeError::UnknownName { kind: NameKind::Module, .. })
        ));
    }

    #[test]
    fn test_trait_loading_path() {
        struct Arith;
        impl ExtensionModule for Arith {
            fn name(&self) -> &str {
                "arith"
            }
            fn functions(&self) -> BridgeResult<Vec<CallableDescriptor>> {
                Ok(vec![CallableDescriptor::new(
                    "add_integers",
                    None,
                    &["a", "b"],
                    None,
                    add,
                )?])
            }
        }

        let bridge = Bridge::new();
        bridge.load(&Arith).unwrap();
        assert!(bridge.functions().contains("add_integers"));
    }
}
