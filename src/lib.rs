// Core modules
pub mod closure;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod host;
pub mod logging;
pub mod object;
pub mod registry;
pub mod value;

// Re-export commonly used items
pub use closure::{capture, BoundArg, CaptureScope, ClosureInfo};
pub use config::BridgeConfig;
pub use dispatch::{CallArgs, Dispatcher};
pub use errors::{
    BridgeError, BridgeResult, ConversionError, NameKind, NativeError, PathSegment,
};
pub use host::{emit, set_progress_sink, ProgressSink};
pub use object::{NativeObject, ObjectHandle};
pub use registry::{
    Bridge, CallableDescriptor, ClassBuilder, ClassDescriptor, ClassRegistry,
    ExtensionModule, FunctionRegistry, ModuleBuilder, NativeFunction, NativeMethod,
};
pub use value::{from_variant, to_variant, FromVariant, ImageBlob, IntoVariant, VariantValue};

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
#[pyfunction]
fn invoke_json(name: String, args_json: String) -> PyResult<String> {
    let args: Vec<VariantValue> = serde_json::from_str(&args_json)
        .map_err(|e| PyErr::new::<pyo3::exceptions::PyValueError, _>(e.to_string()))?;

    let result = Bridge::global()
        .dispatcher()
        .invoke(&name, CallArgs::Positional(args))
        .map_err(|e| PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(e.to_string()))?;

    serde_json::to_string(&result)
        .map_err(|e| PyErr::new::<pyo3::exceptions::PyValueError, _>(e.to_string()))
}

#[cfg(feature = "python")]
#[pyfunction]
fn invoke_named_json(name: String, kwargs_json: String) -> PyResult<String> {
    let pairs: std::collections::HashMap<String, VariantValue> =
        serde_json::from_str(&kwargs_json)
            .map_err(|e| PyErr::new::<pyo3::exceptions::PyValueError, _>(e.to_string()))?;

    let result = Bridge::global()
        .dispatcher()
        .invoke(&name, CallArgs::Named(pairs.into_iter().collect()))
        .map_err(|e| PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(e.to_string()))?;

    serde_json::to_string(&result)
        .map_err(|e| PyErr::new::<pyo3::exceptions::PyValueError, _>(e.to_string()))
}

#[cfg(feature = "python")]
#[pyfunction]
fn list_functions() -> Vec<String> {
    Bridge::global().functions().names()
}

#[cfg(feature = "python")]
#[pyfunction]
fn function_doc(name: String) -> PyResult<Option<String>> {
    Ok(Bridge::global()
        .functions()
        .lookup(&name)
        .and_then(|d| d.doc().map(str::to_owned)))
}

#[cfg(feature = "python")]
#[pyfunction]
fn emit_progress(message: String) {
    host::emit(&message);
}

#[cfg(feature = "python")]
#[pymodule]
fn _pylon(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(invoke_json, m)?)?;
    m.add_function(wrap_pyfunction!(invoke_named_json, m)?)?;
    m.add_function(wrap_pyfunction!(list_functions, m)?)?;
    m.add_function(wrap_pyfunction!(function_doc, m)?)?;
    m.add_function(wrap_pyfunction!(emit_progress, m)?)?;
    Ok(())
}
