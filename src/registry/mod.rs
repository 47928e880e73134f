//! Name-keyed registries describing callable functions and class members
//!
//! Architecture:
//! - `function.rs` - erased function descriptors + the function registry
//! - `class.rs` - class member tables, builder, and the class registry
//! - `module.rs` - module loading surface and the `Bridge` facade

pub mod class;
pub mod function;
pub mod module;

pub use class::{
    ClassBuilder, ClassDescriptor, ClassRegistry, MethodDescriptor, NativeMethod,
};
pub use function::{
    CallableDescriptor, Fallible, FunctionRegistry, Invoker, NativeFunction, Pure,
};
pub use module::{Bridge, ExtensionModule, ModuleBuilder};
