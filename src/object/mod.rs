//! Shared-ownership handles to native class instances
//!
//! Design: an `ObjectHandle` is an atomically reference-counted alias to a
//! live instance. Cloning a handle aliases the instance (both sides observe
//! mutations); crossing the boundary by value goes through `deep_copy`,
//! which invokes the native clone operation and yields an independent
//! instance with count 1. A handle is either valid or it does not exist;
//! there is no dangling state.

use crate::errors::{BridgeError, BridgeResult};
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A native type exposable to the host through a handle
///
/// Implementors supply the public class name and the copy operation used
/// for by-value boundary crossings.
pub trait NativeObject: Any + Send + Sync {
    /// Public class name, as registered in the class registry
    fn class_name(&self) -> &'static str;

    /// Native copy operation for by-value crossings
    fn clone_object(&self) -> Box<dyn NativeObject>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Shared reference to a native class instance
///
/// Two handles obtained by cloning observe each other's mutations; the
/// instance is destroyed when the last handle on either side drops.
/// Reference counting is atomic and safe from both sides of the boundary.
/// The instance itself carries no synchronization beyond the lock guarding
/// a single member access; concurrent method calls on one shared instance
/// are the caller's responsibility.
pub struct ObjectHandle {
    class: String,
    instance: Arc<RwLock<Box<dyn NativeObject>>>,
}

impl ObjectHandle {
    /// Wrap a fresh instance (reference count 1)
    pub fn new<T: NativeObject>(value: T) -> Self {
        let class = value.class_name().to_string();
        Self {
            class,
            instance: Arc::new(RwLock::new(Box::new(value))),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class
    }

    /// Current number of live aliases to the instance
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.instance)
    }

    /// True when both handles alias the same instance
    pub fn ptr_eq(&self, other: &ObjectHandle) -> bool {
        Arc::ptr_eq(&self.instance, &other.instance)
    }

    /// By-value crossing: construct an independent copy via the native
    /// clone operation. The result aliases nothing (count 1).
    pub fn deep_copy(&self) -> ObjectHandle {
        let copy = self.instance.read().clone_object();
        ObjectHandle {
            class: self.class.clone(),
            instance: Arc::new(RwLock::new(copy)),
        }
    }

    /// Read access to the instance as its concrete type
    pub fn with_ref<T: NativeObject, R>(&self, f: impl FnOnce(&T) -> R) -> BridgeResult<R> {
        let guard = self.instance.read();
        let concrete = guard.as_any().downcast_ref::<T>().ok_or_else(|| {
            BridgeError::handle(&self.class, "instance is not of the requested native type")
        })?;
        Ok(f(concrete))
    }

    /// Write access to the instance as its concrete type
    pub fn with_mut<T: NativeObject, R>(&self, f: impl FnOnce(&mut T) -> R) -> BridgeResult<R> {
        let mut guard = self.instance.write();
        let concrete = guard.as_any_mut().downcast_mut::<T>().ok_or_else(|| {
            BridgeError::handle(&self.class, "instance is not of the requested native type")
        })?;
        Ok(f(concrete))
    }
}

impl Clone for ObjectHandle {
    /// Aliasing clone: both handles refer to the same instance
    fn clone(&self) -> Self {
        Self {
            class: self.class.clone(),
            instance: Arc::clone(&self.instance),
        }
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("class", &self.class)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

impl PartialEq for ObjectHandle {
    /// Identity equality: handles are equal when they alias one instance
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

// Handles reference live instances; they are deliberately not
// serializable. Closure persistence surfaces this as a hard error rather
// than silently dropping state.
impl serde::Serialize for ObjectHandle {
    fn serialize<S>(&self, _serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        Err(serde::ser::Error::custom(format!(
            "object handle of class '{}' cannot be serialized",
            self.class
        )))
    }
}

impl<'de> serde::Deserialize<'de> for ObjectHandle {
    fn deserialize<D>(_deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Err(serde::de::Error::custom(
            "object handles cannot be deserialized",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        value: i64,
    }

    impl NativeObject for Counter {
        fn class_name(&self) -> &'static str {
            "Counter"
        }

        fn clone_object(&self) -> Box<dyn NativeObject> {
            Box::new(Counter { value: self.value })
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn test_aliased_handles_share_mutation() {
        let a = ObjectHandle::new(Counter { value: 1 });
        let b = a.clone();
        assert_eq!(a.ref_count(), 2);

        b.with_mut(|c: &mut Counter| c.value = 42).unwrap();
        let seen = a.with_ref(|c: &Counter| c.value).unwrap();
        assert_eq!(seen, 42);
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn test_deep_copy_is_independent() {
        let a = ObjectHandle::new(Counter { value: 1 });
        let b = a.deep_copy();
        assert_eq!(b.ref_count(), 1);
        assert!(!a.ptr_eq(&b));

        b.with_mut(|c: &mut Counter| c.value = 99).unwrap();
        let original = a.with_ref(|c: &Counter| c.value).unwrap();
        assert_eq!(original, 1);
    }

    #[test]
    fn test_wrong_type_downcast_is_handle_error() {
        struct Other;
        impl NativeObject for Other {
            fn class_name(&self) -> &'static str {
                "Other"
            }
            fn clone_object(&self) -> Box<dyn NativeObject> {
                Box::new(Other)
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
            fn as_any_mut(&mut self) -> &mut dyn Any {
                self
            }
        }

        let handle = ObjectHandle::new(Counter { value: 0 });
        let result = handle.with_ref(|_: &Other| ());
        assert!(matches!(result, Err(BridgeError::ObjectHandle { .. })));
    }

    #[test]
    fn test_drop_releases_alias() {
        let a = ObjectHandle::new(Counter { value: 0 });
        let b = a.clone();
        assert_eq!(a.ref_count(), 2);
        drop(b);
        assert_eq!(a.ref_count(), 1);
    }
}
