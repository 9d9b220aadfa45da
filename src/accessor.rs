//! Typed getter/setter dispatch
//!
//! A property is backed by at most one getter and one setter. Both are plain
//! function pointers of the same primitive type, so the tag and the callback
//! can never disagree: the callback enum variant *is* the tag.

use crate::error::{Error, Result};
use crate::value::{for_each_primitive, PrimitiveType, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_callbacks {
    ($($variant:ident => $ty:ty, $name:literal;)*) => {
        /// Getter callback, one variant per primitive type
        #[derive(Debug, Clone, Copy)]
        pub enum Getter {
            $($variant(fn() -> $ty),)*
        }

        /// Setter callback, one variant per primitive type
        #[derive(Debug, Clone, Copy)]
        pub enum Setter {
            $($variant(fn($ty)),)*
        }

        impl Getter {
            pub const fn ty(&self) -> PrimitiveType {
                match self {
                    $(Getter::$variant(_) => PrimitiveType::$variant,)*
                }
            }

            pub fn call(&self) -> Value {
                match self {
                    $(Getter::$variant(f) => Value::$variant(f()),)*
                }
            }
        }

        impl Setter {
            pub const fn ty(&self) -> PrimitiveType {
                match self {
                    $(Setter::$variant(_) => PrimitiveType::$variant,)*
                }
            }

            pub fn call(&self, value: Value) -> Result<()> {
                match (self, value) {
                    $((Setter::$variant(f), Value::$variant(v)) => {
                        f(v);
                        Ok(())
                    })*
                    (setter, value) => Err(Error::TypeMismatch {
                        expected: setter.ty(),
                        found: value.ty(),
                    }),
                }
            }
        }
    };
}

for_each_primitive!(define_callbacks);

/// Which side of an accessor an operation needed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessorKind {
    Getter,
    Setter,
}

impl fmt::Display for AccessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessorKind::Getter => f.write_str("getter"),
            AccessorKind::Setter => f.write_str("setter"),
        }
    }
}

/// Type tag plus optional getter and setter
///
/// Invariant: any present callback has the type `ty`. Replacing one side
/// with a different type clears the other side.
#[derive(Debug, Clone, Copy, Default)]
pub struct Accessor {
    ty: Option<PrimitiveType>,
    getter: Option<Getter>,
    setter: Option<Setter>,
}

impl Accessor {
    /// Inert accessor: no type, no callbacks
    pub const fn none() -> Self {
        Self {
            ty: None,
            getter: None,
            setter: None,
        }
    }

    pub const fn read_only(getter: Getter) -> Self {
        Self {
            ty: Some(getter.ty()),
            getter: Some(getter),
            setter: None,
        }
    }

    pub const fn write_only(setter: Setter) -> Self {
        Self {
            ty: Some(setter.ty()),
            getter: None,
            setter: Some(setter),
        }
    }

    /// Getter and setter of the same type
    ///
    /// # Panics
    /// Panics if the two callbacks have different types. In a `const`
    /// context (static entry tables) this is a compile error.
    pub const fn read_write(getter: Getter, setter: Setter) -> Self {
        assert!(
            getter.ty() as u8 == setter.ty() as u8,
            "getter and setter must have the same primitive type"
        );
        Self {
            ty: Some(getter.ty()),
            getter: Some(getter),
            setter: Some(setter),
        }
    }

    /// Fallible constructor for runtime-assembled accessors
    pub fn new(getter: Option<Getter>, setter: Option<Setter>) -> Result<Self> {
        match (getter, setter) {
            (Some(g), Some(s)) if g.ty() != s.ty() => Err(Error::TypeMismatch {
                expected: g.ty(),
                found: s.ty(),
            }),
            (Some(g), Some(s)) => Ok(Self::read_write(g, s)),
            (Some(g), None) => Ok(Self::read_only(g)),
            (None, Some(s)) => Ok(Self::write_only(s)),
            (None, None) => Ok(Self::none()),
        }
    }

    pub fn ty(&self) -> Option<PrimitiveType> {
        self.ty
    }

    pub fn getter(&self) -> Option<Getter> {
        self.getter
    }

    pub fn setter(&self) -> Option<Setter> {
        self.setter
    }

    pub fn has_getter(&self) -> bool {
        self.getter.is_some()
    }

    pub fn has_setter(&self) -> bool {
        self.setter.is_some()
    }

    /// True when neither callback is present
    pub fn is_inert(&self) -> bool {
        self.getter.is_none() && self.setter.is_none()
    }

    /// Every present callback matches the tag
    pub fn is_consistent(&self) -> bool {
        let getter_ok = self.getter.map_or(true, |g| Some(g.ty()) == self.ty);
        let setter_ok = self.setter.map_or(true, |s| Some(s.ty()) == self.ty);
        getter_ok && setter_ok
    }

    /// Install a getter. Returns true if the type tag changed, in which case
    /// the setter was dropped.
    pub fn update_getter(&mut self, getter: Getter) -> bool {
        let changed = self.ty != Some(getter.ty());
        if changed {
            self.setter = None;
        }
        self.ty = Some(getter.ty());
        self.getter = Some(getter);
        changed
    }

    /// Install a setter. Returns true if the type tag changed, in which case
    /// the getter was dropped.
    pub fn update_setter(&mut self, setter: Setter) -> bool {
        let changed = self.ty != Some(setter.ty());
        if changed {
            self.getter = None;
        }
        self.ty = Some(setter.ty());
        self.setter = Some(setter);
        changed
    }

    pub fn clear_getter(&mut self) {
        self.getter = None;
    }

    pub fn clear_setter(&mut self) {
        self.setter = None;
    }

    /// Drop both callbacks and the tag
    pub fn clear(&mut self) {
        *self = Self::none();
    }

    /// Invoke the getter and write its value into `out`
    ///
    /// Writes exactly `ty().size()` bytes and returns that count.
    pub fn get_value(&self, out: &mut [u8]) -> Result<usize> {
        let getter = self.getter.ok_or(Error::NoAccessor {
            kind: AccessorKind::Getter,
        })?;
        getter.call().write_to(out)
    }

    /// Read `ty().size()` bytes from `input` and hand them to the setter
    pub fn set_value(&self, input: &[u8]) -> Result<()> {
        let setter = self.setter.ok_or(Error::NoAccessor {
            kind: AccessorKind::Setter,
        })?;
        let value = Value::read_from(setter.ty(), input)?;
        setter.call(value)
    }

    /// Typed read; `ty` must equal the accessor's tag
    pub fn read(&self, ty: PrimitiveType) -> Result<Value> {
        let getter = self.getter.ok_or(Error::NoAccessor {
            kind: AccessorKind::Getter,
        })?;
        if getter.ty() != ty {
            return Err(Error::TypeMismatch {
                expected: getter.ty(),
                found: ty,
            });
        }
        Ok(getter.call())
    }

    /// Typed write; `value` must carry the accessor's tag
    pub fn write(&self, value: Value) -> Result<()> {
        let setter = self.setter.ok_or(Error::NoAccessor {
            kind: AccessorKind::Setter,
        })?;
        setter.call(value)
    }
}
