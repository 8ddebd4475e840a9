//! Full userdata (spec.md §3 "Userdata"): an opaque Rust value with an
//! associated metatable, reachable only through Lua metamethods.
//!
//! The teacher exposes a builder (`lua_value/userdata_builder.rs`) that lets
//! host code attach per-field getters/setters to an arbitrary `T` without a
//! derive macro. This implementation keeps the same idea in a smaller form:
//! a type-erased payload (`Box<dyn Any>`) plus a metatable, since spec.md's
//! stdlib surface (`io` file handles, in particular) only needs identity,
//! a metatable, and downcasting back to the concrete Rust type that created
//! it — not a generic field-exposure builder.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use crate::value::lua_table::LuaTable;

struct UserDataInner {
    payload: RefCell<Box<dyn Any>>,
    type_name: &'static str,
    metatable: RefCell<Option<LuaTable>>,
}

#[derive(Clone)]
pub struct LuaUserData(Rc<UserDataInner>);

impl LuaUserData {
    pub fn new<T: Any>(type_name: &'static str, value: T) -> Self {
        LuaUserData(Rc::new(UserDataInner {
            payload: RefCell::new(Box::new(value)),
            type_name,
            metatable: RefCell::new(None),
        }))
    }

    pub fn type_name(&self) -> &'static str {
        self.0.type_name
    }

    pub fn metatable(&self) -> Option<LuaTable> {
        self.0.metatable.borrow().clone()
    }

    pub fn set_metatable(&self, mt: Option<LuaTable>) {
        *self.0.metatable.borrow_mut() = mt;
    }

    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Runs `f` with a shared borrow of the downcast payload, returning
    /// `None` if `T` does not match what was stored at creation.
    pub fn with<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.0.payload.borrow().downcast_ref::<T>().map(f)
    }

    /// As [`with`](Self::with), but with a mutable borrow.
    pub fn with_mut<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.0.payload.borrow_mut().downcast_mut::<T>().map(f)
    }
}
