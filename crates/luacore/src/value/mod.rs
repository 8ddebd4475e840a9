//! Lua value representations (spec.md §3).

pub mod closure;
pub mod lua_string;
pub mod lua_table;
pub mod lua_value;
pub mod proto;
pub mod thread;
pub mod userdata;

pub use closure::{LuaClosure, LuaFunction, NativeClosure, NativeClosureFn, NativeFn, NativeFunction, Upvalue, UpvalueState};
pub use lua_string::{LuaStr, StringInterner};
pub use lua_table::{LuaTable, TableKeyError};
pub use lua_value::{LuaValue, LuaValueKind};
pub use proto::Proto;
pub use thread::{CallFrame, LuaThread, ThreadStatus};
pub use userdata::LuaUserData;
