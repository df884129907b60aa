//! Register bindings, tasks and the runtime task set

mod binding;
mod task;
mod task_set;

pub use binding::{FieldMapping, Layout, RegisterBinding, Signedness, UpdateHook, Width, WordOrder};
pub use task::{
    FunctionCode, HookEvent, Priority, Task, MAX_READ_REGISTERS, MAX_WRITE_REGISTERS,
};
pub use task_set::{TaskSet, WriteRequest};
