//! Append-only task set with a pending write queue

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{BmsError, Result};

use super::binding::RegisterBinding;
use super::task::{FunctionCode, Priority, Task};

/// Encoded write ready for the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub address: u16,
    pub function: FunctionCode,
    pub words: Vec<u16>,
}

/// Tasks polled by the transport
///
/// Readers take a snapshot per cycle; the hardware prober is the only
/// writer and swaps in an extended copy, so tasks are never removed.
#[derive(Debug)]
pub struct TaskSet {
    tasks: ArcSwap<Vec<Arc<Task>>>,
    writes: Mutex<Vec<WriteRequest>>,
}

fn check_overlaps<'a>(
    existing: impl Iterator<Item = &'a Task> + Clone,
    added: &'a [Task],
) -> Result<()> {
    for (i, task) in added.iter().enumerate() {
        if !task.function().is_read() {
            continue;
        }
        let clash = existing
            .clone()
            .chain(added[..i].iter())
            .filter(|other| other.function().is_read())
            .find(|other| other.overlaps(task));
        if let Some(other) = clash {
            return Err(BmsError::protocol(format!(
                "Task 0x{:04X}-0x{:04X} overlaps task 0x{:04X}-0x{:04X}",
                task.start(),
                task.end_address(),
                other.start(),
                other.end_address()
            )));
        }
    }
    Ok(())
}

impl TaskSet {
    pub fn new(initial: Vec<Task>) -> Result<Self> {
        check_overlaps(std::iter::empty::<&Task>(), &initial)?;
        Ok(Self {
            tasks: ArcSwap::from_pointee(initial.into_iter().map(Arc::new).collect()),
            writes: Mutex::new(Vec::new()),
        })
    }

    /// Consistent view of every task for this cycle
    pub fn snapshot(&self) -> Arc<Vec<Arc<Task>>> {
        self.tasks.load_full()
    }

    /// Read tasks of one priority, in registration order
    pub fn read_tasks(&self, priority: Priority) -> Vec<Arc<Task>> {
        self.snapshot()
            .iter()
            .filter(|t| t.function().is_read() && t.priority() == priority)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.load().is_empty()
    }

    /// Append tasks; existing tasks are kept
    ///
    /// Fails without changing the set when a new read overlaps an existing one.
    pub fn extend(&self, additional: Vec<Task>) -> Result<usize> {
        if additional.is_empty() {
            return Ok(self.len());
        }
        let current = self.tasks.load_full();
        check_overlaps(current.iter().map(|t| &**t), &additional)?;

        let added: Vec<Arc<Task>> = additional.into_iter().map(Arc::new).collect();
        let count = added.len();
        self.tasks.rcu(|tasks| {
            let mut next = Vec::with_capacity(tasks.len() + added.len());
            next.extend(tasks.iter().cloned());
            next.extend(added.iter().cloned());
            next
        });
        let total = self.len();
        info!(added = count, total, "Task set extended");
        Ok(total)
    }

    /// Binding of the write task targeting `address`
    pub fn write_binding(&self, address: u16) -> Option<RegisterBinding> {
        self.snapshot()
            .iter()
            .filter(|t| !t.function().is_read())
            .find_map(|t| t.binding_at(address).cloned())
    }

    /// Encode `value` through the binding and queue it for the next flush
    ///
    /// A newer write to the same address replaces the queued one.
    pub fn add_write_task(&self, binding: &RegisterBinding, value: f64) -> Result<()> {
        let words = binding.encode(value)?;
        let function = if words.len() == 1 {
            FunctionCode::WriteSingleRegister
        } else {
            FunctionCode::WriteMultipleRegisters
        };
        let request = WriteRequest {
            address: binding.address(),
            function,
            words,
        };
        debug!(
            address = format!("0x{:04X}", request.address),
            value,
            fc = request.function.code(),
            "Write queued"
        );

        let mut writes = self.writes.lock();
        match writes.iter_mut().find(|w| w.address == request.address) {
            Some(pending) => *pending = request,
            None => writes.push(request),
        }
        Ok(())
    }

    /// Queue a write to a register that has a registered write task
    pub fn add_write(&self, address: u16, value: f64) -> Result<()> {
        let binding = self.write_binding(address).ok_or_else(|| {
            BmsError::protocol(format!("No write task for register 0x{:04X}", address))
        })?;
        self.add_write_task(&binding, value)
    }

    /// Take all queued writes in queue order
    pub fn drain_writes(&self) -> Vec<WriteRequest> {
        std::mem::take(&mut *self.writes.lock())
    }

    pub fn pending_writes(&self) -> usize {
        self.writes.lock().len()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::channel::ChannelId;
    use crate::scaling;

    fn reg(address: u16, target: ChannelId) -> RegisterBinding {
        RegisterBinding::unsigned(address).map(target, scaling::DIRECT_1_TO_1)
    }

    fn base() -> TaskSet {
        TaskSet::new(vec![
            Task::read(0x2010, Priority::High, vec![reg(0x2010, ChannelId::PowerCircuitControl)]).unwrap(),
            Task::write_single(reg(0x2010, ChannelId::PowerCircuitControl)).unwrap(),
            Task::read(0x2140, Priority::Low, vec![reg(0x2142, ChannelId::ClusterRunState)]).unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn test_extend_is_additive() {
        let set = base();
        let before = set.snapshot();
        let total = set
            .extend(vec![Task::read(0x210D, Priority::Low, vec![reg(0x210D, ChannelId::ModuleQty)]).unwrap()])
            .unwrap();
        assert_eq!(total, 4);
        assert_eq!(before.len(), 3, "old snapshot is unchanged");
        assert_eq!(set.read_tasks(Priority::Low).len(), 2);
        assert_eq!(set.read_tasks(Priority::High).len(), 1);
    }

    #[test]
    fn test_extend_rejects_overlap() {
        let set = base();
        let err = set
            .extend(vec![Task::read(0x2142, Priority::Low, vec![reg(0x2142, ChannelId::Soc)]).unwrap()])
            .unwrap_err();
        assert!(matches!(err, BmsError::Protocol(_)));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_write_queue_latest_wins() {
        let set = base();
        set.add_write(0x2010, 1.0).unwrap();
        set.add_write(0x2010, 0.0).unwrap();
        assert_eq!(set.pending_writes(), 1);

        let writes = set.drain_writes();
        assert_eq!(
            writes,
            vec![WriteRequest {
                address: 0x2010,
                function: FunctionCode::WriteSingleRegister,
                words: vec![0]
            }]
        );
        assert!(set.drain_writes().is_empty());
    }

    #[test]
    fn test_write_without_task_fails() {
        let set = base();
        assert!(set.add_write(0x2142, 1.0).is_err());
    }

    #[test]
    fn test_write_out_of_range_not_queued() {
        let set = base();
        assert!(set.add_write(0x2010, 70_000.0).is_err());
        assert_eq!(set.pending_writes(), 0);
    }
}
