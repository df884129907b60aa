//! Poll and write tasks over contiguous register blocks

use crate::channel::ChannelId;
use crate::error::{BmsError, Result};

use super::binding::{RegisterBinding, UpdateHook};

/// Maximum registers for FC03 (read holding registers)
pub const MAX_READ_REGISTERS: u16 = 125;
/// Maximum registers for FC16 (write multiple registers)
pub const MAX_WRITE_REGISTERS: u16 = 123;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    ReadHoldingRegisters,
    WriteSingleRegister,
    WriteMultipleRegisters,
}

impl FunctionCode {
    pub fn code(&self) -> u8 {
        match self {
            FunctionCode::ReadHoldingRegisters => 3,
            FunctionCode::WriteSingleRegister => 6,
            FunctionCode::WriteMultipleRegisters => 16,
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, FunctionCode::ReadHoldingRegisters)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Polled every cycle
    High,
    /// Polled every few cycles
    Low,
}

/// Hook raised by a completed read together with the raw word that fed it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookEvent {
    pub hook: UpdateHook,
    pub raw: Option<u16>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    start: u16,
    function: FunctionCode,
    priority: Priority,
    bindings: Vec<RegisterBinding>,
}

impl Task {
    fn build(
        start: u16,
        function: FunctionCode,
        priority: Priority,
        bindings: Vec<RegisterBinding>,
    ) -> Result<Self> {
        let task = Self {
            start,
            function,
            priority,
            bindings,
        };
        task.validate()?;
        Ok(task)
    }

    /// FC3 read over the block covered by `bindings`
    pub fn read(start: u16, priority: Priority, bindings: Vec<RegisterBinding>) -> Result<Self> {
        Self::build(start, FunctionCode::ReadHoldingRegisters, priority, bindings)
    }

    /// FC6 write target for one single-word register
    pub fn write_single(binding: RegisterBinding) -> Result<Self> {
        if binding.word_count() != 1 {
            return Err(BmsError::protocol(format!(
                "FC6 task at 0x{:04X} needs a single-word register",
                binding.address()
            )));
        }
        Self::build(
            binding.address(),
            FunctionCode::WriteSingleRegister,
            Priority::High,
            vec![binding],
        )
    }

    /// FC16 write target over a contiguous block
    pub fn write_multiple(start: u16, bindings: Vec<RegisterBinding>) -> Result<Self> {
        Self::build(
            start,
            FunctionCode::WriteMultipleRegisters,
            Priority::High,
            bindings,
        )
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn function(&self) -> FunctionCode {
        self.function
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn bindings(&self) -> &[RegisterBinding] {
        &self.bindings
    }

    /// Registers from `start` through the end of the last binding
    pub fn register_count(&self) -> u16 {
        self.bindings
            .last()
            .map(|b| {
                let span = u32::from(b.end_address()) - u32::from(self.start) + 1;
                span.min(u32::from(u16::MAX)) as u16
            })
            .unwrap_or(0)
    }

    pub fn end_address(&self) -> u16 {
        self.start + self.register_count().saturating_sub(1)
    }

    /// True when both tasks read at least one common register
    pub fn overlaps(&self, other: &Task) -> bool {
        self.start <= other.end_address() && other.start <= self.end_address()
    }

    pub fn binding_at(&self, address: u16) -> Option<&RegisterBinding> {
        self.bindings.iter().find(|b| b.address() == address)
    }

    fn validate(&self) -> Result<()> {
        if self.bindings.is_empty() {
            return Err(BmsError::protocol(format!(
                "Task at 0x{:04X} has no bindings",
                self.start
            )));
        }
        let mut next_free = self.start;
        for binding in &self.bindings {
            binding.validate()?;
            if binding.address() < next_free {
                return Err(BmsError::protocol(format!(
                    "Register 0x{:04X} in task 0x{:04X} is unordered or overlaps a previous binding",
                    binding.address(),
                    self.start
                )));
            }
            if u32::from(binding.address()) + u32::from(binding.word_count()) > 0x1_0000 {
                return Err(BmsError::protocol(format!(
                    "Register 0x{:04X} runs past the address space",
                    binding.address()
                )));
            }
            next_free = binding.end_address().saturating_add(1);
        }

        let limit = match self.function {
            FunctionCode::ReadHoldingRegisters => MAX_READ_REGISTERS,
            FunctionCode::WriteSingleRegister => 1,
            FunctionCode::WriteMultipleRegisters => MAX_WRITE_REGISTERS,
        };
        let count = self.register_count();
        if count > limit {
            return Err(BmsError::protocol(format!(
                "Task 0x{:04X} spans {} registers (max {} for FC{})",
                self.start,
                count,
                limit,
                self.function.code()
            )));
        }
        Ok(())
    }

    /// Decode a read buffer into (channel, value) pairs
    pub fn decode(&self, words: &[u16]) -> Result<Vec<(ChannelId, f64)>> {
        let needed = usize::from(self.register_count());
        if words.len() < needed {
            return Err(BmsError::protocol(format!(
                "Task 0x{:04X} expected {} registers, got {}",
                self.start,
                needed,
                words.len()
            )));
        }
        Ok(self
            .bindings
            .iter()
            .flat_map(|b| {
                let offset = usize::from(b.address() - self.start);
                b.decode(&words[offset..])
            })
            .collect())
    }

    /// Hooks to dispatch after a read; `None` words means the read failed
    pub fn hook_events(&self, words: Option<&[u16]>) -> Vec<HookEvent> {
        self.bindings
            .iter()
            .filter_map(|b| {
                let hook = b.hook()?;
                let raw = words.and_then(|w| w.get(usize::from(b.address() - self.start)).copied());
                Some(HookEvent { hook, raw })
            })
            .collect()
    }

    /// Every channel fed by this task
    pub fn targets(&self) -> Vec<ChannelId> {
        self.bindings.iter().flat_map(|b| b.targets()).collect()
    }
}
