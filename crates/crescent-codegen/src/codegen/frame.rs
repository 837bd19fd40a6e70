/// Per-function mutable state while its body is being generated.
use crate::opcode::Instruction;
use crate::proto::{Local, Proto, UpvalDesc};
use crescent_core::string::StringId;
use crescent_core::value::Value;

/// Register bookkeeping for a single function.
///
/// `next` is the next register to hand out and is monotonically
/// non-decreasing across a statement sequence, except when a call's actual
/// result count rewinds it. `max` is the high-water mark and survives
/// rewinds.
pub(crate) struct Registers {
    pub next: u8,
    free: Vec<u8>,
    pub max: u8,
}

impl Registers {
    fn new() -> Self {
        Registers {
            next: 0,
            free: Vec::new(),
            max: 0,
        }
    }

    /// Hand out the next fresh register.
    pub fn next_reg(&mut self) -> u8 {
        let reg = self.next;
        self.next += 1;
        if self.next > self.max {
            self.max = self.next;
        }
        reg
    }

    /// Prefer a reclaimed register, falling back to a fresh one.
    pub fn usable_reg(&mut self) -> u8 {
        match self.free.pop() {
            Some(reg) => reg,
            None => self.next_reg(),
        }
    }

    /// Move the allocation point, used once a call's result count is known.
    /// Usually a rewind, but a call asked for more results than it had
    /// arguments grows the window, so the high-water mark is maintained
    /// here too.
    pub fn set_next_reg(&mut self, next: u8) {
        self.next = next;
        if next > self.max {
            self.max = next;
        }
    }

    /// Return a temporary to the pool. Reclamation is wired through
    /// `usable_reg` but nothing releases registers yet.
    #[allow(dead_code)]
    pub fn release_reg(&mut self, reg: u8) {
        self.free.push(reg);
    }
}

/// State for a single function being generated. Owns the `Proto` under
/// construction; parent links live in the generator's function stack as
/// indices, so nothing here points upward.
pub(crate) struct FuncState {
    pub proto: Proto,
    pub regs: Registers,
}

impl FuncState {
    pub fn new() -> Self {
        FuncState {
            proto: Proto::new(),
            regs: Registers::new(),
        }
    }

    pub fn emit(&mut self, inst: Instruction) -> usize {
        self.proto.emit(inst)
    }

    pub fn pc(&self) -> usize {
        self.proto.code_len()
    }

    pub fn add_const(&mut self, v: Value) -> u32 {
        self.proto.add_const(v)
    }

    /// Declare a local bound to a specific register.
    pub fn def_local_at(&mut self, name: StringId, reg: u8) {
        self.proto.locals.push(Local { name, reg });
    }

    /// Declare a local in a freshly allocated register.
    pub fn def_local(&mut self, name: StringId) -> u8 {
        let reg = self.regs.next_reg();
        self.def_local_at(name, reg);
        reg
    }

    pub fn has_local(&self, name: StringId) -> bool {
        self.lookup_local(name).is_some()
    }

    /// Register of a declared local; the latest declaration wins.
    pub fn lookup_local(&self, name: StringId) -> Option<u8> {
        self.proto
            .locals
            .iter()
            .rev()
            .find(|l| l.name == name)
            .map(|l| l.reg)
    }

    pub fn find_upvalue(&self, name: StringId) -> Option<u8> {
        self.proto
            .upvalues
            .iter()
            .position(|u| u.name == name)
            .map(|i| i as u8)
    }

    /// Record a capture, reusing the existing entry for a name already
    /// captured.
    pub fn add_upvalue(&mut self, name: StringId, in_stack: bool, index: u8) -> u8 {
        if let Some(i) = self.find_upvalue(name) {
            return i;
        }
        let idx = self.proto.upvalues.len() as u8;
        self.proto.upvalues.push(UpvalDesc {
            name,
            in_stack,
            index,
        });
        idx
    }

    /// Seal the function: record the register high-water mark and hand the
    /// finished prototype to the caller.
    pub fn finish(mut self) -> Proto {
        self.proto.max_stack_size = self.regs.max.max(2);
        self.proto
    }
}
