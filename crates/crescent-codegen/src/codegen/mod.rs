/// AST-directed bytecode generation: Chunk → Proto tree.
mod frame;

use crate::ast::{BinOp, Chunk, Expr, Stat, UnOp};
use crate::opcode::{rk, Instruction, OpCode};
use crate::proto::Proto;
use crescent_core::string::{StringId, StringInterner};
use crescent_core::value::Value;
use frame::FuncState;
use std::fmt;

/// Code generation error.
#[derive(Clone, Debug)]
pub struct CodegenError {
    pub message: String,
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CodegenError {}

/// How many results the surrounding context wants from an expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Want {
    /// Exactly one value. The default for operands, initializers, and
    /// arguments.
    One,
    /// Exactly `n` values; a call delivers them in the registers starting
    /// at its own and the allocation point is rewound past them.
    Count(u8),
    /// Every result, count unknown at compile time (trailing position of an
    /// argument list).
    All,
    /// Condition position: comparisons emit their bare test instruction and
    /// no boolean is materialized.
    Test,
}

/// Where an assignment target lives.
enum Slot {
    Local(u8),
    Upval(u8),
    Global { env: u8, name_rk: u16 },
}

/// A store deferred until every right-hand side has been evaluated.
enum Pending {
    SetUpval { value: u8, idx: u8 },
    SetTabUp { env: u8, name_rk: u16, value: u8 },
}

/// The generator: an interner handle and the stack of functions being
/// generated, innermost last. Upvalue resolution walks this stack by index.
pub struct Generator<'a> {
    strings: &'a mut StringInterner,
    env: StringId,
    func_stack: Vec<FuncState>,
}

/// Generate bytecode for a chunk. `name` becomes the prototype tree's
/// source handle.
pub fn generate(
    chunk: &Chunk,
    name: &str,
    strings: &mut StringInterner,
) -> Result<Proto, CodegenError> {
    let source = strings.intern(name.as_bytes());
    let env = strings.intern(b"_ENV");

    let mut root = FuncState::new();
    root.proto.source = Some(source);
    root.add_upvalue(env, true, 0);

    let mut generator = Generator {
        strings,
        env,
        func_stack: vec![root],
    };
    for stat in &chunk.body {
        generator.gen_stat(stat)?;
    }
    generator.emit(Instruction::abc(OpCode::Return, 0, 1, 0));

    let root = generator.func_stack.pop().expect("root function state");
    Ok(root.finish())
}

impl<'a> Generator<'a> {
    fn fs(&self) -> &FuncState {
        self.func_stack.last().unwrap()
    }

    fn fs_mut(&mut self) -> &mut FuncState {
        self.func_stack.last_mut().unwrap()
    }

    fn error(&self, msg: impl Into<String>) -> CodegenError {
        CodegenError {
            message: msg.into(),
        }
    }

    /// Register of a local that must already be declared.
    fn local_reg(&self, name: StringId) -> u8 {
        self.fs().lookup_local(name).unwrap_or_else(|| {
            panic!("local '{}' is not declared", self.strings.display(name))
        })
    }

    // ---- Emission helpers ----

    fn emit(&mut self, inst: Instruction) -> usize {
        self.fs_mut().emit(inst)
    }

    /// Emit a placeholder jump, to be patched later.
    fn emit_jump(&mut self) -> usize {
        self.emit(Instruction::asbx(OpCode::Jmp, 0, 0))
    }

    /// Point a jump at the current PC. Offsets are relative to the
    /// instruction after the jump.
    fn patch_jump(&mut self, jump_pc: usize) {
        let target = self.fs().pc();
        let offset = target as i32 - jump_pc as i32 - 1;
        self.fs_mut().proto.get_mut(jump_pc).set_sbx(offset);
    }

    // ---- Statements ----

    fn gen_stat(&mut self, stat: &Stat) -> Result<(), CodegenError> {
        match stat {
            Stat::Local { names, exprs } => self.gen_local(names, exprs),
            Stat::Assign { targets, values } => self.gen_assign(targets, values),
            Stat::If {
                cond,
                consequent,
                alternate,
            } => self.gen_if(cond, consequent, alternate.as_deref()),
            Stat::Do(body) => {
                for s in body {
                    self.gen_stat(s)?;
                }
                Ok(())
            }
            Stat::Call(expr) => match expr {
                Expr::Call { callee, args } => {
                    // No outer target and no results used.
                    self.gen_call(callee, args, None, Want::Count(0))?;
                    Ok(())
                }
                other => Err(self.error(format!(
                    "call statement holds a {}",
                    other.kind_name()
                ))),
            },
            Stat::Return(exprs) => self.gen_return(exprs),
            Stat::Function {
                name,
                is_local,
                params,
                body,
            } => self.gen_function_stat(*name, *is_local, params, body),
            other => Err(self.error(format!("unsupported construct: {}", other.kind_name()))),
        }
    }

    /// `local n1, ..., nN = e1, ..., eM`
    fn gen_local(&mut self, names: &[StringId], exprs: &[Expr]) -> Result<(), CodegenError> {
        let n = names.len();
        let m = exprs.len();
        for i in 0..n {
            if i >= m {
                // No initializer left: one nil each.
                let reg = self.fs_mut().def_local(names[i]);
                self.emit(Instruction::abc(OpCode::LoadNil, reg, 0, 0));
                continue;
            }
            let reg = self.fs_mut().def_local(names[i]);
            if i == m - 1 && exprs[i].is_call() {
                // A trailing call covers this name and every one after it.
                let want = (n - i) as u8;
                let mut base = reg;
                if let Expr::Call { callee, args } = &exprs[i] {
                    base = self.gen_call(callee, args, Some(reg), Want::Count(want))?;
                }
                for (k, extra) in names[i + 1..].iter().enumerate() {
                    self.fs_mut().def_local_at(*extra, base + 1 + k as u8);
                }
                return Ok(());
            }
            self.gen_expr(&exprs[i], reg, Want::One)?;
        }
        Ok(())
    }

    /// `t1, ..., tN = e1, ..., eM`
    ///
    /// Values land first (locals in place, upvalues and globals in
    /// temporaries); upvalue and global stores are flushed afterwards in
    /// collection order.
    fn gen_assign(&mut self, targets: &[StringId], values: &[Expr]) -> Result<(), CodegenError> {
        let n = targets.len();
        let m = values.len();
        let mut pending: Vec<Pending> = Vec::new();
        // Set once a trailing call has filled the remaining positions:
        // (first result register, target index it corresponds to).
        let mut spill: Option<(u8, usize)> = None;

        for i in 0..n {
            let slot = self.resolve_target(targets[i]);
            if let Some((base, origin)) = spill {
                // The call's extra results already sit in consecutive
                // registers; locals in these positions were filled only if
                // their registers line up, matching the reference behavior.
                let value = base + (i - origin) as u8;
                Self::defer_store(&mut pending, slot, value);
                continue;
            }
            if i < m {
                let dest = match slot {
                    Slot::Local(reg) => reg,
                    _ => self.fs_mut().regs.usable_reg(),
                };
                if i == m - 1 && values[i].is_call() {
                    let want = (n - i) as u8;
                    let mut base = dest;
                    if let Expr::Call { callee, args } = &values[i] {
                        base = self.gen_call(callee, args, Some(dest), Want::Count(want))?;
                    }
                    if i + 1 < n {
                        // Later targets read from where the results really
                        // landed, which is not `dest` for a staged call.
                        spill = Some((base, i));
                    }
                } else {
                    self.gen_expr(&values[i], dest, Want::One)?;
                }
                Self::defer_store(&mut pending, slot, dest);
            } else {
                // The value list ran out without a trailing call: pad with nil.
                let dest = match slot {
                    Slot::Local(reg) => reg,
                    _ => self.fs_mut().regs.usable_reg(),
                };
                self.emit(Instruction::abc(OpCode::LoadNil, dest, 0, 0));
                Self::defer_store(&mut pending, slot, dest);
            }
        }

        for p in pending {
            match p {
                Pending::SetUpval { value, idx } => {
                    self.emit(Instruction::abc(OpCode::SetUpval, value, idx as u16, 0));
                }
                Pending::SetTabUp {
                    env,
                    name_rk,
                    value,
                } => {
                    self.emit(Instruction::abc(
                        OpCode::SetTabUp,
                        env,
                        name_rk,
                        value as u16,
                    ));
                }
            }
        }
        Ok(())
    }

    fn resolve_target(&mut self, name: StringId) -> Slot {
        if self.fs().has_local(name) {
            return Slot::Local(self.local_reg(name));
        }
        let top = self.func_stack.len() - 1;
        if let Some(idx) = self.resolve_upvalue(top, name) {
            return Slot::Upval(idx);
        }
        let env = self.env_upvalue();
        let k = self.fs_mut().add_const(Value::Str(name));
        Slot::Global {
            env,
            name_rk: rk(k),
        }
    }

    fn defer_store(pending: &mut Vec<Pending>, slot: Slot, value: u8) {
        match slot {
            Slot::Local(_) => {} // written in place
            Slot::Upval(idx) => pending.push(Pending::SetUpval { value, idx }),
            Slot::Global { env, name_rk } => pending.push(Pending::SetTabUp {
                env,
                name_rk,
                value,
            }),
        }
    }

    /// `if cond then ... [else ...] end`
    fn gen_if(
        &mut self,
        cond: &Expr,
        consequent: &[Stat],
        alternate: Option<&[Stat]>,
    ) -> Result<(), CodegenError> {
        let reg = self.fs().regs.next;
        self.gen_expr(cond, reg, Want::Test)?;
        self.emit(Instruction::abc(OpCode::Test, reg, 0, 0));
        let skip_then = self.emit_jump();
        for s in consequent {
            self.gen_stat(s)?;
        }
        let skip_else = self.emit_jump();
        self.patch_jump(skip_then);
        if let Some(alt) = alternate {
            for s in alt {
                self.gen_stat(s)?;
            }
        }
        self.patch_jump(skip_else);
        Ok(())
    }

    /// `return e1, ..., eN`
    fn gen_return(&mut self, exprs: &[Expr]) -> Result<(), CodegenError> {
        if exprs.is_empty() {
            self.emit(Instruction::abc(OpCode::Return, 0, 1, 0));
            return Ok(());
        }
        let first = self.fs().regs.next;
        for e in exprs {
            let reg = self.fs_mut().regs.next_reg();
            self.gen_expr(e, reg, Want::One)?;
        }
        self.emit(Instruction::abc(
            OpCode::Return,
            first,
            exprs.len() as u16 + 1,
            0,
        ));
        Ok(())
    }

    /// `[local] function name(params) ... end`
    fn gen_function_stat(
        &mut self,
        name: StringId,
        is_local: bool,
        params: &[StringId],
        body: &[Stat],
    ) -> Result<(), CodegenError> {
        let proto_idx = self.gen_function_proto(params, body)?;
        let target = self.fs_mut().regs.usable_reg();
        if is_local {
            self.fs_mut().def_local_at(name, target);
        }
        self.emit(Instruction::abx(OpCode::Closure, target, proto_idx));
        if !is_local {
            let env = self.env_upvalue();
            let k = self.fs_mut().add_const(Value::Str(name));
            self.emit(Instruction::abc(
                OpCode::SetTabUp,
                env,
                rk(k),
                target as u16,
            ));
        }
        Ok(())
    }

    /// Generate a nested function body, append it to the current function's
    /// children, and return its index (the CLOSURE Bx operand).
    fn gen_function_proto(
        &mut self,
        params: &[StringId],
        body: &[Stat],
    ) -> Result<u32, CodegenError> {
        let mut fs = FuncState::new();
        fs.proto.source = self.fs().proto.source;
        fs.proto.num_params = params.len() as u8;
        self.func_stack.push(fs);
        for p in params {
            self.fs_mut().def_local(*p);
        }
        for s in body {
            self.gen_stat(s)?;
        }
        self.emit(Instruction::abc(OpCode::Return, 0, 1, 0));

        let child = self.func_stack.pop().expect("child function state");
        let parent = self.fs_mut();
        let idx = parent.proto.protos.len() as u32;
        parent.proto.protos.push(child.finish());
        Ok(idx)
    }

    // ---- Expressions ----

    /// Deliver the primary result of `e` into `dest`.
    fn gen_expr(&mut self, e: &Expr, dest: u8, want: Want) -> Result<(), CodegenError> {
        match e {
            Expr::Nil => {
                self.emit(Instruction::abc(OpCode::LoadNil, dest, 0, 0));
                Ok(())
            }
            Expr::Boolean(b) => {
                self.emit(Instruction::abc(OpCode::LoadBool, dest, *b as u16, 0));
                Ok(())
            }
            Expr::Number(n) => {
                let k = self.fs_mut().add_const(Value::Number(*n));
                self.emit(Instruction::abx(OpCode::LoadK, dest, k));
                Ok(())
            }
            Expr::Str(id) => {
                let k = self.fs_mut().add_const(Value::Str(*id));
                self.emit(Instruction::abx(OpCode::LoadK, dest, k));
                Ok(())
            }
            Expr::Name(id) => {
                self.gen_name(*id, dest);
                Ok(())
            }
            Expr::Binary { op, lhs, rhs } => self.gen_binary(*op, lhs, rhs, dest, want),
            Expr::Unary { op, operand } => self.gen_unary(*op, operand, dest),
            Expr::Call { callee, args } => {
                self.gen_call(callee, args, Some(dest), want)?;
                Ok(())
            }
            Expr::Function { params, body } => {
                let idx = self.gen_function_proto(params, body)?;
                self.emit(Instruction::abx(OpCode::Closure, dest, idx));
                Ok(())
            }
            other => Err(self.error(format!("unsupported construct: {}", other.kind_name()))),
        }
    }

    /// Identifier in value position: local → upvalue → global through _ENV.
    fn gen_name(&mut self, name: StringId, dest: u8) {
        if self.fs().has_local(name) {
            let reg = self.local_reg(name);
            if reg != dest {
                self.emit(Instruction::abc(OpCode::Move, dest, reg as u16, 0));
            }
            return;
        }
        let top = self.func_stack.len() - 1;
        if let Some(idx) = self.resolve_upvalue(top, name) {
            self.emit(Instruction::abc(OpCode::GetUpval, dest, idx as u16, 0));
            return;
        }
        let env = self.env_upvalue();
        let k = self.fs_mut().add_const(Value::Str(name));
        self.emit(Instruction::abc(OpCode::GetTabUp, dest, env as u16, rk(k)));
    }

    /// Produce a 9-bit operand: a tagged constant for number/string
    /// literals when the opcode accepts RK, the register of a plain local,
    /// otherwise a fresh register holding the evaluated value.
    fn gen_operand(&mut self, e: &Expr, allow_const: bool) -> Result<u16, CodegenError> {
        match e {
            Expr::Number(n) if allow_const => {
                let k = self.fs_mut().add_const(Value::Number(*n));
                Ok(rk(k))
            }
            Expr::Str(id) if allow_const => {
                let k = self.fs_mut().add_const(Value::Str(*id));
                Ok(rk(k))
            }
            Expr::Name(id) if self.fs().has_local(*id) => Ok(self.local_reg(*id) as u16),
            _ => {
                let reg = self.fs_mut().regs.usable_reg();
                self.gen_expr(e, reg, Want::One)?;
                Ok(reg as u16)
            }
        }
    }

    fn gen_binary(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        dest: u8,
        want: Want,
    ) -> Result<(), CodegenError> {
        if op.is_comparison() {
            return self.gen_comparison(op, lhs, rhs, dest, want);
        }
        if op.is_logical() {
            return self.gen_logical(op, lhs, rhs, dest, want);
        }
        let (opcode, rk_ok) = match op {
            BinOp::Add => (OpCode::Add, true),
            BinOp::Sub => (OpCode::Sub, true),
            BinOp::Mul => (OpCode::Mul, true),
            BinOp::Div => (OpCode::Div, true),
            BinOp::Mod => (OpCode::Mod, true),
            BinOp::Pow => (OpCode::Pow, true),
            BinOp::Concat => (OpCode::Concat, false),
            _ => unreachable!("comparison and logical ops handled above"),
        };
        let b = self.gen_operand(lhs, rk_ok)?;
        let c = self.gen_operand(rhs, rk_ok)?;
        self.emit(Instruction::abc(opcode, dest, b, c));
        Ok(())
    }

    /// Comparisons lower to EQ/LT/LE whose A field is the outcome that lets
    /// execution fall through to the next instruction. `>` and `>=` keep
    /// their textual operand order; the flipped A expresses the negation.
    fn gen_comparison(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        dest: u8,
        want: Want,
    ) -> Result<(), CodegenError> {
        let b = self.gen_operand(lhs, true)?;
        let c = self.gen_operand(rhs, true)?;
        let (opcode, a) = match op {
            BinOp::Eq => (OpCode::Eq, 1),
            BinOp::NotEq => (OpCode::Eq, 0),
            BinOp::Lt => (OpCode::Lt, 1),
            BinOp::LtEq => (OpCode::Le, 1),
            BinOp::Gt => (OpCode::Lt, 0),
            BinOp::GtEq => (OpCode::Le, 0),
            _ => unreachable!("not a comparison"),
        };
        self.emit(Instruction::abc(opcode, a, b, c));
        if want == Want::One {
            // Materialize the boolean: the skipped jump lands on the
            // true-load, the fall-through loads false and hops over it.
            self.emit(Instruction::asbx(OpCode::Jmp, 0, 1));
            self.emit(Instruction::abc(OpCode::LoadBool, dest, 0, 1));
            self.emit(Instruction::abc(OpCode::LoadBool, dest, 1, 0));
        }
        Ok(())
    }

    /// Short-circuit `and`/`or`: TESTSET publishes the left value and skips
    /// the right-hand side when it already decides the result.
    ///
    /// The right-operand-then-MOVE trailer belongs to the one-value
    /// context. In condition position the right side lands straight in the
    /// tested register, so the caller's test picks up whichever side
    /// decided.
    fn gen_logical(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        dest: u8,
        want: Want,
    ) -> Result<(), CodegenError> {
        let left = self.fs_mut().regs.usable_reg();
        self.gen_expr(lhs, left, Want::One)?;
        let c = if op == BinOp::And { 0 } else { 1 };
        self.emit(Instruction::abc(OpCode::TestSet, dest, left as u16, c));
        let jump = self.emit_jump();
        if want == Want::One {
            let right = self.fs_mut().regs.usable_reg();
            self.gen_expr(rhs, right, Want::One)?;
            self.emit(Instruction::abc(OpCode::Move, dest, right as u16, 0));
        } else {
            self.gen_expr(rhs, dest, Want::One)?;
        }
        self.patch_jump(jump);
        Ok(())
    }

    fn gen_unary(&mut self, op: UnOp, operand: &Expr, dest: u8) -> Result<(), CodegenError> {
        let opcode = match op {
            UnOp::Neg => OpCode::Unm,
            UnOp::Not => OpCode::Not,
            UnOp::Len => OpCode::Len,
        };
        let b = self.gen_operand(operand, false)?;
        self.emit(Instruction::abc(opcode, dest, b, 0));
        Ok(())
    }

    /// Emit a call. The callable lands in `dest` (or a fresh register when
    /// the caller has no preference); arguments are forced into the
    /// registers directly above it. Returns the register holding the
    /// callable and the first result.
    ///
    /// A destination pinned below the current window cannot anchor the
    /// argument block (arguments allocate from the window top), so such a
    /// call is staged in a fresh register and the result copied back down.
    fn gen_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        dest: Option<u8>,
        want: Want,
    ) -> Result<u8, CodegenError> {
        let (r_call, copy_back) = match dest {
            Some(reg) => {
                if !args.is_empty() && reg + 1 < self.fs().regs.next {
                    (self.fs_mut().regs.next_reg(), Some(reg))
                } else {
                    (reg, None)
                }
            }
            None => (self.fs_mut().regs.usable_reg(), None),
        };
        self.gen_expr(callee, r_call, Want::One)?;

        let b = if args.is_empty() {
            1
        } else {
            let last_multi = args.last().map(Expr::is_call).unwrap_or(false);
            for (i, arg) in args.iter().enumerate() {
                let reg = self.fs_mut().regs.next_reg();
                let w = if i == args.len() - 1 && arg.is_call() {
                    Want::All
                } else {
                    Want::One
                };
                self.gen_expr(arg, reg, w)?;
            }
            if last_multi {
                0 // arguments extend to the top of the stack
            } else {
                args.len() as u16 + 1
            }
        };

        let c = match want {
            Want::All => 0,
            Want::Count(n) => {
                if n > 0 {
                    self.fs_mut().regs.set_next_reg(r_call + n);
                }
                n as u16 + 1
            }
            Want::One | Want::Test => {
                self.fs_mut().regs.set_next_reg(r_call + 1);
                2
            }
        };
        self.emit(Instruction::abc(OpCode::Call, r_call, b, c));
        if let Some(target) = copy_back {
            self.emit(Instruction::abc(OpCode::Move, target, r_call as u16, 0));
        }
        Ok(r_call)
    }

    // ---- Upvalue resolution ----

    /// Bind `name` in function `fs_idx` to a capture, creating entries in
    /// every function between the declaration and the use so the chain
    /// stays unbroken. Returns None when no enclosing function declares the
    /// name (a global access).
    fn resolve_upvalue(&mut self, fs_idx: usize, name: StringId) -> Option<u8> {
        if let Some(idx) = self.func_stack[fs_idx].find_upvalue(name) {
            return Some(idx);
        }
        if fs_idx == 0 {
            return None;
        }
        let parent = fs_idx - 1;
        if let Some(reg) = self.func_stack[parent].lookup_local(name) {
            // Only the frame directly above the capturing local sees it on
            // the stack.
            return Some(self.func_stack[fs_idx].add_upvalue(name, true, reg));
        }
        if let Some(parent_idx) = self.resolve_upvalue(parent, name) {
            return Some(self.func_stack[fs_idx].add_upvalue(name, false, parent_idx));
        }
        None
    }

    /// Upvalue index of `_ENV` in the current function, capturing it
    /// through the enclosing chain on first use.
    fn env_upvalue(&mut self) -> u8 {
        let top = self.func_stack.len() - 1;
        let env = self.env;
        self.resolve_upvalue(top, env)
            .expect("_ENV resolves through the enclosing chain")
    }
}
