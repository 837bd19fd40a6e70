use super::helpers::*;
use crescent_codegen::ast::Stat;
use crescent_codegen::opcode::{rk, OpCode};
use crescent_core::string::StringInterner;

#[test]
fn e2e_local_no_init() {
    let mut s = StringInterner::new();
    let stats = vec![local_stat(&mut s, &["a", "b", "c"], vec![])];
    let p = gen_chunk(&mut s, stats);
    assert_eq!(count_opcode(&p, OpCode::LoadNil), 3);
    for (i, local) in p.locals.iter().enumerate() {
        assert_eq!(local.reg, i as u8);
        assert_eq!(p.code[i].a(), i as u8);
        assert_eq!(p.code[i].b(), 0);
    }
}

#[test]
fn e2e_local_partial_init() {
    let mut s = StringInterner::new();
    let stats = vec![local_stat(&mut s, &["a", "b"], vec![num(1.0)])];
    let p = gen_chunk(&mut s, stats);
    assert_eq!(
        opcodes(&p),
        vec![OpCode::LoadK, OpCode::LoadNil, OpCode::Return]
    );
    assert_eq!(p.code[0].a(), 0);
    assert_eq!(p.code[1].a(), 1);
}

#[test]
fn e2e_local_extra_values_ignored() {
    let mut s = StringInterner::new();
    let stats = vec![local_stat(&mut s, &["a"], vec![num(1.0), num(2.0)])];
    let p = gen_chunk(&mut s, stats);
    // Only the bound initializer is evaluated.
    assert_eq!(count_opcode(&p, OpCode::LoadK), 1);
    assert_eq!(p.consts.len(), 1);
}

#[test]
fn e2e_local_single_call_result() {
    let mut s = StringInterner::new();
    let f = name(&mut s, "f");
    let stats = vec![local_stat(&mut s, &["a"], vec![call(f, vec![])])];
    let p = gen_chunk(&mut s, stats);
    assert_eq!(
        opcodes(&p),
        vec![OpCode::GetTabUp, OpCode::Call, OpCode::Return]
    );
    // One value wanted: C=2.
    assert_eq!(p.code[1].a(), 0);
    assert_eq!(p.code[1].c(), 2);
}

#[test]
fn e2e_assign_local_in_place() {
    let mut s = StringInterner::new();
    let stats = vec![
        local_stat(&mut s, &["a"], vec![num(1.0)]),
        assign_stat(&mut s, &["a"], vec![num(2.0)]),
    ];
    let p = gen_chunk(&mut s, stats);
    // Both writes go straight into the local's register; nothing is stored
    // through _ENV.
    assert_eq!(
        opcodes(&p),
        vec![OpCode::LoadK, OpCode::LoadK, OpCode::Return]
    );
    assert_eq!(p.code[0].a(), 0);
    assert_eq!(p.code[1].a(), 0);
    assert!(!has_opcode(&p, OpCode::SetTabUp));
}

#[test]
fn e2e_assign_globals_deferred_in_order() {
    let mut s = StringInterner::new();
    let stats = vec![assign_stat(&mut s, &["x", "y"], vec![num(1.0), num(2.0)])];
    let p = gen_chunk(&mut s, stats);
    assert_eq!(
        opcodes(&p),
        vec![
            OpCode::LoadK,
            OpCode::LoadK,
            OpCode::SetTabUp,
            OpCode::SetTabUp,
            OpCode::Return,
        ]
    );
    // Stores flush after all values, in target order.
    assert_eq!(p.code[2].b(), rk(0)); // "x"
    assert_eq!(p.code[2].c(), 0);
    assert_eq!(p.code[3].b(), rk(2)); // "y"
    assert_eq!(p.code[3].c(), 1);
    assert_eq!(get_string_const(&p, 0, &s), "x");
    assert_eq!(get_string_const(&p, 2, &s), "y");
}

#[test]
fn e2e_assign_pads_nil() {
    let mut s = StringInterner::new();
    let stats = vec![assign_stat(&mut s, &["x", "y"], vec![num(1.0)])];
    let p = gen_chunk(&mut s, stats);
    assert_eq!(
        opcodes(&p),
        vec![
            OpCode::LoadK,
            OpCode::LoadNil,
            OpCode::SetTabUp,
            OpCode::SetTabUp,
            OpCode::Return,
        ]
    );
}

#[test]
fn e2e_assign_locals_from_trailing_call() {
    let mut s = StringInterner::new();
    let f = name(&mut s, "f");
    let stats = vec![
        local_stat(&mut s, &["a", "b"], vec![]),
        assign_stat(&mut s, &["a", "b"], vec![call(f, vec![])]),
    ];
    let p = gen_chunk(&mut s, stats);
    assert_eq!(
        opcodes(&p),
        vec![
            OpCode::LoadNil,
            OpCode::LoadNil,
            OpCode::GetTabUp,
            OpCode::Call,
            OpCode::Return,
        ]
    );
    // The call lands in the first target's register and is asked for both
    // values; the second local's register is the next one up, so the
    // results are already in place.
    assert_eq!(p.code[3].a(), 0);
    assert_eq!(p.code[3].c(), 3);
}

#[test]
fn e2e_assign_globals_from_trailing_call() {
    let mut s = StringInterner::new();
    let f = name(&mut s, "f");
    let stats = vec![assign_stat(&mut s, &["x", "y"], vec![call(f, vec![])])];
    let p = gen_chunk(&mut s, stats);
    assert_eq!(
        opcodes(&p),
        vec![
            OpCode::GetTabUp,
            OpCode::Call,
            OpCode::SetTabUp,
            OpCode::SetTabUp,
            OpCode::Return,
        ]
    );
    // CALL A=0 C=3 leaves results in r0, r1; the deferred stores pick the
    // consecutive registers.
    assert_eq!(p.code[1].c(), 3);
    assert_eq!(p.code[2].b(), rk(0)); // "x"
    assert_eq!(p.code[2].c(), 0);
    assert_eq!(p.code[3].b(), rk(2)); // "y"
    assert_eq!(p.code[3].c(), 1);
}

#[test]
fn e2e_assign_existing_local_from_call_with_args() {
    // The target's register sits below two other locals, so the call is
    // staged above the window and the result moved back down; anchoring it
    // at the target would break argument contiguity.
    let mut s = StringInterner::new();
    let f = name(&mut s, "f");
    let z = name(&mut s, "z");
    let stats = vec![
        local_stat(&mut s, &["x"], vec![num(1.0)]),
        local_stat(&mut s, &["y"], vec![num(2.0)]),
        local_stat(&mut s, &["z"], vec![num(3.0)]),
        assign_stat(&mut s, &["x"], vec![call(f, vec![z])]),
    ];
    let p = gen_chunk(&mut s, stats);
    assert_eq!(
        opcodes(&p),
        vec![
            OpCode::LoadK,
            OpCode::LoadK,
            OpCode::LoadK,
            OpCode::GetTabUp, // f, staged above the locals
            OpCode::Move,     // z into the argument slot
            OpCode::Call,
            OpCode::Move, // result back into x's register
            OpCode::Return,
        ]
    );
    assert_eq!(p.code[3].a(), 3);
    let call_inst = p.code[5];
    assert_eq!(call_inst.a(), 3);
    assert_eq!(call_inst.b(), 2);
    assert_eq!(call_inst.c(), 2);
    // The argument occupies A+1.
    assert_eq!(p.code[4].a(), call_inst.a() + 1);
    assert_eq!(p.code[4].b(), 2); // z's register
    // Copy-back into the pinned local.
    assert_eq!(p.code[6].a(), 0);
    assert_eq!(p.code[6].b(), 3);
}

#[test]
fn e2e_max_stack_covers_call_results() {
    // The call is asked for three results, growing the window past every
    // register any instruction had written before it.
    let mut s = StringInterner::new();
    let f = name(&mut s, "f");
    let stats = vec![
        local_stat(&mut s, &["p"], vec![num(0.0)]),
        local_stat(&mut s, &["q"], vec![num(0.0)]),
        local_stat(&mut s, &["a", "b", "c"], vec![call(f, vec![])]),
    ];
    let p = gen_chunk(&mut s, stats);
    let call_inst = p.code[find_opcode(&p, OpCode::Call).unwrap()];
    assert_eq!(call_inst.a(), 2);
    assert_eq!(call_inst.c(), 4);
    // Results land in registers 2..=4.
    let regs: Vec<u8> = p.locals.iter().map(|l| l.reg).collect();
    assert_eq!(regs, vec![0, 1, 2, 3, 4]);
    assert_eq!(p.max_stack_size, 5);
}

#[test]
fn e2e_if_else_backpatching() {
    let mut s = StringInterner::new();
    let a = name(&mut s, "a");
    let then_branch = assign_stat(&mut s, &["x"], vec![num(1.0)]);
    let else_branch = assign_stat(&mut s, &["x"], vec![num(2.0)]);
    let stats = vec![Stat::If {
        cond: a,
        consequent: vec![then_branch],
        alternate: Some(vec![else_branch]),
    }];
    let p = gen_chunk(&mut s, stats);
    assert_eq!(
        opcodes(&p),
        vec![
            OpCode::GetTabUp, // a
            OpCode::Test,
            OpCode::Jmp,
            OpCode::LoadK, // then
            OpCode::SetTabUp,
            OpCode::Jmp,
            OpCode::LoadK, // else
            OpCode::SetTabUp,
            OpCode::Return,
        ]
    );
    // The false-jump clears the then-body and its tail jump; the tail jump
    // clears the else-body.
    assert_eq!(p.code[2].sbx(), 3);
    assert_eq!(p.code[5].sbx(), 2);
}

#[test]
fn e2e_if_jump_targets_in_range() {
    let mut s = StringInterner::new();
    let a = name(&mut s, "a");
    let b = name(&mut s, "b");
    let inner_then = assign_stat(&mut s, &["x"], vec![num(1.0)]);
    let outer_else = assign_stat(&mut s, &["x"], vec![num(2.0)]);
    let inner = Stat::If {
        cond: b,
        consequent: vec![inner_then],
        alternate: None,
    };
    let stats = vec![Stat::If {
        cond: a,
        consequent: vec![inner],
        alternate: Some(vec![outer_else]),
    }];
    let p = gen_chunk(&mut s, stats);
    for (pc, inst) in p.code.iter().enumerate() {
        if inst.opcode() == OpCode::Jmp {
            let target = pc as i32 + 1 + inst.sbx();
            assert!(
                target >= 0 && target <= p.code.len() as i32,
                "jump at {pc} lands at {target}, out of range"
            );
        }
    }
}

#[test]
fn e2e_do_block_flattens() {
    let mut s = StringInterner::new();
    let inner = local_stat(&mut s, &["a"], vec![num(1.0)]);
    let p = gen_chunk(&mut s, vec![Stat::Do(vec![inner])]);
    assert_eq!(opcodes(&p), vec![OpCode::LoadK, OpCode::Return]);
    assert_eq!(p.locals.len(), 1);
}

#[test]
fn e2e_call_statement_discards_results() {
    let mut s = StringInterner::new();
    let f = name(&mut s, "f");
    let p = gen_chunk(&mut s, vec![Stat::Call(call(f, vec![num(1.0)]))]);
    assert_eq!(
        opcodes(&p),
        vec![OpCode::GetTabUp, OpCode::LoadK, OpCode::Call, OpCode::Return]
    );
    // Argument sits directly above the callable.
    assert_eq!(p.code[0].a(), 0);
    assert_eq!(p.code[1].a(), 1);
    // CALL A=0 B=2 C=1: one argument, no results used.
    assert_eq!(p.code[2].a(), 0);
    assert_eq!(p.code[2].b(), 2);
    assert_eq!(p.code[2].c(), 1);
}

#[test]
fn e2e_call_args_contiguous() {
    let mut s = StringInterner::new();
    let f = name(&mut s, "f");
    let a = name(&mut s, "a");
    let p = gen_chunk(&mut s, vec![Stat::Call(call(f, vec![num(1.0), a, num(2.0)]))]);
    let call_pc = find_opcode(&p, OpCode::Call).unwrap();
    let inst = p.code[call_pc];
    assert_eq!(inst.b(), 4); // three arguments
    // Arguments occupy [A+1, A+B-1] contiguously.
    for (i, arg_inst) in p.code[1..call_pc].iter().enumerate() {
        assert_eq!(arg_inst.a(), inst.a() + 1 + i as u8);
    }
}

#[test]
fn e2e_call_trailing_call_spreads() {
    let mut s = StringInterner::new();
    let f = name(&mut s, "f");
    let g = name(&mut s, "g");
    let p = gen_chunk(&mut s, vec![Stat::Call(call(f, vec![call(g, vec![])]))]);
    assert_eq!(
        opcodes(&p),
        vec![
            OpCode::GetTabUp, // f
            OpCode::GetTabUp, // g
            OpCode::Call,     // g() with all results kept
            OpCode::Call,     // f(...)
            OpCode::Return,
        ]
    );
    // Inner call returns everything (C=0); outer consumes to the top (B=0).
    assert_eq!(p.code[2].c(), 0);
    assert_eq!(p.code[3].b(), 0);
}

#[test]
fn e2e_return_empty() {
    let mut s = StringInterner::new();
    let p = gen_chunk(&mut s, vec![ret(vec![])]);
    // The explicit empty return plus the chunk's default.
    assert_eq!(opcodes(&p), vec![OpCode::Return, OpCode::Return]);
    for inst in &p.code {
        assert_eq!(inst.a(), 0);
        assert_eq!(inst.b(), 1);
    }
}

#[test]
fn e2e_return_two_values() {
    let mut s = StringInterner::new();
    let a = name(&mut s, "a");
    let stats = vec![
        local_stat(&mut s, &["a"], vec![num(1.0)]),
        ret(vec![a, num(2.0)]),
    ];
    let p = gen_chunk(&mut s, stats);
    assert_eq!(
        opcodes(&p),
        vec![
            OpCode::LoadK,
            OpCode::Move,
            OpCode::LoadK,
            OpCode::Return,
            OpCode::Return,
        ]
    );
    // Results are gathered into consecutive registers above the locals.
    assert_eq!(p.code[1].a(), 1);
    assert_eq!(p.code[2].a(), 2);
    assert_eq!(p.code[3].a(), 1);
    assert_eq!(p.code[3].b(), 3);
}

#[test]
fn e2e_return_call_single() {
    let mut s = StringInterner::new();
    let f = name(&mut s, "f");
    let p = gen_chunk(&mut s, vec![ret(vec![call(f, vec![])])]);
    assert_eq!(
        opcodes(&p),
        vec![OpCode::GetTabUp, OpCode::Call, OpCode::Return, OpCode::Return]
    );
    assert_eq!(p.code[1].c(), 2);
    assert_eq!(p.code[2].a(), 0);
    assert_eq!(p.code[2].b(), 2);
}

#[test]
fn e2e_next_reg_rewound_after_call() {
    let mut s = StringInterner::new();
    let f = name(&mut s, "f");
    let stats = vec![
        local_stat(&mut s, &["a"], vec![call(f, vec![])]),
        local_stat(&mut s, &["b"], vec![num(1.0)]),
    ];
    let p = gen_chunk(&mut s, stats);
    // After CALL C=2 the window shrinks back to one slot, so the next
    // local lands in register 1.
    assert_eq!(p.locals[1].reg, 1);
    let b_load = p.code[2];
    assert_eq!(b_load.opcode(), OpCode::LoadK);
    assert_eq!(b_load.a(), 1);
}

#[test]
fn e2e_constant_pool_no_duplicates() {
    let mut s = StringInterner::new();
    let stats = vec![
        assign_stat(&mut s, &["x"], vec![num(1.0)]),
        assign_stat(&mut s, &["x"], vec![num(1.0)]),
    ];
    let p = gen_chunk(&mut s, stats);
    // "x" and 1 each intern once.
    assert_eq!(p.consts.len(), 2);
    for (i, a) in p.consts.iter().enumerate() {
        for b in p.consts.iter().skip(i + 1) {
            assert_ne!(a, b);
        }
    }
}
